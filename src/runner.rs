use std::sync::Arc;
use std::time::Instant;

use regex::Regex;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::basecase::{BaseCaseOracle, DEFAULT_FAIL_CASE};
use crate::dispatcher::expansion::{run_expansion, ExpansionContext};
use crate::dispatcher::{
    DispatchSettings, Dispatcher, ExtToCheck, ParseEntry, RunCounters,
};
use crate::generator::{
    BruteForceAlphabet, Dictionary, FuzzMarkers, GeneratorError, PathGenerator,
};
use crate::monitor::{run_monitor, MonitorConfig, ProgressSnapshot};
use crate::output::{DiscoveryResult, ScanReport};
use crate::transport::{ProbeMethod, ReqwestTransport, Transport};
use crate::worker::{WorkerContext, WorkerPool};

const DRAIN_POLL: Duration = Duration::from_millis(200);

#[derive(Clone, Debug)]
pub enum WordlistSource {
    FilePath(String),
    Inline(Vec<String>),
}

#[derive(Clone, Debug)]
pub enum GeneratorChoice {
    /// Candidates come from the wordlist.
    Dictionary,
    /// Candidates are every string over `charset` of the given lengths.
    BruteForce {
        charset: String,
        min_len: usize,
        max_len: usize,
    },
    /// Wordlist candidates substituted into a single URL template.
    UrlFuzz { start: String, end: String },
}

#[derive(Clone, Debug)]
pub struct Options {
    /// Target URL; its path becomes the scan start point.
    pub target: String,
    pub wordlist: Option<WordlistSource>,
    pub generator: GeneratorChoice,
    pub extensions: Vec<String>,
    /// Also probe candidates with no extension during the file pass.
    pub blank_ext: bool,
    pub do_dirs: bool,
    pub do_files: bool,
    pub recursive: bool,
    pub case_insensitive: bool,
    pub only_under_start_point: bool,
    pub workers: usize,
    pub timeout_seconds: usize,
    pub proxy: Option<String>,
    pub follow_redirects: bool,
    pub headers: Vec<(String, String)>,
    /// Requests per second across the whole pool; None means unthrottled.
    pub rate_limit: Option<u32>,
    pub fail_case: String,
    pub fail_case_regexes: Vec<String>,
    /// Link extensions the crawl feedback must ignore.
    pub exts_to_skip: Vec<String>,
    /// Switch workers to HEAD where the base case allows it.
    pub auto_switch_head: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            target: String::new(),
            wordlist: None,
            generator: GeneratorChoice::Dictionary,
            extensions: Vec::new(),
            blank_ext: false,
            do_dirs: true,
            do_files: false,
            recursive: true,
            case_insensitive: false,
            only_under_start_point: true,
            workers: 10,
            timeout_seconds: 10,
            proxy: None,
            follow_redirects: false,
            headers: Vec::new(),
            rate_limit: None,
            fail_case: DEFAULT_FAIL_CASE.to_string(),
            fail_case_regexes: Vec::new(),
            exts_to_skip: vec![
                "jpg".into(),
                "jpeg".into(),
                "gif".into(),
                "png".into(),
                "ico".into(),
                "css".into(),
                "svg".into(),
                "woff".into(),
                "woff2".into(),
            ],
            auto_switch_head: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("no target URL provided")]
    NoTarget,
    #[error("invalid target URL: {url}")]
    InvalidTargetUrl { url: String },
    #[error("worker count must be at least 1")]
    ZeroWorkers,
    #[error("nothing to scan: both directory and file passes are disabled")]
    NothingToScan,
    #[error("file pass enabled but no extensions configured (and blank extension is off)")]
    FilesWithoutExtensions,
    #[error("a wordlist is required for this generator")]
    MissingWordlist,
    #[error("invalid fail-case regex {pattern:?}: {source}")]
    InvalidRegex {
        pattern: String,
        source: regex::Error,
    },
    #[error(transparent)]
    Generator(#[from] GeneratorError),
    #[error("failed to build HTTP client: {source}")]
    HttpClientBuild { source: reqwest::Error },
}

/// Handle to a scan in flight. `controls` can be cloned out for pause,
/// resume, stop, subtree skips and pool resizing; `events` streams results
/// as they are found; `parse_queue` feeds an optional link-extraction
/// consumer.
pub struct RunningScan {
    pub controls: ScanControls,
    pub progress: watch::Receiver<ProgressSnapshot>,
    pub events: Option<mpsc::UnboundedReceiver<DiscoveryResult>>,
    pub parse_queue: Option<mpsc::Receiver<ParseEntry>>,
    started: Instant,
    dispatcher: Arc<Dispatcher>,
    counters: Arc<RunCounters>,
    pool: Arc<WorkerPool>,
    expansion: JoinHandle<()>,
    monitor: JoinHandle<()>,
    watcher: JoinHandle<()>,
}

impl RunningScan {
    /// Waits for the scan to drain (or be stopped) and returns the report.
    pub async fn wait(self) -> ScanReport {
        let _ = self.expansion.await;
        self.dispatcher.stop.wait_on().await;
        self.pool.shutdown().await;
        let _ = self.monitor.await;
        let _ = self.watcher.await;

        let report = ScanReport {
            results: self.dispatcher.take_results().await,
            counters: self.counters.snapshot(),
            elapsed_seconds: self.started.elapsed().as_secs_f64(),
        };
        self.dispatcher.reset().await;
        report
    }
}

#[derive(Clone)]
pub struct ScanControls {
    dispatcher: Arc<Dispatcher>,
    pool: Arc<WorkerPool>,
}

impl ScanControls {
    pub fn pause(&self) {
        self.dispatcher.pause.set(true);
    }

    pub fn resume(&self) {
        self.dispatcher.pause.set(false);
    }

    pub fn is_paused(&self) -> bool {
        self.dispatcher.pause.is_on()
    }

    pub fn stop(&self) {
        self.dispatcher.stop.set(true);
    }

    /// Abandons pending work under `prefix`. Returns how many queued probes
    /// were purged.
    pub async fn skip_subtree(&self, prefix: &str) -> usize {
        self.dispatcher.skip_subtree(prefix).await
    }

    pub async fn add_workers(&self, count: usize) {
        self.pool.add_workers(count).await;
    }

    pub async fn remove_workers(&self, count: usize) {
        self.pool.remove_workers(count).await;
    }

    pub async fn worker_count(&self) -> usize {
        self.pool.size().await
    }

    pub fn counters(&self) -> crate::dispatcher::CounterSnapshot {
        self.dispatcher.counters.snapshot()
    }
}

pub struct Runner {
    options: Options,
    first_part: String,
    start_point: String,
}

impl Runner {
    pub fn new(options: Options) -> Result<Self, RunnerError> {
        if options.target.trim().is_empty() {
            return Err(RunnerError::NoTarget);
        }
        if options.workers == 0 {
            return Err(RunnerError::ZeroWorkers);
        }

        let is_fuzz = matches!(options.generator, GeneratorChoice::UrlFuzz { .. });
        if !is_fuzz {
            if !options.do_dirs && !options.do_files {
                return Err(RunnerError::NothingToScan);
            }
            if options.do_files && options.extensions.is_empty() && !options.blank_ext {
                return Err(RunnerError::FilesWithoutExtensions);
            }
        }

        let needs_wordlist = matches!(
            options.generator,
            GeneratorChoice::Dictionary | GeneratorChoice::UrlFuzz { .. }
        );
        if needs_wordlist && options.wordlist.is_none() {
            return Err(RunnerError::MissingWordlist);
        }

        let (first_part, start_point) = split_target(&options.target)?;
        Ok(Self {
            options,
            first_part,
            start_point,
        })
    }

    pub fn first_part(&self) -> &str {
        &self.first_part
    }

    pub fn start_point(&self) -> &str {
        &self.start_point
    }

    /// Runs the scan to completion with a real HTTP client.
    pub async fn run(&self) -> Result<ScanReport, RunnerError> {
        Ok(self.start().await?.wait().await)
    }

    pub async fn start(&self) -> Result<RunningScan, RunnerError> {
        let transport = ReqwestTransport::build(
            self.options.proxy.as_deref(),
            self.options.timeout_seconds,
            self.options.follow_redirects,
            &self.options.headers,
        )
        .map_err(|source| RunnerError::HttpClientBuild { source })?;
        self.start_with_transport(Arc::new(transport)).await
    }

    /// Starts the scan on a caller-supplied transport.
    pub async fn start_with_transport(
        &self,
        transport: Arc<dyn Transport>,
    ) -> Result<RunningScan, RunnerError> {
        let generator = self.build_generator().await?;
        let regexes = compile_regexes(&self.options.fail_case_regexes)?;

        let mut extensions: Vec<ExtToCheck> = self
            .options
            .extensions
            .iter()
            .map(|name| ExtToCheck::new(name, true))
            .collect();
        if self.options.blank_ext {
            extensions.push(ExtToCheck::new("", true));
        }
        let ext_count = extensions.iter().filter(|e| e.check).count() as u64;

        let is_fuzz = matches!(self.options.generator, GeneratorChoice::UrlFuzz { .. });
        let settings = DispatchSettings {
            first_part: self.first_part.clone(),
            start_point: self.start_point.clone(),
            extensions,
            do_dirs: self.options.do_dirs && !is_fuzz,
            do_files: self.options.do_files && !is_fuzz,
            recursive: self.options.recursive && !is_fuzz,
            case_insensitive: self.options.case_insensitive,
            only_under_start_point: self.options.only_under_start_point,
            worker_count: self.options.workers,
            exts_to_skip: self.options.exts_to_skip.clone(),
        };

        let counters = Arc::new(RunCounters::default());
        let (dispatcher, parse_rx, live_rx) =
            Dispatcher::new(settings, counters.clone()).await;

        let oracle = Arc::new(BaseCaseOracle::new(
            transport.clone(),
            counters.clone(),
            self.first_part.clone(),
            self.options.fail_case.clone(),
            regexes,
        ));

        if self.options.auto_switch_head {
            preflight_head(&*transport, &self.first_part, &dispatcher).await;
        } else {
            dispatcher.set_auto(false);
        }

        let started = Instant::now();

        let fuzz = match &self.options.generator {
            GeneratorChoice::UrlFuzz { start, end } => Some(FuzzMarkers {
                start: start.clone(),
                end: end.clone(),
            }),
            _ => None,
        };
        let expansion = tokio::spawn(run_expansion(ExpansionContext {
            dispatcher: dispatcher.clone(),
            oracle,
            generator: generator.clone(),
            fuzz,
        }));

        let monitor_config = MonitorConfig {
            pass_size: generator.pass_size(),
            ext_count,
            do_dirs: dispatcher.settings.do_dirs || is_fuzz,
            do_files: dispatcher.settings.do_files,
            recursive: dispatcher.settings.recursive,
            tick: Duration::from_secs(1),
        };
        let (progress_tx, progress_rx) = watch::channel(ProgressSnapshot::default());
        let monitor = tokio::spawn(run_monitor(
            dispatcher.clone(),
            monitor_config,
            progress_tx,
        ));

        let pool = Arc::new(WorkerPool::new(WorkerContext {
            dispatcher: dispatcher.clone(),
            transport,
            rate_limit: self.options.rate_limit,
            started,
        }));
        pool.add_workers(self.options.workers).await;

        let watcher = tokio::spawn(drain_watcher(dispatcher.clone()));

        Ok(RunningScan {
            controls: ScanControls {
                dispatcher: dispatcher.clone(),
                pool: pool.clone(),
            },
            progress: progress_rx,
            events: Some(live_rx),
            parse_queue: Some(parse_rx),
            started,
            dispatcher,
            counters,
            pool,
            expansion,
            monitor,
            watcher,
        })
    }

    async fn build_generator(&self) -> Result<Arc<dyn PathGenerator>, RunnerError> {
        match &self.options.generator {
            GeneratorChoice::Dictionary | GeneratorChoice::UrlFuzz { .. } => {
                match self.options.wordlist.as_ref() {
                    Some(WordlistSource::FilePath(path)) => {
                        Ok(Arc::new(Dictionary::from_file(path).await?))
                    }
                    Some(WordlistSource::Inline(words)) => {
                        let words: Vec<String> = words
                            .iter()
                            .map(|w| w.trim().to_string())
                            .filter(|w| !w.is_empty() && !w.starts_with('#'))
                            .collect();
                        if words.is_empty() {
                            return Err(RunnerError::Generator(GeneratorError::EmptyWordlist {
                                path: "<inline>".to_string(),
                            }));
                        }
                        Ok(Arc::new(Dictionary::new(words)))
                    }
                    None => Err(RunnerError::MissingWordlist),
                }
            }
            GeneratorChoice::BruteForce {
                charset,
                min_len,
                max_len,
            } => Ok(Arc::new(BruteForceAlphabet::new(
                charset.chars().collect(),
                *min_len,
                *max_len,
            )?)),
        }
    }
}

/// HEAD preflight: some servers reject HEAD outright, in which case every
/// probe uses GET from the start.
async fn preflight_head(transport: &dyn Transport, first_part: &str, dispatcher: &Dispatcher) {
    let url = format!("{first_part}/");
    match transport.send(ProbeMethod::Head, &url).await {
        Ok(response) if matches!(response.status, 501 | 400 | 405) => {
            tracing::info!(status = response.status, "server rejects HEAD, using GET only");
            dispatcher.set_auto(false);
        }
        Ok(_) => {}
        Err(err) => {
            tracing::warn!(error = %err, "HEAD preflight failed, keeping auto mode");
        }
    }
}

/// Stops the run once every queue is empty and nothing is in flight.
async fn drain_watcher(dispatcher: Arc<Dispatcher>) {
    loop {
        if dispatcher.stop.is_on() {
            return;
        }
        if dispatcher.drained().await {
            tracing::debug!("scan drained");
            dispatcher.stop.set(true);
            return;
        }
        tokio::time::sleep(DRAIN_POLL).await;
    }
}

fn compile_regexes(patterns: &[String]) -> Result<Vec<Regex>, RunnerError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|source| RunnerError::InvalidRegex {
                pattern: pattern.clone(),
                source,
            })
        })
        .collect()
}

/// Splits a target URL into scheme://host:port and a normalized start
/// directory that always begins and ends with '/'.
fn split_target(target: &str) -> Result<(String, String), RunnerError> {
    let url = reqwest::Url::parse(target).map_err(|_| RunnerError::InvalidTargetUrl {
        url: target.to_string(),
    })?;
    let host = url
        .host_str()
        .ok_or_else(|| RunnerError::InvalidTargetUrl {
            url: target.to_string(),
        })?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| RunnerError::InvalidTargetUrl {
            url: target.to_string(),
        })?;
    let first_part = format!("{}://{}:{}", url.scheme(), host, port);

    let mut start_point = url.path().to_string();
    if start_point.is_empty() {
        start_point.push('/');
    }
    if !start_point.ends_with('/') {
        start_point.push('/');
    }
    Ok((first_part, start_point))
}
