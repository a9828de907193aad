pub mod expansion;
mod queue;
mod switch;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};

use crate::basecase::BaseCase;
use crate::output::{DiscoveryResult, ResultKind};
use crate::transport::ProbeMethod;

pub use queue::BoundedDeque;
pub use switch::Switch;

/// Probe queue stays small so cancellation can purge near-real-time and
/// memory stays bounded; the generator blocks on it for backpressure.
pub const PROBE_QUEUE_FACTOR: usize = 3;
pub const DIR_QUEUE_CAPACITY: usize = 100_000;
pub const PARSE_QUEUE_CAPACITY: usize = 200_000;

/// One extension to test under a directory. An empty name means the blank
/// extension: the candidate is probed with no suffix at all.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtToCheck {
    pub name: String,
    pub check: bool,
}

impl ExtToCheck {
    pub fn new(name: &str, check: bool) -> Self {
        Self {
            name: name.trim_start_matches('.').to_string(),
            check,
        }
    }

    pub fn suffix(&self) -> String {
        if self.name.is_empty() {
            String::new()
        } else {
            format!(".{}", self.name)
        }
    }
}

/// A directory awaiting expansion, with its own copy of the extension set so
/// entries never share mutable extension state.
#[derive(Clone, Debug)]
pub struct DirToCheck {
    pub path: String,
    pub exts: Vec<ExtToCheck>,
}

/// One unit of dispatchable work. Immutable once created; consumed exactly
/// once by a worker.
#[derive(Clone, Debug)]
pub struct ProbeTarget {
    pub url: String,
    /// URL path portion, used for subtree purges and reporting.
    pub path: String,
    pub method: ProbeMethod,
    pub is_dir: bool,
    /// The raw candidate probed, stripped from response bodies before
    /// base-case comparison.
    pub item: String,
    pub base: Arc<BaseCase>,
}

/// A found response body queued for the external link-extraction consumer.
#[derive(Clone, Debug)]
pub struct ParseEntry {
    pub body: String,
    pub source_path: String,
}

#[derive(Debug, Default)]
pub struct RunCounters {
    total_done: AtomicU64,
    dirs_found: AtomicU64,
    base_cases: AtomicU64,
    work_correction: AtomicU64,
    parsed_links: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub total_done: u64,
    pub dirs_found: u64,
    pub base_cases: u64,
    pub work_correction: u64,
    pub parsed_links: u64,
}

impl RunCounters {
    pub fn probe_done(&self) {
        self.total_done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_done(&self) -> u64 {
        self.total_done.load(Ordering::Relaxed)
    }

    pub fn dir_found(&self) {
        self.dirs_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dirs_found(&self) -> u64 {
        self.dirs_found.load(Ordering::Relaxed)
    }

    pub fn base_case_produced(&self) {
        self.base_cases.fetch_add(1, Ordering::Relaxed);
    }

    pub fn base_cases(&self) -> u64 {
        self.base_cases.load(Ordering::Relaxed)
    }

    pub fn add_work_correction(&self, amount: u64) {
        self.work_correction.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn work_correction(&self) -> u64 {
        self.work_correction.load(Ordering::Relaxed)
    }

    pub fn parsed_link_processed(&self) {
        self.parsed_links.fetch_add(1, Ordering::Relaxed);
    }

    pub fn parsed_links(&self) -> u64 {
        self.parsed_links.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            total_done: self.total_done(),
            dirs_found: self.dirs_found(),
            base_cases: self.base_cases(),
            work_correction: self.work_correction(),
            parsed_links: self.parsed_links(),
        }
    }

    pub fn reset(&self) {
        self.total_done.store(0, Ordering::Relaxed);
        self.dirs_found.store(0, Ordering::Relaxed);
        self.base_cases.store(0, Ordering::Relaxed);
        self.work_correction.store(0, Ordering::Relaxed);
        self.parsed_links.store(0, Ordering::Relaxed);
    }
}

#[derive(Clone, Debug)]
pub struct DispatchSettings {
    /// scheme://host:port
    pub first_part: String,
    /// Normalized start directory, always wrapped in '/'.
    pub start_point: String,
    pub extensions: Vec<ExtToCheck>,
    pub do_dirs: bool,
    pub do_files: bool,
    pub recursive: bool,
    pub case_insensitive: bool,
    pub only_under_start_point: bool,
    pub worker_count: usize,
    /// Link extensions the crawler feed should never enqueue.
    pub exts_to_skip: Vec<String>,
}

/// Owns the three queues, the backlog membership set, the result log and the
/// run counters; every worker and the expansion loop go through it.
pub struct Dispatcher {
    pub settings: DispatchSettings,
    pub probe_queue: BoundedDeque<ProbeTarget>,
    pub dir_queue: BoundedDeque<DirToCheck>,
    pub counters: Arc<RunCounters>,
    pub pause: Switch,
    pub stop: Switch,

    parse_tx: mpsc::Sender<ParseEntry>,
    live_tx: mpsc::UnboundedSender<DiscoveryResult>,
    backlog_seen: Mutex<HashSet<String>>,
    processed_links: Mutex<HashSet<String>>,
    results: Mutex<Vec<DiscoveryResult>>,
    auto_head: AtomicBool,
    skip_current: AtomicBool,
    currently_processing: Mutex<String>,
    expansion_done: AtomicBool,
    inflight_probes: AtomicUsize,
}

impl Dispatcher {
    pub async fn new(
        settings: DispatchSettings,
        counters: Arc<RunCounters>,
    ) -> (
        Arc<Self>,
        mpsc::Receiver<ParseEntry>,
        mpsc::UnboundedReceiver<DiscoveryResult>,
    ) {
        let (parse_tx, parse_rx) = mpsc::channel(PARSE_QUEUE_CAPACITY);
        let (live_tx, live_rx) = mpsc::unbounded_channel();

        let probe_cap = settings.worker_count.max(1) * PROBE_QUEUE_FACTOR;
        let dispatcher = Arc::new(Self {
            probe_queue: BoundedDeque::new(probe_cap),
            dir_queue: BoundedDeque::new(DIR_QUEUE_CAPACITY),
            counters,
            pause: Switch::new(false),
            stop: Switch::new(false),
            parse_tx,
            live_tx,
            backlog_seen: Mutex::new(HashSet::new()),
            processed_links: Mutex::new(HashSet::new()),
            results: Mutex::new(Vec::new()),
            auto_head: AtomicBool::new(true),
            skip_current: AtomicBool::new(false),
            currently_processing: Mutex::new(String::new()),
            expansion_done: AtomicBool::new(false),
            inflight_probes: AtomicUsize::new(0),
            settings,
        });

        // seed the backlog with the start point
        let start = dispatcher.settings.start_point.clone();
        let key = dispatcher.normalize_key(&start);
        dispatcher.backlog_seen.lock().await.insert(key);
        dispatcher
            .dir_queue
            .push(DirToCheck {
                path: start,
                exts: dispatcher.settings.extensions.clone(),
            })
            .await;

        (dispatcher, parse_rx, live_rx)
    }

    fn normalize_key(&self, path: &str) -> String {
        if self.settings.case_insensitive {
            path.to_lowercase()
        } else {
            path.to_string()
        }
    }

    fn under_start_point(&self, path: &str) -> bool {
        if self.settings.case_insensitive {
            path.to_lowercase()
                .starts_with(&self.settings.start_point.to_lowercase())
        } else {
            path.starts_with(&self.settings.start_point)
        }
    }

    fn is_start_point(&self, path: &str) -> bool {
        if self.settings.case_insensitive {
            path.eq_ignore_ascii_case(&self.settings.start_point)
        } else {
            path == self.settings.start_point
        }
    }

    async fn record(&self, result: DiscoveryResult) {
        let _ = self.live_tx.send(result.clone());
        self.results.lock().await.push(result);
    }

    /// A worker classified `path` as a found directory. Applies the
    /// start-point filter, deduplicates against everything ever enqueued
    /// (case rule per configuration) and, when recursion is on, feeds the
    /// backlog with a fresh copy of the extension set.
    pub async fn found_dir(&self, path: &str, status: u16, low_confidence: bool) {
        tracing::debug!(path, status, "dir found");

        let mut dir = path.to_string();
        if !dir.ends_with('/') {
            dir.push('/');
        }

        self.record(DiscoveryResult {
            path: dir.clone(),
            status,
            kind: ResultKind::Directory,
            message: None,
            low_confidence,
        })
        .await;
        self.mark_link_processed(&dir).await;

        if !self.settings.recursive || self.is_start_point(&dir) {
            return;
        }
        if self.settings.only_under_start_point && !self.under_start_point(&dir) {
            return;
        }

        let key = self.normalize_key(&dir);
        let fresh = {
            let mut seen = self.backlog_seen.lock().await;
            seen.insert(key)
        };
        if !fresh {
            return;
        }

        self.dir_queue
            .push(DirToCheck {
                path: dir,
                exts: self.settings.extensions.clone(),
            })
            .await;
        self.counters.dir_found();
    }

    pub async fn found_file(&self, path: &str, status: u16, low_confidence: bool) {
        tracing::debug!(path, status, "file found");
        self.record(DiscoveryResult {
            path: path.to_string(),
            status,
            kind: ResultKind::File,
            message: None,
            low_confidence,
        })
        .await;
        self.mark_link_processed(path).await;
    }

    pub async fn found_error(&self, path: &str, reason: &str) {
        tracing::warn!(path, reason, "probe error");
        self.record(DiscoveryResult {
            path: path.to_string(),
            status: 0,
            kind: ResultKind::Error,
            message: Some(reason.to_string()),
            low_confidence: false,
        })
        .await;
    }

    /// Feeds a found body to the link-extraction queue. The queue is offered
    /// to, never blocked on: link extraction is an external collaborator and
    /// the worker pool must not deadlock when nobody is consuming.
    pub async fn enqueue_parse(&self, body: String, source_path: &str) {
        if self.settings.only_under_start_point && !self.under_start_point(source_path) {
            return;
        }
        let entry = ParseEntry {
            body,
            source_path: source_path.to_string(),
        };
        match self.parse_tx.try_send(entry) {
            Ok(()) => self.counters.parsed_link_processed(),
            Err(_) => {
                tracing::debug!(source_path, "parse queue full or unattached, body dropped");
            }
        }
    }

    /// Records a path as handled by the crawl feedback loop. Returns false
    /// when the link was seen before (case rule per configuration).
    pub async fn mark_link_processed(&self, path: &str) -> bool {
        let key = self.normalize_key(path);
        self.processed_links.lock().await.insert(key)
    }

    pub async fn link_already_processed(&self, path: &str) -> bool {
        let key = self.normalize_key(path);
        self.processed_links.lock().await.contains(&key)
    }

    /// True when a parsed link should not be fed back as a probe because of
    /// its file extension.
    pub fn should_skip_link(&self, path: &str) -> bool {
        let ext = match path.rsplit_once('.') {
            Some((_, ext)) => ext.to_ascii_lowercase(),
            None => return false,
        };
        self.settings
            .exts_to_skip
            .iter()
            .any(|skip| skip.trim_start_matches('.').eq_ignore_ascii_case(&ext))
    }

    /// Abandons all pending work under `prefix`: stops the generator if it
    /// is currently expanding a matching directory, purges matching queued
    /// probes and corrects the progress total. Returns the purge count.
    pub async fn skip_subtree(&self, prefix: &str) -> usize {
        let matches = |path: &str| {
            if self.settings.case_insensitive {
                path.to_lowercase().starts_with(&prefix.to_lowercase())
            } else {
                path.starts_with(prefix)
            }
        };

        {
            let current = self.currently_processing.lock().await;
            if matches(&current) {
                self.skip_current.store(true, Ordering::SeqCst);
            }
        }

        let purged = self.probe_queue.retain(|t| !matches(&t.path)).await;
        if purged > 0 {
            self.counters.add_work_correction(purged as u64);
        }
        tracing::debug!(prefix, purged, "subtree skipped");
        purged
    }

    pub(crate) async fn begin_dir(&self, path: &str) {
        *self.currently_processing.lock().await = path.to_string();
        self.skip_current.store(false, Ordering::SeqCst);
    }

    pub(crate) fn skip_requested(&self) -> bool {
        self.skip_current.load(Ordering::SeqCst)
    }

    /// HEAD/GET auto mode: on when the server is known to answer HEAD.
    pub fn set_auto(&self, auto: bool) {
        self.auto_head.store(auto, Ordering::SeqCst);
    }

    pub fn auto(&self) -> bool {
        self.auto_head.load(Ordering::SeqCst)
    }

    /// Takes the next probe; the in-flight count is bumped under the queue
    /// lock so completion detection never observes a probe in neither place.
    pub async fn take_probe(&self) -> ProbeTarget {
        self.probe_queue
            .take_and(|_| {
                self.inflight_probes.fetch_add(1, Ordering::SeqCst);
            })
            .await
    }

    pub(crate) fn probe_finished(&self) {
        self.inflight_probes.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn inflight(&self) -> usize {
        self.inflight_probes.load(Ordering::SeqCst)
    }

    pub(crate) fn set_expansion_done(&self) {
        self.expansion_done.store(true, Ordering::SeqCst);
    }

    pub fn expansion_done(&self) -> bool {
        self.expansion_done.load(Ordering::SeqCst)
    }

    /// All queued and in-flight work is finished and no more can appear.
    pub async fn drained(&self) -> bool {
        self.expansion_done()
            && self.inflight() == 0
            && self.probe_queue.is_empty().await
            && self.dir_queue.is_empty().await
    }

    pub async fn take_results(&self) -> Vec<DiscoveryResult> {
        std::mem::take(&mut *self.results.lock().await)
    }

    pub async fn results_len(&self) -> usize {
        self.results.lock().await.len()
    }

    /// Post-run teardown: queues drained and counters cleared so state can
    /// host a fresh run.
    pub async fn reset(&self) {
        self.probe_queue.clear().await;
        self.dir_queue.clear().await;
        self.backlog_seen.lock().await.clear();
        self.processed_links.lock().await.clear();
        self.counters.reset();
        self.skip_current.store(false, Ordering::SeqCst);
        *self.currently_processing.lock().await = String::new();
    }
}
