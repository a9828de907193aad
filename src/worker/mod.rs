use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::basecase::{BaseCase, BaseMode};
use crate::dispatcher::{Dispatcher, ProbeTarget, RunCounters, Switch};
use crate::normalizer::clean_response;
use crate::transport::{ProbeMethod, ProbeResponse, Transport};

const THROTTLE_POLL: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    NotFound,
    Found { low_confidence: bool },
}

impl Verdict {
    pub fn is_found(&self) -> bool {
        matches!(self, Verdict::Found { .. })
    }
}

/// Pure classification of one response against a base case. Same inputs,
/// same verdict.
pub fn classify(base: &BaseCase, status: u16, body: &str, item: &str) -> Verdict {
    match &base.mode {
        BaseMode::Content { body: miss } | BaseMode::Heuristic { body: miss } => {
            let low_confidence = base.low_confidence();
            match status {
                200 => {
                    if clean_response(body, item) == *miss {
                        Verdict::NotFound
                    } else {
                        Verdict::Found { low_confidence }
                    }
                }
                404 | 400 => Verdict::NotFound,
                _ => Verdict::Found { low_confidence },
            }
        }
        BaseMode::Regex { pattern } => {
            if pattern.is_match(body) {
                Verdict::NotFound
            } else {
                Verdict::Found {
                    low_confidence: false,
                }
            }
        }
        BaseMode::StatusOnly => {
            if status == base.fail_status || status == 404 || status == 502 {
                Verdict::NotFound
            } else {
                Verdict::Found {
                    low_confidence: false,
                }
            }
        }
    }
}

/// True when the running average request rate exceeds the limit. The
/// throttle is feedback-based: workers poll this and sleep until the
/// average drifts back under the cap.
pub fn over_limit(total_done: u64, elapsed_secs: f64, limit: u32) -> bool {
    elapsed_secs > 0.0 && total_done as f64 / elapsed_secs > f64::from(limit)
}

async fn throttle(counters: &RunCounters, started: Instant, limit: u32) {
    while over_limit(counters.total_done(), started.elapsed().as_secs_f64(), limit) {
        tokio::time::sleep(THROTTLE_POLL).await;
    }
}

#[derive(Clone)]
pub struct WorkerContext {
    pub dispatcher: Arc<Dispatcher>,
    pub transport: Arc<dyn Transport>,
    pub rate_limit: Option<u32>,
    pub started: Instant,
}

struct ProbeGuard<'a>(&'a Dispatcher);

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.0.probe_finished();
    }
}

pub async fn run_worker(id: usize, ctx: WorkerContext, my_stop: Arc<Switch>) {
    tracing::debug!(id, "worker started");
    let dispatcher = &ctx.dispatcher;
    loop {
        if dispatcher.stop.is_on() || my_stop.is_on() {
            break;
        }
        dispatcher.pause.wait_off().await;

        let probe = tokio::select! {
            probe = dispatcher.take_probe() => probe,
            _ = dispatcher.stop.wait_on() => break,
            _ = my_stop.wait_on() => break,
        };
        let _guard = ProbeGuard(dispatcher);

        if let Some(limit) = ctx.rate_limit {
            throttle(&dispatcher.counters, ctx.started, limit).await;
        }

        process_probe(&ctx, probe).await;
        dispatcher.counters.probe_done();
    }
    tracing::debug!(id, "worker stopped");
}

async fn process_probe(ctx: &WorkerContext, probe: ProbeTarget) {
    let dispatcher = &ctx.dispatcher;

    let response = match ctx.transport.send(probe.method, &probe.url).await {
        Ok(response) => response,
        Err(err) => {
            dispatcher.found_error(&probe.path, &err.to_string()).await;
            return;
        }
    };
    tracing::trace!(url = %probe.url, exchange = %response.raw(), "probe response");

    let verdict = classify(&probe.base, response.status, &response.body, &probe.item);
    let Verdict::Found { low_confidence } = verdict else {
        return;
    };

    let status = response.status;
    let body_response = if probe.method == ProbeMethod::Head {
        escalate_to_get(ctx, &probe, status).await
    } else {
        Some(response)
    };

    if let Some(found) = &body_response {
        if found.is_textual() && !found.body.is_empty() && !probe.base.use_regex() {
            dispatcher
                .enqueue_parse(found.body.clone(), &probe.path)
                .await;
        }
    }

    if probe.is_dir {
        dispatcher
            .found_dir(&probe.path, status, low_confidence)
            .await;
    } else {
        dispatcher
            .found_file(&probe.path, status, low_confidence)
            .await;
    }
}

/// A found HEAD probe is refetched with GET so the body can feed the parse
/// queue. A status disagreement is reported as an error but the finding
/// stands, keyed on the HEAD status.
async fn escalate_to_get(
    ctx: &WorkerContext,
    probe: &ProbeTarget,
    head_status: u16,
) -> Option<ProbeResponse> {
    match ctx.transport.send(ProbeMethod::Get, &probe.url).await {
        Ok(get_response) => {
            if get_response.status != head_status {
                ctx.dispatcher
                    .found_error(
                        &probe.path,
                        &format!(
                            "HEAD returned {} but GET returned {}",
                            head_status, get_response.status
                        ),
                    )
                    .await;
            }
            Some(get_response)
        }
        Err(err) => {
            ctx.dispatcher
                .found_error(&probe.path, &format!("GET after HEAD failed: {err}"))
                .await;
            None
        }
    }
}

struct WorkerHandle {
    id: usize,
    stop: Arc<Switch>,
    handle: JoinHandle<()>,
}

/// The resizable worker pool. Workers can be added or retired while a scan
/// runs; retirement is cooperative, a retired worker finishes its current
/// probe first.
pub struct WorkerPool {
    ctx: WorkerContext,
    workers: Mutex<Vec<WorkerHandle>>,
    next_id: AtomicUsize,
}

impl WorkerPool {
    pub fn new(ctx: WorkerContext) -> Self {
        Self {
            ctx,
            workers: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }

    pub async fn add_workers(&self, count: usize) {
        let mut workers = self.workers.lock().await;
        for _ in 0..count {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let stop = Arc::new(Switch::new(false));
            let handle = tokio::spawn(run_worker(id, self.ctx.clone(), stop.clone()));
            workers.push(WorkerHandle { id, stop, handle });
        }
        tracing::debug!(count, total = workers.len(), "workers added");
    }

    /// Retires up to `count` workers, always leaving at least one.
    pub async fn remove_workers(&self, count: usize) {
        let mut workers = self.workers.lock().await;
        let removable = workers.len().saturating_sub(1).min(count);
        for _ in 0..removable {
            if let Some(worker) = workers.pop() {
                worker.stop.set(true);
                tracing::debug!(id = worker.id, "worker retired");
                drop(worker.handle);
            }
        }
    }

    pub async fn size(&self) -> usize {
        self.workers.lock().await.len()
    }

    pub async fn shutdown(&self) {
        let mut workers = self.workers.lock().await;
        for worker in workers.iter() {
            worker.stop.set(true);
        }
        for worker in workers.drain(..) {
            let _ = worker.handle.await;
        }
    }
}
