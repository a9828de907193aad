use std::sync::Arc;
use std::time::Duration;

use crate::basecase::BaseCaseOracle;
use crate::generator::{sanitize_item, FuzzMarkers, PathGenerator};
use crate::transport::ProbeMethod;

use super::{DirToCheck, Dispatcher, ProbeTarget};

const IDLE_POLL: Duration = Duration::from_millis(250);

pub struct ExpansionContext {
    pub dispatcher: Arc<Dispatcher>,
    pub oracle: Arc<BaseCaseOracle>,
    pub generator: Arc<dyn PathGenerator>,
    /// When set, the run is a URL-fuzz pass: candidates are substituted into
    /// the template instead of appended to directories.
    pub fuzz: Option<FuzzMarkers>,
}

/// Drains the directory backlog, deriving a base case per scope and pushing
/// one probe per candidate. Exits when the whole pipeline is drained or the
/// run is stopped.
pub async fn run_expansion(ctx: ExpansionContext) {
    let dispatcher = ctx.dispatcher.clone();
    let mut first_pass = true;

    loop {
        if dispatcher.stop.is_on() {
            break;
        }
        dispatcher.pause.wait_off().await;

        let entry = match tokio::time::timeout(IDLE_POLL, dispatcher.dir_queue.take()).await {
            Ok(entry) => entry,
            Err(_) => {
                // order matters: discoveries land in the backlog before the
                // probes that produced them leave the in-flight count
                if dispatcher.dir_queue.is_empty().await
                    && dispatcher.probe_queue.is_empty().await
                    && dispatcher.inflight() == 0
                {
                    break;
                }
                continue;
            }
        };

        expand_dir(&ctx, entry, first_pass).await;
        first_pass = false;
    }

    dispatcher.set_expansion_done();
    tracing::debug!("expansion finished");
}

async fn expand_dir(ctx: &ExpansionContext, entry: DirToCheck, first_pass: bool) {
    let dispatcher = &ctx.dispatcher;
    dispatcher.begin_dir(&entry.path).await;
    tracing::debug!(dir = entry.path.as_str(), "expanding");

    if let Some(markers) = &ctx.fuzz {
        expand_fuzz(ctx, markers).await;
        return;
    }

    if dispatcher.settings.do_dirs {
        expand_dir_pass(ctx, &entry, first_pass).await;
    }
    if dispatcher.settings.do_files {
        for ext in entry.exts.iter().filter(|e| e.check) {
            if dispatcher.stop.is_on() || dispatcher.skip_requested() {
                break;
            }
            expand_file_pass(ctx, &entry, &ext.suffix()).await;
        }
    }
}

async fn expand_dir_pass(ctx: &ExpansionContext, entry: &DirToCheck, first_pass: bool) {
    let dispatcher = &ctx.dispatcher;
    let base = match ctx.oracle.for_dirs(&entry.path).await {
        Ok(base) => base,
        Err(err) => {
            dispatcher
                .found_error(&entry.path, &format!("base case derivation failed: {err}"))
                .await;
            dispatcher
                .counters
                .add_work_correction(ctx.generator.pass_size());
            return;
        }
    };

    // the very first pass also probes the start directory itself
    if first_pass {
        let target = ProbeTarget {
            url: format!("{}{}", dispatcher.settings.first_part, entry.path),
            path: entry.path.clone(),
            method: ProbeMethod::Get,
            is_dir: true,
            item: String::new(),
            base: base.clone(),
        };
        if !push_probe(dispatcher, target).await {
            return;
        }
    }

    let pass_size = ctx.generator.pass_size();
    let mut processed: u64 = 0;
    for raw in ctx.generator.candidates() {
        if dispatcher.stop.is_on() {
            return;
        }
        if dispatcher.skip_requested() {
            dispatcher
                .counters
                .add_work_correction(pass_size.saturating_sub(processed));
            return;
        }
        processed += 1;

        let item = sanitize_item(&raw);
        if item.is_empty() {
            continue;
        }
        let path = format!("{}{}/", entry.path, item);
        let target = ProbeTarget {
            url: format!("{}{}", dispatcher.settings.first_part, path),
            path,
            method: probe_method(dispatcher, &base),
            is_dir: true,
            item,
            base: base.clone(),
        };
        if !push_probe(dispatcher, target).await {
            return;
        }
    }
}

async fn expand_file_pass(ctx: &ExpansionContext, entry: &DirToCheck, ext: &str) {
    let dispatcher = &ctx.dispatcher;
    let base = match ctx.oracle.for_files(&entry.path, ext).await {
        Ok(base) => base,
        Err(err) => {
            dispatcher
                .found_error(&entry.path, &format!("base case derivation failed: {err}"))
                .await;
            dispatcher
                .counters
                .add_work_correction(ctx.generator.pass_size());
            return;
        }
    };

    let pass_size = ctx.generator.pass_size();
    let mut processed: u64 = 0;
    for raw in ctx.generator.candidates() {
        if dispatcher.stop.is_on() {
            return;
        }
        if dispatcher.skip_requested() {
            dispatcher
                .counters
                .add_work_correction(pass_size.saturating_sub(processed));
            return;
        }
        processed += 1;

        let item = sanitize_item(&raw);
        if item.is_empty() {
            continue;
        }
        let path = format!("{}{}{}", entry.path, item, ext);
        let target = ProbeTarget {
            url: format!("{}{}", dispatcher.settings.first_part, path),
            path,
            method: probe_method(dispatcher, &base),
            is_dir: false,
            item,
            base: base.clone(),
        };
        if !push_probe(dispatcher, target).await {
            return;
        }
    }
}

async fn expand_fuzz(ctx: &ExpansionContext, markers: &FuzzMarkers) {
    let dispatcher = &ctx.dispatcher;
    let probe_path = markers.apply(ctx.oracle.fail_case());
    let base = match ctx.oracle.for_fuzz(&probe_path).await {
        Ok(base) => base,
        Err(err) => {
            dispatcher
                .found_error(&probe_path, &format!("base case derivation failed: {err}"))
                .await;
            dispatcher
                .counters
                .add_work_correction(ctx.generator.pass_size());
            return;
        }
    };

    for raw in ctx.generator.candidates() {
        if dispatcher.stop.is_on() || dispatcher.skip_requested() {
            return;
        }
        let item = sanitize_item(&raw);
        if item.is_empty() {
            continue;
        }
        let path = markers.apply(&item);
        let target = ProbeTarget {
            url: format!("{}{}", dispatcher.settings.first_part, path),
            path,
            method: probe_method(dispatcher, &base),
            is_dir: false,
            item,
            base: base.clone(),
        };
        if !push_probe(dispatcher, target).await {
            return;
        }
    }
}

fn probe_method(dispatcher: &Dispatcher, base: &crate::basecase::BaseCase) -> ProbeMethod {
    // HEAD is only sound when status alone decides; body modes need GET
    if dispatcher.auto() && base.status_only() {
        ProbeMethod::Head
    } else {
        ProbeMethod::Get
    }
}

/// Pushes with backpressure; returns false when the run stopped while
/// waiting for queue space.
async fn push_probe(dispatcher: &Dispatcher, target: ProbeTarget) -> bool {
    tokio::select! {
        _ = dispatcher.probe_queue.push(target) => true,
        _ = dispatcher.stop.wait_on() => false,
    }
}
