use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;

use crate::dispatcher::{CounterSnapshot, Dispatcher};

/// Moving-average window, in ticks.
const RATE_WINDOW: usize = 10;

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct ProgressSnapshot {
    pub total_done: u64,
    pub estimated_total: u64,
    pub dirs_found: u64,
    pub base_cases: u64,
    pub work_correction: u64,
    /// Requests per second over the last tick.
    pub inst_rate: f64,
    /// Requests per second averaged over the last ten ticks.
    pub avg_rate: f64,
    pub eta_seconds: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct MonitorConfig {
    pub pass_size: u64,
    pub ext_count: u64,
    pub do_dirs: bool,
    pub do_files: bool,
    pub recursive: bool,
    pub tick: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            pass_size: 0,
            ext_count: 0,
            do_dirs: true,
            do_files: false,
            recursive: true,
            tick: Duration::from_secs(1),
        }
    }
}

/// The total grows as directories are found and shrinks by the correction
/// counter when work is purged, so the bar can move backwards.
pub fn estimate_total(counters: &CounterSnapshot, config: &MonitorConfig) -> u64 {
    let dirs = if config.recursive {
        1 + counters.dirs_found
    } else {
        1
    };
    let mut total = 0u64;
    if config.do_dirs {
        total += config.pass_size * dirs;
    }
    if config.do_files {
        total += config.pass_size * dirs * config.ext_count;
    }
    total += counters.base_cases + counters.parsed_links;
    total.saturating_sub(counters.work_correction)
}

pub async fn run_monitor(
    dispatcher: Arc<Dispatcher>,
    config: MonitorConfig,
    tx: watch::Sender<ProgressSnapshot>,
) {
    let tick_secs = config.tick.as_secs_f64();
    let mut window: VecDeque<u64> = VecDeque::with_capacity(RATE_WINDOW);
    let mut last_done = dispatcher.counters.total_done();

    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.tick) => {}
            _ = dispatcher.stop.wait_on() => break,
        }

        let counters = dispatcher.counters.snapshot();
        let delta = counters.total_done.saturating_sub(last_done);
        last_done = counters.total_done;
        if window.len() == RATE_WINDOW {
            window.pop_front();
        }
        window.push_back(delta);

        let inst_rate = delta as f64 / tick_secs;
        let avg_rate =
            window.iter().sum::<u64>() as f64 / (window.len() as f64 * tick_secs);

        let estimated_total = estimate_total(&counters, &config);
        let remaining = estimated_total.saturating_sub(counters.total_done);
        let eta_seconds = if avg_rate > 0.0 {
            Some((remaining as f64 / avg_rate).ceil() as u64)
        } else {
            None
        };

        let _ = tx.send(ProgressSnapshot {
            total_done: counters.total_done,
            estimated_total,
            dirs_found: counters.dirs_found,
            base_cases: counters.base_cases,
            work_correction: counters.work_correction,
            inst_rate,
            avg_rate,
            eta_seconds,
        });
    }
}
