//! Worker progress counters and the periodic progress reporter

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// One counter per worker; each worker only ever bumps its own
#[derive(Debug)]
pub struct WorkerProgress {
    counters: Vec<AtomicUsize>,
}

impl WorkerProgress {
    pub fn new(workers: usize) -> Self {
        Self {
            counters: (0..workers).map(|_| AtomicUsize::new(0)).collect(),
        }
    }

    /// Mark one more title done by `worker`
    pub fn record(&self, worker: usize) {
        if let Some(counter) = self.counters.get(worker) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Titles processed across all workers
    pub fn total(&self) -> usize {
        self.counters.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }

    pub fn per_worker(&self) -> Vec<usize> {
        self.counters
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect()
    }

    pub fn workers(&self) -> usize {
        self.counters.len()
    }
}

/// Background task logging aggregate progress at a fixed interval
///
/// Only reads the counters. Stopping it, or it dying, has no effect on
/// the workers.
pub struct ProgressReporter {
    token: CancellationToken,
    handle: JoinHandle<()>,
    stats: Arc<ReporterStats>,
}

/// What the reporter has emitted so far
#[derive(Debug, Default)]
pub struct ReporterStats {
    reports: AtomicU64,
    last_processed: AtomicUsize,
}

impl ReporterStats {
    /// Progress lines logged
    pub fn reports(&self) -> u64 {
        self.reports.load(Ordering::Relaxed)
    }

    /// Total carried by the most recent report
    pub fn last_processed(&self) -> usize {
        self.last_processed.load(Ordering::Relaxed)
    }

    fn record(&self, processed: usize) {
        self.last_processed.store(processed, Ordering::Relaxed);
        self.reports.fetch_add(1, Ordering::Relaxed);
    }
}

impl ProgressReporter {
    pub fn spawn(progress: Arc<WorkerProgress>, expected: usize, every: Duration) -> Self {
        let token = CancellationToken::new();
        let stop = token.clone();
        let every = every.max(Duration::from_millis(1));
        let stats = Arc::new(ReporterStats::default());
        let emitted = Arc::clone(&stats);

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let processed = progress.total();
                        emitted.record(processed);
                        info!(
                            processed,
                            total = expected,
                            workers = progress.workers(),
                            "progress"
                        );
                    }
                }
            }
        });

        Self {
            token,
            handle,
            stats,
        }
    }

    pub fn stats(&self) -> Arc<ReporterStats> {
        Arc::clone(&self.stats)
    }

    /// Stop reporting and wait for the task to exit
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "progress reporter ended abnormally");
        }
    }
}
