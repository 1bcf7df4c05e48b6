//! Periodic telemetry polling.
//!
//! Every `interval`, for every worker in the ledger:
//! 1. query CPU over the trailing `cpu_window` and store the average;
//! 2. fetch the worker's stats samples and feed unseen ones to the
//!    estimator.
//!
//! Workers are polled concurrently, so one unreachable worker costs a
//! round at most one query timeout. A worker that fails to answer keeps
//! its previous CPU reading. Samples are deduplicated per worker against
//! a timestamp watermark; samples sharing the watermark timestamp are
//! told apart by uri, duration and body size.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn};

use spillway_core::{Worker, WorkerId, WorkerMetric};
use spillway_estimator::CostEstimator;
use spillway_ledger::JobLedger;

use crate::board::MetricsBoard;
use crate::source::{CpuSource, StatsSource, average_utilization};

/// Outcome of one polling round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub cpu_updated: usize,
    pub cpu_failed: usize,
    pub samples_ingested: usize,
}

type SampleKey = (String, u64, u64);

fn sample_key(sample: &WorkerMetric) -> SampleKey {
    (sample.uri.clone(), sample.duration, sample.body_size)
}

/// Newest ingested timestamp and the samples already seen at it.
#[derive(Debug, Default)]
struct Watermark {
    ts: u64,
    at_ts: HashSet<SampleKey>,
}

impl Watermark {
    fn is_new(&self, sample: &WorkerMetric) -> bool {
        sample.ts > self.ts || (sample.ts == self.ts && !self.at_ts.contains(&sample_key(sample)))
    }

    fn advance(&mut self, sample: &WorkerMetric) {
        if sample.ts > self.ts {
            self.ts = sample.ts;
            self.at_ts.clear();
        }
        if sample.ts == self.ts {
            self.at_ts.insert(sample_key(sample));
        }
    }
}

/// Result of polling one worker.
#[derive(Debug, Clone, Copy)]
struct WorkerPoll {
    cpu_ok: bool,
    ingested: usize,
}

pub struct InstanceMonitor {
    ledger: Arc<JobLedger>,
    board: Arc<MetricsBoard>,
    cpu: Arc<dyn CpuSource>,
    stats: Option<Arc<dyn StatsSource>>,
    estimator: Arc<dyn CostEstimator>,
    cpu_window: Duration,
    interval: Duration,
    watermarks: Mutex<HashMap<WorkerId, Watermark>>,
}

impl InstanceMonitor {
    pub fn new(
        ledger: Arc<JobLedger>,
        board: Arc<MetricsBoard>,
        cpu: Arc<dyn CpuSource>,
        estimator: Arc<dyn CostEstimator>,
        cpu_window: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            ledger,
            board,
            cpu,
            stats: None,
            estimator,
            cpu_window,
            interval,
            watermarks: Mutex::new(HashMap::new()),
        }
    }

    /// Also poll workers for cost samples.
    pub fn with_stats(mut self, stats: Arc<dyn StatsSource>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn board(&self) -> &Arc<MetricsBoard> {
        &self.board
    }

    /// Poll every registered worker once.
    pub async fn poll_once(&self) -> PollSummary {
        let workers = self.ledger.workers();
        let live: Vec<WorkerId> = workers.iter().map(|w| w.id.clone()).collect();
        self.board.retain(&live);
        self.watermarks
            .lock()
            .expect("watermark lock")
            .retain(|id, _| live.contains(id));

        let polls = join_all(workers.iter().map(|worker| self.poll_worker(worker))).await;

        let mut summary = PollSummary::default();
        for poll in polls {
            if poll.cpu_ok {
                summary.cpu_updated += 1;
            } else {
                summary.cpu_failed += 1;
            }
            summary.samples_ingested += poll.ingested;
        }
        summary
    }

    async fn poll_worker(&self, worker: &Worker) -> WorkerPoll {
        let cpu = async {
            match self.cpu.datapoints(worker, self.cpu_window).await {
                Ok(points) => {
                    let percent = average_utilization(&points);
                    self.board.set_cpu(&worker.id, percent);
                    debug!(worker = %worker.id, cpu = percent, points = points.len(), "cpu updated");
                    true
                }
                Err(e) => {
                    warn!(worker = %worker.id, error = %e, "cpu query failed");
                    false
                }
            }
        };
        let stats = async {
            match &self.stats {
                Some(stats) => self.ingest_stats(stats.as_ref(), worker).await,
                None => 0,
            }
        };

        let (cpu_ok, ingested) = tokio::join!(cpu, stats);
        WorkerPoll { cpu_ok, ingested }
    }

    async fn ingest_stats(&self, stats: &dyn StatsSource, worker: &Worker) -> usize {
        let samples = match stats.fetch(worker).await {
            Ok(samples) => samples,
            Err(e) => {
                warn!(worker = %worker.id, error = %e, "stats query failed");
                return 0;
            }
        };

        let fresh: Vec<&WorkerMetric> = {
            let mut watermarks = self.watermarks.lock().expect("watermark lock");
            let watermark = watermarks.entry(worker.id.clone()).or_default();
            let fresh: Vec<&WorkerMetric> = samples.iter().filter(|s| watermark.is_new(s)).collect();
            for sample in &fresh {
                watermark.advance(sample);
            }
            fresh
        };

        for sample in &fresh {
            self.estimator.ingest(sample);
        }
        if !fresh.is_empty() {
            debug!(worker = %worker.id, ingested = fresh.len(), "stats samples ingested");
        }
        fresh.len()
    }

    /// Poll until the shutdown signal fires.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            window_secs = self.cpu_window.as_secs(),
            "instance monitor started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    let summary = self.poll_once().await;
                    debug!(?summary, "monitor round complete");
                }
                _ = shutdown.changed() => {
                    info!("instance monitor shutting down");
                    break;
                }
            }
        }
    }
}
