//! Latest CPU reading per worker.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Instant;

use spillway_core::{InstanceMetrics, WorkerId};
use spillway_ledger::LedgerSnapshot;

#[derive(Debug, Clone, Copy)]
struct CpuReading {
    percent: f64,
    observed_at: Instant,
}

/// Most recent telemetry per worker. No history is kept.
pub struct MetricsBoard {
    cpu: RwLock<HashMap<WorkerId, CpuReading>>,
}

impl MetricsBoard {
    pub fn new() -> Self {
        Self {
            cpu: RwLock::new(HashMap::new()),
        }
    }

    /// Record a CPU reading, clamped to 0..=100.
    pub fn set_cpu(&self, worker_id: &str, percent: f64) {
        let percent = if percent.is_finite() {
            percent.clamp(0.0, 100.0)
        } else {
            0.0
        };
        self.cpu.write().expect("board lock").insert(
            worker_id.to_string(),
            CpuReading {
                percent,
                observed_at: Instant::now(),
            },
        );
    }

    pub fn cpu(&self, worker_id: &str) -> Option<f64> {
        self.cpu
            .read()
            .expect("board lock")
            .get(worker_id)
            .map(|r| r.percent)
    }

    /// Seconds since the last reading for a worker.
    pub fn age_secs(&self, worker_id: &str) -> Option<f64> {
        self.cpu
            .read()
            .expect("board lock")
            .get(worker_id)
            .map(|r| r.observed_at.elapsed().as_secs_f64())
    }

    pub fn remove(&self, worker_id: &str) {
        self.cpu.write().expect("board lock").remove(worker_id);
    }

    /// Drop readings for workers not in `live`.
    pub fn retain(&self, live: &[WorkerId]) {
        self.cpu
            .write()
            .expect("board lock")
            .retain(|id, _| live.contains(id));
    }

    /// Join CPU readings with ledger occupancy.
    ///
    /// Every worker in the snapshot gets an entry; a worker with no CPU
    /// reading yet reports 0%.
    pub fn instance_metrics(&self, ledger: &LedgerSnapshot) -> HashMap<WorkerId, InstanceMetrics> {
        let cpu = self.cpu.read().expect("board lock");
        ledger
            .loads
            .iter()
            .map(|(id, load)| {
                (
                    id.clone(),
                    InstanceMetrics {
                        cpu_percent: cpu.get(id).map(|r| r.percent).unwrap_or(0.0),
                        in_flight: load.in_flight,
                        pending_cost_ms: load.pending_cost_ms,
                    },
                )
            })
            .collect()
    }

    /// Whether a worker has reported at least once.
    pub fn has_reading(&self, worker_id: &str) -> bool {
        self.cpu.read().expect("board lock").contains_key(worker_id)
    }
}

impl Default for MetricsBoard {
    fn default() -> Self {
        Self::new()
    }
}
