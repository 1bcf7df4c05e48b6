//! Worker load scoring.
//!
//! A worker's score estimates how long the incoming request would wait
//! and run there, in milliseconds-equivalent units:
//! - **In-flight**: fixed overhead per job already running on the worker
//! - **Cost**: estimated work already queued plus the incoming request
//! - **CPU**: penalty proportional to reported utilization (0–100)
//!
//! Lower is better.

use std::cmp::Ordering;
use std::collections::HashMap;

use spillway_core::{InstanceMetrics, Worker, WorkerId};
use spillway_ledger::LedgerSnapshot;

/// Weights for the scoring components.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ScoringWeights {
    /// Score per in-flight job.
    pub in_flight: f64,
    /// Multiplier on pending plus incoming estimated cost (ms).
    pub cost: f64,
    /// Score per CPU percentage point.
    pub cpu: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            in_flight: 100.0,
            cost: 1.0,
            cpu: 50.0,
        }
    }
}

/// Scored candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerScore {
    pub worker_id: WorkerId,
    pub score: f64,
    pub in_flight: usize,
    pub cpu_percent: f64,
}

impl WorkerScore {
    /// Ordering used for selection: score, then fewer in-flight jobs, then id.
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        self.score
            .partial_cmp(&other.score)
            .unwrap_or(Ordering::Equal)
            .then(self.in_flight.cmp(&other.in_flight))
            .then_with(|| self.worker_id.cmp(&other.worker_id))
    }
}

/// Score a single worker for a request of the given estimated cost.
///
/// Returns `None` if the worker is missing from the ledger snapshot or is
/// draining. Missing CPU metrics count as an idle CPU.
pub fn score_worker(
    worker: &Worker,
    estimated_cost_ms: f64,
    ledger: &LedgerSnapshot,
    metrics: &HashMap<WorkerId, InstanceMetrics>,
    weights: &ScoringWeights,
) -> Option<WorkerScore> {
    let load = ledger.get(&worker.id)?;
    if load.draining {
        return None;
    }

    let cpu_percent = metrics
        .get(&worker.id)
        .map(|m| m.cpu_percent.clamp(0.0, 100.0))
        .unwrap_or(0.0);

    let score = weights.in_flight * load.in_flight as f64
        + weights.cost * (load.pending_cost_ms + estimated_cost_ms.max(0.0))
        + weights.cpu * cpu_percent;

    Some(WorkerScore {
        worker_id: worker.id.clone(),
        score,
        in_flight: load.in_flight,
        cpu_percent,
    })
}

/// Score all workers and return them best first.
pub fn rank_workers(
    workers: &[Worker],
    estimated_cost_ms: f64,
    ledger: &LedgerSnapshot,
    metrics: &HashMap<WorkerId, InstanceMetrics>,
    weights: &ScoringWeights,
) -> Vec<WorkerScore> {
    let mut scores: Vec<WorkerScore> = workers
        .iter()
        .filter_map(|w| score_worker(w, estimated_cost_ms, ledger, metrics, weights))
        .collect();
    scores.sort_by(WorkerScore::rank_cmp);
    scores
}

#[cfg(test)]
mod tests {
    use super::*;
    use spillway_ledger::JobLedger;

    fn setup(loads: &[(&str, usize, f64)]) -> (Vec<Worker>, LedgerSnapshot) {
        let ledger = JobLedger::new();
        for (id, jobs, cost) in loads {
            ledger.register(Worker::new(*id, "10.0.0.1", 8000)).unwrap();
            for _ in 0..*jobs {
                ledger.admit(id, *cost).unwrap();
            }
        }
        (ledger.workers(), ledger.snapshot())
    }

    fn cpu(entries: &[(&str, f64)]) -> HashMap<WorkerId, InstanceMetrics> {
        entries
            .iter()
            .map(|(id, c)| {
                (
                    id.to_string(),
                    InstanceMetrics {
                        cpu_percent: *c,
                        ..Default::default()
                    },
                )
            })
            .collect()
    }

    #[test]
    fn score_combines_components() {
        let (workers, snap) = setup(&[("w1", 2, 300.0)]);
        let weights = ScoringWeights {
            in_flight: 10.0,
            cost: 1.0,
            cpu: 2.0,
        };
        let s = score_worker(&workers[0], 100.0, &snap, &cpu(&[("w1", 50.0)]), &weights).unwrap();
        // 2 jobs * 10 + (600 + 100) * 1 + 50 * 2
        assert_eq!(s.score, 820.0);
        assert_eq!(s.in_flight, 2);
    }

    #[test]
    fn missing_cpu_counts_as_idle() {
        let (workers, snap) = setup(&[("w1", 0, 0.0)]);
        let s = score_worker(&workers[0], 10.0, &snap, &HashMap::new(), &ScoringWeights::default())
            .unwrap();
        assert_eq!(s.cpu_percent, 0.0);
        assert_eq!(s.score, 10.0);
    }

    #[test]
    fn cpu_is_clamped() {
        let (workers, snap) = setup(&[("w1", 0, 0.0)]);
        let s = score_worker(
            &workers[0],
            0.0,
            &snap,
            &cpu(&[("w1", 250.0)]),
            &ScoringWeights::default(),
        )
        .unwrap();
        assert_eq!(s.cpu_percent, 100.0);
    }

    #[test]
    fn skips_workers_outside_snapshot() {
        let (_, snap) = setup(&[("w1", 0, 0.0)]);
        let stranger = Worker::new("w9", "10.0.0.9", 8000);
        assert!(score_worker(&stranger, 1.0, &snap, &HashMap::new(), &ScoringWeights::default()).is_none());
    }

    #[test]
    fn rank_orders_best_first() {
        let (workers, snap) = setup(&[("w1", 3, 100.0), ("w2", 0, 0.0), ("w3", 1, 100.0)]);
        let ranked = rank_workers(&workers, 50.0, &snap, &HashMap::new(), &ScoringWeights::default());
        let ids: Vec<&str> = ranked.iter().map(|s| s.worker_id.as_str()).collect();
        assert_eq!(ids, vec!["w2", "w3", "w1"]);
    }

    #[test]
    fn ties_prefer_fewer_jobs_then_lowest_id() {
        // Zero weights: every score ties.
        let (workers, snap) = setup(&[("w3", 0, 0.0), ("w2", 0, 0.0), ("w1", 1, 0.0)]);
        let weights = ScoringWeights {
            in_flight: 0.0,
            cost: 0.0,
            cpu: 0.0,
        };
        let ranked = rank_workers(&workers, 10.0, &snap, &HashMap::new(), &weights);
        let ids: Vec<&str> = ranked.iter().map(|s| s.worker_id.as_str()).collect();
        assert_eq!(ids, vec!["w2", "w3", "w1"]);
    }
}
