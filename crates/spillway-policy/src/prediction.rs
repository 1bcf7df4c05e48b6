//! Prediction-based balancing.
//!
//! Ranks candidates by load score (see `scorer`) and picks the lowest.
//! Workers whose score reaches the saturation threshold are not
//! candidates; if none remain the request overflows.

use std::collections::HashMap;

use tracing::trace;

use spillway_core::{InstanceMetrics, RequestFeatures, Worker, WorkerId};
use spillway_ledger::LedgerSnapshot;

use crate::BalancingPolicy;
use crate::scorer::{ScoringWeights, rank_workers};

pub struct PredictionBalancing {
    weights: ScoringWeights,
    saturation_threshold: f64,
}

impl PredictionBalancing {
    pub fn new(weights: ScoringWeights, saturation_threshold: f64) -> Self {
        Self {
            weights,
            saturation_threshold,
        }
    }

    pub fn saturation_threshold(&self) -> f64 {
        self.saturation_threshold
    }
}

impl BalancingPolicy for PredictionBalancing {
    fn choose(
        &self,
        features: &RequestFeatures,
        estimated_cost_ms: f64,
        workers: &[Worker],
        ledger: &LedgerSnapshot,
        metrics: &HashMap<WorkerId, InstanceMetrics>,
    ) -> Option<WorkerId> {
        let ranked = rank_workers(workers, estimated_cost_ms, ledger, metrics, &self.weights);
        let best = ranked
            .into_iter()
            .find(|s| s.score < self.saturation_threshold);

        match &best {
            Some(s) => trace!(
                route = %features.route,
                worker = %s.worker_id,
                score = s.score,
                "worker chosen"
            ),
            None => trace!(
                route = %features.route,
                candidates = workers.len(),
                "no unsaturated worker"
            ),
        }
        best.map(|s| s.worker_id)
    }

    fn name(&self) -> &'static str {
        "prediction"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spillway_ledger::JobLedger;

    fn ledger_with(ids: &[&str]) -> JobLedger {
        let ledger = JobLedger::new();
        for id in ids {
            ledger.register(Worker::new(*id, "10.0.0.1", 8000)).unwrap();
        }
        ledger
    }

    fn cost_only(threshold: f64) -> PredictionBalancing {
        PredictionBalancing::new(
            ScoringWeights {
                in_flight: 0.0,
                cost: 1.0,
                cpu: 0.0,
            },
            threshold,
        )
    }

    fn req() -> RequestFeatures {
        RequestFeatures::from_path_and_query("/foo?x=1")
    }

    #[test]
    fn picks_least_loaded_worker() {
        let ledger = ledger_with(&["w1", "w2"]);
        ledger.admit("w1", 500.0).unwrap();
        let policy = cost_only(10_000.0);

        let chosen = policy.choose(
            &req(),
            100.0,
            &ledger.eligible_workers(),
            &ledger.snapshot(),
            &HashMap::new(),
        );
        assert_eq!(chosen.as_deref(), Some("w2"));
    }

    #[test]
    fn cpu_steers_away_from_hot_worker() {
        let ledger = ledger_with(&["w1", "w2"]);
        let policy = PredictionBalancing::new(ScoringWeights::default(), 30_000.0);
        let metrics = HashMap::from([
            (
                "w1".to_string(),
                InstanceMetrics {
                    cpu_percent: 95.0,
                    ..Default::default()
                },
            ),
            (
                "w2".to_string(),
                InstanceMetrics {
                    cpu_percent: 10.0,
                    ..Default::default()
                },
            ),
        ]);

        let chosen = policy.choose(
            &req(),
            100.0,
            &ledger.eligible_workers(),
            &ledger.snapshot(),
            &metrics,
        );
        assert_eq!(chosen.as_deref(), Some("w2"));
    }

    #[test]
    fn empty_worker_set_overflows() {
        let ledger = JobLedger::new();
        let policy = cost_only(10_000.0);
        assert_eq!(
            policy.choose(&req(), 1.0, &[], &ledger.snapshot(), &HashMap::new()),
            None
        );
    }

    #[test]
    fn saturated_fleet_overflows() {
        let ledger = ledger_with(&["w1", "w2", "w3"]);
        let threshold = 1_000.0;
        // Every worker already carries exactly the threshold in pending cost.
        for id in ["w1", "w2", "w3"] {
            ledger.admit(id, threshold).unwrap();
        }
        let policy = cost_only(threshold);

        assert_eq!(
            policy.choose(
                &req(),
                0.0,
                &ledger.eligible_workers(),
                &ledger.snapshot(),
                &HashMap::new()
            ),
            None
        );
    }

    #[test]
    fn skips_only_saturated_workers() {
        let ledger = ledger_with(&["w1", "w2"]);
        ledger.admit("w1", 2_000.0).unwrap();
        ledger.admit("w2", 800.0).unwrap();
        let policy = cost_only(1_000.0);

        let chosen = policy.choose(
            &req(),
            100.0,
            &ledger.eligible_workers(),
            &ledger.snapshot(),
            &HashMap::new(),
        );
        assert_eq!(chosen.as_deref(), Some("w2"));
    }

    #[test]
    fn equal_scores_break_ties_deterministically() {
        let ledger = ledger_with(&["w3", "w1", "w2"]);
        let policy = cost_only(10_000.0);

        for _ in 0..10 {
            let chosen = policy.choose(
                &req(),
                10.0,
                &ledger.eligible_workers(),
                &ledger.snapshot(),
                &HashMap::new(),
            );
            assert_eq!(chosen.as_deref(), Some("w1"));
        }
    }

    #[test]
    fn equal_scores_prefer_fewer_jobs() {
        let ledger = ledger_with(&["w1", "w2"]);
        // Zero-cost job: same score as idle w2, but one more job in flight.
        ledger.admit("w1", 0.0).unwrap();
        let policy = cost_only(10_000.0);

        let chosen = policy.choose(
            &req(),
            10.0,
            &ledger.eligible_workers(),
            &ledger.snapshot(),
            &HashMap::new(),
        );
        assert_eq!(chosen.as_deref(), Some("w2"));
    }

    #[test]
    fn draining_worker_is_never_chosen() {
        let ledger = ledger_with(&["w1", "w2"]);
        ledger.admit("w2", 5_000.0).unwrap();
        ledger.begin_drain("w1").unwrap();
        let policy = cost_only(10_000.0);

        // Even if a caller passes the full worker list, w1 is skipped.
        let chosen = policy.choose(
            &req(),
            10.0,
            &ledger.workers(),
            &ledger.snapshot(),
            &HashMap::new(),
        );
        assert_eq!(chosen.as_deref(), Some("w2"));
    }
}
