//! spillway-policy: decides where a request runs.
//!
//! A policy is a pure function of the request's estimated cost, the
//! candidate workers, the ledger snapshot and the latest instance
//! metrics. It never blocks and never performs I/O. Returning `None`
//! sends the request to serverless overflow.
//!
//! # Components
//!
//! - **`scorer`**: Worker load scoring with configurable weights
//! - **`prediction`**: Minimum-score selection with a saturation cutoff
//! - **`OverflowOnly`**: Always overflow; exercises the overflow path

pub mod prediction;
pub mod scorer;

use std::collections::HashMap;
use std::sync::Arc;

use spillway_core::config::{PolicyConfig, PolicyKind};
use spillway_core::{InstanceMetrics, RequestFeatures, Worker, WorkerId};
use spillway_ledger::LedgerSnapshot;

pub use prediction::PredictionBalancing;
pub use scorer::{ScoringWeights, WorkerScore, rank_workers, score_worker};

/// Pluggable routing strategy.
pub trait BalancingPolicy: Send + Sync {
    /// Pick a worker for the request, or `None` for overflow.
    fn choose(
        &self,
        features: &RequestFeatures,
        estimated_cost_ms: f64,
        workers: &[Worker],
        ledger: &LedgerSnapshot,
        metrics: &HashMap<WorkerId, InstanceMetrics>,
    ) -> Option<WorkerId>;

    /// Short name for logs and the admin API.
    fn name(&self) -> &'static str;
}

/// Routes every request to overflow, whatever the workers look like.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverflowOnly;

impl BalancingPolicy for OverflowOnly {
    fn choose(
        &self,
        _features: &RequestFeatures,
        _estimated_cost_ms: f64,
        _workers: &[Worker],
        _ledger: &LedgerSnapshot,
        _metrics: &HashMap<WorkerId, InstanceMetrics>,
    ) -> Option<WorkerId> {
        None
    }

    fn name(&self) -> &'static str {
        "overflow_only"
    }
}

/// Build the policy selected in config.
pub fn from_config(config: &PolicyConfig) -> Arc<dyn BalancingPolicy> {
    match config.kind {
        PolicyKind::Prediction => Arc::new(PredictionBalancing::new(
            ScoringWeights {
                in_flight: config.in_flight_weight,
                cost: config.cost_weight,
                cpu: config.cpu_weight,
            },
            config.saturation_threshold,
        )),
        PolicyKind::OverflowOnly => Arc::new(OverflowOnly),
    }
}
