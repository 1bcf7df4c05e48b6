//! spillway-estimator: predicts how long a request will take.
//!
//! The dispatcher asks for an estimate once per request and feeds the
//! measured duration back after a successful worker response. Estimates
//! are hints: an unseen signature gets a configured default, never an
//! error.
//!
//! # Bucketing
//!
//! ```text
//! /blur?h=20&w=10   exact signature bucket   (tried first)
//! /blur             route bucket             (fallback)
//! default_cost_ms                            (last resort)
//! ```

pub mod online;

use std::time::Duration;

use spillway_core::{RequestFeatures, WorkerMetric};

pub use online::{BucketStats, OnlineEstimator};

/// Maps request features to a predicted cost in milliseconds.
pub trait CostEstimator: Send + Sync {
    /// Predicted cost in milliseconds. Must not fail or block on learning.
    fn estimate(&self, features: &RequestFeatures) -> f64;

    /// Record an observed duration for the given features.
    fn update(&self, features: &RequestFeatures, actual: Duration);

    /// Feed a sample reported by a worker's stats endpoint.
    fn ingest(&self, metric: &WorkerMetric) {
        self.update(&metric.features(), Duration::from_millis(metric.duration));
    }
}

/// Always returns the same estimate and learns nothing.
#[derive(Debug, Clone, Copy)]
pub struct FixedEstimator {
    cost_ms: f64,
}

impl FixedEstimator {
    pub fn new(cost_ms: f64) -> Self {
        Self { cost_ms }
    }
}

impl CostEstimator for FixedEstimator {
    fn estimate(&self, _features: &RequestFeatures) -> f64 {
        self.cost_ms
    }

    fn update(&self, _features: &RequestFeatures, _actual: Duration) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_estimator_ignores_updates() {
        let est = FixedEstimator::new(42.0);
        let f = RequestFeatures::from_path_and_query("/foo?x=1");
        est.update(&f, Duration::from_secs(10));
        assert_eq!(est.estimate(&f), 42.0);
    }
}
