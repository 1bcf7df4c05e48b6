//! Online estimator: running statistics per feature bucket.
//!
//! Buckets live in a read-mostly map. A bucket is created on its first
//! sample and never removed; each bucket has its own mutex, so updates
//! to different signatures never contend beyond the brief map lookup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::Serialize;
use tracing::trace;

use spillway_core::RequestFeatures;

use crate::CostEstimator;

/// Running statistic for one bucket.
///
/// A count-weighted mean until `window` samples have been seen, then an
/// exponentially weighted mean with `alpha = 1 / window` so old load
/// patterns fade out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BucketStats {
    pub samples: u64,
    pub mean_ms: f64,
}

impl BucketStats {
    fn record(&mut self, value_ms: f64, window: u64) {
        self.samples += 1;
        let weight = self.samples.min(window) as f64;
        self.mean_ms += (value_ms - self.mean_ms) / weight;
    }
}

type Bucket = Arc<Mutex<BucketStats>>;

/// Learns per-signature costs from observed durations.
pub struct OnlineEstimator {
    /// Exact signature (`route?sorted-params`) → stats.
    exact: RwLock<HashMap<String, Bucket>>,
    /// Route only → stats.
    routes: RwLock<HashMap<String, Bucket>>,
    default_cost_ms: f64,
    window: u64,
}

impl OnlineEstimator {
    pub fn new(default_cost_ms: f64, window: u64) -> Self {
        Self {
            exact: RwLock::new(HashMap::new()),
            routes: RwLock::new(HashMap::new()),
            default_cost_ms,
            window: window.max(1),
        }
    }

    /// Stats for an exact signature, if any sample has been seen.
    pub fn stats(&self, features: &RequestFeatures) -> Option<BucketStats> {
        lookup(&self.exact, &features.signature())
    }

    /// Number of distinct exact signatures learned so far.
    pub fn bucket_count(&self) -> usize {
        self.exact.read().expect("estimator lock").len()
    }

    /// All exact buckets, sorted by signature.
    pub fn buckets(&self) -> Vec<(String, BucketStats)> {
        let map = self.exact.read().expect("estimator lock");
        let mut out: Vec<(String, BucketStats)> = map
            .iter()
            .map(|(k, b)| (k.clone(), *b.lock().expect("bucket lock")))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    fn record(&self, features: &RequestFeatures, value_ms: f64) {
        if !value_ms.is_finite() || value_ms < 0.0 {
            return;
        }
        let signature = features.signature();
        record_into(&self.exact, &signature, value_ms, self.window);
        record_into(&self.routes, &features.route, value_ms, self.window);
        trace!(%signature, value_ms, "estimator updated");
    }
}

impl CostEstimator for OnlineEstimator {
    fn estimate(&self, features: &RequestFeatures) -> f64 {
        if let Some(stats) = lookup(&self.exact, &features.signature()) {
            return stats.mean_ms;
        }
        if let Some(stats) = lookup(&self.routes, &features.route) {
            return stats.mean_ms;
        }
        self.default_cost_ms
    }

    fn update(&self, features: &RequestFeatures, actual: Duration) {
        self.record(features, actual.as_secs_f64() * 1000.0);
    }
}

fn lookup(map: &RwLock<HashMap<String, Bucket>>, key: &str) -> Option<BucketStats> {
    let bucket = map.read().expect("estimator lock").get(key).cloned()?;
    let stats = *bucket.lock().expect("bucket lock");
    (stats.samples > 0).then_some(stats)
}

fn record_into(map: &RwLock<HashMap<String, Bucket>>, key: &str, value_ms: f64, window: u64) {
    let existing = map.read().expect("estimator lock").get(key).cloned();
    let bucket = match existing {
        Some(b) => b,
        None => map
            .write()
            .expect("estimator lock")
            .entry(key.to_string())
            .or_default()
            .clone(),
    };
    bucket.lock().expect("bucket lock").record(value_ms, window);
}

#[cfg(test)]
mod tests {
    use super::*;
    use spillway_core::WorkerMetric;
    use std::collections::HashMap;

    fn features(s: &str) -> RequestFeatures {
        RequestFeatures::from_path_and_query(s)
    }

    #[test]
    fn unseen_signature_gets_default() {
        let est = OnlineEstimator::new(1000.0, 50);
        assert_eq!(est.estimate(&features("/blur?w=1")), 1000.0);
        assert!(est.stats(&features("/blur?w=1")).is_none());
    }

    #[test]
    fn converges_to_mean_of_updates() {
        let est = OnlineEstimator::new(1000.0, 50);
        let f = features("/raytrace?scene=a");

        for ms in [90, 110, 100, 95, 105, 100] {
            est.update(&f, Duration::from_millis(ms));
        }

        let estimate = est.estimate(&f);
        assert!((estimate - 100.0).abs() < 1.0, "estimate {estimate} not near 100");
        assert_eq!(est.stats(&f).unwrap().samples, 6);
    }

    #[test]
    fn falls_back_to_route_bucket() {
        let est = OnlineEstimator::new(1000.0, 50);
        est.update(&features("/blur?w=10"), Duration::from_millis(200));
        est.update(&features("/blur?w=30"), Duration::from_millis(400));

        // Never seen w=20 exactly, but the route has history.
        let estimate = est.estimate(&features("/blur?w=20"));
        assert!((estimate - 300.0).abs() < 1e-6);

        // A different route is still unknown.
        assert_eq!(est.estimate(&features("/enhance?w=20")), 1000.0);
    }

    #[test]
    fn parameter_order_does_not_matter() {
        let est = OnlineEstimator::new(1000.0, 50);
        est.update(&features("/x?a=1&b=2"), Duration::from_millis(50));
        assert!((est.estimate(&features("/x?b=2&a=1")) - 50.0).abs() < 1e-6);
        assert_eq!(est.bucket_count(), 1);
    }

    #[test]
    fn windowed_mean_tracks_shift() {
        let est = OnlineEstimator::new(1000.0, 4);
        let f = features("/shift");

        for _ in 0..20 {
            est.update(&f, Duration::from_millis(100));
        }
        for _ in 0..40 {
            est.update(&f, Duration::from_millis(500));
        }

        // A plain mean would sit near 367; the windowed mean follows the shift.
        let estimate = est.estimate(&f);
        assert!((estimate - 500.0).abs() < 5.0, "estimate {estimate} not near 500");
    }

    #[test]
    fn ingest_worker_metric() {
        let est = OnlineEstimator::new(1000.0, 50);
        let metric = WorkerMetric {
            uri: "/enhance".to_string(),
            parameters: HashMap::from([("level".to_string(), "3".to_string())]),
            raw_data: HashMap::new(),
            ts: 1,
            body_size: 10,
            duration: 250,
        };
        est.ingest(&metric);
        assert!((est.estimate(&features("/enhance?level=3")) - 250.0).abs() < 1e-6);
    }

    #[test]
    fn ignores_nonsense_samples() {
        let est = OnlineEstimator::new(1000.0, 50);
        let f = features("/nan");
        est.record(&f, f64::NAN);
        est.record(&f, -5.0);
        assert_eq!(est.estimate(&f), 1000.0);
    }

    #[test]
    fn concurrent_updates_keep_counts() {
        use std::thread;

        let est = Arc::new(OnlineEstimator::new(1000.0, 1_000_000));
        let mut handles = vec![];

        for t in 0..4 {
            let est = est.clone();
            handles.push(thread::spawn(move || {
                let f = features(&format!("/route?t={}", t % 2));
                for _ in 0..250 {
                    est.update(&f, Duration::from_millis(10));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let a = est.stats(&features("/route?t=0")).unwrap();
        let b = est.stats(&features("/route?t=1")).unwrap();
        assert_eq!(a.samples + b.samples, 1000);
        assert!((a.mean_ms - 10.0).abs() < 1e-6);
    }
}
