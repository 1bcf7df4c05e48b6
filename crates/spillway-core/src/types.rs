//! Shared types used across Spillway crates.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Unique identifier for a worker. Ordered lexicographically for tie-breaks.
pub type WorkerId = String;

/// An addressable compute instance that can serve forwarded requests.
///
/// Immutable once created. The registry owns workers; everything else
/// refers to them by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub address: String,
    pub port: u16,
}

impl Worker {
    pub fn new(id: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            port,
        }
    }

    /// `address:port`, suitable for a TCP connect or a `Host` header.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Absolute URL for a path on this worker.
    pub fn url(&self, path_and_query: &str) -> String {
        format!("http://{}:{}{}", self.address, self.port, path_and_query)
    }
}

/// Features derived from a request's route and declared parameters.
///
/// Parameters are kept sorted so two requests with the same query in a
/// different order map to the same estimator bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RequestFeatures {
    pub route: String,
    pub params: BTreeMap<String, String>,
}

impl RequestFeatures {
    /// Parse features from a path with an optional query string.
    ///
    /// `/blur?w=10&h=20` becomes route `/blur` with params `h=20, w=10`.
    /// Parameters without `=` get an empty value; empty pairs are skipped.
    pub fn from_path_and_query(path_and_query: &str) -> Self {
        let (route, query) = match path_and_query.split_once('?') {
            Some((route, query)) => (route, Some(query)),
            None => (path_and_query, None),
        };

        let mut params = BTreeMap::new();
        if let Some(query) = query {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                params.insert(key.to_string(), value.to_string());
            }
        }

        Self {
            route: route.to_string(),
            params,
        }
    }

    /// Build features from an already-split route and parameter map.
    pub fn from_parts(route: &str, params: &HashMap<String, String>) -> Self {
        let route = route.split_once('?').map(|(r, _)| r).unwrap_or(route);
        Self {
            route: route.to_string(),
            params: params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Canonical signature string: `route?k1=v1&k2=v2`.
    pub fn signature(&self) -> String {
        if self.params.is_empty() {
            return self.route.clone();
        }
        let query: Vec<String> = self
            .params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        format!("{}?{}", self.route, query.join("&"))
    }
}

/// Latest aggregated observation for one worker.
///
/// CPU comes from the external telemetry source; the in-flight figures
/// come from the job ledger at the moment the snapshot was taken.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct InstanceMetrics {
    /// Reported CPU utilization, 0.0..=100.0.
    pub cpu_percent: f64,
    /// Jobs currently in flight on the worker.
    pub in_flight: usize,
    /// Sum of estimated cost (ms) of the in-flight jobs.
    pub pending_cost_ms: f64,
}

/// One ground-truth sample exported by a worker's stats endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerMetric {
    pub uri: String,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    #[serde(default)]
    pub raw_data: HashMap<String, i64>,
    /// Unix timestamp in milliseconds.
    pub ts: u64,
    #[serde(default)]
    pub body_size: u64,
    /// Measured execution time in milliseconds.
    pub duration: u64,
}

impl WorkerMetric {
    pub fn features(&self) -> RequestFeatures {
        RequestFeatures::from_parts(&self.uri, &self.parameters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn features_sort_parameters() {
        let a = RequestFeatures::from_path_and_query("/blur?w=10&h=20");
        let b = RequestFeatures::from_path_and_query("/blur?h=20&w=10");
        assert_eq!(a, b);
        assert_eq!(a.route, "/blur");
        assert_eq!(a.signature(), "/blur?h=20&w=10");
    }

    #[test]
    fn features_without_query() {
        let f = RequestFeatures::from_path_and_query("/foo");
        assert_eq!(f.route, "/foo");
        assert!(f.params.is_empty());
        assert_eq!(f.signature(), "/foo");
    }

    #[test]
    fn features_tolerate_odd_queries() {
        let f = RequestFeatures::from_path_and_query("/x?flag&&a=1=2");
        assert_eq!(f.params.get("flag").map(String::as_str), Some(""));
        assert_eq!(f.params.get("a").map(String::as_str), Some("1=2"));
        assert_eq!(f.params.len(), 2);
    }

    #[test]
    fn worker_metric_features_match_request_features() {
        let json = r#"{"uri":"/raytrace?scene=a","parameters":{"scene":"a","aa":"2"},"rawData":{"instructions":1200},"ts":1700000000000,"bodySize":42,"duration":350}"#;
        let metric: WorkerMetric = serde_json::from_str(json).unwrap();
        assert_eq!(metric.duration, 350);
        assert_eq!(metric.raw_data.get("instructions"), Some(&1200));
        assert_eq!(
            metric.features(),
            RequestFeatures::from_path_and_query("/raytrace?aa=2&scene=a")
        );
    }

    #[test]
    fn worker_urls() {
        let w = Worker::new("w-1", "10.0.0.5", 8000);
        assert_eq!(w.endpoint(), "10.0.0.5:8000");
        assert_eq!(w.url("/foo?x=1"), "http://10.0.0.5:8000/foo?x=1");
    }
}
