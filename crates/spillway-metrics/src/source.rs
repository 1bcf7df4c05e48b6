//! Telemetry sources: worker CPU utilization and worker stats samples.
//!
//! Both are external collaborators. The HTTP implementations talk to
//! per-worker endpoints; `StaticCpuSource` is driven by hand.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use spillway_core::{Worker, WorkerId, WorkerMetric};

use crate::client::{HttpClient, get_json, http_client};

/// One averaged CPU datapoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CpuDatapoint {
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    /// Average utilization over the datapoint's period, 0..=100.
    pub average: f64,
}

/// Average of the datapoints' averages; 0.0 when there are none.
pub fn average_utilization(points: &[CpuDatapoint]) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    points.iter().map(|p| p.average).sum::<f64>() / points.len() as f64
}

/// Reports CPU utilization of a worker over a trailing window.
#[async_trait]
pub trait CpuSource: Send + Sync {
    async fn datapoints(&self, worker: &Worker, window: Duration)
    -> anyhow::Result<Vec<CpuDatapoint>>;
}

/// Reports cost samples a worker measured itself.
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn fetch(&self, worker: &Worker) -> anyhow::Result<Vec<WorkerMetric>>;
}

#[derive(Deserialize)]
struct CpuResponse {
    #[serde(default)]
    datapoints: Vec<CpuDatapoint>,
}

/// Queries `GET <worker><path>?window_secs=N`, expecting
/// `{"datapoints": [{"timestamp": .., "average": ..}]}`.
pub struct HttpCpuSource {
    client: HttpClient,
    path: String,
    timeout: Duration,
}

impl HttpCpuSource {
    pub fn new(path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: http_client(),
            path: path.into(),
            timeout,
        }
    }
}

#[async_trait]
impl CpuSource for HttpCpuSource {
    async fn datapoints(
        &self,
        worker: &Worker,
        window: Duration,
    ) -> anyhow::Result<Vec<CpuDatapoint>> {
        let url = worker.url(&format!("{}?window_secs={}", self.path, window.as_secs()));
        let resp: CpuResponse = get_json(&self.client, &url, self.timeout).await?;
        Ok(resp.datapoints)
    }
}

/// Queries `GET <worker><path>`, expecting a JSON array of `WorkerMetric`.
pub struct HttpStatsSource {
    client: HttpClient,
    path: String,
    timeout: Duration,
}

impl HttpStatsSource {
    pub fn new(path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: http_client(),
            path: path.into(),
            timeout,
        }
    }
}

#[async_trait]
impl StatsSource for HttpStatsSource {
    async fn fetch(&self, worker: &Worker) -> anyhow::Result<Vec<WorkerMetric>> {
        get_json(&self.client, &worker.url(&self.path), self.timeout).await
    }
}

/// CPU readings set explicitly; unknown workers report no datapoints.
#[derive(Default)]
pub struct StaticCpuSource {
    readings: RwLock<HashMap<WorkerId, f64>>,
}

impl StaticCpuSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, worker_id: &str, percent: f64) {
        self.readings
            .write()
            .expect("cpu source lock")
            .insert(worker_id.to_string(), percent);
    }
}

#[async_trait]
impl CpuSource for StaticCpuSource {
    async fn datapoints(
        &self,
        worker: &Worker,
        _window: Duration,
    ) -> anyhow::Result<Vec<CpuDatapoint>> {
        let readings = self.readings.read().expect("cpu source lock");
        Ok(readings
            .get(&worker.id)
            .map(|p| {
                vec![CpuDatapoint {
                    timestamp: 0,
                    average: *p,
                }]
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_of_datapoints() {
        let points = [
            CpuDatapoint {
                timestamp: 1,
                average: 20.0,
            },
            CpuDatapoint {
                timestamp: 2,
                average: 40.0,
            },
        ];
        assert_eq!(average_utilization(&points), 30.0);
        assert_eq!(average_utilization(&[]), 0.0);
    }

    #[test]
    fn cpu_response_tolerates_missing_field() {
        let resp: CpuResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.datapoints.is_empty());
    }

    #[tokio::test]
    async fn static_source_reports_set_values() {
        let source = StaticCpuSource::new();
        let w1 = Worker::new("w1", "10.0.0.1", 8000);
        let w2 = Worker::new("w2", "10.0.0.2", 8000);
        source.set("w1", 55.0);

        let points = source.datapoints(&w1, Duration::from_secs(60)).await.unwrap();
        assert_eq!(average_utilization(&points), 55.0);
        assert!(source.datapoints(&w2, Duration::from_secs(60)).await.unwrap().is_empty());
    }
}
