//! spillway-metrics: instance metrics for routing and scaling.
//!
//! Keeps the latest CPU reading per worker, joins it with ledger
//! occupancy into `InstanceMetrics`, and polls workers for ground-truth
//! cost samples that feed the estimator.
//!
//! # Architecture
//!
//! ```text
//! InstanceMonitor (background task, every query_interval)
//!   ├── CpuSource::datapoints()   → MetricsBoard::set_cpu()
//!   └── StatsSource::fetch()      → CostEstimator::ingest()
//!
//! MetricsBoard::instance_metrics(&LedgerSnapshot) → policy, autoscaler
//! render_prometheus()                            → admin /metrics
//! ```

pub mod board;
pub mod client;
pub mod monitor;
pub mod prometheus;
pub mod source;

pub use board::MetricsBoard;
pub use monitor::{InstanceMonitor, PollSummary};
pub use prometheus::{CounterSample, render_prometheus};
pub use source::{
    CpuDatapoint, CpuSource, HttpCpuSource, HttpStatsSource, StaticCpuSource, StatsSource,
    average_utilization,
};
