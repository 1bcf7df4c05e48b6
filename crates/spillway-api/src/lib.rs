//! spillway-api: admin HTTP API.
//!
//! Served on a separate listener from the dispatch path.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/healthz` | Liveness probe |
//! | GET | `/status` | Per-worker load, CPU, drain state and counters (JSON) |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;

use spillway_autoscale::AutoscaleStats;
use spillway_dispatch::Dispatcher;
use spillway_metrics::MetricsBoard;

/// Shared state for admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub dispatcher: Arc<Dispatcher>,
    pub board: Arc<MetricsBoard>,
    /// Absent when the autoscaler is not running.
    pub autoscale: Option<Arc<AutoscaleStats>>,
}

/// Build the admin router.
pub fn build_router(state: AdminState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/status", get(handlers::status))
        .route("/metrics", get(handlers::prometheus_metrics))
        .with_state(state)
}
