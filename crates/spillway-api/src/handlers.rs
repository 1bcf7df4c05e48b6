//! Admin API handlers.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;

use spillway_autoscale::AutoscaleCounters;
use spillway_dispatch::DispatchCounters;
use spillway_metrics::render_prometheus;

use crate::AdminState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    data: T,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct WorkerStatus {
    pub id: String,
    pub address: String,
    pub port: u16,
    pub in_flight: usize,
    pub pending_cost_ms: f64,
    /// `None` until the monitor has reported for this worker.
    pub cpu_percent: Option<f64>,
    pub draining: bool,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub policy: &'static str,
    pub max_attempts: u32,
    pub workers: Vec<WorkerStatus>,
    pub dispatch: DispatchCounters,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autoscale: Option<AutoscaleCounters>,
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// GET /status
pub async fn status(State(state): State<AdminState>) -> impl IntoResponse {
    let snapshot = state.dispatcher.ledger().snapshot();
    let workers = snapshot
        .loads
        .values()
        .map(|load| WorkerStatus {
            id: load.worker.id.clone(),
            address: load.worker.address.clone(),
            port: load.worker.port,
            in_flight: load.in_flight,
            pending_cost_ms: load.pending_cost_ms,
            cpu_percent: state.board.cpu(&load.worker.id),
            draining: load.draining,
        })
        .collect();

    ApiResponse::ok(StatusReport {
        policy: state.dispatcher.policy_name(),
        max_attempts: state.dispatcher.max_attempts(),
        workers,
        dispatch: state.dispatcher.stats(),
        autoscale: state.autoscale.as_ref().map(|s| s.snapshot()),
    })
}

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<AdminState>) -> impl IntoResponse {
    let snapshot = state.dispatcher.ledger().snapshot();
    let metrics = state.board.instance_metrics(&snapshot);

    let mut counters = state.dispatcher.stats().samples();
    if let Some(autoscale) = &state.autoscale {
        counters.extend(autoscale.snapshot().samples());
    }

    let body = render_prometheus(&snapshot, &metrics, &counters);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
