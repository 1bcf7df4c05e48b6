//! Request lifecycle.
//!
//! ```text
//! RECEIVED ─► ESTIMATED ─► ROUTED ─┬─ worker ──► FORWARDING ─┬─ 2xx ──► COMPLETED
//!                            ▲     │                         └─ else ─► RETRY
//!                            │     └─ overflow ─┬─ result ─────────────► COMPLETED
//!                            │                  └─ none ───────────────► RETRY
//!                            └──────────── RETRY (attempts left) ◄───────┘
//!                                          RETRY (budget spent) ───────► FAILED (500)
//! ```
//!
//! The cost estimate is computed once and reused by every attempt; the
//! policy sees a fresh ledger snapshot on each one. A worker attempt holds
//! a `JobTicket` until the worker's response is fully buffered and turned
//! into the caller's response, so the ledger entry is released on
//! success, failure, or cancellation alike. Writing the buffered response
//! to the caller happens after release; the worker is idle by then.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use http::{Response, StatusCode};
use http_body_util::Full;
use serde::Serialize;
use thiserror::Error;
use tracing::{Instrument, debug, error, info, info_span, warn};

use spillway_core::{RegistryError, RequestFeatures, Worker, WorkerListener};
use spillway_estimator::CostEstimator;
use spillway_ledger::{JobLedger, LedgerError};
use spillway_metrics::{CounterSample, MetricsBoard};
use spillway_policy::BalancingPolicy;

use crate::error::ForwardError;
use crate::forward::WorkerTransport;
use crate::overflow::{OverflowInvoker, OverflowPayload, function_name};
use crate::request::{BufferedRequest, relay, text_response};

/// Default number of routing attempts per request.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default poll interval while waiting for a worker to drain.
pub const DEFAULT_DRAIN_POLL: Duration = Duration::from_millis(100);

/// Why a single attempt did not complete the request.
#[derive(Debug, Error)]
enum AttemptError {
    #[error("admission rejected: {0}")]
    Admission(#[from] LedgerError),

    #[error("worker answered {0}")]
    Status(StatusCode),

    #[error(transparent)]
    Transport(#[from] ForwardError),

    #[error("overflow returned no result")]
    OverflowUnavailable,
}

/// Process-wide dispatch counters.
#[derive(Debug, Default)]
pub struct DispatchStats {
    requests: AtomicU64,
    worker_completions: AtomicU64,
    overflow_completions: AtomicU64,
    failed_attempts: AtomicU64,
    ledger_violations: AtomicU64,
    exhausted: AtomicU64,
}

/// Plain copy of `DispatchStats` for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchCounters {
    pub requests: u64,
    pub worker_completions: u64,
    pub overflow_completions: u64,
    pub failed_attempts: u64,
    pub ledger_violations: u64,
    pub exhausted: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchCounters {
        DispatchCounters {
            requests: self.requests.load(Ordering::Relaxed),
            worker_completions: self.worker_completions.load(Ordering::Relaxed),
            overflow_completions: self.overflow_completions.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            ledger_violations: self.ledger_violations.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }
}

impl DispatchCounters {
    /// Counters in Prometheus form.
    pub fn samples(&self) -> Vec<CounterSample> {
        vec![
            CounterSample {
                name: "spillway_requests_total",
                help: "Requests received.",
                value: self.requests,
            },
            CounterSample {
                name: "spillway_worker_completions_total",
                help: "Requests completed by a worker.",
                value: self.worker_completions,
            },
            CounterSample {
                name: "spillway_overflow_total",
                help: "Requests completed by serverless overflow.",
                value: self.overflow_completions,
            },
            CounterSample {
                name: "spillway_failed_attempts_total",
                help: "Routing attempts that did not complete the request.",
                value: self.failed_attempts,
            },
            CounterSample {
                name: "spillway_ledger_violations_total",
                help: "Admissions rejected by the job ledger.",
                value: self.ledger_violations,
            },
            CounterSample {
                name: "spillway_exhausted_total",
                help: "Requests answered 500 after all attempts failed.",
                value: self.exhausted,
            },
        ]
    }
}

/// Routes requests to workers or overflow.
pub struct Dispatcher {
    ledger: Arc<JobLedger>,
    estimator: Arc<dyn CostEstimator>,
    policy: Arc<dyn BalancingPolicy>,
    transport: Arc<dyn WorkerTransport>,
    overflow: Arc<dyn OverflowInvoker>,
    board: Arc<MetricsBoard>,
    max_attempts: u32,
    drain_poll: Duration,
    stats: DispatchStats,
    next_request: AtomicU64,
}

impl Dispatcher {
    pub fn new(
        ledger: Arc<JobLedger>,
        estimator: Arc<dyn CostEstimator>,
        policy: Arc<dyn BalancingPolicy>,
        transport: Arc<dyn WorkerTransport>,
        overflow: Arc<dyn OverflowInvoker>,
        board: Arc<MetricsBoard>,
    ) -> Self {
        Self {
            ledger,
            estimator,
            policy,
            transport,
            overflow,
            board,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            drain_poll: DEFAULT_DRAIN_POLL,
            stats: DispatchStats::default(),
            next_request: AtomicU64::new(1),
        }
    }

    /// Total attempts per request, including the first. At least 1.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_drain_poll(mut self, poll: Duration) -> Self {
        self.drain_poll = poll;
        self
    }

    pub fn ledger(&self) -> &Arc<JobLedger> {
        &self.ledger
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn stats(&self) -> DispatchCounters {
        self.stats.snapshot()
    }

    /// Handle one request to completion. Always produces a response.
    pub async fn dispatch(&self, req: BufferedRequest) -> Response<Full<Bytes>> {
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let span = info_span!(
            "dispatch",
            request_id,
            method = %req.method,
            path = %req.path(),
        );
        self.dispatch_inner(req).instrument(span).await
    }

    async fn dispatch_inner(&self, req: BufferedRequest) -> Response<Full<Bytes>> {
        self.stats.requests.fetch_add(1, Ordering::Relaxed);

        let features = req.features();
        let estimate = self.estimator.estimate(&features);
        debug!(estimate_ms = estimate, signature = %features.signature(), "estimated");

        for attempt in 1..=self.max_attempts {
            let snapshot = self.ledger.snapshot();
            let candidates = snapshot.eligible_workers();
            let metrics = self.board.instance_metrics(&snapshot);
            let choice = self
                .policy
                .choose(&features, estimate, &candidates, &snapshot, &metrics)
                .and_then(|id| snapshot.get(&id).map(|load| load.worker.clone()));

            let outcome = match choice {
                Some(worker) => {
                    debug!(attempt, worker = %worker.id, "routed to worker");
                    self.try_worker(&worker, &req, &features, estimate).await
                }
                None => {
                    debug!(attempt, "routed to overflow");
                    self.try_overflow(&req).await
                }
            };

            match outcome {
                Ok(resp) => return resp,
                Err(e) => {
                    self.stats.failed_attempts.fetch_add(1, Ordering::Relaxed);
                    if matches!(e, AttemptError::Admission(_)) {
                        self.stats.ledger_violations.fetch_add(1, Ordering::Relaxed);
                    }
                    warn!(attempt, max_attempts = self.max_attempts, error = %e, "attempt failed");
                }
            }
        }

        self.stats.exhausted.fetch_add(1, Ordering::Relaxed);
        error!(attempts = self.max_attempts, "request failed on every attempt");
        text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
    }

    async fn try_worker(
        &self,
        worker: &Worker,
        req: &BufferedRequest,
        features: &RequestFeatures,
        estimate: f64,
    ) -> Result<Response<Full<Bytes>>, AttemptError> {
        let ticket = self.ledger.admit_ticket(&worker.id, estimate)?;

        let started = Instant::now();
        let resp = self.transport.forward(worker, req).await?;
        let elapsed = started.elapsed();

        if !resp.status().is_success() {
            // Dropping the ticket releases the job.
            return Err(AttemptError::Status(resp.status()));
        }

        let relayed = relay(resp);
        if let Err(e) = ticket.release() {
            warn!(worker = %worker.id, error = %e, "job release failed");
        }
        self.stats.worker_completions.fetch_add(1, Ordering::Relaxed);
        debug!(worker = %worker.id, elapsed_ms = elapsed.as_millis() as u64, "completed on worker");

        let estimator = self.estimator.clone();
        let features = features.clone();
        tokio::spawn(async move {
            estimator.update(&features, elapsed);
        });

        Ok(relayed)
    }

    async fn try_overflow(&self, req: &BufferedRequest) -> Result<Response<Full<Bytes>>, AttemptError> {
        let function = function_name(req.path());
        let payload = OverflowPayload::from_request(req);
        let result = self
            .overflow
            .invoke(function, &payload)
            .await
            .ok_or(AttemptError::OverflowUnavailable)?;

        self.stats.overflow_completions.fetch_add(1, Ordering::Relaxed);
        debug!(function, status = %result.status, "completed on overflow");

        let mut resp = Response::new(Full::new(result.body));
        *resp.status_mut() = result.status;
        Ok(resp)
    }
}

#[async_trait]
impl WorkerListener for Dispatcher {
    async fn on_worker_added(&self, worker: &Worker) -> Result<(), RegistryError> {
        self.ledger
            .register(worker.clone())
            .map_err(registry_error)?;
        info!(worker = %worker.id, endpoint = %worker.endpoint(), "worker registered");
        Ok(())
    }

    async fn on_worker_removed(&self, worker_id: &str) -> Result<(), RegistryError> {
        info!(worker = %worker_id, "draining worker");
        self.ledger
            .deregister(worker_id, self.drain_poll)
            .await
            .map_err(registry_error)?;
        info!(worker = %worker_id, "worker drained and removed");
        Ok(())
    }
}

fn registry_error(e: LedgerError) -> RegistryError {
    match e {
        LedgerError::DuplicateWorker(id) => RegistryError::Duplicate(id),
        LedgerError::UnknownWorker(id) => RegistryError::UnknownWorker(id),
        LedgerError::Draining(id) => RegistryError::Listener {
            worker: id,
            reason: "already draining".to_string(),
        },
        LedgerError::UnknownJob { worker, job } => RegistryError::Listener {
            worker,
            reason: format!("unknown job {job}"),
        },
    }
}
