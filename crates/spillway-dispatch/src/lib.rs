//! spillway-dispatch: the request path.
//!
//! Buffers each inbound request, asks the estimator for its cost, asks
//! the balancing policy for a worker, and forwards it; if no worker can
//! take it the request runs on serverless overflow. Failed attempts are
//! retried with a fresh routing decision up to a fixed budget.
//!
//! # Architecture
//!
//! ```text
//! DispatchServer (hyper, HTTP/1.1)
//!   └── Dispatcher::dispatch(BufferedRequest)
//!         ├── CostEstimator::estimate()          once per request
//!         ├── BalancingPolicy::choose()          every attempt
//!         ├── JobLedger::admit_ticket()          before forwarding
//!         ├── WorkerTransport::forward()         HttpForwarder
//!         └── OverflowInvoker::invoke()          HttpOverflowInvoker / DisabledOverflow
//! ```
//!
//! The dispatcher is also the registry's `WorkerListener`: new workers
//! are registered in the ledger, departing ones are drained.

pub mod dispatcher;
pub mod error;
pub mod forward;
pub mod overflow;
pub mod request;
pub mod server;

pub use dispatcher::{
    DEFAULT_DRAIN_POLL, DEFAULT_MAX_ATTEMPTS, DispatchCounters, DispatchStats, Dispatcher,
};
pub use error::ForwardError;
pub use forward::{HttpForwarder, WorkerTransport};
pub use overflow::{
    DisabledOverflow, HttpOverflowInvoker, OverflowInvoker, OverflowPayload, OverflowResponse,
    function_name,
};
pub use request::BufferedRequest;
pub use server::DispatchServer;
