//! Ledger error types.

use thiserror::Error;

use crate::ledger::JobId;

/// Ledger consistency violations.
///
/// None of these are fatal to the process: the dispatcher treats them as
/// a failed routing attempt, the registry as a rejected operation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("unknown worker: {0}")]
    UnknownWorker(String),

    #[error("worker already registered: {0}")]
    DuplicateWorker(String),

    #[error("worker is draining: {0}")]
    Draining(String),

    #[error("job {job} not in flight on worker {worker}")]
    UnknownJob { worker: String, job: JobId },
}
