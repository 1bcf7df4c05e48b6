//! spillway-ledger: per-worker record of in-flight jobs.
//!
//! The ledger is the source of truth for how busy each worker is and the
//! gate for safe worker teardown. It is shared by `Arc` between the
//! dispatcher, the autoscaler, the instance monitor and the admin API.
//!
//! # Locking
//!
//! ```text
//! JobLedger
//!   └── RwLock<HashMap<WorkerId, Arc<WorkerEntry>>>   write only on (de)registration
//!         └── WorkerEntry
//!               ├── Mutex<EntryState>  jobs (FIFO) + draining flag
//!               └── Notify             woken when the worker goes idle
//! ```
//!
//! Admits and releases on different workers never touch the same lock.

pub mod error;
pub mod ledger;

pub use error::LedgerError;
pub use ledger::{Job, JobId, JobLedger, JobTicket, LedgerSnapshot, WorkerLoad};
