//! Worker registry interface.
//!
//! The registry is the authoritative set of live workers. It is an
//! external collaborator: Spillway only talks to it through these traits.
//! Listeners are notified synchronously, after a worker is created and
//! before a worker is torn down, so the dispatcher can admit new workers
//! and drain departing ones.

use async_trait::async_trait;

use crate::error::RegistryError;
use crate::types::{Worker, WorkerId};

/// Receives worker lifecycle notifications from a registry.
#[async_trait]
pub trait WorkerListener: Send + Sync {
    /// A worker was created and can start receiving work.
    async fn on_worker_added(&self, worker: &Worker) -> Result<(), RegistryError>;

    /// A worker is about to be destroyed.
    ///
    /// Must not return until the worker has no in-flight work; the
    /// registry tears the resource down only after this returns `Ok`.
    async fn on_worker_removed(&self, worker_id: &str) -> Result<(), RegistryError>;
}

/// Creates and destroys workers.
#[async_trait]
pub trait WorkerRegistry: Send + Sync {
    /// Provision a new worker and notify listeners.
    async fn create_worker(&self) -> Result<Worker, RegistryError>;

    /// Notify listeners (drain), then destroy the worker.
    async fn destroy_worker(&self, worker_id: &str) -> Result<(), RegistryError>;

    /// Currently live workers.
    fn workers(&self) -> Vec<Worker>;

    /// Live worker ids, sorted.
    fn worker_ids(&self) -> Vec<WorkerId> {
        let mut ids: Vec<WorkerId> = self.workers().into_iter().map(|w| w.id).collect();
        ids.sort();
        ids
    }
}
