//! Standby-pool worker registry.
//!
//! Workers come from a fixed list of pre-provisioned slots. Creating a
//! worker activates a free slot; destroying one drains it through the
//! listeners and returns the slot to the pool.
//!
//! ```text
//! create_worker():   free slot ─► active ─► listeners.on_worker_added()
//! destroy_worker():  listeners.on_worker_removed() (drain) ─► slot freed
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tracing::{info, warn};

use spillway_core::config::{FleetConfig, WorkerSlot};
use spillway_core::{RegistryError, Worker, WorkerId, WorkerListener, WorkerRegistry};

pub struct StandbyRegistry {
    free: Mutex<VecDeque<WorkerSlot>>,
    active: RwLock<BTreeMap<WorkerId, Worker>>,
    listeners: RwLock<Vec<Arc<dyn WorkerListener>>>,
    next_id: AtomicU64,
}

impl StandbyRegistry {
    pub fn new(slots: Vec<WorkerSlot>) -> Self {
        Self {
            free: Mutex::new(slots.into()),
            active: RwLock::new(BTreeMap::new()),
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn from_config(fleet: &FleetConfig) -> Self {
        Self::new(fleet.workers.clone())
    }

    pub fn add_listener(&self, listener: Arc<dyn WorkerListener>) {
        self.listeners
            .write()
            .expect("listener lock")
            .push(listener);
    }

    /// Slots not currently backing a worker.
    pub fn available(&self) -> usize {
        self.free.lock().expect("slot lock").len()
    }

    /// Activate `count` workers, stopping at the first failure.
    pub async fn activate(&self, count: u32) -> Result<Vec<Worker>, RegistryError> {
        let mut created = Vec::new();
        for _ in 0..count {
            created.push(self.create_worker().await?);
        }
        Ok(created)
    }

    fn listeners(&self) -> Vec<Arc<dyn WorkerListener>> {
        self.listeners.read().expect("listener lock").clone()
    }

    fn release_slot(&self, worker: &Worker) {
        self.free.lock().expect("slot lock").push_back(WorkerSlot {
            address: worker.address.clone(),
            port: worker.port,
        });
    }
}

#[async_trait]
impl WorkerRegistry for StandbyRegistry {
    async fn create_worker(&self) -> Result<Worker, RegistryError> {
        let slot = self
            .free
            .lock()
            .expect("slot lock")
            .pop_front()
            .ok_or(RegistryError::Exhausted)?;
        let id = format!("worker-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let worker = Worker::new(id.clone(), slot.address, slot.port);

        self.active
            .write()
            .expect("registry lock")
            .insert(id.clone(), worker.clone());

        let listeners = self.listeners();
        for (i, listener) in listeners.iter().enumerate() {
            if let Err(e) = listener.on_worker_added(&worker).await {
                warn!(worker = %id, error = %e, "listener rejected new worker; rolling back");
                for accepted in &listeners[..i] {
                    if let Err(e) = accepted.on_worker_removed(&id).await {
                        warn!(worker = %id, error = %e, "rollback notification failed");
                    }
                }
                self.active.write().expect("registry lock").remove(&id);
                self.release_slot(&worker);
                return Err(e);
            }
        }

        info!(worker = %id, endpoint = %worker.endpoint(), "worker created");
        Ok(worker)
    }

    async fn destroy_worker(&self, worker_id: &str) -> Result<(), RegistryError> {
        let worker = self
            .active
            .read()
            .expect("registry lock")
            .get(worker_id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownWorker(worker_id.to_string()))?;

        for listener in self.listeners() {
            listener.on_worker_removed(worker_id).await?;
        }

        let removed = self.active.write().expect("registry lock").remove(worker_id);
        if removed.is_none() {
            return Err(RegistryError::UnknownWorker(worker_id.to_string()));
        }
        self.release_slot(&worker);
        info!(worker = %worker_id, "worker destroyed");
        Ok(())
    }

    fn workers(&self) -> Vec<Worker> {
        self.active
            .read()
            .expect("registry lock")
            .values()
            .cloned()
            .collect()
    }
}
