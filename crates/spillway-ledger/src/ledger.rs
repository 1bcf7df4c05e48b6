//! Job ledger implementation.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use spillway_core::{Worker, WorkerId};

use crate::error::LedgerError;

/// Process-unique job identifier.
pub type JobId = u64;

/// One in-flight request assigned to a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub worker_id: WorkerId,
    /// Estimated cost in milliseconds at admission time.
    pub estimated_cost_ms: f64,
    pub enqueued_at: Instant,
}

/// Mutable per-worker state, guarded by the entry mutex.
#[derive(Default)]
struct EntryState {
    jobs: VecDeque<Job>,
    draining: bool,
    admitted: u64,
    released: u64,
}

/// Ledger entry for a single worker.
struct WorkerEntry {
    worker: Worker,
    state: Mutex<EntryState>,
    /// Notified whenever the job queue becomes empty.
    idle: Notify,
}

impl WorkerEntry {
    fn new(worker: Worker) -> Self {
        Self {
            worker,
            state: Mutex::new(EntryState::default()),
            idle: Notify::new(),
        }
    }

    fn len(&self) -> usize {
        self.state.lock().expect("ledger entry lock").jobs.len()
    }

    fn load(&self) -> WorkerLoad {
        let state = self.state.lock().expect("ledger entry lock");
        WorkerLoad {
            worker: self.worker.clone(),
            in_flight: state.jobs.len(),
            pending_cost_ms: state.jobs.iter().map(|j| j.estimated_cost_ms).sum(),
            draining: state.draining,
            admitted: state.admitted,
            released: state.released,
        }
    }
}

/// Point-in-time load of one worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerLoad {
    pub worker: Worker,
    pub in_flight: usize,
    pub pending_cost_ms: f64,
    pub draining: bool,
    /// Lifetime admits on this entry.
    pub admitted: u64,
    /// Lifetime releases on this entry.
    pub released: u64,
}

/// Loads of every registered worker, keyed and ordered by worker id.
///
/// Each entry is individually consistent; entries are not taken at one
/// instant across workers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LedgerSnapshot {
    pub loads: BTreeMap<WorkerId, WorkerLoad>,
}

impl LedgerSnapshot {
    pub fn get(&self, worker_id: &str) -> Option<&WorkerLoad> {
        self.loads.get(worker_id)
    }

    pub fn in_flight(&self, worker_id: &str) -> usize {
        self.loads.get(worker_id).map(|l| l.in_flight).unwrap_or(0)
    }

    /// Workers that may receive new jobs (not draining), ordered by id.
    pub fn eligible_workers(&self) -> Vec<Worker> {
        self.loads
            .values()
            .filter(|l| !l.draining)
            .map(|l| l.worker.clone())
            .collect()
    }

    pub fn total_in_flight(&self) -> usize {
        self.loads.values().map(|l| l.in_flight).sum()
    }
}

/// Concurrent per-worker record of in-flight jobs.
pub struct JobLedger {
    entries: RwLock<HashMap<WorkerId, Arc<WorkerEntry>>>,
    next_job: AtomicU64,
}

impl JobLedger {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_job: AtomicU64::new(1),
        }
    }

    fn entry(&self, worker_id: &str) -> Result<Arc<WorkerEntry>, LedgerError> {
        self.entries
            .read()
            .expect("ledger lock")
            .get(worker_id)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownWorker(worker_id.to_string()))
    }

    /// Add an empty entry for a new worker. It is eligible immediately.
    pub fn register(&self, worker: Worker) -> Result<(), LedgerError> {
        let mut entries = self.entries.write().expect("ledger lock");
        if entries.contains_key(&worker.id) {
            return Err(LedgerError::DuplicateWorker(worker.id));
        }
        debug!(worker = %worker.id, endpoint = %worker.endpoint(), "ledger entry created");
        entries.insert(worker.id.clone(), Arc::new(WorkerEntry::new(worker)));
        Ok(())
    }

    /// Append a job to the tail of a worker's queue.
    ///
    /// Fails if the worker is unknown or draining.
    pub fn admit(&self, worker_id: &str, estimated_cost_ms: f64) -> Result<Job, LedgerError> {
        let entry = self.entry(worker_id)?;
        let mut state = entry.state.lock().expect("ledger entry lock");
        if state.draining {
            return Err(LedgerError::Draining(worker_id.to_string()));
        }

        let job = Job {
            id: self.next_job.fetch_add(1, Ordering::Relaxed),
            worker_id: worker_id.to_string(),
            estimated_cost_ms,
            enqueued_at: Instant::now(),
        };
        state.jobs.push_back(job.clone());
        state.admitted += 1;
        Ok(job)
    }

    /// Admit a job and wrap it in a ticket that releases on drop.
    pub fn admit_ticket(
        &self,
        worker_id: &str,
        estimated_cost_ms: f64,
    ) -> Result<JobTicket<'_>, LedgerError> {
        let job = self.admit(worker_id, estimated_cost_ms)?;
        Ok(JobTicket {
            ledger: self,
            job: Some(job),
        })
    }

    /// Remove a specific job, wherever it sits in the queue.
    pub fn release(&self, worker_id: &str, job_id: JobId) -> Result<Job, LedgerError> {
        let entry = self.entry(worker_id)?;
        let mut state = entry.state.lock().expect("ledger entry lock");
        let pos = state
            .jobs
            .iter()
            .position(|j| j.id == job_id)
            .ok_or_else(|| LedgerError::UnknownJob {
                worker: worker_id.to_string(),
                job: job_id,
            })?;

        let job = state.jobs.remove(pos).ok_or_else(|| LedgerError::UnknownJob {
            worker: worker_id.to_string(),
            job: job_id,
        })?;
        state.released += 1;

        if state.jobs.is_empty() {
            entry.idle.notify_waiters();
        }
        Ok(job)
    }

    /// In-flight jobs on a worker; zero for unknown workers.
    pub fn size(&self, worker_id: &str) -> usize {
        self.entry(worker_id).map(|e| e.len()).unwrap_or(0)
    }

    pub fn contains(&self, worker_id: &str) -> bool {
        self.entries.read().expect("ledger lock").contains_key(worker_id)
    }

    pub fn is_draining(&self, worker_id: &str) -> bool {
        self.entry(worker_id)
            .map(|e| e.state.lock().expect("ledger entry lock").draining)
            .unwrap_or(false)
    }

    /// Load of a single worker.
    pub fn load(&self, worker_id: &str) -> Option<WorkerLoad> {
        self.entry(worker_id).ok().map(|e| e.load())
    }

    /// Load of every registered worker.
    pub fn snapshot(&self) -> LedgerSnapshot {
        let entries: Vec<Arc<WorkerEntry>> =
            self.entries.read().expect("ledger lock").values().cloned().collect();
        LedgerSnapshot {
            loads: entries
                .iter()
                .map(|e| (e.worker.id.clone(), e.load()))
                .collect(),
        }
    }

    /// Every registered worker, draining ones included, ordered by id.
    pub fn workers(&self) -> Vec<Worker> {
        let entries = self.entries.read().expect("ledger lock");
        let mut workers: Vec<Worker> = entries.values().map(|e| e.worker.clone()).collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        workers
    }

    /// Workers that may receive new jobs, ordered by id.
    pub fn eligible_workers(&self) -> Vec<Worker> {
        let entries: Vec<Arc<WorkerEntry>> =
            self.entries.read().expect("ledger lock").values().cloned().collect();
        let mut workers: Vec<Worker> = entries
            .iter()
            .filter(|e| !e.state.lock().expect("ledger entry lock").draining)
            .map(|e| e.worker.clone())
            .collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        workers
    }

    /// Stop admitting jobs to a worker. Idempotent.
    pub fn begin_drain(&self, worker_id: &str) -> Result<(), LedgerError> {
        let entry = self.entry(worker_id)?;
        let mut state = entry.state.lock().expect("ledger entry lock");
        if !state.draining {
            state.draining = true;
            info!(worker = %worker_id, in_flight = state.jobs.len(), "worker draining");
        }
        Ok(())
    }

    /// Wait until a worker has no in-flight jobs.
    ///
    /// Wakes on every release that empties the queue and re-checks at
    /// least every `poll` in case a wakeup raced with the check.
    pub async fn wait_idle(&self, worker_id: &str, poll: Duration) -> Result<(), LedgerError> {
        let entry = self.entry(worker_id)?;
        loop {
            let mut notified = pin!(entry.idle.notified());
            notified.as_mut().enable();

            let remaining = entry.len();
            if remaining == 0 {
                return Ok(());
            }
            debug!(worker = %worker_id, remaining, "waiting for worker to go idle");
            let _ = tokio::time::timeout(poll, notified).await;
        }
    }

    /// Drain a worker and remove its entry.
    ///
    /// Blocks the caller (and only the caller) until every in-flight job
    /// on the worker has been released.
    pub async fn deregister(&self, worker_id: &str, poll: Duration) -> Result<Worker, LedgerError> {
        self.begin_drain(worker_id)?;
        self.wait_idle(worker_id, poll).await?;

        let removed = self.entries.write().expect("ledger lock").remove(worker_id);
        match removed {
            Some(entry) => {
                info!(worker = %worker_id, "ledger entry removed");
                Ok(entry.worker.clone())
            }
            None => Err(LedgerError::UnknownWorker(worker_id.to_string())),
        }
    }
}

impl Default for JobLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// An admitted job that is released when the ticket is dropped.
///
/// Ties the ledger entry to the lifetime of the request handling it, so a
/// request cancelled mid-flight still releases its job.
pub struct JobTicket<'a> {
    ledger: &'a JobLedger,
    job: Option<Job>,
}

impl JobTicket<'_> {
    pub fn job(&self) -> Option<&Job> {
        self.job.as_ref()
    }

    /// Release the job now.
    pub fn release(mut self) -> Result<Job, LedgerError> {
        match self.job.take() {
            Some(job) => self.ledger.release(&job.worker_id, job.id),
            None => Err(LedgerError::UnknownJob {
                worker: String::new(),
                job: 0,
            }),
        }
    }
}

impl Drop for JobTicket<'_> {
    fn drop(&mut self) {
        if let Some(job) = self.job.take()
            && let Err(e) = self.ledger.release(&job.worker_id, job.id)
        {
            warn!(worker = %job.worker_id, job = job.id, error = %e, "job release on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(id: &str) -> Worker {
        Worker::new(id, "10.0.0.1", 8000)
    }

    fn ledger_with(ids: &[&str]) -> JobLedger {
        let ledger = JobLedger::new();
        for id in ids {
            ledger.register(worker(id)).unwrap();
        }
        ledger
    }

    #[test]
    fn admit_and_release_track_size() {
        let ledger = ledger_with(&["w1"]);

        let a = ledger.admit("w1", 100.0).unwrap();
        let b = ledger.admit("w1", 50.0).unwrap();
        assert_eq!(ledger.size("w1"), 2);
        assert_ne!(a.id, b.id);

        let load = ledger.load("w1").unwrap();
        assert_eq!(load.pending_cost_ms, 150.0);

        ledger.release("w1", a.id).unwrap();
        assert_eq!(ledger.size("w1"), 1);
        ledger.release("w1", b.id).unwrap();
        assert_eq!(ledger.size("w1"), 0);
    }

    #[test]
    fn queue_is_fifo_but_release_is_any_order() {
        let ledger = ledger_with(&["w1"]);
        let jobs: Vec<Job> = (0..3).map(|_| ledger.admit("w1", 1.0).unwrap()).collect();
        assert!(jobs.windows(2).all(|w| w[0].id < w[1].id));

        // Release the middle one first.
        ledger.release("w1", jobs[1].id).unwrap();
        ledger.release("w1", jobs[2].id).unwrap();
        ledger.release("w1", jobs[0].id).unwrap();
        assert_eq!(ledger.size("w1"), 0);
    }

    #[test]
    fn admit_unknown_worker_fails() {
        let ledger = JobLedger::new();
        assert_eq!(
            ledger.admit("ghost", 1.0),
            Err(LedgerError::UnknownWorker("ghost".to_string()))
        );
    }

    #[test]
    fn double_release_is_rejected() {
        let ledger = ledger_with(&["w1"]);
        let job = ledger.admit("w1", 1.0).unwrap();
        ledger.release("w1", job.id).unwrap();
        assert!(matches!(
            ledger.release("w1", job.id),
            Err(LedgerError::UnknownJob { .. })
        ));
        let load = ledger.load("w1").unwrap();
        assert_eq!(load.admitted, 1);
        assert_eq!(load.released, 1);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let ledger = ledger_with(&["w1"]);
        ledger.admit("w1", 1.0).unwrap();
        assert_eq!(
            ledger.register(worker("w1")),
            Err(LedgerError::DuplicateWorker("w1".to_string()))
        );
        // The existing entry is untouched.
        assert_eq!(ledger.size("w1"), 1);
    }

    #[test]
    fn draining_worker_rejects_admits_and_is_not_eligible() {
        let ledger = ledger_with(&["w1", "w2"]);
        ledger.begin_drain("w1").unwrap();

        assert_eq!(
            ledger.admit("w1", 1.0),
            Err(LedgerError::Draining("w1".to_string()))
        );
        let eligible: Vec<String> = ledger.eligible_workers().into_iter().map(|w| w.id).collect();
        assert_eq!(eligible, vec!["w2"]);
        assert_eq!(ledger.snapshot().eligible_workers().len(), 1);
        assert_eq!(ledger.workers().len(), 2);
    }

    #[test]
    fn ticket_releases_on_drop() {
        let ledger = ledger_with(&["w1"]);
        {
            let ticket = ledger.admit_ticket("w1", 5.0).unwrap();
            assert_eq!(ticket.job().unwrap().worker_id, "w1");
            assert_eq!(ledger.size("w1"), 1);
        }
        assert_eq!(ledger.size("w1"), 0);
    }

    #[test]
    fn ticket_explicit_release_does_not_double_release() {
        let ledger = ledger_with(&["w1"]);
        let ticket = ledger.admit_ticket("w1", 5.0).unwrap();
        ticket.release().unwrap();
        let load = ledger.load("w1").unwrap();
        assert_eq!(load.admitted, 1);
        assert_eq!(load.released, 1);
    }

    #[test]
    fn concurrent_admit_release_loses_nothing() {
        use std::thread;

        let ledger = Arc::new(ledger_with(&["w1", "w2"]));
        let mut handles = vec![];

        for t in 0..8 {
            let ledger = ledger.clone();
            handles.push(thread::spawn(move || {
                let id = if t % 2 == 0 { "w1" } else { "w2" };
                for _ in 0..500 {
                    let job = ledger.admit(id, 1.0).unwrap();
                    let load = ledger.load(id).unwrap();
                    assert_eq!(
                        load.admitted - load.released,
                        load.in_flight as u64
                    );
                    ledger.release(id, job.id).unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let snap = ledger.snapshot();
        assert_eq!(snap.total_in_flight(), 0);
        assert_eq!(snap.get("w1").unwrap().admitted, 2000);
        assert_eq!(snap.get("w2").unwrap().released, 2000);
    }

    #[tokio::test]
    async fn deregister_blocks_until_job_released() {
        let ledger = Arc::new(ledger_with(&["w1"]));
        let job = ledger.admit("w1", 1.0).unwrap();

        let drain = {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.deregister("w1", Duration::from_millis(20)).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!drain.is_finished(), "deregistration finished with a job in flight");
        assert!(ledger.is_draining("w1"));

        ledger.release("w1", job.id).unwrap();
        let removed = tokio::time::timeout(Duration::from_secs(2), drain)
            .await
            .expect("drain did not finish")
            .unwrap()
            .unwrap();
        assert_eq!(removed.id, "w1");
        assert!(!ledger.contains("w1"));
    }

    #[tokio::test]
    async fn deregister_idle_worker_is_immediate() {
        let ledger = ledger_with(&["w1"]);
        let removed = ledger.deregister("w1", Duration::from_secs(60)).await.unwrap();
        assert_eq!(removed.id, "w1");
        assert_eq!(ledger.size("w1"), 0);
    }

    #[tokio::test]
    async fn deregister_unknown_worker_is_rejected() {
        let ledger = ledger_with(&["w1"]);
        assert_eq!(
            ledger.deregister("ghost", Duration::from_millis(10)).await,
            Err(LedgerError::UnknownWorker("ghost".to_string()))
        );
        assert!(ledger.contains("w1"));
    }
}
