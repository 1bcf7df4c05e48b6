//! Autoscaler: CPU-driven worker scaling.
//!
//! Every interval the autoscaler observes the fleet (CPU from the metrics
//! board, occupancy from the ledger), asks the scaling policy for a
//! direction, and applies it through the worker registry. Each direction
//! has its own cooldown; the fleet size is kept within
//! `[min_workers, max_workers]`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use spillway_core::{ConfigError, SpillwayConfig, WorkerId, WorkerRegistry};
use spillway_ledger::JobLedger;
use spillway_metrics::{CounterSample, MetricsBoard};

use crate::policy::{FleetObservation, ScaleSignal, ScalingPolicy, WorkerObservation};

/// A scaling decision for the fleet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Provision one more worker.
    ScaleOut,
    /// Drain and destroy the given worker.
    ScaleIn(WorkerId),
    /// No change needed.
    NoChange,
}

/// Fleet bounds and cooldown windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleLimits {
    pub min_workers: u32,
    pub max_workers: u32,
    pub scale_out_cooldown: Duration,
    pub scale_in_cooldown: Duration,
}

impl ScaleLimits {
    pub fn from_config(config: &SpillwayConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            min_workers: config.autoscale.min_workers,
            max_workers: config.autoscale.max_workers,
            scale_out_cooldown: config.scale_out_cooldown()?,
            scale_in_cooldown: config.scale_in_cooldown()?,
        })
    }
}

/// Scaling actions taken so far.
#[derive(Debug, Default)]
pub struct AutoscaleStats {
    scale_outs: AtomicU64,
    scale_ins: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AutoscaleCounters {
    pub scale_outs: u64,
    pub scale_ins: u64,
    pub failures: u64,
}

impl AutoscaleStats {
    pub fn snapshot(&self) -> AutoscaleCounters {
        AutoscaleCounters {
            scale_outs: self.scale_outs.load(Ordering::Relaxed),
            scale_ins: self.scale_ins.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

impl AutoscaleCounters {
    pub fn samples(&self) -> Vec<CounterSample> {
        vec![
            CounterSample {
                name: "spillway_scale_out_total",
                help: "Workers added by the autoscaler.",
                value: self.scale_outs,
            },
            CounterSample {
                name: "spillway_scale_in_total",
                help: "Workers removed by the autoscaler.",
                value: self.scale_ins,
            },
            CounterSample {
                name: "spillway_scale_failures_total",
                help: "Scaling actions rejected by the registry.",
                value: self.failures,
            },
        ]
    }
}

/// Cooldown tracking.
#[derive(Debug, Default)]
struct ScaleState {
    last_scale_out: Option<Instant>,
    last_scale_in: Option<Instant>,
}

fn cooled_down(last: Option<Instant>, cooldown: Duration, now: Instant) -> bool {
    last.is_none_or(|t| now.saturating_duration_since(t) >= cooldown)
}

pub struct Autoscaler {
    ledger: Arc<JobLedger>,
    board: Arc<MetricsBoard>,
    registry: Arc<dyn WorkerRegistry>,
    policy: Arc<dyn ScalingPolicy>,
    limits: ScaleLimits,
    state: ScaleState,
    stats: Arc<AutoscaleStats>,
}

impl Autoscaler {
    pub fn new(
        ledger: Arc<JobLedger>,
        board: Arc<MetricsBoard>,
        registry: Arc<dyn WorkerRegistry>,
        policy: Arc<dyn ScalingPolicy>,
        limits: ScaleLimits,
    ) -> Self {
        Self {
            ledger,
            board,
            registry,
            policy,
            limits,
            state: ScaleState::default(),
            stats: Arc::new(AutoscaleStats::default()),
        }
    }

    /// Shared handle to the action counters.
    pub fn stats(&self) -> Arc<AutoscaleStats> {
        self.stats.clone()
    }

    /// Current fleet: every registered worker that is not draining.
    pub fn observe(&self) -> FleetObservation {
        let snapshot = self.ledger.snapshot();
        let workers = snapshot
            .loads
            .iter()
            .filter(|(_, load)| !load.draining)
            .map(|(id, load)| WorkerObservation {
                worker_id: id.clone(),
                cpu_percent: self.board.cpu(id),
                in_flight: load.in_flight,
                pending_cost_ms: load.pending_cost_ms,
            })
            .collect();
        FleetObservation { workers }
    }

    /// Decide what to do at `now`. Records cooldowns for the chosen
    /// direction; performs no I/O.
    pub fn evaluate_at(&mut self, fleet: &FleetObservation, now: Instant) -> ScaleDecision {
        let size = fleet.len() as u32;

        // Bounds first; they override the policy and the cooldowns.
        if size < self.limits.min_workers {
            debug!(size, min = self.limits.min_workers, "below minimum fleet size");
            self.state.last_scale_out = Some(now);
            return ScaleDecision::ScaleOut;
        }
        if size > self.limits.max_workers
            && let Some(victim) = fleet.least_occupied()
        {
            debug!(size, max = self.limits.max_workers, "above maximum fleet size");
            self.state.last_scale_in = Some(now);
            return ScaleDecision::ScaleIn(victim.worker_id.clone());
        }

        let signal = self.policy.assess(fleet);
        let cpu = fleet.average_cpu().unwrap_or_default();
        match signal {
            ScaleSignal::Out
                if size < self.limits.max_workers
                    && cooled_down(self.state.last_scale_out, self.limits.scale_out_cooldown, now) =>
            {
                self.state.last_scale_out = Some(now);
                debug!(size, cpu, policy = self.policy.name(), "scaling out");
                ScaleDecision::ScaleOut
            }
            ScaleSignal::In
                if size > self.limits.min_workers
                    && cooled_down(self.state.last_scale_in, self.limits.scale_in_cooldown, now) =>
            {
                match fleet.least_occupied() {
                    Some(victim) => {
                        self.state.last_scale_in = Some(now);
                        debug!(size, cpu, worker = %victim.worker_id, policy = self.policy.name(), "scaling in");
                        ScaleDecision::ScaleIn(victim.worker_id.clone())
                    }
                    None => ScaleDecision::NoChange,
                }
            }
            _ => ScaleDecision::NoChange,
        }
    }

    pub fn evaluate(&mut self, fleet: &FleetObservation) -> ScaleDecision {
        self.evaluate_at(fleet, Instant::now())
    }

    /// Observe, decide, and act once.
    ///
    /// Scale-in waits for the departing worker to drain, so this can take
    /// as long as that worker's slowest in-flight request.
    pub async fn tick(&mut self) -> ScaleDecision {
        let fleet = self.observe();
        let decision = self.evaluate(&fleet);

        match &decision {
            ScaleDecision::ScaleOut => match self.registry.create_worker().await {
                Ok(worker) => {
                    self.stats.scale_outs.fetch_add(1, Ordering::Relaxed);
                    info!(worker = %worker.id, endpoint = %worker.endpoint(), "scaled out");
                }
                Err(e) => {
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "scale out failed");
                }
            },
            ScaleDecision::ScaleIn(worker_id) => {
                match self.registry.destroy_worker(worker_id).await {
                    Ok(()) => {
                        self.stats.scale_ins.fetch_add(1, Ordering::Relaxed);
                        info!(worker = %worker_id, "scaled in");
                    }
                    Err(e) => {
                        self.stats.failures.fetch_add(1, Ordering::Relaxed);
                        warn!(worker = %worker_id, error = %e, "scale in failed");
                    }
                }
            }
            ScaleDecision::NoChange => {}
        }
        decision
    }

    /// Run the autoscaler loop.
    pub async fn run(&mut self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(
            interval_secs = interval.as_secs(),
            policy = self.policy.name(),
            min = self.limits.min_workers,
            max = self.limits.max_workers,
            "autoscaler started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let decision = self.tick().await;
                    debug!(?decision, "autoscaler tick");
                }
                _ = shutdown.changed() => {
                    info!("autoscaler shutting down");
                    break;
                }
            }
        }
    }
}
