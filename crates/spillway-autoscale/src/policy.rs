//! Scaling policies.
//!
//! A scaling policy looks at the current fleet and says which way it
//! would like to go. Bounds and cooldowns are the autoscaler's business.

use serde::Serialize;

use spillway_core::WorkerId;

/// One worker as the autoscaler sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerObservation {
    pub worker_id: WorkerId,
    /// `None` until the monitor has a reading for this worker.
    pub cpu_percent: Option<f64>,
    pub in_flight: usize,
    pub pending_cost_ms: f64,
}

/// All live, non-draining workers, ordered by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FleetObservation {
    pub workers: Vec<WorkerObservation>,
}

impl FleetObservation {
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Mean CPU across workers that have a reading; `None` if none do.
    pub fn average_cpu(&self) -> Option<f64> {
        let readings: Vec<f64> = self.workers.iter().filter_map(|w| w.cpu_percent).collect();
        if readings.is_empty() {
            return None;
        }
        Some(readings.iter().sum::<f64>() / readings.len() as f64)
    }

    /// Highest in-flight count on any single worker.
    pub fn max_in_flight(&self) -> usize {
        self.workers.iter().map(|w| w.in_flight).max().unwrap_or(0)
    }

    /// Worker with the fewest in-flight jobs; ties go to the lowest id.
    pub fn least_occupied(&self) -> Option<&WorkerObservation> {
        self.workers
            .iter()
            .min_by(|a, b| {
                a.in_flight
                    .cmp(&b.in_flight)
                    .then_with(|| a.worker_id.cmp(&b.worker_id))
            })
    }
}

/// Preferred direction for the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleSignal {
    Out,
    In,
    Hold,
}

pub trait ScalingPolicy: Send + Sync {
    fn assess(&self, fleet: &FleetObservation) -> ScaleSignal;

    fn name(&self) -> &'static str;
}

/// Default per-worker in-flight count above which scale-in is held.
pub const DEFAULT_BUSY_IN_FLIGHT: usize = 2;

/// Scale out above `upper`% average CPU, in below `lower`%.
///
/// CPU is a trailing average and may be missing for new workers, so the
/// ledger has a veto on scale-in: while any worker holds more than
/// `busy_in_flight` jobs the fleet is treated as busy. Workers without a
/// reading are left out of the average; a fleet with no readings holds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CpuThresholdScaling {
    pub lower: f64,
    pub upper: f64,
    pub busy_in_flight: usize,
}

impl CpuThresholdScaling {
    pub fn new(lower: f64, upper: f64) -> Self {
        Self {
            lower,
            upper,
            busy_in_flight: DEFAULT_BUSY_IN_FLIGHT,
        }
    }

    pub fn with_busy_in_flight(mut self, busy_in_flight: usize) -> Self {
        self.busy_in_flight = busy_in_flight;
        self
    }
}

impl Default for CpuThresholdScaling {
    fn default() -> Self {
        Self::new(25.0, 75.0)
    }
}

impl ScalingPolicy for CpuThresholdScaling {
    fn assess(&self, fleet: &FleetObservation) -> ScaleSignal {
        if fleet.is_empty() {
            return ScaleSignal::Hold;
        }
        let Some(cpu) = fleet.average_cpu() else {
            return ScaleSignal::Hold;
        };
        if cpu > self.upper {
            ScaleSignal::Out
        } else if cpu < self.lower && fleet.max_in_flight() <= self.busy_in_flight {
            ScaleSignal::In
        } else {
            ScaleSignal::Hold
        }
    }

    fn name(&self) -> &'static str {
        "cpu_threshold"
    }
}
