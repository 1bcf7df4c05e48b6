//! spillway-autoscale: grows and shrinks the worker fleet.
//!
//! Reads CPU from the `MetricsBoard` and occupancy from the `JobLedger`,
//! asks a `ScalingPolicy` which way to go, and applies the decision
//! through the `WorkerRegistry`. Removal runs the drain protocol: the
//! registry notifies its listeners (the dispatcher) and tears the worker
//! down only once it has no in-flight work.
//!
//! # Scaling Algorithm
//!
//! ```text
//! cpu  = mean CPU over non-draining workers that have a reading
//! busy = any non-draining worker has more than busy_in_flight jobs
//! size = number of non-draining workers
//!
//! if size < min_workers:                                  ScaleOut
//! if size > max_workers:                                  ScaleIn(least occupied)
//! if no readings:                                         NoChange
//! if cpu > upper and size < max and cooled down:          ScaleOut
//! if cpu < lower and !busy and size > min and cooled down: ScaleIn(least occupied)
//! ```
//!
//! Scale-out and scale-in keep separate cooldown windows.

pub mod policy;
pub mod registry;
pub mod scaler;

pub use policy::{
    CpuThresholdScaling, DEFAULT_BUSY_IN_FLIGHT, FleetObservation, ScaleSignal, ScalingPolicy,
    WorkerObservation,
};
pub use registry::StandbyRegistry;
pub use scaler::{
    AutoscaleCounters, AutoscaleStats, Autoscaler, ScaleDecision, ScaleLimits,
};
