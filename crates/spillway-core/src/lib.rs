//! spillway-core: shared types for the Spillway dispatch layer.
//!
//! Everything the other crates agree on lives here: worker identity,
//! request features, instance metrics, the `spillway.toml` config, and
//! the interfaces to external collaborators (worker registry).

pub mod config;
pub mod error;
pub mod registry;
pub mod types;

pub use config::{SpillwayConfig, parse_duration};
pub use error::{ConfigError, RegistryError};
pub use registry::{WorkerListener, WorkerRegistry};
pub use types::*;
