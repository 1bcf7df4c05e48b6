//! Error types shared across Spillway crates.

use thiserror::Error;

/// Errors raised while loading or validating `spillway.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration for {field}: {value:?}")]
    Duration { field: &'static str, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors from the worker registry and its listeners.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("worker already registered: {0}")]
    Duplicate(String),

    #[error("unknown worker: {0}")]
    UnknownWorker(String),

    #[error("no capacity left to create a worker")]
    Exhausted,

    #[error("listener rejected {worker}: {reason}")]
    Listener { worker: String, reason: String },
}
