//! Dispatch error types.

use std::time::Duration;

use thiserror::Error;

/// Failures talking to a worker or the overflow endpoint.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("invalid target uri {uri}: {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("request to {target} failed: {source}")]
    Connect {
        target: String,
        #[source]
        source: hyper_util::client::legacy::Error,
    },

    #[error("reading response from {target} failed: {source}")]
    Body {
        target: String,
        #[source]
        source: hyper::Error,
    },

    #[error("{target} did not answer within {timeout:?}")]
    Timeout { target: String, timeout: Duration },

    #[error("failed to encode overflow payload: {0}")]
    Encode(#[from] serde_json::Error),
}
