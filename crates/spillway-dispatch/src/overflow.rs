//! Serverless overflow.
//!
//! A request that no worker can take is submitted to a function named
//! after its path (`/blur` invokes `blur`) with a JSON payload:
//!
//! ```text
//! {"uri": "/blur", "body": "<base64 body>", "query": "w=10"}
//! ```
//!
//! `query` is omitted when the request had none. Whatever status the
//! function returns is relayed; only a missing result counts as failure.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http::{Request, StatusCode, header};
use http_body_util::{BodyExt, Full};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ForwardError;
use crate::forward::{ForwardClient, forward_client};
use crate::request::BufferedRequest;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverflowPayload {
    pub uri: String,
    /// Request body, base64 encoded.
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

impl OverflowPayload {
    pub fn from_request(req: &BufferedRequest) -> Self {
        Self {
            uri: req.path().to_string(),
            body: STANDARD.encode(&req.body),
            query: req.query().map(str::to_string),
        }
    }
}

/// Result of an overflow invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverflowResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

/// Function invoked for a request path: the path without its leading `/`.
pub fn function_name(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}

/// Runs a request on serverless compute.
#[async_trait]
pub trait OverflowInvoker: Send + Sync {
    /// `None` when the function could not be reached.
    async fn invoke(&self, function: &str, payload: &OverflowPayload) -> Option<OverflowResponse>;
}

/// Overflow is not configured; every invocation fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledOverflow;

#[async_trait]
impl OverflowInvoker for DisabledOverflow {
    async fn invoke(&self, function: &str, _payload: &OverflowPayload) -> Option<OverflowResponse> {
        debug!(function, "overflow disabled");
        None
    }
}

/// POSTs the payload as JSON to `<endpoint>/<function>`.
pub struct HttpOverflowInvoker {
    client: ForwardClient,
    endpoint: String,
    timeout: Duration,
}

impl HttpOverflowInvoker {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: forward_client(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(
        &self,
        function: &str,
        payload: &OverflowPayload,
    ) -> Result<OverflowResponse, ForwardError> {
        let target = format!("{}/{}", self.endpoint, function);
        let body = serde_json::to_vec(payload)?;
        let req = Request::builder()
            .method("POST")
            .uri(&target)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| ForwardError::InvalidUri {
                uri: target.clone(),
                reason: e.to_string(),
            })?;

        let exchange = async {
            let resp = self
                .client
                .request(req)
                .await
                .map_err(|source| ForwardError::Connect {
                    target: target.clone(),
                    source,
                })?;
            let status = resp.status();
            let body = resp
                .into_body()
                .collect()
                .await
                .map_err(|source| ForwardError::Body {
                    target: target.clone(),
                    source,
                })?
                .to_bytes();
            Ok(OverflowResponse { status, body })
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(ForwardError::Timeout {
                target,
                timeout: self.timeout,
            }),
        }
    }
}

#[async_trait]
impl OverflowInvoker for HttpOverflowInvoker {
    async fn invoke(&self, function: &str, payload: &OverflowPayload) -> Option<OverflowResponse> {
        match self.post(function, payload).await {
            Ok(resp) => Some(resp),
            Err(e) => {
                warn!(function, error = %e, "overflow invocation failed");
                None
            }
        }
    }
}
