//! Forwarding buffered requests to workers.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;

use spillway_core::Worker;

use crate::error::ForwardError;
use crate::request::BufferedRequest;

pub(crate) type ForwardClient = Client<HttpConnector, Full<Bytes>>;

pub(crate) fn forward_client() -> ForwardClient {
    Client::builder(TokioExecutor::new()).build_http()
}

/// Sends a request to a worker and returns its full response.
///
/// Any status is `Ok`; deciding what counts as success is the caller's
/// job. `Err` means no response was obtained.
#[async_trait]
pub trait WorkerTransport: Send + Sync {
    async fn forward(
        &self,
        worker: &Worker,
        req: &BufferedRequest,
    ) -> Result<Response<Bytes>, ForwardError>;
}

/// HTTP/1.1 transport over a pooled hyper client.
pub struct HttpForwarder {
    client: ForwardClient,
    timeout: Duration,
}

impl HttpForwarder {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: forward_client(),
            timeout,
        }
    }
}

#[async_trait]
impl WorkerTransport for HttpForwarder {
    async fn forward(
        &self,
        worker: &Worker,
        req: &BufferedRequest,
    ) -> Result<Response<Bytes>, ForwardError> {
        let target = worker.url(req.path_and_query());
        let uri: http::Uri = target.parse().map_err(|e: http::uri::InvalidUri| {
            ForwardError::InvalidUri {
                uri: target.clone(),
                reason: e.to_string(),
            }
        })?;

        let mut builder = Request::builder().method(req.method.clone()).uri(uri);
        if let Some(headers) = builder.headers_mut() {
            *headers = req.forward_headers();
        }
        let upstream = builder
            .body(Full::new(req.body.clone()))
            .map_err(|e| ForwardError::InvalidUri {
                uri: target.clone(),
                reason: e.to_string(),
            })?;

        let exchange = async {
            let resp = self
                .client
                .request(upstream)
                .await
                .map_err(|source| ForwardError::Connect {
                    target: target.clone(),
                    source,
                })?;
            let (parts, body) = resp.into_parts();
            let body = body
                .collect()
                .await
                .map_err(|source| ForwardError::Body {
                    target: target.clone(),
                    source,
                })?
                .to_bytes();
            Ok(Response::from_parts(parts, body))
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
