//! Minimal pooled HTTP client for polling workers.

use std::time::Duration;

use anyhow::{Context, bail};
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde::de::DeserializeOwned;

pub type HttpClient = Client<HttpConnector, Empty<Bytes>>;

pub fn http_client() -> HttpClient {
    Client::builder(TokioExecutor::new()).build_http()
}

/// GET a URL and decode a JSON body. Non-2xx is an error.
pub async fn get_json<T: DeserializeOwned>(
    client: &HttpClient,
    url: &str,
    timeout: Duration,
) -> anyhow::Result<T> {
    let uri: http::Uri = url.parse().with_context(|| format!("invalid url {url}"))?;
    let req = http::Request::builder()
        .method("GET")
        .uri(uri)
        .header("user-agent", "spillway-monitor/0.1")
        .body(Empty::<Bytes>::new())?;

    let resp = tokio::time::timeout(timeout, client.request(req))
        .await
        .with_context(|| format!("GET {url} timed out"))?
        .with_context(|| format!("GET {url} failed"))?;

    if !resp.status().is_success() {
        bail!("GET {url} returned {}", resp.status());
    }

    let body = tokio::time::timeout(timeout, resp.into_body().collect())
        .await
        .with_context(|| format!("reading {url} timed out"))??
        .to_bytes();

    serde_json::from_slice(&body).with_context(|| format!("decoding {url}"))
}
