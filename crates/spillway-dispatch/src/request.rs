//! Buffered requests and response relaying.
//!
//! A request is read fully into memory before routing so its body can be
//! replayed on every attempt. Responses are buffered the same way, so a
//! caller never sees a partial response from a failed attempt.

use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName};
use http::{Method, Request, Response, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper::body::Body;

use spillway_core::RequestFeatures;

/// Connection-scoped headers that must not be relayed between hops.
const HOP_BY_HOP: &[HeaderName] = &[
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// An inbound request with its body held in memory.
#[derive(Debug, Clone)]
pub struct BufferedRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl BufferedRequest {
    /// Read the whole body of a request.
    pub async fn collect<B>(req: Request<B>) -> Result<Self, B::Error>
    where
        B: Body,
    {
        let (parts, body) = req.into_parts();
        let body = body.collect().await?.to_bytes();
        Ok(Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
        })
    }

    /// Convenience constructor, mostly for tests.
    pub fn new(method: Method, path_and_query: &str, body: impl Into<Bytes>) -> Self {
        Self {
            method,
            uri: path_and_query.parse().unwrap_or_else(|_| Uri::from_static("/")),
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// `/path?query`, defaulting to `/`.
    pub fn path_and_query(&self) -> &str {
        self.uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
    }

    pub fn features(&self) -> RequestFeatures {
        RequestFeatures::from_path_and_query(self.path_and_query())
    }

    /// Headers to send upstream: hop-by-hop headers and `Host` removed.
    pub fn forward_headers(&self) -> HeaderMap {
        let mut headers = strip_hop_by_hop(&self.headers);
        headers.remove(header::HOST);
        headers
    }
}

/// Copy of `headers` without hop-by-hop entries, including any named in
/// the `Connection` header.
pub fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    let mut out = headers.clone();
    for name in HOP_BY_HOP.iter().chain(listed.iter()) {
        out.remove(name);
    }
    out.remove("keep-alive");
    out
}

/// Turn a buffered upstream response into one for the caller.
pub fn relay(resp: Response<Bytes>) -> Response<Full<Bytes>> {
    let (mut parts, body) = resp.into_parts();
    parts.headers = strip_hop_by_hop(&parts.headers);
    Response::from_parts(parts, Full::new(body))
}

/// A plain-text response with the given status.
pub fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain"),
    );
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[tokio::test]
    async fn collect_buffers_body() {
        let req = Request::builder()
            .method(Method::POST)
            .uri("/foo?x=1")
            .header("x-trace", "abc")
            .body(Full::new(Bytes::from("bar")))
            .unwrap();

        let buffered = BufferedRequest::collect(req).await.unwrap();
        assert_eq!(buffered.method, Method::POST);
        assert_eq!(buffered.path(), "/foo");
        assert_eq!(buffered.query(), Some("x=1"));
        assert_eq!(buffered.path_and_query(), "/foo?x=1");
        assert_eq!(buffered.body, Bytes::from("bar"));
        assert_eq!(buffered.headers["x-trace"], "abc");
        assert_eq!(buffered.features().signature(), "/foo?x=1");
    }

    #[test]
    fn strips_hop_by_hop_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("close, x-private"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-private", HeaderValue::from_static("secret"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));

        let out = strip_hop_by_hop(&headers);
        assert_eq!(out.len(), 1);
        assert_eq!(out[header::CONTENT_TYPE], "text/plain");
    }

    #[test]
    fn forward_headers_drop_host() {
        let mut req = BufferedRequest::new(Method::GET, "/", Bytes::new());
        req.headers
            .insert(header::HOST, HeaderValue::from_static("balancer:8000"));
        req.headers
            .insert(header::ACCEPT, HeaderValue::from_static("*/*"));
        let headers = req.forward_headers();
        assert!(headers.get(header::HOST).is_none());
        assert_eq!(headers[header::ACCEPT], "*/*");
    }

    #[test]
    fn relay_keeps_status_and_body() {
        let upstream = Response::builder()
            .status(StatusCode::CREATED)
            .header("x-worker", "w1")
            .header(header::CONNECTION, "keep-alive")
            .body(Bytes::from("baz"))
            .unwrap();
        let resp = relay(upstream);
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(resp.headers()["x-worker"], "w1");
        assert!(resp.headers().get(header::CONNECTION).is_none());
    }
}
