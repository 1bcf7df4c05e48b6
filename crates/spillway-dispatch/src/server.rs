//! Inbound HTTP server.
//!
//! `DispatchServer` accepts HTTP/1.1 connections, buffers each request
//! body and hands the request to the `Dispatcher`. One tokio task per
//! connection; each request runs to completion independently.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use http::StatusCode;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::request::{BufferedRequest, text_response};

pub struct DispatchServer {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
}

impl DispatchServer {
    /// Bind the listening socket.
    pub async fn bind(addr: SocketAddr, dispatcher: Arc<Dispatcher>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind dispatch listener on {addr}"))?;
        Ok(Self {
            listener,
            dispatcher,
        })
    }

    /// Address actually bound; useful when binding port 0.
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("dispatch listener has no local address")
    }

    /// Serve until the shutdown signal fires.
    pub async fn serve(self, mut shutdown: tokio::sync::watch::Receiver<bool>) -> anyhow::Result<()> {
        let addr = self.local_addr()?;
        info!(%addr, policy = self.dispatcher.policy_name(), "dispatcher listening");

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    let (stream, peer_addr) = match accept_result {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let dispatcher = self.dispatcher.clone();

                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);
                        let svc = service_fn(move |req: Request<Incoming>| {
                            let dispatcher = dispatcher.clone();
                            async move {
                                Ok::<_, hyper::Error>(handle(&dispatcher, req).await)
                            }
                        });

                        if let Err(e) = http1::Builder::new()
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(%peer_addr, error = %e, "connection error");
                        }
                    });
                }
                _ = shutdown.changed() => {
                    info!("dispatcher shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

async fn handle(dispatcher: &Dispatcher, req: Request<Incoming>) -> Response<Full<Bytes>> {
    match BufferedRequest::collect(req).await {
        Ok(buffered) => dispatcher.dispatch(buffered).await,
        Err(e) => {
            warn!(error = %e, "failed to read request body");
            text_response(StatusCode::BAD_REQUEST, "Bad Request")
        }
    }
}
