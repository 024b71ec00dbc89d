//! In-memory overlay for end-to-end tests.
//!
//! Each overlay service is a handler function served by a hyper HTTP/1
//! task over one half of an in-memory duplex pipe; the dialer hands the
//! other half to the proxy. The whole forwarder path runs for real, no
//! sockets involved.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::collections::HashMap;
use std::future::Future;
use std::io::Write;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use zerogate::overlay::{OverlayBootstrap, OverlayContext, OverlayError, OverlayStream};

pub type UpstreamResponse = http::Response<Full<Bytes>>;

type Handler = Arc<
    dyn Fn(http::Request<Incoming>) -> Pin<Box<dyn Future<Output = UpstreamResponse> + Send>>
        + Send
        + Sync,
>;

/// Overlay bootstrap whose services are closures.
#[derive(Clone, Default)]
pub struct MemoryOverlay {
    services: HashMap<String, Handler>,
}

impl MemoryOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn service<F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(http::Request<Incoming>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = UpstreamResponse> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |req| Box::pin(handler(req)));
        self.services.insert(name.to_string(), handler);
        self
    }
}

#[async_trait]
impl OverlayBootstrap for MemoryOverlay {
    async fn open(&self, _identity: &Path) -> Result<Arc<dyn OverlayContext>, OverlayError> {
        Ok(Arc::new(MemoryContext {
            services: self.services.clone(),
        }))
    }
}

struct MemoryContext {
    services: HashMap<String, Handler>,
}

#[async_trait]
impl OverlayContext for MemoryContext {
    async fn service_names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    async fn dial(&self, service: &str) -> Result<OverlayStream, OverlayError> {
        let handler = self
            .services
            .get(service)
            .cloned()
            .ok_or_else(|| OverlayError::ServiceNotFound {
                service: service.to_string(),
            })?;

        let (client_io, server_io) = tokio::io::duplex(64 * 1024);

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let handler = handler.clone();
                async move { Ok::<_, std::convert::Infallible>(handler(req).await) }
            });
            let _ = hyper::server::conn::http1::Builder::new()
                .serve_connection(TokioIo::new(server_io), service)
                .await;
        });

        Ok(Box::new(client_io))
    }
}

/// Writes a configuration document to a temp file.
pub fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

/// A canned upstream response.
pub fn respond(status: u16, body: &str) -> UpstreamResponse {
    http::Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}
