//! Zero-trust overlay transport integration.
//!
//! The overlay SDK itself stays outside this crate; the proxy consumes it
//! through the [`OverlayBootstrap`] and [`OverlayContext`] traits, which
//! capture the whole contract the request path needs: authenticate an
//! identity once, enumerate the services it may reach, and dial a named
//! service into a byte stream.

pub mod client;
pub mod dialer;
pub mod static_map;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Marker for boxed bidirectional overlay streams.
pub trait OverlayIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> OverlayIo for T {}

/// Byte-oriented bidirectional connection produced by an overlay dial.
pub type OverlayStream = Box<dyn OverlayIo>;

/// Errors from identity loading, context bootstrap and dialing.
#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    #[error("Failed to load identity {path}: {source}")]
    Identity {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid identity {path}: {reason}")]
    InvalidIdentity { path: String, reason: String },

    #[error("Overlay context for {path} not ready after {waited:?}: no services enumerated")]
    NotReady {
        path: String,
        waited: std::time::Duration,
    },

    #[error("Service not found in overlay: {service}")]
    ServiceNotFound { service: String },

    #[error("Failed to dial service {service}: {source}")]
    Dial {
        service: String,
        #[source]
        source: std::io::Error,
    },
}

impl std::fmt::Debug for dyn OverlayContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn OverlayContext")
    }
}

impl std::fmt::Debug for dyn OverlayIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn OverlayIo")
    }
}

/// A long-lived authenticated overlay context bound to one identity.
#[async_trait]
pub trait OverlayContext: Send + Sync {
    /// Names of the services this identity may dial. An empty list means
    /// service sync has not completed yet.
    async fn service_names(&self) -> Vec<String>;

    /// Opens a connection to the named service.
    async fn dial(&self, service: &str) -> Result<OverlayStream, OverlayError>;
}

/// Factory turning an identity document into an authenticated context.
#[async_trait]
pub trait OverlayBootstrap: Send + Sync {
    async fn open(&self, identity: &Path) -> Result<Arc<dyn OverlayContext>, OverlayError>;
}
