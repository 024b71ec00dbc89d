//! Static overlay for development deployments.
//!
//! Resolves service names from a fixed table in the identity document and
//! dials them over plain TCP. Production deployments swap in an SDK-backed
//! [`OverlayBootstrap`] with the same shape; nothing else in the proxy
//! changes.

use crate::overlay::{OverlayBootstrap, OverlayContext, OverlayError, OverlayStream};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpStream;

/// Identity document shape for the static overlay.
///
/// ```json
/// {
///   "services": {
///     "billing-api": "127.0.0.1:9000",
///     "users-api": "10.0.0.7:8080"
///   }
/// }
/// ```
#[derive(Debug, Deserialize)]
struct StaticIdentity {
    services: HashMap<String, String>,
}

struct StaticContext {
    services: HashMap<String, String>,
}

#[async_trait]
impl OverlayContext for StaticContext {
    async fn service_names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    async fn dial(&self, service: &str) -> Result<OverlayStream, OverlayError> {
        let addr = self
            .services
            .get(service)
            .ok_or_else(|| OverlayError::ServiceNotFound {
                service: service.to_string(),
            })?;

        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| OverlayError::Dial {
                service: service.to_string(),
                source,
            })?;

        Ok(Box::new(stream))
    }
}

/// Bootstrap reading static identity documents.
#[derive(Debug, Default)]
pub struct StaticOverlay;

#[async_trait]
impl OverlayBootstrap for StaticOverlay {
    async fn open(&self, identity: &Path) -> Result<Arc<dyn OverlayContext>, OverlayError> {
        let raw = tokio::fs::read_to_string(identity)
            .await
            .map_err(|source| OverlayError::Identity {
                path: identity.display().to_string(),
                source,
            })?;

        let parsed: StaticIdentity =
            serde_json::from_str(&raw).map_err(|e| OverlayError::InvalidIdentity {
                path: identity.display().to_string(),
                reason: e.to_string(),
            })?;

        Ok(Arc::new(StaticContext {
            services: parsed.services,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn loads_service_table_from_identity_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{ "services": { "svc-a": "127.0.0.1:1" } }"#)
            .unwrap();

        let context = StaticOverlay.open(file.path()).await.unwrap();
        assert_eq!(context.service_names().await, vec!["svc-a".to_string()]);
    }

    #[tokio::test]
    async fn missing_identity_file_fails() {
        let err = StaticOverlay
            .open(Path::new("/nonexistent/identity.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, OverlayError::Identity { .. }));
    }

    #[tokio::test]
    async fn malformed_identity_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not json").unwrap();

        let err = StaticOverlay.open(file.path()).await.unwrap_err();
        assert!(matches!(err, OverlayError::InvalidIdentity { .. }));
    }

    #[tokio::test]
    async fn dialing_unknown_service_fails() {
        let context = StaticContext {
            services: HashMap::new(),
        };
        let err = context.dial("ghost").await.unwrap_err();
        assert!(matches!(err, OverlayError::ServiceNotFound { .. }));
    }
}
