//! Process-wide cache of authenticated overlay contexts.
//!
//! Bootstrapping an identity is expensive (authentication plus service
//! sync), so contexts are created once per identity file and never
//! released. The set of identities is a bounded operational concern, which
//! keeps the monotonic growth acceptable.

use crate::overlay::{OverlayBootstrap, OverlayContext, OverlayError, OverlayStream};
use log::{debug, info};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(5);
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone)]
struct CacheEntry {
    context: Arc<dyn OverlayContext>,
    services: Arc<HashSet<String>>,
}

/// Maps identity-file paths to long-lived overlay contexts.
///
/// Reads take the shared lock; the first use of an identity takes the
/// exclusive lock, re-checks (another task may have won the race), and
/// only then bootstraps. Instead of sleeping a fixed warm-up period, the
/// cache polls the context's service enumeration until it returns a
/// non-empty list, failing with [`OverlayError::NotReady`] once the
/// bounded wait expires.
pub struct DialerCache {
    entries: RwLock<HashMap<PathBuf, CacheEntry>>,
    bootstrap: Arc<dyn OverlayBootstrap>,
    ready_timeout: Duration,
}

impl DialerCache {
    pub fn new(bootstrap: Arc<dyn OverlayBootstrap>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            bootstrap,
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }

    /// Overrides the bounded readiness wait (mainly for tests).
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Resolves a dialer for `service` under `identity`.
    ///
    /// Verifies the service exists in the identity's enumerated service
    /// set before handing out anything, so a misconfigured backend fails
    /// here rather than at dial time.
    pub async fn get_dialer(
        &self,
        identity: &Path,
        service: &str,
    ) -> Result<Dialer, OverlayError> {
        let cached = { self.entries.read().await.get(identity).cloned() };

        let entry = match cached {
            Some(entry) => entry,
            None => self.init_entry(identity).await?,
        };

        if !entry.services.contains(service) {
            return Err(OverlayError::ServiceNotFound {
                service: service.to_string(),
            });
        }

        Ok(Dialer {
            context: entry.context.clone(),
            service: service.to_string(),
        })
    }

    async fn init_entry(&self, identity: &Path) -> Result<CacheEntry, OverlayError> {
        let mut entries = self.entries.write().await;

        // Another request may have initialized this identity while we
        // waited for the exclusive lock.
        if let Some(entry) = entries.get(identity) {
            return Ok(entry.clone());
        }

        debug!("Bootstrapping overlay context for {}", identity.display());
        let context = self.bootstrap.open(identity).await?;
        let services = self.wait_ready(identity, context.as_ref()).await?;
        info!(
            "Overlay context for {} ready with {} services",
            identity.display(),
            services.len()
        );

        let entry = CacheEntry {
            context,
            services: Arc::new(services),
        };
        entries.insert(identity.to_path_buf(), entry.clone());
        Ok(entry)
    }

    /// Bounded wait for authentication and service sync: the context is
    /// ready once it enumerates at least one service.
    async fn wait_ready(
        &self,
        identity: &Path,
        context: &dyn OverlayContext,
    ) -> Result<HashSet<String>, OverlayError> {
        let start = Instant::now();
        loop {
            let names = context.service_names().await;
            if !names.is_empty() {
                return Ok(names.into_iter().collect());
            }
            if start.elapsed() >= self.ready_timeout {
                return Err(OverlayError::NotReady {
                    path: identity.display().to_string(),
                    waited: start.elapsed(),
                });
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }
}

/// A dial function bound to one `(identity, service)` pair.
///
/// The logical target address is decided by the overlay; dialing always
/// connects to the bound service name.
#[derive(Clone, Debug)]
pub struct Dialer {
    context: Arc<dyn OverlayContext>,
    service: String,
}

impl Dialer {
    pub async fn dial(&self) -> Result<OverlayStream, OverlayError> {
        self.context.dial(&self.service).await
    }

    pub fn service(&self) -> &str {
        &self.service
    }
}
