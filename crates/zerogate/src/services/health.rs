//! Active health checking for backend pools.
//!
//! One checker task per load balancer. Every tick probes all backends
//! concurrently over the overlay dialer; the first round runs immediately
//! on start. Threshold bookkeeping lives on the backend itself
//! ([`Backend::record_probe`]) so the checker stays a thin scheduler.

use crate::models::router::HealthCheckConfig;
use crate::overlay::dialer::DialerCache;
use crate::services::load_balancer::Backend;
use bytes::Bytes;
use http::header;
use http_body_util::Full;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;

/// Handle to a running checker task.
///
/// [`HealthChecker::stop`] signals the loop and joins it; because probes
/// are awaited inside the loop body and bounded by the probe timeout, the
/// join returns within at most one probe timeout of the signal.
pub struct HealthChecker {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl HealthChecker {
    pub(crate) fn spawn(
        route: String,
        backends: Vec<Arc<Backend>>,
        cfg: HealthCheckConfig,
        dialers: Arc<DialerCache>,
    ) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            // The first tick fires immediately, giving the initial probe
            // round on start.
            let mut ticker = interval(cfg.interval.as_duration());

            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        probe_round(&route, &backends, &cfg, &dialers).await;
                    }
                }
            }
            debug!("Health checker for {} stopped", route);
        });

        Self { stop_tx, handle }
    }

    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.handle.await;
    }
}

async fn probe_round(
    route: &str,
    backends: &[Arc<Backend>],
    cfg: &HealthCheckConfig,
    dialers: &DialerCache,
) {
    let probes = backends
        .iter()
        .map(|backend| probe_backend(route, backend, cfg, dialers));
    futures::future::join_all(probes).await;
}

async fn probe_backend(
    route: &str,
    backend: &Arc<Backend>,
    cfg: &HealthCheckConfig,
    dialers: &DialerCache,
) {
    let ok = run_probe(backend, cfg, dialers).await;

    match backend.record_probe(ok, cfg) {
        Some(true) => info!(
            "Backend {} on route {} is healthy again",
            backend.service, route
        ),
        Some(false) => warn!(
            "Backend {} on route {} marked unhealthy",
            backend.service, route
        ),
        None => {}
    }
}

async fn run_probe(backend: &Arc<Backend>, cfg: &HealthCheckConfig, dialers: &DialerCache) -> bool {
    let client = match backend.client(dialers).await {
        Ok(client) => client,
        Err(err) => {
            debug!("Probe for {} failed to get client: {}", backend.service, err);
            return false;
        }
    };

    let request = match http::Request::builder()
        .method(http::Method::GET)
        .uri(cfg.path.as_str())
        .header(header::HOST, backend.authority())
        .body(Full::new(Bytes::new()))
    {
        Ok(request) => request,
        Err(err) => {
            debug!("Probe request for {} invalid: {}", backend.service, err);
            return false;
        }
    };

    match tokio::time::timeout(cfg.timeout.as_duration(), client.request(request)).await {
        Ok(Ok(response)) => response.status().as_u16() == cfg.expected_status,
        Ok(Err(err)) => {
            debug!("Probe for {} failed: {}", backend.service, err);
            false
        }
        Err(_) => {
            debug!(
                "Probe for {} timed out after {:?}",
                backend.service,
                cfg.timeout.as_duration()
            );
            false
        }
    }
}
