//! Proxy supervisor: owns the listener, the swap slot for the route table
//! and load balancers, and the reload machinery.
//!
//! A configuration reload builds a complete new object graph (matcher,
//! balancers, compiled authenticators) before atomically swapping it into
//! the shared slot. Requests already in flight keep whatever snapshot they
//! resolved; the superseded health checkers are only stopped after the new
//! graph is installed.

use crate::config::settings::{load_settings_from_path, ConfigError};
use crate::middleware::auth::{AuthGate, Authenticator};
use crate::middleware::cors::Cors;
use crate::middleware::logging::RequestLog;
use crate::middleware::recovery::Recovery;
use crate::middleware::timeout::TimeoutGuard;
use crate::models::settings::{CorsSettings, LoggingSettings, ServerSettings, Settings};
use crate::overlay::dialer::DialerCache;
use crate::overlay::OverlayBootstrap;
use crate::routes;
use crate::services::http::{forward, RouteHandler};
use crate::services::load_balancer::LoadBalancer;
use crate::utils::route_matcher::RouteMatcher;

use actix_web::{web, App, HttpServer};
use ahash::HashMap as AHashMap;
use arc_swap::ArcSwap;
use log::{error, info, warn};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Swap slot shared by the supervisor, the middleware chain and the
/// forwarder. Readers load the current snapshot without locking.
pub type SharedState = Arc<ArcSwap<ProxyState>>;

/// One complete configuration generation: everything the request path
/// reads, built as a unit and swapped as a unit.
pub struct ProxyState {
    pub matcher: RouteMatcher,
    pub balancers: AHashMap<String, Arc<LoadBalancer>>,
    pub auth: Authenticator,
    pub route_auth: AHashMap<String, Authenticator>,
    pub cors: CorsSettings,
    pub logging: LoggingSettings,
    pub request_timeout: Option<Duration>,
    route_paths: Vec<String>,
}

/// Read-only per-route view for introspection.
#[derive(Debug, Clone, Serialize)]
pub struct RouteStatus {
    pub path: String,
    pub total_backends: usize,
    pub healthy_backends: usize,
    pub policy: String,
}

impl ProxyState {
    pub fn snapshot(&self) -> Vec<RouteStatus> {
        self.route_paths
            .iter()
            .filter_map(|path| self.balancers.get(path))
            .map(|balancer| RouteStatus {
                path: balancer.path().to_string(),
                total_backends: balancer.backends().len(),
                healthy_backends: balancer.healthy_count(),
                policy: balancer.policy().name().to_string(),
            })
            .collect()
    }
}

/// Builds the full object graph for one configuration generation and
/// starts its health checkers.
fn build_state(
    settings: &Settings,
    dialers: &Arc<DialerCache>,
) -> Result<ProxyState, ConfigError> {
    let matcher = RouteMatcher::new(settings.routes.clone())
        .map_err(|e| ConfigError::Invalid(e.to_string()))?;

    let auth = Authenticator::from_settings(&settings.auth).map_err(ConfigError::Invalid)?;

    let mut balancers = AHashMap::default();
    let mut route_auth = AHashMap::default();
    let mut route_paths = Vec::with_capacity(settings.routes.len());

    for route in &settings.routes {
        let balancer = Arc::new(LoadBalancer::from_route(route));

        if let Some(hc) = &route.health_check {
            if hc.enabled {
                balancer.start_health_checks(hc.clone(), dialers.clone());
            }
        }

        if let Some(auth_cfg) = &route.auth {
            if *auth_cfg != settings.auth {
                route_auth.insert(
                    route.path.clone(),
                    Authenticator::from_settings(auth_cfg).map_err(ConfigError::Invalid)?,
                );
            }
        }

        route_paths.push(route.path.clone());
        balancers.insert(route.path.clone(), balancer);
    }

    Ok(ProxyState {
        matcher,
        balancers,
        auth,
        route_auth,
        cors: settings.cors.clone(),
        logging: settings.logging.clone(),
        request_timeout: settings.defaults.timeout.map(|t| t.as_duration()),
        route_paths,
    })
}

/// The proxy supervisor.
///
/// Construction loads the configuration and builds the first state
/// generation without binding the listener; [`Proxy::start`] binds and
/// serves until the server closes.
pub struct Proxy {
    config_path: PathBuf,
    server: ServerSettings,
    shared: SharedState,
    dialers: Arc<DialerCache>,
    handle: Mutex<Option<actix_web::dev::ServerHandle>>,
}

impl Proxy {
    pub fn new(
        config_path: impl Into<PathBuf>,
        bootstrap: Arc<dyn OverlayBootstrap>,
    ) -> Result<Self, ConfigError> {
        let config_path = config_path.into();
        let settings = load_settings_from_path(&config_path)?;
        let dialers = Arc::new(DialerCache::new(bootstrap));
        let state = build_state(&settings, &dialers)?;

        Ok(Self {
            config_path,
            server: settings.server,
            shared: Arc::new(ArcSwap::from_pointee(state)),
            dialers,
            handle: Mutex::new(None),
        })
    }

    /// The shared state slot, for wiring test harnesses and introspection.
    pub fn shared_state(&self) -> SharedState {
        self.shared.clone()
    }

    /// A forwarder bound to this proxy's state and dialer cache, for
    /// embedding the request path without binding a listener.
    pub fn handler(&self) -> RouteHandler {
        RouteHandler::new(self.shared.clone(), self.dialers.clone())
    }

    /// Assembles the middleware chain, binds the listener and serves until
    /// the server is closed. Blocks the calling task.
    pub async fn start(&self) -> std::io::Result<()> {
        let shared = self.shared.clone();
        let handler = RouteHandler::new(shared.clone(), self.dialers.clone());

        let factory_state = shared.clone();
        let mut server = HttpServer::new(move || {
            // Request execution order: recovery → logging → CORS → global
            // auth → timeout → routes/forwarder. actix runs the last
            // registered wrap first.
            App::new()
                .app_data(web::Data::new(handler.clone()))
                .app_data(web::Data::new(factory_state.clone()))
                .configure(routes::status::configure)
                .wrap(TimeoutGuard::new(factory_state.clone()))
                .wrap(AuthGate::new(factory_state.clone()))
                .wrap(Cors::new(factory_state.clone()))
                .wrap(RequestLog::new(factory_state.clone()))
                .wrap(Recovery)
                .default_service(web::route().to(forward))
        });

        if let Some(read_timeout) = self.server.read_timeout {
            server = server.client_request_timeout(read_timeout.as_duration());
        }
        if let Some(write_timeout) = self.server.write_timeout {
            server = server.client_disconnect_timeout(write_timeout.as_duration());
        }
        if let Some(idle_timeout) = self.server.idle_timeout {
            server = server.keep_alive(idle_timeout.as_duration());
        }

        let server = server
            .bind((self.server.host.as_str(), self.server.port))?
            .run();

        info!(
            "Gateway listening on {}:{}",
            self.server.host, self.server.port
        );

        *self.handle.lock().unwrap() = Some(server.handle());
        server.await
    }

    /// Stops health checkers and shuts the server down gracefully within
    /// `graceful`. Past the deadline the server is closed hard and a
    /// timed-out error is returned.
    pub async fn stop(&self, graceful: Duration) -> std::io::Result<()> {
        let state = self.shared.load_full();
        for balancer in state.balancers.values() {
            balancer.stop().await;
        }

        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(graceful, handle.stop(true))
                .await
                .is_err()
            {
                warn!("Graceful shutdown window elapsed, forcing close");
                handle.stop(false).await;
                return Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "graceful shutdown timed out",
                ));
            }
        }

        Ok(())
    }

    /// Reloads the configuration from the path given at construction.
    pub async fn reload(&self) -> Result<(), ConfigError> {
        let path = self.config_path.clone();
        self.reload_from(&path).await
    }

    /// Loads `path`, builds a complete new state generation and swaps it
    /// in. The old generation's health checkers are stopped only after the
    /// swap; a load or build failure leaves the current configuration
    /// untouched.
    pub async fn reload_from(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        let settings = match load_settings_from_path(path) {
            Ok(settings) => settings,
            Err(err) => {
                error!("Reload rejected, keeping current configuration: {}", err);
                return Err(err);
            }
        };

        let new_state = build_state(&settings, &self.dialers)?;
        let old_state = self.shared.swap(Arc::new(new_state));

        for balancer in old_state.balancers.values() {
            balancer.stop().await;
        }

        info!(
            "Configuration reloaded from {} ({} routes)",
            path.display(),
            settings.routes.len()
        );
        Ok(())
    }

    /// Read-only status snapshot of the current generation.
    pub fn status(&self) -> Vec<RouteStatus> {
        self.shared.load().snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::{OverlayContext, OverlayError, OverlayStream};
    use async_trait::async_trait;
    use std::io::Write;
    use std::path::Path;

    struct NullOverlay;

    #[async_trait]
    impl OverlayBootstrap for NullOverlay {
        async fn open(
            &self,
            _identity: &Path,
        ) -> Result<Arc<dyn OverlayContext>, OverlayError> {
            struct Ctx;
            #[async_trait]
            impl OverlayContext for Ctx {
                async fn service_names(&self) -> Vec<String> {
                    vec!["svc-a".to_string()]
                }
                async fn dial(&self, service: &str) -> Result<OverlayStream, OverlayError> {
                    Err(OverlayError::ServiceNotFound {
                        service: service.to_string(),
                    })
                }
            }
            Ok(Arc::new(Ctx))
        }
    }

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    const TWO_BACKENDS: &str = r#"{
        "routes": [
            { "path": "/api/*", "backends": [
                { "ziti_service": "svc-a", "identity_file": "/id.json" },
                { "ziti_service": "svc-b", "identity_file": "/id.json" }
            ]}
        ]
    }"#;

    #[tokio::test]
    async fn status_reports_backend_counts() {
        let file = write_config(TWO_BACKENDS);
        let proxy = Proxy::new(file.path(), Arc::new(NullOverlay)).unwrap();

        let status = proxy.status();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].path, "/api/*");
        assert_eq!(status[0].total_backends, 2);
        assert_eq!(status[0].healthy_backends, 2);
        assert_eq!(status[0].policy, "round-robin");
    }

    #[tokio::test]
    async fn reload_with_identical_config_keeps_snapshot() {
        let file = write_config(TWO_BACKENDS);
        let proxy = Proxy::new(file.path(), Arc::new(NullOverlay)).unwrap();

        let before = proxy.status();
        proxy.reload().await.unwrap();
        let after = proxy.status();

        assert_eq!(before.len(), after.len());
        assert_eq!(before[0].total_backends, after[0].total_backends);
        assert_eq!(before[0].healthy_backends, after[0].healthy_backends);
    }

    #[tokio::test]
    async fn failed_reload_keeps_previous_configuration() {
        let file = write_config(TWO_BACKENDS);
        let proxy = Proxy::new(file.path(), Arc::new(NullOverlay)).unwrap();

        let broken = write_config("{ not json");
        assert!(proxy.reload_from(broken.path()).await.is_err());

        let status = proxy.status();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].total_backends, 2);
    }

    #[tokio::test]
    async fn reload_swaps_in_new_routes() {
        let file = write_config(TWO_BACKENDS);
        let proxy = Proxy::new(file.path(), Arc::new(NullOverlay)).unwrap();

        let next = write_config(
            r#"{
                "routes": [
                    { "path": "/api/*", "backends": [
                        { "ziti_service": "svc-a", "identity_file": "/id.json" }
                    ]},
                    { "path": "/health", "backends": [
                        { "ziti_service": "svc-b", "identity_file": "/id.json" }
                    ]}
                ]
            }"#,
        );
        proxy.reload_from(next.path()).await.unwrap();

        let status = proxy.status();
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].total_backends, 1);
    }
}
