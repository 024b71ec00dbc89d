//! Per-route backend pool and selection policies.
//!
//! Selection reads only atomics, so the hot path never blocks on the
//! compound failure/success counters, which live under a per-backend lock
//! because they pair with threshold checks.

use crate::models::router::{BackendConfig, HealthCheckConfig, LoadBalancePolicy, RouteConfig};
use crate::models::settings::{FALLBACK_MAX_RETRIES, FALLBACK_TIMEOUT};
use crate::overlay::client::OverlayHttpClient;
use crate::overlay::dialer::DialerCache;
use crate::overlay::OverlayError;
use crate::services::health::HealthChecker;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;

/// Consecutive request-path failures that mark a backend unhealthy. This
/// is independent of the health checker's configured thresholds; both
/// signals feed the same healthy flag.
const REQUEST_FAILURE_THRESHOLD: u32 = 3;

#[derive(Debug, Default)]
struct Counters {
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_check: Option<Instant>,
}

/// Runtime state for one backend of a route.
///
/// `healthy` and `active` are atomics read lock-free on the selection
/// path. The HTTP client is constructed lazily on first use: resolving the
/// dialer verifies the identity and the service's existence in the
/// overlay, and that work belongs on the first request (or probe), not on
/// configuration load.
pub struct Backend {
    pub service: String,
    pub identity: PathBuf,
    pub port: u16,
    pub weight: u32,
    pub priority: u32,
    pub timeout: Duration,
    pub max_retries: u32,
    healthy: AtomicBool,
    active: AtomicI64,
    counters: Mutex<Counters>,
    client: OnceCell<OverlayHttpClient>,
}

impl Backend {
    pub fn from_config(cfg: &BackendConfig) -> Self {
        Self {
            service: cfg.ziti_service.clone(),
            identity: PathBuf::from(cfg.identity_file.as_deref().unwrap_or_default()),
            port: cfg.port,
            weight: cfg.weight.max(1),
            priority: cfg.priority,
            timeout: cfg
                .timeout
                .unwrap_or(FALLBACK_TIMEOUT)
                .as_duration(),
            max_retries: cfg.max_retries.unwrap_or(FALLBACK_MAX_RETRIES),
            healthy: AtomicBool::new(true),
            active: AtomicI64::new(0),
            counters: Mutex::new(Counters::default()),
            client: OnceCell::new(),
        }
    }

    /// Outbound authority: the overlay service name, with `:port` appended
    /// iff the port is set and not 80.
    pub fn authority(&self) -> String {
        if self.port > 0 && self.port != 80 {
            format!("{}:{}", self.service, self.port)
        } else {
            self.service.clone()
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn active_connections(&self) -> i64 {
        self.active.load(Ordering::Relaxed)
    }

    /// When the health checker last probed this backend.
    pub fn last_probe_time(&self) -> Option<Instant> {
        self.counters.lock().unwrap().last_check
    }

    /// Lazily resolves the overlay HTTP client for this backend. The
    /// dialer cache verifies the service exists under the identity.
    pub async fn client(
        &self,
        dialers: &DialerCache,
    ) -> Result<&OverlayHttpClient, OverlayError> {
        self.client
            .get_or_try_init(|| async {
                let dialer = dialers.get_dialer(&self.identity, &self.service).await?;
                Ok(OverlayHttpClient::new(dialer))
            })
            .await
    }

    /// Request-path success: clears the failure streak.
    pub fn record_success(&self) {
        let mut counters = self.counters.lock().unwrap();
        counters.consecutive_failures = 0;
        counters.consecutive_successes += 1;
    }

    /// Request-path failure: three strikes take the backend out of the
    /// preferred pool until a probe (or selection fallback) rehabilitates
    /// it.
    pub fn record_failure(&self) {
        let mut counters = self.counters.lock().unwrap();
        counters.consecutive_failures += 1;
        counters.consecutive_successes = 0;
        if counters.consecutive_failures >= REQUEST_FAILURE_THRESHOLD
            && self.healthy.swap(false, Ordering::Relaxed)
        {
            warn!(
                "Backend {} marked unhealthy after {} consecutive request failures",
                self.service, counters.consecutive_failures
            );
        }
    }

    /// Health-probe result with the checker's configured thresholds.
    /// Returns `Some(new_state)` when the healthy flag transitioned.
    pub fn record_probe(&self, ok: bool, cfg: &HealthCheckConfig) -> Option<bool> {
        let mut counters = self.counters.lock().unwrap();
        counters.last_check = Some(Instant::now());

        if ok {
            counters.consecutive_successes += 1;
            counters.consecutive_failures = 0;
            if counters.consecutive_successes >= cfg.success_count
                && !self.healthy.swap(true, Ordering::Relaxed)
            {
                return Some(true);
            }
        } else {
            counters.consecutive_failures += 1;
            counters.consecutive_successes = 0;
            if counters.consecutive_failures >= cfg.failure_count
                && self.healthy.swap(false, Ordering::Relaxed)
            {
                return Some(false);
            }
        }

        None
    }

    fn incr_active(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    fn decr_active(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Pairs every increment of a backend's connection count with exactly one
/// decrement, on every exit path.
pub struct ConnGuard {
    backend: Arc<Backend>,
}

impl ConnGuard {
    pub fn acquire(backend: Arc<Backend>) -> Self {
        backend.incr_active();
        Self { backend }
    }
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        self.backend.decr_active();
    }
}

/// Per-route owner of the backend pool, selection cursor and health
/// checker.
pub struct LoadBalancer {
    path: String,
    policy: LoadBalancePolicy,
    backends: Vec<Arc<Backend>>,
    cursor: AtomicU64,
    checker: Mutex<Option<HealthChecker>>,
}

impl LoadBalancer {
    pub fn from_route(route: &RouteConfig) -> Self {
        let backends = route
            .backends
            .iter()
            .map(|cfg| Arc::new(Backend::from_config(cfg)))
            .collect::<Vec<_>>();

        Self {
            path: route.path.clone(),
            policy: route.load_balancing.unwrap_or_default(),
            backends,
            cursor: AtomicU64::new(0),
            checker: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn policy(&self) -> LoadBalancePolicy {
        self.policy
    }

    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub fn healthy_count(&self) -> usize {
        self.backends.iter().filter(|b| b.is_healthy()).count()
    }

    /// Selects a backend under the configured policy.
    ///
    /// Selection operates over the healthy subset. When every backend is
    /// unhealthy the full set is used instead: with nothing better on
    /// offer, letting the request try is the documented fallback, not an
    /// error.
    pub fn select(&self) -> Option<Arc<Backend>> {
        if self.backends.is_empty() {
            return None;
        }

        let healthy: Vec<&Arc<Backend>> =
            self.backends.iter().filter(|b| b.is_healthy()).collect();
        let pool: Vec<&Arc<Backend>> = if healthy.is_empty() {
            self.backends.iter().collect()
        } else {
            healthy
        };

        let selected = match self.policy {
            LoadBalancePolicy::RoundRobin => {
                let index = self.cursor.fetch_add(1, Ordering::Relaxed) as usize % pool.len();
                pool[index]
            }
            LoadBalancePolicy::WeightedRoundRobin => {
                let total: u64 = pool.iter().map(|b| u64::from(b.weight.max(1))).sum();
                let position = self.cursor.fetch_add(1, Ordering::Relaxed) % total;
                let mut accumulated = 0u64;
                let mut chosen = pool[0];
                for &backend in &pool {
                    accumulated += u64::from(backend.weight.max(1));
                    if accumulated > position {
                        chosen = backend;
                        break;
                    }
                }
                chosen
            }
            LoadBalancePolicy::LeastConnections => *pool
                .iter()
                .min_by_key(|b| b.active_connections())
                .expect("pool is non-empty"),
        };

        Some(Arc::clone(selected))
    }

    /// Starts the periodic health checker for this pool.
    pub fn start_health_checks(&self, cfg: HealthCheckConfig, dialers: Arc<DialerCache>) {
        let checker = HealthChecker::spawn(
            self.path.clone(),
            self.backends.clone(),
            cfg,
            dialers,
        );
        info!("Started health checker for route {}", self.path);
        *self.checker.lock().unwrap() = Some(checker);
    }

    /// Stops the health checker, waiting for in-flight probes to finish.
    pub async fn stop(&self) {
        let checker = self.checker.lock().unwrap().take();
        if let Some(checker) = checker {
            checker.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::duration::ConfigDuration;

    fn backend_cfg(service: &str, weight: u32) -> BackendConfig {
        BackendConfig {
            ziti_service: service.to_string(),
            port: 0,
            identity_file: Some("/id.json".to_string()),
            weight,
            priority: 0,
            timeout: Some(ConfigDuration::from_secs(5)),
            max_retries: Some(3),
        }
    }

    fn route_cfg(backends: Vec<BackendConfig>, policy: LoadBalancePolicy) -> RouteConfig {
        RouteConfig {
            path: "/test".to_string(),
            methods: Vec::new(),
            backends,
            load_balancing: Some(policy),
            health_check: None,
            retry: None,
            circuit_breaker: None,
            strip_prefix: false,
            add_prefix: String::new(),
            rewrite_host: false,
            timeout: None,
            auth: None,
        }
    }

    #[test]
    fn authority_omits_default_ports() {
        let mut cfg = backend_cfg("svc", 1);
        assert_eq!(Backend::from_config(&cfg).authority(), "svc");

        cfg.port = 80;
        assert_eq!(Backend::from_config(&cfg).authority(), "svc");

        cfg.port = 8080;
        assert_eq!(Backend::from_config(&cfg).authority(), "svc:8080");
    }

    #[test]
    fn round_robin_is_fair() {
        let lb = LoadBalancer::from_route(&route_cfg(
            vec![backend_cfg("a", 1), backend_cfg("b", 1), backend_cfg("c", 1)],
            LoadBalancePolicy::RoundRobin,
        ));

        let mut counts = std::collections::HashMap::new();
        for _ in 0..9 {
            let backend = lb.select().unwrap();
            *counts.entry(backend.service.clone()).or_insert(0) += 1;
        }
        assert_eq!(counts["a"], 3);
        assert_eq!(counts["b"], 3);
        assert_eq!(counts["c"], 3);
    }

    #[test]
    fn weighted_round_robin_follows_weights() {
        let lb = LoadBalancer::from_route(&route_cfg(
            vec![backend_cfg("heavy", 3), backend_cfg("light", 1)],
            LoadBalancePolicy::WeightedRoundRobin,
        ));

        let mut counts = std::collections::HashMap::new();
        for _ in 0..8 {
            let backend = lb.select().unwrap();
            *counts.entry(backend.service.clone()).or_insert(0) += 1;
        }
        assert_eq!(counts["heavy"], 6);
        assert_eq!(counts["light"], 2);
    }

    #[test]
    fn least_connections_prefers_idle_backend_with_tie_break() {
        let lb = LoadBalancer::from_route(&route_cfg(
            vec![backend_cfg("a", 1), backend_cfg("b", 1)],
            LoadBalancePolicy::LeastConnections,
        ));

        // tie: earlier backend wins
        assert_eq!(lb.select().unwrap().service, "a");

        let busy = lb.backends()[0].clone();
        let _guard = ConnGuard::acquire(busy);
        assert_eq!(lb.select().unwrap().service, "b");
    }

    #[test]
    fn conn_guard_pairs_increment_with_decrement() {
        let lb = LoadBalancer::from_route(&route_cfg(
            vec![backend_cfg("a", 1)],
            LoadBalancePolicy::RoundRobin,
        ));
        let backend = lb.backends()[0].clone();

        assert_eq!(backend.active_connections(), 0);
        {
            let _guard = ConnGuard::acquire(backend.clone());
            assert_eq!(backend.active_connections(), 1);
        }
        assert_eq!(backend.active_connections(), 0);
    }

    #[test]
    fn three_request_failures_mark_unhealthy() {
        let lb = LoadBalancer::from_route(&route_cfg(
            vec![backend_cfg("a", 1)],
            LoadBalancePolicy::RoundRobin,
        ));
        let backend = &lb.backends()[0];

        backend.record_failure();
        backend.record_failure();
        assert!(backend.is_healthy());
        backend.record_failure();
        assert!(!backend.is_healthy());
    }

    #[test]
    fn success_resets_failure_streak() {
        let lb = LoadBalancer::from_route(&route_cfg(
            vec![backend_cfg("a", 1)],
            LoadBalancePolicy::RoundRobin,
        ));
        let backend = &lb.backends()[0];

        backend.record_failure();
        backend.record_failure();
        backend.record_success();
        backend.record_failure();
        backend.record_failure();
        assert!(backend.is_healthy());
    }

    #[test]
    fn selection_falls_back_to_full_set_when_all_unhealthy() {
        let lb = LoadBalancer::from_route(&route_cfg(
            vec![backend_cfg("a", 1), backend_cfg("b", 1)],
            LoadBalancePolicy::RoundRobin,
        ));

        for backend in lb.backends() {
            for _ in 0..3 {
                backend.record_failure();
            }
        }
        assert_eq!(lb.healthy_count(), 0);
        assert!(lb.select().is_some());
    }

    #[test]
    fn probe_thresholds_flip_health_both_ways() {
        let cfg = HealthCheckConfig {
            enabled: true,
            interval: ConfigDuration::from_secs(1),
            timeout: ConfigDuration::from_secs(1),
            path: "/".to_string(),
            expected_status: 200,
            failure_count: 2,
            success_count: 2,
        };
        let backend = Backend::from_config(&backend_cfg("a", 1));

        assert!(backend.record_probe(false, &cfg).is_none());
        assert_eq!(backend.record_probe(false, &cfg), Some(false));
        assert!(!backend.is_healthy());

        assert!(backend.record_probe(true, &cfg).is_none());
        assert_eq!(backend.record_probe(true, &cfg), Some(true));
        assert!(backend.is_healthy());
    }
}
