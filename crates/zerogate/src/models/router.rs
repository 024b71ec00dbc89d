use crate::models::duration::ConfigDuration;
use crate::models::settings::AuthSettings;
use serde::{Deserialize, Serialize};

/// Load balancing policy for distributing requests across route backends.
///
/// # Policies
///
/// - **RoundRobin**: circular order over the healthy subset (default)
/// - **WeightedRoundRobin**: proportional to backend weights
/// - **LeastConnections**: backend with the fewest in-flight requests
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LoadBalancePolicy {
    /// Shared counter modulo pool size. Best for backends with similar
    /// capacity.
    RoundRobin,

    /// Walks the pool accumulating weight until the counter position is
    /// covered. Weights below 1 count as 1.
    WeightedRoundRobin,

    /// Scans the pool for the smallest active-connection count; ties go to
    /// the earlier backend.
    LeastConnections,
}

impl Default for LoadBalancePolicy {
    fn default() -> Self {
        Self::RoundRobin
    }
}

impl LoadBalancePolicy {
    /// Wire name of the policy, as it appears in configuration and in
    /// status snapshots.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round-robin",
            Self::WeightedRoundRobin => "weighted-round-robin",
            Self::LeastConnections => "least-connections",
        }
    }
}

/// One reachable instance of an overlay service, bound to a single identity.
///
/// # Examples
///
/// ```json
/// {
///   "ziti_service": "billing-api",
///   "identity_file": "/etc/zerogate/billing.json",
///   "port": 8080,
///   "weight": 2
/// }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BackendConfig {
    /// Overlay service name to dial. Has no globally-routable address; the
    /// identity decides what it resolves to.
    pub ziti_service: String,

    /// Logical port for the outbound host header. `0` (and `80`) omit the
    /// port from the authority.
    #[serde(default)]
    pub port: u16,

    /// Identity document authorizing the dial. Missing values inherit
    /// `auth.ziti.identity_file`.
    #[serde(default)]
    pub identity_file: Option<String>,

    /// Weight for weighted-round-robin selection (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Ordering hint among backends; lower is preferred. Carried through
    /// configuration but not consulted by the selection policies.
    #[serde(default)]
    pub priority: u32,

    /// Per-attempt timeout. Falls back to the route, then global default,
    /// then 30 s.
    #[serde(default)]
    pub timeout: Option<ConfigDuration>,

    /// Attempt budget when the route declares no retry policy.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

fn default_weight() -> u32 {
    1
}

impl BackendConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.ziti_service.is_empty() {
            return Err("Backend ziti_service must not be empty".to_string());
        }

        match &self.identity_file {
            Some(path) if !path.is_empty() => {}
            _ => {
                return Err(format!(
                    "Backend {} has no identity_file and auth.ziti.identity_file is not set",
                    self.ziti_service
                ))
            }
        }

        if self.weight == 0 {
            return Err("Backend weight must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// Active health check configuration for a route's backends.
///
/// A dedicated checker probes each backend over the overlay at `interval`,
/// comparing the response status to `expected_status`. Threshold counters
/// flip the backend's healthy flag in both directions.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HealthCheckConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Probe period (default: 10s).
    #[serde(default = "default_hc_interval")]
    pub interval: ConfigDuration,

    /// Per-probe timeout (default: 5s).
    #[serde(default = "default_hc_timeout")]
    pub timeout: ConfigDuration,

    /// Path probed on each backend (default: "/").
    #[serde(default = "default_hc_path")]
    pub path: String,

    /// Status code that counts as a success (default: 200).
    #[serde(default = "default_hc_status")]
    pub expected_status: u16,

    /// Consecutive failures before the backend is marked unhealthy
    /// (default: 3).
    #[serde(default = "default_hc_failures")]
    pub failure_count: u32,

    /// Consecutive successes before an unhealthy backend is marked healthy
    /// again (default: 2).
    #[serde(default = "default_hc_successes")]
    pub success_count: u32,
}

fn default_enabled() -> bool {
    true
}

fn default_hc_interval() -> ConfigDuration {
    ConfigDuration::from_secs(10)
}

fn default_hc_timeout() -> ConfigDuration {
    ConfigDuration::from_secs(5)
}

fn default_hc_path() -> String {
    "/".to_string()
}

fn default_hc_status() -> u16 {
    200
}

fn default_hc_failures() -> u32 {
    3
}

fn default_hc_successes() -> u32 {
    2
}

impl HealthCheckConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.path.starts_with('/') {
            return Err("Health check path must start with '/'".to_string());
        }
        if self.enabled && self.interval.is_zero() {
            return Err("Health check interval must be greater than zero".to_string());
        }
        if self.failure_count == 0 || self.success_count == 0 {
            return Err("Health check thresholds must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Retry policy for transient upstream failures.
///
/// The back-off between attempts is linear: `initial_interval × attempt`,
/// capped at `max_interval`. `multiplier` is accepted for compatibility but
/// does not bend the curve.
///
/// # Examples
///
/// ```json
/// {
///   "max_attempts": 3,
///   "initial_interval": "500ms",
///   "max_interval": "5s",
///   "retryable_status": [502, 503, 504]
/// }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempt budget, including the first attempt (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base back-off step (default: 1s).
    #[serde(default = "default_initial_interval")]
    pub initial_interval: ConfigDuration,

    /// Back-off ceiling (default: 30s).
    #[serde(default = "default_max_interval")]
    pub max_interval: ConfigDuration,

    /// Accepted but inert; back-off grows linearly with the attempt index.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Status codes that trigger a retry. Empty means every 5xx.
    #[serde(default)]
    pub retryable_status: Vec<u16>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_interval() -> ConfigDuration {
    ConfigDuration::from_secs(1)
}

fn default_max_interval() -> ConfigDuration {
    ConfigDuration::from_secs(30)
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_interval: default_initial_interval(),
            max_interval: default_max_interval(),
            multiplier: default_multiplier(),
            retryable_status: Vec::new(),
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("Retry max_attempts must be at least 1".to_string());
        }
        if self.max_attempts > 10 {
            return Err("Retry max_attempts should not exceed 10".to_string());
        }
        if self.initial_interval > self.max_interval {
            return Err("Retry initial_interval cannot exceed max_interval".to_string());
        }
        if self.multiplier < 1.0 {
            return Err("Retry multiplier must be >= 1.0".to_string());
        }
        Ok(())
    }

    /// Whether `status` should be retried under this policy. An empty list
    /// retries the whole 5xx range.
    pub fn is_retryable(&self, status: u16) -> bool {
        if self.retryable_status.is_empty() {
            (500..=599).contains(&status)
        } else {
            self.retryable_status.contains(&status)
        }
    }

    /// Linear back-off before attempt `attempt` (1-based), capped at
    /// `max_interval`.
    pub fn backoff(&self, attempt: u32) -> std::time::Duration {
        let step = self
            .initial_interval
            .as_duration()
            .saturating_mul(attempt.max(1));
        step.min(self.max_interval.as_duration())
    }
}

/// Circuit breaker configuration. Parsed and validated, but the request
/// path does not consult it yet.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_cb_failures")]
    pub failure_threshold: u32,

    #[serde(default = "default_cb_successes")]
    pub success_threshold: u32,

    #[serde(default = "default_cb_timeout")]
    pub timeout: ConfigDuration,

    #[serde(default = "default_cb_half_open")]
    pub half_open_requests: u32,
}

fn default_cb_failures() -> u32 {
    5
}

fn default_cb_successes() -> u32 {
    3
}

fn default_cb_timeout() -> ConfigDuration {
    ConfigDuration::from_secs(30)
}

fn default_cb_half_open() -> u32 {
    1
}

/// One inbound routing rule: a path pattern plus the backends and per-route
/// policies that serve it.
///
/// Path patterns are exact (`/health`), parameterized (`/users/:id`), or
/// wildcarded (`/api/*`). A pattern carries at most one wildcard; named
/// parameters capture single path segments.
///
/// # Examples
///
/// ```json
/// {
///   "path": "/api/v1/*",
///   "methods": ["GET", "POST"],
///   "backends": [
///     { "ziti_service": "api-a", "weight": 3 },
///     { "ziti_service": "api-b", "weight": 1 }
///   ],
///   "load_balancing": "weighted-round-robin",
///   "strip_prefix": true,
///   "add_prefix": "/internal",
///   "retry": { "max_attempts": 2, "retryable_status": [503] }
/// }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RouteConfig {
    /// Inbound path pattern. Exact patterns are matched with a hash lookup;
    /// patterns with `:name` parameters or `*` wildcards compile to anchored
    /// regular expressions tried in declaration order.
    pub path: String,

    /// Allowed HTTP methods. An empty list allows every method.
    #[serde(default)]
    pub methods: Vec<String>,

    /// Backends serving this route. Must not be empty.
    pub backends: Vec<BackendConfig>,

    /// Selection policy over the backends. Inherits `defaults.load_balancing`.
    #[serde(default)]
    pub load_balancing: Option<LoadBalancePolicy>,

    #[serde(default)]
    pub health_check: Option<HealthCheckConfig>,

    #[serde(default)]
    pub retry: Option<RetryConfig>,

    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,

    /// Trim the pattern's static prefix from the inbound path before
    /// forwarding.
    #[serde(default)]
    pub strip_prefix: bool,

    /// Prefix prepended to the (possibly stripped) path.
    #[serde(default)]
    pub add_prefix: String,

    /// Overwrite the upstream `Host` header with the backend authority.
    #[serde(default)]
    pub rewrite_host: bool,

    /// Per-route request timeout. Inherits `defaults.timeout`.
    #[serde(default)]
    pub timeout: Option<ConfigDuration>,

    /// Route-level authentication. Overrides the global block when both are
    /// configured and differ.
    #[serde(default)]
    pub auth: Option<AuthSettings>,
}

const VALID_METHODS: &[&str] = &[
    "GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "PATCH", "TRACE",
];

impl RouteConfig {
    /// Validates pattern syntax, methods, backends and nested policies.
    ///
    /// Expected to run after defaults propagation so that inherited fields
    /// (backend identities in particular) are already filled in.
    pub fn validate(&self) -> Result<(), String> {
        if !self.path.starts_with('/') {
            return Err(format!("Route path must start with '/': {}", self.path));
        }

        Self::validate_pattern(&self.path)?;

        for method in &self.methods {
            if !VALID_METHODS.contains(&method.as_str()) {
                return Err(format!("Invalid HTTP method: {}", method));
            }
        }

        if self.backends.is_empty() {
            return Err(format!("Route {} has no backends", self.path));
        }

        for (i, backend) in self.backends.iter().enumerate() {
            backend
                .validate()
                .map_err(|e| format!("Route {} backend {}: {}", self.path, i, e))?;
        }

        if let Some(hc) = &self.health_check {
            hc.validate()
                .map_err(|e| format!("Route {}: {}", self.path, e))?;
        }

        if let Some(retry) = &self.retry {
            retry
                .validate()
                .map_err(|e| format!("Route {}: {}", self.path, e))?;
        }

        if let Some(auth) = &self.auth {
            auth.validate()
                .map_err(|e| format!("Route {}: {}", self.path, e))?;
        }

        Ok(())
    }

    fn validate_pattern(pattern: &str) -> Result<(), String> {
        if pattern.matches('*').count() > 1 {
            return Err(format!(
                "Route pattern may contain at most one wildcard: {}",
                pattern
            ));
        }

        let mut chars = pattern.chars().peekable();
        while let Some(ch) = chars.next() {
            if ch == ':' {
                let mut name = String::new();
                while let Some(&next) = chars.peek() {
                    if next == '/' {
                        break;
                    }
                    if !(next.is_alphanumeric() || next == '_') {
                        return Err(format!(
                            "Invalid parameter name in route pattern: {}",
                            pattern
                        ));
                    }
                    name.push(next);
                    chars.next();
                }
                if name.is_empty() {
                    return Err(format!(
                        "Empty parameter name in route pattern: {}",
                        pattern
                    ));
                }
            }
        }

        Ok(())
    }

    /// Whether `method` is allowed on this route. An empty method set
    /// allows everything.
    pub fn allows_method(&self, method: &str) -> bool {
        self.methods.is_empty() || self.methods.iter().any(|m| m == method)
    }
}
