use crate::models::duration::ConfigDuration;
use crate::models::router::{
    CircuitBreakerConfig, HealthCheckConfig, LoadBalancePolicy, RetryConfig, RouteConfig,
};
use serde::{Deserialize, Serialize};

/// Hardcoded last-resort request timeout when neither backend, route nor
/// global defaults configure one.
pub const FALLBACK_TIMEOUT: ConfigDuration = ConfigDuration::from_secs(30);

/// Last-resort attempt budget when neither backend nor defaults configure
/// one.
pub const FALLBACK_MAX_RETRIES: u32 = 3;

/// Listener configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub read_timeout: Option<ConfigDuration>,

    #[serde(default)]
    pub write_timeout: Option<ConfigDuration>,

    #[serde(default)]
    pub idle_timeout: Option<ConfigDuration>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            read_timeout: None,
            write_timeout: None,
            idle_timeout: None,
        }
    }
}

/// Authentication scheme selector.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AuthKind {
    /// Shared secret in a request header, compared in constant time.
    ApiKey,
    /// Signed JSON claims token with issuer/audience/claim validation.
    Jwt,
    /// RFC 7617 basic credentials compared in constant time.
    Basic,
    /// Admit everything.
    None,
}

impl Default for AuthKind {
    fn default() -> Self {
        Self::None
    }
}

/// Bearer-token validation parameters.
///
/// `secret` backs the HMAC algorithms; asymmetric algorithms read the
/// public key PEM from `public_key_file` at configuration load.
///
/// # Examples
///
/// ```json
/// {
///   "secret": "0123456789abcdef0123456789abcdef",
///   "algorithm": "HS256",
///   "issuer": "zerogate",
///   "audience": ["internal-api"],
///   "required_claims": ["sub"]
/// }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JwtSettings {
    #[serde(default)]
    pub secret: Option<String>,

    #[serde(default)]
    pub public_key_file: Option<String>,

    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    #[serde(default)]
    pub issuer: Option<String>,

    /// Token must carry at least one of these audiences when non-empty.
    #[serde(default)]
    pub audience: Vec<String>,

    /// Claims that must be present in the token payload.
    #[serde(default)]
    pub required_claims: Vec<String>,
}

fn default_algorithm() -> String {
    "HS256".to_string()
}

impl Default for JwtSettings {
    fn default() -> Self {
        Self {
            secret: None,
            public_key_file: None,
            algorithm: default_algorithm(),
            issuer: None,
            audience: Vec::new(),
            required_claims: Vec::new(),
        }
    }
}

const HMAC_ALGORITHMS: &[&str] = &["HS256", "HS384", "HS512"];
const ASYMMETRIC_ALGORITHMS: &[&str] = &[
    "RS256", "RS384", "RS512", "PS256", "PS384", "PS512", "ES256", "ES384", "EdDSA",
];

impl JwtSettings {
    pub fn validate(&self) -> Result<(), String> {
        let hmac = HMAC_ALGORITHMS.contains(&self.algorithm.as_str());
        let asymmetric = ASYMMETRIC_ALGORITHMS.contains(&self.algorithm.as_str());

        if !hmac && !asymmetric {
            return Err(format!("Unknown JWT algorithm: {}", self.algorithm));
        }

        if hmac && self.secret.as_deref().unwrap_or("").is_empty() {
            return Err(format!(
                "JWT algorithm {} requires a non-empty secret",
                self.algorithm
            ));
        }

        if asymmetric && self.public_key_file.as_deref().unwrap_or("").is_empty() {
            return Err(format!(
                "JWT algorithm {} requires public_key_file",
                self.algorithm
            ));
        }

        Ok(())
    }
}

/// Overlay identity bound to the authentication block; backends without
/// their own `identity_file` inherit it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ZitiSettings {
    pub identity_file: String,
}

/// Authentication configuration, usable globally and per route.
///
/// # Examples
///
/// ```json
/// {
///   "type": "api-key",
///   "header": "X-API-Key",
///   "keys": ["k1", "k2"],
///   "bypass": ["/health"]
/// }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct AuthSettings {
    #[serde(rename = "type", default)]
    pub kind: AuthKind,

    /// Header carrying the credential. Defaults to `X-API-Key` for api-key
    /// and `Authorization` for jwt.
    #[serde(default)]
    pub header: Option<String>,

    /// Allowed credentials for api-key (opaque values) and basic
    /// (`user:pass` pairs).
    #[serde(default)]
    pub keys: Vec<String>,

    /// Path prefixes admitted without evaluation.
    #[serde(default)]
    pub bypass: Vec<String>,

    #[serde(default)]
    pub jwt: Option<JwtSettings>,

    #[serde(default)]
    pub ziti: Option<ZitiSettings>,
}

impl AuthSettings {
    pub fn validate(&self) -> Result<(), String> {
        match self.kind {
            AuthKind::None => Ok(()),
            AuthKind::ApiKey => {
                if self.keys.is_empty() {
                    return Err("api-key auth requires at least one key".to_string());
                }
                Ok(())
            }
            AuthKind::Basic => {
                if self.keys.is_empty() {
                    return Err("basic auth requires at least one user:pass entry".to_string());
                }
                for entry in &self.keys {
                    if !entry.contains(':') {
                        return Err(format!(
                            "basic auth entry must be user:pass, got {:?}",
                            entry
                        ));
                    }
                }
                Ok(())
            }
            AuthKind::Jwt => match &self.jwt {
                Some(jwt) => jwt.validate(),
                None => Err("jwt auth requires a jwt block".to_string()),
            },
        }
    }
}

/// CORS response configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct CorsSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub allowed_origins: Vec<String>,

    #[serde(default)]
    pub allowed_methods: Vec<String>,

    #[serde(default)]
    pub allowed_headers: Vec<String>,

    #[serde(default)]
    pub exposed_headers: Vec<String>,

    #[serde(default)]
    pub allow_credentials: bool,

    #[serde(default)]
    pub max_age: Option<u32>,
}

/// Request log output format.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

impl Default for LogFormat {
    fn default() -> Self {
        Self::Text
    }
}

/// Request logging configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,

    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    /// Log request bodies too. Accepted for compatibility; bodies are never
    /// logged by the middleware.
    #[serde(default)]
    pub include_body: bool,

    /// Requests whose path starts with any of these prefixes are not
    /// logged.
    #[serde(default)]
    pub exclude_paths: Vec<String>,
}

fn default_logging_enabled() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            level: default_log_level(),
            format: LogFormat::default(),
            include_body: false,
            exclude_paths: Vec::new(),
        }
    }
}

/// Global fallbacks propagated into routes and backends at load time.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct DefaultsSettings {
    #[serde(default)]
    pub timeout: Option<ConfigDuration>,

    #[serde(default)]
    pub max_retries: Option<u32>,

    #[serde(default)]
    pub load_balancing: Option<LoadBalancePolicy>,

    #[serde(default)]
    pub health_check: Option<HealthCheckConfig>,

    #[serde(default)]
    pub retry: Option<RetryConfig>,

    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

/// The whole configuration document.
///
/// Loaded from a single JSON file; [`Settings::apply_defaults`] materializes
/// the top-down fallback chains before [`Settings::validate`] runs, so a
/// validated document always has concrete per-backend timeouts, retry
/// budgets and identities.
///
/// # Configuration File Format
///
/// ```json
/// {
///   "server": { "host": "0.0.0.0", "port": 8080 },
///   "auth": {
///     "type": "api-key",
///     "keys": ["k1"],
///     "bypass": ["/health"],
///     "ziti": { "identity_file": "/etc/zerogate/identity.json" }
///   },
///   "routes": [
///     {
///       "path": "/api/v1/*",
///       "backends": [{ "ziti_service": "api" }]
///     }
///   ],
///   "defaults": { "timeout": "30s", "max_retries": 3 }
/// }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub auth: AuthSettings,

    #[serde(default)]
    pub cors: CorsSettings,

    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub routes: Vec<RouteConfig>,

    #[serde(default)]
    pub defaults: DefaultsSettings,
}

impl Settings {
    /// Propagates defaults top-down: global → route → backend.
    ///
    /// Fallback chains:
    /// - route.timeout ← defaults.timeout ← 30 s (zero counts as missing)
    /// - backend.timeout ← route.timeout
    /// - backend.max_retries ← defaults.max_retries ← 3
    /// - backend.weight ← 1
    /// - backend.identity_file ← auth.ziti.identity_file
    /// - route.load_balancing ← defaults.load_balancing ← round-robin
    /// - route.health_check / retry / circuit_breaker ← defaults blocks
    ///
    /// Idempotent: applying twice yields the same document.
    pub fn apply_defaults(&mut self) {
        let global_timeout = match self.defaults.timeout {
            Some(t) if !t.is_zero() => t,
            _ => FALLBACK_TIMEOUT,
        };
        let global_retries = self.defaults.max_retries.unwrap_or(FALLBACK_MAX_RETRIES);
        let global_policy = self
            .defaults
            .load_balancing
            .unwrap_or(LoadBalancePolicy::RoundRobin);
        let default_identity = self.auth.ziti.as_ref().map(|z| z.identity_file.clone());

        for route in &mut self.routes {
            if route.timeout.map(|t| t.is_zero()).unwrap_or(true) {
                route.timeout = Some(global_timeout);
            }
            if route.load_balancing.is_none() {
                route.load_balancing = Some(global_policy);
            }
            if route.health_check.is_none() {
                route.health_check = self.defaults.health_check.clone();
            }
            if route.retry.is_none() {
                route.retry = self.defaults.retry.clone();
            }
            if route.circuit_breaker.is_none() {
                route.circuit_breaker = self.defaults.circuit_breaker.clone();
            }

            let route_timeout = route.timeout.unwrap_or(global_timeout);
            for backend in &mut route.backends {
                if backend.timeout.map(|t| t.is_zero()).unwrap_or(true) {
                    backend.timeout = Some(route_timeout);
                }
                if backend.max_retries.is_none() {
                    backend.max_retries = Some(global_retries);
                }
                if backend.weight == 0 {
                    backend.weight = 1;
                }
                if backend
                    .identity_file
                    .as_deref()
                    .unwrap_or("")
                    .is_empty()
                {
                    backend.identity_file = default_identity.clone();
                }
            }
        }
    }

    /// Validates the expanded document. Run after [`Self::apply_defaults`].
    pub fn validate(&self) -> Result<(), String> {
        self.auth.validate()?;

        for route in &self.routes {
            route.validate()?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn defaults_propagate_to_backends() {
        let mut settings: Settings = serde_json::from_str(
            r#"{
                "auth": { "ziti": { "identity_file": "/etc/id.json" } },
                "routes": [
                    { "path": "/a", "backends": [{ "ziti_service": "svc" }] }
                ],
                "defaults": { "timeout": "10s", "max_retries": 5 }
            }"#,
        )
        .unwrap();
        settings.apply_defaults();

        let backend = &settings.routes[0].backends[0];
        assert_eq!(
            backend.timeout.unwrap().as_duration(),
            Duration::from_secs(10)
        );
        assert_eq!(backend.max_retries, Some(5));
        assert_eq!(backend.identity_file.as_deref(), Some("/etc/id.json"));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn hardcoded_fallbacks_apply_without_defaults_block() {
        let mut settings: Settings = serde_json::from_str(
            r#"{
                "routes": [
                    { "path": "/a", "backends": [
                        { "ziti_service": "svc", "identity_file": "/id.json" }
                    ]}
                ]
            }"#,
        )
        .unwrap();
        settings.apply_defaults();

        let backend = &settings.routes[0].backends[0];
        assert_eq!(
            backend.timeout.unwrap().as_duration(),
            Duration::from_secs(30)
        );
        assert_eq!(backend.max_retries, Some(3));
    }

    #[test]
    fn backend_timeout_wins_over_route_and_defaults() {
        let mut settings: Settings = serde_json::from_str(
            r#"{
                "routes": [
                    { "path": "/a", "timeout": "20s", "backends": [
                        { "ziti_service": "svc", "identity_file": "/id.json",
                          "timeout": "2s" }
                    ]}
                ],
                "defaults": { "timeout": "10s" }
            }"#,
        )
        .unwrap();
        settings.apply_defaults();

        let backend = &settings.routes[0].backends[0];
        assert_eq!(
            backend.timeout.unwrap().as_duration(),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn apply_defaults_is_idempotent() {
        let mut settings: Settings = serde_json::from_str(
            r#"{
                "routes": [
                    { "path": "/a", "backends": [
                        { "ziti_service": "svc", "identity_file": "/id.json" }
                    ]}
                ],
                "defaults": { "retry": { "max_attempts": 2 } }
            }"#,
        )
        .unwrap();
        settings.apply_defaults();
        let once = settings.clone();
        settings.apply_defaults();
        assert_eq!(once, settings);
    }

    #[test]
    fn unknown_auth_type_is_rejected() {
        let result = serde_json::from_str::<Settings>(
            r#"{ "auth": { "type": "oauth2" }, "routes": [] }"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn jwt_auth_requires_block() {
        let settings: Settings =
            serde_json::from_str(r#"{ "auth": { "type": "jwt" }, "routes": [] }"#).unwrap();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn round_trip_after_expansion_is_idempotent() {
        let mut settings: Settings = serde_json::from_str(
            r#"{
                "server": { "port": 9000 },
                "auth": { "type": "api-key", "keys": ["k1"], "bypass": ["/health"] },
                "routes": [
                    { "path": "/users/:id", "methods": ["GET"], "backends": [
                        { "ziti_service": "users", "identity_file": "/id.json",
                          "weight": 2, "timeout": "5s" }
                    ]}
                ]
            }"#,
        )
        .unwrap();
        settings.apply_defaults();

        let encoded = serde_json::to_string(&settings).unwrap();
        let decoded: Settings = serde_json::from_str(&encoded).unwrap();
        assert_eq!(settings, decoded);
    }
}
