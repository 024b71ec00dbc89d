//! Authentication middleware for the gateway.
//!
//! The scheme is compiled once from [`AuthSettings`] when a configuration
//! loads: header names resolved, JWT keys read from disk, validation rules
//! materialized. The request path then only compares credentials. The same
//! compiled [`Authenticator`] backs both the global middleware and the
//! per-route override evaluated by the forwarder.

use crate::models::error::GatewayError;
use crate::models::settings::{AuthKind, AuthSettings};
use crate::services::supervisor::SharedState;
use actix_web::{
    body::BoxBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    error::ResponseError,
    http::header::HeaderMap,
    Error,
};
use base64::Engine;
use futures_util::future::{ok, LocalBoxFuture, Ready};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use log::{debug, warn};
use std::rc::Rc;
use subtle::ConstantTimeEq;

const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";
const DEFAULT_BEARER_HEADER: &str = "Authorization";

enum AuthScheme {
    None,
    ApiKey {
        header: String,
        keys: Vec<String>,
    },
    Basic {
        entries: Vec<String>,
    },
    Jwt {
        header: String,
        key: DecodingKey,
        validation: Validation,
        required_claims: Vec<String>,
    },
}

/// A compiled authentication scheme plus its bypass prefixes.
pub struct Authenticator {
    scheme: AuthScheme,
    bypass: Vec<String>,
}

impl Authenticator {
    /// Compiles the configured scheme. Reads asymmetric JWT keys from disk,
    /// so this runs at load/reload time, never on the request path.
    pub fn from_settings(settings: &AuthSettings) -> Result<Self, String> {
        let scheme = match settings.kind {
            AuthKind::None => AuthScheme::None,
            AuthKind::ApiKey => AuthScheme::ApiKey {
                header: settings
                    .header
                    .clone()
                    .unwrap_or_else(|| DEFAULT_API_KEY_HEADER.to_string()),
                keys: settings.keys.clone(),
            },
            AuthKind::Basic => AuthScheme::Basic {
                entries: settings.keys.clone(),
            },
            AuthKind::Jwt => {
                let jwt = settings
                    .jwt
                    .as_ref()
                    .ok_or_else(|| "jwt auth requires a jwt block".to_string())?;

                let algorithm: Algorithm = jwt
                    .algorithm
                    .parse()
                    .map_err(|_| format!("Unknown JWT algorithm: {}", jwt.algorithm))?;

                let key = match algorithm {
                    Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                        let secret = jwt
                            .secret
                            .as_deref()
                            .filter(|s| !s.is_empty())
                            .ok_or_else(|| {
                                format!("JWT algorithm {} requires a secret", jwt.algorithm)
                            })?;
                        DecodingKey::from_secret(secret.as_bytes())
                    }
                    other => {
                        let path = jwt
                            .public_key_file
                            .as_deref()
                            .filter(|p| !p.is_empty())
                            .ok_or_else(|| {
                                format!("JWT algorithm {} requires public_key_file", jwt.algorithm)
                            })?;
                        let pem = std::fs::read(path).map_err(|e| {
                            format!("Failed to read JWT public key {}: {}", path, e)
                        })?;
                        match other {
                            Algorithm::RS256
                            | Algorithm::RS384
                            | Algorithm::RS512
                            | Algorithm::PS256
                            | Algorithm::PS384
                            | Algorithm::PS512 => DecodingKey::from_rsa_pem(&pem)
                                .map_err(|e| format!("Invalid RSA public key {}: {}", path, e))?,
                            Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(&pem)
                                .map_err(|e| format!("Invalid EC public key {}: {}", path, e))?,
                            Algorithm::EdDSA => DecodingKey::from_ed_pem(&pem)
                                .map_err(|e| format!("Invalid Ed25519 public key {}: {}", path, e))?,
                            _ => unreachable!("HMAC handled above"),
                        }
                    }
                };

                let mut validation = Validation::new(algorithm);
                if let Some(issuer) = &jwt.issuer {
                    validation.set_issuer(&[issuer]);
                }
                if !jwt.audience.is_empty() {
                    validation.set_audience(&jwt.audience);
                }

                AuthScheme::Jwt {
                    header: settings
                        .header
                        .clone()
                        .unwrap_or_else(|| DEFAULT_BEARER_HEADER.to_string()),
                    key,
                    validation,
                    required_claims: jwt.required_claims.clone(),
                }
            }
        };

        Ok(Self {
            scheme,
            bypass: settings.bypass.clone(),
        })
    }

    /// Evaluates the request. Bypass prefixes admit without touching the
    /// credential at all.
    pub fn check(&self, path: &str, headers: &HeaderMap) -> Result<(), GatewayError> {
        if self.bypass.iter().any(|prefix| path.starts_with(prefix.as_str())) {
            return Ok(());
        }

        match &self.scheme {
            AuthScheme::None => Ok(()),

            AuthScheme::ApiKey { header, keys } => {
                let supplied = header_str(headers, header)
                    .ok_or(GatewayError::Unauthorized { basic: false })?;
                if constant_time_contains(keys, supplied) {
                    Ok(())
                } else {
                    Err(GatewayError::Unauthorized { basic: false })
                }
            }

            AuthScheme::Basic { entries } => {
                let supplied = header_str(headers, "Authorization")
                    .and_then(|v| v.strip_prefix("Basic "))
                    .ok_or(GatewayError::Unauthorized { basic: true })?;
                let decoded = base64::engine::general_purpose::STANDARD
                    .decode(supplied.trim())
                    .ok()
                    .and_then(|bytes| String::from_utf8(bytes).ok())
                    .ok_or(GatewayError::Unauthorized { basic: true })?;
                if constant_time_contains(entries, &decoded) {
                    Ok(())
                } else {
                    Err(GatewayError::Unauthorized { basic: true })
                }
            }

            AuthScheme::Jwt {
                header,
                key,
                validation,
                required_claims,
            } => {
                let raw = header_str(headers, header)
                    .ok_or(GatewayError::Unauthorized { basic: false })?;
                let token = raw.strip_prefix("Bearer ").unwrap_or(raw);

                let data = jsonwebtoken::decode::<serde_json::Map<String, serde_json::Value>>(
                    token, key, validation,
                )
                .map_err(|e| {
                    debug!("JWT validation failed: {}", e);
                    GatewayError::Unauthorized { basic: false }
                })?;

                for claim in required_claims {
                    if !data.claims.contains_key(claim) {
                        debug!("JWT missing required claim: {}", claim);
                        return Err(GatewayError::Unauthorized { basic: false });
                    }
                }

                Ok(())
            }
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Checks `candidate` against every allowed value in constant time. All
/// entries are always compared so that timing does not reveal which (if
/// any) entry matched.
fn constant_time_contains(allowed: &[String], candidate: &str) -> bool {
    let mut authorized = subtle::Choice::from(0u8);
    for entry in allowed {
        authorized |= entry.as_bytes().ct_eq(candidate.as_bytes());
    }
    authorized.into()
}

/// Global authentication gate.
///
/// Reads the current configuration's compiled authenticator on every
/// request, so a reload takes effect without reassembling the middleware
/// chain.
pub struct AuthGate {
    state: SharedState,
}

impl AuthGate {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthGate
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: actix_web::body::MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = AuthGateMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthGateMiddleware {
            service: Rc::new(service),
            state: self.state.clone(),
        })
    }
}

pub struct AuthGateMiddleware<S> {
    service: Rc<S>,
    state: SharedState,
}

impl<S, B> Service<ServiceRequest> for AuthGateMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: actix_web::body::MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let state = self.state.load_full();

        Box::pin(async move {
            // A route with its own differing auth block overrides the
            // global scheme; the forwarder enforces it after matching.
            let overridden = state
                .matcher
                .find(req.method().as_str(), req.path())
                .map(|m| state.route_auth.contains_key(&m.route.path))
                .unwrap_or(false);

            if overridden {
                let res = service.call(req).await?;
                return Ok(res.map_into_boxed_body());
            }

            match state.auth.check(req.path(), req.headers()) {
                Ok(()) => {
                    let res = service.call(req).await?;
                    Ok(res.map_into_boxed_body())
                }
                Err(err) => {
                    warn!("Rejected {} {}: {}", req.method(), req.path(), err);
                    let response = err.error_response();
                    Ok(req.into_response(response))
                }
            }
        })
    }
}
