use actix_web::http::header;
use actix_web::{HttpResponse, HttpResponseBuilder};
use serde_json::json;

/// Request-path errors with their user-visible status codes.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("No route configured for path: {path}")]
    RouteNotFound { path: String },

    #[error("Authentication required")]
    Unauthorized { basic: bool },

    #[error("No backend available for route: {path}")]
    NoBackend { path: String },

    #[error("Upstream request failed: {message}")]
    Upstream { message: String },

    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Internal proxy error: {0}")]
    Internal(String),
}

impl GatewayError {
    fn kind(&self) -> &'static str {
        match self {
            Self::RouteNotFound { .. } => "no_route",
            Self::Unauthorized { .. } => "authentication_error",
            Self::NoBackend { .. } => "no_backend",
            Self::Upstream { .. } => "upstream",
            Self::Timeout(_) => "timeout",
            Self::Internal(_) => "internal",
        }
    }
}

impl actix_web::error::ResponseError for GatewayError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            Self::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::NoBackend { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut builder = HttpResponseBuilder::new(self.status_code());

        if let Self::Unauthorized { basic: true } = self {
            builder.insert_header((
                header::WWW_AUTHENTICATE,
                "Basic realm=\"Restricted\"",
            ));
        }

        builder.json(json!({
            "error": self.to_string(),
            "type": self.kind(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::error::ResponseError;

    #[test]
    fn status_codes_match_error_kinds() {
        assert_eq!(
            GatewayError::RouteNotFound { path: "/x".into() }
                .status_code()
                .as_u16(),
            404
        );
        assert_eq!(
            GatewayError::Unauthorized { basic: false }
                .status_code()
                .as_u16(),
            401
        );
        assert_eq!(
            GatewayError::NoBackend { path: "/x".into() }
                .status_code()
                .as_u16(),
            503
        );
        assert_eq!(
            GatewayError::Upstream {
                message: "boom".into()
            }
            .status_code()
            .as_u16(),
            502
        );
    }

    #[test]
    fn basic_rejection_carries_www_authenticate() {
        let resp = GatewayError::Unauthorized { basic: true }.error_response();
        let value = resp
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .expect("missing WWW-Authenticate");
        assert_eq!(value.to_str().unwrap(), "Basic realm=\"Restricted\"");
    }
}
