//! CORS middleware.
//!
//! Echoes the request origin when any allowed entry is `*` or matches it
//! exactly. Preflight requests short-circuit with 204 once the headers are
//! set; other requests get the headers appended to whatever the downstream
//! chain produced.

use crate::models::settings::CorsSettings;
use crate::services::supervisor::SharedState;
use actix_web::{
    body::BoxBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header,
    http::header::HeaderValue,
    http::Method,
    Error, HttpResponse,
};
use futures_util::future::{ok, LocalBoxFuture, Ready};
use std::rc::Rc;

pub struct Cors {
    state: SharedState,
}

impl Cors {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Cors
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: actix_web::body::MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = CorsMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(CorsMiddleware {
            service: Rc::new(service),
            state: self.state.clone(),
        })
    }
}

pub struct CorsMiddleware<S> {
    service: Rc<S>,
    state: SharedState,
}

/// The origin to echo back, if the request origin is acceptable.
fn echoed_origin(cors: &CorsSettings, origin: Option<&str>) -> Option<String> {
    let origin = origin?;
    cors.allowed_origins
        .iter()
        .find(|allowed| *allowed == "*" || allowed.as_str() == origin)
        .map(|_| origin.to_string())
}

fn apply_headers<F>(cors: &CorsSettings, origin: &str, mut insert: F)
where
    F: FnMut(header::HeaderName, String),
{
    insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.to_string());

    if cors.allow_credentials {
        insert(header::ACCESS_CONTROL_ALLOW_CREDENTIALS, "true".to_string());
    }
    if !cors.allowed_methods.is_empty() {
        insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            cors.allowed_methods.join(", "),
        );
    }
    if !cors.allowed_headers.is_empty() {
        insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            cors.allowed_headers.join(", "),
        );
    }
    if !cors.exposed_headers.is_empty() {
        insert(
            header::ACCESS_CONTROL_EXPOSE_HEADERS,
            cors.exposed_headers.join(", "),
        );
    }
    if let Some(max_age) = cors.max_age {
        insert(header::ACCESS_CONTROL_MAX_AGE, max_age.to_string());
    }
}

impl<S, B> Service<ServiceRequest> for CorsMiddleware<S>
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
            let cors = &state.cors;
            if !cors.enabled {
                let res = service.call(req).await?;
                return Ok(res.map_into_boxed_body());
            }

            let origin = req
                .headers()
                .get(header::ORIGIN)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());
            let echoed = echoed_origin(cors, origin.as_deref());

            // Preflight short-circuits after headers are set.
            if req.method() == Method::OPTIONS {
                let mut response = HttpResponse::NoContent();
                if let Some(origin) = &echoed {
                    apply_headers(cors, origin, |name, value| {
                        if let Ok(value) = HeaderValue::from_str(&value) {
                            response.insert_header((name, value));
                        }
                    });
                }
                return Ok(req.into_response(response.finish()));
            }

            let mut res = service.call(req).await?.map_into_boxed_body();
            if let Some(origin) = &echoed {
                let headers = res.headers_mut();
                apply_headers(cors, origin, |name, value| {
                    if let Ok(value) = HeaderValue::from_str(&value) {
                        headers.insert(name, value);
                    }
                });
            }
            Ok(res)
        })
    }
}
