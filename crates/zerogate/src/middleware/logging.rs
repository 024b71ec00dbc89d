//! Per-request logging middleware.
//!
//! Captures the response status by running after the rest of the chain and
//! emits one record per request in either JSON or text form. Paths matching
//! a configured exclude prefix are skipped entirely, which keeps probes and
//! introspection endpoints out of the logs.

use crate::models::settings::LogFormat;
use crate::services::supervisor::SharedState;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header,
    Error,
};
use futures_util::future::{ok, LocalBoxFuture, Ready};
use log::info;
use std::rc::Rc;
use std::time::Instant;
use uuid::Uuid;

pub struct RequestLog {
    state: SharedState,
}

impl RequestLog {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequestLog
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: actix_web::body::MessageBody + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = RequestLogMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RequestLogMiddleware {
            service: Rc::new(service),
            state: self.state.clone(),
        })
    }
}

pub struct RequestLogMiddleware<S> {
    service: Rc<S>,
    state: SharedState,
}

impl<S, B> Service<ServiceRequest> for RequestLogMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: actix_web::body::MessageBody + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let state = self.state.load_full();

        let logging = &state.logging;
        let skip = !logging.enabled
            || logging
                .exclude_paths
                .iter()
                .any(|prefix| req.path().starts_with(prefix.as_str()));

        if skip {
            let fut = service.call(req);
            return Box::pin(fut);
        }

        let format = logging.format;
        let started = Instant::now();
        let request_id = Uuid::new_v4();
        let method = req.method().to_string();
        let path = req.path().to_string();
        let query = req.query_string().to_string();
        let remote = req
            .connection_info()
            .realip_remote_addr()
            .unwrap_or("-")
            .to_string();
        let user_agent = req
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-")
            .to_string();

        Box::pin(async move {
            let res = service.call(req).await?;

            let status = res.status().as_u16();
            let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

            match format {
                LogFormat::Json => {
                    info!(
                        "{}",
                        serde_json::json!({
                            "request_id": request_id.to_string(),
                            "method": method,
                            "path": path,
                            "query": query,
                            "status": status,
                            "duration_ms": duration_ms,
                            "remote": remote,
                            "user_agent": user_agent,
                        })
                    );
                }
                LogFormat::Text => {
                    info!(
                        "{} {} {}{} {} {:.2}ms {} \"{}\"",
                        request_id,
                        method,
                        path,
                        if query.is_empty() {
                            String::new()
                        } else {
                            format!("?{}", query)
                        },
                        status,
                        duration_ms,
                        remote,
                        user_agent,
                    );
                }
            }

            Ok(res)
        })
    }
}
