//! Global request deadline middleware.
//!
//! Bounds the whole downstream chain, forwarder attempts included, with the
//! configured default timeout. A missing or zero timeout disables the
//! guard.

use crate::models::error::GatewayError;
use crate::services::supervisor::SharedState;
use actix_web::{
    body::BoxBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    error::ResponseError,
    Error,
};
use futures_util::future::{ok, LocalBoxFuture, Ready};
use log::warn;
use std::rc::Rc;

pub struct TimeoutGuard {
    state: SharedState,
}

impl TimeoutGuard {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }
}

impl<S, B> Transform<S, ServiceRequest> for TimeoutGuard
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: actix_web::body::MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = TimeoutGuardMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(TimeoutGuardMiddleware {
            service: Rc::new(service),
            state: self.state.clone(),
        })
    }
}

pub struct TimeoutGuardMiddleware<S> {
    service: Rc<S>,
    state: SharedState,
}

impl<S, B> Service<ServiceRequest> for TimeoutGuardMiddleware<S>
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
        let deadline = self.state.load().request_timeout;
        let request = req.request().clone();

        Box::pin(async move {
            let deadline = match deadline {
                Some(d) if !d.is_zero() => d,
                _ => {
                    let res = service.call(req).await?;
                    return Ok(res.map_into_boxed_body());
                }
            };

            match tokio::time::timeout(deadline, service.call(req)).await {
                Ok(result) => result.map(|res| res.map_into_boxed_body()),
                Err(_) => {
                    warn!(
                        "Request {} {} exceeded deadline {:?}",
                        request.method(),
                        request.path(),
                        deadline
                    );
                    let response = GatewayError::Timeout(deadline).error_response();
                    Ok(ServiceResponse::new(request, response))
                }
            }
        })
    }
}
