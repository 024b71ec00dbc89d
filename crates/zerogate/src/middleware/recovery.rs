//! Panic recovery middleware.
//!
//! Outermost layer of the chain: any panic escaping a handler or a later
//! middleware is trapped here, logged, and turned into a 500 instead of
//! tearing down the connection.

use crate::models::error::GatewayError;
use actix_web::{
    body::BoxBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    error::ResponseError,
    Error,
};
use futures_util::future::{ok, LocalBoxFuture, Ready};
use futures_util::FutureExt;
use log::error;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;

pub struct Recovery;

impl<S, B> Transform<S, ServiceRequest> for Recovery
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: actix_web::body::MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = RecoveryMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RecoveryMiddleware {
            service: Rc::new(service),
        })
    }
}

pub struct RecoveryMiddleware<S> {
    service: Rc<S>,
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl<S, B> Service<ServiceRequest> for RecoveryMiddleware<S>
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
        let request = req.request().clone();

        Box::pin(async move {
            match AssertUnwindSafe(service.call(req)).catch_unwind().await {
                Ok(result) => result.map(|res| res.map_into_boxed_body()),
                Err(panic) => {
                    let message = panic_message(panic);
                    error!(
                        "Panic while handling {} {}: {}",
                        request.method(),
                        request.path(),
                        message
                    );
                    let response =
                        GatewayError::Internal("request handler panicked".to_string())
                            .error_response();
                    Ok(ServiceResponse::new(request, response))
                }
            }
        })
    }
}
