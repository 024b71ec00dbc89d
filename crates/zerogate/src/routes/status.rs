//! Introspection endpoints.
//!
//! Mounted under `/_gateway` ahead of the catch-all forwarder, so they win
//! over proxied routes with the same path.

use crate::services::supervisor::SharedState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/_gateway")
            .route("/health", web::get().to(health))
            .route("/status", web::get().to(status)),
    );
}

/// Liveness endpoint.
async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Per-route backend counts and policies for the current configuration
/// generation.
async fn status(state: web::Data<SharedState>) -> HttpResponse {
    let snapshot = state.load().snapshot();
    HttpResponse::Ok().json(snapshot)
}
