//! CORS and deadline middleware through the assembled stack.

mod common;

use actix_web::http::header;
use actix_web::{test, web, App};
use common::{respond, write_config, MemoryOverlay};
use std::sync::Arc;
use zerogate::middleware::cors::Cors;
use zerogate::middleware::timeout::TimeoutGuard;
use zerogate::services::http::forward;
use zerogate::services::supervisor::Proxy;

fn cors_proxy() -> (Proxy, tempfile::NamedTempFile) {
    let overlay = MemoryOverlay::new().service("svc-a", |_req| async { respond(200, "ok") });
    let config = write_config(
        r#"{
            "cors": {
                "enabled": true,
                "allowed_origins": ["https://app.example.com"],
                "allowed_methods": ["GET", "POST"],
                "allowed_headers": ["Content-Type"],
                "allow_credentials": true,
                "max_age": 600
            },
            "routes": [
                { "path": "/api/x", "backends": [
                    { "ziti_service": "svc-a", "identity_file": "/id.json" }
                ]}
            ]
        }"#,
    );
    let proxy = Proxy::new(config.path(), Arc::new(overlay)).unwrap();
    (proxy, config)
}

#[actix_web::test]
async fn preflight_short_circuits_with_204() {
    let (proxy, _config) = cors_proxy();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(proxy.handler()))
            .wrap(Cors::new(proxy.shared_state()))
            .default_service(web::route().to(forward)),
    )
    .await;

    let req = test::TestRequest::with_uri("/api/x")
        .method(actix_web::http::Method::OPTIONS)
        .insert_header((header::ORIGIN, "https://app.example.com"))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status().as_u16(), 204);
    assert_eq!(
        resp.headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|v| v.to_str().ok()),
        Some("https://app.example.com")
    );
    assert_eq!(
        resp.headers()
            .get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS)
            .and_then(|v| v.to_str().ok()),
        Some("true")
    );
    assert_eq!(
        resp.headers()
            .get(header::ACCESS_CONTROL_MAX_AGE)
            .and_then(|v| v.to_str().ok()),
        Some("600")
    );
}

#[actix_web::test]
async fn disallowed_origin_gets_no_cors_headers() {
    let (proxy, _config) = cors_proxy();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(proxy.handler()))
            .wrap(Cors::new(proxy.shared_state()))
            .default_service(web::route().to(forward)),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/api/x")
        .insert_header((header::ORIGIN, "https://evil.example.com"))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status().as_u16(), 200);
    assert!(resp
        .headers()
        .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        .is_none());
}

#[actix_web::test]
async fn allowed_origin_is_echoed_on_proxied_response() {
    let (proxy, _config) = cors_proxy();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(proxy.handler()))
            .wrap(Cors::new(proxy.shared_state()))
            .default_service(web::route().to(forward)),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/api/x")
        .insert_header((header::ORIGIN, "https://app.example.com"))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(
        resp.headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|v| v.to_str().ok()),
        Some("https://app.example.com")
    );
}

#[actix_web::test]
async fn slow_upstream_hits_the_global_deadline() {
    let overlay = MemoryOverlay::new().service("svc-slow", |_req| async {
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        respond(200, "too late")
    });
    let config = write_config(
        r#"{
            "routes": [
                { "path": "/slow", "backends": [
                    { "ziti_service": "svc-slow", "identity_file": "/id.json" }
                ]}
            ],
            "defaults": { "timeout": "200ms" }
        }"#,
    );
    let proxy = Proxy::new(config.path(), Arc::new(overlay)).unwrap();

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(proxy.handler()))
            .wrap(TimeoutGuard::new(proxy.shared_state()))
            .default_service(web::route().to(forward)),
    )
    .await;

    let req = test::TestRequest::get().uri("/slow").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 504);
}
