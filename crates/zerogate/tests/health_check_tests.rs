//! Active health checking over the in-memory overlay.

mod common;

use common::{respond, write_config, MemoryOverlay};
use std::sync::Arc;
use std::time::Duration;
use zerogate::services::supervisor::Proxy;

#[actix_web::test]
async fn failing_probes_mark_backend_unhealthy() {
    let overlay = MemoryOverlay::new()
        .service("svc-sick", |_req| async { respond(500, "nope") })
        .service("svc-well", |_req| async { respond(200, "fine") });

    let config = write_config(
        r#"{
            "routes": [
                { "path": "/sick", "backends": [
                    { "ziti_service": "svc-sick", "identity_file": "/id.json" }
                ], "health_check": {
                    "enabled": true, "interval": "50ms", "timeout": "1s",
                    "path": "/healthz", "expected_status": 200,
                    "failure_count": 2, "success_count": 2
                }},
                { "path": "/well", "backends": [
                    { "ziti_service": "svc-well", "identity_file": "/id.json" }
                ], "health_check": {
                    "enabled": true, "interval": "50ms", "timeout": "1s",
                    "path": "/healthz", "expected_status": 200,
                    "failure_count": 2, "success_count": 2
                }}
            ]
        }"#,
    );
    let proxy = Proxy::new(config.path(), Arc::new(overlay)).unwrap();

    // two failing probes flip the sick backend; the well one stays up
    tokio::time::sleep(Duration::from_millis(400)).await;

    let status = proxy.status();
    let sick = status.iter().find(|s| s.path == "/sick").unwrap();
    let well = status.iter().find(|s| s.path == "/well").unwrap();
    assert_eq!(sick.healthy_backends, 0);
    assert_eq!(well.healthy_backends, 1);

    proxy.stop(Duration::from_secs(1)).await.unwrap();
}

#[actix_web::test]
async fn wrong_expected_status_counts_as_failure() {
    let overlay =
        MemoryOverlay::new().service("svc-teapot", |_req| async { respond(418, "short") });

    let config = write_config(
        r#"{
            "routes": [
                { "path": "/tea", "backends": [
                    { "ziti_service": "svc-teapot", "identity_file": "/id.json" }
                ], "health_check": {
                    "enabled": true, "interval": "50ms", "timeout": "1s",
                    "path": "/", "expected_status": 200,
                    "failure_count": 2, "success_count": 2
                }}
            ]
        }"#,
    );
    let proxy = Proxy::new(config.path(), Arc::new(overlay)).unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(proxy.status()[0].healthy_backends, 0);

    proxy.stop(Duration::from_secs(1)).await.unwrap();
}
