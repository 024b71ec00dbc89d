//! Zerogate gateway server.
//!
//! Thin server binary around the zerogate core: loads the configuration,
//! builds the proxy with the static overlay bootstrap, serves until Ctrl-C
//! and reloads on SIGHUP.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use tokio::signal;
use zerogate::config::settings::load_settings_from_path;
use zerogate::logs::logger::configure_logger;
use zerogate::overlay::static_map::StaticOverlay;
use zerogate::services::supervisor::Proxy;

const SHUTDOWN_WINDOW: Duration = Duration::from_secs(30);

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let config_path = std::env::var("ZEROGATE_CONFIG_PATH")
        .unwrap_or_else(|_| "./config.json".to_string());

    // The logging block decides the level, so peek at the config before
    // the logger exists; errors surface again below with logging set up.
    let level = load_settings_from_path(std::path::Path::new(&config_path))
        .map(|settings| settings.logging.level)
        .unwrap_or_else(|_| "info".to_string());
    configure_logger(&level);

    info!("Starting zerogate gateway with config {}", config_path);

    let proxy = match Proxy::new(&config_path, Arc::new(StaticOverlay)) {
        Ok(proxy) => Arc::new(proxy),
        Err(err) => {
            error!("Failed to start: {}", err);
            std::process::exit(1);
        }
    };

    #[cfg(unix)]
    {
        let proxy = proxy.clone();
        tokio::spawn(async move {
            let mut hup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
                Ok(stream) => stream,
                Err(err) => {
                    error!("Failed to install SIGHUP handler: {}", err);
                    return;
                }
            };
            while hup.recv().await.is_some() {
                info!("SIGHUP received, reloading configuration");
                if let Err(err) = proxy.reload().await {
                    error!("Reload failed: {}", err);
                }
            }
        });
    }

    tokio::select! {
        result = proxy.start() => {
            match result {
                Ok(()) => info!("Server stopped"),
                Err(err) => error!("Server error: {}", err),
            }
        }
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received, stopping gateway");
            if let Err(err) = proxy.stop(SHUTDOWN_WINDOW).await {
                error!("Shutdown incomplete: {}", err);
            }
        }
    }

    Ok(())
}
