//! # lumen-server
//!
//! HTTP server for the ESP32 LED controller.
//!
//! This binary provides:
//! - REST API for permissions, scanning, connection state and LED commands
//! - OpenAPI specification at `/api/openapi.json`
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development
//! cargo run --package lumen-server
//!
//! # Without a radio, against the simulated peripheral
//! cargo run --package lumen-server --no-default-features --features mock-bluetooth
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::sync::Arc;

use anyhow::Context;
use lumen_core::{Config, LedControl};
use lumen_server::api::create_router;
use lumen_server::logging;
use lumen_server::state::AppState;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    logging::init(&config.logging)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting lumen-server");

    let controller = build_controller(&config).await;
    if let Some(controller) = &controller {
        let controller = Arc::clone(controller);
        tokio::spawn(async move {
            match controller.bootstrap().await {
                Ok(verdict) => info!(?verdict, "Bluetooth ready"),
                Err(e) => error!(error = %e, "Bluetooth bootstrap failed"),
            }
        });
    }

    let state = AppState::new(config.clone(), controller.clone()).shared();
    let app = create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(controller) = controller {
        controller.shutdown().await;
    }
    info!("Shut down");

    Ok(())
}

#[cfg(feature = "bluetooth")]
async fn build_controller(config: &Config) -> Option<Arc<dyn LedControl>> {
    match lumen_core::BluezBackend::new().await {
        Ok(backend) => Some(Arc::new(lumen_core::LedController::new(backend, config))),
        Err(e) => {
            warn!(error = %e, "Bluetooth unavailable; LED endpoints will answer 503");
            None
        }
    }
}

#[cfg(all(not(feature = "bluetooth"), feature = "mock-bluetooth"))]
#[allow(clippy::unused_async)]
async fn build_controller(config: &Config) -> Option<Arc<dyn LedControl>> {
    warn!("Using simulated Bluetooth backend");
    Some(Arc::new(lumen_core::LedController::new(
        lumen_core::MockBackend::demo(),
        config,
    )))
}

#[cfg(not(any(feature = "bluetooth", feature = "mock-bluetooth")))]
#[allow(clippy::unused_async)]
async fn build_controller(_config: &Config) -> Option<Arc<dyn LedControl>> {
    warn!("Built without Bluetooth support; LED endpoints will answer 503");
    None
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
