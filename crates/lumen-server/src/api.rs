//! HTTP API routes and handlers.
//!
//! Endpoints are organized by domain:
//! - `bluetooth` - Permissions, scanning, connection state and notices
//! - `led` - LED on/off commands
//! - `config` - Effective configuration
//! - `health` - Service health checks
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

pub mod bluetooth;
pub mod config;
pub mod error;
pub mod health;
pub mod led;
pub mod openapi;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                - Health check
/// /api
/// ├── /status            - Controller flags and link details
/// ├── /permissions       - Request Bluetooth capabilities
/// ├── /scan              - Scan for and connect to the LED
/// ├── /disconnect        - Tear down the link
/// ├── /notices           - Recent user notices
/// ├── /led/on, /led/off  - LED commands
/// ├── /config            - Effective configuration
/// └── /openapi.json      - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                .merge(bluetooth::router())
                .nest("/led", led::router())
                .nest("/config", config::router())
                .route("/openapi.json", get(openapi::get_openapi_spec)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
