//! Health check API endpoint.
//!
//! Provides a simple health check endpoint for monitoring and load balancers.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::SharedState;

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "status": "ok",
    "version": "0.1.0",
    "bluetooth_available": true,
    "uptime_secs": 3600,
    "started_at_utc": "2025-01-15T02:30:00Z"
}))]
pub struct HealthResponse {
    /// Service status.
    #[schema(example = "ok")]
    pub status: String,

    /// Service version from Cargo.toml.
    #[schema(example = "0.1.0")]
    pub version: String,

    /// Whether a BLE stack could be opened.
    #[schema(example = true)]
    pub bluetooth_available: bool,

    /// Server uptime in seconds.
    #[schema(example = 3600)]
    pub uptime_secs: u64,

    /// When the server started.
    pub started_at_utc: DateTime<Utc>,
}

/// Creates the health router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(health_check))
}

/// Health check endpoint.
///
/// Returns basic service status information including version and
/// whether Bluetooth is usable.
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    operation_id = "healthCheck",
    summary = "Check service health",
    description = "Returns basic service status information. Use this endpoint \
        for load balancer health checks and monitoring. The server stays healthy \
        without Bluetooth; LED endpoints then answer 503.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        bluetooth_available: state.bluetooth_available(),
        uptime_secs: state.uptime_secs(),
        started_at_utc: state.started_at_utc(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "ok".to_string(),
            version: "0.1.0".to_string(),
            bluetooth_available: false,
            uptime_secs: 5,
            started_at_utc: Utc::now(),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
        assert!(json.contains("\"bluetooth_available\":false"));
    }
}
