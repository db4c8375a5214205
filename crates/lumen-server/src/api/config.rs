//! Configuration API endpoint.
//!
//! Read-only view of the device and timing settings the controller runs with.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use lumen_core::Config;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::SharedState;

/// Creates the config router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(get_config))
}

/// Effective configuration.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "device": {
        "name": "ESP32_LED",
        "service_uuid": "12345678-1234-1234-1234-123456789012",
        "characteristic_uuid": "87654321-4321-4321-4321-210987654321"
    },
    "scan_timeout_secs": 10,
    "scan_auto_start": false,
    "connect_timeout_secs": 15
}))]
pub struct ConfigResponse {
    /// Target peripheral.
    pub device: DeviceConfigResponse,

    /// How long a scan runs before giving up.
    #[schema(example = 10)]
    pub scan_timeout_secs: u64,

    /// Whether a scan starts right after startup.
    #[schema(example = false)]
    pub scan_auto_start: bool,

    /// How long a connect attempt may take.
    #[schema(example = 15)]
    pub connect_timeout_secs: u64,
}

/// Target peripheral addressing.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeviceConfigResponse {
    /// Advertised name matched exactly during scans.
    #[schema(example = "ESP32_LED")]
    pub name: String,

    /// Service containing the command characteristic.
    pub service_uuid: Uuid,

    /// Command characteristic.
    pub characteristic_uuid: Uuid,
}

impl From<&Config> for ConfigResponse {
    fn from(config: &Config) -> Self {
        Self {
            device: DeviceConfigResponse {
                name: config.device.name.clone(),
                service_uuid: config.device.service_uuid,
                characteristic_uuid: config.device.characteristic_uuid,
            },
            scan_timeout_secs: config.scan.timeout_secs,
            scan_auto_start: config.scan.auto_start,
            connect_timeout_secs: config.connection.timeout_secs,
        }
    }
}

/// Get the effective configuration.
#[utoipa::path(
    get,
    path = "/api/config",
    tag = "config",
    operation_id = "getConfig",
    summary = "Get configuration",
    description = "Returns the target device name, GATT UUIDs and timeouts. \
        Configuration is read from the TOML file and LUMEN_ environment \
        variables at startup.",
    responses(
        (status = 200, description = "Current configuration", body = ConfigResponse)
    )
)]
pub async fn get_config(State(state): State<SharedState>) -> Json<ConfigResponse> {
    Json(ConfigResponse::from(&state.config))
}
