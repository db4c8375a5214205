//! OpenAPI specification generation for the lumen API.
//!
//! The document is served at `/api/openapi.json` and written to disk by the
//! `gen-openapi` binary for client generation.

use axum::Json;
use lumen_core::{
    Capability, Command, ConnectionState, LinkSnapshot, Notice, NoticeKind, ScanStart, Verdict,
};
use utoipa::OpenApi;

use super::bluetooth::{NoticesResponse, StatusResponse};
use super::config::{ConfigResponse, DeviceConfigResponse};
use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::led::CommandResponse;

/// Serve the OpenAPI specification as JSON.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as pretty-printed JSON.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> serde_json::Result<String> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for lumen.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "lumen API",
        version = "0.1.0",
        description = r#"
# lumen API

lumen drives a single ESP32 LED peripheral over Bluetooth Low Energy.

## Workflow

1. **requestPermissions**: grant the Bluetooth capabilities. Scanning is refused until this succeeds.
2. **startScan**: look for the peripheral advertising as `ESP32_LED` and connect to the first match.
3. **getStatus**: poll until `is_connected` is true.
4. **ledOn** / **ledOff**: write `"1"` or `"0"` to the command characteristic.

Failures that a user should see are also recorded as notices (**getNotices**).
A failed write drops the link; scan again to reconnect.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local lumen server")
    ),
    tags(
        (name = "system", description = "Health checks"),
        (name = "bluetooth", description = "Permissions, scanning, connection state and notices"),
        (name = "led", description = "LED on/off commands"),
        (name = "config", description = "Effective device and timing configuration")
    ),
    paths(
        super::health::health_check,
        super::bluetooth::get_status,
        super::bluetooth::request_permissions,
        super::bluetooth::start_scan,
        super::bluetooth::disconnect,
        super::bluetooth::get_notices,
        super::led::led_on,
        super::led::led_off,
        super::config::get_config,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            StatusResponse,
            NoticesResponse,
            CommandResponse,
            ConfigResponse,
            DeviceConfigResponse,
            Verdict,
            Capability,
            ScanStart,
            LinkSnapshot,
            ConnectionState,
            Notice,
            NoticeKind,
            Command,
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_generation() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "lumen API");
        assert!(spec.paths.paths.contains_key("/api/led/on"));
        assert!(spec.paths.paths.contains_key("/api/scan"));
        assert!(spec.paths.paths.contains_key("/health"));
    }

    #[test]
    fn test_openapi_json_serialization() {
        let json = get_openapi_json().unwrap();
        assert!(json.contains("\"openapi\":"));
        assert!(json.contains("\"lumen API\""));
        assert!(json.contains("CommandResponse"));
    }
}
