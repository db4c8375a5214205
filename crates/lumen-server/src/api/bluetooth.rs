//! Bluetooth lifecycle endpoints.
//!
//! Status, permissions, scanning, disconnect and user notices.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use lumen_core::{ControllerStatus, LinkSnapshot, LumenError, Notice, ScanStart, Verdict};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::{ApiResult, ErrorResponse};
use crate::state::SharedState;

/// Creates the Bluetooth lifecycle router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/status", get(get_status))
        .route("/permissions", post(request_permissions))
        .route("/scan", post(start_scan))
        .route("/disconnect", post(disconnect))
        .route("/notices", get(get_notices))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Observable state of the controller.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "has_permissions": true,
    "is_scanning": false,
    "is_connected": true,
    "link": {
        "state": "connected",
        "peripheral_id": "24:6F:28:1A:2B:3C",
        "characteristic_resolved": true
    }
}))]
pub struct StatusResponse {
    /// Whether every required capability was granted.
    pub has_permissions: bool,

    /// Whether a discovery scan is running.
    pub is_scanning: bool,

    /// Whether LED commands may be written.
    pub is_connected: bool,

    /// Details of the managed link.
    pub link: LinkSnapshot,
}

impl StatusResponse {
    fn new(status: ControllerStatus, link: LinkSnapshot) -> Self {
        Self {
            has_permissions: status.has_permissions,
            is_scanning: status.is_scanning,
            is_connected: status.is_connected,
            link,
        }
    }
}

/// Recently raised user notices.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NoticesResponse {
    /// Notices, oldest first.
    pub notices: Vec<Notice>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get the observable controller state.
#[utoipa::path(
    get,
    path = "/api/status",
    tag = "bluetooth",
    operation_id = "getStatus",
    summary = "Get controller status",
    description = "Returns the permission, scanning and connection flags plus \
        details of the managed link. Poll this after starting a scan to see \
        when the LED becomes controllable.",
    responses(
        (status = 200, description = "Current status", body = StatusResponse),
        (status = 503, description = "Bluetooth unavailable", body = ErrorResponse)
    )
)]
pub async fn get_status(State(state): State<SharedState>) -> ApiResult<Json<StatusResponse>> {
    let controller = state.controller()?;
    Ok(Json(StatusResponse::new(controller.status(), controller.link())))
}

/// Request the Bluetooth capabilities.
#[utoipa::path(
    post,
    path = "/api/permissions",
    tag = "bluetooth",
    operation_id = "requestPermissions",
    summary = "Request Bluetooth permissions",
    description = "Waits briefly for the Bluetooth radio to report powered on, \
        then requests every capability needed for scanning and connecting. \
        Scanning is only allowed after this succeeds. A refusal also raises a \
        user notice.",
    responses(
        (status = 200, description = "All capabilities granted", body = Verdict),
        (status = 403, description = "A capability was refused", body = ErrorResponse),
        (status = 503, description = "Bluetooth unavailable or radio powered off", body = ErrorResponse)
    )
)]
pub async fn request_permissions(State(state): State<SharedState>) -> ApiResult<Json<Verdict>> {
    let controller = state.controller()?;
    match controller.request_permissions().await? {
        Verdict::Granted => Ok(Json(Verdict::Granted)),
        Verdict::Denied { denied } => Err(LumenError::PermissionDenied { denied }.into()),
    }
}

/// Start scanning for the LED peripheral.
#[utoipa::path(
    post,
    path = "/api/scan",
    tag = "bluetooth",
    operation_id = "startScan",
    summary = "Scan for and connect to the LED",
    description = "Starts a background scan for the configured device name. \
        The first match is connected automatically. A scan that finds nothing \
        ends silently after the scan timeout.",
    responses(
        (status = 202, description = "Scan started", body = ScanStart),
        (status = 200, description = "A scan was already running", body = ScanStart),
        (status = 403, description = "Permissions not granted", body = ErrorResponse),
        (status = 503, description = "Bluetooth unavailable", body = ErrorResponse)
    )
)]
pub async fn start_scan(
    State(state): State<SharedState>,
) -> ApiResult<(StatusCode, Json<ScanStart>)> {
    let controller = state.controller()?;
    let start = controller.start_scan()?;
    let status = if start.started {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(start)))
}

/// Disconnect from the LED peripheral.
#[utoipa::path(
    post,
    path = "/api/disconnect",
    tag = "bluetooth",
    operation_id = "disconnect",
    summary = "Disconnect from the LED",
    description = "Tears down the link. Safe to call when not connected.",
    responses(
        (status = 200, description = "Disconnected", body = StatusResponse),
        (status = 503, description = "Bluetooth unavailable", body = ErrorResponse)
    )
)]
pub async fn disconnect(State(state): State<SharedState>) -> ApiResult<Json<StatusResponse>> {
    let controller = state.controller()?;
    controller.disconnect().await;
    Ok(Json(StatusResponse::new(controller.status(), controller.link())))
}

/// List recent user notices.
#[utoipa::path(
    get,
    path = "/api/notices",
    tag = "bluetooth",
    operation_id = "getNotices",
    summary = "Get recent notices",
    description = "Returns the most recent user-visible messages, such as \
        \"Not connected to ESP32\" or \"Failed to turn LED ON\".",
    responses(
        (status = 200, description = "Recent notices", body = NoticesResponse),
        (status = 503, description = "Bluetooth unavailable", body = ErrorResponse)
    )
)]
pub async fn get_notices(State(state): State<SharedState>) -> ApiResult<Json<NoticesResponse>> {
    let controller = state.controller()?;
    Ok(Json(NoticesResponse {
        notices: controller.recent_notices(),
    }))
}
