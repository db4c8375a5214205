//! LED command endpoints.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use lumen_core::Command;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::{ApiResult, ErrorResponse};
use crate::state::SharedState;

/// Creates the LED router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/on", post(led_on))
        .route("/off", post(led_off))
}

/// Response after a command was acknowledged by the peripheral.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "command": "on",
    "written_at_utc": "2025-01-15T03:30:00Z"
}))]
pub struct CommandResponse {
    /// The command written.
    pub command: Command,

    /// When the write was acknowledged.
    pub written_at_utc: DateTime<Utc>,
}

impl CommandResponse {
    fn now(command: Command) -> Self {
        Self {
            command,
            written_at_utc: Utc::now(),
        }
    }
}

/// Turn the LED on.
#[utoipa::path(
    post,
    path = "/api/led/on",
    tag = "led",
    operation_id = "ledOn",
    summary = "Turn the LED on",
    description = "Writes \"1\" to the command characteristic and waits for the \
        peripheral's acknowledgment. Requires a connected peripheral with a \
        resolved characteristic. A failed write marks the link as disconnected; \
        scan again to recover.",
    responses(
        (status = 200, description = "LED turned on", body = CommandResponse),
        (status = 409, description = "Not connected to ESP32", body = ErrorResponse),
        (status = 502, description = "Write failed", body = ErrorResponse),
        (status = 503, description = "Bluetooth unavailable", body = ErrorResponse)
    )
)]
pub async fn led_on(State(state): State<SharedState>) -> ApiResult<Json<CommandResponse>> {
    state.controller()?.led_on().await?;
    Ok(Json(CommandResponse::now(Command::On)))
}

/// Turn the LED off.
#[utoipa::path(
    post,
    path = "/api/led/off",
    tag = "led",
    operation_id = "ledOff",
    summary = "Turn the LED off",
    description = "Writes \"0\" to the command characteristic and waits for the \
        peripheral's acknowledgment. Same preconditions and failure handling as \
        ledOn.",
    responses(
        (status = 200, description = "LED turned off", body = CommandResponse),
        (status = 409, description = "Not connected to ESP32", body = ErrorResponse),
        (status = 502, description = "Write failed", body = ErrorResponse),
        (status = 503, description = "Bluetooth unavailable", body = ErrorResponse)
    )
)]
pub async fn led_off(State(state): State<SharedState>) -> ApiResult<Json<CommandResponse>> {
    state.controller()?.led_off().await?;
    Ok(Json(CommandResponse::now(Command::Off)))
}
