//! API error types and response handling.
//!
//! This module provides a unified error type for all API handlers
//! with automatic conversion to appropriate HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use lumen_core::LumenError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type.
///
/// Each variant maps to a specific HTTP status code and produces a
/// consistent JSON error response.
#[derive(Debug, Clone)]
pub enum ApiError {
    /// 403 Forbidden - A required Bluetooth capability was refused.
    Forbidden {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Optional additional details.
        details: Option<serde_json::Value>,
    },

    /// 409 Conflict - The link is not in a state that allows the operation.
    Conflict {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 502 Bad Gateway - The peripheral failed an operation.
    BadGateway {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Optional additional details.
        details: Option<String>,
    },

    /// 500 Internal Server Error - Unexpected server-side error.
    InternalError {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Optional details.
        details: Option<String>,
    },

    /// 503 Service Unavailable - The Bluetooth stack is unavailable.
    ServiceUnavailable {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Optional additional details.
        details: Option<String>,
    },
}

impl ApiError {
    /// The error answered by every BLE endpoint when no stack could be opened.
    #[must_use]
    pub fn bluetooth_unavailable() -> Self {
        Self::ServiceUnavailable {
            error_code: "bluetooth_unavailable".to_string(),
            message: "Bluetooth adapter is not available".to_string(),
            details: None,
        }
    }

    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::BadGateway { .. } => StatusCode::BAD_GATEWAY,
            Self::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Standard JSON error response body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "not_connected",
    "message": "Not connected to ESP32",
    "details": null
}))]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g., "not_connected").
    #[schema(example = "not_connected")]
    pub error: String,

    /// Human-readable error message.
    #[schema(example = "Not connected to ESP32")]
    pub message: String,

    /// Optional additional details for debugging.
    #[schema(nullable)]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_response = match self {
            Self::Forbidden {
                error_code,
                message,
                details,
            } => ErrorResponse {
                error: error_code,
                message,
                details,
            },

            Self::Conflict {
                error_code,
                message,
            } => ErrorResponse {
                error: error_code,
                message,
                details: None,
            },

            Self::BadGateway {
                error_code,
                message,
                details,
            }
            | Self::ServiceUnavailable {
                error_code,
                message,
                details,
            } => ErrorResponse {
                error: error_code,
                message,
                details: details.map(|d| serde_json::json!(d)),
            },

            Self::InternalError {
                error_code,
                message,
                details,
            } => {
                tracing::error!(
                    error_code = %error_code,
                    message = %message,
                    details = ?details,
                    "Internal server error"
                );

                ErrorResponse {
                    error: error_code,
                    message,
                    details: details.map(|d| serde_json::json!(d)),
                }
            }
        };

        (status, Json(error_response)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Forbidden { message, .. } => write!(f, "Forbidden: {message}"),
            Self::Conflict { message, .. } => write!(f, "Conflict: {message}"),
            Self::BadGateway { message, .. } => write!(f, "Bad Gateway: {message}"),
            Self::InternalError { message, .. } => write!(f, "Internal Error: {message}"),
            Self::ServiceUnavailable { message, .. } => {
                write!(f, "Service Unavailable: {message}")
            }
        }
    }
}

impl std::error::Error for ApiError {}

/// Convert from lumen_core errors.
impl From<LumenError> for ApiError {
    fn from(err: LumenError) -> Self {
        let error_code = err.error_code().to_ascii_lowercase();

        match err {
            LumenError::PermissionDenied { ref denied } => Self::Forbidden {
                error_code,
                message: lumen_core::PERMISSION_DENIED_MESSAGE.to_string(),
                details: Some(serde_json::json!({ "denied": denied })),
            },
            LumenError::NotConnected => Self::Conflict {
                error_code,
                message: err.to_string(),
            },
            LumenError::WriteFailed { command, message } => Self::BadGateway {
                error_code,
                message: command.failure_message(),
                details: Some(message),
            },
            LumenError::ConnectFailed(_) | LumenError::PeripheralNotFound(_) => {
                Self::BadGateway {
                    error_code,
                    message: err.to_string(),
                    details: None,
                }
            }
            LumenError::AdapterNotFound
            | LumenError::AdapterUnavailable
            | LumenError::ScanFailed(_)
            | LumenError::Bluetooth(_) => Self::ServiceUnavailable {
                error_code,
                message: err.to_string(),
                details: None,
            },
            LumenError::ConfigNotFound(_)
            | LumenError::ConfigParseError(_)
            | LumenError::ConfigValidationError(_)
            | LumenError::PersistenceError(_)
            | LumenError::IoError(_) => Self::InternalError {
                error_code,
                message: err.to_string(),
                details: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use lumen_core::{Capability, Command};

    use super::*;

    #[test]
    fn test_not_connected_is_conflict() {
        let err = ApiError::from(LumenError::NotConnected);
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert!(matches!(
            err,
            ApiError::Conflict { ref error_code, .. } if error_code == "not_connected"
        ));
    }

    #[test]
    fn test_write_failure_is_bad_gateway_with_command_message() {
        let err = ApiError::from(LumenError::WriteFailed {
            command: Command::Off,
            message: "org.bluez.Error.Failed".into(),
        });
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert!(err.to_string().contains("Failed to turn LED OFF"));
    }

    #[test]
    fn test_permission_denied_is_forbidden() {
        let err = ApiError::from(LumenError::PermissionDenied {
            denied: vec![Capability::BluetoothScan],
        });
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert!(matches!(
            err,
            ApiError::Forbidden { ref error_code, .. } if error_code == "permission_denied"
        ));
    }

    #[test]
    fn test_error_response_serialization() {
        let response = ErrorResponse {
            error: "bluetooth_unavailable".to_string(),
            message: "Bluetooth adapter is not available".to_string(),
            details: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("bluetooth_unavailable"));
    }
}
