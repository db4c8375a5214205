//! Unified error types for the lumen core library.
//!
//! This module provides a unified error type [`LumenError`] that covers all failure
//! modes across the lumen system. Each module also has its own specific error types
//! (`ConfigError`, `BluetoothError`) for internal use.
//!
//! Most lifecycle failures never reach a caller as an error: they are logged and
//! folded into state (see [`crate::connection`]). The variants here are what
//! remains visible at the public API.
//!
//! # Example
//!
//! ```rust
//! use lumen_core::error::{LumenError, Result};
//!
//! fn require_link(connected: bool) -> Result<()> {
//!     if !connected {
//!         return Err(LumenError::NotConnected);
//!     }
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

use crate::permissions::Capability;
use crate::protocol::Command;

/// The unified error type for all lumen operations.
#[derive(Debug, Error)]
pub enum LumenError {
    // =========================================================================
    // BLUETOOTH ERRORS
    // =========================================================================
    /// No Bluetooth adapter was found on this system.
    #[error(
        "No Bluetooth adapter found. Ensure Bluetooth hardware is present and drivers are loaded."
    )]
    AdapterNotFound,

    /// The adapter never reported powered on.
    #[error("Bluetooth adapter is unavailable. Run 'bluetoothctl power on' to enable.")]
    AdapterUnavailable,

    /// One or more required capabilities were refused.
    #[error("Bluetooth permissions denied: {}", format_capabilities(.denied))]
    PermissionDenied {
        /// The capabilities that were not granted.
        denied: Vec<Capability>,
    },

    /// The discovery scan could not be run.
    #[error("Bluetooth scan failed: {0}")]
    ScanFailed(String),

    /// The peripheral is unknown to the stack.
    #[error("Peripheral not found: '{0}'. Ensure the device is powered on and within range.")]
    PeripheralNotFound(String),

    /// Connecting to the peripheral failed, was rejected, or timed out.
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    /// A command was issued without a resolved characteristic and live link.
    #[error("Not connected to ESP32")]
    NotConnected,

    /// Writing a command to the characteristic failed.
    #[error("Failed to turn LED {command}: {message}")]
    WriteFailed {
        /// The command that was being written.
        command: Command,
        /// Stack-provided detail.
        message: String,
    },

    /// Any other BLE stack failure.
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration could not be loaded or parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// An error occurred while writing configuration to disk.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

fn format_capabilities(capabilities: &[Capability]) -> String {
    capabilities
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// A specialized [`Result`] type for lumen operations.
pub type Result<T> = std::result::Result<T, LumenError>;

/// Short alias for [`LumenError`].
pub type Error = LumenError;

impl LumenError {
    /// Returns `true` if this error is related to Bluetooth operations.
    #[inline]
    #[must_use]
    pub const fn is_bluetooth_error(&self) -> bool {
        matches!(
            self,
            Self::AdapterNotFound
                | Self::AdapterUnavailable
                | Self::PermissionDenied { .. }
                | Self::ScanFailed(_)
                | Self::PeripheralNotFound(_)
                | Self::ConnectFailed(_)
                | Self::NotConnected
                | Self::WriteFailed { .. }
                | Self::Bluetooth(_)
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error is related to I/O or persistence.
    #[inline]
    #[must_use]
    pub const fn is_io_error(&self) -> bool {
        matches!(self, Self::PersistenceError(_) | Self::IoError(_))
    }

    /// Returns `true` if a fresh scan/connect cycle may clear this error.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ScanFailed(_)
                | Self::PeripheralNotFound(_)
                | Self::ConnectFailed(_)
                | Self::NotConnected
                | Self::WriteFailed { .. }
        )
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 403 Forbidden - the user refused a capability
            Self::PermissionDenied { .. } => 403,

            // 404 Not Found
            Self::ConfigNotFound(_) | Self::PeripheralNotFound(_) => 404,

            // 409 Conflict - no usable link for the request
            Self::NotConnected => 409,

            // 422 Unprocessable Entity - semantic errors
            Self::ConfigParseError(_) | Self::ConfigValidationError(_) => 422,

            // 500 Internal Server Error - server-side issues
            Self::PersistenceError(_) | Self::IoError(_) => 500,

            // 502 Bad Gateway - the peripheral misbehaved
            Self::ConnectFailed(_) | Self::WriteFailed { .. } => 502,

            // 503 Service Unavailable - Bluetooth hardware issues
            Self::AdapterNotFound
            | Self::AdapterUnavailable
            | Self::ScanFailed(_)
            | Self::Bluetooth(_) => 503,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::AdapterNotFound => "BLUETOOTH_ADAPTER_NOT_FOUND",
            Self::AdapterUnavailable => "BLUETOOTH_ADAPTER_UNAVAILABLE",
            Self::PermissionDenied { .. } => "PERMISSION_DENIED",
            Self::ScanFailed(_) => "BLUETOOTH_SCAN_FAILED",
            Self::PeripheralNotFound(_) => "PERIPHERAL_NOT_FOUND",
            Self::ConnectFailed(_) => "CONNECT_FAILED",
            Self::NotConnected => "NOT_CONNECTED",
            Self::WriteFailed { .. } => "WRITE_FAILED",
            Self::Bluetooth(_) => "BLUETOOTH_ERROR",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for LumenError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::LoadError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {}: {}", path.display(), source))
            }
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.into_iter().map(|e| e.to_string()).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<crate::bluetooth::BluetoothError> for LumenError {
    fn from(err: crate::bluetooth::BluetoothError) -> Self {
        use crate::bluetooth::BluetoothError;
        match err {
            BluetoothError::AdapterNotFound => Self::AdapterNotFound,
            BluetoothError::ScanFailed { message } => Self::ScanFailed(message),
            BluetoothError::PeripheralNotFound { id } => Self::PeripheralNotFound(id.to_string()),
            BluetoothError::InvalidPeripheralId { id } => Self::PeripheralNotFound(id),
            BluetoothError::ConnectFailed { message } => Self::ConnectFailed(message),
            BluetoothError::SessionInitFailed { message }
            | BluetoothError::DisconnectFailed { message }
            | BluetoothError::DiscoveryFailed { message }
            | BluetoothError::WriteFailed { message }
            | BluetoothError::Internal { message } => Self::Bluetooth(message),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
