//! # lumen-core
//!
//! Core BLE lifecycle for the lumen LED controller.
//!
//! This crate finds an `ESP32_LED` peripheral, connects to it, resolves its
//! command characteristic and writes single-byte ON/OFF commands, folding
//! every radio failure into observable state.
//!
//! ## Architecture
//!
//! Components, leaf-first:
//!
//! - [`permissions`] - `PermissionGate`: capability batch and verdict
//! - [`adapter`] - `AdapterMonitor`: startup gate on radio power
//! - [`scan`] - `ScanSession`: time-bounded, name-filtered discovery
//! - [`connection`] - `ConnectionManager`: the single link and its state watcher
//! - [`resolver`] - `ServiceResolver`: GATT lookup of the command characteristic
//! - [`command`] - `CommandWriter`: guarded command writes
//! - [`controller`] - `LedController`: composes the above for a presentation layer
//!
//! Supporting modules:
//!
//! - [`bluetooth`] - The BLE stack seam, the BlueZ backend and an in-memory mock
//! - [`status`] - Observable booleans and user notices
//! - [`subscription`] - Background tasks cancelled on drop
//! - [`protocol`] - Firmware constants
//! - [`config`] - Layered configuration loading, saving and validation
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared types and OpenAPI schemas

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod adapter;
pub mod bluetooth;
pub mod command;
pub mod config;
pub mod connection;
pub mod controller;
pub mod error;
pub mod permissions;
pub mod protocol;
pub mod resolver;
pub mod scan;
pub mod status;
pub mod subscription;
pub mod types;

// Re-export primary types for convenience
pub use adapter::AdapterMonitor;
#[cfg(feature = "bluetooth")]
pub use bluetooth::BluezBackend;
#[cfg(any(test, feature = "mock-bluetooth"))]
pub use bluetooth::{MockBackend, MockDevice};
pub use bluetooth::{BleBackend, BlePeripheral, BluetoothError, BluetoothResult};
pub use command::{CommandWriter, NOT_CONNECTED_MESSAGE};
pub use config::{
    Config, ConfigError, ConfigResult, ConnectionConfig, DeviceConfig, LoggingConfig,
    ScanConfig, ServerConfig,
};
pub use connection::ConnectionManager;
pub use controller::{LedControl, LedController, ADAPTER_READY_TIMEOUT};
pub use error::{Error, LumenError, Result};
pub use permissions::{Capability, PermissionGate, Verdict, PERMISSION_DENIED_MESSAGE};
pub use protocol::{Command, DEVICE_NAME, LED_COMMAND_UUID, LED_SERVICE_UUID};
pub use resolver::ServiceResolver;
pub use scan::{ScanOutcome, ScanSession, ScanStart};
pub use status::{Notifier, StatusHandle};
pub use types::{
    AdapterState, ConnectionState, ControllerStatus, LinkSnapshot, Notice, NoticeKind,
    PeripheralId,
};
