//! The BLE stack seam.
//!
//! This module defines what the lifecycle components need from an OS
//! Bluetooth stack:
//! - Radio power state
//! - Capability (permission) requests
//! - Discovery scans streaming advertisement batches
//! - Per-peripheral connect/disconnect and connection-state changes
//! - GATT service enumeration and characteristic writes
//!
//! [`BluezBackend`] implements it on Linux through BlueZ. [`MockBackend`] is a
//! scriptable in-memory stack for tests and hardware-free development.

use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::permissions::{Capability, CapabilityGrant};
use crate::types::{
    AdapterState, Advertisement, ConnectionState, PeripheralId, RemoteService, WriteKind,
};

#[cfg(feature = "bluetooth")]
mod bluez;
#[cfg(any(test, feature = "mock-bluetooth"))]
mod mock;

#[cfg(feature = "bluetooth")]
pub use bluez::{BluezBackend, BluezPeripheral};
#[cfg(any(test, feature = "mock-bluetooth"))]
pub use mock::{ConnectBehavior, MockBackend, MockCall, MockCharacteristic, MockDevice};

/// A stream of events delivered by the stack.
///
/// Dropping the stream cancels the underlying subscription.
pub type EventStream<T> = BoxStream<'static, T>;

/// Errors reported by a BLE stack.
#[derive(Debug, Clone, Error)]
pub enum BluetoothError {
    /// No Bluetooth adapter is present.
    #[error("No Bluetooth adapter found")]
    AdapterNotFound,

    /// The stack session could not be established.
    #[error("Failed to initialise Bluetooth session: {message}")]
    SessionInitFailed {
        /// Stack-provided detail.
        message: String,
    },

    /// Starting or running a discovery scan failed.
    #[error("Bluetooth scan failed: {message}")]
    ScanFailed {
        /// Stack-provided detail.
        message: String,
    },

    /// The stack does not know the requested peripheral.
    #[error("Peripheral not found: {id}")]
    PeripheralNotFound {
        /// The identifier that was looked up.
        id: PeripheralId,
    },

    /// A peripheral identifier could not be parsed by the stack.
    #[error("Invalid peripheral id: '{id}'")]
    InvalidPeripheralId {
        /// The rejected identifier.
        id: String,
    },

    /// The connect call failed or was rejected.
    #[error("Connection failed: {message}")]
    ConnectFailed {
        /// Stack-provided detail.
        message: String,
    },

    /// The disconnect call failed.
    #[error("Disconnect failed: {message}")]
    DisconnectFailed {
        /// Stack-provided detail.
        message: String,
    },

    /// Service or characteristic enumeration failed.
    #[error("Service discovery failed: {message}")]
    DiscoveryFailed {
        /// Stack-provided detail.
        message: String,
    },

    /// A characteristic write failed.
    #[error("Characteristic write failed: {message}")]
    WriteFailed {
        /// Stack-provided detail.
        message: String,
    },

    /// Any other stack failure.
    #[error("Bluetooth error: {message}")]
    Internal {
        /// Stack-provided detail.
        message: String,
    },
}

/// Result type for BLE stack operations.
pub type BluetoothResult<T> = std::result::Result<T, BluetoothError>;

/// Radio-level operations of a BLE stack.
#[async_trait]
pub trait BleBackend: Send + Sync + 'static {
    /// Peripheral handle type produced by this stack.
    type Peripheral: BlePeripheral;

    /// Subscribe to adapter power state. Yields the current state first.
    async fn adapter_states(&self) -> BluetoothResult<EventStream<AdapterState>>;

    /// Request the given capabilities as one batch.
    ///
    /// The result holds one entry per capability the stack answered for.
    async fn request_capabilities(
        &self,
        capabilities: &[Capability],
    ) -> BluetoothResult<Vec<CapabilityGrant>>;

    /// Start a discovery scan and subscribe to its advertisement batches.
    async fn start_scan(&self) -> BluetoothResult<EventStream<Vec<Advertisement>>>;

    /// Stop the discovery scan.
    async fn stop_scan(&self) -> BluetoothResult<()>;

    /// Resolve a handle for a discovered peripheral.
    fn peripheral(&self, id: &PeripheralId) -> BluetoothResult<Self::Peripheral>;
}

/// Link-level operations on one remote peripheral.
#[async_trait]
pub trait BlePeripheral: Clone + Send + Sync + 'static {
    /// Characteristic handle type used for I/O.
    type Characteristic: Clone + fmt::Debug + Send + Sync + 'static;

    /// The peripheral's identifier.
    fn id(&self) -> PeripheralId;

    /// Subscribe to connection state changes. Yields the current state first.
    async fn connection_states(&self) -> BluetoothResult<EventStream<ConnectionState>>;

    /// Establish the link.
    async fn connect(&self) -> BluetoothResult<()>;

    /// Tear down the link.
    async fn disconnect(&self) -> BluetoothResult<()>;

    /// Enumerate GATT services and their characteristics.
    async fn services(&self) -> BluetoothResult<Vec<RemoteService<Self::Characteristic>>>;

    /// Write `value` to `characteristic`.
    async fn write(
        &self,
        characteristic: &Self::Characteristic,
        value: &[u8],
        kind: WriteKind,
    ) -> BluetoothResult<()>;
}
