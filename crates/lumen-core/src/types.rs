//! Shared types and OpenAPI schemas.
//!
//! These types cross the boundary between the BLE stack, the lifecycle
//! components and the presentation layer.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Power state of the local Bluetooth radio as reported by the OS stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AdapterState {
    /// The stack has not reported a state yet.
    Unknown,
    /// The radio exists but is not usable on this platform.
    Unavailable,
    /// The radio is powered off.
    Off,
    /// The radio is transitioning.
    TurningOn,
    /// The radio is powered on and usable.
    On,
}

/// Connection state of a single peripheral, as observed from the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No link.
    #[default]
    Disconnected,
    /// A connect call is in flight.
    Connecting,
    /// Link established.
    Connected,
    /// A disconnect call is in flight.
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        };
        f.write_str(s)
    }
}

/// Opaque identifier of a remote peripheral.
///
/// On BlueZ this is the device address (`AA:BB:CC:DD:EE:FF`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct PeripheralId(String);

impl PeripheralId {
    /// Wrap a stack-specific identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single advertisement report delivered during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// The advertising peripheral.
    pub id: PeripheralId,
    /// Advertised local name, if the packet carried one.
    pub name: Option<String>,
    /// Received signal strength in dBm.
    pub rssi: Option<i16>,
}

impl Advertisement {
    /// Whether the advertised name equals `name` exactly (case-sensitive).
    #[must_use]
    pub fn has_name(&self, name: &str) -> bool {
        self.name.as_deref() == Some(name)
    }
}

/// A GATT characteristic as enumerated from a connected peripheral.
#[derive(Debug, Clone)]
pub struct RemoteCharacteristic<C> {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// Stack handle used for I/O.
    pub handle: C,
}

/// A GATT service and its characteristics.
#[derive(Debug, Clone)]
pub struct RemoteService<C> {
    /// Service UUID.
    pub uuid: Uuid,
    /// Characteristics belonging to the service.
    pub characteristics: Vec<RemoteCharacteristic<C>>,
}

/// How a characteristic write is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    /// GATT write request; the peripheral acknowledges it.
    WithResponse,
    /// GATT write command; no acknowledgment.
    WithoutResponse,
}

/// Observable booleans read by the presentation layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "has_permissions": true,
    "is_scanning": false,
    "is_connected": true
}))]
pub struct ControllerStatus {
    /// Whether every required capability was granted.
    pub has_permissions: bool,
    /// Whether a discovery scan is running.
    pub is_scanning: bool,
    /// Cached connection flag. Writes are only attempted while this is set.
    pub is_connected: bool,
}

/// Snapshot of the single managed link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "state": "connected",
    "peripheral_id": "AA:BB:CC:DD:EE:FF",
    "characteristic_resolved": true
}))]
pub struct LinkSnapshot {
    /// Last connection state observed from the stack.
    pub state: ConnectionState,
    /// The peripheral owned by the connection manager, if any.
    pub peripheral_id: Option<PeripheralId>,
    /// Whether the command characteristic is resolved.
    pub characteristic_resolved: bool,
}

/// Category of a user-visible notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// A required capability was refused.
    PermissionDenied,
    /// A command was issued without a usable link.
    NotConnected,
    /// A command write failed.
    WriteFailed,
}

/// A user-visible notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "kind": "write_failed",
    "message": "Failed to turn LED ON",
    "raised_at_utc": "2025-01-15T03:30:00Z"
}))]
pub struct Notice {
    /// Notice category.
    pub kind: NoticeKind,
    /// Message shown to the user.
    pub message: String,
    /// When the notice was raised.
    pub raised_at_utc: DateTime<Utc>,
}

impl Notice {
    /// Create a notice stamped with the current time.
    pub fn new(kind: NoticeKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            raised_at_utc: Utc::now(),
        }
    }
}
