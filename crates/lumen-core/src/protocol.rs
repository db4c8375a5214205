//! Wire constants shared with the ESP32 LED firmware.
//!
//! These values must match the firmware exactly. They are the defaults for
//! [`DeviceConfig`](crate::config::DeviceConfig).

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Advertised local name of the target peripheral.
pub const DEVICE_NAME: &str = "ESP32_LED";

/// GATT service exposing the LED command characteristic.
pub const LED_SERVICE_UUID: Uuid = Uuid::from_u128(0x1234_5678_1234_1234_1234_1234_5678_9012);

/// Writable characteristic that accepts single-byte LED commands.
pub const LED_COMMAND_UUID: Uuid = Uuid::from_u128(0x8765_4321_4321_4321_4321_2109_8765_4321);

/// A command understood by the LED firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Turn the LED on.
    On,
    /// Turn the LED off.
    Off,
}

impl Command {
    /// The single ASCII digit written to the characteristic.
    #[must_use]
    pub const fn payload(self) -> &'static [u8] {
        match self {
            Self::On => b"1",
            Self::Off => b"0",
        }
    }

    /// Upper-case label used in user-facing messages.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
        }
    }

    /// Message shown when writing this command fails.
    #[must_use]
    pub fn failure_message(self) -> String {
        format!("Failed to turn LED {}", self.label())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
