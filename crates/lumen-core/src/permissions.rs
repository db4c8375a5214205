//! Capability gating.
//!
//! BLE use needs four capabilities. They are requested as one batch and
//! reduced to a single [`Verdict`]: granted only if every one was granted.
//! There is no retry loop; the user re-triggers the request.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::bluetooth::BleBackend;
use crate::status::{Notifier, StatusHandle};
use crate::types::NoticeKind;

/// Message shown when any capability is refused.
pub const PERMISSION_DENIED_MESSAGE: &str = "Bluetooth permissions are required to control the LED";

/// An OS capability needed to use the BLE radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Discover nearby peripherals.
    BluetoothScan,
    /// Connect to peripherals.
    BluetoothConnect,
    /// General Bluetooth access.
    Bluetooth,
    /// Coarse location while the app is in use.
    LocationWhenInUse,
}

impl Capability {
    /// The batch requested by [`PermissionGate::request_capabilities`].
    pub const REQUIRED: [Self; 4] = [
        Self::BluetoothScan,
        Self::BluetoothConnect,
        Self::Bluetooth,
        Self::LocationWhenInUse,
    ];
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BluetoothScan => "bluetooth_scan",
            Self::BluetoothConnect => "bluetooth_connect",
            Self::Bluetooth => "bluetooth",
            Self::LocationWhenInUse => "location_when_in_use",
        };
        f.write_str(s)
    }
}

/// The stack's answer for one capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityGrant {
    /// The capability asked for.
    pub capability: Capability,
    /// Whether the user or OS granted it.
    pub granted: bool,
}

impl CapabilityGrant {
    /// A granted answer.
    #[must_use]
    pub const fn granted(capability: Capability) -> Self {
        Self {
            capability,
            granted: true,
        }
    }

    /// A refused answer.
    #[must_use]
    pub const fn denied(capability: Capability) -> Self {
        Self {
            capability,
            granted: false,
        }
    }
}

/// Outcome of a capability request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// Every required capability was granted.
    Granted,
    /// At least one required capability was refused or not answered.
    Denied {
        /// The capabilities that were not granted.
        denied: Vec<Capability>,
    },
}

impl Verdict {
    /// Reduce per-capability answers to a verdict over [`Capability::REQUIRED`].
    ///
    /// A required capability missing from `grants` counts as denied.
    #[must_use]
    pub fn from_grants(grants: &[CapabilityGrant]) -> Self {
        let denied: Vec<Capability> = Capability::REQUIRED
            .into_iter()
            .filter(|&required| {
                !grants
                    .iter()
                    .any(|grant| grant.capability == required && grant.granted)
            })
            .collect();

        if denied.is_empty() {
            Self::Granted
        } else {
            Self::Denied { denied }
        }
    }

    /// Whether scanning may proceed.
    #[must_use]
    pub const fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// Requests capabilities and publishes the verdict.
pub struct PermissionGate<B> {
    backend: Arc<B>,
    status: StatusHandle,
    notifier: Notifier,
}

impl<B: BleBackend> PermissionGate<B> {
    /// Create a gate over `backend`.
    pub fn new(backend: Arc<B>, status: StatusHandle, notifier: Notifier) -> Self {
        Self {
            backend,
            status,
            notifier,
        }
    }

    /// Request every required capability as one batch.
    ///
    /// Updates `has_permissions`. A denial raises a user notice. A stack
    /// failure counts as a denial of everything.
    pub async fn request_capabilities(&self) -> Verdict {
        let verdict = match self.backend.request_capabilities(&Capability::REQUIRED).await {
            Ok(grants) => Verdict::from_grants(&grants),
            Err(e) => {
                warn!(error = %e, "Capability request failed");
                Verdict::from_grants(&[])
            }
        };

        self.status.set_permissions(verdict.is_granted());

        match &verdict {
            Verdict::Granted => info!("All Bluetooth capabilities granted"),
            Verdict::Denied { denied } => {
                warn!(?denied, "Bluetooth capabilities denied");
                self.notifier
                    .notify(NoticeKind::PermissionDenied, PERMISSION_DENIED_MESSAGE);
            }
        }

        verdict
    }
}
