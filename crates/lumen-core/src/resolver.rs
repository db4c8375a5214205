//! GATT lookup of the command characteristic.

use tracing::{debug, warn};
use uuid::Uuid;

use crate::bluetooth::BlePeripheral;
use crate::config::DeviceConfig;
use crate::types::ConnectionState;

/// Locates one characteristic inside one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceResolver {
    service_uuid: Uuid,
    characteristic_uuid: Uuid,
}

impl ServiceResolver {
    /// Resolve `characteristic_uuid` within `service_uuid`.
    #[must_use]
    pub const fn new(service_uuid: Uuid, characteristic_uuid: Uuid) -> Self {
        Self {
            service_uuid,
            characteristic_uuid,
        }
    }

    /// Resolver for the configured device.
    #[must_use]
    pub const fn from_config(device: &DeviceConfig) -> Self {
        Self::new(device.service_uuid, device.characteristic_uuid)
    }

    /// Find the characteristic on a connected peripheral.
    ///
    /// Returns `None` without touching the stack unless `state` is
    /// [`ConnectionState::Connected`]. A missing service or characteristic,
    /// or an enumeration failure, is logged and also yields `None`.
    pub async fn discover<P: BlePeripheral>(
        &self,
        peripheral: &P,
        state: ConnectionState,
    ) -> Option<P::Characteristic> {
        if state != ConnectionState::Connected {
            debug!(peripheral = %peripheral.id(), %state, "Skipping discovery");
            return None;
        }

        let services = match peripheral.services().await {
            Ok(services) => services,
            Err(e) => {
                warn!(peripheral = %peripheral.id(), error = %e, "Service discovery failed");
                return None;
            }
        };

        let Some(service) = services.into_iter().find(|s| s.uuid == self.service_uuid) else {
            warn!(
                peripheral = %peripheral.id(),
                service = %self.service_uuid,
                "LED service not found"
            );
            return None;
        };

        let found = service
            .characteristics
            .into_iter()
            .find(|c| c.uuid == self.characteristic_uuid);

        match found {
            Some(characteristic) => {
                debug!(
                    peripheral = %peripheral.id(),
                    characteristic = %self.characteristic_uuid,
                    "Command characteristic resolved"
                );
                Some(characteristic.handle)
            }
            None => {
                warn!(
                    peripheral = %peripheral.id(),
                    characteristic = %self.characteristic_uuid,
                    "Command characteristic not found"
                );
                None
            }
        }
    }
}
