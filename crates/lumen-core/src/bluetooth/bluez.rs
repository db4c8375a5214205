//! BlueZ implementation of the BLE stack via `bluer`.

use std::time::Duration;

use async_trait::async_trait;
use bluer::gatt::remote::{Characteristic, CharacteristicWriteRequest};
use bluer::gatt::WriteOp;
use bluer::{
    Adapter, AdapterEvent, AdapterProperty, Address, Device, DeviceEvent, DeviceProperty, Session,
};
use futures::{future, stream, StreamExt};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{BleBackend, BlePeripheral, BluetoothError, BluetoothResult, EventStream};
use crate::permissions::{Capability, CapabilityGrant};
use crate::types::{
    AdapterState, Advertisement, ConnectionState, PeripheralId, RemoteCharacteristic,
    RemoteService, WriteKind,
};

/// Time BlueZ is given to finish resolving services after a connect.
const SERVICES_RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);
const SERVICES_RESOLVE_POLL: Duration = Duration::from_millis(100);

/// BLE stack backed by the system's default BlueZ adapter.
pub struct BluezBackend {
    // Keeps the D-Bus connection alive for the adapter handle.
    _session: Session,
    adapter: Adapter,
}

impl BluezBackend {
    /// Open a BlueZ session and select the default adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if bluetoothd is unreachable or no adapter exists.
    pub async fn new() -> BluetoothResult<Self> {
        let session = Session::new()
            .await
            .map_err(|e| BluetoothError::SessionInitFailed {
                message: e.to_string(),
            })?;
        let adapter = session.default_adapter().await.map_err(|e| {
            debug!(error = %e, "No default adapter");
            BluetoothError::AdapterNotFound
        })?;

        info!(adapter = %adapter.name(), "Using Bluetooth adapter");

        Ok(Self {
            _session: session,
            adapter,
        })
    }
}

const fn adapter_state(powered: bool) -> AdapterState {
    if powered {
        AdapterState::On
    } else {
        AdapterState::Off
    }
}

const fn connection_state(connected: bool) -> ConnectionState {
    if connected {
        ConnectionState::Connected
    } else {
        ConnectionState::Disconnected
    }
}

fn internal(e: &bluer::Error) -> BluetoothError {
    BluetoothError::Internal {
        message: e.to_string(),
    }
}

#[async_trait]
impl BleBackend for BluezBackend {
    type Peripheral = BluezPeripheral;

    async fn adapter_states(&self) -> BluetoothResult<EventStream<AdapterState>> {
        let powered = self.adapter.is_powered().await.map_err(|e| internal(&e))?;
        let events = self.adapter.events().await.map_err(|e| internal(&e))?;

        let changes = events.filter_map(|event| async move {
            match event {
                AdapterEvent::PropertyChanged(AdapterProperty::Powered(powered)) => {
                    Some(adapter_state(powered))
                }
                _ => None,
            }
        });

        Ok(stream::once(future::ready(adapter_state(powered)))
            .chain(changes)
            .boxed())
    }

    async fn request_capabilities(
        &self,
        capabilities: &[Capability],
    ) -> BluetoothResult<Vec<CapabilityGrant>> {
        // BlueZ access is decided by D-Bus policy, which the open session already passed.
        debug!(count = capabilities.len(), "Granting capabilities for BlueZ session");
        Ok(capabilities
            .iter()
            .map(|&capability| CapabilityGrant::granted(capability))
            .collect())
    }

    async fn start_scan(&self) -> BluetoothResult<EventStream<Vec<Advertisement>>> {
        let discovery = self
            .adapter
            .discover_devices()
            .await
            .map_err(|e| BluetoothError::ScanFailed {
                message: e.to_string(),
            })?;

        let adapter = self.adapter.clone();
        let reports = discovery.filter_map(move |event| {
            let adapter = adapter.clone();
            async move {
                let AdapterEvent::DeviceAdded(address) = event else {
                    return None;
                };
                let device = adapter.device(address).ok()?;
                let name = device.name().await.ok().flatten();
                let rssi = device.rssi().await.ok().flatten();
                Some(vec![Advertisement {
                    id: PeripheralId::new(address.to_string()),
                    name,
                    rssi,
                }])
            }
        });

        Ok(reports.boxed())
    }

    async fn stop_scan(&self) -> BluetoothResult<()> {
        // Discovery ends when the stream returned by `start_scan` is dropped.
        debug!(adapter = %self.adapter.name(), "Discovery session released");
        Ok(())
    }

    fn peripheral(&self, id: &PeripheralId) -> BluetoothResult<BluezPeripheral> {
        let address: Address =
            id.as_str()
                .parse()
                .map_err(|_| BluetoothError::InvalidPeripheralId {
                    id: id.to_string(),
                })?;
        let device = self
            .adapter
            .device(address)
            .map_err(|_| BluetoothError::PeripheralNotFound { id: id.clone() })?;
        Ok(BluezPeripheral { device })
    }
}

/// A remote BlueZ device.
#[derive(Clone)]
pub struct BluezPeripheral {
    device: Device,
}

impl BluezPeripheral {
    async fn wait_for_services(&self) -> BluetoothResult<()> {
        let deadline = Instant::now() + SERVICES_RESOLVE_TIMEOUT;
        while !self
            .device
            .is_services_resolved()
            .await
            .map_err(|e| internal(&e))?
        {
            if Instant::now() >= deadline {
                warn!(peripheral = %self.device.address(), "Services not resolved in time");
                break;
            }
            tokio::time::sleep(SERVICES_RESOLVE_POLL).await;
        }
        Ok(())
    }
}

#[async_trait]
impl BlePeripheral for BluezPeripheral {
    type Characteristic = Characteristic;

    fn id(&self) -> PeripheralId {
        PeripheralId::new(self.device.address().to_string())
    }

    async fn connection_states(&self) -> BluetoothResult<EventStream<ConnectionState>> {
        let connected = self.device.is_connected().await.map_err(|e| internal(&e))?;
        let events = self.device.events().await.map_err(|e| internal(&e))?;

        let changes = events.filter_map(|event| async move {
            match event {
                DeviceEvent::PropertyChanged(DeviceProperty::Connected(connected)) => {
                    Some(connection_state(connected))
                }
                _ => None,
            }
        });

        Ok(stream::once(future::ready(connection_state(connected)))
            .chain(changes)
            .boxed())
    }

    async fn connect(&self) -> BluetoothResult<()> {
        self.device
            .connect()
            .await
            .map_err(|e| BluetoothError::ConnectFailed {
                message: e.to_string(),
            })
    }

    async fn disconnect(&self) -> BluetoothResult<()> {
        self.device
            .disconnect()
            .await
            .map_err(|e| BluetoothError::DisconnectFailed {
                message: e.to_string(),
            })
    }

    async fn services(&self) -> BluetoothResult<Vec<RemoteService<Characteristic>>> {
        let discovery_failed = |e: bluer::Error| BluetoothError::DiscoveryFailed {
            message: e.to_string(),
        };

        self.wait_for_services().await?;

        let mut services = Vec::new();
        for service in self.device.services().await.map_err(discovery_failed)? {
            let uuid = service.uuid().await.map_err(discovery_failed)?;
            let mut characteristics = Vec::new();
            for characteristic in service.characteristics().await.map_err(discovery_failed)? {
                characteristics.push(RemoteCharacteristic {
                    uuid: characteristic.uuid().await.map_err(discovery_failed)?,
                    handle: characteristic,
                });
            }
            services.push(RemoteService {
                uuid,
                characteristics,
            });
        }
        Ok(services)
    }

    async fn write(
        &self,
        characteristic: &Characteristic,
        value: &[u8],
        kind: WriteKind,
    ) -> BluetoothResult<()> {
        let request = CharacteristicWriteRequest {
            op_type: match kind {
                WriteKind::WithResponse => WriteOp::Request,
                WriteKind::WithoutResponse => WriteOp::Command,
            },
            ..Default::default()
        };
        characteristic
            .write_ext(value, &request)
            .await
            .map_err(|e| BluetoothError::WriteFailed {
                message: e.to_string(),
            })
    }
}
