//! Scriptable in-memory BLE stack.
//!
//! Every stack interaction is appended to a shared call log so tests can
//! assert ordering, e.g. that the connection-state subscription precedes the
//! connect call.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{future, stream, StreamExt};
use tokio::time::{sleep_until, Instant};
use uuid::Uuid;

use super::{BleBackend, BlePeripheral, BluetoothError, BluetoothResult, EventStream};
use crate::permissions::{Capability, CapabilityGrant};
use crate::protocol::{DEVICE_NAME, LED_COMMAND_UUID, LED_SERVICE_UUID};
use crate::types::{
    AdapterState, Advertisement, ConnectionState, PeripheralId, RemoteCharacteristic,
    RemoteService, WriteKind,
};

type CallLog = Arc<Mutex<Vec<MockCall>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One recorded stack interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// `request_capabilities` was called.
    RequestCapabilities,
    /// `start_scan` was called.
    StartScan,
    /// The scan result stream was dropped.
    ScanUnsubscribed,
    /// `stop_scan` was called.
    StopScan,
    /// `connection_states` was called on a peripheral.
    SubscribeConnection(PeripheralId),
    /// `connect` was called.
    Connect(PeripheralId),
    /// `disconnect` was called.
    Disconnect(PeripheralId),
    /// `services` was called.
    Services(PeripheralId),
    /// `write` was called.
    Write {
        /// Target peripheral.
        peripheral: PeripheralId,
        /// Bytes written.
        payload: Vec<u8>,
        /// Delivery mode.
        kind: WriteKind,
    },
}

/// How a mock peripheral answers `connect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectBehavior {
    /// Connect and report `Connected` on the state stream.
    Succeed,
    /// Fail with the given message.
    Fail(String),
    /// Never complete.
    Hang,
}

/// Characteristic handle of a mock peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCharacteristic {
    /// Characteristic UUID.
    pub uuid: Uuid,
}

struct BackendInner {
    adapter_states: Vec<AdapterState>,
    close_adapter_stream: bool,
    denied: HashSet<Capability>,
    /// Batches with their delivery offset from scan start.
    scan_batches: Vec<(Duration, Vec<Advertisement>)>,
    scan_stays_open: bool,
    scan_error: Option<String>,
    devices: HashMap<PeripheralId, MockDevice>,
}

/// In-memory BLE stack.
#[derive(Clone)]
pub struct MockBackend {
    inner: Arc<Mutex<BackendInner>>,
    log: CallLog,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// A powered-on stack that grants everything and scans until timed out.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BackendInner {
                adapter_states: vec![AdapterState::On],
                close_adapter_stream: false,
                denied: HashSet::new(),
                scan_batches: Vec::new(),
                scan_stays_open: true,
                scan_error: None,
                devices: HashMap::new(),
            })),
            log: Arc::default(),
        }
    }

    /// A stack with one ESP32 LED peripheral advertising among other devices.
    #[must_use]
    pub fn demo() -> Self {
        let backend = Self::new();
        let led = backend.add_led_device("24:6F:28:1A:2B:3C");
        let speaker = backend.add_device("F4:4E:FD:00:11:22", Some("JBL Flip 5"));
        let beacon = backend.add_device("C8:0F:10:33:44:55", None);
        backend.push_scan_batch(vec![speaker.advertisement(), beacon.advertisement()]);
        backend.push_scan_batch(vec![led.advertisement()]);
        backend
    }

    /// Replace the adapter states replayed to each subscriber.
    pub fn set_adapter_states(&self, states: Vec<AdapterState>) {
        lock(&self.inner).adapter_states = states;
    }

    /// End the adapter state stream after the replayed states.
    pub fn close_adapter_stream(&self) {
        lock(&self.inner).close_adapter_stream = true;
    }

    /// Refuse `capability` on future requests.
    pub fn deny_capability(&self, capability: Capability) {
        lock(&self.inner).denied.insert(capability);
    }

    /// Grant `capability` on future requests.
    pub fn grant_capability(&self, capability: Capability) {
        lock(&self.inner).denied.remove(&capability);
    }

    /// Append an advertisement batch delivered by every scan.
    pub fn push_scan_batch(&self, batch: Vec<Advertisement>) {
        self.push_scan_batch_after(Duration::ZERO, batch);
    }

    /// Append a batch delivered `after` the scan starts.
    ///
    /// Batches are delivered in the order pushed, so offsets should not
    /// decrease.
    pub fn push_scan_batch_after(&self, after: Duration, batch: Vec<Advertisement>) {
        lock(&self.inner).scan_batches.push((after, batch));
    }

    /// Whether the scan stream stays open after its batches (default) or ends.
    pub fn set_scan_stays_open(&self, open: bool) {
        lock(&self.inner).scan_stays_open = open;
    }

    /// Make `start_scan` fail.
    pub fn fail_scan(&self, message: &str) {
        lock(&self.inner).scan_error = Some(message.to_string());
    }

    /// Register a peripheral without services.
    pub fn add_device(&self, id: &str, name: Option<&str>) -> MockDevice {
        let device = MockDevice::new(PeripheralId::new(id), name, self.log.clone());
        lock(&self.inner)
            .devices
            .insert(device.id.clone(), device.clone());
        device
    }

    /// Register an `ESP32_LED` peripheral exposing the LED service.
    pub fn add_led_device(&self, id: &str) -> MockDevice {
        let device = self.add_device(id, Some(DEVICE_NAME));
        device.set_services(&[(LED_SERVICE_UUID, &[LED_COMMAND_UUID])]);
        device
    }

    /// All recorded stack interactions, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.log).clone()
    }

    /// Number of `connect` calls made so far.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, MockCall::Connect(_)))
            .count()
    }

    /// Payloads written so far, in order.
    #[must_use]
    pub fn writes(&self) -> Vec<(Vec<u8>, WriteKind)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                MockCall::Write { payload, kind, .. } => Some((payload, kind)),
                _ => None,
            })
            .collect()
    }
}

struct ScanSubscription {
    log: CallLog,
}

impl Drop for ScanSubscription {
    fn drop(&mut self) {
        lock(&self.log).push(MockCall::ScanUnsubscribed);
    }
}

#[async_trait]
impl BleBackend for MockBackend {
    type Peripheral = MockDevice;

    async fn adapter_states(&self) -> BluetoothResult<EventStream<AdapterState>> {
        let (states, close) = {
            let inner = lock(&self.inner);
            (inner.adapter_states.clone(), inner.close_adapter_stream)
        };
        let replay = stream::iter(states);
        Ok(if close {
            replay.boxed()
        } else {
            replay.chain(stream::pending()).boxed()
        })
    }

    async fn request_capabilities(
        &self,
        capabilities: &[Capability],
    ) -> BluetoothResult<Vec<CapabilityGrant>> {
        lock(&self.log).push(MockCall::RequestCapabilities);
        let inner = lock(&self.inner);
        Ok(capabilities
            .iter()
            .map(|&capability| CapabilityGrant {
                capability,
                granted: !inner.denied.contains(&capability),
            })
            .collect())
    }

    async fn start_scan(&self) -> BluetoothResult<EventStream<Vec<Advertisement>>> {
        lock(&self.log).push(MockCall::StartScan);
        let (batches, stays_open, error) = {
            let inner = lock(&self.inner);
            (
                inner.scan_batches.clone(),
                inner.scan_stays_open,
                inner.scan_error.clone(),
            )
        };
        if let Some(message) = error {
            return Err(BluetoothError::ScanFailed { message });
        }

        let subscription = ScanSubscription {
            log: self.log.clone(),
        };
        let started = Instant::now();
        let replay = stream::iter(batches).then(move |(after, batch)| async move {
            if !after.is_zero() {
                sleep_until(started + after).await;
            }
            batch
        });
        let reports = if stays_open {
            replay.chain(stream::pending()).boxed()
        } else {
            replay.boxed()
        };
        Ok(reports
            .map(move |batch| {
                let _subscription = &subscription;
                batch
            })
            .boxed())
    }

    async fn stop_scan(&self) -> BluetoothResult<()> {
        lock(&self.log).push(MockCall::StopScan);
        Ok(())
    }

    fn peripheral(&self, id: &PeripheralId) -> BluetoothResult<MockDevice> {
        lock(&self.inner)
            .devices
            .get(id)
            .cloned()
            .ok_or_else(|| BluetoothError::PeripheralNotFound { id: id.clone() })
    }
}

struct DeviceInner {
    state: ConnectionState,
    connect: ConnectBehavior,
    disconnect_error: Option<String>,
    write_error: Option<String>,
    services_error: Option<String>,
    services: Vec<RemoteService<MockCharacteristic>>,
    subscribers: Vec<mpsc::UnboundedSender<ConnectionState>>,
}

/// A scriptable remote peripheral.
#[derive(Clone)]
pub struct MockDevice {
    id: PeripheralId,
    name: Option<String>,
    inner: Arc<Mutex<DeviceInner>>,
    log: CallLog,
}

impl MockDevice {
    fn new(id: PeripheralId, name: Option<&str>, log: CallLog) -> Self {
        Self {
            id,
            name: name.map(str::to_string),
            inner: Arc::new(Mutex::new(DeviceInner {
                state: ConnectionState::Disconnected,
                connect: ConnectBehavior::Succeed,
                disconnect_error: None,
                write_error: None,
                services_error: None,
                services: Vec::new(),
                subscribers: Vec::new(),
            })),
            log,
        }
    }

    /// The advertisement this device broadcasts.
    #[must_use]
    pub fn advertisement(&self) -> Advertisement {
        Advertisement {
            id: self.id.clone(),
            name: self.name.clone(),
            rssi: Some(-58),
        }
    }

    /// Replace the GATT table with `(service, characteristics)` pairs.
    pub fn set_services(&self, services: &[(Uuid, &[Uuid])]) {
        lock(&self.inner).services = services
            .iter()
            .map(|(service, characteristics)| RemoteService {
                uuid: *service,
                characteristics: characteristics
                    .iter()
                    .map(|&uuid| RemoteCharacteristic {
                        uuid,
                        handle: MockCharacteristic { uuid },
                    })
                    .collect(),
            })
            .collect();
    }

    /// Choose how `connect` behaves.
    pub fn set_connect_behavior(&self, behavior: ConnectBehavior) {
        lock(&self.inner).connect = behavior;
    }

    /// Make `disconnect` fail (or succeed again with `None`).
    pub fn fail_disconnect(&self, message: Option<&str>) {
        lock(&self.inner).disconnect_error = message.map(str::to_string);
    }

    /// Make writes fail (or succeed again with `None`).
    pub fn fail_writes(&self, message: Option<&str>) {
        lock(&self.inner).write_error = message.map(str::to_string);
    }

    /// Make service enumeration fail.
    pub fn fail_services(&self, message: &str) {
        lock(&self.inner).services_error = Some(message.to_string());
    }

    /// Push a connection state change as if the radio reported it.
    pub fn emit_state(&self, state: ConnectionState) {
        let mut inner = lock(&self.inner);
        inner.state = state;
        inner
            .subscribers
            .retain(|tx| tx.unbounded_send(state).is_ok());
    }

    /// Number of connection-state subscriptions still held by a listener.
    #[must_use]
    pub fn live_subscriptions(&self) -> usize {
        lock(&self.inner)
            .subscribers
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }

    fn record(&self, call: MockCall) {
        lock(&self.log).push(call);
    }
}

#[async_trait]
impl BlePeripheral for MockDevice {
    type Characteristic = MockCharacteristic;

    fn id(&self) -> PeripheralId {
        self.id.clone()
    }

    async fn connection_states(&self) -> BluetoothResult<EventStream<ConnectionState>> {
        self.record(MockCall::SubscribeConnection(self.id.clone()));
        let (tx, rx) = mpsc::unbounded();
        let mut inner = lock(&self.inner);
        // Current state first, like the real stacks.
        let _ = tx.unbounded_send(inner.state);
        inner.subscribers.push(tx);
        Ok(rx.boxed())
    }

    async fn connect(&self) -> BluetoothResult<()> {
        self.record(MockCall::Connect(self.id.clone()));
        let behavior = lock(&self.inner).connect.clone();
        match behavior {
            ConnectBehavior::Succeed => {
                self.emit_state(ConnectionState::Connected);
                Ok(())
            }
            ConnectBehavior::Fail(message) => Err(BluetoothError::ConnectFailed { message }),
            ConnectBehavior::Hang => future::pending().await,
        }
    }

    async fn disconnect(&self) -> BluetoothResult<()> {
        self.record(MockCall::Disconnect(self.id.clone()));
        let error = lock(&self.inner).disconnect_error.clone();
        if let Some(message) = error {
            return Err(BluetoothError::DisconnectFailed { message });
        }
        self.emit_state(ConnectionState::Disconnected);
        Ok(())
    }

    async fn services(&self) -> BluetoothResult<Vec<RemoteService<MockCharacteristic>>> {
        self.record(MockCall::Services(self.id.clone()));
        let inner = lock(&self.inner);
        if let Some(message) = inner.services_error.clone() {
            return Err(BluetoothError::DiscoveryFailed { message });
        }
        Ok(inner.services.clone())
    }

    async fn write(
        &self,
        _characteristic: &MockCharacteristic,
        value: &[u8],
        kind: WriteKind,
    ) -> BluetoothResult<()> {
        self.record(MockCall::Write {
            peripheral: self.id.clone(),
            payload: value.to_vec(),
            kind,
        });
        let error = lock(&self.inner).write_error.clone();
        match error {
            Some(message) => Err(BluetoothError::WriteFailed { message }),
            None => Ok(()),
        }
    }
}
