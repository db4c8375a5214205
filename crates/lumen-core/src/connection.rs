//! Lifecycle of the single peripheral link.
//!
//! [`ConnectionManager`] is the only writer of the link state: the owned
//! peripheral, the last observed [`ConnectionState`] and the resolved command
//! characteristic. A background watcher follows the peripheral's state stream:
//!
//! - `Connected`: `is_connected` is set and the characteristic is resolved.
//! - anything else: `is_connected` is cleared and so is the characteristic.
//!
//! The characteristic is therefore only ever set while the observed state is
//! `Connected`. Failures are logged and folded into state. Dropped links are
//! not reconnected; a new scan is needed.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bluetooth::{BleBackend, BlePeripheral, EventStream};
use crate::error::{LumenError, Result};
use crate::resolver::ServiceResolver;
use crate::status::StatusHandle;
use crate::subscription::Subscription;
use crate::types::{ConnectionState, LinkSnapshot, PeripheralId};

struct Link<P: BlePeripheral> {
    peripheral: Option<P>,
    characteristic: Option<P::Characteristic>,
    state: ConnectionState,
    watcher: Option<Subscription>,
    /// Bumped whenever the link is replaced or torn down, so a stale
    /// watcher can never write into a newer link.
    generation: u64,
}

impl<P: BlePeripheral> Link<P> {
    fn snapshot(&self) -> LinkSnapshot {
        LinkSnapshot {
            state: self.state,
            peripheral_id: self.peripheral.as_ref().map(|p| p.id()),
            characteristic_resolved: self.characteristic.is_some(),
        }
    }
}

struct Shared<P: BlePeripheral> {
    link: Mutex<Link<P>>,
    snapshot: watch::Sender<LinkSnapshot>,
    status: StatusHandle,
    resolver: ServiceResolver,
}

impl<P: BlePeripheral> Shared<P> {
    fn lock(&self) -> MutexGuard<'_, Link<P>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, link: &Link<P>) {
        self.snapshot.send_replace(link.snapshot());
    }

    /// Record a state reported by the stack. Returns `false` if the watcher
    /// is stale.
    fn observe(&self, generation: u64, state: ConnectionState) -> bool {
        let mut link = self.lock();
        if link.generation != generation {
            return false;
        }
        link.state = state;
        if state != ConnectionState::Connected {
            link.characteristic = None;
        }
        self.status.set_connected(state == ConnectionState::Connected);
        self.publish(&link);
        true
    }

    fn store_characteristic(&self, generation: u64, characteristic: P::Characteristic) {
        let mut link = self.lock();
        if link.generation == generation && link.state == ConnectionState::Connected {
            link.characteristic = Some(characteristic);
            self.publish(&link);
        }
    }

    /// Take ownership of `peripheral` and start watching its state stream.
    fn adopt(self: &Arc<Self>, peripheral: P, states: EventStream<ConnectionState>) {
        let mut link = self.lock();
        link.generation += 1;
        let generation = link.generation;
        link.peripheral = Some(peripheral.clone());
        link.characteristic = None;
        link.state = ConnectionState::Connecting;
        link.watcher = Some(Subscription::spawn(watch_link(
            Arc::downgrade(self),
            peripheral,
            states,
            generation,
        )));
        self.publish(&link);
    }

    /// Detach the current peripheral and its watcher.
    fn release(&self) -> (u64, Option<P>, Option<Subscription>) {
        let mut link = self.lock();
        link.generation += 1;
        let peripheral = link.peripheral.take();
        let watcher = link.watcher.take();
        link.characteristic = None;
        link.state = if peripheral.is_some() {
            ConnectionState::Disconnecting
        } else {
            ConnectionState::Disconnected
        };
        self.status.set_connected(false);
        self.publish(&link);
        (link.generation, peripheral, watcher)
    }

    fn settle_disconnected(&self, generation: u64) {
        let mut link = self.lock();
        if link.generation == generation {
            link.state = ConnectionState::Disconnected;
            link.characteristic = None;
            self.status.set_connected(false);
            self.publish(&link);
        }
    }
}

/// Follows one peripheral's state stream. Holds the manager weakly: the
/// manager owns this task, and dropping the manager ends it.
async fn watch_link<P: BlePeripheral>(
    shared: Weak<Shared<P>>,
    peripheral: P,
    mut states: EventStream<ConnectionState>,
    generation: u64,
) {
    let id = peripheral.id();
    while let Some(state) = states.next().await {
        debug!(peripheral = %id, %state, "Connection state");
        let Some(manager) = shared.upgrade() else {
            return;
        };
        if !manager.observe(generation, state) {
            return;
        }
        let resolver = manager.resolver;
        drop(manager);

        if state == ConnectionState::Connected {
            if let Some(characteristic) = resolver.discover(&peripheral, state).await {
                if let Some(manager) = shared.upgrade() {
                    manager.store_characteristic(generation, characteristic);
                }
            }
        } else if state == ConnectionState::Disconnected {
            info!(peripheral = %id, "Peripheral disconnected");
        }
    }
    debug!(peripheral = %id, "Connection state stream ended");
    if let Some(manager) = shared.upgrade() {
        manager.observe(generation, ConnectionState::Disconnected);
    }
}

/// Owns the single peripheral connection.
pub struct ConnectionManager<B: BleBackend> {
    backend: Arc<B>,
    shared: Arc<Shared<B::Peripheral>>,
}

impl<B: BleBackend> Clone for ConnectionManager<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<B: BleBackend> ConnectionManager<B> {
    /// Create a manager with no link.
    pub fn new(backend: Arc<B>, status: StatusHandle, resolver: ServiceResolver) -> Self {
        let (snapshot, _rx) = watch::channel(LinkSnapshot::default());
        Self {
            backend,
            shared: Arc::new(Shared {
                link: Mutex::new(Link {
                    peripheral: None,
                    characteristic: None,
                    state: ConnectionState::Disconnected,
                    watcher: None,
                    generation: 0,
                }),
                snapshot,
                status,
                resolver,
            }),
        }
    }

    /// Current link details.
    #[must_use]
    pub fn snapshot(&self) -> LinkSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    /// Subscribe to link changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LinkSnapshot> {
        self.shared.snapshot.subscribe()
    }

    /// The peripheral and resolved characteristic, if both are present.
    #[must_use]
    pub fn writable(
        &self,
    ) -> Option<(
        B::Peripheral,
        <B::Peripheral as BlePeripheral>::Characteristic,
    )> {
        let link = self.shared.lock();
        Some((link.peripheral.clone()?, link.characteristic.clone()?))
    }

    /// Connect to `id`, giving up after `timeout`.
    ///
    /// Any existing link is torn down first. The state stream is subscribed
    /// before the connect call is issued. On success the watcher resolves the
    /// characteristic once `Connected` is observed.
    ///
    /// # Errors
    ///
    /// Returns [`LumenError::PeripheralNotFound`] or
    /// [`LumenError::ConnectFailed`]. The failure is already logged and the
    /// link is left disconnected.
    pub async fn connect(&self, id: &PeripheralId, timeout: Duration) -> Result<()> {
        self.disconnect().await;

        let peripheral = self.backend.peripheral(id).map_err(|e| {
            warn!(peripheral = %id, error = %e, "Unknown peripheral");
            LumenError::from(e)
        })?;

        let states = match peripheral.connection_states().await {
            Ok(states) => states,
            Err(e) => {
                warn!(peripheral = %id, error = %e, "Failed to watch connection state");
                self.shared.status.set_connected(false);
                return Err(LumenError::ConnectFailed(e.to_string()));
            }
        };
        self.shared.adopt(peripheral.clone(), states);

        info!(peripheral = %id, timeout_secs = timeout.as_secs(), "Connecting");
        let error = match tokio::time::timeout(timeout, peripheral.connect()).await {
            Ok(Ok(())) => {
                info!(peripheral = %id, "Connected");
                return Ok(());
            }
            Ok(Err(e)) => LumenError::ConnectFailed(e.to_string()),
            Err(_) => {
                LumenError::ConnectFailed(format!("timed out after {}s", timeout.as_secs()))
            }
        };

        warn!(peripheral = %id, error = %error, "Connection failed");
        self.disconnect().await;
        Err(error)
    }

    /// Tear down the link.
    ///
    /// Safe to call with no link. The watcher is cancelled first, stack
    /// errors are logged, and the link always ends `Disconnected` with no
    /// characteristic and `is_connected` cleared.
    pub async fn disconnect(&self) {
        let (generation, peripheral, watcher) = self.shared.release();
        drop(watcher);

        if let Some(peripheral) = peripheral {
            let id = peripheral.id();
            info!(peripheral = %id, "Disconnecting");
            if let Err(e) = peripheral.disconnect().await {
                warn!(peripheral = %id, error = %e, "Disconnect failed");
            }
        }

        self.shared.settle_disconnected(generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::{ConnectBehavior, MockBackend, MockCall, MockDevice};
    use crate::protocol::{LED_COMMAND_UUID, LED_SERVICE_UUID};

    const LED_ADDR: &str = "24:6F:28:1A:2B:3C";
    const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

    struct Fixture {
        backend: MockBackend,
        led: MockDevice,
        status: StatusHandle,
        manager: ConnectionManager<MockBackend>,
    }

    fn fixture() -> Fixture {
        let backend = MockBackend::new();
        let led = backend.add_led_device(LED_ADDR);
        let status = StatusHandle::new();
        let manager = ConnectionManager::new(
            Arc::new(backend.clone()),
            status.clone(),
            ServiceResolver::new(LED_SERVICE_UUID, LED_COMMAND_UUID),
        );
        Fixture {
            backend,
            led,
            status,
            manager,
        }
    }

    async fn wait_for(manager: &ConnectionManager<MockBackend>, f: impl Fn(&LinkSnapshot) -> bool) {
        let mut rx = manager.subscribe();
        tokio::time::timeout(Duration::from_secs(1), rx.wait_for(|s| f(s)))
            .await
            .expect("link did not settle")
            .unwrap();
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn assert_invariant(manager: &ConnectionManager<MockBackend>) {
        let snapshot = manager.snapshot();
        if snapshot.characteristic_resolved {
            assert_eq!(snapshot.state, ConnectionState::Connected);
        }
    }

    #[tokio::test]
    async fn test_fresh_manager_is_disconnected() {
        let f = fixture();
        assert_eq!(f.manager.snapshot(), LinkSnapshot::default());
        assert!(f.manager.writable().is_none());
        assert!(!f.status.get().is_connected);
    }

    #[tokio::test]
    async fn test_subscribes_before_connecting() {
        let f = fixture();
        f.manager.connect(&PeripheralId::new(LED_ADDR), CONNECT_TIMEOUT).await.unwrap();

        let id = PeripheralId::new(LED_ADDR);
        let calls = f.backend.calls();
        let subscribe = calls
            .iter()
            .position(|c| *c == MockCall::SubscribeConnection(id.clone()))
            .unwrap();
        let connect = calls.iter().position(|c| *c == MockCall::Connect(id.clone())).unwrap();
        assert!(subscribe < connect);
    }

    #[tokio::test]
    async fn test_connect_resolves_characteristic() {
        let f = fixture();
        f.manager.connect(&PeripheralId::new(LED_ADDR), CONNECT_TIMEOUT).await.unwrap();

        wait_for(&f.manager, |s| s.characteristic_resolved).await;

        let snapshot = f.manager.snapshot();
        assert_eq!(snapshot.state, ConnectionState::Connected);
        assert_eq!(snapshot.peripheral_id, Some(PeripheralId::new(LED_ADDR)));
        assert!(f.status.get().is_connected);
        assert!(f.manager.writable().is_some());
        assert_eq!(f.backend.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_discovery_miss_leaves_characteristic_unset() {
        let f = fixture();
        f.led.set_services(&[]);
        f.manager.connect(&PeripheralId::new(LED_ADDR), CONNECT_TIMEOUT).await.unwrap();

        wait_for(&f.manager, |s| s.state == ConnectionState::Connected).await;
        settle().await;

        assert!(f.status.get().is_connected);
        assert!(!f.manager.snapshot().characteristic_resolved);
        assert!(f.manager.writable().is_none());
    }

    #[tokio::test]
    async fn test_connect_failure_is_reflected_as_disconnected() {
        let f = fixture();
        f.led
            .set_connect_behavior(ConnectBehavior::Fail("le-connection-abort-by-local".into()));

        let err = f
            .manager
            .connect(&PeripheralId::new(LED_ADDR), CONNECT_TIMEOUT)
            .await
            .unwrap_err();

        assert!(matches!(err, LumenError::ConnectFailed(_)));
        assert_eq!(f.manager.snapshot(), LinkSnapshot::default());
        assert!(!f.status.get().is_connected);
        assert_invariant(&f.manager);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let f = fixture();
        f.led.set_connect_behavior(ConnectBehavior::Hang);

        let started = tokio::time::Instant::now();
        let err = f
            .manager
            .connect(&PeripheralId::new(LED_ADDR), CONNECT_TIMEOUT)
            .await
            .unwrap_err();

        assert!(started.elapsed() >= CONNECT_TIMEOUT);
        assert!(err.to_string().contains("timed out"));
        assert!(!f.status.get().is_connected);
        assert_eq!(f.manager.snapshot().state, ConnectionState::Disconnected);
        assert!(f
            .backend
            .calls()
            .contains(&MockCall::Disconnect(PeripheralId::new(LED_ADDR))));
    }

    #[tokio::test]
    async fn test_unknown_peripheral() {
        let f = fixture();
        let err = f
            .manager
            .connect(&PeripheralId::new("00:00:00:00:00:00"), CONNECT_TIMEOUT)
            .await
            .unwrap_err();

        assert!(matches!(err, LumenError::PeripheralNotFound(_)));
        assert_eq!(f.backend.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_without_link_is_a_no_op() {
        let f = fixture();
        f.manager.disconnect().await;
        f.manager.disconnect().await;

        assert!(f.backend.calls().is_empty());
        assert_eq!(f.manager.snapshot(), LinkSnapshot::default());
        assert!(!f.status.get().is_connected);
    }

    #[tokio::test]
    async fn test_disconnect_clears_link_and_subscription() {
        let f = fixture();
        f.manager.connect(&PeripheralId::new(LED_ADDR), CONNECT_TIMEOUT).await.unwrap();
        wait_for(&f.manager, |s| s.characteristic_resolved).await;

        f.manager.disconnect().await;
        settle().await;

        assert_eq!(f.manager.snapshot(), LinkSnapshot::default());
        assert!(f.manager.writable().is_none());
        assert!(!f.status.get().is_connected);
        assert_eq!(f.led.live_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_tolerates_stack_error() {
        let f = fixture();
        f.manager.connect(&PeripheralId::new(LED_ADDR), CONNECT_TIMEOUT).await.unwrap();
        wait_for(&f.manager, |s| s.characteristic_resolved).await;
        f.led.fail_disconnect(Some("org.bluez.Error.NotConnected"));

        f.manager.disconnect().await;

        assert_eq!(f.manager.snapshot(), LinkSnapshot::default());
        assert!(!f.status.get().is_connected);
    }

    #[tokio::test]
    async fn test_radio_drop_clears_characteristic() {
        let f = fixture();
        f.manager.connect(&PeripheralId::new(LED_ADDR), CONNECT_TIMEOUT).await.unwrap();
        wait_for(&f.manager, |s| s.characteristic_resolved).await;

        f.led.emit_state(ConnectionState::Disconnected);
        wait_for(&f.manager, |s| s.state == ConnectionState::Disconnected).await;

        assert!(!f.manager.snapshot().characteristic_resolved);
        assert!(!f.status.get().is_connected);
        assert_invariant(&f.manager);
        // No automatic reconnect.
        settle().await;
        assert_eq!(f.backend.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_replaces_previous_link() {
        let f = fixture();
        let other = f.backend.add_led_device("24:6F:28:99:99:99");
        f.manager.connect(&PeripheralId::new(LED_ADDR), CONNECT_TIMEOUT).await.unwrap();
        wait_for(&f.manager, |s| s.characteristic_resolved).await;

        f.manager
            .connect(&PeripheralId::new("24:6F:28:99:99:99"), CONNECT_TIMEOUT)
            .await
            .unwrap();
        wait_for(&f.manager, |s| s.characteristic_resolved).await;
        settle().await;

        assert!(f
            .backend
            .calls()
            .contains(&MockCall::Disconnect(PeripheralId::new(LED_ADDR))));
        assert_eq!(
            f.manager.snapshot().peripheral_id,
            Some(PeripheralId::new("24:6F:28:99:99:99"))
        );
        assert_eq!(f.led.live_subscriptions(), 0);
        assert_eq!(other.live_subscriptions(), 1);
    }

    #[tokio::test]
    async fn test_dropping_manager_releases_watcher() {
        let f = fixture();
        f.manager.connect(&PeripheralId::new(LED_ADDR), CONNECT_TIMEOUT).await.unwrap();
        wait_for(&f.manager, |s| s.characteristic_resolved).await;
        assert_eq!(f.led.live_subscriptions(), 1);

        drop(f.manager);
        settle().await;

        assert_eq!(f.led.live_subscriptions(), 0);
    }
}
