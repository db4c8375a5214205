//! The presentation-facing facade.
//!
//! [`LedController`] wires the lifecycle components to one backend:
//!
//! ```text
//! bootstrap:  AdapterMonitor -> PermissionGate [-> start_scan if auto_start]
//! start_scan: ScanSession -> ConnectionManager -> ServiceResolver (watcher)
//! led_on/off: CommandWriter
//! ```
//!
//! [`LedControl`] is the object-safe view used by the HTTP layer so handlers
//! do not need to be generic over the backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::adapter::AdapterMonitor;
use crate::bluetooth::BleBackend;
use crate::command::CommandWriter;
use crate::config::{Config, ConnectionConfig, DeviceConfig, ScanConfig};
use crate::connection::ConnectionManager;
use crate::error::{LumenError, Result};
use crate::permissions::{Capability, PermissionGate, Verdict};
use crate::protocol::Command;
use crate::resolver::ServiceResolver;
use crate::scan::{ScanOutcome, ScanSession, ScanStart};
use crate::status::{Notifier, StatusHandle};
use crate::subscription::Subscription;
use crate::types::{ControllerStatus, LinkSnapshot, Notice};

/// How long an on-demand permission request waits for the radio.
pub const ADAPTER_READY_TIMEOUT: Duration = Duration::from_secs(5);

struct Inner<B: BleBackend> {
    device: DeviceConfig,
    scan: ScanConfig,
    connection_config: ConnectionConfig,
    status: StatusHandle,
    notifier: Notifier,
    adapter: AdapterMonitor<B>,
    adapter_ready: AtomicBool,
    permissions: PermissionGate<B>,
    scanner: ScanSession<B>,
    connection: ConnectionManager<B>,
    writer: CommandWriter<B>,
    verdict: Mutex<Verdict>,
    scan_task: Mutex<Option<Subscription>>,
}

/// Drives one LED peripheral through its BLE lifecycle.
pub struct LedController<B: BleBackend> {
    inner: Arc<Inner<B>>,
}

impl<B: BleBackend> Clone for LedController<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<B: BleBackend> LedController<B> {
    /// Build a controller over `backend` using the device and timing settings
    /// of `config`.
    pub fn new(backend: B, config: &Config) -> Self {
        let backend = Arc::new(backend);
        let status = StatusHandle::new();
        let notifier = Notifier::new();
        let connection = ConnectionManager::new(
            Arc::clone(&backend),
            status.clone(),
            ServiceResolver::from_config(&config.device),
        );

        Self {
            inner: Arc::new(Inner {
                device: config.device.clone(),
                scan: config.scan.clone(),
                connection_config: config.connection.clone(),
                adapter: AdapterMonitor::new(Arc::clone(&backend)),
                adapter_ready: AtomicBool::new(false),
                permissions: PermissionGate::new(
                    Arc::clone(&backend),
                    status.clone(),
                    notifier.clone(),
                ),
                scanner: ScanSession::new(backend, status.clone()),
                writer: CommandWriter::new(connection.clone(), status.clone(), notifier.clone()),
                connection,
                status,
                notifier,
                verdict: Mutex::new(Verdict::Denied {
                    denied: Capability::REQUIRED.to_vec(),
                }),
                scan_task: Mutex::new(None),
            }),
        }
    }

    /// Current observable booleans.
    #[must_use]
    pub fn status(&self) -> ControllerStatus {
        self.inner.status.get()
    }

    /// Subscribe to the observable booleans.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<ControllerStatus> {
        self.inner.status.subscribe()
    }

    /// Current link details.
    #[must_use]
    pub fn link(&self) -> LinkSnapshot {
        self.inner.connection.snapshot()
    }

    /// Subscribe to link details.
    #[must_use]
    pub fn subscribe_link(&self) -> watch::Receiver<LinkSnapshot> {
        self.inner.connection.subscribe()
    }

    /// Subscribe to user notices raised from now on.
    #[must_use]
    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.inner.notifier.subscribe()
    }

    /// Recently raised user notices, oldest first.
    #[must_use]
    pub fn recent_notices(&self) -> Vec<Notice> {
        self.inner.notifier.recent()
    }

    /// Wait for the radio, then request capabilities.
    ///
    /// Starts a scan afterwards when `scan.auto_start` is set and every
    /// capability was granted.
    ///
    /// # Errors
    ///
    /// Returns [`LumenError::AdapterUnavailable`] if the radio never powers on.
    pub async fn bootstrap(&self) -> Result<Verdict> {
        self.ensure_adapter_ready(None).await?;
        let verdict = self.request_permissions().await?;

        if verdict.is_granted() && self.inner.scan.auto_start {
            info!("Auto-starting scan");
            if let Err(e) = self.start_scan() {
                warn!(error = %e, "Auto-start scan failed");
            }
        }
        Ok(verdict)
    }

    /// Run the permission gate and remember its verdict.
    ///
    /// The radio must have reported powered on first. If it has not, this
    /// waits up to [`ADAPTER_READY_TIMEOUT`] for it.
    ///
    /// # Errors
    ///
    /// Returns [`LumenError::AdapterUnavailable`] if the radio is not powered
    /// on in time. No capabilities are requested in that case.
    pub async fn request_permissions(&self) -> Result<Verdict> {
        self.ensure_adapter_ready(Some(ADAPTER_READY_TIMEOUT)).await?;
        let verdict = self.inner.permissions.request_capabilities().await;
        *lock(&self.inner.verdict) = verdict.clone();
        Ok(verdict)
    }

    /// Whether the radio has reported powered on.
    #[must_use]
    pub fn adapter_ready(&self) -> bool {
        self.inner.adapter_ready.load(Ordering::Acquire)
    }

    async fn ensure_adapter_ready(&self, wait: Option<Duration>) -> Result<()> {
        if self.adapter_ready() {
            return Ok(());
        }
        let ready = self.inner.adapter.await_adapter_ready();
        match wait {
            Some(limit) => timeout(limit, ready).await.map_err(|_| {
                warn!(
                    waited_secs = limit.as_secs(),
                    "Bluetooth adapter did not power on"
                );
                LumenError::AdapterUnavailable
            })??,
            None => ready.await?,
        }
        self.inner.adapter_ready.store(true, Ordering::Release);
        Ok(())
    }

    fn ensure_permitted(&self) -> Result<()> {
        if !self.inner.status.get().has_permissions {
            let denied = match &*lock(&self.inner.verdict) {
                Verdict::Denied { denied } => denied.clone(),
                Verdict::Granted => Vec::new(),
            };
            return Err(LumenError::PermissionDenied { denied });
        }
        if !self.adapter_ready() {
            return Err(LumenError::AdapterUnavailable);
        }
        Ok(())
    }

    /// Scan for the configured device and connect to it when found.
    ///
    /// # Errors
    ///
    /// - [`LumenError::PermissionDenied`] before any radio work if capabilities
    ///   were not granted.
    /// - [`LumenError::AdapterUnavailable`] if the radio never reported
    ///   powered on.
    /// - [`LumenError::ScanFailed`] if the scan cannot start.
    /// - [`LumenError::ConnectFailed`] if the match could not be connected.
    pub async fn scan_and_connect(&self) -> Result<ScanOutcome> {
        self.ensure_permitted()?;

        let outcome = self
            .inner
            .scanner
            .run(&self.inner.device.name, self.inner.scan.timeout())
            .await?;

        if let ScanOutcome::Found(advertisement) = &outcome {
            self.inner
                .connection
                .connect(&advertisement.id, self.inner.connection_config.timeout())
                .await?;
        }
        Ok(outcome)
    }

    /// Start [`scan_and_connect`](Self::scan_and_connect) in the background.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`LumenError::PermissionDenied`] if capabilities were not granted,
    /// or [`LumenError::AdapterUnavailable`] if the radio never powered on.
    pub fn start_scan(&self) -> Result<ScanStart> {
        self.ensure_permitted()?;

        let mut task = lock(&self.inner.scan_task);
        let running = task.as_ref().is_some_and(|t| !t.is_finished());
        if running || self.inner.status.get().is_scanning {
            debug!("Scan already running");
            return Ok(ScanStart { started: false });
        }

        let controller = self.clone();
        *task = Some(Subscription::spawn(async move {
            match controller.scan_and_connect().await {
                Ok(outcome) => debug!(?outcome, "Scan finished"),
                Err(e) => warn!(error = %e, "Scan and connect failed"),
            }
        }));
        Ok(ScanStart { started: true })
    }

    /// Turn the LED on.
    ///
    /// # Errors
    ///
    /// See [`CommandWriter::send`].
    pub async fn led_on(&self) -> Result<()> {
        self.send_command(Command::On).await
    }

    /// Turn the LED off.
    ///
    /// # Errors
    ///
    /// See [`CommandWriter::send`].
    pub async fn led_off(&self) -> Result<()> {
        self.send_command(Command::Off).await
    }

    /// Write `command` to the peripheral.
    ///
    /// # Errors
    ///
    /// See [`CommandWriter::send`].
    pub async fn send_command(&self, command: Command) -> Result<()> {
        self.inner.writer.send(command).await
    }

    /// Tear down the link. Idempotent.
    pub async fn disconnect(&self) {
        self.inner.connection.disconnect().await;
    }

    /// Cancel any running scan, then disconnect.
    pub async fn shutdown(&self) {
        let task = lock(&self.inner.scan_task).take();
        if let Some(task) = task {
            if !task.is_finished() {
                info!("Cancelling scan");
                task.cancel();
                self.inner.scanner.stop().await;
            }
        }
        self.disconnect().await;
        info!("Controller shut down");
    }
}

/// Object-safe controller operations for the presentation layer.
#[async_trait]
pub trait LedControl: Send + Sync {
    /// Current observable booleans.
    fn status(&self) -> ControllerStatus;

    /// Current link details.
    fn link(&self) -> LinkSnapshot;

    /// Recently raised user notices.
    fn recent_notices(&self) -> Vec<Notice>;

    /// Wait for the radio and request capabilities.
    async fn bootstrap(&self) -> Result<Verdict>;

    /// Wait for the radio, then request capabilities.
    async fn request_permissions(&self) -> Result<Verdict>;

    /// Start a background scan-and-connect.
    fn start_scan(&self) -> Result<ScanStart>;

    /// Turn the LED on.
    async fn led_on(&self) -> Result<()>;

    /// Turn the LED off.
    async fn led_off(&self) -> Result<()>;

    /// Tear down the link.
    async fn disconnect(&self);

    /// Cancel scans and disconnect.
    async fn shutdown(&self);
}

#[async_trait]
impl<B: BleBackend> LedControl for LedController<B> {
    fn status(&self) -> ControllerStatus {
        Self::status(self)
    }

    fn link(&self) -> LinkSnapshot {
        Self::link(self)
    }

    fn recent_notices(&self) -> Vec<Notice> {
        Self::recent_notices(self)
    }

    async fn bootstrap(&self) -> Result<Verdict> {
        Self::bootstrap(self).await
    }

    async fn request_permissions(&self) -> Result<Verdict> {
        Self::request_permissions(self).await
    }

    fn start_scan(&self) -> Result<ScanStart> {
        Self::start_scan(self)
    }

    async fn led_on(&self) -> Result<()> {
        Self::led_on(self).await
    }

    async fn led_off(&self) -> Result<()> {
        Self::led_off(self).await
    }

    async fn disconnect(&self) {
        Self::disconnect(self).await;
    }

    async fn shutdown(&self) {
        Self::shutdown(self).await;
    }
}
