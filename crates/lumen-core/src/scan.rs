//! Time-bounded discovery scan.
//!
//! A scan streams advertisement batches until one carries the target name or
//! the deadline passes. The first match wins: the rest of its batch is
//! skipped, the result stream is dropped (cancelling the subscription), the
//! stack scan is stopped and `is_scanning` drops back to `false`, in that
//! order, before the caller sees the outcome.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::bluetooth::BleBackend;
use crate::error::Result;
use crate::status::{ScanFlag, StatusHandle};
use crate::types::{Advertisement, PeripheralId};

/// How a scan ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// A peripheral advertising the target name was found.
    Found(Advertisement),
    /// No match before the deadline. Not an error.
    TimedOut,
    /// Another scan was running; nothing was done.
    AlreadyRunning,
}

impl ScanOutcome {
    /// The matched peripheral, if any.
    #[must_use]
    pub const fn peripheral(&self) -> Option<&PeripheralId> {
        match self {
            Self::Found(advertisement) => Some(&advertisement.id),
            Self::TimedOut | Self::AlreadyRunning => None,
        }
    }
}

/// Immediate answer to a request to start a background scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct ScanStart {
    /// `false` when a scan was already running.
    pub started: bool,
}

/// Drives discovery scans against a backend.
pub struct ScanSession<B> {
    backend: Arc<B>,
    status: StatusHandle,
}

impl<B: BleBackend> ScanSession<B> {
    /// Create a scan session over `backend`.
    pub fn new(backend: Arc<B>, status: StatusHandle) -> Self {
        Self { backend, status }
    }

    /// Scan for a peripheral advertising exactly `name` for at most `timeout`.
    ///
    /// Returns [`ScanOutcome::AlreadyRunning`] without touching the stack if
    /// a scan is in progress.
    ///
    /// # Errors
    ///
    /// Returns [`LumenError::ScanFailed`](crate::error::LumenError::ScanFailed)
    /// if the stack refuses to start the scan.
    pub async fn run(&self, name: &str, timeout: Duration) -> Result<ScanOutcome> {
        let Some(flag) = ScanFlag::acquire(&self.status) else {
            debug!("Scan requested while one is running");
            return Ok(ScanOutcome::AlreadyRunning);
        };

        info!(name, timeout_secs = timeout.as_secs(), "Starting scan");
        let mut reports = self.backend.start_scan().await.map_err(|e| {
            warn!(error = %e, "Failed to start scan");
            e
        })?;

        let deadline = Instant::now() + timeout;
        let found = loop {
            match timeout_at(deadline, reports.next()).await {
                Ok(Some(batch)) => {
                    debug!(reports = batch.len(), "Advertisement batch");
                    if let Some(advertisement) = batch.into_iter().find(|a| a.has_name(name)) {
                        break Some(advertisement);
                    }
                }
                Ok(None) => {
                    debug!("Scan stream ended");
                    break None;
                }
                Err(_) => break None,
            }
        };

        drop(reports);
        self.stop().await;
        drop(flag);

        Ok(match found {
            Some(advertisement) => {
                info!(
                    peripheral = %advertisement.id,
                    rssi = advertisement.rssi,
                    "Found {name}"
                );
                ScanOutcome::Found(advertisement)
            }
            None => {
                info!(name, "Scan finished without a match");
                ScanOutcome::TimedOut
            }
        })
    }

    /// Stop the stack scan, logging failures.
    pub async fn stop(&self) {
        if let Err(e) = self.backend.stop_scan().await {
            warn!(error = %e, "Failed to stop scan");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::{MockBackend, MockCall};
    use crate::error::LumenError;
    use crate::protocol::DEVICE_NAME;

    fn session(backend: &MockBackend) -> (ScanSession<MockBackend>, StatusHandle) {
        let status = StatusHandle::new();
        (
            ScanSession::new(Arc::new(backend.clone()), status.clone()),
            status,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_finds_named_peripheral() {
        let backend = MockBackend::new();
        let led = backend.add_led_device("24:6F:28:1A:2B:3C");
        backend.push_scan_batch(vec![led.advertisement()]);
        let (session, status) = session(&backend);

        let outcome = session
            .run(DEVICE_NAME, Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(outcome, ScanOutcome::Found(led.advertisement()));
        assert!(!status.get().is_scanning);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancels_subscription_before_stopping() {
        let backend = MockBackend::new();
        let led = backend.add_led_device("24:6F:28:1A:2B:3C");
        backend.push_scan_batch(vec![led.advertisement()]);
        let (session, _status) = session(&backend);

        session
            .run(DEVICE_NAME, Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(
            backend.calls(),
            vec![
                MockCall::StartScan,
                MockCall::ScanUnsubscribed,
                MockCall::StopScan
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_match_in_batch_wins() {
        let backend = MockBackend::new();
        let speaker = backend.add_device("F4:4E:FD:00:11:22", Some("JBL Flip 5"));
        let first = backend.add_led_device("24:6F:28:00:00:01");
        let second = backend.add_led_device("24:6F:28:00:00:02");
        backend.push_scan_batch(vec![
            speaker.advertisement(),
            first.advertisement(),
            second.advertisement(),
        ]);
        let (session, _status) = session(&backend);

        let outcome = session
            .run(DEVICE_NAME, Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(outcome.peripheral(), Some(&first.advertisement().id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_name_match_is_exact() {
        let backend = MockBackend::new();
        let lower = backend.add_device("24:6F:28:00:00:01", Some("esp32_led"));
        let longer = backend.add_device("24:6F:28:00:00:02", Some("ESP32_LED_2"));
        let unnamed = backend.add_device("24:6F:28:00:00:03", None);
        backend.push_scan_batch(vec![
            lower.advertisement(),
            longer.advertisement(),
            unnamed.advertisement(),
        ]);
        let (session, status) = session(&backend);

        let outcome = session
            .run(DEVICE_NAME, Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(outcome, ScanOutcome::TimedOut);
        assert!(!status.get().is_scanning);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_without_match() {
        let backend = MockBackend::new();
        let (session, status) = session(&backend);

        let started = Instant::now();
        let outcome = session
            .run(DEVICE_NAME, Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(outcome, ScanOutcome::TimedOut);
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(!status.get().is_scanning);
        assert_eq!(backend.connect_count(), 0);
        assert!(backend.calls().contains(&MockCall::StopScan));
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_running_is_a_no_op() {
        let backend = MockBackend::new();
        let (session, status) = session(&backend);
        let _held = ScanFlag::acquire(&status).unwrap();

        let outcome = session
            .run(DEVICE_NAME, Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(outcome, ScanOutcome::AlreadyRunning);
        assert!(backend.calls().is_empty());
        assert!(status.get().is_scanning);
    }

    #[tokio::test]
    async fn test_start_failure_releases_flag() {
        let backend = MockBackend::new();
        backend.fail_scan("org.bluez.Error.NotReady");
        let (session, status) = session(&backend);

        let err = session
            .run(DEVICE_NAME, Duration::from_secs(10))
            .await
            .unwrap_err();

        assert!(matches!(err, LumenError::ScanFailed(_)));
        assert!(!status.get().is_scanning);
    }
}
