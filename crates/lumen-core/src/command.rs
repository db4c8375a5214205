//! LED command writes.
//!
//! A write is only attempted while the characteristic is resolved and the
//! cached `is_connected` flag is set. A failed write clears `is_connected`
//! so no further writes are attempted until a new scan and connect. The
//! characteristic itself stays until the stack reports a disconnect.

use tracing::{error, info, warn};

use crate::bluetooth::{BleBackend, BlePeripheral};
use crate::connection::ConnectionManager;
use crate::error::{LumenError, Result};
use crate::protocol::Command;
use crate::status::{Notifier, StatusHandle};
use crate::types::{NoticeKind, WriteKind};

/// Message shown when a command is issued without a usable link.
pub const NOT_CONNECTED_MESSAGE: &str = "Not connected to ESP32";

/// Writes [`Command`]s to the resolved characteristic.
pub struct CommandWriter<B: BleBackend> {
    connection: ConnectionManager<B>,
    status: StatusHandle,
    notifier: Notifier,
}

impl<B: BleBackend> CommandWriter<B> {
    /// Create a writer over the link owned by `connection`.
    pub fn new(connection: ConnectionManager<B>, status: StatusHandle, notifier: Notifier) -> Self {
        Self {
            connection,
            status,
            notifier,
        }
    }

    /// Write `command` with acknowledgment.
    ///
    /// # Errors
    ///
    /// - [`LumenError::NotConnected`] if the precondition fails. Nothing is
    ///   written.
    /// - [`LumenError::WriteFailed`] if the write fails. `is_connected` is
    ///   cleared.
    ///
    /// Both raise a user notice.
    pub async fn send(&self, command: Command) -> Result<()> {
        let target = self
            .connection
            .writable()
            .filter(|_| self.status.get().is_connected);

        let Some((peripheral, characteristic)) = target else {
            warn!(%command, "Command rejected: not connected");
            self.notifier
                .notify(NoticeKind::NotConnected, NOT_CONNECTED_MESSAGE);
            return Err(LumenError::NotConnected);
        };

        let id = peripheral.id();
        match peripheral
            .write(&characteristic, command.payload(), WriteKind::WithResponse)
            .await
        {
            Ok(()) => {
                info!(peripheral = %id, %command, "LED command written");
                Ok(())
            }
            Err(e) => {
                error!(peripheral = %id, %command, error = %e, "LED command write failed");
                self.status.set_connected(false);
                self.notifier
                    .notify(NoticeKind::WriteFailed, command.failure_message());
                Err(LumenError::WriteFailed {
                    command,
                    message: e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::bluetooth::{MockBackend, MockCall, MockDevice};
    use crate::protocol::{LED_COMMAND_UUID, LED_SERVICE_UUID};
    use crate::resolver::ServiceResolver;
    use crate::types::{ConnectionState, PeripheralId};

    const LED_ADDR: &str = "24:6F:28:1A:2B:3C";

    struct Fixture {
        backend: MockBackend,
        led: MockDevice,
        status: StatusHandle,
        notifier: Notifier,
        connection: ConnectionManager<MockBackend>,
        writer: CommandWriter<MockBackend>,
    }

    fn fixture() -> Fixture {
        let backend = MockBackend::new();
        let led = backend.add_led_device(LED_ADDR);
        let status = StatusHandle::new();
        let notifier = Notifier::new();
        let connection = ConnectionManager::new(
            Arc::new(backend.clone()),
            status.clone(),
            ServiceResolver::new(LED_SERVICE_UUID, LED_COMMAND_UUID),
        );
        let writer = CommandWriter::new(connection.clone(), status.clone(), notifier.clone());
        Fixture {
            backend,
            led,
            status,
            notifier,
            connection,
            writer,
        }
    }

    async fn connected() -> Fixture {
        let f = fixture();
        f.connection
            .connect(&PeripheralId::new(LED_ADDR), Duration::from_secs(15))
            .await
            .unwrap();
        let mut rx = f.connection.subscribe();
        tokio::time::timeout(
            Duration::from_secs(1),
            rx.wait_for(|s| s.characteristic_resolved),
        )
        .await
        .unwrap()
        .unwrap();
        f
    }

    fn write_count(backend: &MockBackend) -> usize {
        backend
            .calls()
            .iter()
            .filter(|call| matches!(call, MockCall::Write { .. }))
            .count()
    }

    #[tokio::test]
    async fn test_rejects_without_link() {
        let f = fixture();

        let err = f.writer.send(Command::On).await.unwrap_err();

        assert!(matches!(err, LumenError::NotConnected));
        assert_eq!(write_count(&f.backend), 0);
        let notices = f.notifier.recent();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].kind, NoticeKind::NotConnected);
        assert_eq!(notices[0].message, "Not connected to ESP32");
    }

    #[tokio::test]
    async fn test_rejects_when_flag_cleared() {
        let f = connected().await;
        f.status.set_connected(false);

        let err = f.writer.send(Command::Off).await.unwrap_err();

        assert!(matches!(err, LumenError::NotConnected));
        assert_eq!(write_count(&f.backend), 0);
    }

    #[tokio::test]
    async fn test_on_writes_ascii_one_with_response() {
        let f = connected().await;

        f.writer.send(Command::On).await.unwrap();

        assert_eq!(f.backend.writes(), vec![(b"1".to_vec(), WriteKind::WithResponse)]);
        assert!(f.status.get().is_connected);
        assert!(f.notifier.recent().is_empty());
    }

    #[tokio::test]
    async fn test_off_writes_ascii_zero() {
        let f = connected().await;

        f.writer.send(Command::Off).await.unwrap();

        assert_eq!(f.backend.writes(), vec![(vec![0x30], WriteKind::WithResponse)]);
    }

    #[tokio::test]
    async fn test_write_failure_downgrades_link() {
        let f = connected().await;
        f.led.fail_writes(Some("org.bluez.Error.Failed"));

        let err = f.writer.send(Command::On).await.unwrap_err();

        assert!(matches!(
            err,
            LumenError::WriteFailed {
                command: Command::On,
                ..
            }
        ));
        assert!(!f.status.get().is_connected);
        // The characteristic survives until the stack reports a disconnect.
        assert!(f.connection.snapshot().characteristic_resolved);

        let failures: Vec<_> = f
            .notifier
            .recent()
            .into_iter()
            .filter(|n| n.kind == NoticeKind::WriteFailed)
            .collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].message, "Failed to turn LED ON");
    }

    #[tokio::test]
    async fn test_no_writes_after_failure_until_reconnect() {
        let f = connected().await;
        f.led.fail_writes(Some("org.bluez.Error.Failed"));
        let _ = f.writer.send(Command::On).await;
        f.led.fail_writes(None);

        let err = f.writer.send(Command::Off).await.unwrap_err();

        assert!(matches!(err, LumenError::NotConnected));
        assert_eq!(write_count(&f.backend), 1);
    }

    #[tokio::test]
    async fn test_disconnect_transition_clears_characteristic_after_failure() {
        let f = connected().await;
        f.led.fail_writes(Some("org.bluez.Error.Failed"));
        let _ = f.writer.send(Command::On).await;

        f.led.emit_state(ConnectionState::Disconnected);
        let mut rx = f.connection.subscribe();
        tokio::time::timeout(
            Duration::from_secs(1),
            rx.wait_for(|s| !s.characteristic_resolved),
        )
        .await
        .unwrap()
        .unwrap();

        assert!(f.connection.writable().is_none());
    }
}
