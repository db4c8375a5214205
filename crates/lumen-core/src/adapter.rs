//! Startup gate on radio power.
//!
//! Only the first powered-on report matters. The radio is not monitored
//! afterwards; if it is switched off mid-session the next stack operation
//! fails and is handled there.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::bluetooth::BleBackend;
use crate::error::{LumenError, Result};
use crate::types::AdapterState;

/// Waits for the local radio to report powered on.
pub struct AdapterMonitor<B> {
    backend: Arc<B>,
}

impl<B: BleBackend> AdapterMonitor<B> {
    /// Create a monitor over `backend`.
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Complete once the radio has reported [`AdapterState::On`].
    ///
    /// # Errors
    ///
    /// Returns [`LumenError::AdapterUnavailable`] if the state stream ends
    /// before the radio powers on, or the stack error if subscribing fails.
    pub async fn await_adapter_ready(&self) -> Result<()> {
        let mut states = self.backend.adapter_states().await?;

        while let Some(state) = states.next().await {
            debug!(?state, "Adapter state");
            if state == AdapterState::On {
                info!("Bluetooth adapter powered on");
                return Ok(());
            }
        }

        warn!("Adapter state stream ended before the radio powered on");
        Err(LumenError::AdapterUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::bluetooth::MockBackend;

    #[tokio::test]
    async fn test_ready_when_already_on() {
        let backend = Arc::new(MockBackend::new());
        let monitor = AdapterMonitor::new(backend);
        monitor.await_adapter_ready().await.unwrap();
    }

    #[tokio::test]
    async fn test_waits_through_off_states() {
        let backend = Arc::new(MockBackend::new());
        backend.set_adapter_states(vec![
            AdapterState::Unknown,
            AdapterState::Off,
            AdapterState::TurningOn,
            AdapterState::On,
        ]);
        let monitor = AdapterMonitor::new(backend);
        monitor.await_adapter_ready().await.unwrap();
    }

    #[tokio::test]
    async fn test_stream_end_without_power_is_an_error() {
        let backend = Arc::new(MockBackend::new());
        backend.set_adapter_states(vec![AdapterState::Off]);
        backend.close_adapter_stream();
        let monitor = AdapterMonitor::new(backend);

        let err = monitor.await_adapter_ready().await.unwrap_err();
        assert!(matches!(err, LumenError::AdapterUnavailable));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stays_pending_while_off() {
        let backend = Arc::new(MockBackend::new());
        backend.set_adapter_states(vec![AdapterState::Off]);
        let monitor = AdapterMonitor::new(backend);

        let waited =
            tokio::time::timeout(Duration::from_secs(60), monitor.await_adapter_ready()).await;
        assert!(waited.is_err());
    }
}
