//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use lumen_core::{Config, LedControl};

use crate::api::error::{ApiError, ApiResult};

/// Shared application state handed to every handler.
pub type SharedState = Arc<AppState>;

/// Application state.
pub struct AppState {
    /// Effective configuration.
    pub config: Config,
    controller: Option<Arc<dyn LedControl>>,
    started: Instant,
    started_at_utc: DateTime<Utc>,
}

impl AppState {
    /// Create state around an optional controller.
    ///
    /// `None` means the BLE stack could not be initialised; BLE endpoints then
    /// answer 503.
    pub fn new(config: Config, controller: Option<Arc<dyn LedControl>>) -> Self {
        Self {
            config,
            controller,
            started: Instant::now(),
            started_at_utc: Utc::now(),
        }
    }

    /// Wrap into [`SharedState`].
    #[must_use]
    pub fn shared(self) -> SharedState {
        Arc::new(self)
    }

    /// The controller, or a 503 if Bluetooth is unavailable.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::ServiceUnavailable`] when no controller exists.
    pub fn controller(&self) -> ApiResult<&Arc<dyn LedControl>> {
        self.controller
            .as_ref()
            .ok_or_else(ApiError::bluetooth_unavailable)
    }

    /// Whether a BLE stack is available.
    #[must_use]
    pub fn bluetooth_available(&self) -> bool {
        self.controller.is_some()
    }

    /// Seconds since the state was created.
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// When the server started.
    #[must_use]
    pub const fn started_at_utc(&self) -> DateTime<Utc> {
        self.started_at_utc
    }
}
