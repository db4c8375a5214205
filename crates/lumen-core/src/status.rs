//! Observable state and user-visible notifications.
//!
//! The presentation layer watches [`ControllerStatus`] through a
//! `tokio::sync::watch` channel and receives [`Notice`]s through a broadcast
//! channel. Components hold cheap clones of [`StatusHandle`] and [`Notifier`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, watch};
use tracing::debug;

use crate::types::{ControllerStatus, Notice, NoticeKind};

/// Number of notices kept for clients that poll instead of subscribing.
pub const NOTICE_HISTORY: usize = 32;

/// Shared writer for the observable booleans.
#[derive(Debug, Clone)]
pub struct StatusHandle {
    tx: Arc<watch::Sender<ControllerStatus>>,
}

impl Default for StatusHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusHandle {
    /// Create a handle with every flag cleared.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ControllerStatus::default());
        Self { tx: Arc::new(tx) }
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> ControllerStatus {
        *self.tx.borrow()
    }

    /// Subscribe to changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ControllerStatus> {
        self.tx.subscribe()
    }

    /// Record the permission verdict.
    pub fn set_permissions(&self, granted: bool) {
        self.tx
            .send_if_modified(|s| std::mem::replace(&mut s.has_permissions, granted) != granted);
    }

    /// Record the cached connection flag.
    pub fn set_connected(&self, connected: bool) {
        self.tx
            .send_if_modified(|s| std::mem::replace(&mut s.is_connected, connected) != connected);
    }

    /// Atomically raise `is_scanning`.
    ///
    /// Returns `false` if a scan was already running.
    pub fn try_begin_scan(&self) -> bool {
        self.tx.send_if_modified(|s| {
            if s.is_scanning {
                false
            } else {
                s.is_scanning = true;
                true
            }
        })
    }

    /// Clear `is_scanning`.
    pub fn end_scan(&self) {
        self.tx
            .send_if_modified(|s| std::mem::replace(&mut s.is_scanning, false));
    }
}

/// Clears `is_scanning` when dropped, including when the scan task is aborted.
#[derive(Debug)]
pub struct ScanFlag {
    status: StatusHandle,
}

impl ScanFlag {
    /// Raise `is_scanning`, or return `None` if a scan is already running.
    #[must_use]
    pub fn acquire(status: &StatusHandle) -> Option<Self> {
        status.try_begin_scan().then(|| Self {
            status: status.clone(),
        })
    }
}

impl Drop for ScanFlag {
    fn drop(&mut self) {
        self.status.end_scan();
    }
}

/// Broadcasts user-visible notices and keeps a short history.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notice>,
    recent: Arc<Mutex<VecDeque<Notice>>>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    /// Create a notifier with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(NOTICE_HISTORY);
        Self {
            tx,
            recent: Arc::new(Mutex::new(VecDeque::with_capacity(NOTICE_HISTORY))),
        }
    }

    /// Subscribe to notices raised from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    /// Raise a notice.
    pub fn notify(&self, kind: NoticeKind, message: impl Into<String>) {
        let notice = Notice::new(kind, message);
        debug!(kind = ?notice.kind, message = %notice.message, "User notice");

        {
            let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
            if recent.len() == NOTICE_HISTORY {
                recent.pop_front();
            }
            recent.push_back(notice.clone());
        }

        // No subscribers is fine; the history still has it.
        let _ = self.tx.send(notice);
    }

    /// The most recent notices, oldest first.
    #[must_use]
    pub fn recent(&self) -> Vec<Notice> {
        self.recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_flag_is_exclusive() {
        let status = StatusHandle::new();
        let first = ScanFlag::acquire(&status);
        assert!(first.is_some());
        assert!(status.get().is_scanning);

        assert!(ScanFlag::acquire(&status).is_none());

        drop(first);
        assert!(!status.get().is_scanning);
        assert!(ScanFlag::acquire(&status).is_some());
    }

    #[test]
    fn test_setters_only_notify_on_change() {
        let status = StatusHandle::new();
        let mut rx = status.subscribe();

        status.set_connected(false);
        assert!(!rx.has_changed().unwrap());

        status.set_connected(true);
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_connected);
    }

    #[tokio::test]
    async fn test_notifier_broadcasts_and_remembers() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();

        notifier.notify(NoticeKind::NotConnected, "Not connected to ESP32");

        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.kind, NoticeKind::NotConnected);
        assert_eq!(notifier.recent().len(), 1);
    }

    #[test]
    fn test_notice_history_is_bounded() {
        let notifier = Notifier::new();
        for i in 0..(NOTICE_HISTORY + 5) {
            notifier.notify(NoticeKind::WriteFailed, format!("notice {i}"));
        }

        let recent = notifier.recent();
        assert_eq!(recent.len(), NOTICE_HISTORY);
        assert_eq!(recent[0].message, "notice 5");
    }
}
