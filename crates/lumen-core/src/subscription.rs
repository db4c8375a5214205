//! Owned background tasks.
//!
//! A [`Subscription`] owns a spawned task and aborts it when dropped, so
//! storing one in a struct ties the task's lifetime to the owner.

use std::future::Future;

use tokio::task::JoinHandle;

/// A spawned task cancelled on drop.
#[derive(Debug)]
#[must_use = "dropping a Subscription cancels its task"]
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    /// Spawn `task` on the current runtime.
    pub fn spawn<F>(task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(task),
        }
    }

    /// Abort the task now.
    pub fn cancel(self) {
        drop(self);
    }

    /// Whether the task has run to completion or been aborted.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_aborts_task() {
        let dropped = Arc::new(AtomicBool::new(false));
        let guard = SetOnDrop(dropped.clone());

        let subscription = Subscription::spawn(async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        });
        tokio::task::yield_now().await;
        assert!(!subscription.is_finished());

        subscription.cancel();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_completed_task_reports_finished() {
        let subscription = Subscription::spawn(async {});
        for _ in 0..10 {
            if subscription.is_finished() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(subscription.is_finished());
    }
}
