use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Cooperative cancellation: one `cancel` call flips the flag and wakes
/// every waiter. Clones share the same signal, so the handle can be given
/// to both the caller and the task it may want to abort.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    canceled: AtomicBool,
    notify: Notify,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.canceled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called. Safe to await repeatedly
    /// and from several clones at once.
    pub async fn canceled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before re-checking the flag so a cancel landing in
            // between cannot be missed.
            notified.as_mut().enable();
            if self.is_canceled() {
                return;
            }
            notified.await;
        }
    }

    /// Whether two handles share the same underlying signal.
    pub fn same_signal(&self, other: &CancelHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_wakes_waiters_and_sticks() {
        let handle = CancelHandle::new();
        assert!(!handle.is_canceled());

        let waiter = handle.clone();
        let task = tokio::spawn(async move {
            waiter.canceled().await;
        });

        handle.cancel();
        task.await.unwrap();
        assert!(handle.is_canceled());

        // Already-canceled handles resolve immediately.
        handle.canceled().await;
    }

    #[tokio::test]
    async fn cancel_before_wait_resolves_immediately() {
        let handle = CancelHandle::new();
        handle.cancel();
        handle.canceled().await;
    }

    #[test]
    fn clones_share_the_signal() {
        let a = CancelHandle::new();
        let b = a.clone();
        let other = CancelHandle::new();
        assert!(a.same_signal(&b));
        assert!(!a.same_signal(&other));

        b.cancel();
        assert!(a.is_canceled());
    }
}
