//! One-shot wake signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A single-assignment notification.
///
/// Fires at most once. Any number of tasks may wait on it, before or after it
/// fires; once fired, every wait returns immediately. Firing never blocks and
/// a second fire is a reported no-op.
///
/// Clones share the same underlying signal.
#[derive(Debug, Clone, Default)]
pub struct Signal {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    fired: AtomicBool,
    notify: Notify,
}

impl Signal {
    /// Create an unfired signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal.
    ///
    /// Returns `true` for the call that fired it, `false` if it had already
    /// fired.
    pub fn fire(&self) -> bool {
        if self.inner.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.inner.notify.notify_waiters();
        true
    }

    /// Whether the signal has fired.
    pub fn is_fired(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }

    /// Wait until the signal fires.
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent fire between
            // the check and the await is not lost.
            notified.as_mut().enable();
            if self.is_fired() {
                return;
            }
            notified.await;
        }
    }

    /// Whether two handles refer to the same signal.
    pub fn same_signal(&self, other: &Signal) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fire_once() {
        let signal = Signal::new();
        assert!(!signal.is_fired());
        assert!(signal.fire());
        assert!(signal.is_fired());
        assert!(!signal.fire());
        assert!(!signal.fire());
        assert!(signal.is_fired());
    }

    #[tokio::test]
    async fn test_wait_after_fire_returns_immediately() {
        let signal = Signal::new();
        signal.fire();
        tokio::time::timeout(Duration::from_millis(100), signal.wait())
            .await
            .expect("fired signal should not block");
    }

    #[tokio::test]
    async fn test_wakes_all_waiters() {
        let signal = Signal::new();
        let mut waiters = Vec::new();
        for _ in 0..8 {
            let s = signal.clone();
            waiters.push(tokio::spawn(async move { s.wait().await }));
        }
        tokio::task::yield_now().await;
        assert!(signal.fire());

        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter should wake")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_unfired_signal_does_not_wake() {
        let signal = Signal::new();
        let res = tokio::time::timeout(Duration::from_millis(50), signal.wait()).await;
        assert!(res.is_err());
    }

    #[test]
    fn test_same_signal() {
        let a = Signal::new();
        let b = Signal::new();
        assert!(!a.same_signal(&b));
        assert!(a.same_signal(&a.clone()));
    }
}
