//! Counted synchronization primitives

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A counted barrier whose `wait()` resolves once every guard has dropped.
///
/// Used by the Kafka consumer to let `disconnect()` block until every active
/// subscription has observed the shutdown and returned. Guards decrement on
/// drop, so a subscription that exits through an error still releases its
/// slot.
#[derive(Clone, Default)]
pub struct WaitGroup {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    count: AtomicUsize,
    notify: Notify,
}

impl WaitGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one unit of in-flight work
    pub fn add(&self) -> WaitGroupGuard {
        self.inner.count.fetch_add(1, Ordering::AcqRel);
        WaitGroupGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Currently registered units
    pub fn count(&self) -> usize {
        self.inner.count.load(Ordering::Acquire)
    }

    /// Resolve once the count reaches zero
    pub async fn wait(&self) {
        loop {
            // Arm the notification before re-checking so a decrement between
            // the check and the await is not lost.
            let notified = self.inner.notify.notified();
            if self.inner.count.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Releases its wait-group slot on drop
pub struct WaitGroupGuard {
    inner: Arc<Inner>,
}

impl Drop for WaitGroupGuard {
    fn drop(&mut self) {
        if self.inner.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.notify.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_resolves_immediately_when_empty() {
        let wg = WaitGroup::new();
        tokio::time::timeout(Duration::from_secs(1), wg.wait())
            .await
            .expect("empty wait group must not block");
    }

    #[tokio::test]
    async fn test_wait_blocks_until_guards_drop() {
        let wg = WaitGroup::new();
        let guards: Vec<_> = (0..3).map(|_| wg.add()).collect();
        assert_eq!(wg.count(), 3);

        let waiter = {
            let wg = wg.clone();
            tokio::spawn(async move { wg.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guards);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait must resolve after all guards drop")
            .unwrap();
        assert_eq!(wg.count(), 0);
    }

    #[tokio::test]
    async fn test_guard_released_on_early_exit() {
        let wg = WaitGroup::new();

        let task = {
            let wg = wg.clone();
            tokio::spawn(async move {
                let _guard = wg.add();
                // Simulated handler error: the guard still drops
                Err::<(), &str>("handler failed")
            })
        };
        let _ = task.await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), wg.wait())
            .await
            .expect("guard must release on early exit");
    }
}
