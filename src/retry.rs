//! Delayed retries with cancellation
//!
//! Backpressure and audio starvation are both handled by trying again after
//! a fixed delay. A `RetryTimer` pairs that delay with a cancellation token so
//! that stopping a receiver or pacer also stops every retry it has in flight.

use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

/// Fixed-interval retry driver
#[derive(Debug, Clone)]
pub struct RetryTimer {
    interval: Duration,
    cancel: CancellationToken,
}

impl RetryTimer {
    pub fn new(interval: Duration, cancel: CancellationToken) -> Self {
        Self { interval, cancel }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Sleep for one interval. Returns false if cancelled first.
    pub async fn sleep(&self) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.interval) => !self.cancel.is_cancelled(),
        }
    }

    /// Poll `ready` until it returns true, sleeping between attempts.
    ///
    /// Returns false if cancelled before `ready` succeeded.
    pub async fn wait_until(&self, mut ready: impl FnMut() -> bool) -> bool {
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            if ready() {
                return true;
            }
            if !self.sleep().await {
                return false;
            }
        }
    }

    /// Offer `item` to `put` until it is accepted.
    ///
    /// `put` hands the item back when it cannot take it yet. On cancellation the
    /// item is returned to the caller.
    pub async fn offer<T>(&self, mut item: T, mut put: impl FnMut(T) -> Result<(), T>) -> Result<(), T> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(item);
            }
            match put(item) {
                Ok(()) => return Ok(()),
                Err(rejected) => item = rejected,
            }
            if !self.sleep().await {
                return Err(item);
            }
        }
    }

    /// Run `task` once after one interval on `handle`, unless cancelled meanwhile.
    pub fn schedule(&self, handle: &Handle, task: impl FnOnce() + Send + 'static) {
        let timer = self.clone();
        handle.spawn(async move {
            if timer.sleep().await {
                task();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn timer() -> RetryTimer {
        RetryTimer::new(Duration::from_millis(5), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_wait_until_retries() {
        let attempts = AtomicUsize::new(0);
        let ok = timer()
            .wait_until(|| attempts.fetch_add(1, Ordering::SeqCst) >= 3)
            .await;

        assert!(ok);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_wait_until_cancelled() {
        let timer = timer();
        timer.token().cancel();
        assert!(!timer.wait_until(|| true).await);
    }

    #[tokio::test]
    async fn test_offer_returns_item_when_cancelled() {
        let timer = timer();
        let token = timer.token().clone();
        let rejected = AtomicUsize::new(0);

        let result = timer
            .offer(7u32, |item| {
                if rejected.fetch_add(1, Ordering::SeqCst) == 2 {
                    token.cancel();
                }
                Err(item)
            })
            .await;

        assert_eq!(result, Err(7));
    }

    #[tokio::test]
    async fn test_offer_accepted_after_retries() {
        let mut remaining = 2;
        let result = timer()
            .offer("frame", |item| {
                if remaining == 0 {
                    Ok(())
                } else {
                    remaining -= 1;
                    Err(item)
                }
            })
            .await;

        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn test_schedule_skipped_after_cancel() {
        let timer = RetryTimer::new(Duration::from_millis(20), CancellationToken::new());
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        timer.schedule(&Handle::current(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        timer.token().cancel();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_schedule_fires() {
        let timer = timer();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        timer.schedule(&Handle::current(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
