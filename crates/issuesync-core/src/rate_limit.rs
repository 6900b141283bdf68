//! Windowed admission control.
//!
//! The remote instances meter REST traffic, so workers acquire a permit
//! before touching them. The budget is a plain counter refilled to the
//! configured maximum on a fixed interval — deliberately not a leaky
//! bucket: a caller draining all permits right before a reset, followed
//! by another burst right after it, can observe up to 2×M admissions in
//! a short real-time span. That simplification matches the remote's own
//! windowed accounting closely enough in practice.

use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

pub struct RateLimiter {
    permits: Mutex<u32>,
    max_permits: u32,
    refill: Notify,
    reset_task: Mutex<Option<JoinHandle<()>>>,
}

impl RateLimiter {
    /// Creates a limiter with `max_permits` per `window` and starts its
    /// reset timer.
    pub fn start(name: impl Into<String>, max_permits: u32, window: Duration) -> Arc<Self> {
        let limiter = Arc::new(Self {
            permits: Mutex::new(max_permits),
            max_permits,
            refill: Notify::new(),
            reset_task: Mutex::new(None),
        });

        let name = name.into();
        let weak = Arc::downgrade(&limiter);
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(window);
            // the first tick completes immediately; skip it so the first
            // window starts full rather than double-filled
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(limiter) = weak.upgrade() else { break };
                limiter.reset();
                debug!(limiter = %name, "rate limiter window reset");
            }
        });
        *limiter.reset_task.lock() = Some(task);
        limiter
    }

    /// Waits until a permit is available. Never fails, only delays.
    pub async fn acquire(&self) {
        loop {
            // notify_waiters only wakes waiters that are already
            // registered, so the waiter is enabled before the re-check
            let mut refill = pin!(self.refill.notified());
            refill.as_mut().enable();
            if self.try_acquire() {
                return;
            }
            refill.await;
        }
    }

    fn try_acquire(&self) -> bool {
        let mut permits = self.permits.lock();
        if *permits > 0 {
            *permits -= 1;
            true
        } else {
            false
        }
    }

    /// Unconditionally refills to the maximum, discarding whatever was
    /// left of the previous window.
    fn reset(&self) {
        *self.permits.lock() = self.max_permits;
        self.refill.notify_waiters();
    }

    pub fn available(&self) -> u32 {
        *self.permits.lock()
    }

    /// Cancels the reset timer. In-flight `acquire` calls are left
    /// waiting; shutdown is expected to tear the workers down next.
    pub fn shutdown(&self) {
        if let Some(task) = self.reset_task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::{pin, Pin};
    use std::task::Context;

    fn is_ready(future: &mut (impl Future<Output = ()> + Unpin)) -> bool {
        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        Pin::new(future).poll(&mut cx).is_ready()
    }

    #[tokio::test(start_paused = true)]
    async fn budget_admits_exactly_max_per_window() {
        let limiter = RateLimiter::start("test", 3, Duration::from_secs(2));

        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(limiter.available(), 0);

        let mut fourth = pin!(limiter.acquire());
        assert!(!is_ready(&mut fourth));

        // the next window frees the blocked acquisition
        tokio::time::sleep(Duration::from_secs(2)).await;
        tokio::time::timeout(Duration::from_secs(1), fourth).await.unwrap();
        assert_eq!(limiter.available(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_discards_unused_permits() {
        let limiter = RateLimiter::start("test", 5, Duration::from_secs(2));
        limiter.acquire().await;
        assert_eq!(limiter.available(), 4);

        tokio::time::sleep(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(limiter.available(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn double_budget_burst_across_window_boundary() {
        let limiter = RateLimiter::start("test", 2, Duration::from_secs(2));
        limiter.acquire().await;
        limiter.acquire().await;

        tokio::time::sleep(Duration::from_secs(2)).await;
        // 2M admissions within one wall-clock window-ish span; this is
        // the documented simplification, not a bug
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(limiter.available(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_waiter_wakes_on_the_reset_itself() {
        let limiter = RateLimiter::start("test", 1, Duration::from_secs(60));
        limiter.acquire().await;

        let mut blocked = pin!(limiter.acquire());
        assert!(!is_ready(&mut blocked));
        // the waiter registered during the failed attempt above, so the
        // reset reaches it without waiting for the timer window
        limiter.reset();
        assert!(is_ready(&mut blocked));
        assert_eq!(limiter.available(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_refills() {
        let limiter = RateLimiter::start("test", 1, Duration::from_secs(2));
        limiter.acquire().await;
        limiter.shutdown();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(limiter.available(), 0);
    }
}
