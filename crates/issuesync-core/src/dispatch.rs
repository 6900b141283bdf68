//! Bounded work dispatch.
//!
//! One dispatcher exists per (project group, direction): a bounded queue
//! serviced by a fixed set of workers. Before running an item a worker
//! acquires a permit from the direction's rate limiter, so throughput is
//! capped by worker count and permit budget, whichever is smaller.
//!
//! The queue is intentionally a backpressure point: when it is full,
//! `submit` blocks the caller until space frees up. Callers that must
//! not block use `try_submit` and handle the explicit capacity error.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::SyncError;
use crate::rate_limit::RateLimiter;

/// A deferred unit of work. Carries no identity beyond what the handler
/// closes over; failures are reported inside the item itself.
pub type WorkItem = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// How long `shutdown` waits for queued and in-flight items.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(120);

pub struct Dispatcher {
    name: String,
    sender: parking_lot::Mutex<Option<mpsc::Sender<WorkItem>>>,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    pending: Arc<AtomicUsize>,
}

impl Dispatcher {
    pub fn start(
        name: impl Into<String>,
        queue_size: usize,
        worker_count: usize,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        let name = name.into();
        let (sender, receiver) = mpsc::channel::<WorkItem>(queue_size.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let pending = Arc::new(AtomicUsize::new(0));

        let workers = (0..worker_count.max(1))
            .map(|index| {
                let receiver = Arc::clone(&receiver);
                let limiter = Arc::clone(&limiter);
                let pending = Arc::clone(&pending);
                let name = name.clone();
                tokio::spawn(async move {
                    loop {
                        // the receive lock is only contended while idle;
                        // it is released before the item runs
                        let work = { receiver.lock().await.recv().await };
                        let Some(work) = work else { break };

                        limiter.acquire().await;
                        pending.fetch_sub(1, Ordering::Relaxed);

                        // one failing item must not take the worker down with it
                        if let Err(panic) = std::panic::AssertUnwindSafe(work).catch_unwind().await
                        {
                            let message = panic
                                .downcast_ref::<&str>()
                                .map(|s| (*s).to_string())
                                .or_else(|| panic.downcast_ref::<String>().cloned())
                                .unwrap_or_else(|| "<non-string panic>".to_string());
                            error!(dispatcher = %name, worker = index, panic = %message,
                                "work item panicked");
                        }
                    }
                })
            })
            .collect();

        Self {
            name,
            sender: parking_lot::Mutex::new(Some(sender)),
            workers: parking_lot::Mutex::new(workers),
            pending,
        }
    }

    /// Enqueues a work item, blocking while the queue is full.
    pub async fn submit(&self, work: WorkItem) -> Result<(), SyncError> {
        let Some(sender) = self.sender.lock().clone() else {
            return Err(SyncError::QueueClosed);
        };
        self.pending.fetch_add(1, Ordering::Relaxed);
        if sender.send(work).await.is_err() {
            self.pending.fetch_sub(1, Ordering::Relaxed);
            return Err(SyncError::QueueClosed);
        }
        Ok(())
    }

    /// Non-blocking variant surfacing an explicit capacity error.
    pub fn try_submit(&self, work: WorkItem) -> Result<(), SyncError> {
        let Some(sender) = self.sender.lock().clone() else {
            return Err(SyncError::QueueClosed);
        };
        match sender.try_send(work) {
            Ok(()) => {
                self.pending.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(SyncError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SyncError::QueueClosed),
        }
    }

    /// Number of items accepted but not yet executed.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    /// Stops accepting work, then waits up to `drain_timeout` for queued
    /// and in-flight items. Whatever is left after the timeout is
    /// abandoned with a warning; no rollback is attempted.
    pub async fn shutdown(&self, drain_timeout: Duration) {
        drop(self.sender.lock().take());

        let workers = std::mem::take(&mut *self.workers.lock());
        let deadline = tokio::time::Instant::now() + drain_timeout;
        let mut abandoned = false;
        for mut worker in workers {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, &mut worker).await.is_err() {
                worker.abort();
                abandoned = true;
            }
        }
        if abandoned {
            warn!(dispatcher = %self.name,
                unprocessed = self.pending(),
                "not all events were processed before the shutdown");
        } else {
            info!(dispatcher = %self.name, "drained");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::pin;
    use std::task::Context;
    use tokio::sync::Notify;

    fn limiter() -> Arc<RateLimiter> {
        RateLimiter::start("test", u32::MAX, Duration::from_secs(3600))
    }

    fn is_pending(future: &mut (impl Future + Unpin)) -> bool {
        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        Pin::new(future).poll(&mut cx).is_pending()
    }

    #[tokio::test]
    async fn saturated_queue_blocks_the_submitter() {
        let dispatcher = Dispatcher::start("test", 1, 1, limiter());
        let gate = Arc::new(Notify::new());

        // occupy the single worker
        let held = Arc::clone(&gate);
        dispatcher
            .submit(Box::pin(async move { held.notified().await }))
            .await
            .unwrap();
        tokio::task::yield_now().await;

        // fill the queue
        dispatcher.submit(Box::pin(async {})).await.unwrap();

        // the queue is full now: blocking submit stays pending, and the
        // explicit variant reports capacity instead of dropping work
        let mut blocked = pin!(dispatcher.submit(Box::pin(async {})));
        for _ in 0..4 {
            assert!(is_pending(&mut blocked));
            tokio::task::yield_now().await;
        }
        assert!(matches!(
            dispatcher.try_submit(Box::pin(async {})),
            Err(SyncError::QueueFull)
        ));

        // freeing the worker unblocks the stalled submission
        gate.notify_one();
        tokio::time::timeout(Duration::from_secs(1), blocked).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn worker_survives_failing_items() {
        let dispatcher = Dispatcher::start("test", 16, 1, limiter());
        let done = Arc::new(AtomicUsize::new(0));

        dispatcher.submit(Box::pin(async { panic!("kaboom") })).await.unwrap();
        let counter = Arc::clone(&done);
        dispatcher
            .submit(Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .await
            .unwrap();

        dispatcher.shutdown(Duration::from_secs(5)).await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_drains_queued_items() {
        let dispatcher = Dispatcher::start("test", 64, 2, limiter());
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let counter = Arc::clone(&done);
            dispatcher
                .submit(Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }))
                .await
                .unwrap();
        }

        dispatcher.shutdown(Duration::from_secs(10)).await;
        assert_eq!(done.load(Ordering::SeqCst), 20);
        assert_eq!(dispatcher.pending(), 0);
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_rejected() {
        let dispatcher = Dispatcher::start("test", 4, 1, limiter());
        dispatcher.shutdown(Duration::from_secs(1)).await;
        assert!(matches!(
            dispatcher.submit(Box::pin(async {})).await,
            Err(SyncError::QueueClosed)
        ));
    }
}
