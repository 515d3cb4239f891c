//! The bounded worker pool.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::{Instant, timeout, timeout_at};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::PoolError;

/// Default number of units of work running at once.
pub const DEFAULT_MAX_CONCURRENCY: usize = 64;
/// Default number of callers allowed to wait for a slot.
pub const DEFAULT_MAX_PENDING: usize = 1024;
/// Default bound on queueing plus running.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default bound on draining at shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Pool limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_concurrency: usize,
    pub max_pending: usize,
    pub default_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_pending: DEFAULT_MAX_PENDING,
            default_timeout: DEFAULT_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

/// Outcome of [`WorkerPool::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainReport {
    /// Work that finished while draining.
    pub completed: usize,
    /// Work still running when the drain timed out; it was told to cancel.
    pub abandoned: usize,
}

struct Inner {
    config: PoolConfig,
    permits: Arc<Semaphore>,
    waiting: AtomicUsize,
    closing: AtomicBool,
    tracker: TaskTracker,
    cancel_all: CancellationToken,
}

/// Decrements the waiting count however the wait ends.
struct WaitingSlot<'a>(&'a AtomicUsize);

impl Drop for WaitingSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs work with bounded concurrency, bounded waiting and timeouts.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<Inner>,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.inner.config)
            .field("in_flight", &self.in_flight())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

impl WorkerPool {
    /// Creates a pool. A concurrency of zero is treated as one.
    pub fn new(config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                permits: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
                waiting: AtomicUsize::new(0),
                closing: AtomicBool::new(false),
                tracker: TaskTracker::new(),
                cancel_all: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Number of units of work currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.tracker.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.closing.load(Ordering::SeqCst)
    }

    /// Runs `work` once a slot is free.
    ///
    /// `timeout` (or the configured default) bounds waiting for a slot and
    /// running together. On expiry the token handed to `work` is cancelled
    /// and `Timeout` is returned; the work keeps its slot until it stops.
    pub async fn execute<W, Fut, T>(&self, work: W, timeout: Option<Duration>) -> Result<T, PoolError>
    where
        W: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_shutting_down() {
            return Err(PoolError::ShuttingDown);
        }

        let limit = timeout.unwrap_or(self.inner.config.default_timeout);
        let deadline = Instant::now() + limit;

        let permit = {
            let waiting = self.inner.waiting.fetch_add(1, Ordering::SeqCst);
            let _slot = WaitingSlot(&self.inner.waiting);
            if waiting >= self.inner.config.max_pending
                && self.inner.permits.available_permits() == 0
            {
                return Err(PoolError::Saturated { waiting });
            }

            match timeout_at(deadline, Arc::clone(&self.inner.permits).acquire_owned()).await {
                Ok(Ok(permit)) => permit,
                // Closed by shutdown.
                Ok(Err(_)) => return Err(PoolError::ShuttingDown),
                Err(_) => return Err(self.timed_out(limit)),
            }
        };

        let token = self.inner.cancel_all.child_token();
        let handle = self.inner.tracker.spawn({
            let token = token.clone();
            async move {
                let _permit = permit;
                work(token).await
            }
        });

        match timeout_at(deadline, handle).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(join_error)) if join_error.is_panic() => Err(PoolError::Panicked),
            // Cancelled by runtime shutdown.
            Ok(Err(_)) => Err(PoolError::ShuttingDown),
            Err(_) => {
                token.cancel();
                Err(self.timed_out(limit))
            }
        }
    }

    fn timed_out(&self, limit: Duration) -> PoolError {
        metrics::counter!("worker_pool_timeouts_total").increment(1);
        warn!(?limit, "Work timed out");
        PoolError::Timeout(limit)
    }

    /// Stops accepting work and waits for in-flight work to finish.
    ///
    /// Callers still waiting for a slot get `ShuttingDown`. Work still
    /// running after `shutdown_timeout` is cancelled and reported as
    /// abandoned.
    pub async fn shutdown(&self) -> DrainReport {
        self.inner.closing.store(true, Ordering::SeqCst);
        self.inner.permits.close();
        self.inner.tracker.close();

        let running = self.inner.tracker.len();
        info!(running, "Draining worker pool");

        let drained = timeout(self.inner.config.shutdown_timeout, self.inner.tracker.wait())
            .await
            .is_ok();
        let abandoned = if drained {
            0
        } else {
            self.inner.cancel_all.cancel();
            self.inner.tracker.len()
        };

        let report = DrainReport {
            completed: running.saturating_sub(abandoned),
            abandoned,
        };
        info!(
            completed = report.completed,
            abandoned = report.abandoned,
            "Worker pool stopped"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Notify;
    use tokio::time::sleep;

    fn config(max_concurrency: usize, max_pending: usize) -> PoolConfig {
        PoolConfig {
            max_concurrency,
            max_pending,
            default_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn returns_work_output() {
        let pool = WorkerPool::default();
        let value = pool.execute(|_| async { 40 + 2 }, None).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_bounded() {
        let pool = WorkerPool::new(config(2, 100));
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let calls: Vec<_> = (0..6)
            .map(|_| {
                let pool = pool.clone();
                let running = running.clone();
                let max_seen = max_seen.clone();
                tokio::spawn(async move {
                    pool.execute(
                        move |_| async move {
                            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                            max_seen.fetch_max(now, Ordering::SeqCst);
                            sleep(Duration::from_millis(10)).await;
                            running.fetch_sub(1, Ordering::SeqCst);
                        },
                        None,
                    )
                    .await
                })
            })
            .collect();
        for call in calls {
            call.await.unwrap().unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn saturated_pool_fails_fast() {
        let pool = WorkerPool::new(config(1, 1));
        let release = Arc::new(Notify::new());

        let busy = {
            let pool = pool.clone();
            let release = release.clone();
            tokio::spawn(async move {
                pool.execute(move |_| async move { release.notified().await }, None)
                    .await
            })
        };
        let queued = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.execute(|_| async {}, None).await })
        };
        // Let both calls claim the slot and the single waiting place.
        sleep(Duration::from_millis(1)).await;

        let result = pool.execute(|_| async {}, None).await;
        assert_eq!(result, Err(PoolError::Saturated { waiting: 1 }));

        release.notify_one();
        busy.await.unwrap().unwrap();
        queued.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_cancels_the_work() {
        let pool = WorkerPool::new(config(1, 10));
        let observed = Arc::new(Notify::new());

        let result = pool
            .execute(
                {
                    let observed = observed.clone();
                    move |token: CancellationToken| async move {
                        token.cancelled().await;
                        observed.notify_one();
                    }
                },
                Some(Duration::from_millis(50)),
            )
            .await;

        assert_eq!(result, Err(PoolError::Timeout(Duration::from_millis(50))));
        observed.notified().await;
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_for_a_slot_counts_against_the_timeout() {
        let pool = WorkerPool::new(config(1, 10));
        let blocker = {
            let pool = pool.clone();
            tokio::spawn(async move {
                pool.execute(|_| sleep(Duration::from_secs(1)), None).await
            })
        };
        sleep(Duration::from_millis(1)).await;

        let result = pool
            .execute(|_| async {}, Some(Duration::from_millis(100)))
            .await;

        assert!(matches!(result, Err(PoolError::Timeout(_))));
        blocker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn panics_are_reported() {
        let pool = WorkerPool::default();
        let explode = true;
        let result = pool
            .execute(
                move |_| async move {
                    if explode {
                        panic!("boom");
                    }
                },
                None,
            )
            .await;
        assert_eq!(result, Err(PoolError::Panicked));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drains_in_flight_work() {
        let pool = WorkerPool::new(config(4, 10));
        let call = {
            let pool = pool.clone();
            tokio::spawn(async move {
                pool.execute(|_| async { sleep(Duration::from_millis(200)).await; 7 }, None)
                    .await
            })
        };
        sleep(Duration::from_millis(1)).await;
        assert_eq!(pool.in_flight(), 1);

        let report = pool.shutdown().await;

        assert_eq!(report, DrainReport { completed: 1, abandoned: 0 });
        assert_eq!(call.await.unwrap(), Ok(7));
        assert_eq!(
            pool.execute(|_| async {}, None).await,
            Err(PoolError::ShuttingDown)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_abandons_work_past_the_drain_bound() {
        let pool = WorkerPool::new(config(4, 10));
        let cancelled = Arc::new(AtomicBool::new(false));
        let _call = {
            let pool = pool.clone();
            let cancelled = cancelled.clone();
            tokio::spawn(async move {
                pool.execute(
                    move |token: CancellationToken| async move {
                        tokio::select! {
                            _ = token.cancelled() => cancelled.store(true, Ordering::SeqCst),
                            _ = sleep(Duration::from_secs(60)) => {}
                        }
                    },
                    Some(Duration::from_secs(120)),
                )
                .await
            })
        };
        sleep(Duration::from_millis(1)).await;

        let report = pool.shutdown().await;

        assert_eq!(report, DrainReport { completed: 0, abandoned: 1 });
        sleep(Duration::from_millis(1)).await;
        assert!(cancelled.load(Ordering::SeqCst));
    }
}
