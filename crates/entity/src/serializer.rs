//! Per-aggregate serialization of work.
//!
//! Work submitted for the same aggregate runs one item at a time in
//! submission order; work for different aggregates runs in parallel. Each
//! active aggregate gets a queue drained by its own task, and the queue is
//! removed as soon as it runs dry, so the registry only holds aggregates
//! with pending work.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use common::AggregateId;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::SerializerError;

type Job = BoxFuture<'static, ()>;
type Queues = HashMap<AggregateId, mpsc::UnboundedSender<Job>>;
type Registry = Arc<Mutex<Queues>>;

fn lock(registry: &Registry) -> MutexGuard<'_, Queues> {
    // Map operations cannot panic midway, so a poisoned map is still consistent.
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

fn report_active(queues: usize) {
    metrics::gauge!("serializer_queues_active").set(queues as f64);
}

/// Runs futures one at a time per aggregate.
#[derive(Clone, Default)]
pub struct AggregateSerializer {
    queues: Registry,
}

impl AggregateSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `work` behind everything already submitted for `aggregate`.
    ///
    /// The work is enqueued immediately; the returned future only waits for
    /// its result. Must be called from within a Tokio runtime.
    pub fn submit<F, T>(
        &self,
        aggregate: &AggregateId,
        work: F,
    ) -> impl Future<Output = Result<T, SerializerError>> + Send + use<F, T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            // The caller may have stopped waiting.
            let _ = tx.send(work.await);
        });
        self.enqueue(aggregate.clone(), job);
        async move { rx.await.map_err(|_| SerializerError::Aborted) }
    }

    /// Runs `work` once everything submitted earlier for `aggregate` is done.
    pub async fn run<F, T>(&self, aggregate: &AggregateId, work: F) -> Result<T, SerializerError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.submit(aggregate, work).await
    }

    /// Number of aggregates with queued or running work.
    pub fn pending_keys(&self) -> usize {
        lock(&self.queues).len()
    }

    fn enqueue(&self, key: AggregateId, job: Job) {
        let mut queues = lock(&self.queues);
        let job = match queues.get(&key) {
            Some(sender) => match sender.send(job) {
                Ok(()) => return,
                // The worker is gone without deregistering (its task was
                // dropped at runtime shutdown); start a new one.
                Err(mpsc::error::SendError(job)) => job,
            },
            None => job,
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        // The receiver is alive, so this cannot fail.
        let _ = sender.send(job);
        queues.insert(key.clone(), sender);
        report_active(queues.len());
        drop(queues);

        debug!(key = %key, "Starting serializer queue");
        tokio::spawn(drain(Arc::clone(&self.queues), key, receiver));
    }
}

impl std::fmt::Debug for AggregateSerializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateSerializer")
            .field("pending_keys", &self.pending_keys())
            .finish()
    }
}

/// Takes the next job, or deregisters the queue if there is none.
///
/// The emptiness check is repeated under the registry lock: `enqueue` only
/// sends while holding it, so nothing can slip in between the check and the
/// removal.
fn next_job(
    registry: &Registry,
    key: &AggregateId,
    receiver: &mut mpsc::UnboundedReceiver<Job>,
) -> Option<Job> {
    if let Ok(job) = receiver.try_recv() {
        return Some(job);
    }
    let mut queues = lock(registry);
    match receiver.try_recv() {
        Ok(job) => Some(job),
        Err(_) => {
            queues.remove(key);
            report_active(queues.len());
            None
        }
    }
}

async fn drain(registry: Registry, key: AggregateId, mut receiver: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = next_job(&registry, &key, &mut receiver) {
        if AssertUnwindSafe(job).catch_unwind().await.is_err() {
            warn!(key = %key, "Serialized job panicked");
        }
    }
    debug!(key = %key, "Serializer queue drained");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    fn id(key: &str) -> AggregateId {
        AggregateId::new("account", key)
    }

    #[tokio::test]
    async fn same_aggregate_runs_in_submission_order() {
        let serializer = AggregateSerializer::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..10u64)
            .map(|n| {
                let order = order.clone();
                serializer.submit(&id("a1"), async move {
                    // Later jobs finish faster if they were allowed to overlap.
                    sleep(Duration::from_millis(10 - n)).await;
                    order.lock().unwrap().push(n);
                })
            })
            .collect();
        futures_util::future::join_all(handles).await;

        assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn same_aggregate_never_overlaps() {
        let serializer = AggregateSerializer::new();
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let running = running.clone();
                let max_seen = max_seen.clone();
                serializer.submit(&id("a1"), async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(1)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for result in futures_util::future::join_all(handles).await {
            result.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn different_aggregates_run_in_parallel() {
        let serializer = AggregateSerializer::new();
        let started = tokio::time::Instant::now();

        let a = serializer.submit(&id("a1"), sleep(Duration::from_secs(1)));
        let b = serializer.submit(&id("a2"), sleep(Duration::from_secs(1)));
        let (a, b) = tokio::join!(a, b);
        a.unwrap();
        b.unwrap();

        assert!(started.elapsed() < Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn ids_sharing_a_canonical_form_get_separate_queues() {
        let serializer = AggregateSerializer::new();
        let started = tokio::time::Instant::now();
        let dotted_type = AggregateId::new("a.b", "c");
        let dotted_key = AggregateId::new("a", "b.c");
        assert_eq!(dotted_type.canonical(), dotted_key.canonical());

        let a = serializer.submit(&dotted_type, sleep(Duration::from_secs(1)));
        let b = serializer.submit(&dotted_key, sleep(Duration::from_secs(1)));
        let (a, b) = tokio::join!(a, b);
        a.unwrap();
        b.unwrap();

        assert!(started.elapsed() < Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn registry_empties_once_work_completes() {
        let serializer = AggregateSerializer::new();
        for key in ["a1", "a2", "a3"] {
            serializer.run(&id(key), async {}).await.unwrap();
        }

        // The worker deregisters after handing back the last result.
        for _ in 0..100 {
            if serializer.pending_keys() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(serializer.pending_keys(), 0);
    }

    #[tokio::test]
    async fn panicking_job_is_isolated() {
        let serializer = AggregateSerializer::new();

        let explode = true;
        let failed = serializer.submit(&id("a1"), async move {
            if explode {
                panic!("boom");
            }
        });
        let next = serializer.submit(&id("a1"), async { 7 });

        assert_eq!(failed.await, Err(SerializerError::Aborted));
        assert_eq!(next.await, Ok(7));
    }

    #[tokio::test]
    async fn returns_work_output() {
        let serializer = AggregateSerializer::new();
        let value = serializer.run(&id("a1"), async { "done" }).await.unwrap();
        assert_eq!(value, "done");
    }
}
