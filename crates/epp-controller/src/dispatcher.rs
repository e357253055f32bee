//! Worker pool that drains a [`WorkQueue`] through a reconcile function

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use epp_common::ReconcileError;

use crate::queue::{QueueKey, WorkQueue};
use crate::ReconcileStatus;

/// Default number of concurrent workers per dispatcher
pub const DEFAULT_WORKERS: usize = 4;

/// Runs reconciles for one kind with bounded concurrency
///
/// Distinct keys are reconciled in parallel; the queue guarantees the same
/// key is never held by two workers.
pub struct Dispatcher<K, C> {
    name: &'static str,
    queue: Arc<WorkQueue<K>>,
    ctx: Arc<C>,
    workers: usize,
}

impl<K, C> Dispatcher<K, C>
where
    K: QueueKey,
    C: Send + Sync + 'static,
{
    /// Create a dispatcher named `name` (used in logs) over `queue`
    pub fn new(name: &'static str, queue: Arc<WorkQueue<K>>, ctx: Arc<C>) -> Self {
        Self {
            name,
            queue,
            ctx,
            workers: DEFAULT_WORKERS,
        }
    }

    /// Set the number of workers (at least one)
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Run until `shutdown` fires, then wait for in-flight reconciles
    ///
    /// Outcomes:
    /// - `Done` resets the key's failure count
    /// - `RequeueAfter` resets it and schedules the key again
    /// - a recoverable error re-adds the key with backoff
    /// - a fatal error is logged and the key dropped until its next notification
    pub async fn run<F, Fut>(self, reconcile: F, shutdown: CancellationToken)
    where
        F: Fn(K, Arc<C>, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ReconcileStatus, ReconcileError>> + Send + 'static,
    {
        let reconcile = Arc::new(reconcile);
        let mut workers = JoinSet::new();

        info!(controller = self.name, workers = self.workers, "starting workers");
        for id in 0..self.workers {
            workers.spawn(worker(
                self.name,
                id,
                Arc::clone(&self.queue),
                Arc::clone(&self.ctx),
                Arc::clone(&reconcile),
                shutdown.clone(),
            ));
        }

        shutdown.cancelled().await;
        self.queue.shutdown();

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(controller = self.name, error = %e, "worker task failed");
            }
        }
        info!(controller = self.name, "workers stopped");
    }
}

async fn worker<K, C, F, Fut>(
    name: &'static str,
    id: usize,
    queue: Arc<WorkQueue<K>>,
    ctx: Arc<C>,
    reconcile: Arc<F>,
    shutdown: CancellationToken,
) where
    K: QueueKey,
    F: Fn(K, Arc<C>, CancellationToken) -> Fut,
    Fut: Future<Output = Result<ReconcileStatus, ReconcileError>>,
{
    while let Some(key) = queue.get().await {
        let result = reconcile(key.clone(), Arc::clone(&ctx), shutdown.child_token()).await;

        match result {
            Ok(ReconcileStatus::Done) => {
                debug!(controller = name, worker = id, %key, "reconciled");
                queue.forget(&key);
            }
            Ok(ReconcileStatus::RequeueAfter(delay)) => {
                debug!(controller = name, worker = id, %key, ?delay, "reconciled, requeue requested");
                queue.forget(&key);
                queue.add_after(key.clone(), delay);
            }
            Err(ReconcileError::Cancelled) if shutdown.is_cancelled() => {
                debug!(controller = name, %key, "reconcile cancelled by shutdown");
            }
            Err(e) if e.is_retryable() => {
                let delay = queue.add_rate_limited(key.clone());
                warn!(
                    controller = name,
                    %key,
                    error = %e,
                    attempt = queue.num_requeues(&key),
                    delay_ms = delay.as_millis(),
                    "reconcile failed, will retry"
                );
            }
            Err(e) => {
                error!(controller = name, %key, error = %e, "reconcile failed permanently, dropping key");
                queue.forget(&key);
            }
        }

        queue.done(&key);
    }
}
