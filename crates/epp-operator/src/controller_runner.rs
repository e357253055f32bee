//! Controller runner - builds the watch feeds and dispatchers for each kind
//!
//! Each kind gets its own [`WorkQueue`]: a watcher stream pushes the identity
//! of every touched object (including deletions) into it, and a
//! [`Dispatcher`] drains it through the kind's reconcile function. The model
//! and Pod queues are also handed to the pool reconciler, which re-delivers
//! the identities a pool resync touched. The builder returns boxed futures so
//! the caller decides how to drive them.

use std::collections::HashSet;
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, Resource};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use epp_common::crd::{InferenceModel, InferencePool};
use epp_common::ObjectKey;
use epp_controller::{model, pod, pool, BackoffConfig, Context, Dispatcher, WorkQueue};
use epp_datastore::Datastore;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Watch config for the configured pool only
fn pool_watch_config(pool_name: &str) -> watcher::Config {
    watcher::Config::default()
        .fields(&format!("metadata.name={pool_name}"))
        .timeout(WATCH_TIMEOUT_SECS)
}

fn watch_config() -> watcher::Config {
    watcher::Config::default().timeout(WATCH_TIMEOUT_SECS)
}

/// Build the pool, model and pod controllers
///
/// All three share one [`Context`] over `datastore` and stop when `shutdown`
/// fires.
pub fn build_controllers(
    client: Client,
    datastore: Arc<Datastore>,
    pool_key: ObjectKey,
    concurrency: usize,
    shutdown: CancellationToken,
) -> Vec<ControllerFuture> {
    let namespace = pool_key.namespace_str().to_string();

    let pools: Api<InferencePool> = Api::namespaced(client.clone(), &namespace);
    let models: Api<InferenceModel> = Api::namespaced(client.clone(), &namespace);
    let pods: Api<Pod> = Api::namespaced(client.clone(), &namespace);

    let pool_queue = Arc::new(WorkQueue::new(BackoffConfig::default()));
    let model_queue = Arc::new(WorkQueue::new(BackoffConfig::default()));
    let pod_queue = Arc::new(WorkQueue::new(BackoffConfig::default()));

    let ctx = Arc::new(
        Context::builder_for_client(client, pool_key)
            .datastore(datastore)
            .model_queue(Arc::clone(&model_queue))
            .pod_queue(Arc::clone(&pod_queue))
            .build(),
    );

    info!(namespace = %namespace, pool = %ctx.pool_key, "- InferencePool controller");
    let pool_feed = feed(
        "InferencePool",
        watcher(pools, pool_watch_config(&ctx.pool_key.name)),
        Arc::clone(&pool_queue),
        shutdown.clone(),
    );
    // A single pool: one worker keeps its resyncs strictly ordered
    let pool_ctrl = Dispatcher::new("InferencePool", pool_queue, Arc::clone(&ctx))
        .workers(1)
        .run(pool::reconcile, shutdown.clone());

    info!("- InferenceModel controller");
    let model_feed = feed(
        "InferenceModel",
        watcher(models, watch_config()),
        Arc::clone(&model_queue),
        shutdown.clone(),
    );
    let model_ctrl = Dispatcher::new("InferenceModel", model_queue, Arc::clone(&ctx))
        .workers(concurrency)
        .run(model::reconcile, shutdown.clone());

    info!("- Pod controller");
    let pod_feed = feed(
        "Pod",
        watcher(pods, watch_config()),
        Arc::clone(&pod_queue),
        shutdown.clone(),
    );
    let pod_ctrl = Dispatcher::new("Pod", pod_queue, ctx)
        .workers(concurrency)
        .run(pod::reconcile, shutdown);

    vec![
        Box::pin(pool_feed),
        Box::pin(pool_ctrl),
        Box::pin(model_feed),
        Box::pin(model_ctrl),
        Box::pin(pod_feed),
        Box::pin(pod_ctrl),
    ]
}

/// Identities a watch has reported as present
///
/// A re-list after a watch gap only reports what exists now. Objects deleted
/// during the gap never produce a `Delete`, so anything known before the
/// re-list and missing from it is reported when the re-list completes.
#[derive(Debug, Default)]
struct KnownKeys {
    present: HashSet<ObjectKey>,
    relisted: Option<HashSet<ObjectKey>>,
}

impl KnownKeys {
    /// Keys to enqueue for one watch event
    fn observe<K: Resource>(&mut self, event: watcher::Event<K>) -> Vec<ObjectKey> {
        match event {
            watcher::Event::Apply(obj) => {
                let key = ObjectKey::from_resource(&obj);
                self.present.insert(key.clone());
                vec![key]
            }
            watcher::Event::Delete(obj) => {
                let key = ObjectKey::from_resource(&obj);
                self.present.remove(&key);
                vec![key]
            }
            watcher::Event::Init => {
                self.relisted = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(obj) => {
                let key = ObjectKey::from_resource(&obj);
                self.relisted
                    .get_or_insert_with(HashSet::new)
                    .insert(key.clone());
                vec![key]
            }
            watcher::Event::InitDone => {
                let relisted = self.relisted.take().unwrap_or_default();
                let gone: Vec<ObjectKey> = self.present.difference(&relisted).cloned().collect();
                self.present = relisted;
                gone
            }
        }
    }
}

/// Push the identity of every object the watch touches into `queue`
///
/// Includes objects found missing when a re-list completes.
async fn feed<K, S>(
    kind: &'static str,
    events: S,
    queue: Arc<WorkQueue<ObjectKey>>,
    shutdown: CancellationToken,
) where
    K: Resource + Clone + Debug + Send + 'static,
    S: Stream<Item = Result<watcher::Event<K>, watcher::Error>> + Send,
{
    let events = events.default_backoff();
    tokio::pin!(events);
    let mut known = KnownKeys::default();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!(kind, "watch stopped");
                break;
            }
            next = events.next() => match next {
                Some(Ok(event)) => {
                    for key in known.observe(event) {
                        queue.add(key);
                    }
                }
                Some(Err(e)) => warn!(kind, error = %e, "watch error, backing off"),
                None => {
                    warn!(kind, "watch stream ended");
                    break;
                }
            },
        }
    }
}
