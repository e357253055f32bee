//! InferencePool reconciliation
//!
//! Only the configured pool identity is mirrored. Its arrival, or a change to
//! what it selects, triggers a resync of endpoints; its arrival or
//! replacement triggers a resync of models. When it goes away everything is
//! cleared, since nothing can be in scope without a pool.
//!
//! The new pool is published before anything is listed, and a failed list
//! puts the old one back.

use std::collections::HashSet;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kube::{Resource, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use epp_common::crd::{InferenceModel, InferencePool};
use epp_common::{ObjectKey, ReconcileError};
use epp_datastore::Datastore;

use crate::model::{self, Placement};
use crate::pod::endpoint_for;
use crate::{fetch, Context, ReconcileStatus, WorkQueue};

/// Whether moving from `previous` to `current` changes which Pods are endpoints
fn endpoints_affected(previous: Option<&InferencePool>, current: &InferencePool) -> bool {
    previous.map_or(true, |prev| {
        prev.spec.selector != current.spec.selector
            || prev.spec.target_port_number != current.spec.target_port_number
            || prev.namespace() != current.namespace()
    })
}

/// Whether `current` is a different object than `previous`
fn identity_changed(previous: Option<&InferencePool>, current: &InferencePool) -> bool {
    previous.map_or(true, |prev| {
        ObjectKey::from_resource(prev) != ObjectKey::from_resource(current)
            || prev.uid() != current.uid()
    })
}

/// Reconcile one InferencePool identity
#[instrument(skip(ctx, cancel), fields(pool = %key))]
pub async fn reconcile(
    key: ObjectKey,
    ctx: Arc<Context>,
    cancel: CancellationToken,
) -> Result<ReconcileStatus, ReconcileError> {
    key.validate(true)?;
    if key != ctx.pool_key {
        debug!(configured = %ctx.pool_key, "ignoring pool other than the configured one");
        return Ok(ReconcileStatus::Done);
    }

    let fetched = fetch(&cancel, "get InferencePool", ctx.reader.get_pool(&key)).await?;

    let pool = match fetched {
        Some(pool) if pool.meta().deletion_timestamp.is_none() => pool,
        _ => {
            if cancel.is_cancelled() {
                return Err(ReconcileError::Cancelled);
            }
            if ctx.datastore.pool_has_synced() {
                info!("pool gone, clearing datastore");
            }
            ctx.datastore.clear();
            return Ok(ReconcileStatus::Done);
        }
    };

    pool.spec
        .validate()
        .map_err(|msg| ReconcileError::Validation(format!("InferencePool {key}: {msg}")))?;

    if cancel.is_cancelled() {
        return Err(ReconcileError::Cancelled);
    }

    // Publish before listing: every model or Pod reconciled from here on is
    // checked against this pool, so nothing the lists miss is lost
    let pool = Arc::new(pool);
    let previous = ctx.datastore.pool_set(Arc::clone(&pool));
    if previous.is_none() {
        info!(selector = ?pool.spec.selector, "pool synced");
    }

    if let Err(err) = resync(&ctx, previous.as_deref(), &pool, &cancel).await {
        // Put the old pool back so the retry sees the same change again
        restore(&ctx.datastore, previous);
        return Err(err);
    }

    Ok(ReconcileStatus::Done)
}

/// List what the pool change affects, then rewrite it
///
/// Both lists are fetched before the first write. Every identity a resync
/// touched is handed back to its queue: the lists may already be stale, and
/// a fresh per-key reconcile settles whatever they got wrong.
async fn resync(
    ctx: &Context,
    previous: Option<&InferencePool>,
    pool: &InferencePool,
    cancel: &CancellationToken,
) -> Result<(), ReconcileError> {
    let namespace = ctx.pool_key.namespace_str();

    let pods = if endpoints_affected(previous, pool) {
        Some(
            fetch(
                cancel,
                "list Pods",
                ctx.reader.list_pods(namespace, &pool.spec.selector),
            )
            .await?,
        )
    } else {
        None
    };

    let models = if identity_changed(previous, pool) {
        Some(fetch(cancel, "list InferenceModels", ctx.reader.list_models(namespace)).await?)
    } else {
        None
    };

    if cancel.is_cancelled() {
        return Err(ReconcileError::Cancelled);
    }

    if let Some(pods) = pods {
        let touched = resync_endpoints(&ctx.datastore, pool, &pods);
        requeue(ctx.pod_queue.as_deref(), touched);
    }
    if let Some(models) = models {
        let touched = resync_models(&ctx.datastore, pool, models);
        requeue(ctx.model_queue.as_deref(), touched);
    }
    Ok(())
}

/// Undo the `pool_set` of a resync that failed
fn restore(datastore: &Datastore, previous: Option<Arc<InferencePool>>) {
    match previous {
        Some(previous) => {
            datastore.pool_set(previous);
        }
        // Nothing is in scope without a pool
        None => datastore.clear(),
    }
}

fn requeue(queue: Option<&WorkQueue<ObjectKey>>, keys: Vec<ObjectKey>) {
    let Some(queue) = queue else {
        return;
    };
    debug!(count = keys.len(), "re-delivering resynced identities");
    for key in keys {
        queue.add(key);
    }
}

/// Make the endpoint set exactly the eligible Pods in `pods`
///
/// Returns every listed Pod plus every endpoint dropped for not being listed.
fn resync_endpoints(datastore: &Datastore, pool: &InferencePool, pods: &[Pod]) -> Vec<ObjectKey> {
    let mut touched = Vec::with_capacity(pods.len());
    let mut keep = HashSet::with_capacity(pods.len());
    for pod in pods {
        touched.push(ObjectKey::from_resource(pod));
        if let Some(endpoint) = endpoint_for(pod, pool) {
            keep.insert(endpoint.key.clone());
            datastore.endpoint_upsert(endpoint);
        }
    }
    let dropped = datastore.endpoint_retain(&keep);
    info!(
        endpoints = keep.len(),
        dropped = dropped.len(),
        "endpoints resynced"
    );
    touched.extend(dropped);
    touched
}

/// Re-evaluate every model against the new pool
///
/// Entries no longer in scope are dropped; listed models that are valid and
/// in scope are (re)registered. Returns the identity of every listed model.
fn resync_models(
    datastore: &Datastore,
    pool: &InferencePool,
    models: Vec<InferenceModel>,
) -> Vec<ObjectKey> {
    datastore.model_retain(|_, existing| model::in_scope(existing, Some(pool)));

    let mut touched = Vec::with_capacity(models.len());
    let mut stored = 0usize;
    for candidate in models {
        let key = ObjectKey::from_resource(&candidate);
        touched.push(key.clone());
        if candidate.meta().deletion_timestamp.is_some() {
            continue;
        }
        if let Err(msg) = candidate.spec.validate() {
            debug!(model = %key, error = %msg, "skipping invalid model during resync");
            continue;
        }
        match model::place(datastore, &key, Arc::new(candidate)) {
            Placement::Stored { displaced } => {
                if let Some(previous_owner) = displaced {
                    warn!(model = %key, %previous_owner, "model name collision during resync, last writer wins");
                }
                stored += 1;
            }
            Placement::Dropped(_) => {}
        }
    }
    info!(models = stored, "models resynced");
    touched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{ClusterReader, MockClusterReader};
    use crate::test_support::*;
    use crate::{pod, BackoffConfig};
    use async_trait::async_trait;
    use epp_datastore::Endpoint;
    use std::collections::BTreeMap;
    use tokio::sync::Notify;

    fn reader_with(
        pool: Option<InferencePool>,
        pods: Vec<Pod>,
        models: Vec<InferenceModel>,
    ) -> MockClusterReader {
        let mut reader = MockClusterReader::new();
        reader
            .expect_get_pool()
            .returning(move |_| Ok(pool.clone()));
        reader
            .expect_list_pods()
            .returning(move |_, _| Ok(pods.clone()));
        reader
            .expect_list_models()
            .returning(move |_| Ok(models.clone()));
        reader
    }

    #[tokio::test]
    async fn first_sync_populates_endpoints_and_models() {
        let ctx = context(reader_with(
            Some(pool(&[("app", "vllm")])),
            vec![
                pod("vllm-0", Some("10.0.0.1"), true, &[("app", "vllm")]),
                pod("vllm-1", Some("10.0.0.2"), false, &[("app", "vllm")]),
            ],
            vec![model("svc", "m1", POOL), model("other", "m2", "other-pool")],
        ));

        reconcile(pool_key(), Arc::clone(&ctx), CancellationToken::new())
            .await
            .unwrap();

        assert!(ctx.datastore.pool_has_synced());
        assert_eq!(ctx.datastore.endpoint_list().len(), 1);
        assert!(ctx.datastore.model_get("m1").is_some());
        assert!(ctx.datastore.model_get("m2").is_none());
    }

    #[tokio::test]
    async fn unchanged_pool_skips_resync() {
        let mut reader = MockClusterReader::new();
        reader
            .expect_get_pool()
            .returning(|_| Ok(Some(pool(&[("app", "vllm")]))));
        reader.expect_list_pods().never();
        reader.expect_list_models().never();
        let ctx = context_with_pool(reader, &[("app", "vllm")]);

        reconcile(pool_key(), Arc::clone(&ctx), CancellationToken::new())
            .await
            .unwrap();
        assert!(ctx.datastore.pool_has_synced());
    }

    #[tokio::test]
    async fn selector_change_resyncs_endpoints_only() {
        let mut reader = MockClusterReader::new();
        reader
            .expect_get_pool()
            .returning(|_| Ok(Some(pool(&[("app", "tgi")]))));
        reader
            .expect_list_pods()
            .times(1)
            .returning(|_, _| Ok(vec![pod("tgi-0", Some("10.0.1.1"), true, &[("app", "tgi")])]));
        reader.expect_list_models().never();
        let ctx = context_with_pool(reader, &[("app", "vllm")]);
        ctx.datastore.endpoint_upsert(Endpoint::new(
            ObjectKey::namespaced(NS, "vllm-0"),
            "10.0.0.1",
            8000,
        ));

        reconcile(pool_key(), Arc::clone(&ctx), CancellationToken::new())
            .await
            .unwrap();

        let endpoints = ctx.datastore.endpoint_list();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].key, ObjectKey::namespaced(NS, "tgi-0"));
    }

    #[tokio::test]
    async fn absent_pool_clears_everything() {
        let ctx = context_with_pool(reader_with(None, vec![], vec![]), &[("app", "vllm")]);
        ctx.datastore.model_set("m1", model("svc", "m1", POOL));

        reconcile(pool_key(), Arc::clone(&ctx), CancellationToken::new())
            .await
            .unwrap();

        assert!(!ctx.datastore.pool_has_synced());
        assert!(ctx.datastore.model_list().is_empty());
    }

    #[tokio::test]
    async fn deleting_pool_clears_everything() {
        let mut p = pool(&[("app", "vllm")]);
        p.metadata = deleting(p.metadata);
        let ctx = context_with_pool(reader_with(Some(p), vec![], vec![]), &[("app", "vllm")]);

        reconcile(pool_key(), Arc::clone(&ctx), CancellationToken::new())
            .await
            .unwrap();
        assert!(!ctx.datastore.pool_has_synced());
    }

    #[tokio::test]
    async fn other_pools_are_ignored() {
        let mut reader = MockClusterReader::new();
        reader.expect_get_pool().never();
        let ctx = context(reader);

        let status = reconcile(
            ObjectKey::namespaced(NS, "someone-elses-pool"),
            Arc::clone(&ctx),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(status, ReconcileStatus::Done);
        assert!(!ctx.datastore.pool_has_synced());
    }

    #[tokio::test]
    async fn recreated_pool_drops_models_no_longer_listed() {
        let mut recreated = pool(&[("app", "vllm")]);
        recreated.metadata.uid = Some("pool-uid-2".to_string());
        let ctx = context_with_pool(
            reader_with(Some(recreated), vec![], vec![model("svc", "m1", POOL)]),
            &[("app", "vllm")],
        );
        let mut foreign = model("old", "m-old", POOL);
        foreign.metadata.namespace = Some("team-b".to_string());
        ctx.datastore.model_set("m-old", foreign);

        reconcile(pool_key(), Arc::clone(&ctx), CancellationToken::new())
            .await
            .unwrap();

        assert!(ctx.datastore.model_get("m-old").is_none());
        assert!(ctx.datastore.model_get("m1").is_some());
    }

    #[tokio::test]
    async fn list_failure_leaves_previous_state() {
        let mut reader = MockClusterReader::new();
        reader
            .expect_get_pool()
            .returning(|_| Ok(Some(pool(&[("app", "tgi")]))));
        reader
            .expect_list_pods()
            .returning(|_, _| Err(unavailable()));
        let ctx = context_with_pool(reader, &[("app", "vllm")]);

        let err = reconcile(pool_key(), Arc::clone(&ctx), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(
            ctx.datastore.pool_get().unwrap().spec.selector,
            labels(&[("app", "vllm")])
        );
    }

    #[tokio::test]
    async fn invalid_pool_is_fatal() {
        let mut bad = pool(&[]);
        bad.spec.target_port_number = 0;
        let ctx = context(reader_with(Some(bad), vec![], vec![]));

        let err = reconcile(pool_key(), Arc::clone(&ctx), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Validation(_)));
        assert!(!ctx.datastore.pool_has_synced());
    }

    #[tokio::test]
    async fn failed_first_sync_leaves_no_pool() {
        let mut reader = MockClusterReader::new();
        reader
            .expect_get_pool()
            .returning(|_| Ok(Some(pool(&[("app", "vllm")]))));
        reader
            .expect_list_pods()
            .returning(|_, _| Err(unavailable()));
        let ctx = context(reader);

        let err = reconcile(pool_key(), Arc::clone(&ctx), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert!(!ctx.datastore.pool_has_synced());
    }

    #[tokio::test]
    async fn resync_hands_listed_models_back_to_their_queue() {
        let models = Arc::new(WorkQueue::new(BackoffConfig::default()));
        let reader = reader_with(
            Some(pool(&[("app", "vllm")])),
            vec![],
            vec![model("svc", "m1", POOL), model("other", "m2", "other-pool")],
        );
        let ctx = Arc::new(
            Context::builder(Arc::new(reader), pool_key())
                .model_queue(Arc::clone(&models))
                .build(),
        );

        reconcile(pool_key(), Arc::clone(&ctx), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(models.len(), 2);
        assert_eq!(models.get().await, Some(ObjectKey::namespaced(NS, "svc")));
        assert_eq!(models.get().await, Some(ObjectKey::namespaced(NS, "other")));
    }

    #[tokio::test]
    async fn model_deleted_after_the_list_is_removed_on_redelivery() {
        let mut reader = reader_with(
            Some(pool(&[("app", "vllm")])),
            vec![],
            vec![model("svc", "m1", POOL)],
        );
        // Gone by the time its own reconcile fetches it
        reader.expect_get_model().returning(|_| Ok(None));
        let models = Arc::new(WorkQueue::new(BackoffConfig::default()));
        let ctx = Arc::new(
            Context::builder(Arc::new(reader), pool_key())
                .model_queue(Arc::clone(&models))
                .build(),
        );

        reconcile(pool_key(), Arc::clone(&ctx), CancellationToken::new())
            .await
            .unwrap();
        assert!(ctx.datastore.model_get("m1").is_some());

        let key = models.get().await.unwrap();
        model::reconcile(key.clone(), Arc::clone(&ctx), CancellationToken::new())
            .await
            .unwrap();
        models.done(&key);

        assert!(ctx.datastore.model_get("m1").is_none());
    }

    /// Serves one pool, model and Pod; `list_models` parks until released
    struct GatedReader {
        pool: InferencePool,
        model: InferenceModel,
        pod: Pod,
        listing: Notify,
        release: Notify,
    }

    #[async_trait]
    impl ClusterReader for GatedReader {
        async fn get_pool(&self, _: &ObjectKey) -> Result<Option<InferencePool>, kube::Error> {
            Ok(Some(self.pool.clone()))
        }

        async fn get_model(&self, _: &ObjectKey) -> Result<Option<InferenceModel>, kube::Error> {
            Ok(Some(self.model.clone()))
        }

        async fn get_pod(&self, _: &ObjectKey) -> Result<Option<Pod>, kube::Error> {
            Ok(Some(self.pod.clone()))
        }

        async fn list_models(&self, _: &str) -> Result<Vec<InferenceModel>, kube::Error> {
            self.listing.notify_one();
            self.release.notified().await;
            Ok(vec![])
        }

        async fn list_pods(
            &self,
            _: &str,
            _: &BTreeMap<String, String>,
        ) -> Result<Vec<Pod>, kube::Error> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn objects_reconciled_during_resync_are_not_lost() {
        let reader = Arc::new(GatedReader {
            pool: pool(&[("app", "vllm")]),
            model: model("svc", "m1", POOL),
            pod: pod("vllm-0", Some("10.0.0.1"), true, &[("app", "vllm")]),
            listing: Notify::new(),
            release: Notify::new(),
        });
        let pods = Arc::new(WorkQueue::new(BackoffConfig::default()));
        let ctx = Arc::new(
            Context::builder(reader.clone(), pool_key())
                .pod_queue(Arc::clone(&pods))
                .build(),
        );

        let syncing = tokio::spawn(reconcile(
            pool_key(),
            Arc::clone(&ctx),
            CancellationToken::new(),
        ));
        reader.listing.notified().await;

        // Both lists were taken before these objects showed up
        model::reconcile(
            ObjectKey::namespaced(NS, "svc"),
            Arc::clone(&ctx),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        pod::reconcile(
            ObjectKey::namespaced(NS, "vllm-0"),
            Arc::clone(&ctx),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(ctx.datastore.model_get("m1").is_some());

        reader.release.notify_one();
        syncing.await.unwrap().unwrap();

        assert!(ctx.datastore.model_get("m1").is_some());
        // Dropped by the stale Pod list, then handed back for a fresh look
        assert_eq!(pods.len(), 1);
        assert_eq!(pods.get().await, Some(ObjectKey::namespaced(NS, "vllm-0")));
    }
}
