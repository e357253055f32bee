//! Pod reconciliation: keep the endpoint set equal to the ready Pods the
//! pool selects

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use epp_common::crd::InferencePool;
use epp_common::{ObjectKey, ReconcileError};
use epp_datastore::Endpoint;

use crate::{fetch, Context, ReconcileStatus};

/// Whether the Pod's `Ready` condition is `True`
pub fn is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

/// Endpoint for `pod` if it should receive traffic for `pool`
///
/// Requires the Pod to be live, ready, addressed, in the pool's namespace and
/// selected by the pool's labels.
pub fn endpoint_for(pod: &Pod, pool: &InferencePool) -> Option<Endpoint> {
    if pod.metadata.deletion_timestamp.is_some() || !is_ready(pod) {
        return None;
    }
    if pool.namespace().is_some() && pod.namespace() != pool.namespace() {
        return None;
    }
    if !pool.spec.selects(pod.labels()) {
        return None;
    }
    let address = pod
        .status
        .as_ref()
        .and_then(|status| status.pod_ip.as_deref())
        .filter(|ip| !ip.is_empty())?;

    Some(Endpoint::new(
        ObjectKey::from_resource(pod),
        address,
        pool.spec.target_port_number,
    ))
}

/// Reconcile one Pod identity
#[instrument(skip(ctx, cancel), fields(pod = %key))]
pub async fn reconcile(
    key: ObjectKey,
    ctx: Arc<Context>,
    cancel: CancellationToken,
) -> Result<ReconcileStatus, ReconcileError> {
    key.validate(true)?;

    let fetched = fetch(&cancel, "get Pod", ctx.reader.get_pod(&key)).await?;
    if cancel.is_cancelled() {
        return Err(ReconcileError::Cancelled);
    }

    let Some(pod) = fetched else {
        ctx.datastore.endpoint_delete(&key);
        return Ok(ReconcileStatus::Done);
    };

    // Decide and write against one pool: a selector change cannot land
    // between the eligibility check and the upsert
    let synced = ctx.datastore.with_pool(|pool| {
        let Some(pool) = pool else {
            return false;
        };
        match endpoint_for(&pod, pool) {
            Some(endpoint) => {
                ctx.datastore.endpoint_upsert(endpoint);
            }
            None => {
                ctx.datastore.endpoint_delete(&key);
            }
        }
        true
    });
    if !synced {
        debug!("pool not synced yet, ignoring pod");
    }

    Ok(ReconcileStatus::Done)
}
