//! InferenceModel reconciliation
//!
//! Registers a model under its model name while its pool reference points at
//! the currently stored pool, and removes it otherwise:
//! - absent, or marked for deletion → drop every entry the object wrote
//! - present, out of scope → same as absent
//! - present, in scope → drop entries under old names, then upsert
//!
//! Scope is recomputed from the live pool on every reconcile; pool and model
//! notifications arrive in any order.

use std::sync::Arc;

use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use epp_common::crd::{InferenceModel, InferencePool};
use epp_common::events::{actions, reasons};
use epp_common::{ObjectKey, ReconcileError};
use epp_datastore::Datastore;

use crate::{fetch, Context, ReconcileStatus};

/// Whether `model` belongs to `pool`
///
/// Fails closed: without a pool nothing is in scope. The reference must name
/// the pool's kind and name, and the model must live in the pool's namespace.
pub fn in_scope(model: &InferenceModel, pool: Option<&InferencePool>) -> bool {
    let Some(pool) = pool else {
        return false;
    };
    let pool_ref = &model.spec.pool_ref;
    if !pool_ref.is_inference_pool() || pool_ref.name != pool.name_any() {
        return false;
    }
    match pool.namespace() {
        Some(ns) => model.namespace().as_deref() == Some(ns.as_str()),
        None => true,
    }
}

/// Outcome of [`place`]
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Placement {
    /// Registered; `displaced` is the foreign owner whose entry it replaced
    Stored { displaced: Option<ObjectKey> },
    /// Not in scope of the pool at write time; these names were removed
    Dropped(Vec<String>),
}

/// Register or drop `model` against the live pool
///
/// The scope check and the write happen under [`Datastore::with_pool`], so a
/// concurrent pool change or clear cannot slip in between. In scope, entries
/// the same object wrote under a previous model name are removed first and a
/// displaced entry from a different object is reported as a collision; the
/// new write still wins. Out of scope, everything the object wrote goes.
pub(crate) fn place(
    datastore: &Datastore,
    key: &ObjectKey,
    model: Arc<InferenceModel>,
) -> Placement {
    datastore.with_pool(|pool| {
        if !in_scope(&model, pool) {
            return Placement::Dropped(datastore.model_delete_for(key));
        }

        let model_name = model.spec.model_name.clone();
        let stale = datastore.model_remove_stale(key, &model_name);
        if !stale.is_empty() {
            debug!(model = %key, ?stale, "removed entries under previous model names");
        }

        let displaced = datastore
            .model_set(model_name, model)
            .map(|displaced| ObjectKey::from_resource(displaced.as_ref()))
            .filter(|owner| owner != key);
        Placement::Stored { displaced }
    })
}

/// Remove everything `key` wrote
pub(crate) fn forget(datastore: &Datastore, key: &ObjectKey, why: &str) {
    let removed = datastore.model_delete_for(key);
    if !removed.is_empty() {
        info!(model = %key, ?removed, reason = why, "model removed from datastore");
    }
}

/// Reconcile one InferenceModel identity
#[instrument(skip(ctx, cancel), fields(model = %key))]
pub async fn reconcile(
    key: ObjectKey,
    ctx: Arc<Context>,
    cancel: CancellationToken,
) -> Result<ReconcileStatus, ReconcileError> {
    key.validate(true)?;

    let fetched = fetch(&cancel, "get InferenceModel", ctx.reader.get_model(&key)).await?;
    if cancel.is_cancelled() {
        return Err(ReconcileError::Cancelled);
    }

    let model = match fetched {
        Some(model) if model.meta().deletion_timestamp.is_none() => model,
        Some(_) => {
            forget(&ctx.datastore, &key, "marked for deletion");
            return Ok(ReconcileStatus::Done);
        }
        None => {
            forget(&ctx.datastore, &key, "not found");
            return Ok(ReconcileStatus::Done);
        }
    };

    if let Err(msg) = model.spec.validate() {
        ctx.events
            .publish(
                &model.object_ref(&()),
                EventType::Warning,
                reasons::VALIDATION_FAILED,
                actions::RECONCILE,
                Some(msg.clone()),
            )
            .await;
        return Err(ReconcileError::Validation(format!(
            "InferenceModel {key}: {msg}"
        )));
    }

    let model = Arc::new(model);
    match place(&ctx.datastore, &key, Arc::clone(&model)) {
        Placement::Dropped(removed) => {
            if !removed.is_empty() {
                info!(model = %key, ?removed, reason = "out of scope", "model removed from datastore");
            }
        }
        Placement::Stored {
            displaced: Some(previous_owner),
        } => {
            let note = format!(
                "model name {:?} was registered by {previous_owner}; {key} replaced it",
                model.spec.model_name
            );
            warn!(model = %key, %previous_owner, model_name = %model.spec.model_name, "model name collision, last writer wins");
            ctx.events
                .publish(
                    &model.object_ref(&()),
                    EventType::Warning,
                    reasons::MODEL_NAME_CONFLICT,
                    actions::RECONCILE,
                    Some(note),
                )
                .await;
        }
        Placement::Stored { displaced: None } => {
            debug!(model = %key, model_name = %model.spec.model_name, "model stored");
        }
    }

    Ok(ReconcileStatus::Done)
}
