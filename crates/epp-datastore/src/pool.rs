//! Pool singleton access

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use epp_common::crd::InferencePool;
use epp_common::ObjectKey;

use crate::Datastore;

impl Datastore {
    /// Current pool, if one has been observed
    pub fn pool_get(&self) -> Option<Arc<InferencePool>> {
        self.pool.read().clone()
    }

    /// Replace the pool, returning the one it displaced
    ///
    /// Total replacement: nothing of the previous pool survives.
    pub fn pool_set(&self, pool: impl Into<Arc<InferencePool>>) -> Option<Arc<InferencePool>> {
        let pool = pool.into();
        debug!(
            pool = %ObjectKey::from_resource(pool.as_ref()),
            resource_version = pool.metadata.resource_version.as_deref().unwrap_or_default(),
            "setting pool"
        );
        self.pool.write().replace(pool)
    }

    /// Whether a pool has been observed since start (or the last clear)
    pub fn pool_has_synced(&self) -> bool {
        self.pool.read().is_some()
    }

    /// Identity of the current pool
    pub fn pool_key(&self) -> Option<ObjectKey> {
        self.pool
            .read()
            .as_deref()
            .map(ObjectKey::from_resource)
    }

    /// Whether `labels` are selected by the current pool
    ///
    /// False when there is no pool.
    pub fn pool_labels_match(&self, labels: &BTreeMap<String, String>) -> bool {
        self.pool
            .read()
            .as_ref()
            .is_some_and(|pool| pool.spec.selects(labels))
    }

    /// Run `f` against the current pool while holding it in place
    ///
    /// The pool cannot be replaced or cleared until `f` returns, so a scope
    /// check inside `f` and the model or endpoint write it guards see the
    /// same pool. `f` must not call the `pool_*` accessors.
    pub fn with_pool<R>(&self, f: impl FnOnce(Option<&InferencePool>) -> R) -> R {
        let guard = self.pool.read();
        f(guard.as_deref())
    }
}
