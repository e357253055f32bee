//! Model registry access
//!
//! Keys are model names, global across namespaces. Each stored model still
//! carries the metadata of the object that wrote it, which is how the
//! ownership-aware deletes below find their entries.

use std::sync::Arc;

use tracing::debug;

use epp_common::crd::InferenceModel;
use epp_common::ObjectKey;

use crate::Datastore;

fn owned_by(model: &InferenceModel, owner: &ObjectKey) -> bool {
    ObjectKey::from_resource(model) == *owner
}

impl Datastore {
    /// Model registered under `name`
    pub fn model_get(&self, name: &str) -> Option<Arc<InferenceModel>> {
        self.models.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Upsert `model` under `name`, returning what it displaced
    ///
    /// Unconditional last-writer-wins: no version check, no owner check.
    /// Callers compare the displaced entry's identity to spot name collisions.
    pub fn model_set(
        &self,
        name: impl Into<String>,
        model: impl Into<Arc<InferenceModel>>,
    ) -> Option<Arc<InferenceModel>> {
        let name = name.into();
        let model = model.into();
        debug!(model = %name, source = %ObjectKey::from_resource(model.as_ref()), "setting model");
        self.models.insert(name, model)
    }

    /// Remove whatever is registered under `name`
    pub fn model_delete(&self, name: &str) -> Option<Arc<InferenceModel>> {
        self.models.remove(name).map(|(_, model)| model)
    }

    /// Point-in-time copy of every registered model
    ///
    /// Copies the `Arc`s and releases the map before returning, so holding
    /// the result never blocks writers.
    pub fn model_list(&self) -> Vec<Arc<InferenceModel>> {
        self.models
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Remove every entry written by `owner`, returning the removed names
    ///
    /// Entries another object wrote under a colliding name are left alone.
    pub fn model_delete_for(&self, owner: &ObjectKey) -> Vec<String> {
        self.remove_owned(owner, |_| true)
    }

    /// Remove entries `owner` wrote under any name other than `current`
    ///
    /// Cleans up after a model name change on the same object.
    pub fn model_remove_stale(&self, owner: &ObjectKey, current: &str) -> Vec<String> {
        self.remove_owned(owner, |name| name != current)
    }

    /// Keep only the models for which `keep` returns true
    pub fn model_retain(&self, mut keep: impl FnMut(&str, &InferenceModel) -> bool) {
        self.models
            .retain(|name, model| keep(name.as_str(), model.as_ref()));
    }

    fn remove_owned(&self, owner: &ObjectKey, select: impl Fn(&str) -> bool) -> Vec<String> {
        // Collect first: removing while an iterator holds a shard guard deadlocks
        let candidates: Vec<String> = self
            .models
            .iter()
            .filter(|entry| select(entry.key()) && owned_by(entry.value(), owner))
            .map(|entry| entry.key().clone())
            .collect();

        // Re-check ownership under the shard lock; a concurrent writer may
        // have taken the name in between.
        candidates
            .into_iter()
            .filter(|name| {
                self.models
                    .remove_if(name, |_, model| owned_by(model, owner))
                    .is_some()
            })
            .collect()
    }
}
