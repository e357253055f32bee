//! Object identity used as the reconcile key

use std::fmt;

use kube::{Resource, ResourceExt};

use crate::ReconcileError;

/// Identity of a watched object: optional namespace plus name
///
/// This is what the notification source delivers and what every reconcile
/// is keyed by. It carries no kind; each reconciler knows its own.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Namespace, `None` for cluster-scoped objects
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl ObjectKey {
    /// Key for a cluster-scoped object
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Key for a namespaced object
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Key of an existing object, taken from its metadata
    pub fn from_resource<K: Resource>(obj: &K) -> Self {
        Self {
            namespace: obj.namespace(),
            name: obj.name_any(),
        }
    }

    /// Namespace as a plain str, empty for cluster-scoped keys
    pub fn namespace_str(&self) -> &str {
        self.namespace.as_deref().unwrap_or_default()
    }

    /// Reject keys that can never name a real object
    ///
    /// `namespaced` is whether the reconciled kind is namespaced; such kinds
    /// require a non-empty namespace.
    pub fn validate(&self, namespaced: bool) -> Result<(), ReconcileError> {
        if self.name.is_empty() {
            return Err(ReconcileError::Validation(format!(
                "object key {self} has an empty name"
            )));
        }
        if namespaced && self.namespace.as_deref().map_or(true, str::is_empty) {
            return Err(ReconcileError::Validation(format!(
                "object key {self} is missing a namespace"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}
