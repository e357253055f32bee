//! In-memory view of the endpoint picker's cluster state
//!
//! Holds at most one [`InferencePool`], a registry of [`InferenceModel`]s
//! keyed by model name, and the [`Endpoint`]s (ready Pods) the pool selects.
//! Reconcilers write it; the request router reads it on every request.
//!
//! Every operation is a short in-memory critical section and never fails.
//! Operations on the same key are linearizable. The only cross-key guarantee
//! is [`Datastore::with_pool`], which pins the pool while a reconciler checks
//! scope and writes; everything else is the reconcilers' job.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use epp_common::crd::{InferenceModel, InferencePool};
use epp_common::ObjectKey;

mod endpoint;
mod model;
mod pool;

pub use endpoint::Endpoint;

/// Concurrency-safe store shared by reconcilers and the router
///
/// Construct once and hand an `Arc<Datastore>` to every component.
#[derive(Debug, Default)]
pub struct Datastore {
    /// The active pool; replaced wholesale, never merged
    pool: RwLock<Option<Arc<InferencePool>>>,

    /// Model name -> model; the name is global, not namespaced
    models: DashMap<String, Arc<InferenceModel>>,

    /// Pod identity -> endpoint
    endpoints: DashMap<ObjectKey, Arc<Endpoint>>,
}

impl Datastore {
    /// Create an empty datastore
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the pool, every model and every endpoint
    ///
    /// Used when the pool itself goes away: nothing else is in scope then.
    pub fn clear(&self) {
        *self.pool.write() = None;
        self.models.clear();
        self.endpoints.clear();
        debug!("datastore cleared");
    }
}
