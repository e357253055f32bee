//! Shared state handed to every reconcile invocation

use std::sync::Arc;

use kube::Client;

use epp_common::events::{EventPublisher, KubeEventPublisher, NoopEventPublisher};
use epp_common::{ObjectKey, CONTROLLER_NAME};
use epp_datastore::Datastore;

use crate::queue::WorkQueue;
use crate::reader::{ClusterReader, KubeClusterReader};

/// Context shared by the Pool, Model and Pod reconcilers
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```ignore
/// let ctx = Context::builder(reader, ObjectKey::namespaced("default", "vllm-pool"))
///     .datastore(datastore)
///     .events(publisher)
///     .model_queue(model_queue)
///     .build();
/// ```
pub struct Context {
    /// Fetch seam (trait object for testability)
    pub reader: Arc<dyn ClusterReader>,
    /// Store the reconcilers write and the router reads
    pub datastore: Arc<Datastore>,
    /// Identity of the one InferencePool this process serves
    pub pool_key: ObjectKey,
    /// Event publisher for conflicts and rejected specs
    pub events: Arc<dyn EventPublisher>,
    /// Where a pool resync re-delivers the model identities it touched
    pub model_queue: Option<Arc<WorkQueue<ObjectKey>>>,
    /// Where a pool resync re-delivers the Pod identities it touched
    pub pod_queue: Option<Arc<WorkQueue<ObjectKey>>>,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(reader: Arc<dyn ClusterReader>, pool_key: ObjectKey) -> ContextBuilder {
        ContextBuilder::new(reader, pool_key)
    }

    /// Production builder: reads and events both go through `client`
    pub fn builder_for_client(client: Client, pool_key: ObjectKey) -> ContextBuilder {
        Self::builder(Arc::new(KubeClusterReader::new(client.clone())), pool_key)
            .events(Arc::new(KubeEventPublisher::new(client, CONTROLLER_NAME)))
    }
}

/// Builder for constructing [`Context`] instances
///
/// Defaults to a fresh [`Datastore`], a [`NoopEventPublisher`] and no
/// re-delivery queues.
pub struct ContextBuilder {
    reader: Arc<dyn ClusterReader>,
    pool_key: ObjectKey,
    datastore: Option<Arc<Datastore>>,
    events: Option<Arc<dyn EventPublisher>>,
    model_queue: Option<Arc<WorkQueue<ObjectKey>>>,
    pod_queue: Option<Arc<WorkQueue<ObjectKey>>>,
}

impl ContextBuilder {
    fn new(reader: Arc<dyn ClusterReader>, pool_key: ObjectKey) -> Self {
        Self {
            reader,
            pool_key,
            datastore: None,
            events: None,
            model_queue: None,
            pod_queue: None,
        }
    }

    /// Share an existing datastore (the router holds the other handle)
    pub fn datastore(mut self, datastore: Arc<Datastore>) -> Self {
        self.datastore = Some(datastore);
        self
    }

    /// Override the event publisher
    pub fn events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Queue the InferenceModel dispatcher drains
    pub fn model_queue(mut self, queue: Arc<WorkQueue<ObjectKey>>) -> Self {
        self.model_queue = Some(queue);
        self
    }

    /// Queue the Pod dispatcher drains
    pub fn pod_queue(mut self, queue: Arc<WorkQueue<ObjectKey>>) -> Self {
        self.pod_queue = Some(queue);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        Context {
            reader: self.reader,
            datastore: self.datastore.unwrap_or_default(),
            pool_key: self.pool_key,
            events: self
                .events
                .unwrap_or_else(|| Arc::new(NoopEventPublisher)),
            model_queue: self.model_queue,
            pod_queue: self.pod_queue,
        }
    }
}
