//! Read access to the cluster, the only blocking step of a reconcile

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, ListParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;

#[cfg(test)]
use mockall::automock;

use epp_common::crd::{InferenceModel, InferencePool};
use epp_common::ObjectKey;

/// Source of truth for the objects the reconcilers mirror
///
/// `get_*` return `Ok(None)` for objects that do not exist; only transport
/// and API failures are errors.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterReader: Send + Sync {
    /// Fetch an InferencePool by identity
    async fn get_pool(&self, key: &ObjectKey) -> Result<Option<InferencePool>, kube::Error>;

    /// Fetch an InferenceModel by identity
    async fn get_model(&self, key: &ObjectKey) -> Result<Option<InferenceModel>, kube::Error>;

    /// Fetch a Pod by identity
    async fn get_pod(&self, key: &ObjectKey) -> Result<Option<Pod>, kube::Error>;

    /// List every InferenceModel in a namespace
    async fn list_models(&self, namespace: &str) -> Result<Vec<InferenceModel>, kube::Error>;

    /// List Pods in a namespace whose labels contain all of `selector`
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>, kube::Error>;
}

/// [`ClusterReader`] backed by the Kubernetes API
pub struct KubeClusterReader {
    client: Client,
}

impl KubeClusterReader {
    /// Create a reader using `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get<K>(&self, key: &ObjectKey) -> Result<Option<K>, kube::Error>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + std::fmt::Debug,
        K::DynamicType: Default,
    {
        self.api::<K>(key.namespace_str()).get_opt(&key.name).await
    }
}

#[async_trait]
impl ClusterReader for KubeClusterReader {
    async fn get_pool(&self, key: &ObjectKey) -> Result<Option<InferencePool>, kube::Error> {
        self.get(key).await
    }

    async fn get_model(&self, key: &ObjectKey) -> Result<Option<InferenceModel>, kube::Error> {
        self.get(key).await
    }

    async fn get_pod(&self, key: &ObjectKey) -> Result<Option<Pod>, kube::Error> {
        self.get(key).await
    }

    async fn list_models(&self, namespace: &str) -> Result<Vec<InferenceModel>, kube::Error> {
        let models = self
            .api::<InferenceModel>(namespace)
            .list(&ListParams::default())
            .await?;
        Ok(models.items)
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>, kube::Error> {
        let params = ListParams::default().labels(&label_selector(selector));
        let pods = self.api::<Pod>(namespace).list(&params).await?;
        Ok(pods.items)
    }
}

/// Render an equality-based label selector (`k1=v1,k2=v2`)
pub fn label_selector(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}
