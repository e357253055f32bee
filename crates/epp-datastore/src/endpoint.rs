//! Endpoint registry: the ready Pods selected by the pool

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use epp_common::ObjectKey;

use crate::Datastore;

/// A model server Pod the router may send requests to
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Identity of the backing Pod
    pub key: ObjectKey,
    /// Pod IP
    pub address: String,
    /// The pool's target port
    pub port: i32,
}

impl Endpoint {
    /// Create an endpoint for `key` at `address:port`
    pub fn new(key: ObjectKey, address: impl Into<String>, port: i32) -> Self {
        Self {
            key,
            address: address.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

impl Datastore {
    /// Endpoint for the Pod `key`
    pub fn endpoint_get(&self, key: &ObjectKey) -> Option<Arc<Endpoint>> {
        self.endpoints.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Insert or replace an endpoint; returns true when something changed
    pub fn endpoint_upsert(&self, endpoint: Endpoint) -> bool {
        let key = endpoint.key.clone();
        let endpoint = Arc::new(endpoint);
        match self.endpoints.insert(key.clone(), Arc::clone(&endpoint)) {
            Some(previous) if previous == endpoint => false,
            _ => {
                debug!(pod = %key, endpoint = %endpoint, "endpoint upserted");
                true
            }
        }
    }

    /// Remove the endpoint for `key`
    pub fn endpoint_delete(&self, key: &ObjectKey) -> Option<Arc<Endpoint>> {
        let removed = self.endpoints.remove(key).map(|(_, endpoint)| endpoint);
        if removed.is_some() {
            debug!(pod = %key, "endpoint removed");
        }
        removed
    }

    /// Point-in-time copy of every endpoint
    pub fn endpoint_list(&self) -> Vec<Arc<Endpoint>> {
        self.endpoints
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Drop every endpoint whose Pod is not in `keep`, returning the dropped keys
    pub fn endpoint_retain(&self, keep: &HashSet<ObjectKey>) -> Vec<ObjectKey> {
        let mut dropped = Vec::new();
        self.endpoints.retain(|key, _| {
            let retained = keep.contains(key);
            if !retained {
                dropped.push(key.clone());
            }
            retained
        });
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(pod: &str, ip: &str) -> Endpoint {
        Endpoint::new(ObjectKey::namespaced("default", pod), ip, 8000)
    }

    #[test]
    fn upsert_reports_changes() {
        let ds = Datastore::new();
        assert!(ds.endpoint_upsert(ep("vllm-0", "10.0.0.1")));
        assert!(!ds.endpoint_upsert(ep("vllm-0", "10.0.0.1")));
        assert!(ds.endpoint_upsert(ep("vllm-0", "10.0.0.9")));
        assert_eq!(
            ds.endpoint_get(&ObjectKey::namespaced("default", "vllm-0"))
                .unwrap()
                .address,
            "10.0.0.9"
        );
    }

    #[test]
    fn delete_is_idempotent() {
        let ds = Datastore::new();
        ds.endpoint_upsert(ep("vllm-0", "10.0.0.1"));
        let key = ObjectKey::namespaced("default", "vllm-0");
        assert!(ds.endpoint_delete(&key).is_some());
        assert!(ds.endpoint_delete(&key).is_none());
        assert!(ds.endpoint_list().is_empty());
    }

    #[test]
    fn retain_drops_unlisted_pods() {
        let ds = Datastore::new();
        ds.endpoint_upsert(ep("vllm-0", "10.0.0.1"));
        ds.endpoint_upsert(ep("vllm-1", "10.0.0.2"));
        ds.endpoint_upsert(ep("vllm-2", "10.0.0.3"));

        let keep: HashSet<_> = [ObjectKey::namespaced("default", "vllm-1")]
            .into_iter()
            .collect();
        let mut dropped = ds.endpoint_retain(&keep);
        dropped.sort();

        assert_eq!(
            dropped,
            vec![
                ObjectKey::namespaced("default", "vllm-0"),
                ObjectKey::namespaced("default", "vllm-2"),
            ]
        );
        assert_eq!(ds.endpoint_list().len(), 1);
    }

    #[test]
    fn display_is_address_and_port() {
        assert_eq!(ep("vllm-0", "10.0.0.1").to_string(), "10.0.0.1:8000");
    }
}
