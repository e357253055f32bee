//! InferencePool CRD types
//!
//! An `InferencePool` names the group of model-server Pods that back one
//! inference service. The endpoint picker watches exactly one pool; its
//! selector decides which Pods become routable endpoints.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;

/// Specification of an InferencePool
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "inference.networking.x-k8s.io",
    version = "v1alpha2",
    kind = "InferencePool",
    plural = "inferencepools",
    namespaced,
    status = "InferencePoolStatus",
    derive = "Default",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Port","type":"integer","jsonPath":".spec.targetPortNumber"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct InferencePoolSpec {
    /// Label selector for the Pods that belong to this pool
    ///
    /// Only exact-match label pairs are supported.
    pub selector: BTreeMap<String, String>,

    /// Port the model servers listen on
    pub target_port_number: i32,

    /// Endpoint picker extension configuration
    #[serde(flatten)]
    pub endpoint_picker: EndpointPickerConfig,
}

/// Configuration of the endpoint picker extension serving a pool
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EndpointPickerConfig {
    /// Reference to the extension service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_ref: Option<Extension>,
}

/// Extension service reference plus connection behaviour
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Extension {
    /// Which object serves the extension
    #[serde(flatten)]
    pub reference: ExtensionReference,

    /// How the gateway talks to it
    #[serde(flatten)]
    pub connection: ExtensionConnection,
}

/// Object reference for the extension service
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionReference {
    /// API group of the referent, empty for the core group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    /// Kind of the referent (defaults to Service)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Name of the referent
    pub name: String,

    /// Port of the extension service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_number: Option<i32>,
}

/// Connection behaviour for the extension
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionConnection {
    /// What the gateway does when the extension is unreachable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_mode: Option<ExtensionFailureMode>,
}

/// Gateway behaviour when the extension cannot be reached
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ExtensionFailureMode {
    /// Route requests anyway using the gateway's own balancing
    FailOpen,
    /// Reject requests
    #[default]
    FailClose,
}

/// Status of an InferencePool
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InferencePoolStatus {
    /// Current conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl InferencePoolSpec {
    /// Validate the pool specification
    pub fn validate(&self) -> Result<(), String> {
        if self.selector.is_empty() {
            return Err("selector must contain at least one label".to_string());
        }
        if let Some((key, _)) = self.selector.iter().find(|(k, _)| k.is_empty()) {
            return Err(format!("selector contains an empty label key {:?}", key));
        }
        if !(1..=65535).contains(&self.target_port_number) {
            return Err(format!(
                "targetPortNumber {} must be between 1 and 65535",
                self.target_port_number
            ));
        }
        if let Some(ext) = &self.endpoint_picker.extension_ref {
            if ext.reference.name.is_empty() {
                return Err("extensionRef.name must not be empty".to_string());
            }
            if let Some(port) = ext.reference.port_number {
                if !(1..=65535).contains(&port) {
                    return Err(format!(
                        "extensionRef.portNumber {} must be between 1 and 65535",
                        port
                    ));
                }
            }
        }
        Ok(())
    }

    /// Whether a Pod with `labels` is selected by this pool
    ///
    /// Every selector pair must be present with the same value.
    pub fn selects(&self, labels: &BTreeMap<String, String>) -> bool {
        self.selector
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v))
    }
}
