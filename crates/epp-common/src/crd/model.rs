//! InferenceModel CRD types
//!
//! An `InferenceModel` publishes one model name to clients of a pool and
//! says how requests for it are routed (target models, weights, criticality).
//! The model name is the lookup key used by the router.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;
use crate::INFERENCE_GROUP;

/// Kind a pool reference points at unless stated otherwise
pub const DEFAULT_POOL_REF_KIND: &str = "InferencePool";

/// Maximum accepted length of a model name
pub const MAX_MODEL_NAME_LEN: usize = 256;

/// Upper bound for a target model weight
pub const MAX_TARGET_WEIGHT: i32 = 1_000_000;

/// Specification of an InferenceModel
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "inference.networking.x-k8s.io",
    version = "v1alpha2",
    kind = "InferenceModel",
    plural = "inferencemodels",
    namespaced,
    status = "InferenceModelStatus",
    derive = "Default",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Model","type":"string","jsonPath":".spec.modelName"}"#,
    printcolumn = r#"{"name":"Pool","type":"string","jsonPath":".spec.poolRef.name"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct InferenceModelSpec {
    /// Name clients use to request this model
    ///
    /// Unique across the pool. When two objects declare the same name the
    /// most recently reconciled one wins.
    pub model_name: String,

    /// How important requests for this model are under load
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criticality: Option<Criticality>,

    /// Backend models requests are split across
    ///
    /// Empty means requests go to a model served under `model_name` itself.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_models: Vec<TargetModel>,

    /// Pool this model is served from
    pub pool_ref: PoolObjectReference,
}

/// Request criticality
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum Criticality {
    /// Never shed
    Critical,
    /// Shed after sheddable traffic
    #[default]
    Standard,
    /// Shed first
    Sheddable,
}

/// A backend model and its share of traffic
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TargetModel {
    /// Backend model name (e.g. a LoRA adapter)
    pub name: String,

    /// Relative weight; either every target sets one or none do
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<i32>,
}

/// Reference from an InferenceModel to its InferencePool
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PoolObjectReference {
    /// API group of the referent
    #[serde(default = "default_pool_ref_group")]
    pub group: String,

    /// Kind of the referent
    #[serde(default = "default_pool_ref_kind")]
    pub kind: String,

    /// Name of the referent, in the model's namespace
    pub name: String,
}

fn default_pool_ref_group() -> String {
    INFERENCE_GROUP.to_string()
}

fn default_pool_ref_kind() -> String {
    DEFAULT_POOL_REF_KIND.to_string()
}

impl Default for PoolObjectReference {
    fn default() -> Self {
        Self {
            group: default_pool_ref_group(),
            kind: default_pool_ref_kind(),
            name: String::new(),
        }
    }
}

impl PoolObjectReference {
    /// Reference to the named pool with group and kind defaulted
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Whether this reference points at an InferencePool at all
    pub fn is_inference_pool(&self) -> bool {
        self.group == INFERENCE_GROUP && self.kind == DEFAULT_POOL_REF_KIND
    }
}

/// Status of an InferenceModel
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InferenceModelStatus {
    /// Current conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl InferenceModelSpec {
    /// Validate the model specification
    pub fn validate(&self) -> Result<(), String> {
        if self.model_name.is_empty() {
            return Err("modelName must not be empty".to_string());
        }
        if self.model_name.len() > MAX_MODEL_NAME_LEN {
            return Err(format!(
                "modelName must be at most {} characters",
                MAX_MODEL_NAME_LEN
            ));
        }
        if self.pool_ref.name.is_empty() {
            return Err("poolRef.name must not be empty".to_string());
        }

        let weighted = self
            .target_models
            .iter()
            .filter(|t| t.weight.is_some())
            .count();
        if weighted != 0 && weighted != self.target_models.len() {
            return Err("weights must be set for all target models or for none".to_string());
        }
        for target in &self.target_models {
            if target.name.is_empty() {
                return Err("targetModels[].name must not be empty".to_string());
            }
            if let Some(w) = target.weight {
                if !(0..=MAX_TARGET_WEIGHT).contains(&w) {
                    return Err(format!(
                        "weight {} for target {} must be between 0 and {}",
                        w, target.name, MAX_TARGET_WEIGHT
                    ));
                }
            }
        }
        Ok(())
    }
}
