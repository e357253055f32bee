//! Typed apply configurations for the inference API kinds
//!
//! The set of kinds is fixed at build time, so lookup by group/version/kind
//! is a match over a closed enum rather than a runtime registry. Top-level
//! kinds render a server-side-apply body; nested kinds are plain values that
//! get embedded into one.

use std::collections::BTreeMap;
use std::fmt;

use kube::core::GroupVersionKind;
use serde::Serialize;

use crate::crd::{
    EndpointPickerConfig, Extension, ExtensionConnection, ExtensionReference,
    InferenceModelSpec, InferenceModelStatus, InferencePoolSpec, InferencePoolStatus,
    PoolObjectReference, TargetModel,
};
use crate::{Error, INFERENCE_GROUP};

/// Served versions of the inference API group
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ApiVersion {
    /// `v1alpha1`
    V1alpha1,
    /// `v1alpha2`
    V1alpha2,
}

impl ApiVersion {
    /// Version string as it appears in `apiVersion`
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiVersion::V1alpha1 => "v1alpha1",
            ApiVersion::V1alpha2 => "v1alpha2",
        }
    }

    /// Parse a version string
    pub fn parse(version: &str) -> Option<Self> {
        match version {
            "v1alpha1" => Some(ApiVersion::V1alpha1),
            "v1alpha2" => Some(ApiVersion::V1alpha2),
            _ => None,
        }
    }

    /// Full `group/version` string
    pub fn api_version(&self) -> String {
        format!("{}/{}", INFERENCE_GROUP, self.as_str())
    }
}

/// Every kind an apply configuration exists for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ApplyKind {
    /// Extension settings embedded in a pool spec
    EndpointPickerConfig,
    /// Extension reference plus connection settings
    Extension,
    /// Extension connection settings
    ExtensionConnection,
    /// Extension object reference
    ExtensionReference,
    /// Top-level InferenceModel
    InferenceModel,
    /// InferenceModel spec
    InferenceModelSpec,
    /// InferenceModel status
    InferenceModelStatus,
    /// Top-level InferencePool
    InferencePool,
    /// InferencePool spec
    InferencePoolSpec,
    /// InferencePool status
    InferencePoolStatus,
    /// Model-to-pool reference
    PoolObjectReference,
    /// Weighted backend model
    TargetModel,
}

impl ApplyKind {
    /// All kinds, in declaration order
    pub const ALL: [ApplyKind; 12] = [
        ApplyKind::EndpointPickerConfig,
        ApplyKind::Extension,
        ApplyKind::ExtensionConnection,
        ApplyKind::ExtensionReference,
        ApplyKind::InferenceModel,
        ApplyKind::InferenceModelSpec,
        ApplyKind::InferenceModelStatus,
        ApplyKind::InferencePool,
        ApplyKind::InferencePoolSpec,
        ApplyKind::InferencePoolStatus,
        ApplyKind::PoolObjectReference,
        ApplyKind::TargetModel,
    ];

    /// Kind name as used in a GroupVersionKind
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplyKind::EndpointPickerConfig => "EndpointPickerConfig",
            ApplyKind::Extension => "Extension",
            ApplyKind::ExtensionConnection => "ExtensionConnection",
            ApplyKind::ExtensionReference => "ExtensionReference",
            ApplyKind::InferenceModel => "InferenceModel",
            ApplyKind::InferenceModelSpec => "InferenceModelSpec",
            ApplyKind::InferenceModelStatus => "InferenceModelStatus",
            ApplyKind::InferencePool => "InferencePool",
            ApplyKind::InferencePoolSpec => "InferencePoolSpec",
            ApplyKind::InferencePoolStatus => "InferencePoolStatus",
            ApplyKind::PoolObjectReference => "PoolObjectReference",
            ApplyKind::TargetModel => "TargetModel",
        }
    }

    /// Parse a kind name
    pub fn parse(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == kind)
    }

    /// Whether this kind is a standalone API object
    pub fn is_top_level(&self) -> bool {
        matches!(self, ApplyKind::InferenceModel | ApplyKind::InferencePool)
    }
}

impl fmt::Display for ApplyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Apply configuration for a top-level object
///
/// Every field is optional; only what is set ends up in the patch, so the
/// field manager claims ownership of exactly those fields.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectApply<S> {
    /// API version the patch is rendered for
    pub version: ApiVersion,
    /// `metadata.name`
    pub name: Option<String>,
    /// `metadata.namespace`
    pub namespace: Option<String>,
    /// `metadata.labels`
    pub labels: BTreeMap<String, String>,
    /// `spec`
    pub spec: Option<S>,
}

impl<S> ObjectApply<S> {
    /// Empty configuration for the given version
    pub fn new(version: ApiVersion) -> Self {
        Self {
            version,
            name: None,
            namespace: None,
            labels: BTreeMap::new(),
            spec: None,
        }
    }

    /// Set `metadata.name`
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set `metadata.namespace`
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Add one label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Set `spec`
    pub fn with_spec(mut self, spec: S) -> Self {
        self.spec = Some(spec);
        self
    }
}

impl<S: Serialize> ObjectApply<S> {
    fn to_patch(&self, kind: ApplyKind) -> Result<serde_json::Value, Error> {
        let mut metadata = serde_json::Map::new();
        if let Some(name) = &self.name {
            metadata.insert("name".into(), name.clone().into());
        }
        if let Some(ns) = &self.namespace {
            metadata.insert("namespace".into(), ns.clone().into());
        }
        if !self.labels.is_empty() {
            metadata.insert("labels".into(), serde_json::json!(self.labels));
        }

        let mut body = serde_json::json!({
            "apiVersion": self.version.api_version(),
            "kind": kind.as_str(),
            "metadata": metadata,
        });
        if let Some(spec) = &self.spec {
            body["spec"] = serde_json::to_value(spec)
                .map_err(|e| Error::serialization_for_kind(kind.as_str(), e.to_string()))?;
        }
        Ok(body)
    }
}

/// Apply configuration for one of the known kinds
///
/// Nested kinds hold `None` until a value is set. An unset configuration
/// renders as an empty object and claims no fields; a set one claims every
/// field its value serializes.
#[derive(Clone, Debug, PartialEq)]
#[allow(missing_docs)]
pub enum ApplyConfiguration {
    EndpointPickerConfig(Option<EndpointPickerConfig>),
    Extension(Option<Extension>),
    ExtensionConnection(Option<ExtensionConnection>),
    ExtensionReference(Option<ExtensionReference>),
    InferenceModel(ObjectApply<InferenceModelSpec>),
    InferenceModelSpec(Option<InferenceModelSpec>),
    InferenceModelStatus(Option<InferenceModelStatus>),
    InferencePool(ObjectApply<InferencePoolSpec>),
    InferencePoolSpec(Option<InferencePoolSpec>),
    InferencePoolStatus(Option<InferencePoolStatus>),
    PoolObjectReference(Option<PoolObjectReference>),
    TargetModel(Option<TargetModel>),
}

impl ApplyConfiguration {
    /// Empty apply configuration for a group/version/kind
    ///
    /// Returns `None` for anything outside the inference group, an unserved
    /// version, or an unknown kind.
    pub fn for_kind(gvk: &GroupVersionKind) -> Option<Self> {
        if gvk.group != INFERENCE_GROUP {
            return None;
        }
        let version = ApiVersion::parse(&gvk.version)?;
        let kind = ApplyKind::parse(&gvk.kind)?;
        Some(Self::empty(kind, version))
    }

    /// Empty apply configuration for a known kind
    pub fn empty(kind: ApplyKind, version: ApiVersion) -> Self {
        match kind {
            ApplyKind::EndpointPickerConfig => Self::EndpointPickerConfig(None),
            ApplyKind::Extension => Self::Extension(None),
            ApplyKind::ExtensionConnection => Self::ExtensionConnection(None),
            ApplyKind::ExtensionReference => Self::ExtensionReference(None),
            ApplyKind::InferenceModel => Self::InferenceModel(ObjectApply::new(version)),
            ApplyKind::InferenceModelSpec => Self::InferenceModelSpec(None),
            ApplyKind::InferenceModelStatus => Self::InferenceModelStatus(None),
            ApplyKind::InferencePool => Self::InferencePool(ObjectApply::new(version)),
            ApplyKind::InferencePoolSpec => Self::InferencePoolSpec(None),
            ApplyKind::InferencePoolStatus => Self::InferencePoolStatus(None),
            ApplyKind::PoolObjectReference => Self::PoolObjectReference(None),
            ApplyKind::TargetModel => Self::TargetModel(None),
        }
    }

    /// Kind this configuration is for
    pub fn kind(&self) -> ApplyKind {
        match self {
            Self::EndpointPickerConfig(_) => ApplyKind::EndpointPickerConfig,
            Self::Extension(_) => ApplyKind::Extension,
            Self::ExtensionConnection(_) => ApplyKind::ExtensionConnection,
            Self::ExtensionReference(_) => ApplyKind::ExtensionReference,
            Self::InferenceModel(_) => ApplyKind::InferenceModel,
            Self::InferenceModelSpec(_) => ApplyKind::InferenceModelSpec,
            Self::InferenceModelStatus(_) => ApplyKind::InferenceModelStatus,
            Self::InferencePool(_) => ApplyKind::InferencePool,
            Self::InferencePoolSpec(_) => ApplyKind::InferencePoolSpec,
            Self::InferencePoolStatus(_) => ApplyKind::InferencePoolStatus,
            Self::PoolObjectReference(_) => ApplyKind::PoolObjectReference,
            Self::TargetModel(_) => ApplyKind::TargetModel,
        }
    }

    /// Render as JSON
    ///
    /// Top-level kinds produce a full server-side-apply body with
    /// `apiVersion`, `kind` and `metadata`; nested kinds produce their value,
    /// or `{}` while unset.
    pub fn to_value(&self) -> Result<serde_json::Value, Error> {
        let kind = self.kind();
        match self {
            Self::InferenceModel(obj) => obj.to_patch(kind),
            Self::InferencePool(obj) => obj.to_patch(kind),
            Self::EndpointPickerConfig(v) => nested(kind, v),
            Self::Extension(v) => nested(kind, v),
            Self::ExtensionConnection(v) => nested(kind, v),
            Self::ExtensionReference(v) => nested(kind, v),
            Self::InferenceModelSpec(v) => nested(kind, v),
            Self::InferenceModelStatus(v) => nested(kind, v),
            Self::InferencePoolSpec(v) => nested(kind, v),
            Self::InferencePoolStatus(v) => nested(kind, v),
            Self::PoolObjectReference(v) => nested(kind, v),
            Self::TargetModel(v) => nested(kind, v),
        }
    }
}

fn nested<T: Serialize>(kind: ApplyKind, value: &Option<T>) -> Result<serde_json::Value, Error> {
    match value {
        None => Ok(serde_json::Value::Object(serde_json::Map::new())),
        Some(value) => serde_json::to_value(value)
            .map_err(|e| Error::serialization_for_kind(kind.as_str(), e.to_string())),
    }
}
