//! Custom Resource Definitions watched by the endpoint picker
//!
//! Both kinds live in the `inference.networking.x-k8s.io` group at `v1alpha2`.

mod model;
mod pool;
mod types;

pub use model::{
    Criticality, InferenceModel, InferenceModelSpec, InferenceModelStatus, PoolObjectReference,
    TargetModel, DEFAULT_POOL_REF_KIND, MAX_MODEL_NAME_LEN, MAX_TARGET_WEIGHT,
};
pub use pool::{
    EndpointPickerConfig, Extension, ExtensionConnection, ExtensionFailureMode,
    ExtensionReference, InferencePool, InferencePoolSpec, InferencePoolStatus,
};
pub use types::{Condition, ConditionStatus};

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn crd_names_match_the_inference_group() {
        assert_eq!(
            InferencePool::crd_name(),
            "inferencepools.inference.networking.x-k8s.io"
        );
        assert_eq!(
            InferenceModel::crd_name(),
            "inferencemodels.inference.networking.x-k8s.io"
        );
    }

    #[test]
    fn crds_render_to_yaml() {
        let pool = serde_yaml::to_string(&InferencePool::crd()).unwrap();
        assert!(pool.contains("targetPortNumber"));
        let model = serde_yaml::to_string(&InferenceModel::crd()).unwrap();
        assert!(model.contains("modelName"));
    }
}
