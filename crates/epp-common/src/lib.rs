//! Common types for the endpoint picker: CRDs, identities, errors, and telemetry

#![deny(missing_docs)]

pub mod apply;
pub mod crd;
pub mod error;
pub mod events;
pub mod key;
pub mod telemetry;

pub use error::{Error, ReconcileError};
pub use key::ObjectKey;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group served by the inference extension CRDs
pub const INFERENCE_GROUP: &str = "inference.networking.x-k8s.io";

/// Name the controller reports as in Kubernetes Events
pub const CONTROLLER_NAME: &str = "epp-controller";
