//! Error types for the endpoint picker
//!
//! Two families live here:
//! - [`Error`] for startup and plumbing paths (telemetry, apply serialization)
//! - [`ReconcileError`] for reconcile paths, classified as recoverable or fatal

use thiserror::Error;

/// Error type for startup and plumbing paths outside of reconciliation
#[derive(Debug, Error)]
pub enum Error {
    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "telemetry")
        context: String,
    },
}

impl Error {
    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }
}

/// Error returned by a reconcile invocation
///
/// The variant decides what the notification source does next: recoverable
/// errors ask for a later redelivery, fatal errors are surfaced and dropped.
/// A reconcile that returns any error has not mutated the datastore.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Fetch from the Kubernetes API failed (transient)
    #[error("kubernetes error: {0}")]
    Kube(String),

    /// Malformed identity or spec that no retry will fix
    #[error("validation error: {0}")]
    Validation(String),

    /// Programming invariant violation
    #[error("internal error: {0}")]
    Internal(String),

    /// The caller cancelled the reconcile before it reached the mutation step
    #[error("reconcile cancelled")]
    Cancelled,
}

impl ReconcileError {
    /// Wrap a kube-rs error with a short description of the failed call
    pub fn kube(context: &str, err: kube::Error) -> Self {
        Self::Kube(format!("{context}: {err}"))
    }

    /// Whether the notification source should redeliver this identity later
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::Kube(_) | ReconcileError::Cancelled => true,
            ReconcileError::Validation(_) | ReconcileError::Internal(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconcile_error_classification() {
        assert!(ReconcileError::Kube("connection refused".into()).is_retryable());
        assert!(ReconcileError::Cancelled.is_retryable());
        assert!(!ReconcileError::Validation("empty name".into()).is_retryable());
        assert!(!ReconcileError::Internal("broken invariant".into()).is_retryable());
    }

    #[test]
    fn serialization_error_keeps_kind() {
        let err = Error::serialization_for_kind("InferenceModel", "missing spec");
        assert_eq!(err.to_string(), "serialization error: missing spec");
        match err {
            Error::Serialization { kind, .. } => assert_eq!(kind.as_deref(), Some("InferenceModel")),
            _ => panic!("Expected Serialization variant"),
        }
    }

    #[test]
    fn internal_error_display_includes_context() {
        let err = Error::internal_with_context("telemetry", "exporter unavailable");
        assert_eq!(
            err.to_string(),
            "internal error [telemetry]: exporter unavailable"
        );
    }
}
