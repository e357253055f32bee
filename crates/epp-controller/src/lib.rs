//! Reconcilers for the endpoint picker
//!
//! Three reconcilers mirror cluster state into the shared [`Datastore`]:
//! - [`pool`]: the configured InferencePool (and resyncs everything hanging off it)
//! - [`model`]: InferenceModels, registered by model name while in scope
//! - [`pod`]: ready Pods selected by the pool, kept as endpoints
//!
//! Notifications are delivered through a [`WorkQueue`] and drained by a
//! [`Dispatcher`]. Every reconcile is a pure function of the current datastore
//! and the latest fetched object, so redelivery and reordering are harmless.
//!
//! [`Datastore`]: epp_datastore::Datastore

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use epp_common::ReconcileError;

pub mod backoff;
pub mod context;
pub mod dispatcher;
pub mod model;
pub mod pod;
pub mod pool;
pub mod queue;
pub mod reader;

pub use backoff::BackoffConfig;
pub use context::{Context, ContextBuilder};
pub use dispatcher::Dispatcher;
pub use queue::WorkQueue;
pub use reader::{ClusterReader, KubeClusterReader};

/// What the notification source should do after a successful reconcile
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileStatus {
    /// Nothing more to do until the next notification
    Done,
    /// Deliver this identity again after the delay
    RequeueAfter(Duration),
}

/// Await a fetch unless `cancel` fires first
///
/// `what` names the call in the error message.
pub(crate) async fn fetch<T, F>(
    cancel: &CancellationToken,
    what: &str,
    fut: F,
) -> Result<T, ReconcileError>
where
    F: Future<Output = Result<T, kube::Error>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ReconcileError::Cancelled),
        res = fut => res.map_err(|e| ReconcileError::kube(what, e)),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use test_support::unavailable;

    #[tokio::test]
    async fn fetch_passes_through_values() {
        let cancel = CancellationToken::new();
        let got = fetch(&cancel, "get thing", async { Ok::<_, kube::Error>(7) }).await;
        assert_eq!(got.unwrap(), 7);
    }

    #[tokio::test]
    async fn fetch_maps_api_errors_to_recoverable() {
        let cancel = CancellationToken::new();
        let err = fetch(&cancel, "get thing", async { Err::<(), _>(unavailable()) })
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Kube(ref msg) if msg.starts_with("get thing")));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn fetch_prefers_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = fetch(&cancel, "get thing", async { Ok::<_, kube::Error>(7) })
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Cancelled));
    }
}
