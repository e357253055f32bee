//! Telemetry initialization for structured logging and OpenTelemetry tracing
//!
//! Provides unified setup with:
//! - JSON structured logging filtered by `RUST_LOG`
//! - OTLP span export when `OTEL_EXPORTER_OTLP_ENDPOINT` is set
//! - W3C TraceContext propagation
//! - Kubernetes resource attributes (pod, namespace, node)

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::{runtime, Resource};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::Error;

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "info,epp=debug,kube=info,tower=warn,hyper=warn";

/// Configuration for telemetry initialization
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name for traces (e.g., "epp")
    pub service_name: String,

    /// OTLP endpoint for span export (e.g., "http://otel-collector:4317")
    ///
    /// If None, spans are only logged locally.
    pub otlp_endpoint: Option<String>,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "epp".to_string(),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
            json: true,
        }
    }
}

/// Install the global tracing subscriber
///
/// Fails if a subscriber is already installed or the OTLP exporter cannot
/// be built.
pub fn init_telemetry(config: TelemetryConfig) -> Result<(), Error> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    // Option<Layer> implements Layer, so the OTLP layer composes directly
    let otel_layer = match &config.otlp_endpoint {
        Some(endpoint) => {
            let provider = init_otlp_tracer(endpoint, build_resource(&config.service_name))?;
            let tracer = provider.tracer(config.service_name.clone());
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let (json_layer, text_layer) = if config.json {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true);
        (Some(layer), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer().with_target(true)))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(otel_layer)
        .try_init()
        .map_err(|e| Error::internal_with_context("telemetry", e.to_string()))?;

    Ok(())
}

/// Build OpenTelemetry resource with service info and K8s attributes
fn build_resource(service_name: &str) -> Resource {
    let mut attributes = vec![KeyValue::new(
        opentelemetry_semantic_conventions::resource::SERVICE_NAME,
        service_name.to_string(),
    )];

    // Set via the Deployment downward API
    for (env, key) in [
        ("POD_NAME", "k8s.pod.name"),
        ("POD_NAMESPACE", "k8s.namespace.name"),
        ("NODE_NAME", "k8s.node.name"),
    ] {
        if let Ok(value) = std::env::var(env) {
            attributes.push(KeyValue::new(key, value));
        }
    }

    attributes.push(KeyValue::new(
        opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
        env!("CARGO_PKG_VERSION"),
    ));

    Resource::new(attributes)
}

fn init_otlp_tracer(endpoint: &str, resource: Resource) -> Result<TracerProvider, Error> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| Error::internal_with_context("telemetry", e.to_string()))?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(resource)
        .build();

    global::set_tracer_provider(provider.clone());

    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_to_json_output() {
        let config = TelemetryConfig {
            otlp_endpoint: None,
            ..Default::default()
        };
        assert_eq!(config.service_name, "epp");
        assert!(config.json);
    }

    #[test]
    fn resource_carries_service_name() {
        let resource = build_resource("epp-test");
        assert!(!resource.is_empty());
    }
}
