//! Endpoint picker state sync - mirrors one InferencePool, its models and its
//! ready Pods into the in-memory datastore the request router reads

use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use kube::{Client, CustomResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use epp_common::crd::{InferenceModel, InferencePool};
use epp_common::telemetry::{init_telemetry, TelemetryConfig};
use epp_common::ObjectKey;
use epp_controller::dispatcher::DEFAULT_WORKERS;
use epp_datastore::Datastore;

mod controller_runner;

/// Endpoint picker controller for the inference gateway extension
#[derive(Parser, Debug)]
#[command(name = "epp", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Name of the InferencePool this instance serves
    #[arg(long, env = "POOL_NAME", required_unless_present = "crd")]
    pool_name: Option<String>,

    /// Namespace of the InferencePool
    #[arg(long, env = "POOL_NAMESPACE", default_value = "default")]
    pool_namespace: String,

    /// Concurrent reconciles per kind
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    concurrency: usize,

    /// Log human-readable text instead of JSON
    #[arg(long, env = "EPP_LOG_TEXT")]
    log_text: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        print_crds()?;
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        json: !cli.log_text,
        ..Default::default()
    })?;

    let pool_name = cli
        .pool_name
        .context("--pool-name (or POOL_NAME) is required")?;
    let pool_key = ObjectKey::namespaced(cli.pool_namespace, pool_name);

    run(pool_key, cli.concurrency).await
}

fn print_crds() -> anyhow::Result<()> {
    for crd in [InferencePool::crd(), InferenceModel::crd()] {
        let yaml = serde_yaml::to_string(&crd)
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("---\n{yaml}");
    }
    Ok(())
}

async fn run(pool_key: ObjectKey, concurrency: usize) -> anyhow::Result<()> {
    pool_key
        .validate(true)
        .map_err(|e| anyhow::anyhow!("invalid pool identity: {e}"))?;

    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;

    let datastore = Arc::new(Datastore::new());

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(shutdown.clone()));

    info!(pool = %pool_key, concurrency, "starting controllers");
    let controllers = controller_runner::build_controllers(
        client,
        datastore,
        pool_key,
        concurrency,
        shutdown.clone(),
    );
    futures::future::join_all(controllers).await;

    info!("controllers stopped");
    Ok(())
}

async fn shutdown_on_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        return;
    }
    info!("received shutdown signal");
    shutdown.cancel();
}
