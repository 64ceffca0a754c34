//! Assembly operator
//!
//! Keeps every declared Kafka assembly converged with the platform's
//! resources. Each assembly is declared by a spec source: a config object
//! labelled `assembly.io/kind=cluster` and `assembly.io/type=kafka`.
//!
//! ## Architecture
//!
//! - **Reconcile worker**: runs a reconcile-all sweep every interval
//! - **Scheduler**: enumerates assemblies and reconciles each once per sweep
//! - **Assembly reconciler**: converges services, workload sets, the
//!   management deployment, config objects and per-member claims
//! - **Platform**: abstracts the cluster-management API (in-memory for now)

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use assembly_model::Labels;
use assembly_naming::AssemblyId;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use assembly_operator::config::Config;
use assembly_operator::resources::{ConfigMap, ObjectMeta, ResourceKind};
use assembly_operator::{InMemoryPlatform, ReconcileWorker};

/// One spec source in the seed file.
#[derive(Debug, Deserialize)]
struct SeedSource {
    namespace: String,
    name: String,
    #[serde(default)]
    data: BTreeMap<String, String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        scope = %config.scope(),
        reconcile_interval_secs = config.reconcile_interval.as_secs(),
        max_concurrent_reconciles = config.max_concurrent_reconciles,
        max_concurrent_operations = config.max_concurrent_operations,
        "Starting assembly operator"
    );

    // Create the platform (in-memory for now)
    let platform = Arc::new(InMemoryPlatform::new());
    if let Some(path) = &config.seed_file {
        let seeded = seed(&platform, path).await?;
        info!(path = %path.display(), spec_sources = seeded, "Seeded platform");
    }

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker = ReconcileWorker::new(
        platform,
        config.scope(),
        config.reconcile_interval,
        config.max_concurrent_reconciles,
        config.max_concurrent_operations,
    );
    let mut worker_handle = tokio::spawn(async move {
        worker.run(shutdown_rx).await;
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = &mut worker_handle => {
            if let Err(e) = result {
                error!(error = %e, "Reconcile worker panicked");
            }
            return Ok(());
        }
    }

    // Signal shutdown; the worker finishes its current sweep first.
    let _ = shutdown_tx.send(true);
    if let Err(e) = worker_handle.await {
        error!(error = %e, "Reconcile worker panicked");
    }

    info!("Assembly operator shutdown complete");
    Ok(())
}

/// Load spec sources from `path` into the platform.
async fn seed(platform: &InMemoryPlatform, path: &Path) -> Result<usize> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read seed file {}", path.display()))?;
    let sources: Vec<SeedSource> = serde_json::from_str(&raw)
        .with_context(|| format!("invalid seed file {}", path.display()))?;

    for source in &sources {
        AssemblyId::new(source.namespace.as_str(), source.name.as_str())
            .with_context(|| format!("invalid spec source {}/{}", source.namespace, source.name))?;
        let spec_source = ConfigMap {
            metadata: ObjectMeta::new(&source.namespace, &source.name, Labels::spec_sources()),
            data: source.data.clone(),
        };
        platform.insert(spec_source.into_resource()).await;
    }
    Ok(sources.len())
}
