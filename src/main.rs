//! # sidecar-controller
//!
//! Entry point of the controller process.
//!
//! ## Initialization Sequence
//!
//! 1. **Configuration** - parse flags, merge the optional TOML file, validate
//! 2. **Logging** - install the tracing subscriber
//! 3. **Cluster client** - load credentials and check the API server answers
//! 4. **Pod watch** - start the reflector and wait for the cache to sync
//! 5. **Workers** - start the reconciliation loop
//!
//! Any failure before the workers start aborts the process with context.
//!
//! ## Shutdown
//!
//! On SIGINT or SIGTERM the work queue is shut down, in-flight pods are
//! finished, and the pod watch is stopped. If the reconciliation loop ends
//! on its own first, the process exits with an error.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use sidecar_cluster::{EnqueuePolicy, KubeCommandExecutor, spawn_pod_watch};
use sidecar_controller::{Cli, ControllerConfig, logging};
use sidecar_reconciler::{
    LoopConfig, ReconcilerBuilder, ReconcilerConfig, ReconciliationLoop, ShutdownEvaluator,
};
use sidecar_workqueue::WorkQueue;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();

    let cli = Cli::parse();
    let config = ControllerConfig::resolve(&cli, dirs::home_dir().as_deref())
        .context("Failed to load configuration")?;

    logging::init(&config.log.level, config.log.format).context("Failed to initialise logging")?;

    info!(
        workers = config.workers,
        annotation = %config.sidecar_annotation,
        kubeconfig = ?config.kubeconfig,
        "Initializing sidecar controller"
    );

    let client = sidecar_cluster::connect(config.kubeconfig.as_deref())
        .await
        .context("Failed to connect to the cluster, check the kubeconfig")?;

    let queue = WorkQueue::with_rate_limiter(config.backoff.rate_limiter());
    let watch = spawn_pod_watch(
        client.clone(),
        queue.clone(),
        EnqueuePolicy {
            reconcile_on_initial_sync: config.reconcile_on_initial_sync,
        },
    );
    let cache = watch.cache();
    cache
        .wait_for_sync(config.cache_sync_timeout())
        .await
        .context("Pod cache did not sync")?;
    info!(pods = cache.len(), "Pod cache synced");

    let reconciler = ReconcilerBuilder::new()
        .with_cache(Arc::new(cache))
        .with_executor(Arc::new(KubeCommandExecutor::new(
            client,
            config.exec_timeout(),
        )))
        .with_evaluator(
            ShutdownEvaluator::new(config.sidecar_annotation.as_str())
                .with_trim_names(config.trim_annotation_names),
        )
        .with_config(ReconcilerConfig {
            max_retries: config.max_retries,
            termination_command: config.termination_command.clone(),
        })
        .build()
        .context("Failed to build reconciler")?;

    let workers = ReconciliationLoop::new(
        Arc::new(reconciler),
        queue,
        LoopConfig {
            workers: config.workers,
        },
    );
    let stopper = workers.stopper();
    let mut loop_handle = tokio::spawn(async move { workers.run().await });

    info!(
        startup_ms = start_time.elapsed().as_millis(),
        "Sidecar controller started"
    );

    tokio::select! {
        () = wait_for_shutdown() => {}
        joined = &mut loop_handle => {
            watch.stop();
            joined
                .context("Reconciliation loop task failed")?
                .context("Reconciliation loop failed")?;
            anyhow::bail!("Reconciliation loop stopped before shutdown was requested");
        }
    }

    info!("Shutdown requested, finishing in-flight pods");
    stopper.stop_and_drain().await;
    watch.stop();

    loop_handle
        .await
        .context("Reconciliation loop task failed")?
        .context("Reconciliation loop failed")?;

    info!("Sidecar controller stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn wait_for_shutdown() {
    let interrupt = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => info!("Received SIGINT"),
        () = terminate => info!("Received SIGTERM"),
    }
}
