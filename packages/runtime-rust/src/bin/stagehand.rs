//! `stagehand`: runs the registered background services until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use stagehand_core::{ClassRegistry, Datastores};
use stagehand_runtime::{jobs, telemetry, Args, InstanceRegistry, RuntimeConfig, Scheduler};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = RuntimeConfig::load(&args)?;
    telemetry::init_tracing(&config.log)?;
    info!(node_id = %config.node_id, "stagehand starting");

    let classes = Arc::new(ClassRegistry::new());
    jobs::register_builtin_jobs(&classes);
    let registry = Arc::new(InstanceRegistry::new(
        classes,
        Arc::new(config.source()),
        Arc::new(Datastores::new()),
    ));
    let scheduler = Scheduler::new(Arc::clone(&registry));

    scheduler.start_all().await;
    info!(active = ?scheduler.active_services(), "background services started");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");

    let shutdown = async {
        scheduler.stop_all().await;
        registry.destroy_all().await
    };
    match tokio::time::timeout(config.shutdown_grace(), shutdown).await {
        Ok(destroyed) => info!(destroyed, "shutdown complete"),
        Err(_) => warn!(
            grace_ms = config.shutdown_grace_ms,
            "shutdown grace period elapsed, exiting anyway"
        ),
    }
    Ok(())
}
