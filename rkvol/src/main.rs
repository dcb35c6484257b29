mod config;
mod plugin;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use libvolume::{KernelBinder, RbdConnector, StateStore, SystemHost, VolumeDriver};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Cli, LogFormat};

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

/// Resolves on the first SIGINT or SIGTERM.
async fn shutdown_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to register SIGTERM handler, waiting for SIGINT only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let store = StateStore::open(&cli.state_dir)
        .await
        .with_context(|| format!("Failed to open state directory {}", cli.state_dir.display()))?;
    let rbd = cli.rbd_config();
    let driver = VolumeDriver::new(
        store,
        RbdConnector::new(rbd.clone()),
        KernelBinder::new(SystemHost::new(rbd), &cli.mount_root),
        cli.retry_policy(),
    );

    info!(
        state_dir = %cli.state_dir.display(),
        mount_root = %cli.mount_root.display(),
        "rkvol starting",
    );
    plugin::serve(Arc::new(driver), &cli.socket, shutdown_signal()).await?;
    info!("rkvol stopped");
    Ok(())
}
