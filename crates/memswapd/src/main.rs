//! memswapd: swap-file pool daemon
//!
//! # Usage
//!
//! ```bash
//! # Reconcile until SIGINT/SIGTERM
//! memswapd run --log-file /var/log/memswapd.log
//!
//! # Before uninstalling
//! memswapd drain --remove-root
//!
//! # Inspect
//! memswapd check
//! memswapd status
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use memswap_reconciler::{
    drain, CommandGateway, DrainOptions, MemorySnapshot, ReconcilerConfig, SwapReconciler,
    SwapSlot, SystemResourceGateway, TickDecision,
};
use memswapd::cli::{Cli, Command};
use memswapd::{logging, preflight};

#[derive(Serialize)]
struct Status {
    snapshot: MemorySnapshot,
    slots: Vec<SwapSlot>,
    decision: TickDecision,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_file.as_deref())?;

    let config = cli.resolve_config().context("invalid configuration")?;

    match cli.action() {
        Command::Run => run(config).await,
        Command::Drain { remove_root } => drain_all(config, remove_root).await,
        Command::Check => check(&config).await,
        Command::Status => status(&config).await,
    }
}

async fn prepare_root(root: &Path) -> Result<()> {
    tokio::fs::create_dir_all(root)
        .await
        .with_context(|| format!("failed to create storage root {}", root.display()))
}

async fn run(config: ReconcilerConfig) -> Result<()> {
    prepare_root(&config.storage_root).await?;

    let gateway = CommandGateway::new(config.command_timeout());
    let reconciler = Arc::new(SwapReconciler::new(gateway, config));

    if let Err(e) = reconciler.initialize().await {
        error!(severity = "fatal", "initialization failed: {e}");
        return Err(e).context("swap pool could not be initialized");
    }

    let loop_task = tokio::spawn(Arc::clone(&reconciler).run());

    wait_for_shutdown().await?;
    reconciler.stop().await;
    loop_task.await.context("reconciliation loop panicked")?;
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("failed to register SIGTERM")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to register SIGINT")?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
    Ok(())
}

async fn drain_all(config: ReconcilerConfig, remove_root: bool) -> Result<()> {
    prepare_root(&config.storage_root).await?;
    let root = config.storage_root.clone();

    let gateway = CommandGateway::new(config.command_timeout());
    let reconciler = SwapReconciler::new(gateway, config);

    // Normalizes the pool; draining proceeds even without a baseline.
    if let Err(e) = reconciler.initialize().await {
        warn!("initialization before drain failed: {e}");
    }
    reconciler.stop().await;

    let report = drain(&reconciler, &DrainOptions::default())
        .await
        .context("drain did not complete")?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if remove_root {
        tokio::fs::remove_dir_all(&root)
            .await
            .with_context(|| format!("failed to remove {}", root.display()))?;
        info!(root = %root.display(), "storage root removed");
    }
    Ok(())
}

async fn check(config: &ReconcilerConfig) -> Result<()> {
    let gateway = CommandGateway::new(config.command_timeout());
    let results = preflight::run_checks(&gateway, &config.storage_root).await;

    for result in &results {
        println!("{result}");
    }
    let failed = results.iter().filter(|r| !r.passed()).count();
    if failed > 0 {
        bail!("{failed} preflight check(s) failed");
    }
    Ok(())
}

async fn status(config: &ReconcilerConfig) -> Result<()> {
    let gateway = CommandGateway::new(config.command_timeout());
    let snapshot = gateway.get_memory_snapshot().await?;
    let slots = gateway.get_swap_slots().await?;
    let decision = config.thresholds.decide(&snapshot.swap);

    let status = Status {
        snapshot,
        slots,
        decision,
    };
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
