//! Command-line interface

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use memswap_reconciler::{ReconcileResult, ReconcilerConfig};

/// Grow and shrink a pool of swap files with memory pressure
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the managed swap files (overrides MEMSWAP_STORAGE_ROOT)
    #[arg(long, global = true)]
    pub storage_root: Option<PathBuf>,

    /// Also append logs to this file. It grows without bound; rotate it
    /// externally (logrotate with copytruncate)
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Reconciliation period in milliseconds (overrides MEMSWAP_TICK_INTERVAL_MS)
    #[arg(long, global = true)]
    pub interval_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Initialize the pool and reconcile until SIGINT or SIGTERM
    Run,
    /// Deactivate every swap file and clean the storage root
    Drain {
        /// Delete the storage root afterwards
        #[arg(long, default_value_t = false)]
        remove_root: bool,
    },
    /// Verify the host has everything the daemon needs
    Check,
    /// Print memory, active swap and the current decision as JSON
    Status,
}

impl Cli {
    /// Subcommand to execute; `run` when none was given.
    pub fn action(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }

    /// Defaults, then the config file, then `MEMSWAP_*` variables, then flags.
    pub fn resolve_config(&self) -> ReconcileResult<ReconcilerConfig> {
        let mut config = match &self.config {
            Some(path) => ReconcilerConfig::from_file(path)?,
            None => ReconcilerConfig::default(),
        };
        config.apply_env();

        if let Some(root) = &self.storage_root {
            config.storage_root = root.clone();
        }
        if let Some(ms) = self.interval_ms {
            config.tick_interval_ms = ms;
        }

        config.validate()?;
        Ok(config)
    }
}
