//! Reconciler configuration
//!
//! Defaults, optionally overlaid by a TOML file and then by `MEMSWAP_*`
//! environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ReconcileError, ReconcileResult};
use crate::policy::PolicyThresholds;
use crate::types::{SIZE_TOLERANCE_BYTES, UNIT_SIZE_BYTES};

/// Default directory owned by the reconciler.
pub const DEFAULT_STORAGE_ROOT: &str = "/swapFolder";

/// Configuration for the swap reconciler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Directory holding every managed swap file
    pub storage_root: PathBuf,
    /// Size of each canonical swap file
    pub unit_size_bytes: u64,
    /// Allowed size deviation for a canonical slot
    pub size_tolerance_bytes: u64,
    /// Below this much free disk, creating a slot first tries to reclaim one
    pub min_free_disk_bytes: u64,
    /// Period of the reconciliation tick
    pub tick_interval_ms: u64,
    /// Deadline for each external command
    pub command_timeout_secs: u64,
    /// Hysteresis thresholds for the tick policy
    pub thresholds: PolicyThresholds,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from(DEFAULT_STORAGE_ROOT),
            unit_size_bytes: UNIT_SIZE_BYTES,
            size_tolerance_bytes: SIZE_TOLERANCE_BYTES,
            min_free_disk_bytes: 2_000_000_000,
            tick_interval_ms: 500,
            command_timeout_secs: 120,
            thresholds: PolicyThresholds::default(),
        }
    }
}

impl ReconcilerConfig {
    /// Load from a TOML file; missing keys keep their defaults.
    pub fn from_file(path: &Path) -> ReconcileResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ReconcileError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        toml::from_str(&content).map_err(|e| {
            ReconcileError::Config(format!("failed to parse {}: {e}", path.display()))
        })
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Overlay `MEMSWAP_*` environment variables. Unparseable values are
    /// ignored with a warning.
    pub fn apply_env(&mut self) {
        // MEMSWAP_STORAGE_ROOT: directory owned by the reconciler
        if let Some(root) = std::env::var("MEMSWAP_STORAGE_ROOT")
            .ok()
            .filter(|s| !s.is_empty())
        {
            self.storage_root = PathBuf::from(root);
        }
        if let Some(ms) = env_u64("MEMSWAP_TICK_INTERVAL_MS") {
            self.tick_interval_ms = ms;
        }
        if let Some(secs) = env_u64("MEMSWAP_COMMAND_TIMEOUT_SECS") {
            self.command_timeout_secs = secs;
        }
        if let Some(bytes) = env_u64("MEMSWAP_MIN_FREE_DISK_BYTES") {
            self.min_free_disk_bytes = bytes;
        }
    }

    /// Reject configurations the reconciler cannot run safely with.
    pub fn validate(&self) -> ReconcileResult<()> {
        if !self.storage_root.is_absolute() {
            return Err(ReconcileError::Config(format!(
                "storage_root must be absolute, got {}",
                self.storage_root.display()
            )));
        }
        if self.storage_root.parent().is_none() {
            return Err(ReconcileError::Config(
                "storage_root must not be the filesystem root".into(),
            ));
        }
        if self.unit_size_bytes == 0 {
            return Err(ReconcileError::Config("unit_size_bytes must be > 0".into()));
        }
        if self.tick_interval_ms == 0 {
            return Err(ReconcileError::Config("tick_interval_ms must be > 0".into()));
        }
        if self.command_timeout_secs == 0 {
            return Err(ReconcileError::Config(
                "command_timeout_secs must be > 0".into(),
            ));
        }
        self.thresholds.validate()
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Path of the slot called `name`.
    pub fn slot_path(&self, name: &str) -> PathBuf {
        self.storage_root.join(name)
    }
}

fn env_u64(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}
