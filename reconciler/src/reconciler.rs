//! Swap Reconciler: owner of the swap-file inventory
//!
//! Runs an idempotent initialization pass once, then a bounded
//! reconciliation tick on a fixed period.
//!
//! # Lifecycle
//!
//! ```text
//! initialize()
//!   ├─ cleanup()                      stale files and directories
//!   ├─ ensure swapfile0               fatal on failure
//!   ├─ detect invalid slots           wrong size, nested, or outside the root
//!   ├─ compensate                     ceil(used_mb / 1024) new slots first
//!   ├─ purge                          deactivate invalid slots
//!   └─ cleanup()                      delete what was deactivated
//! run()
//!   └─ every tick_interval: tick()    Shrink | ShrinkNearEmpty | Expand | Hold
//! ```
//!
//! Removal is always two-phase: `release` only deactivates, and `cleanup`
//! deletes a file only after a fresh swap-table read shows it inactive.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ReconcilerConfig;
use crate::error::{ReconcileError, ReconcileResult};
use crate::gateway::SystemResourceGateway;
use crate::policy::{
    compensation_slot_count, find_invalid_slots, select_disk_reclaim_target,
    select_release_target, TickDecision,
};
use crate::types::{next_slot_name, parse_slot_index, SwapSlot, BASELINE_SLOT};

/// Result of one tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// A previous tick was still running (or the reconciler is stopping).
    Skipped,
    /// The memory snapshot could not be read; retried next tick.
    SnapshotUnavailable,
    /// The decision was carried out.
    Completed(TickDecision),
    /// The decision was made but its action failed.
    Failed {
        decision: TickDecision,
        reason: String,
    },
}

/// What one `cleanup` pass did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
    /// Directories left alone because live swap sits inside them.
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

impl CleanupReport {
    pub fn is_noop(&self) -> bool {
        self.removed.is_empty() && self.failed.is_empty()
    }
}

/// What `initialize` did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InitReport {
    pub cleaned: usize,
    pub baseline_created: bool,
    pub baseline_activated: bool,
    pub invalid: Vec<SwapSlot>,
    pub compensated: Vec<String>,
    pub purged: usize,
}

/// Owns the swap pool under one storage root.
pub struct SwapReconciler<G> {
    gateway: G,
    config: ReconcilerConfig,
    /// Held for the whole of a tick or of initialization.
    in_flight: Mutex<()>,
    shutdown: CancellationToken,
    ready: watch::Sender<bool>,
}

impl<G: SystemResourceGateway> SwapReconciler<G> {
    pub fn new(gateway: G, config: ReconcilerConfig) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            gateway,
            config,
            in_flight: Mutex::new(()),
            shutdown: CancellationToken::new(),
            ready,
        }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn storage_root(&self) -> &Path {
        &self.config.storage_root
    }

    /// Whether `initialize` has completed.
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    pub fn subscribe_ready(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    /// Wait until `initialize` has completed.
    pub async fn ready(&self) {
        let mut rx = self.ready.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Halt the periodic loop and wait for an in-flight tick to finish.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let _guard = self.in_flight.lock().await;
        info!("swap reconciler stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Bring the pool into a known-good shape. Safe to re-run after a crash.
    ///
    /// Only a failure to establish the baseline slot is returned as an
    /// error; every other step logs and continues.
    pub async fn initialize(&self) -> ReconcileResult<InitReport> {
        let _guard = self.in_flight.lock().await;
        let root = self.storage_root();
        info!(root = %root.display(), "initializing swap pool");

        let mut report = InitReport::default();

        match self.cleanup().await {
            Ok(c) => report.cleaned = c.removed.len(),
            Err(e) => warn!("initial cleanup failed, continuing: {e}"),
        }

        self.establish_baseline(&mut report).await?;

        match self.gateway.get_swap_slots().await {
            Ok(slots) => {
                let invalid = find_invalid_slots(
                    &slots,
                    root,
                    self.config.unit_size_bytes,
                    self.config.size_tolerance_bytes,
                );
                if !invalid.is_empty() {
                    self.replace_invalid(&invalid, &mut report).await;
                }
                report.invalid = invalid;
            }
            Err(e) => warn!("invalid-slot scan skipped, swap table unavailable: {e}"),
        }

        match self.cleanup().await {
            Ok(c) => report.cleaned += c.removed.len(),
            Err(e) => warn!("final cleanup failed: {e}"),
        }

        if report.invalid.iter().any(|s| s.is_baseline(root)) {
            // A non-canonical baseline was purged above; rebuild it.
            self.establish_baseline(&mut report).await?;
        }

        self.ready.send_replace(true);
        info!(
            cleaned = report.cleaned,
            baseline_created = report.baseline_created,
            invalid = report.invalid.len(),
            compensated = report.compensated.len(),
            purged = report.purged,
            "swap pool initialized"
        );
        Ok(report)
    }

    async fn establish_baseline(&self, report: &mut InitReport) -> ReconcileResult<()> {
        self.ensure_baseline(report).await.map_err(|e| {
            error!(severity = "fatal", "baseline slot {BASELINE_SLOT} unavailable: {e}");
            ReconcileError::BaselineUnavailable {
                reason: e.to_string(),
            }
        })
    }

    async fn ensure_baseline(&self, report: &mut InitReport) -> ReconcileResult<()> {
        let path = self.config.slot_path(BASELINE_SLOT);

        let listing = self.gateway.list_directory(self.storage_root()).await?;
        if !listing.iter().any(|e| !e.is_dir && e.path == path) {
            self.create(BASELINE_SLOT).await?;
            report.baseline_created = true;
        }

        let slots = self.gateway.get_swap_slots().await?;
        if !slots.iter().any(|s| s.active && s.path == path) {
            self.gateway.activate(&path).await?;
            report.baseline_activated = true;
            info!(path = %path.display(), "baseline slot activated");
        }
        Ok(())
    }

    /// Add replacement capacity for `invalid`, then deactivate each of them.
    async fn replace_invalid(&self, invalid: &[SwapSlot], report: &mut InitReport) {
        let needed = compensation_slot_count(invalid);
        warn!(
            invalid = invalid.len(),
            compensating = needed,
            "found non-canonical swap; replacing before removal"
        );
        for slot in invalid {
            warn!(
                path = %slot.path.display(),
                size_bytes = slot.size_bytes,
                used_mb = slot.used_mb(),
                "invalid slot"
            );
        }

        for _ in 0..needed {
            match self.expand_one().await {
                Ok(name) => report.compensated.push(name),
                Err(e) => warn!("compensating slot not created: {e}"),
            }
        }

        for slot in invalid {
            let target = slot.path.to_string_lossy();
            match self.release(Some(&*target)).await {
                Ok(Some(_)) => report.purged += 1,
                Ok(None) => warn!(path = %slot.path.display(), "invalid slot vanished before purge"),
                Err(e) => warn!(path = %slot.path.display(), "invalid slot not purged: {e}"),
            }
        }
    }

    /// Run one reconciliation step. Never fails; the outcome says what happened.
    pub async fn tick(&self) -> TickOutcome {
        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!("previous tick still running, skipping");
            return TickOutcome::Skipped;
        };
        if self.shutdown.is_cancelled() {
            return TickOutcome::Skipped;
        }

        let snapshot = match self.gateway.get_memory_snapshot().await {
            Ok(s) => s,
            Err(e) => {
                warn!("memory snapshot unavailable, retrying next tick: {e}");
                return TickOutcome::SnapshotUnavailable;
            }
        };

        let decision = self.config.thresholds.decide(&snapshot.swap);
        if decision == TickDecision::Hold {
            debug!(
                swap_free_mb = snapshot.swap.free,
                swap_total_mb = snapshot.swap.total,
                "hold"
            );
            return TickOutcome::Completed(decision);
        }

        info!(
            %decision,
            swap_free_mb = snapshot.swap.free,
            swap_total_mb = snapshot.swap.total,
            swap_used_mb = snapshot.swap.used,
            mem_free_mb = snapshot.mem.free,
            "tick decision"
        );

        let result = match decision {
            TickDecision::Shrink | TickDecision::ShrinkNearEmpty => self.shrink().await,
            TickDecision::Expand => self.expand_one().await.map(|_| ()),
            TickDecision::Hold => Ok(()),
        };

        match result {
            Ok(()) => TickOutcome::Completed(decision),
            Err(e) => {
                if e.is_exhaustion() {
                    error!(severity = "fatal", %decision, "{e}");
                } else {
                    warn!(%decision, "tick action failed: {e}");
                }
                TickOutcome::Failed {
                    decision,
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn shrink(&self) -> ReconcileResult<()> {
        if self.release(None).await?.is_none() {
            debug!("no releasable slot");
        }
        self.cleanup().await?;
        Ok(())
    }

    /// Create and activate one slot under the next free name.
    async fn expand_one(&self) -> ReconcileResult<String> {
        let name = self.next_name().await?;
        self.create(&name).await?;
        self.activate(&name).await?;
        info!(slot = %name, "swap pool expanded");
        Ok(name)
    }

    /// Deactivate one slot.
    ///
    /// `target` is a path or a slot name; `None` selects the smallest
    /// canonical non-baseline slot. If pushing the slot's pages back into
    /// RAM would leave negative headroom, a replacement slot is created and
    /// activated first. Returns `Ok(None)` when there is nothing to release.
    /// The file is deleted by a later [`cleanup`](Self::cleanup).
    pub async fn release(&self, target: Option<&str>) -> ReconcileResult<Option<SwapSlot>> {
        let slots = self.gateway.get_swap_slots().await?;
        let chosen = match target {
            Some(t) => self.find_slot(&slots, t),
            None => select_release_target(
                &slots,
                self.storage_root(),
                self.config.unit_size_bytes,
                self.config.size_tolerance_bytes,
            ),
        };
        let Some(slot) = chosen.cloned() else {
            if let Some(t) = target {
                info!(slot = t, "release target not active, nothing to do");
            }
            return Ok(None);
        };

        let snapshot = self.gateway.get_memory_snapshot().await?;
        let headroom = snapshot.headroom_after_release(slot.used_mb());
        if headroom < 0.0 {
            warn!(
                path = %slot.path.display(),
                used_mb = slot.used_mb(),
                headroom_mb = headroom,
                "releasing would exhaust memory; adding a replacement slot first"
            );
            let replacement = self.expand_one().await.map_err(|e| {
                error!(
                    path = %slot.path.display(),
                    "replacement slot failed, release aborted: {e}"
                );
                e
            })?;
            info!(replacement = %replacement, "replacement slot active");
        }

        self.gateway.deactivate(&slot.path).await?;
        info!(
            path = %slot.path.display(),
            size_bytes = slot.size_bytes,
            used_mb = slot.used_mb(),
            "slot deactivated"
        );
        Ok(Some(slot))
    }

    fn find_slot<'a>(&self, slots: &'a [SwapSlot], target: &str) -> Option<&'a SwapSlot> {
        let as_path = Path::new(target);
        let in_root = self.storage_root().join(target);
        slots
            .iter()
            .filter(|s| s.active)
            .find(|s| s.path == as_path)
            .or_else(|| slots.iter().filter(|s| s.active).find(|s| s.path == in_root))
            .or_else(|| slots.iter().filter(|s| s.active).find(|s| s.name == target))
    }

    /// Allocate and format a new slot. Activation is the caller's job.
    ///
    /// With less than `min_free_disk_bytes` free, one slot is sacrificed
    /// first; if none can go without exhausting memory, the create aborts.
    /// A failed allocate or format is left as-is for cleanup to remove.
    pub async fn create(&self, name: &str) -> ReconcileResult<PathBuf> {
        if parse_slot_index(name).is_none() {
            return Err(ReconcileError::InvalidSlotName(name.to_string()));
        }
        let root = self.storage_root();
        let path = self.config.slot_path(name);

        let listing = self.gateway.list_directory(root).await?;
        if listing.iter().any(|e| e.path == path) {
            return Err(ReconcileError::SlotExists(name.to_string()));
        }

        let free = self.gateway.get_free_space_bytes(root).await?;
        if free < self.config.min_free_disk_bytes {
            self.reclaim_disk(free).await?;
        }

        if let Err(e) = self
            .gateway
            .allocate(&path, self.config.unit_size_bytes)
            .await
        {
            warn!(path = %path.display(), "allocate failed, leaving for cleanup: {e}");
            return Err(e.into());
        }
        if let Err(e) = self.gateway.format_swap(&path).await {
            warn!(path = %path.display(), "mkswap failed, leaving for cleanup: {e}");
            return Err(e.into());
        }

        info!(path = %path.display(), size_bytes = self.config.unit_size_bytes, "slot created");
        Ok(path)
    }

    async fn reclaim_disk(&self, free: u64) -> ReconcileResult<()> {
        let slots = self.gateway.get_swap_slots().await?;
        let snapshot = self.gateway.get_memory_snapshot().await?;

        let Some(victim) =
            select_disk_reclaim_target(&slots, &snapshot, self.storage_root()).cloned()
        else {
            error!(
                severity = "fatal",
                free_bytes = free,
                required_bytes = self.config.min_free_disk_bytes,
                "disk and memory both exhausted; no slot can be released"
            );
            return Err(ReconcileError::ResourceExhausted {
                free_bytes: free,
                required_bytes: self.config.min_free_disk_bytes,
            });
        };

        warn!(
            free_bytes = free,
            victim = %victim.path.display(),
            "low disk space, releasing a slot before creating another"
        );
        self.gateway.deactivate(&victim.path).await?;
        self.cleanup().await?;

        let free = self.gateway.get_free_space_bytes(self.storage_root()).await?;
        if free < self.config.min_free_disk_bytes {
            error!(
                severity = "fatal",
                free_bytes = free,
                required_bytes = self.config.min_free_disk_bytes,
                "disk still short after releasing a slot"
            );
            return Err(ReconcileError::ResourceExhausted {
                free_bytes: free,
                required_bytes: self.config.min_free_disk_bytes,
            });
        }
        Ok(())
    }

    /// Register an existing slot file as live swap.
    pub async fn activate(&self, name: &str) -> ReconcileResult<()> {
        if parse_slot_index(name).is_none() {
            return Err(ReconcileError::InvalidSlotName(name.to_string()));
        }
        let path = self.config.slot_path(name);
        self.gateway.activate(&path).await?;
        info!(path = %path.display(), "slot activated");
        Ok(())
    }

    /// Remove every directory and every file under the storage root that is
    /// not an active swap slot.
    ///
    /// Nothing is deleted if the swap table cannot be read, and a directory
    /// holding live swap is skipped.
    pub async fn cleanup(&self) -> ReconcileResult<CleanupReport> {
        let entries = self.gateway.list_directory(self.storage_root()).await?;
        let slots = self.gateway.get_swap_slots().await?;
        let active: Vec<&Path> = slots
            .iter()
            .filter(|s| s.active)
            .map(|s| s.path.as_path())
            .collect();

        let mut report = CleanupReport::default();
        for entry in entries {
            if entry.is_dir {
                if active.iter().any(|p| p.starts_with(&entry.path)) {
                    warn!(path = %entry.path.display(), "directory holds active swap, not removing");
                    report.skipped.push(entry.path);
                    continue;
                }
            } else if active.contains(&entry.path.as_path()) {
                continue;
            }

            match self.gateway.delete(&entry.path).await {
                Ok(()) => {
                    info!(path = %entry.path.display(), "removed stale entry");
                    report.removed.push(entry.path);
                }
                Err(e) => {
                    warn!(path = %entry.path.display(), "failed to remove stale entry: {e}");
                    report.failed.push(entry.path);
                }
            }
        }
        Ok(report)
    }

    /// Smallest `swapfile<N>` not present on disk.
    pub async fn next_name(&self) -> ReconcileResult<String> {
        let entries = self.gateway.list_directory(self.storage_root()).await?;
        let names: Vec<String> = entries.iter().filter_map(|e| e.file_name()).collect();
        Ok(next_slot_name(names.iter().map(String::as_str)))
    }
}

impl<G: SystemResourceGateway + 'static> SwapReconciler<G> {
    /// Drive `tick` every `tick_interval` until [`stop`](Self::stop).
    ///
    /// Each tick runs on its own task; a firing that lands while the
    /// previous tick is still busy is skipped, not queued.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            interval_ms = self.config.tick_interval_ms,
            "reconciliation loop started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let this = Arc::clone(&self);
                    tokio::spawn(async move {
                        this.tick().await;
                    });
                }
            }
        }

        info!("reconciliation loop exited");
    }
}
