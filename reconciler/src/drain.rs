//! Drain: release every active swap area before uninstalling
//!
//! Used with the periodic loop stopped. Releases the smallest active swap
//! area one at a time, pausing between attempts so the kernel can page
//! data back in, until the swap table is empty; then cleans the storage
//! root.

use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{ReconcileError, ReconcileResult};
use crate::gateway::SystemResourceGateway;
use crate::reconciler::{CleanupReport, SwapReconciler};
use crate::types::SwapSlot;

/// Limits for a drain run
#[derive(Debug, Clone)]
pub struct DrainOptions {
    /// Give up after more than this many failed releases
    pub max_failures: u32,
    /// Pause between release attempts
    pub retry_delay: Duration,
    /// Required `Mem.free + Swap.free` before starting, in MB
    pub min_headroom_mb: f64,
}

impl Default for DrainOptions {
    fn default() -> Self {
        Self {
            max_failures: 30,
            retry_delay: Duration::from_secs(1),
            min_headroom_mb: 1000.0,
        }
    }
}

/// Outcome of a successful drain
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DrainReport {
    pub released: Vec<PathBuf>,
    pub failures: u32,
    pub cleanup: CleanupReport,
}

/// Deactivate all swap, then clean the storage root.
pub async fn drain<G: SystemResourceGateway>(
    reconciler: &SwapReconciler<G>,
    options: &DrainOptions,
) -> ReconcileResult<DrainReport> {
    let gateway = reconciler.gateway();

    let snapshot = gateway.get_memory_snapshot().await?;
    let headroom = snapshot.mem.free + snapshot.swap.free;
    if headroom <= options.min_headroom_mb {
        warn!(
            headroom_mb = headroom,
            required_mb = options.min_headroom_mb,
            "not enough free memory to drain swap"
        );
        return Err(ReconcileError::InsufficientMemory {
            headroom_mb: headroom,
        });
    }

    let mut report = DrainReport::default();
    loop {
        if report.failures > options.max_failures {
            return Err(ReconcileError::DrainStalled {
                failures: report.failures,
            });
        }

        let slots = gateway.get_swap_slots().await?;
        let Some(target) = smallest_active(&slots).cloned() else {
            report.cleanup = reconciler.cleanup().await?;
            info!(
                released = report.released.len(),
                failures = report.failures,
                "all swap drained"
            );
            return Ok(report);
        };

        match release_one(reconciler, &target).await {
            Ok(true) => report.released.push(target.path),
            Ok(false) => report.failures += 1,
            Err(e) => {
                warn!(path = %target.path.display(), "drain release failed: {e}");
                report.failures += 1;
            }
        }

        tokio::time::sleep(options.retry_delay).await;
    }
}

fn smallest_active(slots: &[SwapSlot]) -> Option<&SwapSlot> {
    slots
        .iter()
        .filter(|s| s.active)
        .min_by(|a, b| {
            a.size_bytes
                .cmp(&b.size_bytes)
                .then_with(|| a.path.cmp(&b.path))
        })
}

/// Release `target` only if memory can absorb its pages; a drain never
/// creates replacement slots.
async fn release_one<G: SystemResourceGateway>(
    reconciler: &SwapReconciler<G>,
    target: &SwapSlot,
) -> ReconcileResult<bool> {
    let snapshot = reconciler.gateway().get_memory_snapshot().await?;
    let headroom = snapshot.headroom_after_release(target.used_mb());
    if headroom < 0.0 {
        warn!(
            path = %target.path.display(),
            headroom_mb = headroom,
            "waiting for memory before releasing"
        );
        return Ok(false);
    }

    let path = target.path.to_string_lossy();
    Ok(reconciler.release(Some(&*path)).await?.is_some())
}
