//! Tick policy and slot selection
//!
//! Pure functions over typed snapshots. The reconciler feeds them fresh
//! gateway data every tick and acts on the answer.
//!
//! ```text
//! Swap.free > 2000                         → Shrink
//! 1000 ≤ Swap.total < 2500 ∧ Swap.used < 500 → ShrinkNearEmpty
//! Swap.free < 500                          → Expand
//! otherwise                                → Hold
//! ```
//!
//! The expand and shrink thresholds are deliberately far apart so one
//! expansion never qualifies for a shrink on the next measurement.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;

use crate::error::{ReconcileError, ReconcileResult};
use crate::types::{MemorySnapshot, SwapSlot, SwapStats, COMPENSATION_DIVISOR_MB};

/// Hysteresis thresholds, all in megabytes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyThresholds {
    /// Shrink when more swap than this is free.
    pub shrink_free_above_mb: f64,
    /// Lower bound (inclusive) of the near-empty total band.
    pub near_empty_total_min_mb: f64,
    /// Upper bound (exclusive) of the near-empty total band.
    pub near_empty_total_max_mb: f64,
    /// Near-empty applies only while less than this is used.
    pub near_empty_used_below_mb: f64,
    /// Expand when less swap than this is free.
    pub expand_free_below_mb: f64,
}

impl Default for PolicyThresholds {
    fn default() -> Self {
        Self {
            shrink_free_above_mb: 2000.0,
            near_empty_total_min_mb: 1000.0,
            near_empty_total_max_mb: 2500.0,
            near_empty_used_below_mb: 500.0,
            expand_free_below_mb: 500.0,
        }
    }
}

impl PolicyThresholds {
    /// Pick the action for one tick. First match wins.
    pub fn decide(&self, swap: &SwapStats) -> TickDecision {
        if swap.free > self.shrink_free_above_mb {
            TickDecision::Shrink
        } else if swap.total >= self.near_empty_total_min_mb
            && swap.total < self.near_empty_total_max_mb
            && swap.used < self.near_empty_used_below_mb
        {
            TickDecision::ShrinkNearEmpty
        } else if swap.free < self.expand_free_below_mb {
            TickDecision::Expand
        } else {
            TickDecision::Hold
        }
    }

    pub fn validate(&self) -> ReconcileResult<()> {
        if self.expand_free_below_mb >= self.shrink_free_above_mb {
            return Err(ReconcileError::Config(format!(
                "expand_free_below_mb ({}) must be below shrink_free_above_mb ({})",
                self.expand_free_below_mb, self.shrink_free_above_mb
            )));
        }
        if self.near_empty_total_min_mb >= self.near_empty_total_max_mb {
            return Err(ReconcileError::Config(format!(
                "near-empty band [{}, {}) is empty",
                self.near_empty_total_min_mb, self.near_empty_total_max_mb
            )));
        }
        Ok(())
    }
}

/// Action chosen for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickDecision {
    /// Too much free swap: release one slot.
    Shrink,
    /// Mid-sized pool sitting idle: release one slot.
    ShrinkNearEmpty,
    /// Free swap running low: add one slot.
    Expand,
    /// Nothing to do.
    Hold,
}

impl TickDecision {
    pub fn is_shrink(self) -> bool {
        matches!(self, Self::Shrink | Self::ShrinkNearEmpty)
    }
}

impl std::fmt::Display for TickDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shrink => write!(f, "shrink"),
            Self::ShrinkNearEmpty => write!(f, "shrink_near_empty"),
            Self::Expand => write!(f, "expand"),
            Self::Hold => write!(f, "hold"),
        }
    }
}

/// Order slots by index, falling back to name for non-canonical names.
fn by_name(a: &SwapSlot, b: &SwapSlot) -> Ordering {
    match (a.index(), b.index()) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.name.cmp(&b.name),
    }
}

/// Slot to release when no explicit target is given: the smallest active
/// canonical slot. The baseline is never chosen automatically.
pub fn select_release_target<'a>(
    slots: &'a [SwapSlot],
    root: &Path,
    unit_size: u64,
    tolerance: u64,
) -> Option<&'a SwapSlot> {
    slots
        .iter()
        .filter(|s| s.active && !s.is_baseline(root))
        .filter(|s| s.is_canonical(root, unit_size, tolerance))
        .min_by(|a, b| a.size_bytes.cmp(&b.size_bytes).then_with(|| by_name(a, b)))
}

/// Slot to sacrifice when the disk is too full for a new one: the largest,
/// then least-used, managed slot whose release keeps headroom non-negative.
pub fn select_disk_reclaim_target<'a>(
    slots: &'a [SwapSlot],
    snapshot: &MemorySnapshot,
    root: &Path,
) -> Option<&'a SwapSlot> {
    slots
        .iter()
        .filter(|s| s.active && s.is_direct_child_of(root) && !s.is_baseline(root))
        .filter(|s| snapshot.headroom_after_release(s.used_mb()) >= 0.0)
        .min_by(|a, b| {
            b.size_bytes
                .cmp(&a.size_bytes)
                .then_with(|| a.used_bytes.cmp(&b.used_bytes))
                .then_with(|| by_name(a, b))
        })
}

/// Active slots that must be replaced and removed: anything outside the
/// storage root, and anything inside it that is not canonical.
pub fn find_invalid_slots(
    slots: &[SwapSlot],
    root: &Path,
    unit_size: u64,
    tolerance: u64,
) -> Vec<SwapSlot> {
    slots
        .iter()
        .filter(|s| s.active)
        .filter(|s| !s.is_under(root) || !s.is_canonical(root, unit_size, tolerance))
        .cloned()
        .collect()
}

/// Number of new slots needed to absorb the swap held by `invalid`.
pub fn compensation_slot_count(invalid: &[SwapSlot]) -> usize {
    let total_mb: f64 = invalid.iter().map(SwapSlot::used_mb).sum();
    if total_mb <= 0.0 {
        return 0;
    }
    (total_mb / COMPENSATION_DIVISOR_MB).ceil() as usize
}
