//! Swap inventory data model
//!
//! Typed snapshots handed to the reconciler by a [`SystemResourceGateway`].
//! Memory figures are megabytes (1 MB = 1,048,576 bytes); slot sizes are
//! bytes allocated on disk.
//!
//! [`SystemResourceGateway`]: crate::gateway::SystemResourceGateway

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Size of every canonical swap file.
pub const UNIT_SIZE_BYTES: u64 = 1_000_000_000;

/// Allowed deviation from [`UNIT_SIZE_BYTES`] before a slot is non-canonical.
pub const SIZE_TOLERANCE_BYTES: u64 = 10;

/// File name prefix of managed swap files.
pub const SLOT_PREFIX: &str = "swapfile";

/// Name of the baseline slot that must always exist and be active.
pub const BASELINE_SLOT: &str = "swapfile0";

/// Megabytes of in-use invalid swap replaced by one compensating slot.
pub const COMPENSATION_DIVISOR_MB: f64 = 1024.0;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Convert a byte count to megabytes.
pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

/// One swap area known to the kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapSlot {
    /// File name (`swapfile<N>` for managed slots).
    pub name: String,
    /// Absolute path of the swap file or device.
    pub path: PathBuf,
    /// Allocated size on disk.
    pub size_bytes: u64,
    /// Portion currently holding swapped-out pages.
    pub used_bytes: u64,
    /// Registered with the kernel as live swap.
    pub active: bool,
}

impl SwapSlot {
    /// Build an active slot from a kernel swap-table row.
    pub fn active(path: impl Into<PathBuf>, size_bytes: u64, used_bytes: u64) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self {
            name,
            path,
            size_bytes,
            used_bytes,
            active: true,
        }
    }

    pub fn used_mb(&self) -> f64 {
        bytes_to_mb(self.used_bytes)
    }

    pub fn size_mb(&self) -> f64 {
        bytes_to_mb(self.size_bytes)
    }

    /// Numeric suffix of a `swapfile<N>` name.
    pub fn index(&self) -> Option<u32> {
        parse_slot_index(&self.name)
    }

    /// Whether the slot lives somewhere below `root` (at any depth).
    pub fn is_under(&self, root: &Path) -> bool {
        self.path.starts_with(root) && self.path != root
    }

    /// Whether the slot sits directly in `root`.
    pub fn is_direct_child_of(&self, root: &Path) -> bool {
        self.path.parent() == Some(root)
    }

    /// Directly under the storage root with the fixed unit size.
    pub fn is_canonical(&self, root: &Path, unit_size: u64, tolerance: u64) -> bool {
        self.is_direct_child_of(root) && self.size_bytes.abs_diff(unit_size) <= tolerance
    }

    pub fn is_baseline(&self, root: &Path) -> bool {
        self.path == root.join(BASELINE_SLOT)
    }
}

/// Physical memory figures in megabytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MemStats {
    pub total: f64,
    pub used: f64,
    pub free: f64,
    pub shared: f64,
    pub buff_cache: f64,
    pub available: f64,
}

/// Swap figures in megabytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SwapStats {
    pub total: f64,
    pub used: f64,
    pub free: f64,
}

/// Memory and swap captured from a single query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub mem: MemStats,
    pub swap: SwapStats,
}

impl MemorySnapshot {
    /// `Mem.free + Swap.free - used_mb`: what would remain free if a slot
    /// holding `used_mb` were pushed back into RAM.
    pub fn headroom_after_release(&self, used_mb: f64) -> f64 {
        self.mem.free + self.swap.free - used_mb
    }
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub path: PathBuf,
    pub is_dir: bool,
}

impl DirEntry {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            is_dir: false,
        }
    }

    pub fn dir(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            is_dir: true,
        }
    }

    pub fn file_name(&self) -> Option<String> {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    }
}

/// Canonical name for slot index `n`.
pub fn slot_name(n: u32) -> String {
    format!("{SLOT_PREFIX}{n}")
}

/// Parse `N` out of `swapfile<N>`. Only plain decimal digits are accepted.
pub fn parse_slot_index(name: &str) -> Option<u32> {
    let digits = name.strip_prefix(SLOT_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Smallest `swapfile<N>` not present in `existing`.
pub fn next_slot_name<'a, I>(existing: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let taken: HashSet<u32> = existing.into_iter().filter_map(parse_slot_index).collect();
    let mut n = 0u32;
    while taken.contains(&n) {
        n += 1;
    }
    slot_name(n)
}
