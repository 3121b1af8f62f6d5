//! Reconciler error types

use thiserror::Error;

use crate::gateway::GatewayError;

/// Result type alias for reconciler operations
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Errors that can occur while reconciling the swap pool
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A status query or swap primitive failed
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// The baseline slot could not be created or activated during startup
    #[error("baseline slot unavailable: {reason}")]
    BaselineUnavailable { reason: String },

    /// A slot with this name is already on disk
    #[error("slot {0} already exists")]
    SlotExists(String),

    /// The name is not of the form `swapfile<N>`
    #[error("invalid slot name: {0}")]
    InvalidSlotName(String),

    /// Not enough disk for a new slot and nothing could be reclaimed
    #[error("disk exhausted: {free_bytes} bytes free, {required_bytes} required")]
    ResourceExhausted { free_bytes: u64, required_bytes: u64 },

    /// Releasing swap would push free memory below zero
    #[error("insufficient memory headroom: {headroom_mb:.1} MB")]
    InsufficientMemory { headroom_mb: f64 },

    /// Drain gave up after repeated failed releases
    #[error("drain stalled after {failures} failed releases")]
    DrainStalled { failures: u32 },

    /// Configuration could not be loaded or is inconsistent
    #[error("configuration error: {0}")]
    Config(String),
}

impl ReconcileError {
    /// A query or command that may succeed on the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Gateway(_))
    }

    /// Memory or disk pressure with no automatic remedy.
    pub fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            Self::ResourceExhausted { .. } | Self::InsufficientMemory { .. }
        )
    }
}
