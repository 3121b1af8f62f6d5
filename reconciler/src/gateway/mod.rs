//! System resource gateway
//!
//! The reconciler's only window onto the host: three read interfaces
//! (memory, swap table, free space) and the swap-file primitives. Every
//! call may fail independently; the gateway never retries.

mod command;
pub mod parse;

pub use command::CommandGateway;

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::types::{DirEntry, MemorySnapshot, SwapSlot};

/// Error types for gateway operations
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status:?}: {stderr}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("`{command}` did not finish within {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("unexpected output from `{command}`: {detail}")]
    Parse { command: String, detail: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// The external tool is not installed (or not on `PATH`).
    pub fn is_tool_missing(&self) -> bool {
        matches!(self, Self::Spawn { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }

    pub fn is_permission_denied(&self) -> bool {
        match self {
            Self::Spawn { source, .. } | Self::Io(source) => {
                source.kind() == std::io::ErrorKind::PermissionDenied
            }
            _ => false,
        }
    }
}

/// Host operations consumed by the reconciler.
#[async_trait]
pub trait SystemResourceGateway: Send + Sync {
    /// Memory and swap totals captured by one query.
    async fn get_memory_snapshot(&self) -> Result<MemorySnapshot, GatewayError>;

    /// Every swap area the kernel currently has active. For swap files
    /// `size_bytes` is the allocated length on disk, not the kernel's
    /// usable size.
    async fn get_swap_slots(&self) -> Result<Vec<SwapSlot>, GatewayError>;

    /// Bytes available to unprivileged writers on the filesystem holding `path`.
    async fn get_free_space_bytes(&self, path: &Path) -> Result<u64, GatewayError>;

    /// Reserve `size_bytes` of real blocks at `path`, readable only by the owner.
    async fn allocate(&self, path: &Path, size_bytes: u64) -> Result<(), GatewayError>;

    /// Write a swap signature to `path`.
    async fn format_swap(&self, path: &Path) -> Result<(), GatewayError>;

    /// Register `path` as live swap.
    async fn activate(&self, path: &Path) -> Result<(), GatewayError>;

    /// Remove `path` from live swap. The file itself stays on disk.
    async fn deactivate(&self, path: &Path) -> Result<(), GatewayError>;

    /// Delete a file, or a directory with its contents.
    async fn delete(&self, path: &Path) -> Result<(), GatewayError>;

    /// Entries directly inside `path`.
    async fn list_directory(&self, path: &Path) -> Result<Vec<DirEntry>, GatewayError>;
}
