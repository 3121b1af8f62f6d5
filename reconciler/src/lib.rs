//! Memory Swap Reconciler
//!
//! Keeps a host's swap capacity matched to memory pressure by creating,
//! activating, deactivating and deleting fixed-size swap files in a single
//! storage directory.
//!
//! - [`SwapReconciler`]: initialization pass, periodic tick, and the
//!   release/create/activate/cleanup operations.
//! - [`SystemResourceGateway`]: everything the reconciler needs from the
//!   host; [`CommandGateway`] implements it with util-linux tools.
//! - [`policy`]: the hysteresis thresholds and slot selection rules.
//! - [`drain`]: releases all swap ahead of an uninstall.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use memswap_reconciler::{CommandGateway, ReconcilerConfig, SwapReconciler};
//!
//! let config = ReconcilerConfig::from_env();
//! let gateway = CommandGateway::new(config.command_timeout());
//! let reconciler = Arc::new(SwapReconciler::new(gateway, config));
//! reconciler.initialize().await?;
//! tokio::spawn(Arc::clone(&reconciler).run());
//! // ...
//! reconciler.stop().await;
//! ```

pub mod config;
pub mod drain;
pub mod error;
pub mod gateway;
pub mod policy;
pub mod reconciler;
pub mod types;

pub use config::ReconcilerConfig;
pub use drain::{drain, DrainOptions, DrainReport};
pub use error::{ReconcileError, ReconcileResult};
pub use gateway::{CommandGateway, GatewayError, SystemResourceGateway};
pub use policy::{PolicyThresholds, TickDecision};
pub use reconciler::{CleanupReport, InitReport, SwapReconciler, TickOutcome};
pub use types::{
    DirEntry, MemStats, MemorySnapshot, SwapSlot, SwapStats, BASELINE_SLOT, UNIT_SIZE_BYTES,
};
