//! memswapd support library: CLI definition, logging setup and the
//! installation preflight.

pub mod cli;
pub mod logging;
pub mod preflight;
