//! Installation preflight
//!
//! Runs each host capability the reconciler depends on once and reports
//! the result per probe. Nothing here touches live swap.

use std::fmt;
use std::path::Path;

use memswap_reconciler::{GatewayError, SystemResourceGateway};

/// File written and removed by the disk probe.
pub const PROBE_FILE: &str = ".memswap-probe";

/// Result of a single probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub name: &'static str,
    pub outcome: Result<String, String>,
}

impl ProbeResult {
    pub fn passed(&self) -> bool {
        self.outcome.is_ok()
    }
}

impl fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Ok(detail) => write!(f, "[ok]   {:<14} {detail}", self.name),
            Err(detail) => write!(f, "[fail] {:<14} {detail}", self.name),
        }
    }
}

fn describe(err: &GatewayError) -> String {
    if err.is_tool_missing() {
        format!("required tool not installed: {err}")
    } else if err.is_permission_denied() {
        format!("permission denied (run as root): {err}")
    } else {
        err.to_string()
    }
}

/// Probe `gateway` against `root`. The root is created if missing.
pub async fn run_checks<G: SystemResourceGateway>(gateway: &G, root: &Path) -> Vec<ProbeResult> {
    let mut results = Vec::new();

    results.push(ProbeResult {
        name: "storage root",
        outcome: tokio::fs::create_dir_all(root)
            .await
            .map(|()| root.display().to_string())
            .map_err(|e| format!("cannot create {}: {e}", root.display())),
    });

    results.push(ProbeResult {
        name: "memory",
        outcome: gateway
            .get_memory_snapshot()
            .await
            .map(|s| {
                format!(
                    "mem free {:.0} MB, swap {:.0}/{:.0} MB used",
                    s.mem.free, s.swap.used, s.swap.total
                )
            })
            .map_err(|e| describe(&e)),
    });

    results.push(ProbeResult {
        name: "swap table",
        outcome: gateway
            .get_swap_slots()
            .await
            .map(|slots| format!("{} active swap area(s)", slots.len()))
            .map_err(|e| describe(&e)),
    });

    results.push(ProbeResult {
        name: "free space",
        outcome: gateway
            .get_free_space_bytes(root)
            .await
            .map(|b| format!("{b} bytes available"))
            .map_err(|e| describe(&e)),
    });

    let probe = root.join(PROBE_FILE);
    let allocated = gateway.allocate(&probe, 1).await;
    let outcome = match allocated {
        Ok(()) => gateway
            .delete(&probe)
            .await
            .map(|()| "allocate and delete ok".to_string())
            .map_err(|e| format!("probe file not removed: {}", describe(&e))),
        Err(e) => Err(describe(&e)),
    };
    results.push(ProbeResult {
        name: "allocate",
        outcome,
    });

    results
}
