//! Gateway backed by util-linux/coreutils commands.

use async_trait::async_trait;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

use super::parse;
use super::{GatewayError, SystemResourceGateway};
use crate::types::{DirEntry, MemorySnapshot, SwapSlot};

/// Mode applied to freshly allocated swap files.
const SWAPFILE_MODE: u32 = 0o600;

/// Runs `free`, `swapon`, `df`, `fallocate`, `mkswap` and `swapoff`,
/// each bounded by a per-call deadline.
#[derive(Debug, Clone)]
pub struct CommandGateway {
    timeout: Duration,
}

impl CommandGateway {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run a command and return its stdout. The child is killed if the
    /// deadline passes.
    async fn run(&self, program: &str, args: &[&str]) -> Result<String, GatewayError> {
        let command = if args.is_empty() {
            program.to_string()
        } else {
            format!("{} {}", program, args.join(" "))
        };
        tracing::trace!(%command, "running");

        let child = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => return Err(GatewayError::Spawn { command, source }),
            Err(_) => {
                return Err(GatewayError::Timeout {
                    command,
                    timeout: self.timeout,
                })
            }
        };

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(GatewayError::CommandFailed {
                command,
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    async fn run_path(
        &self,
        program: &str,
        flags: &[&str],
        path: &Path,
    ) -> Result<String, GatewayError> {
        let path = path.to_string_lossy();
        let mut args: Vec<&str> = flags.to_vec();
        args.push(&path);
        self.run(program, &args).await
    }
}

/// Replace the kernel's SIZE for swap files with their length on disk.
///
/// The kernel reports usable pages only: a 1,000,000,000 byte file shows
/// up as 999,993,344 on 4 KiB pages. Devices, and files that can no
/// longer be stat'ed, keep the kernel figure.
async fn with_allocated_sizes(slots: &mut [SwapSlot]) {
    for slot in slots.iter_mut() {
        match tokio::fs::metadata(&slot.path).await {
            Ok(meta) if meta.is_file() => slot.size_bytes = meta.len(),
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(path = %slot.path.display(), "keeping kernel swap size: {e}");
            }
        }
    }
}

#[async_trait]
impl SystemResourceGateway for CommandGateway {
    async fn get_memory_snapshot(&self) -> Result<MemorySnapshot, GatewayError> {
        let out = self.run("free", &["-b"]).await?;
        parse::parse_free_bytes(&out).map_err(|detail| GatewayError::Parse {
            command: "free -b".into(),
            detail,
        })
    }

    async fn get_swap_slots(&self) -> Result<Vec<SwapSlot>, GatewayError> {
        let args = [
            "--show=NAME,TYPE,SIZE,USED,PRIO",
            "--bytes",
            "--noheadings",
            "--raw",
        ];
        let out = self.run("swapon", &args).await?;
        let mut slots = parse::parse_swapon_raw(&out).map_err(|detail| GatewayError::Parse {
            command: "swapon --show".into(),
            detail,
        })?;
        with_allocated_sizes(&mut slots).await;
        Ok(slots)
    }

    async fn get_free_space_bytes(&self, path: &Path) -> Result<u64, GatewayError> {
        let out = self.run_path("df", &["-B1", "--output=avail"], path).await?;
        parse::parse_df_avail(&out).map_err(|detail| GatewayError::Parse {
            command: format!("df {}", path.display()),
            detail,
        })
    }

    async fn allocate(&self, path: &Path, size_bytes: u64) -> Result<(), GatewayError> {
        let size = size_bytes.to_string();
        self.run_path("fallocate", &["-l", size.as_str()], path).await?;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(SWAPFILE_MODE)).await?;
        Ok(())
    }

    async fn format_swap(&self, path: &Path) -> Result<(), GatewayError> {
        self.run_path("mkswap", &[], path).await.map(|_| ())
    }

    async fn activate(&self, path: &Path) -> Result<(), GatewayError> {
        self.run_path("swapon", &[], path).await.map(|_| ())
    }

    async fn deactivate(&self, path: &Path) -> Result<(), GatewayError> {
        self.run_path("swapoff", &[], path).await.map(|_| ())
    }

    async fn delete(&self, path: &Path) -> Result<(), GatewayError> {
        let meta = tokio::fs::symlink_metadata(path).await?;
        if meta.is_dir() {
            tokio::fs::remove_dir_all(path).await?;
        } else {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }

    async fn list_directory(&self, path: &Path) -> Result<Vec<DirEntry>, GatewayError> {
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(path).await?;
        while let Some(entry) = dir.next_entry().await? {
            let is_dir = entry.file_type().await?.is_dir();
            entries.push(DirEntry {
                path: entry.path(),
                is_dir,
            });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }
}
