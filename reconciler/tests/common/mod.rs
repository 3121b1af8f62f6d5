//! In-memory host used by the integration tests.
//!
//! Models the storage root, the kernel swap table and the memory figures.
//! Every mutating call is appended to a log so tests can assert ordering.
//!
//! Like a real kernel, the swap table holds the usable size of a swap
//! file (whole pages minus the header page). `get_swap_slots` then reports
//! the on-disk length for anything that is a file, as `CommandGateway` does.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use memswap_reconciler::gateway::{GatewayError, SystemResourceGateway};
use memswap_reconciler::types::{bytes_to_mb, DirEntry, MemStats, MemorySnapshot, SwapSlot, SwapStats};
use memswap_reconciler::{ReconcilerConfig, SwapReconciler, UNIT_SIZE_BYTES};

pub const ROOT: &str = "/swapFolder";
pub const MB: u64 = 1024 * 1024;
pub const PAGE_SIZE: u64 = 4096;

/// Size the kernel reports for a swap file of `allocated` bytes.
pub fn kernel_swap_size(allocated: u64) -> u64 {
    (allocated / PAGE_SIZE).saturating_sub(1) * PAGE_SIZE
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Allocate(PathBuf),
    Format(PathBuf),
    Activate(PathBuf),
    Deactivate(PathBuf),
    Delete(PathBuf),
}

#[derive(Debug, Clone)]
pub struct FakeFile {
    pub size: u64,
    pub is_dir: bool,
    pub formatted: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ActiveSwap {
    /// Usable size as the kernel reports it.
    pub size: u64,
    pub used: u64,
}

#[derive(Debug, Default)]
pub struct Failures {
    pub snapshot: bool,
    pub swap_table: bool,
    pub allocate: bool,
    pub format: bool,
    pub activate: HashSet<PathBuf>,
    pub deactivate: HashSet<PathBuf>,
    pub delete: HashSet<PathBuf>,
}

#[derive(Debug)]
pub struct FakeState {
    pub files: BTreeMap<PathBuf, FakeFile>,
    pub active: BTreeMap<PathBuf, ActiveSwap>,
    pub mem: MemStats,
    pub swap_override: Option<SwapStats>,
    pub free_disk: u64,
    pub calls: Vec<Call>,
    pub fail: Failures,
}

pub struct FakeGateway {
    state: Mutex<FakeState>,
    snapshot_delay: Mutex<Duration>,
    snapshot_calls: AtomicUsize,
}

pub fn root() -> PathBuf {
    PathBuf::from(ROOT)
}

pub fn slot_path(name: &str) -> PathBuf {
    root().join(name)
}

fn failed(command: String) -> GatewayError {
    GatewayError::CommandFailed {
        command,
        status: Some(1),
        stderr: "injected failure".into(),
    }
}

impl FakeGateway {
    /// Empty storage root, 4000 MB of free RAM, 100 GB of free disk.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                files: BTreeMap::new(),
                active: BTreeMap::new(),
                mem: MemStats {
                    total: 8000.0,
                    used: 4000.0,
                    free: 4000.0,
                    available: 4000.0,
                    ..Default::default()
                },
                swap_override: None,
                free_disk: 100_000_000_000,
                calls: Vec::new(),
                fail: Failures::default(),
            }),
            snapshot_delay: Mutex::new(Duration::ZERO),
            snapshot_calls: AtomicUsize::new(0),
        }
    }

    /// A canonical slot under the root, formatted and active.
    pub fn with_slot(self, name: &str, used_mb: u64) -> Self {
        self.with_active_file(slot_path(name), UNIT_SIZE_BYTES, used_mb * MB)
    }

    /// A formatted file that is also in the swap table.
    pub fn with_active_file(self, path: impl Into<PathBuf>, size: u64, used: u64) -> Self {
        let path = path.into();
        {
            let mut s = self.lock();
            s.files.insert(
                path.clone(),
                FakeFile {
                    size,
                    is_dir: false,
                    formatted: true,
                },
            );
            s.active.insert(
                path,
                ActiveSwap {
                    size: kernel_swap_size(size),
                    used,
                },
            );
        }
        self
    }

    /// Swap area that is not a file under the root (e.g. a partition).
    pub fn with_external_swap(self, path: impl Into<PathBuf>, size: u64, used: u64) -> Self {
        self.lock()
            .active
            .insert(path.into(), ActiveSwap { size, used });
        self
    }

    /// An inactive file.
    pub fn with_file(self, path: impl Into<PathBuf>, size: u64) -> Self {
        self.lock().files.insert(
            path.into(),
            FakeFile {
                size,
                is_dir: false,
                formatted: true,
            },
        );
        self
    }

    pub fn with_dir(self, path: impl Into<PathBuf>) -> Self {
        self.lock().files.insert(
            path.into(),
            FakeFile {
                size: 0,
                is_dir: true,
                formatted: false,
            },
        );
        self
    }

    pub fn with_mem_free(self, free_mb: f64) -> Self {
        self.lock().mem.free = free_mb;
        self
    }

    pub fn with_free_disk(self, bytes: u64) -> Self {
        self.lock().free_disk = bytes;
        self
    }

    pub fn with_snapshot_delay(self, delay: Duration) -> Self {
        *self.snapshot_delay.lock().unwrap() = delay;
        self
    }

    pub fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn snapshot_calls(&self) -> usize {
        self.snapshot_calls.load(Ordering::SeqCst)
    }

    pub fn is_active(&self, path: &Path) -> bool {
        self.lock().active.contains_key(path)
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.lock().files.contains_key(path)
    }

    /// Usable size the kernel holds for `path`.
    pub fn kernel_size(&self, path: &Path) -> Option<u64> {
        self.lock().active.get(path).map(|a| a.size)
    }

    pub fn active_paths(&self) -> Vec<PathBuf> {
        self.lock().active.keys().cloned().collect()
    }

    /// Position of `call` in the log.
    pub fn position(&self, call: &Call) -> Option<usize> {
        self.calls().iter().position(|c| c == call)
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }
}

#[async_trait]
impl SystemResourceGateway for FakeGateway {
    async fn get_memory_snapshot(&self) -> Result<MemorySnapshot, GatewayError> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.snapshot_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let s = self.lock();
        if s.fail.snapshot {
            return Err(failed("free -b".into()));
        }
        let swap = s.swap_override.unwrap_or_else(|| {
            let total: u64 = s.active.values().map(|a| a.size).sum();
            let used: u64 = s.active.values().map(|a| a.used).sum();
            SwapStats {
                total: bytes_to_mb(total),
                used: bytes_to_mb(used),
                free: bytes_to_mb(total.saturating_sub(used)),
            }
        });
        Ok(MemorySnapshot { mem: s.mem, swap })
    }

    async fn get_swap_slots(&self) -> Result<Vec<SwapSlot>, GatewayError> {
        let s = self.lock();
        if s.fail.swap_table {
            return Err(failed("swapon --show".into()));
        }
        Ok(s.active
            .iter()
            .map(|(path, a)| {
                let size = match s.files.get(path) {
                    Some(f) if !f.is_dir => f.size,
                    _ => a.size,
                };
                SwapSlot::active(path.clone(), size, a.used)
            })
            .collect())
    }

    async fn get_free_space_bytes(&self, _path: &Path) -> Result<u64, GatewayError> {
        Ok(self.lock().free_disk)
    }

    async fn allocate(&self, path: &Path, size_bytes: u64) -> Result<(), GatewayError> {
        let mut s = self.lock();
        s.calls.push(Call::Allocate(path.to_path_buf()));
        if s.fail.allocate {
            return Err(failed(format!("fallocate {}", path.display())));
        }
        s.free_disk = s.free_disk.saturating_sub(size_bytes);
        s.files.insert(
            path.to_path_buf(),
            FakeFile {
                size: size_bytes,
                is_dir: false,
                formatted: false,
            },
        );
        Ok(())
    }

    async fn format_swap(&self, path: &Path) -> Result<(), GatewayError> {
        let mut s = self.lock();
        s.calls.push(Call::Format(path.to_path_buf()));
        if s.fail.format {
            return Err(failed(format!("mkswap {}", path.display())));
        }
        match s.files.get_mut(path) {
            Some(f) if !f.is_dir => {
                f.formatted = true;
                Ok(())
            }
            _ => Err(failed(format!("mkswap {}", path.display()))),
        }
    }

    async fn activate(&self, path: &Path) -> Result<(), GatewayError> {
        let mut s = self.lock();
        s.calls.push(Call::Activate(path.to_path_buf()));
        if s.fail.activate.contains(path) {
            return Err(failed(format!("swapon {}", path.display())));
        }
        let size = match s.files.get(path) {
            Some(f) if f.formatted && !f.is_dir => kernel_swap_size(f.size),
            _ => return Err(failed(format!("swapon {}", path.display()))),
        };
        s.active
            .entry(path.to_path_buf())
            .or_insert(ActiveSwap { size, used: 0 });
        Ok(())
    }

    async fn deactivate(&self, path: &Path) -> Result<(), GatewayError> {
        let mut s = self.lock();
        s.calls.push(Call::Deactivate(path.to_path_buf()));
        if s.fail.deactivate.contains(path) {
            return Err(failed(format!("swapoff {}", path.display())));
        }
        match s.active.remove(path) {
            Some(_) => Ok(()),
            None => Err(failed(format!("swapoff {}", path.display()))),
        }
    }

    async fn delete(&self, path: &Path) -> Result<(), GatewayError> {
        let mut s = self.lock();
        s.calls.push(Call::Delete(path.to_path_buf()));
        if s.fail.delete.contains(path) {
            return Err(GatewayError::Io(std::io::Error::from(
                std::io::ErrorKind::PermissionDenied,
            )));
        }
        let doomed: Vec<PathBuf> = s
            .files
            .keys()
            .filter(|p| p.starts_with(path))
            .cloned()
            .collect();
        if doomed.is_empty() {
            return Err(GatewayError::Io(std::io::Error::from(
                std::io::ErrorKind::NotFound,
            )));
        }
        for p in doomed {
            if let Some(f) = s.files.remove(&p) {
                s.free_disk += f.size;
            }
        }
        Ok(())
    }

    async fn list_directory(&self, path: &Path) -> Result<Vec<DirEntry>, GatewayError> {
        let s = self.lock();
        Ok(s.files
            .iter()
            .filter(|(p, _)| p.parent() == Some(path))
            .map(|(p, f)| DirEntry {
                path: p.clone(),
                is_dir: f.is_dir,
            })
            .collect())
    }
}

/// Default config rooted at [`ROOT`] with a short tick.
pub fn config() -> ReconcilerConfig {
    ReconcilerConfig {
        storage_root: root(),
        tick_interval_ms: 20,
        ..Default::default()
    }
}

pub fn reconciler(gateway: FakeGateway) -> SwapReconciler<FakeGateway> {
    SwapReconciler::new(gateway, config())
}
