//! Mount and free-space probes.
//!
//! Both questions cost a syscall, and downloads ask them on every submit and
//! every persist. [`CachedProbe`] memoizes answers for a bounded time: the
//! mount state for [`DEFAULT_MOUNT_TTL`] and free space for
//! [`DEFAULT_FREE_SPACE_TTL`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::trace;

use super::index::StorageTier;
use super::layout::StorageLayout;

/// How long a mount check stays valid.
pub const DEFAULT_MOUNT_TTL: Duration = Duration::from_secs(20);

/// How long a free-space reading stays valid.
pub const DEFAULT_FREE_SPACE_TTL: Duration = Duration::from_secs(5);

/// Environment queries the coordinator needs about its tiers.
pub trait StorageProbe: Send + Sync {
    /// Whether the removable store is currently usable.
    fn is_external_mounted(&self) -> bool;

    /// Free bytes on `tier`, or `None` when it cannot be determined.
    fn free_space(&self, tier: StorageTier) -> Option<u64>;
}

// =============================================================================
// FsProbe
// =============================================================================

/// Probe backed by the real filesystem.
///
/// The removable store counts as mounted when its root is an existing
/// directory. Free space comes from `statvfs` (or the platform equivalent).
#[derive(Debug, Clone)]
pub struct FsProbe {
    internal_dir: PathBuf,
    external_root: PathBuf,
}

impl FsProbe {
    pub fn new(layout: &StorageLayout) -> Self {
        Self {
            internal_dir: layout.internal_dir().to_path_buf(),
            external_root: layout.external_root().to_path_buf(),
        }
    }
}

impl StorageProbe for FsProbe {
    fn is_external_mounted(&self) -> bool {
        self.external_root.is_dir()
    }

    fn free_space(&self, tier: StorageTier) -> Option<u64> {
        let path = match tier {
            StorageTier::Internal => &self.internal_dir,
            StorageTier::External => &self.external_root,
            StorageTier::Embedded => return Some(0),
        };
        fs2::available_space(path).ok()
    }
}

// =============================================================================
// CachedProbe
// =============================================================================

/// Wraps another probe and memoizes its answers.
pub struct CachedProbe {
    inner: Arc<dyn StorageProbe>,
    mount_ttl: Duration,
    free_space_ttl: Duration,
    mounted: Mutex<Option<(Instant, bool)>>,
    free: Mutex<HashMap<StorageTier, (Instant, Option<u64>)>>,
}

impl CachedProbe {
    pub fn new(inner: Arc<dyn StorageProbe>, mount_ttl: Duration, free_space_ttl: Duration) -> Self {
        Self {
            inner,
            mount_ttl,
            free_space_ttl,
            mounted: Mutex::new(None),
            free: Mutex::new(HashMap::new()),
        }
    }

    /// Forget every cached answer.
    pub fn invalidate(&self) {
        *self.mounted.lock().unwrap() = None;
        self.free.lock().unwrap().clear();
    }
}

impl StorageProbe for CachedProbe {
    fn is_external_mounted(&self) -> bool {
        let mut cached = self.mounted.lock().unwrap();
        if let Some((at, value)) = *cached {
            if at.elapsed() < self.mount_ttl {
                return value;
            }
        }
        let value = self.inner.is_external_mounted();
        trace!(mounted = value, "Refreshed removable store mount state");
        *cached = Some((Instant::now(), value));
        value
    }

    fn free_space(&self, tier: StorageTier) -> Option<u64> {
        let mut cached = self.free.lock().unwrap();
        if let Some((at, value)) = cached.get(&tier) {
            if at.elapsed() < self.free_space_ttl {
                return *value;
            }
        }
        let value = self.inner.free_space(tier);
        trace!(tier = %tier, free = ?value, "Refreshed free space");
        cached.insert(tier, (Instant::now(), value));
        value
    }
}

// =============================================================================
// FixedProbe
// =============================================================================

/// Probe with settable answers, for hosts that track storage themselves and
/// for tests.
#[derive(Debug)]
pub struct FixedProbe {
    mounted: AtomicBool,
    internal_free: AtomicU64,
    external_free: AtomicU64,
}

impl FixedProbe {
    pub fn new(mounted: bool, internal_free: u64, external_free: u64) -> Self {
        Self {
            mounted: AtomicBool::new(mounted),
            internal_free: AtomicU64::new(internal_free),
            external_free: AtomicU64::new(external_free),
        }
    }

    /// Plenty of internal space and no removable store.
    pub fn roomy() -> Self {
        Self::new(false, u64::MAX, 0)
    }

    pub fn set_mounted(&self, mounted: bool) {
        self.mounted.store(mounted, Ordering::SeqCst);
    }

    pub fn set_free_space(&self, tier: StorageTier, bytes: u64) {
        match tier {
            StorageTier::Internal => self.internal_free.store(bytes, Ordering::SeqCst),
            StorageTier::External => self.external_free.store(bytes, Ordering::SeqCst),
            StorageTier::Embedded => {}
        }
    }
}

impl StorageProbe for FixedProbe {
    fn is_external_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    fn free_space(&self, tier: StorageTier) -> Option<u64> {
        match tier {
            StorageTier::Internal => Some(self.internal_free.load(Ordering::SeqCst)),
            StorageTier::External => Some(self.external_free.load(Ordering::SeqCst)),
            StorageTier::Embedded => Some(0),
        }
    }
}
