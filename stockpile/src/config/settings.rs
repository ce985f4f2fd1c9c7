//! Settings structs, one per `[section]` of the INI file.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::defaults::*;
use crate::coordinator::{CoordinatorConfig, ResourceCoordinator};
use crate::drawable::{DrawableCache, DrawableLoader};
use crate::storage::{SpacePolicy, StorageLayout};
use crate::task::Crypter;

/// Complete configuration loaded from config.ini.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub storage: StorageSettings,
    pub download: DownloadSettings,
    pub memory: MemorySettings,
    pub probe: ProbeSettings,
    pub cache: CacheSettings,
    pub logging: LoggingSettings,
}

/// Where each tier lives.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// Internal (always present) tier directory
    pub internal_dir: PathBuf,
    /// Mount point of the removable store
    pub external_root: PathBuf,
    /// Directory created under the removable store's root
    pub app_dir: String,
    /// Read-only bundled assets, if any
    pub embedded_dir: Option<PathBuf>,
}

/// Download worker settings.
#[derive(Debug, Clone)]
pub struct DownloadSettings {
    pub small_workers: usize,
    pub large_workers: usize,
    pub max_retries: u32,
    /// Spool threshold for large files and size cap for small ones
    pub chunk_threshold: usize,
    /// HTTP timeout in seconds
    pub timeout: u64,
}

/// Memory pool and free-space watermarks.
#[derive(Debug, Clone)]
pub struct MemorySettings {
    pub min_slots: usize,
    pub low_watermark: u64,
    pub high_watermark: u64,
}

/// How long storage probe answers are reused.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub mount_ttl_secs: u64,
    pub free_space_ttl_secs: u64,
}

/// Decoded image cache.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub drawable_capacity: usize,
    pub operation_threads: usize,
}

/// Log output.
#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub directory: PathBuf,
    pub file: String,
    /// Mirror log output to stdout
    pub stdout: bool,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            storage: StorageSettings {
                internal_dir: default_internal_dir(),
                external_root: default_external_root(),
                app_dir: DEFAULT_APP_DIR.to_string(),
                embedded_dir: None,
            },
            download: DownloadSettings {
                small_workers: DEFAULT_SMALL_WORKERS,
                large_workers: DEFAULT_LARGE_WORKERS,
                max_retries: DEFAULT_MAX_RETRIES,
                chunk_threshold: DEFAULT_CHUNK_THRESHOLD,
                timeout: DEFAULT_TIMEOUT_SECS,
            },
            memory: MemorySettings {
                min_slots: DEFAULT_MIN_SLOTS,
                low_watermark: DEFAULT_LOW_WATERMARK,
                high_watermark: DEFAULT_HIGH_WATERMARK,
            },
            probe: ProbeSettings {
                mount_ttl_secs: DEFAULT_MOUNT_TTL_SECS,
                free_space_ttl_secs: DEFAULT_FREE_SPACE_TTL_SECS,
            },
            cache: CacheSettings {
                drawable_capacity: DEFAULT_DRAWABLE_CAPACITY,
                operation_threads: DEFAULT_OPERATION_THREADS,
            },
            logging: LoggingSettings {
                directory: default_log_dir(),
                file: DEFAULT_LOG_FILE.to_string(),
                stdout: false,
            },
        }
    }
}

impl ConfigFile {
    /// Storage layout described by the `[storage]` section.
    pub fn storage_layout(&self) -> StorageLayout {
        let layout = StorageLayout::new(
            &self.storage.internal_dir,
            &self.storage.external_root,
            &self.storage.app_dir,
        );
        match &self.storage.embedded_dir {
            Some(dir) => layout.with_embedded_dir(dir),
            None => layout,
        }
    }

    /// Runtime coordinator settings.
    pub fn to_coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig::new(self.storage_layout())
            .with_workers(self.download.small_workers, self.download.large_workers)
            .with_max_retries(self.download.max_retries)
            .with_chunk_threshold(self.download.chunk_threshold)
            .with_min_slots(self.memory.min_slots)
            .with_space_policy(SpacePolicy::new(
                self.memory.low_watermark,
                self.memory.high_watermark,
            ))
            .with_probe_ttls(
                Duration::from_secs(self.probe.mount_ttl_secs),
                Duration::from_secs(self.probe.free_space_ttl_secs),
            )
    }

    /// Image loader sized by the `[cache]` section, reading through
    /// `coordinator`.
    pub fn drawable_loader(
        &self,
        coordinator: Arc<ResourceCoordinator>,
        crypter: Option<Crypter>,
    ) -> io::Result<DrawableLoader> {
        DrawableLoader::new(
            coordinator,
            Arc::new(DrawableCache::new(self.cache.drawable_capacity)),
            crypter,
            self.cache.operation_threads,
        )
    }
}
