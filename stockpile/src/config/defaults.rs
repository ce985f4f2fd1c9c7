//! Default values for every configuration setting.

use std::path::PathBuf;

pub use crate::coordinator::{
    DEFAULT_CHUNK_THRESHOLD, DEFAULT_LARGE_WORKERS, DEFAULT_SMALL_WORKERS,
};
pub use crate::drawable::DEFAULT_DRAWABLE_CAPACITY;
pub use crate::fetch::DEFAULT_TIMEOUT_SECS;
pub use crate::operation::DEFAULT_OPERATION_THREADS;
pub use crate::pool::DEFAULT_MIN_SLOTS;
pub use crate::storage::{DEFAULT_HIGH_WATERMARK, DEFAULT_LOW_WATERMARK};
pub use crate::task::MAX_RETRIES as DEFAULT_MAX_RETRIES;

use super::file::config_directory;

/// Seconds an external mount answer stays cached.
pub const DEFAULT_MOUNT_TTL_SECS: u64 = 20;

/// Seconds a free-space answer stays cached.
pub const DEFAULT_FREE_SPACE_TTL_SECS: u64 = 5;

/// Directory name used on the external store.
pub const DEFAULT_APP_DIR: &str = "stockpile";

/// Log file name inside the log directory.
pub const DEFAULT_LOG_FILE: &str = "stockpile.log";

/// Internal tier location (~/.stockpile/files).
pub fn default_internal_dir() -> PathBuf {
    config_directory().join("files")
}

/// Mount point of the removable store.
pub fn default_external_root() -> PathBuf {
    PathBuf::from("/media/external")
}

/// Log directory (~/.stockpile/logs).
pub fn default_log_dir() -> PathBuf {
    config_directory().join("logs")
}
