//! Runtime configuration for [`super::ResourceCoordinator`].

use std::time::Duration;

use crate::pool::DEFAULT_MIN_SLOTS;
use crate::storage::{SpacePolicy, StorageLayout, DEFAULT_FREE_SPACE_TTL, DEFAULT_MOUNT_TTL};
use crate::task::MAX_RETRIES;

/// Workers serving small files.
pub const DEFAULT_SMALL_WORKERS: usize = 8;

/// Workers serving large files.
pub const DEFAULT_LARGE_WORKERS: usize = 1;

/// Bytes held in memory before a large download is spooled to disk, and the
/// most a small download may grow to.
pub const DEFAULT_CHUNK_THRESHOLD: usize = 500_000;

/// Settings for a [`super::ResourceCoordinator`].
///
/// # Example
///
/// ```
/// use stockpile::{CoordinatorConfig, StorageLayout};
///
/// let layout = StorageLayout::new("/tmp/internal", "/media/sd", "stockpile");
/// let config = CoordinatorConfig::new(layout)
///     .with_workers(4, 1)
///     .with_max_retries(2);
/// assert_eq!(config.small_workers(), 4);
/// assert_eq!(config.chunk_threshold(), 500_000);
/// ```
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    layout: StorageLayout,
    small_workers: usize,
    large_workers: usize,
    max_retries: u32,
    chunk_threshold: usize,
    min_slots: usize,
    space_policy: SpacePolicy,
    mount_ttl: Duration,
    free_space_ttl: Duration,
}

impl CoordinatorConfig {
    /// Default settings over the given storage layout.
    pub fn new(layout: StorageLayout) -> Self {
        Self {
            layout,
            small_workers: DEFAULT_SMALL_WORKERS,
            large_workers: DEFAULT_LARGE_WORKERS,
            max_retries: MAX_RETRIES,
            chunk_threshold: DEFAULT_CHUNK_THRESHOLD,
            min_slots: DEFAULT_MIN_SLOTS,
            space_policy: SpacePolicy::default(),
            mount_ttl: DEFAULT_MOUNT_TTL,
            free_space_ttl: DEFAULT_FREE_SPACE_TTL,
        }
    }

    /// Set how many threads serve each lane. Each lane keeps at least one.
    pub fn with_workers(mut self, small: usize, large: usize) -> Self {
        self.small_workers = small.max(1);
        self.large_workers = large.max(1);
        self
    }

    /// Set the retry budget, capped at [`MAX_RETRIES`].
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries.min(MAX_RETRIES);
        self
    }

    pub fn with_chunk_threshold(mut self, bytes: usize) -> Self {
        self.chunk_threshold = bytes.max(1);
        self
    }

    /// Floor the memory pool shrinks back to when idle.
    pub fn with_min_slots(mut self, slots: usize) -> Self {
        self.min_slots = slots;
        self
    }

    pub fn with_space_policy(mut self, policy: SpacePolicy) -> Self {
        self.space_policy = policy;
        self
    }

    /// How long mount and free-space probe results are reused.
    pub fn with_probe_ttls(mut self, mount: Duration, free_space: Duration) -> Self {
        self.mount_ttl = mount;
        self.free_space_ttl = free_space;
        self
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn small_workers(&self) -> usize {
        self.small_workers
    }

    pub fn large_workers(&self) -> usize {
        self.large_workers
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn chunk_threshold(&self) -> usize {
        self.chunk_threshold
    }

    pub fn min_slots(&self) -> usize {
        self.min_slots
    }

    pub fn space_policy(&self) -> SpacePolicy {
        self.space_policy
    }

    pub fn mount_ttl(&self) -> Duration {
        self.mount_ttl
    }

    pub fn free_space_ttl(&self) -> Duration {
        self.free_space_ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> StorageLayout {
        StorageLayout::new("/tmp/a", "/tmp/b", "app")
    }

    #[test]
    fn test_config_defaults() {
        let config = CoordinatorConfig::new(layout());
        assert_eq!(config.small_workers(), 8);
        assert_eq!(config.large_workers(), 1);
        assert_eq!(config.max_retries(), 3);
        assert_eq!(config.min_slots(), 10);
        assert_eq!(config.mount_ttl(), Duration::from_secs(20));
        assert_eq!(config.free_space_ttl(), Duration::from_secs(5));
        assert_eq!(config.space_policy().low_watermark, 2 * 1024 * 1024);
    }

    #[test]
    fn test_config_clamps() {
        let config = CoordinatorConfig::new(layout())
            .with_workers(0, 0)
            .with_max_retries(10)
            .with_chunk_threshold(0);
        assert_eq!(config.small_workers(), 1);
        assert_eq!(config.large_workers(), 1);
        assert_eq!(config.max_retries(), MAX_RETRIES);
        assert_eq!(config.chunk_threshold(), 1);
    }
}
