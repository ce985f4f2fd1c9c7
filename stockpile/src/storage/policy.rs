//! Free-space driven placement policy.

use super::index::StorageTier;
use super::probe::StorageProbe;

/// Below this much free internal space downloads are impossible unless a
/// removable store is mounted.
pub const DEFAULT_LOW_WATERMARK: u64 = 2 * 1024 * 1024;

/// Below this much free internal space new files go to the removable store
/// when one is mounted.
pub const DEFAULT_HIGH_WATERMARK: u64 = 100 * 1024 * 1024;

/// Low/high watermarks on the internal tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpacePolicy {
    pub low_watermark: u64,
    pub high_watermark: u64,
}

impl Default for SpacePolicy {
    fn default() -> Self {
        Self {
            low_watermark: DEFAULT_LOW_WATERMARK,
            high_watermark: DEFAULT_HIGH_WATERMARK,
        }
    }
}

impl SpacePolicy {
    pub fn new(low_watermark: u64, high_watermark: u64) -> Self {
        Self {
            low_watermark,
            high_watermark,
        }
    }

    /// Whether a new download could be stored anywhere.
    pub fn can_accept(&self, probe: &dyn StorageProbe) -> bool {
        internal_free(probe) >= self.low_watermark || probe.is_external_mounted()
    }

    /// Tier a new file should be written to, or `None` when no tier can
    /// take it.
    pub fn placement(&self, probe: &dyn StorageProbe) -> Option<StorageTier> {
        let free = internal_free(probe);
        let mounted = probe.is_external_mounted();

        if (free < self.high_watermark && mounted) || free < self.low_watermark {
            mounted.then_some(StorageTier::External)
        } else {
            Some(StorageTier::Internal)
        }
    }
}

// An unreadable internal tier is treated as unconstrained.
fn internal_free(probe: &dyn StorageProbe) -> u64 {
    probe.free_space(StorageTier::Internal).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FixedProbe;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn test_policy_plenty_of_space_stays_internal() {
        let policy = SpacePolicy::default();
        let probe = FixedProbe::new(true, 500 * MB, 500 * MB);

        assert!(policy.can_accept(&probe));
        assert_eq!(policy.placement(&probe), Some(StorageTier::Internal));
    }

    #[test]
    fn test_policy_below_high_steers_to_external() {
        let policy = SpacePolicy::default();
        let probe = FixedProbe::new(true, 50 * MB, 500 * MB);

        assert!(policy.can_accept(&probe));
        assert_eq!(policy.placement(&probe), Some(StorageTier::External));
    }

    #[test]
    fn test_policy_below_high_without_external_stays_internal() {
        let policy = SpacePolicy::default();
        let probe = FixedProbe::new(false, 50 * MB, 0);

        assert_eq!(policy.placement(&probe), Some(StorageTier::Internal));
    }

    #[test]
    fn test_policy_below_low_without_external_rejects() {
        let policy = SpacePolicy::default();
        let probe = FixedProbe::new(false, MB, 0);

        assert!(!policy.can_accept(&probe));
        assert_eq!(policy.placement(&probe), None);
    }

    #[test]
    fn test_policy_below_low_with_external() {
        let policy = SpacePolicy::default();
        let probe = FixedProbe::new(true, MB, 500 * MB);

        assert!(policy.can_accept(&probe));
        assert_eq!(policy.placement(&probe), Some(StorageTier::External));
    }
}
