//! Concurrent index of resident resources.

use std::fmt;

use dashmap::DashMap;

/// One of the three persistent storage locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageTier {
    Internal,
    External,
    Embedded,
}

impl StorageTier {
    pub fn is_writable(self) -> bool {
        !matches!(self, StorageTier::Embedded)
    }
}

impl fmt::Display for StorageTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageTier::Internal => write!(f, "internal"),
            StorageTier::External => write!(f, "external"),
            StorageTier::Embedded => write!(f, "embedded"),
        }
    }
}

/// Index entry: where a resource lives and how big it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileDescriptor {
    pub tier: StorageTier,
    pub size_bytes: u64,
}

impl FileDescriptor {
    pub fn new(tier: StorageTier, size_bytes: u64) -> Self {
        Self { tier, size_bytes }
    }
}

/// Map of content id to [`FileDescriptor`].
///
/// Backed by a `DashMap` so workers, the coordinator and readers can update
/// and query it concurrently without an outer lock.
#[derive(Debug, Default)]
pub struct StorageTierIndex {
    entries: DashMap<String, FileDescriptor>,
}

impl StorageTierIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a resource, replacing any previous entry.
    pub fn insert(&self, content_id: impl Into<String>, descriptor: FileDescriptor) {
        self.entries.insert(content_id.into(), descriptor);
    }

    pub fn remove(&self, content_id: &str) -> Option<FileDescriptor> {
        self.entries.remove(content_id).map(|(_, d)| d)
    }

    pub fn get(&self, content_id: &str) -> Option<FileDescriptor> {
        self.entries.get(content_id).map(|entry| *entry)
    }

    pub fn contains(&self, content_id: &str) -> bool {
        self.entries.contains_key(content_id)
    }

    /// Content ids that contain `fragment`, sorted.
    pub fn names_containing(&self, fragment: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().contains(fragment))
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Every indexed content id, sorted.
    pub fn names(&self) -> Vec<String> {
        self.names_containing("")
    }

    /// Content ids stored in `tier`.
    pub fn names_in(&self, tier: StorageTier) -> Vec<String> {
        self.entries
            .iter()
            .filter(|entry| entry.value().tier == tier)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Sum of all indexed sizes.
    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|entry| entry.value().size_bytes).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
