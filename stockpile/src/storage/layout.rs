//! Directory layout of the three storage tiers.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::index::{FileDescriptor, StorageTier, StorageTierIndex};
use crate::error::StorageError;

/// Prefix of temporary large-file segments.
pub const TEMP_PREFIX: &str = "temp_";

/// Directory under the internal tier holding large-file segments.
///
/// Content ids may not start with a dot, so nothing stored can collide
/// with it.
pub const SEGMENT_DIR: &str = ".segments";

/// Prefix of the staging copy written next to a resource being relocated.
pub const STAGING_PREFIX: &str = ".relocate_";

/// Check that `content_id` names a single plain file inside a tier.
///
/// Rejects empty ids, ids containing a path separator or NUL, and ids
/// starting with a dot (which covers `.`, `..` and [`SEGMENT_DIR`]).
pub fn validate_content_id(content_id: &str) -> Result<(), StorageError> {
    let reason = if content_id.is_empty() {
        "empty"
    } else if content_id.contains(['/', '\\']) {
        "contains a path separator"
    } else if content_id.contains('\0') {
        "contains NUL"
    } else if content_id.starts_with('.') {
        "starts with a dot"
    } else {
        return Ok(());
    };
    Err(StorageError::InvalidId {
        content_id: content_id.to_string(),
        reason,
    })
}

/// Where each tier lives on disk.
///
/// ```text
/// internal/<content_id>
/// <external_root>/<app_dir>/<content_id>
/// embedded/<content_id>                  (read-only)
/// internal/.segments/temp_<content_id>   (large-file segment)
/// ```
#[derive(Debug, Clone)]
pub struct StorageLayout {
    internal_dir: PathBuf,
    external_root: PathBuf,
    app_dir: String,
    embedded_dir: Option<PathBuf>,
}

impl StorageLayout {
    pub fn new(
        internal_dir: impl Into<PathBuf>,
        external_root: impl Into<PathBuf>,
        app_dir: impl Into<String>,
    ) -> Self {
        Self {
            internal_dir: internal_dir.into(),
            external_root: external_root.into(),
            app_dir: app_dir.into(),
            embedded_dir: None,
        }
    }

    /// Attach a read-only directory of bundled assets.
    pub fn with_embedded_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.embedded_dir = Some(dir.into());
        self
    }

    pub fn internal_dir(&self) -> &Path {
        &self.internal_dir
    }

    /// Mount point of the removable store.
    pub fn external_root(&self) -> &Path {
        &self.external_root
    }

    /// Application-scoped cache directory on the removable store.
    pub fn external_dir(&self) -> PathBuf {
        self.external_root.join(&self.app_dir)
    }

    pub fn embedded_dir(&self) -> Option<&Path> {
        self.embedded_dir.as_deref()
    }

    /// Directory backing `tier`, if the tier is configured.
    pub fn tier_dir(&self, tier: StorageTier) -> Option<PathBuf> {
        match tier {
            StorageTier::Internal => Some(self.internal_dir.clone()),
            StorageTier::External => Some(self.external_dir()),
            StorageTier::Embedded => self.embedded_dir.clone(),
        }
    }

    /// Full path of `content_id` in `tier`.
    pub fn path(&self, tier: StorageTier, content_id: &str) -> Option<PathBuf> {
        self.tier_dir(tier).map(|dir| dir.join(content_id))
    }

    /// Directory holding large-file segments.
    pub fn segment_dir(&self) -> PathBuf {
        self.internal_dir.join(SEGMENT_DIR)
    }

    /// Path of the temporary segment used while a large file downloads.
    pub fn temp_path(&self, content_id: &str) -> PathBuf {
        self.segment_dir().join(format!("{}{}", TEMP_PREFIX, content_id))
    }

    /// Create the writable directories that should exist.
    pub fn ensure_dirs(&self, external_mounted: bool) -> io::Result<()> {
        fs::create_dir_all(&self.internal_dir)?;
        if external_mounted {
            fs::create_dir_all(self.external_dir())?;
        }
        Ok(())
    }

    /// Enumerate every tier into `index`.
    ///
    /// Tiers are scanned embedded first and internal last, so a resource
    /// present in several tiers is indexed at the writable, faster one.
    /// Leftover temporary segments from an interrupted session are deleted.
    pub fn scan_into(&self, index: &StorageTierIndex, external_mounted: bool) -> io::Result<usize> {
        self.remove_stale_segments();
        let mut found = 0;
        if let Some(dir) = &self.embedded_dir {
            found += scan_dir(dir, StorageTier::Embedded, index)?;
        }
        if external_mounted {
            found += scan_dir(&self.external_dir(), StorageTier::External, index)?;
        }
        found += scan_dir(&self.internal_dir, StorageTier::Internal, index)?;
        Ok(found)
    }

    fn remove_stale_segments(&self) {
        let dir = self.segment_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Failed to list segment directory");
                return;
            }
        };
        for entry in entries.flatten() {
            debug!(segment = %entry.path().display(), "Removing stale download segment");
            if let Err(e) = fs::remove_file(entry.path()) {
                warn!(segment = %entry.path().display(), error = %e, "Failed to remove stale segment");
            }
        }
    }
}

fn scan_dir(dir: &Path, tier: StorageTier, index: &StorageTierIndex) -> io::Result<usize> {
    if !dir.is_dir() {
        return Ok(0);
    }

    let mut found = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        if name.starts_with(STAGING_PREFIX) && tier.is_writable() {
            debug!(file = %name, "Removing interrupted relocation copy");
            if let Err(e) = fs::remove_file(entry.path()) {
                warn!(file = %name, error = %e, "Failed to remove relocation copy");
            }
            continue;
        }
        if validate_content_id(&name).is_err() {
            debug!(file = %name, "Ignoring file that is not a resource");
            continue;
        }

        index.insert(name, FileDescriptor::new(tier, metadata.len()));
        found += 1;
    }
    debug!(tier = %tier, found, dir = %dir.display(), "Scanned storage tier");
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn layout(root: &Path) -> StorageLayout {
        StorageLayout::new(root.join("internal"), root.join("sdcard"), "stockpile")
            .with_embedded_dir(root.join("embedded"))
    }

    #[test]
    fn test_layout_paths() {
        let layout = StorageLayout::new("/data/internal", "/mnt/sd", "app");

        assert_eq!(
            layout.path(StorageTier::Internal, "abc"),
            Some(PathBuf::from("/data/internal/abc"))
        );
        assert_eq!(
            layout.path(StorageTier::External, "abc"),
            Some(PathBuf::from("/mnt/sd/app/abc"))
        );
        assert_eq!(layout.path(StorageTier::Embedded, "abc"), None);
        assert_eq!(
            layout.temp_path("abc"),
            PathBuf::from("/data/internal/.segments/temp_abc")
        );
    }

    #[test]
    fn test_scan_indexes_all_tiers() {
        let temp = TempDir::new().unwrap();
        let layout = layout(temp.path());
        layout.ensure_dirs(true).unwrap();
        fs::create_dir_all(layout.embedded_dir().unwrap()).unwrap();

        fs::write(layout.internal_dir().join("a"), b"1234").unwrap();
        fs::write(layout.external_dir().join("b"), b"12").unwrap();
        fs::write(layout.embedded_dir().unwrap().join("c"), b"1").unwrap();

        let index = StorageTierIndex::new();
        assert_eq!(layout.scan_into(&index, true).unwrap(), 3);

        assert_eq!(index.get("a"), Some(FileDescriptor::new(StorageTier::Internal, 4)));
        assert_eq!(index.get("b"), Some(FileDescriptor::new(StorageTier::External, 2)));
        assert_eq!(index.get("c"), Some(FileDescriptor::new(StorageTier::Embedded, 1)));
    }

    #[test]
    fn test_scan_skips_unmounted_external() {
        let temp = TempDir::new().unwrap();
        let layout = layout(temp.path());
        layout.ensure_dirs(true).unwrap();
        fs::write(layout.external_dir().join("b"), b"12").unwrap();

        let index = StorageTierIndex::new();
        layout.scan_into(&index, false).unwrap();
        assert!(!index.contains("b"));
    }

    #[test]
    fn test_scan_removes_stale_segments() {
        let temp = TempDir::new().unwrap();
        let layout = layout(temp.path());
        layout.ensure_dirs(false).unwrap();
        let segment = layout.temp_path("big");
        fs::create_dir_all(layout.segment_dir()).unwrap();
        fs::write(&segment, b"partial").unwrap();

        let index = StorageTierIndex::new();
        layout.scan_into(&index, false).unwrap();

        assert!(index.is_empty());
        assert!(!segment.exists());
    }

    #[test]
    fn test_scan_keeps_resources_named_like_segments() {
        let temp = TempDir::new().unwrap();
        let layout = layout(temp.path());
        layout.ensure_dirs(false).unwrap();
        fs::write(layout.internal_dir().join("temp_report"), b"keep me").unwrap();

        let index = StorageTierIndex::new();
        layout.scan_into(&index, false).unwrap();

        assert_eq!(
            index.get("temp_report"),
            Some(FileDescriptor::new(StorageTier::Internal, 7))
        );
        assert!(layout.internal_dir().join("temp_report").exists());
    }

    #[test]
    fn test_scan_removes_interrupted_relocations() {
        let temp = TempDir::new().unwrap();
        let layout = layout(temp.path());
        layout.ensure_dirs(true).unwrap();
        let staging = layout.external_dir().join(format!("{}a", STAGING_PREFIX));
        fs::write(&staging, b"half").unwrap();

        let index = StorageTierIndex::new();
        assert_eq!(layout.scan_into(&index, true).unwrap(), 0);
        assert!(!staging.exists());
    }

    #[test]
    fn test_validate_content_id() {
        for good in ["abc", "temp_x", "a..b", "photo.png", "with space"] {
            assert!(validate_content_id(good).is_ok(), "{good}");
        }
        for bad in ["", ".", "..", "../up", "a/b", "a\\b", "nul\0", ".segments", ".hidden"] {
            assert!(
                matches!(validate_content_id(bad), Err(StorageError::InvalidId { .. })),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn test_internal_wins_over_embedded() {
        let temp = TempDir::new().unwrap();
        let layout = layout(temp.path());
        layout.ensure_dirs(false).unwrap();
        fs::create_dir_all(layout.embedded_dir().unwrap()).unwrap();
        fs::write(layout.embedded_dir().unwrap().join("x"), b"old").unwrap();
        fs::write(layout.internal_dir().join("x"), b"newer").unwrap();

        let index = StorageTierIndex::new();
        layout.scan_into(&index, false).unwrap();
        assert_eq!(index.get("x").unwrap().tier, StorageTier::Internal);
    }
}
