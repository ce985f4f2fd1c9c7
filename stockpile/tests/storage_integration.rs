//! Integration tests for the tiered store behind the coordinator.
//!
//! Covers startup enumeration of all three tiers, stale segment cleanup,
//! persistence across restarts, local writes and deletes, relocation between
//! tiers, and recovery from files removed behind the index's back.
//!
//! Run with: `cargo test --test storage_integration`

use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;

use stockpile::storage::{FixedProbe, StorageProbe, SEGMENT_DIR};
use stockpile::{
    CoordinatorConfig, Crypter, DownloadRequest, Fetcher, Listener, MockFetcher, Recode,
    ResourceCoordinator, ResourceDescriptor, StorageError, StorageLayout, StorageTier, SLOT_SIZE,
};

// ============================================================================
// Test Helpers
// ============================================================================

const MB: u64 = 1024 * 1024;

fn layout(root: &Path) -> StorageLayout {
    StorageLayout::new(root.join("internal"), root.join("sd"), "app")
        .with_embedded_dir(root.join("assets"))
}

fn coordinator(root: &Path, probe: Arc<FixedProbe>) -> ResourceCoordinator {
    let config = CoordinatorConfig::new(layout(root))
        .with_workers(1, 1)
        .with_probe_ttls(std::time::Duration::ZERO, std::time::Duration::ZERO);
    ResourceCoordinator::new(
        config,
        Arc::new(MockFetcher::new()) as Arc<dyn Fetcher>,
        probe as Arc<dyn StorageProbe>,
    )
    .unwrap()
}

fn write(path: &Path, data: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, data).unwrap();
}

/// Populate every tier the way a previous session would have left it.
fn seed(root: &Path) {
    write(&root.join("assets").join("logo"), b"embedded logo");
    write(&root.join("assets").join("shared"), b"embedded copy");
    write(&root.join("sd").join("app").join("album"), &[7u8; 2048]);
    write(&root.join("sd").join("app").join("shared"), b"external copy");
    write(&root.join("internal").join("shared"), b"internal copy");
    write(&root.join("internal").join("notes"), b"notes");
    write(
        &root.join("internal").join(SEGMENT_DIR).join("temp_half"),
        b"partial download",
    );
}

// ============================================================================
// Startup scan
// ============================================================================

#[test]
fn test_startup_indexes_all_tiers() {
    let temp = TempDir::new().unwrap();
    seed(temp.path());
    let probe = Arc::new(FixedProbe::new(true, u64::MAX, u64::MAX));

    let coordinator = coordinator(temp.path(), probe);

    assert_eq!(coordinator.all_names().len(), 4);
    assert_eq!(
        coordinator.location("logo").map(|l| l.tier),
        Some(StorageTier::Embedded)
    );
    assert_eq!(
        coordinator.location("album").map(|l| l.tier),
        Some(StorageTier::External)
    );
    assert_eq!(coordinator.file_size("album"), Some(2048));
    assert_eq!(
        coordinator.location("notes").map(|l| l.tier),
        Some(StorageTier::Internal)
    );
    assert_eq!(
        coordinator.total_size(),
        ("embedded logo".len() + 2048 + "internal copy".len() + "notes".len()) as u64
    );
}

#[test]
fn test_internal_copy_wins_over_other_tiers() {
    let temp = TempDir::new().unwrap();
    seed(temp.path());
    let probe = Arc::new(FixedProbe::new(true, u64::MAX, u64::MAX));

    let coordinator = coordinator(temp.path(), probe);

    assert_eq!(
        coordinator.location("shared").map(|l| l.tier),
        Some(StorageTier::Internal)
    );
    assert_eq!(coordinator.read_bytes("shared").unwrap(), b"internal copy");
}

#[test]
fn test_stale_segments_are_removed_at_startup() {
    let temp = TempDir::new().unwrap();
    seed(temp.path());

    let coordinator = coordinator(temp.path(), Arc::new(FixedProbe::roomy()));

    assert!(!coordinator.is_available("temp_half"));
    assert!(!temp
        .path()
        .join("internal")
        .join(SEGMENT_DIR)
        .join("temp_half")
        .exists());
}

#[test]
fn test_resources_survive_restart() {
    let temp = TempDir::new().unwrap();
    let probe = Arc::new(FixedProbe::new(true, u64::MAX, u64::MAX));
    {
        let coordinator = coordinator(temp.path(), Arc::clone(&probe));
        coordinator.store_bytes("temp_report", b"quarterly").unwrap();
        coordinator.store_bytes("plain", b"plain").unwrap();
    }

    let coordinator = coordinator(temp.path(), probe);

    assert_eq!(coordinator.read_bytes("temp_report").unwrap(), b"quarterly");
    assert_eq!(coordinator.read_bytes("plain").unwrap(), b"plain");
    assert_eq!(coordinator.all_names().len(), 2);
}

#[test]
fn test_unmounted_external_is_not_scanned() {
    let temp = TempDir::new().unwrap();
    seed(temp.path());

    let coordinator = coordinator(temp.path(), Arc::new(FixedProbe::roomy()));

    assert!(!coordinator.is_available("album"));
    assert!(coordinator.names_containing("alb").is_empty());
}

// ============================================================================
// Queries
// ============================================================================

#[test]
fn test_names_containing_is_sorted() {
    let temp = TempDir::new().unwrap();
    let coordinator = coordinator(temp.path(), Arc::new(FixedProbe::roomy()));
    for name in ["track-3", "track-1", "cover", "track-2"] {
        coordinator.store_bytes(name, name.as_bytes()).unwrap();
    }

    assert_eq!(
        coordinator.names_containing("track"),
        vec!["track-1", "track-2", "track-3"]
    );
}

// ============================================================================
// Writes and deletes
// ============================================================================

#[test]
fn test_store_bytes_follows_placement_policy() {
    let temp = TempDir::new().unwrap();
    let probe = Arc::new(FixedProbe::new(true, u64::MAX, u64::MAX));
    let coordinator = coordinator(temp.path(), Arc::clone(&probe));

    let roomy = coordinator.store_bytes("first", b"1").unwrap();
    probe.set_free_space(StorageTier::Internal, 10 * MB);
    let crowded = coordinator.store_bytes("second", b"2").unwrap();

    assert_eq!(roomy.tier, StorageTier::Internal);
    assert_eq!(crowded.tier, StorageTier::External);
    assert!(temp.path().join("sd").join("app").join("second").exists());

    probe.set_mounted(false);
    probe.set_free_space(StorageTier::Internal, MB);
    assert!(matches!(
        coordinator.store_bytes("third", b"3"),
        Err(StorageError::OutOfSpace)
    ));
}

#[test]
fn test_delete_removes_file_and_entry() {
    let temp = TempDir::new().unwrap();
    let coordinator = coordinator(temp.path(), Arc::new(FixedProbe::roomy()));
    coordinator.store_bytes("gone", b"bye").unwrap();
    let path = coordinator.resolve_path("gone").unwrap();

    assert!(coordinator.delete("gone").unwrap());
    assert!(!path.exists());
    assert!(!coordinator.is_available("gone"));
    assert!(!coordinator.delete("gone").unwrap());
}

#[test]
fn test_embedded_resources_are_read_only() {
    let temp = TempDir::new().unwrap();
    seed(temp.path());
    let coordinator = coordinator(temp.path(), Arc::new(FixedProbe::roomy()));

    assert!(matches!(
        coordinator.delete("logo"),
        Err(StorageError::ReadOnlyTier(StorageTier::Embedded))
    ));
    assert_eq!(coordinator.read_bytes("logo").unwrap(), b"embedded logo");

    // Already resident, so never downloaded.
    let (listener, _events) = Listener::channel();
    assert!(!coordinator.submit(
        DownloadRequest::new(ResourceDescriptor::new("http://mock.test/logo", "logo"))
            .listener(&listener)
    ));
}

#[test]
fn test_delete_many_and_delete_all_spare_embedded() {
    let temp = TempDir::new().unwrap();
    seed(temp.path());
    let probe = Arc::new(FixedProbe::new(true, u64::MAX, u64::MAX));
    let coordinator = coordinator(temp.path(), probe);

    assert_eq!(coordinator.delete_many(["notes", "missing"]).unwrap(), 1);
    let removed = coordinator.delete_all().unwrap();

    assert_eq!(removed, 2); // album, shared
    assert_eq!(coordinator.all_names(), vec!["logo".to_string()]);
    assert!(temp.path().join("assets").join("shared").exists());
}

#[test]
fn test_vanished_file_drops_index_entry() {
    let temp = TempDir::new().unwrap();
    let coordinator = coordinator(temp.path(), Arc::new(FixedProbe::roomy()));
    coordinator.store_bytes("ghost", b"boo").unwrap();
    fs::remove_file(coordinator.resolve_path("ghost").unwrap()).unwrap();

    assert!(matches!(
        coordinator.read_bytes("ghost"),
        Err(StorageError::NotFound(_))
    ));
    assert!(!coordinator.is_available("ghost"));
}

#[test]
fn test_open_streams_stored_bytes() {
    use std::io::Read;

    let temp = TempDir::new().unwrap();
    let coordinator = coordinator(temp.path(), Arc::new(FixedProbe::roomy()));
    coordinator.store_bytes("stream", b"streamed bytes").unwrap();

    let mut contents = String::new();
    coordinator
        .open("stream")
        .unwrap()
        .read_to_string(&mut contents)
        .unwrap();
    assert_eq!(contents, "streamed bytes");
    assert!(matches!(
        coordinator.open("absent"),
        Err(StorageError::NotFound(_))
    ));
}

#[test]
fn test_read_decrypted_reverses_part_encryption() {
    let temp = TempDir::new().unwrap();
    let coordinator = coordinator(temp.path(), Arc::new(FixedProbe::roomy()));
    let crypter = Crypter::xor(b"key".to_vec());
    let plain: Vec<u8> = (0..(SLOT_SIZE * 2 + 17)).map(|i| (i % 97) as u8).collect();
    let mut sealed = plain.clone();
    for (part, chunk) in sealed.chunks_mut(SLOT_SIZE).enumerate() {
        crypter.encrypt(part, chunk);
    }
    coordinator.store_bytes("sealed", &sealed).unwrap();

    assert_eq!(coordinator.read_decrypted("sealed", &crypter).unwrap(), plain);
}

// ============================================================================
// Relocation
// ============================================================================

#[test]
fn test_relocate_moves_between_tiers_with_progress() {
    let temp = TempDir::new().unwrap();
    let probe = Arc::new(FixedProbe::new(true, u64::MAX, u64::MAX));
    let coordinator = coordinator(temp.path(), probe);
    let data: Vec<u8> = (0..(SLOT_SIZE * 3 + 5)).map(|i| (i % 211) as u8).collect();
    coordinator.store_bytes("track", &data).unwrap();
    let internal = coordinator.resolve_path("track").unwrap();
    let progress = RefCell::new(Vec::new());

    let moved = coordinator
        .relocate(
            "track",
            StorageTier::External,
            Recode::Keep,
            Some(&|copied: u64, total: u64| progress.borrow_mut().push((copied, total))),
        )
        .unwrap();

    assert_eq!(moved.tier, StorageTier::External);
    assert_eq!(moved.size_bytes, data.len() as u64);
    assert!(!internal.exists());
    assert!(temp.path().join("sd").join("app").join("track").exists());
    assert_eq!(coordinator.read_bytes("track").unwrap(), data);

    let total = data.len() as u64;
    assert_eq!(
        progress.into_inner(),
        vec![
            (SLOT_SIZE as u64, total),
            (2 * SLOT_SIZE as u64, total),
            (3 * SLOT_SIZE as u64, total),
            (total, total),
        ]
    );
}

#[test]
fn test_relocate_encrypts_and_decrypts_by_part() {
    let temp = TempDir::new().unwrap();
    let probe = Arc::new(FixedProbe::new(true, u64::MAX, u64::MAX));
    let coordinator = coordinator(temp.path(), probe);
    let crypter = Crypter::xor(b"relocation".to_vec());
    let plain: Vec<u8> = (0..(SLOT_SIZE * 2 + 99)).map(|i| (i % 89) as u8).collect();
    coordinator.store_bytes("doc", &plain).unwrap();

    coordinator
        .relocate("doc", StorageTier::External, Recode::Encrypt(&crypter), None)
        .unwrap();
    assert_ne!(coordinator.read_bytes("doc").unwrap(), plain);
    assert_eq!(coordinator.read_decrypted("doc", &crypter).unwrap(), plain);

    // Same tier: rewritten in place.
    coordinator
        .relocate("doc", StorageTier::External, Recode::Decrypt(&crypter), None)
        .unwrap();
    assert_eq!(coordinator.read_bytes("doc").unwrap(), plain);
    let leftovers: Vec<_> = fs::read_dir(temp.path().join("sd").join("app"))
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(leftovers, vec!["doc".to_string()]);
}

#[test]
fn test_relocate_copies_embedded_assets_out() {
    let temp = TempDir::new().unwrap();
    seed(temp.path());
    let coordinator = coordinator(temp.path(), Arc::new(FixedProbe::roomy()));

    let copied = coordinator
        .relocate("logo", StorageTier::Internal, Recode::Keep, None)
        .unwrap();

    assert_eq!(copied.tier, StorageTier::Internal);
    assert!(temp.path().join("assets").join("logo").exists());
    assert_eq!(coordinator.read_bytes("logo").unwrap(), b"embedded logo");
}

#[test]
fn test_relocate_rejects_unusable_targets() {
    let temp = TempDir::new().unwrap();
    let probe = Arc::new(FixedProbe::roomy());
    let coordinator = coordinator(temp.path(), Arc::clone(&probe));
    coordinator.store_bytes("stay", b"here").unwrap();

    assert!(matches!(
        coordinator.relocate("stay", StorageTier::External, Recode::Keep, None),
        Err(StorageError::Unavailable(StorageTier::External))
    ));
    assert!(matches!(
        coordinator.relocate("stay", StorageTier::Embedded, Recode::Keep, None),
        Err(StorageError::ReadOnlyTier(StorageTier::Embedded))
    ));
    assert!(matches!(
        coordinator.relocate("absent", StorageTier::Internal, Recode::Keep, None),
        Err(StorageError::NotFound(_))
    ));
    assert!(matches!(
        coordinator.relocate("../stay", StorageTier::Internal, Recode::Keep, None),
        Err(StorageError::InvalidId { .. })
    ));
    assert_eq!(coordinator.read_bytes("stay").unwrap(), b"here");
}
