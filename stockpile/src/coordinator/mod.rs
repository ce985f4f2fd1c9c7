//! The resource coordinator.
//!
//! [`ResourceCoordinator`] is the single entry point for acquiring resources.
//! It owns the two download queues, the worker threads, the memory pool and
//! the storage tier index. Callers submit [`DownloadRequest`]s and receive
//! results on their [`Listener`]'s channel.
//!
//! # Lifecycle
//!
//! Construction prepares the storage directories, enumerates every tier into
//! the index and starts the workers. Dropping the coordinator closes both
//! queues, abandons queued work and joins every worker; an in-flight download
//! stops at its next read.
//!
//! # Example
//!
//! ```no_run
//! use stockpile::{
//!     CoordinatorConfig, DownloadEvent, DownloadRequest, Listener, ResourceCoordinator,
//!     ResourceDescriptor, StorageLayout,
//! };
//!
//! let layout = StorageLayout::new("/var/lib/app/files", "/media/sdcard", "app-cache");
//! let coordinator = ResourceCoordinator::with_http(CoordinatorConfig::new(layout), 30)?;
//!
//! let (listener, events) = Listener::channel();
//! let descriptor = ResourceDescriptor::new("https://cdn.example.com/cover.png", "cover-42");
//! coordinator.submit(DownloadRequest::new(descriptor).listener(&listener));
//!
//! for event in events {
//!     match event {
//!         DownloadEvent::Succeeded(report) => println!("got {}", report.content_id()),
//!         DownloadEvent::Failed { report, error } => {
//!             eprintln!("{} failed: {}", report.content_id(), error)
//!         }
//!         DownloadEvent::AllFinished => break,
//!     }
//! }
//! # Ok::<(), stockpile::CoordinatorError>(())
//! ```

mod config;
mod registry;
mod relocate;
mod stats;

pub use config::{
    CoordinatorConfig, DEFAULT_CHUNK_THRESHOLD, DEFAULT_LARGE_WORKERS, DEFAULT_SMALL_WORKERS,
};
pub use relocate::Recode;
pub use stats::DownloadStats;

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, info, trace, warn};

use crate::error::{CoordinatorError, DownloadError, StorageError};
use crate::fetch::{Fetcher, SchemeFetcher};
use crate::listener::{DownloadEvent, Listener};
use crate::pool::{MemoryPool, SLOT_SIZE};
use crate::queue::PriorityQueue;
use crate::storage::{
    validate_content_id, CachedProbe, FileDescriptor, FsProbe, StorageLayout, StorageProbe,
    StorageTier, StorageTierIndex,
};
use crate::task::{Crypter, DownloadRequest, DownloadTask, ResourceDescriptor, TaskKind};
use crate::worker;
use registry::Registry;

/// Sent when a download could not be stored in any tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutOfMemory {
    pub content_id: String,
}

// =============================================================================
// Shared state
// =============================================================================

/// State shared between the coordinator handle and its workers.
pub(crate) struct Shared {
    config: CoordinatorConfig,
    pub(crate) index: StorageTierIndex,
    pub(crate) pool: MemoryPool,
    pub(crate) fetcher: Arc<dyn Fetcher>,
    small: PriorityQueue<DownloadTask>,
    large: PriorityQueue<DownloadTask>,
    probe: CachedProbe,
    registry: Mutex<Registry>,
    out_of_memory: Mutex<Option<Sender<OutOfMemory>>>,
    running: AtomicBool,
}

impl Shared {
    pub(crate) fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub(crate) fn layout(&self) -> &StorageLayout {
        self.config.layout()
    }

    pub(crate) fn queue(&self, kind: TaskKind) -> &PriorityQueue<DownloadTask> {
        match kind {
            TaskKind::Small => &self.small,
            TaskKind::Large => &self.large,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Index entry for a resource that can be read right now.
    pub(crate) fn resident(&self, content_id: &str) -> Option<FileDescriptor> {
        let location = self.index.get(content_id)?;
        if location.tier == StorageTier::External && !self.probe.is_external_mounted() {
            return None;
        }
        Some(location)
    }

    /// Tier a new file should go to under the current free-space policy.
    pub(crate) fn placement(&self) -> Result<StorageTier, StorageError> {
        self.config
            .space_policy()
            .placement(&self.probe)
            .ok_or(StorageError::OutOfSpace)
    }

    pub(crate) fn target_path(
        &self,
        tier: StorageTier,
        content_id: &str,
    ) -> Result<PathBuf, StorageError> {
        validate_content_id(content_id)?;
        self.layout()
            .path(tier, content_id)
            .ok_or(StorageError::Unavailable(tier))
    }

    /// Record a freshly downloaded resource.
    pub(crate) fn record_stored(&self, content_id: &str, location: FileDescriptor) {
        self.index.insert(content_id, location);
        self.registry
            .lock()
            .unwrap()
            .record_download(location.size_bytes);
    }

    /// Put a task back for another attempt.
    pub(crate) fn requeue(&self, task: DownloadTask) {
        let id = task.id();
        let priority = task.priority();
        if !self.queue(task.kind()).push(task, priority) {
            self.registry.lock().unwrap().retire(id);
        }
    }

    /// Report a terminated task and retire it.
    pub(crate) fn complete(&self, task: DownloadTask, result: Result<FileDescriptor, DownloadError>) {
        let listener = task.listener().cloned();
        match result {
            Ok(location) => {
                debug!(
                    content_id = task.content_id(),
                    tier = %location.tier,
                    size = location.size_bytes,
                    retries = task.retries(),
                    "Download complete"
                );
                if let Some(listener) = &listener {
                    listener.notify(DownloadEvent::Succeeded(task.report(Some(location))));
                }
            }
            Err(DownloadError::Cancelled) => {
                debug!(content_id = task.content_id(), "Download cancelled");
            }
            Err(error) => {
                warn!(
                    content_id = task.content_id(),
                    retries = task.retries(),
                    error = %error,
                    "Download failed"
                );
                self.registry.lock().unwrap().record_failure();
                if let Some(listener) = &listener {
                    listener.notify(DownloadEvent::Failed {
                        report: task.report(None),
                        error,
                    });
                }
            }
        }
        self.retire(task.id(), listener.as_ref());
    }

    /// Retire a task without reporting it.
    pub(crate) fn abandon(&self, task: DownloadTask) {
        trace!(content_id = task.content_id(), "Download abandoned");
        self.registry.lock().unwrap().retire(task.id());
    }

    fn retire(&self, id: u64, listener: Option<&Listener>) {
        let retired = self.registry.lock().unwrap().retire(id);
        if retired.listener_idle {
            if let Some(listener) = listener {
                listener.notify(DownloadEvent::AllFinished);
            }
        }
        if retired.all_idle {
            self.on_idle();
        }
    }

    fn on_idle(&self) {
        self.pool.shrink_to_minimum();
        let stats = self.registry.lock().unwrap().stats();
        info!(
            files = stats.files_downloaded,
            bytes = stats.bytes_downloaded,
            failures = stats.failures,
            bytes_per_sec = stats.average_speed() as u64,
            "Download queue drained"
        );
    }

    pub(crate) fn signal_out_of_memory(&self, content_id: &str) {
        warn!(content_id, "No storage tier can hold the download");
        if let Some(sender) = self.out_of_memory.lock().unwrap().as_ref() {
            let _ = sender.send(OutOfMemory {
                content_id: content_id.to_string(),
            });
        }
    }
}

// =============================================================================
// ResourceCoordinator
// =============================================================================

/// Owner of the download pool and the tiered store.
pub struct ResourceCoordinator {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ResourceCoordinator {
    /// Build a coordinator, index the storage tiers and start the workers.
    pub fn new(
        config: CoordinatorConfig,
        fetcher: Arc<dyn Fetcher>,
        probe: Arc<dyn StorageProbe>,
    ) -> Result<Self, CoordinatorError> {
        let probe = CachedProbe::new(probe, config.mount_ttl(), config.free_space_ttl());
        let mounted = probe.is_external_mounted();

        config
            .layout()
            .ensure_dirs(mounted)
            .map_err(StorageError::from)?;
        let index = StorageTierIndex::new();
        let found = config
            .layout()
            .scan_into(&index, mounted)
            .map_err(StorageError::from)?;
        info!(
            resources = found,
            external_mounted = mounted,
            "Storage index loaded"
        );

        let small_workers = config.small_workers();
        let large_workers = config.large_workers();
        let shared = Arc::new(Shared {
            pool: MemoryPool::new(config.min_slots()),
            config,
            index,
            fetcher,
            small: PriorityQueue::new(),
            large: PriorityQueue::new(),
            probe,
            registry: Mutex::new(Registry::new()),
            out_of_memory: Mutex::new(None),
            running: AtomicBool::new(true),
        });

        let mut coordinator = Self {
            shared,
            workers: Vec::with_capacity(small_workers + large_workers),
        };
        for (kind, count) in [(TaskKind::Small, small_workers), (TaskKind::Large, large_workers)] {
            for i in 0..count {
                let handle = worker::spawn(Arc::clone(&coordinator.shared), kind, i)
                    .map_err(CoordinatorError::Spawn)?;
                coordinator.workers.push(handle);
            }
        }
        debug!(small_workers, large_workers, "Download workers started");
        Ok(coordinator)
    }

    /// Coordinator fetching over HTTP(S) or from `file://` URLs and probing
    /// the real filesystem.
    pub fn with_http(config: CoordinatorConfig, timeout_secs: u64) -> Result<Self, CoordinatorError> {
        let probe: Arc<dyn StorageProbe> = Arc::new(FsProbe::new(config.layout()));
        let fetcher: Arc<dyn Fetcher> = Arc::new(SchemeFetcher::with_timeout(timeout_secs)?);
        Self::new(config, fetcher, probe)
    }

    // ----- submission -----

    /// Queue a download.
    ///
    /// Returns `false` without queueing when the resource is already
    /// resident, an equivalent task is live, the descriptor is empty, the
    /// content id cannot name a file, or no tier could take the file.
    pub fn submit(&self, request: DownloadRequest) -> bool {
        let descriptor = request.descriptor();
        if descriptor.is_empty() {
            debug!(?descriptor, "Ignoring empty resource descriptor");
            return false;
        }
        if let Err(e) = validate_content_id(&descriptor.content_id) {
            warn!(error = %e, "Rejecting download");
            return false;
        }
        if self.shared.resident(&descriptor.content_id).is_some() {
            trace!(content_id = %descriptor.content_id, "Already resident");
            return false;
        }
        if !self.is_download_possible() {
            warn!(
                content_id = %descriptor.content_id,
                "Rejecting download: internal storage is full and no removable store is mounted"
            );
            return false;
        }

        let mut task = request.into_task();
        let admitted = self.shared.registry.lock().unwrap().admit(
            task.content_id(),
            task.listener_id(),
            task.priority(),
        );
        let Some(id) = admitted else {
            trace!(content_id = task.content_id(), "Equivalent download already live");
            return false;
        };
        task.assign_id(id);

        let priority = task.priority();
        let kind = task.kind();
        debug!(content_id = task.content_id(), priority, ?kind, "Download queued");
        if !self.shared.queue(kind).push(task, priority) {
            self.shared.registry.lock().unwrap().retire(id);
            return false;
        }
        true
    }

    /// Queue one download per descriptor, sharing every other option with
    /// `template`. Returns how many were queued.
    pub fn submit_all<I>(&self, descriptors: I, template: &DownloadRequest) -> usize
    where
        I: IntoIterator<Item = ResourceDescriptor>,
    {
        descriptors
            .into_iter()
            .filter(|descriptor| self.submit(template.for_descriptor(descriptor.clone())))
            .count()
    }

    /// Drop every queued task. In-flight downloads are unaffected.
    pub fn clear_download_queue(&self) -> usize {
        let mut dropped = self.shared.small.drain();
        dropped.extend(self.shared.large.drain());
        let count = dropped.len();
        for task in dropped {
            let listener = task.listener().cloned();
            self.shared.retire(task.id(), listener.as_ref());
        }
        if count > 0 {
            debug!(dropped = count, "Download queue cleared");
        }
        count
    }

    // ----- availability -----

    /// Whether the resource is stored in a tier that is readable now.
    pub fn is_available(&self, content_id: &str) -> bool {
        self.shared.resident(content_id).is_some()
    }

    /// Filesystem path of a readable resource.
    pub fn resolve_path(&self, content_id: &str) -> Option<PathBuf> {
        let location = self.shared.resident(content_id)?;
        self.shared.layout().path(location.tier, content_id)
    }

    pub fn location(&self, content_id: &str) -> Option<FileDescriptor> {
        self.shared.resident(content_id)
    }

    /// Whether any download is queued or in flight.
    pub fn is_busy(&self) -> bool {
        self.shared.registry.lock().unwrap().is_busy()
    }

    /// Whether any download for `listener` is queued or in flight.
    pub fn is_busy_for(&self, listener: &Listener) -> bool {
        self.shared
            .registry
            .lock()
            .unwrap()
            .is_busy_for(listener.id())
    }

    /// Whether any download of `content_id` is queued or in flight.
    pub fn is_queued(&self, content_id: &str) -> bool {
        self.shared
            .registry
            .lock()
            .unwrap()
            .is_live(content_id, None)
    }

    /// Queued plus in-flight downloads.
    pub fn pending_count(&self) -> usize {
        self.shared.registry.lock().unwrap().live_count()
    }

    /// Whether a new download could be stored anywhere right now.
    pub fn is_download_possible(&self) -> bool {
        self.shared
            .config
            .space_policy()
            .can_accept(&self.shared.probe)
    }

    /// A priority higher than any submitted so far.
    pub fn current_max_priority(&self) -> i32 {
        self.shared.registry.lock().unwrap().above_max_priority()
    }

    /// A priority lower than any submitted so far.
    pub fn current_min_priority(&self) -> i32 {
        self.shared.registry.lock().unwrap().below_min_priority()
    }

    // ----- reading -----

    /// Read a resource as stored (encrypted if it was downloaded with a
    /// crypter).
    pub fn read_bytes(&self, content_id: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.readable_path(content_id)?;
        fs::read(&path).map_err(|e| self.forget_if_missing(content_id, e))
    }

    /// Read a resource and reverse the crypter applied when it was stored.
    pub fn read_decrypted(
        &self,
        content_id: &str,
        crypter: &Crypter,
    ) -> Result<Vec<u8>, StorageError> {
        let mut data = self.read_bytes(content_id)?;
        for (part, chunk) in data.chunks_mut(SLOT_SIZE).enumerate() {
            crypter.decrypt(part, chunk);
        }
        Ok(data)
    }

    /// Open a resource for streaming reads.
    pub fn open(&self, content_id: &str) -> Result<File, StorageError> {
        let path = self.readable_path(content_id)?;
        File::open(&path).map_err(|e| self.forget_if_missing(content_id, e))
    }

    pub fn file_size(&self, content_id: &str) -> Option<u64> {
        self.shared.resident(content_id).map(|d| d.size_bytes)
    }

    /// Combined size of every indexed resource.
    pub fn total_size(&self) -> u64 {
        self.shared.index.total_size()
    }

    pub fn names_containing(&self, fragment: &str) -> Vec<String> {
        self.shared.index.names_containing(fragment)
    }

    pub fn all_names(&self) -> Vec<String> {
        self.shared.index.names()
    }

    fn readable_path(&self, content_id: &str) -> Result<PathBuf, StorageError> {
        validate_content_id(content_id)?;
        let location = self
            .shared
            .index
            .get(content_id)
            .ok_or_else(|| StorageError::NotFound(content_id.to_string()))?;
        if location.tier == StorageTier::External && !self.shared.probe.is_external_mounted() {
            return Err(StorageError::Unavailable(StorageTier::External));
        }
        self.shared.target_path(location.tier, content_id)
    }

    // A file deleted behind our back leaves a stale entry; drop it.
    fn forget_if_missing(&self, content_id: &str, e: io::Error) -> StorageError {
        if e.kind() == io::ErrorKind::NotFound {
            warn!(content_id, "Indexed file vanished, dropping index entry");
            self.shared.index.remove(content_id);
            StorageError::NotFound(content_id.to_string())
        } else {
            StorageError::Io(e)
        }
    }

    // ----- writing -----

    /// Store locally produced bytes under `content_id`, placed by the
    /// free-space policy.
    pub fn store_bytes(&self, content_id: &str, data: &[u8]) -> Result<FileDescriptor, StorageError> {
        validate_content_id(content_id)?;
        let tier = match self.shared.placement() {
            Ok(tier) => tier,
            Err(e) => {
                self.shared.signal_out_of_memory(content_id);
                return Err(e);
            }
        };
        let path = self.shared.target_path(tier, content_id)?;
        write_new_file(&path, |out| out.write_all(data))?;

        let location = FileDescriptor::new(tier, data.len() as u64);
        self.shared.index.insert(content_id, location);
        debug!(content_id, tier = %tier, size = data.len(), "Stored local data");
        Ok(location)
    }

    /// Delete a resource. Returns `false` when it was not indexed.
    pub fn delete(&self, content_id: &str) -> Result<bool, StorageError> {
        validate_content_id(content_id)?;
        let Some(location) = self.shared.index.get(content_id) else {
            return Ok(false);
        };
        if !location.tier.is_writable() {
            return Err(StorageError::ReadOnlyTier(location.tier));
        }
        let path = self.readable_path(content_id)?;
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.shared.index.remove(content_id);
        debug!(content_id, tier = %location.tier, "Deleted resource");
        Ok(true)
    }

    /// Delete several resources, returning how many were removed.
    pub fn delete_many<'a, I>(&self, content_ids: I) -> Result<usize, StorageError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut removed = 0;
        for content_id in content_ids {
            if self.delete(content_id)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Delete every writable resource. Embedded assets stay.
    pub fn delete_all(&self) -> Result<usize, StorageError> {
        let mut names = self.shared.index.names_in(StorageTier::Internal);
        if self.shared.probe.is_external_mounted() {
            names.extend(self.shared.index.names_in(StorageTier::External));
        }
        let removed = self.delete_many(names.iter().map(String::as_str))?;
        info!(removed, "Deleted all writable resources");
        Ok(removed)
    }

    // ----- housekeeping -----

    pub fn stats(&self) -> DownloadStats {
        self.shared.registry.lock().unwrap().stats()
    }

    pub fn reset_stats(&self) {
        self.shared.registry.lock().unwrap().reset_stats();
    }

    /// Install (or clear) the receiver of out-of-memory signals.
    pub fn set_out_of_memory_listener(&self, sender: Option<Sender<OutOfMemory>>) {
        *self.shared.out_of_memory.lock().unwrap() = sender;
    }

    /// Trim the memory pool if nothing is downloading. Returns slots freed.
    pub fn free_memory(&self) -> usize {
        if self.is_busy() {
            return 0;
        }
        self.shared.pool.shrink_to_minimum()
    }

    pub fn pool(&self) -> &MemoryPool {
        &self.shared.pool
    }

    pub fn index(&self) -> &StorageTierIndex {
        &self.shared.index
    }

    pub fn config(&self) -> &CoordinatorConfig {
        self.shared.config()
    }

    /// Stop the workers and wait for them to exit.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for ResourceCoordinator {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.small.close();
        self.shared.large.close();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("Download worker panicked");
            }
        }
        debug!("Resource coordinator stopped");
    }
}

/// Create (or replace) a file and fill it through `fill`. A partially
/// written file is removed on failure.
pub(crate) fn write_new_file<F>(path: &Path, fill: F) -> Result<(), StorageError>
where
    F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let result = File::create(path).and_then(|file| {
        let mut out = BufWriter::new(file);
        fill(&mut out)?;
        out.flush()
    });
    if let Err(e) = result {
        let _ = fs::remove_file(path);
        return Err(e.into());
    }
    Ok(())
}
