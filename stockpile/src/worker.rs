//! Download worker threads.
//!
//! Each worker is bound to one lane (small or large files) and loops on its
//! lane's queue: pop the highest-priority task, fetch it into pooled slots,
//! validate, pick a tier and persist. Small files stay in memory until they
//! are written. Large files are spooled to a `temp_<id>` segment under the
//! internal tier's segment directory whenever the held bytes pass the chunk
//! threshold, then assembled into their final tier.
//!
//! Failures never leave the worker: every attempt ends in a retry (pushed
//! back on the queue at a slightly lower priority), a terminal event on the
//! task's listener, or a silent drop on cancellation and shutdown.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, trace, warn};

use crate::coordinator::{write_new_file, Shared};
use crate::error::{DownloadError, StorageError};
use crate::fetch::parse_url;
use crate::pool::{SlotChain, SLOT_SIZE};
use crate::storage::FileDescriptor;
use crate::task::{Crypter, DownloadTask, Payload, TaskKind};

/// Start one worker thread for `kind`.
pub(crate) fn spawn(shared: Arc<Shared>, kind: TaskKind, index: usize) -> io::Result<JoinHandle<()>> {
    let name = match kind {
        TaskKind::Small => format!("download-small-{}", index),
        TaskKind::Large => format!("download-large-{}", index),
    };
    thread::Builder::new().name(name.clone()).spawn(move || {
        DownloadWorker { shared, kind, name }.run();
    })
}

/// Why an attempt did not produce a stored file.
enum Interrupted {
    /// The listener asked to stop
    Cancelled,
    /// The coordinator is shutting down
    Shutdown,
    Failed(DownloadError),
}

impl From<DownloadError> for Interrupted {
    fn from(e: DownloadError) -> Self {
        Interrupted::Failed(e)
    }
}

impl From<StorageError> for Interrupted {
    fn from(e: StorageError) -> Self {
        Interrupted::Failed(e.into())
    }
}

// Reading from the source failed.
fn transient(e: io::Error) -> Interrupted {
    Interrupted::Failed(DownloadError::TransientIo(e.to_string()))
}

// Writing to local storage failed.
fn persistence(e: io::Error) -> Interrupted {
    Interrupted::Failed(StorageError::Io(e).into())
}

struct DownloadWorker {
    shared: Arc<Shared>,
    kind: TaskKind,
    name: String,
}

impl DownloadWorker {
    fn run(self) {
        trace!(worker = %self.name, "Download worker started");
        while let Some(mut task) = self.shared.queue(self.kind).pop() {
            if !task.begin() {
                warn!(worker = %self.name, ?task, "Skipping task that already started");
                continue;
            }
            let result = self.attempt(&mut task);
            self.settle(task, result);
        }
        trace!(worker = %self.name, "Download worker stopped");
    }

    /// Route the outcome of one attempt.
    fn settle(&self, mut task: DownloadTask, result: Result<FileDescriptor, Interrupted>) {
        let max_retries = self.shared.config().max_retries();
        match result {
            Ok(location) => {
                task.finish();
                self.shared.complete(task, Ok(location));
            }
            Err(Interrupted::Cancelled) => {
                task.finish();
                self.shared.complete(task, Err(DownloadError::Cancelled));
            }
            Err(Interrupted::Shutdown) => {
                task.finish();
                self.shared.abandon(task);
            }
            Err(Interrupted::Failed(error)) if error.is_retryable() && task.can_retry(max_retries) => {
                debug!(
                    worker = %self.name,
                    content_id = task.content_id(),
                    retries = task.retries(),
                    error = %error,
                    "Retrying download"
                );
                // Checker rejections keep their priority; I/O trouble sinks.
                let decay = !matches!(error, DownloadError::ValidationFailed);
                self.shared.requeue(task.into_retry(decay));
            }
            Err(Interrupted::Failed(error)) => {
                task.finish();
                if matches!(
                    error,
                    DownloadError::PersistenceFailed {
                        out_of_space: true,
                        ..
                    }
                ) {
                    self.shared.signal_out_of_memory(task.content_id());
                }
                self.shared.complete(task, Err(error));
            }
        }
    }

    fn attempt(&self, task: &mut DownloadTask) -> Result<FileDescriptor, Interrupted> {
        if let Some(location) = self.shared.resident(task.content_id()) {
            trace!(content_id = task.content_id(), "Resource already resident");
            return Ok(location);
        }
        if task.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }

        let url = parse_url(&task.resolve_url()).map_err(DownloadError::from)?;
        trace!(worker = %self.name, content_id = task.content_id(), url = %url, "Fetching");
        let mut stream = self.shared.fetcher.open(&url).map_err(DownloadError::from)?;

        match task.kind() {
            TaskKind::Small => self.download_small(task, &mut *stream),
            TaskKind::Large => self.download_large(task, &mut *stream),
        }
    }

    fn ensure_running(&self) -> Result<(), Interrupted> {
        if self.shared.is_running() {
            Ok(())
        } else {
            Err(Interrupted::Shutdown)
        }
    }

    // ----- small files -----

    fn download_small(
        &self,
        task: &mut DownloadTask,
        stream: &mut dyn Read,
    ) -> Result<FileDescriptor, Interrupted> {
        let limit = self.shared.config().chunk_threshold();
        let mut chain = SlotChain::new(&self.shared.pool);

        loop {
            self.ensure_running()?;
            if chain.fill_from(stream).map_err(transient)? == 0 {
                break;
            }
            if chain.len() > limit {
                let size = chain.len();
                task.exhaust_retries(self.shared.config().max_retries());
                return Err(DownloadError::TooLarge { size, limit }.into());
            }
        }

        if task.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }
        if !task.validate(Payload::Resident(chain.slots())) {
            return Err(DownloadError::ValidationFailed.into());
        }
        if task.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }

        let tier = self.shared.placement()?;
        let path = self.shared.target_path(tier, task.content_id())?;
        if let Some(crypter) = task.crypter() {
            for (part, slot) in chain.slots_mut().iter_mut().enumerate() {
                crypter.encrypt(part, slot.data_mut());
            }
        }

        let size = chain.len() as u64;
        write_new_file(&path, |out| chain.flush_to(out))?;

        let location = FileDescriptor::new(tier, size);
        self.shared.record_stored(task.content_id(), location);
        Ok(location)
    }

    // ----- large files -----

    fn download_large(
        &self,
        task: &mut DownloadTask,
        stream: &mut dyn Read,
    ) -> Result<FileDescriptor, Interrupted> {
        let segment = self.shared.layout().temp_path(task.content_id());
        let result = self.spool_and_assemble(task, stream, &segment);
        if let Err(e) = remove_segment(&segment) {
            warn!(segment = %segment.display(), error = %e, "Failed to remove segment");
        }
        result
    }

    fn spool_and_assemble(
        &self,
        task: &mut DownloadTask,
        stream: &mut dyn Read,
        segment_path: &Path,
    ) -> Result<FileDescriptor, Interrupted> {
        let threshold = self.shared.config().chunk_threshold();
        if let Some(parent) = segment_path.parent() {
            fs::create_dir_all(parent).map_err(persistence)?;
        }
        // A crashed attempt may have left bytes behind; appending to them
        // would corrupt the payload.
        remove_segment(segment_path).map_err(persistence)?;
        let mut segment = OpenOptions::new()
            .create(true)
            .append(true)
            .open(segment_path)
            .map_err(persistence)?;

        {
            let mut chain = SlotChain::new(&self.shared.pool);
            loop {
                self.ensure_running()?;
                if chain.fill_from(stream).map_err(transient)? == 0 {
                    break;
                }
                if chain.len() > threshold {
                    trace!(content_id = task.content_id(), bytes = chain.len(), "Flushing chunk");
                    chain.flush_to(&mut segment).map_err(persistence)?;
                    if task.is_cancelled() {
                        return Err(Interrupted::Cancelled);
                    }
                }
            }
            chain.flush_to(&mut segment).map_err(persistence)?;
        }
        segment.flush().map_err(persistence)?;
        drop(segment);

        if task.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }
        if !task.validate(Payload::Spooled(segment_path)) {
            return Err(DownloadError::ValidationFailed.into());
        }
        if task.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }

        let tier = self.shared.placement()?;
        let path = self.shared.target_path(tier, task.content_id())?;
        let size = assemble(segment_path, &path, task.crypter())?;

        let location = FileDescriptor::new(tier, size);
        self.shared.record_stored(task.content_id(), location);
        Ok(location)
    }
}

/// Delete a segment file, treating an absent one as success.
fn remove_segment(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Copy a spooled segment to its final location part by part, encrypting
/// each [`SLOT_SIZE`] part when a crypter is given.
fn assemble(segment: &Path, target: &Path, crypter: Option<&Crypter>) -> Result<u64, StorageError> {
    let mut source = File::open(segment)?;
    let mut total = 0u64;
    write_new_file(target, |out| {
        let mut part = vec![0u8; SLOT_SIZE];
        let mut index = 0;
        loop {
            let n = read_part(&mut source, &mut part)?;
            if n == 0 {
                return Ok(());
            }
            if let Some(crypter) = crypter {
                crypter.encrypt(index, &mut part[..n]);
            }
            out.write_all(&part[..n])?;
            total += n as u64;
            index += 1;
        }
    })?;
    Ok(total)
}

/// Fill `buf` completely unless the reader runs out first.
fn read_part<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    /// Reader returning at most `step` bytes per call.
    struct Stepped {
        inner: Cursor<Vec<u8>>,
        step: usize,
    }

    impl Read for Stepped {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let len = buf.len().min(self.step);
            self.inner.read(&mut buf[..len])
        }
    }

    #[test]
    fn test_read_part_fills_across_short_reads() {
        let mut reader = Stepped {
            inner: Cursor::new(vec![9u8; 25]),
            step: 4,
        };
        let mut buf = [0u8; 10];

        assert_eq!(read_part(&mut reader, &mut buf).unwrap(), 10);
        assert_eq!(read_part(&mut reader, &mut buf).unwrap(), 10);
        assert_eq!(read_part(&mut reader, &mut buf).unwrap(), 5);
        assert_eq!(read_part(&mut reader, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_remove_segment_tolerates_missing_file() {
        let temp = TempDir::new().unwrap();
        let segment = temp.path().join("temp_gone");

        assert!(remove_segment(&segment).is_ok());
        fs::write(&segment, b"x").unwrap();
        assert!(remove_segment(&segment).is_ok());
        assert!(!segment.exists());
    }

    #[test]
    fn test_assemble_copies_plain() {
        let temp = TempDir::new().unwrap();
        let segment = temp.path().join("temp_x");
        let target = temp.path().join("out").join("x");
        let payload: Vec<u8> = (0..23_456u32).map(|i| (i % 199) as u8).collect();
        fs::write(&segment, &payload).unwrap();

        let size = assemble(&segment, &target, None).unwrap();

        assert_eq!(size, payload.len() as u64);
        assert_eq!(fs::read(&target).unwrap(), payload);
    }

    #[test]
    fn test_assemble_encrypts_by_part() {
        let temp = TempDir::new().unwrap();
        let segment = temp.path().join("temp_x");
        let target = temp.path().join("x");
        let payload: Vec<u8> = (0..25_000u32).map(|i| (i % 13) as u8).collect();
        fs::write(&segment, &payload).unwrap();
        let crypter = Crypter::xor(b"k3y".to_vec());

        assemble(&segment, &target, Some(&crypter)).unwrap();

        let mut stored = fs::read(&target).unwrap();
        assert_ne!(stored, payload);
        for (part, chunk) in stored.chunks_mut(SLOT_SIZE).enumerate() {
            crypter.decrypt(part, chunk);
        }
        assert_eq!(stored, payload);
    }
}
