//! Moving stored resources between tiers.

use std::fs::{self, File};
use std::io;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::{write_new_file, ResourceCoordinator};
use crate::error::StorageError;
use crate::pool::{SlotChain, SLOT_SIZE};
use crate::storage::StorageProbe;
use crate::storage::{validate_content_id, FileDescriptor, StorageTier, STAGING_PREFIX};
use crate::task::Crypter;

/// Byte transform applied per [`SLOT_SIZE`] part while relocating.
#[derive(Clone, Copy)]
pub enum Recode<'a> {
    /// Copy bytes unchanged
    Keep,
    /// Encrypt plain bytes
    Encrypt(&'a Crypter),
    /// Decrypt previously encrypted bytes
    Decrypt(&'a Crypter),
}

impl Recode<'_> {
    fn apply(&self, part: usize, data: &mut [u8]) {
        match self {
            Recode::Keep => {}
            Recode::Encrypt(crypter) => crypter.encrypt(part, data),
            Recode::Decrypt(crypter) => crypter.decrypt(part, data),
        }
    }

    fn is_keep(&self) -> bool {
        matches!(self, Recode::Keep)
    }
}

impl std::fmt::Debug for Recode<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Recode::Keep => "Keep",
            Recode::Encrypt(_) => "Encrypt",
            Recode::Decrypt(_) => "Decrypt",
        })
    }
}

impl ResourceCoordinator {
    /// Move a stored resource to `target`, transforming it on the way.
    ///
    /// The copy goes through one pooled slot at a time, so part numbers line
    /// up with the ones used when the file was first stored. `on_progress`
    /// receives `(copied, total)` after every part. The new copy is written
    /// under a staging name and renamed into place before the source is
    /// removed, so a failure leaves the original untouched.
    ///
    /// Relocating to the tier a resource already lives in rewrites it in
    /// place, which only makes sense with a [`Recode`] other than `Keep`.
    /// Embedded assets are copied out and left where they are.
    pub fn relocate(
        &self,
        content_id: &str,
        target: StorageTier,
        recode: Recode<'_>,
        on_progress: Option<&dyn Fn(u64, u64)>,
    ) -> Result<FileDescriptor, StorageError> {
        validate_content_id(content_id)?;
        let source = self.readable_path(content_id)?;
        let Some(from) = self.shared.index.get(content_id) else {
            return Err(StorageError::NotFound(content_id.to_string()));
        };
        if !target.is_writable() {
            return Err(StorageError::ReadOnlyTier(target));
        }
        if target == StorageTier::External && !self.shared.probe.is_external_mounted() {
            return Err(StorageError::Unavailable(target));
        }
        if from.tier == target && recode.is_keep() {
            return Ok(from);
        }

        let started = Instant::now();
        let destination = self.shared.target_path(target, content_id)?;
        let staging = destination.with_file_name(format!("{}{}", STAGING_PREFIX, content_id));

        let mut input = File::open(&source).map_err(|e| self.forget_if_missing(content_id, e))?;
        let total = input.metadata()?.len();
        let mut chain = SlotChain::new(&self.shared.pool);
        let mut copied = 0u64;
        let mut part = 0;

        write_new_file(&staging, |out| loop {
            while chain.len() < SLOT_SIZE {
                if chain.fill_from(&mut input)? == 0 {
                    break;
                }
            }
            if chain.is_empty() {
                return Ok(());
            }
            if let Some(slot) = chain.slots_mut().first_mut() {
                recode.apply(part, slot.data_mut());
            }
            copied += chain.len() as u64;
            chain.flush_to(out)?;
            if let Some(on_progress) = on_progress {
                on_progress(copied, total);
            }
            part += 1;
        })?;
        drop(chain);

        if let Err(e) = fs::rename(&staging, &destination) {
            if let Err(cleanup) = fs::remove_file(&staging) {
                warn!(staging = %staging.display(), error = %cleanup, "Failed to remove staging file");
            }
            return Err(e.into());
        }

        if from.tier != target && from.tier.is_writable() {
            match fs::remove_file(&source) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(
                    content_id,
                    source = %source.display(),
                    error = %e,
                    "Failed to remove relocated source"
                ),
            }
        }

        let location = FileDescriptor::new(target, copied);
        self.shared.index.insert(content_id, location);
        debug!(content_id, ?recode, parts = part, "Relocation copied");
        info!(
            content_id,
            from = %from.tier,
            to = %target,
            size = copied,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Relocated resource"
        );
        Ok(location)
    }
}
