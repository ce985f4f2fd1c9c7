//! Tiered persistent storage.
//!
//! Resources live in one of three tiers:
//!
//! - **Internal**: fast primary storage, always writable.
//! - **External**: a removable store that may come and go; files live under
//!   an application-scoped cache directory on it.
//! - **Embedded**: read-only assets bundled with the application, enumerated
//!   once at startup and never written.
//!
//! The [`StorageTierIndex`] is the single source of truth for what is
//! resident where. [`StorageLayout`] maps tiers to directories,
//! [`StorageProbe`] answers mount and free-space questions and
//! [`SpacePolicy`] turns those answers into placement decisions.

mod index;
mod layout;
mod policy;
mod probe;

pub use index::{FileDescriptor, StorageTier, StorageTierIndex};
pub use layout::{
    validate_content_id, StorageLayout, SEGMENT_DIR, STAGING_PREFIX, TEMP_PREFIX,
};
pub use policy::{SpacePolicy, DEFAULT_HIGH_WATERMARK, DEFAULT_LOW_WATERMARK};
pub use probe::{
    CachedProbe, FixedProbe, FsProbe, StorageProbe, DEFAULT_FREE_SPACE_TTL, DEFAULT_MOUNT_TTL,
};
