//! Stockpile - prioritized resource downloads with tiered local storage
//!
//! This library fetches remote resources on a fixed pool of worker threads,
//! buffers them in pooled fixed-size memory slots and stores them in one of
//! three storage tiers (internal, external removable, embedded read-only).
//! Decoded images can be kept in a small LRU cache for rendering.
//!
//! # High-Level API
//!
//! [`ResourceCoordinator`] is the entry point: submit a [`DownloadRequest`],
//! receive [`DownloadEvent`]s on the [`Listener`]'s channel, then read the
//! stored bytes back through the coordinator.
//!
//! ```no_run
//! use stockpile::config::ConfigFile;
//! use stockpile::{DownloadRequest, Listener, ResourceCoordinator, ResourceDescriptor, TaskKind};
//!
//! let config = ConfigFile::load()?;
//! let coordinator = ResourceCoordinator::with_http(
//!     config.to_coordinator_config(),
//!     config.download.timeout,
//! )?;
//!
//! let (listener, events) = Listener::channel();
//! coordinator.submit(
//!     DownloadRequest::new(ResourceDescriptor::new("https://example.com/a.bin", "a"))
//!         .kind(TaskKind::Large)
//!         .listener(&listener),
//! );
//! # let _ = events;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod coordinator;
pub mod drawable;
pub mod error;
pub mod fetch;
pub mod listener;
pub mod logging;
pub mod operation;
pub mod pool;
pub mod queue;
pub mod storage;
pub mod task;

mod worker;

pub use coordinator::{
    CoordinatorConfig, DownloadStats, OutOfMemory, Recode, ResourceCoordinator,
};
pub use drawable::{DrawableCache, DrawableEvent, DrawableLoader};
pub use error::{CoordinatorError, DownloadError, FetchError, StorageError};
pub use fetch::{Fetcher, FileFetcher, HttpFetcher, MockFetcher, SchemeFetcher};
pub use listener::{DownloadEvent, Listener, ListenerId, TaskReport};
pub use operation::{Completed, Operation, OperationQueue};
pub use pool::{MemoryPool, SLOT_SIZE};
pub use storage::{FileDescriptor, StorageLayout, StorageTier, StorageTierIndex};
pub use task::{
    Crypter, DownloadRequest, DownloadTask, Payload, ResourceDescriptor, TaskKind, MAX_RETRIES,
};

/// Version of the library and CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
