//! Download requests and the per-task state machine.
//!
//! Callers describe what they want with a [`DownloadRequest`]; the
//! coordinator turns it into a [`DownloadTask`] that it owns until the task
//! terminates. Optional behavior (payload validation, at-rest encryption,
//! dynamic URLs) is supplied as closures.

use std::any::Any;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::listener::{Listener, ListenerId, TaskReport};
use crate::pool::{MemorySlot, SLOT_SIZE};
use crate::storage::FileDescriptor;

/// Attempts after the first one before a task fails for good.
pub const MAX_RETRIES: u32 = 3;

/// Opaque caller data carried through to completion events.
pub type Tag = Arc<dyn Any + Send + Sync>;

/// Decides whether a downloaded payload is acceptable.
pub type Checker = Arc<dyn Fn(&DownloadTask, Payload<'_>) -> bool + Send + Sync>;

/// Computes the URL to fetch at download time.
pub type UrlOverride = Arc<dyn Fn(&ResourceDescriptor) -> String + Send + Sync>;

type PartTransform = Arc<dyn Fn(usize, &mut [u8]) + Send + Sync>;

// =============================================================================
// ResourceDescriptor
// =============================================================================

/// What to fetch and what to call it.
///
/// Two descriptors are equal when their content ids are equal.
#[derive(Clone)]
pub struct ResourceDescriptor {
    pub url: String,
    /// Content-addressed name; doubles as the file name in every tier.
    pub content_id: String,
    pub tag: Option<Tag>,
}

impl ResourceDescriptor {
    pub fn new(url: impl Into<String>, content_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            content_id: content_id.into(),
            tag: None,
        }
    }

    pub fn with_tag<T: Any + Send + Sync>(mut self, tag: T) -> Self {
        self.tag = Some(Arc::new(tag));
        self
    }

    /// A descriptor without a URL or a name cannot be downloaded.
    pub fn is_empty(&self) -> bool {
        self.url.is_empty() || self.content_id.is_empty()
    }
}

impl PartialEq for ResourceDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.content_id == other.content_id
    }
}

impl Eq for ResourceDescriptor {}

impl fmt::Debug for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceDescriptor")
            .field("url", &self.url)
            .field("content_id", &self.content_id)
            .field("tagged", &self.tag.is_some())
            .finish()
    }
}

// =============================================================================
// Kinds, states, payloads
// =============================================================================

/// Which worker lane handles the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TaskKind {
    /// Kept fully in memory until persisted
    #[default]
    Small,
    /// Spooled to a temporary segment in chunks
    Large,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    NotStarted,
    InProgress,
    Finished,
}

/// Downloaded bytes as presented to a [`Checker`].
#[derive(Debug, Clone, Copy)]
pub enum Payload<'a> {
    /// Small task: the whole payload in pooled slots
    Resident(&'a [MemorySlot]),
    /// Large task: the assembled temporary segment
    Spooled(&'a Path),
}

impl Payload<'_> {
    /// Copy the payload into memory.
    pub fn to_vec(&self) -> io::Result<Vec<u8>> {
        match self {
            Payload::Resident(slots) => Ok(slots.iter().flat_map(|s| s.data()).copied().collect()),
            Payload::Spooled(path) => fs::read(path),
        }
    }

    pub fn len(&self) -> io::Result<u64> {
        match self {
            Payload::Resident(slots) => Ok(slots.iter().map(|s| s.len() as u64).sum()),
            Payload::Spooled(path) => Ok(fs::metadata(path)?.len()),
        }
    }

    pub fn is_empty(&self) -> io::Result<bool> {
        self.len().map(|len| len == 0)
    }
}

// =============================================================================
// Crypter
// =============================================================================

/// Reversible at-rest transform applied per [`SLOT_SIZE`] part.
///
/// Part `n` covers bytes `n * SLOT_SIZE .. (n + 1) * SLOT_SIZE` of the stored
/// file, so encryption and decryption agree regardless of how the bytes were
/// downloaded.
#[derive(Clone)]
pub struct Crypter {
    encrypt: PartTransform,
    decrypt: PartTransform,
}

impl Crypter {
    pub fn new<E, D>(encrypt: E, decrypt: D) -> Self
    where
        E: Fn(usize, &mut [u8]) + Send + Sync + 'static,
        D: Fn(usize, &mut [u8]) + Send + Sync + 'static,
    {
        Self {
            encrypt: Arc::new(encrypt),
            decrypt: Arc::new(decrypt),
        }
    }

    /// Repeating-key XOR, keyed by absolute file offset.
    pub fn xor(key: impl Into<Vec<u8>>) -> Self {
        let key: Arc<[u8]> = Arc::from(key.into());
        let transform: PartTransform = Arc::new(move |part, data: &mut [u8]| {
            if key.is_empty() {
                return;
            }
            let base = part * SLOT_SIZE;
            for (i, byte) in data.iter_mut().enumerate() {
                *byte ^= key[(base + i) % key.len()];
            }
        });
        Self {
            encrypt: transform.clone(),
            decrypt: transform,
        }
    }

    pub fn encrypt(&self, part: usize, data: &mut [u8]) {
        (self.encrypt)(part, data)
    }

    pub fn decrypt(&self, part: usize, data: &mut [u8]) {
        (self.decrypt)(part, data)
    }
}

impl fmt::Debug for Crypter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Crypter")
    }
}

// =============================================================================
// DownloadRequest
// =============================================================================

/// Everything a caller can say about one download.
///
/// ```
/// use stockpile::{DownloadRequest, Listener, ResourceDescriptor, TaskKind};
///
/// let (listener, _events) = Listener::channel();
/// let request = DownloadRequest::new(ResourceDescriptor::new("https://cdn/a.png", "a"))
///     .priority(5)
///     .kind(TaskKind::Small)
///     .listener(&listener)
///     .checker(|_task, payload| payload.len().map(|n| n > 0).unwrap_or(false));
/// assert_eq!(request.descriptor().content_id, "a");
/// ```
#[derive(Clone)]
pub struct DownloadRequest {
    descriptor: ResourceDescriptor,
    priority: i32,
    kind: TaskKind,
    listener: Option<Listener>,
    checker: Option<Checker>,
    crypter: Option<Crypter>,
    url_override: Option<UrlOverride>,
    tag: Option<Tag>,
}

impl DownloadRequest {
    pub fn new(descriptor: ResourceDescriptor) -> Self {
        Self {
            descriptor,
            priority: 0,
            kind: TaskKind::Small,
            listener: None,
            checker: None,
            crypter: None,
            url_override: None,
            tag: None,
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn kind(mut self, kind: TaskKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn listener(mut self, listener: &Listener) -> Self {
        self.listener = Some(listener.clone());
        self
    }

    pub fn checker<F>(mut self, checker: F) -> Self
    where
        F: Fn(&DownloadTask, Payload<'_>) -> bool + Send + Sync + 'static,
    {
        self.checker = Some(Arc::new(checker));
        self
    }

    pub fn crypter(mut self, crypter: Crypter) -> Self {
        self.crypter = Some(crypter);
        self
    }

    pub fn url_override<F>(mut self, url_override: F) -> Self
    where
        F: Fn(&ResourceDescriptor) -> String + Send + Sync + 'static,
    {
        self.url_override = Some(Arc::new(url_override));
        self
    }

    pub fn tag<T: Any + Send + Sync>(mut self, tag: T) -> Self {
        self.tag = Some(Arc::new(tag));
        self
    }

    pub fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    pub fn listener_id(&self) -> Option<ListenerId> {
        self.listener.as_ref().map(Listener::id)
    }

    /// Same options, different resource.
    pub(crate) fn for_descriptor(&self, descriptor: ResourceDescriptor) -> Self {
        Self {
            descriptor,
            ..self.clone()
        }
    }

    pub(crate) fn into_task(self) -> DownloadTask {
        DownloadTask {
            id: 0,
            descriptor: self.descriptor,
            priority: self.priority,
            retries: 0,
            kind: self.kind,
            state: TaskState::NotStarted,
            checker: self.checker,
            crypter: self.crypter,
            url_override: self.url_override,
            listener: self.listener,
            tag: self.tag,
        }
    }
}

// =============================================================================
// DownloadTask
// =============================================================================

/// One fetch, owned by the coordinator from submission to termination.
pub struct DownloadTask {
    id: u64,
    descriptor: ResourceDescriptor,
    priority: i32,
    retries: u32,
    kind: TaskKind,
    state: TaskState,
    checker: Option<Checker>,
    crypter: Option<Crypter>,
    url_override: Option<UrlOverride>,
    listener: Option<Listener>,
    tag: Option<Tag>,
}

impl DownloadTask {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    pub fn content_id(&self) -> &str {
        &self.descriptor.content_id
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn crypter(&self) -> Option<&Crypter> {
        self.crypter.as_ref()
    }

    pub fn listener(&self) -> Option<&Listener> {
        self.listener.as_ref()
    }

    pub fn listener_id(&self) -> Option<ListenerId> {
        self.listener.as_ref().map(Listener::id)
    }

    pub fn tag(&self) -> Option<&Tag> {
        self.tag.as_ref()
    }

    /// URL to fetch for this attempt.
    pub fn resolve_url(&self) -> String {
        match &self.url_override {
            Some(url_override) => url_override(&self.descriptor),
            None => self.descriptor.url.clone(),
        }
    }

    /// Run the checker; tasks without one accept everything.
    pub fn validate(&self, payload: Payload<'_>) -> bool {
        match &self.checker {
            Some(checker) => checker(self, payload),
            None => true,
        }
    }

    /// Whether the listener wants this task abandoned.
    pub fn is_cancelled(&self) -> bool {
        self.listener
            .as_ref()
            .is_some_and(|l| l.is_cancelled(&self.descriptor))
    }

    /// Dedup rule: same content id, and the same listener unless either side
    /// has none.
    pub fn is_equivalent(&self, content_id: &str, listener: Option<ListenerId>) -> bool {
        self.descriptor.content_id == content_id && listeners_match(self.listener_id(), listener)
    }

    pub(crate) fn assign_id(&mut self, id: u64) {
        self.id = id;
    }

    /// NotStarted -> InProgress. Returns false if the task already started.
    pub(crate) fn begin(&mut self) -> bool {
        if self.state != TaskState::NotStarted {
            return false;
        }
        self.state = TaskState::InProgress;
        true
    }

    pub(crate) fn finish(&mut self) {
        self.state = TaskState::Finished;
    }

    pub(crate) fn can_retry(&self, max_retries: u32) -> bool {
        self.retries < max_retries
    }

    /// Spend the remaining retry budget so the task fails on this attempt.
    pub(crate) fn exhaust_retries(&mut self, max_retries: u32) {
        self.retries = max_retries;
    }

    /// Prepare the next attempt. `decay` lowers the priority slightly so a
    /// source that keeps failing sinks below fresh work.
    pub(crate) fn into_retry(mut self, decay: bool) -> Self {
        self.retries += 1;
        if decay {
            self.priority = decayed_priority(self.priority);
        }
        self.state = TaskState::NotStarted;
        self
    }

    pub(crate) fn report(&self, location: Option<FileDescriptor>) -> TaskReport {
        TaskReport {
            descriptor: self.descriptor.clone(),
            kind: self.kind,
            priority: self.priority,
            retries: self.retries,
            location,
            tag: self.tag.clone(),
        }
    }
}

impl fmt::Debug for DownloadTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadTask")
            .field("id", &self.id)
            .field("content_id", &self.descriptor.content_id)
            .field("priority", &self.priority)
            .field("retries", &self.retries)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .finish()
    }
}

/// Listener half of the dedup rule: an absent listener matches anything.
pub(crate) fn listeners_match(a: Option<ListenerId>, b: Option<ListenerId>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

/// Priority used for a retry. Positive priorities sink towards 1, the rest
/// keep sinking.
pub fn decayed_priority(priority: i32) -> i32 {
    if priority > 0 {
        (priority - 1).max(1)
    } else {
        priority.saturating_sub(1)
    }
}
