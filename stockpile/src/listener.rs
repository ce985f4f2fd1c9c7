//! Completion notification over channels.
//!
//! A [`Listener`] is the caller's handle on a group of downloads. Workers
//! report through it by sending [`DownloadEvent`]s; the caller drains the
//! paired [`Receiver`] on whatever thread it likes. Nothing is ever invoked
//! on a worker thread except the cancellation predicate.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use crate::error::DownloadError;
use crate::storage::FileDescriptor;
use crate::task::{ResourceDescriptor, TaskKind, Tag};

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a listener, used for dedup and busy checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Extra cancellation predicate consulted by workers.
pub type CancelCheck = Arc<dyn Fn(&ResourceDescriptor) -> bool + Send + Sync>;

/// Snapshot of a task at the moment it terminated.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub descriptor: ResourceDescriptor,
    pub kind: TaskKind,
    pub priority: i32,
    pub retries: u32,
    /// Where the resource ended up, for successful tasks.
    pub location: Option<FileDescriptor>,
    pub tag: Option<Tag>,
}

impl TaskReport {
    pub fn content_id(&self) -> &str {
        &self.descriptor.content_id
    }
}

/// Message sent to a listener.
#[derive(Debug)]
pub enum DownloadEvent {
    /// The resource is resident
    Succeeded(TaskReport),
    /// The task terminated without the resource
    Failed {
        report: TaskReport,
        error: DownloadError,
    },
    /// No queued or in-flight work remains for this listener
    AllFinished,
}

/// Handle tying submissions to an event channel.
///
/// Clones share identity, channel and cancellation flag.
#[derive(Clone)]
pub struct Listener {
    id: ListenerId,
    sender: Sender<DownloadEvent>,
    cancelled: Arc<AtomicBool>,
    cancel_check: Option<CancelCheck>,
}

impl Listener {
    /// Create a listener and the receiver its events arrive on.
    pub fn channel() -> (Listener, Receiver<DownloadEvent>) {
        let (sender, receiver) = mpsc::channel();
        let id = ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed));
        let listener = Listener {
            id,
            sender,
            cancelled: Arc::new(AtomicBool::new(false)),
            cancel_check: None,
        };
        (listener, receiver)
    }

    /// Add a per-resource cancellation predicate.
    pub fn with_cancel_check<F>(mut self, check: F) -> Self
    where
        F: Fn(&ResourceDescriptor) -> bool + Send + Sync + 'static,
    {
        self.cancel_check = Some(Arc::new(check));
        self
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Ask workers to skip every remaining task of this listener.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether work for `descriptor` should be abandoned.
    pub fn is_cancelled(&self, descriptor: &ResourceDescriptor) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self
                .cancel_check
                .as_ref()
                .is_some_and(|check| check(descriptor))
    }

    /// Deliver an event; a dropped receiver is not an error.
    pub(crate) fn notify(&self, event: DownloadEvent) {
        let _ = self.sender.send(event);
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("cancelled", &self.cancelled.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_ids_are_unique() {
        let (a, _ra) = Listener::channel();
        let (b, _rb) = Listener::channel();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }

    #[test]
    fn test_listener_cancel_is_shared_by_clones() {
        let (listener, _rx) = Listener::channel();
        let clone = listener.clone();
        let descriptor = ResourceDescriptor::new("http://host/a", "a");

        assert!(!clone.is_cancelled(&descriptor));
        listener.cancel();
        assert!(clone.is_cancelled(&descriptor));
    }

    #[test]
    fn test_listener_cancel_check() {
        let (listener, _rx) = Listener::channel();
        let listener = listener.with_cancel_check(|d| d.content_id.starts_with("skip"));

        assert!(listener.is_cancelled(&ResourceDescriptor::new("http://h/1", "skip_me")));
        assert!(!listener.is_cancelled(&ResourceDescriptor::new("http://h/2", "keep_me")));
    }

    #[test]
    fn test_listener_notify_after_receiver_dropped() {
        let (listener, rx) = Listener::channel();
        drop(rx);
        listener.notify(DownloadEvent::AllFinished);
    }
}
