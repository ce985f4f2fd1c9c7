//! Generic priority executor for background operations.
//!
//! A smaller twin of the download pool: a fixed set of threads pulling from
//! one shared [`PriorityQueue`]. Each [`Operation`] runs against a shared
//! context and reports success as a `bool`; callers that care about the
//! outcome pass a channel and get the operation back in a [`Completed`].

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, trace, warn};

use crate::queue::PriorityQueue;

/// Threads started by default.
pub const DEFAULT_OPERATION_THREADS: usize = 5;

/// A unit of background work.
pub trait Operation: Send + 'static {
    /// Shared state every run can read.
    type Context: Send + Sync + 'static;

    /// Do the work. Returns whether it succeeded.
    fn run(&mut self, context: &Self::Context) -> bool;

    /// Higher runs sooner.
    fn priority(&self) -> i32 {
        0
    }

    fn name(&self) -> &str {
        "operation"
    }
}

/// An operation handed back after it ran.
#[derive(Debug)]
pub struct Completed<O> {
    pub operation: O,
    pub succeeded: bool,
}

struct Job<O> {
    operation: O,
    reply: Option<Sender<Completed<O>>>,
}

struct OperationShared<O: Operation> {
    queue: PriorityQueue<Job<O>>,
    context: Arc<O::Context>,
    pending: AtomicUsize,
    max_priority: AtomicI32,
    running: AtomicBool,
}

/// Fixed pool of threads running [`Operation`]s by priority.
pub struct OperationQueue<O: Operation> {
    shared: Arc<OperationShared<O>>,
    threads: Vec<JoinHandle<()>>,
}

impl<O: Operation> OperationQueue<O> {
    /// Start `threads` workers (at least one) sharing `context`.
    pub fn new(context: Arc<O::Context>, threads: usize) -> std::io::Result<Self> {
        let shared = Arc::new(OperationShared {
            queue: PriorityQueue::new(),
            context,
            pending: AtomicUsize::new(0),
            max_priority: AtomicI32::new(0),
            running: AtomicBool::new(true),
        });

        let mut queue = Self {
            shared,
            threads: Vec::new(),
        };
        for i in 0..threads.max(1) {
            let shared = Arc::clone(&queue.shared);
            let handle = thread::Builder::new()
                .name(format!("operation-{}", i))
                .spawn(move || work(shared))?;
            queue.threads.push(handle);
        }
        Ok(queue)
    }

    /// Queue an operation. Returns `false` if the queue is shutting down.
    pub fn add(&self, operation: O, reply: Option<Sender<Completed<O>>>) -> bool {
        let priority = operation.priority();
        self.shared
            .max_priority
            .fetch_max(priority, Ordering::SeqCst);
        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        trace!(name = operation.name(), priority, "Operation queued");

        let accepted = self.shared.queue.push(Job { operation, reply }, priority);
        if !accepted {
            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
        }
        accepted
    }

    /// A priority higher than any queued so far.
    pub fn current_max_priority(&self) -> i32 {
        self.shared
            .max_priority
            .load(Ordering::SeqCst)
            .saturating_add(1)
    }

    /// Whether anything is queued or running.
    pub fn is_busy(&self) -> bool {
        self.shared.pending.load(Ordering::SeqCst) > 0
    }

    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    /// Drop every operation that has not started yet.
    pub fn clear(&self) -> usize {
        let dropped = self.shared.queue.drain().len();
        self.shared.pending.fetch_sub(dropped, Ordering::SeqCst);
        dropped
    }

    pub fn context(&self) -> &Arc<O::Context> {
        &self.shared.context
    }
}

impl<O: Operation> Drop for OperationQueue<O> {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.queue.close();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("Operation thread panicked");
            }
        }
    }
}

fn work<O: Operation>(shared: Arc<OperationShared<O>>) {
    while let Some(Job {
        mut operation,
        reply,
    }) = shared.queue.pop()
    {
        if !shared.running.load(Ordering::SeqCst) {
            break;
        }
        let context = &shared.context;
        let succeeded = panic::catch_unwind(AssertUnwindSafe(|| operation.run(context)))
            .unwrap_or_else(|_| {
                warn!(name = operation.name(), "Operation panicked");
                false
            });
        if !succeeded {
            debug!(name = operation.name(), "Operation failed");
        }
        shared.pending.fetch_sub(1, Ordering::SeqCst);

        if let Some(reply) = reply {
            let _ = reply.send(Completed {
                operation,
                succeeded,
            });
        }
    }
}
