//! Blocking priority queue shared by the download and operation pools.
//!
//! Producers [`push`](PriorityQueue::push) from any thread; consumers block in
//! [`pop`](PriorityQueue::pop) until an item is available or the queue is
//! closed. Higher priority values come out first; equal priorities come out
//! in submission order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

// =============================================================================
// Entry
// =============================================================================

struct Entry<T> {
    priority: i32,
    sequence: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first, then lower sequence (FIFO)
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

// =============================================================================
// PriorityQueue
// =============================================================================

struct QueueState<T> {
    heap: BinaryHeap<Entry<T>>,
    next_sequence: u64,
    closed: bool,
}

/// Multi-producer, multi-consumer max-priority queue with blocking pop.
pub struct PriorityQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
}

impl<T> PriorityQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                next_sequence: 0,
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Add an item and wake every waiting consumer.
    ///
    /// Returns `false` (dropping the item) when the queue is closed.
    pub fn push(&self, item: T, priority: i32) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return false;
        }
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.heap.push(Entry {
            priority,
            sequence,
            item,
        });
        drop(state);
        self.available.notify_all();
        true
    }

    /// Take the highest-priority item, blocking while the queue is empty.
    ///
    /// Returns `None` once the queue is closed; items still queued at that
    /// point are abandoned.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.closed {
                return None;
            }
            if let Some(entry) = state.heap.pop() {
                return Some(entry.item);
            }
            state = self.available.wait(state).unwrap();
        }
    }

    /// Like [`pop`](Self::pop) but gives up after `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let state = self.state.lock().unwrap();
        let (mut state, _) = self
            .available
            .wait_timeout_while(state, timeout, |s| !s.closed && s.heap.is_empty())
            .unwrap();
        if state.closed {
            return None;
        }
        state.heap.pop().map(|entry| entry.item)
    }

    /// Take the highest-priority item without blocking.
    pub fn try_pop(&self) -> Option<T> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return None;
        }
        state.heap.pop().map(|entry| entry.item)
    }

    /// Remove and return every queued item, highest priority first.
    pub fn drain(&self) -> Vec<T> {
        let mut state = self.state.lock().unwrap();
        let mut entries = std::mem::take(&mut state.heap).into_sorted_vec();
        entries.reverse();
        entries.into_iter().map(|entry| entry.item).collect()
    }

    /// Highest queued priority, if any.
    pub fn peek_priority(&self) -> Option<i32> {
        self.state.lock().unwrap().heap.peek().map(|e| e.priority)
    }

    /// Whether any queued item matches `predicate`.
    pub fn any(&self, mut predicate: impl FnMut(&T) -> bool) -> bool {
        self.state
            .lock()
            .unwrap()
            .heap
            .iter()
            .any(|entry| predicate(&entry.item))
    }

    /// Stop accepting items and release every blocked consumer.
    pub fn close(&self) {
        self.state.lock().unwrap().closed = true;
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().heap.is_empty()
    }
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
