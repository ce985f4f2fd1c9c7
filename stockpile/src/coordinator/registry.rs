//! Bookkeeping for live tasks, priorities and statistics.
//!
//! A task is live from the moment it is admitted until a worker retires it,
//! across every retry. Dedup, busy checks and the "all finished" decision
//! all read this one table under one lock.

use std::collections::HashMap;
use std::time::Instant;

use super::stats::DownloadStats;
use crate::listener::ListenerId;
use crate::task::listeners_match;

struct LiveTask {
    content_id: String,
    listener: Option<ListenerId>,
}

/// What retiring a task changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Retired {
    /// The task's listener has nothing else live.
    pub listener_idle: bool,
    /// Nothing at all is live.
    pub all_idle: bool,
}

pub(crate) struct Registry {
    live: HashMap<u64, LiveTask>,
    next_id: u64,
    max_priority: i32,
    min_priority: i32,
    stats: DownloadStats,
    busy_since: Option<Instant>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            live: HashMap::new(),
            next_id: 1,
            max_priority: 0,
            min_priority: 0,
            stats: DownloadStats::new(),
            busy_since: None,
        }
    }

    /// Admit a task unless an equivalent one is live. Returns its id.
    pub fn admit(
        &mut self,
        content_id: &str,
        listener: Option<ListenerId>,
        priority: i32,
    ) -> Option<u64> {
        if self.is_live(content_id, listener) {
            return None;
        }

        let id = self.next_id;
        self.next_id += 1;
        self.live.insert(
            id,
            LiveTask {
                content_id: content_id.to_string(),
                listener,
            },
        );
        self.max_priority = self.max_priority.max(priority);
        self.min_priority = self.min_priority.min(priority);
        self.busy_since.get_or_insert_with(Instant::now);
        Some(id)
    }

    /// Remove a task that terminated or was dropped from the queue.
    pub fn retire(&mut self, id: u64) -> Retired {
        let listener = self.live.remove(&id).and_then(|task| task.listener);
        let listener_idle = match listener {
            Some(listener) => !self.is_busy_for(listener),
            None => false,
        };
        let all_idle = self.live.is_empty();
        if all_idle {
            if let Some(since) = self.busy_since.take() {
                self.stats.record_busy(since.elapsed());
            }
        }
        Retired {
            listener_idle,
            all_idle,
        }
    }

    /// Whether an equivalent task is queued or in flight.
    pub fn is_live(&self, content_id: &str, listener: Option<ListenerId>) -> bool {
        self.live
            .values()
            .any(|task| task.content_id == content_id && listeners_match(task.listener, listener))
    }

    pub fn is_busy(&self) -> bool {
        !self.live.is_empty()
    }

    pub fn is_busy_for(&self, listener: ListenerId) -> bool {
        self.live
            .values()
            .any(|task| task.listener == Some(listener))
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// A priority above every priority ever admitted.
    pub fn above_max_priority(&self) -> i32 {
        self.max_priority.saturating_add(1)
    }

    /// A priority below every priority ever admitted.
    pub fn below_min_priority(&self) -> i32 {
        self.min_priority.saturating_sub(1)
    }

    pub fn stats(&self) -> DownloadStats {
        let mut stats = self.stats;
        if let Some(since) = self.busy_since {
            stats.record_busy(since.elapsed());
        }
        stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = DownloadStats::new();
        if self.busy_since.is_some() {
            self.busy_since = Some(Instant::now());
        }
    }

    pub fn record_download(&mut self, bytes: u64) {
        self.stats.record_download(bytes);
    }

    pub fn record_failure(&mut self) {
        self.stats.record_failure();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::Listener;

    #[test]
    fn test_registry_dedups_same_listener() {
        let (listener, _rx) = Listener::channel();
        let mut registry = Registry::new();

        assert!(registry.admit("a", Some(listener.id()), 0).is_some());
        assert!(registry.admit("a", Some(listener.id()), 0).is_none());
        assert!(registry.admit("b", Some(listener.id()), 0).is_some());
    }

    #[test]
    fn test_registry_absent_listener_matches_any() {
        let (l1, _r1) = Listener::channel();
        let (l2, _r2) = Listener::channel();
        let mut registry = Registry::new();

        assert!(registry.admit("a", Some(l1.id()), 0).is_some());
        assert!(registry.admit("a", Some(l2.id()), 0).is_some());
        assert!(registry.admit("a", None, 0).is_none());

        let mut registry = Registry::new();
        assert!(registry.admit("a", None, 0).is_some());
        assert!(registry.admit("a", Some(l1.id()), 0).is_none());
    }

    #[test]
    fn test_registry_retire_reports_idleness() {
        let (listener, _rx) = Listener::channel();
        let mut registry = Registry::new();
        let first = registry.admit("a", Some(listener.id()), 0).unwrap();
        let second = registry.admit("b", Some(listener.id()), 0).unwrap();
        let other = registry.admit("c", None, 0).unwrap();

        assert_eq!(
            registry.retire(first),
            Retired {
                listener_idle: false,
                all_idle: false
            }
        );
        assert_eq!(
            registry.retire(second),
            Retired {
                listener_idle: true,
                all_idle: false
            }
        );
        assert_eq!(
            registry.retire(other),
            Retired {
                listener_idle: false,
                all_idle: true
            }
        );
        assert!(!registry.is_busy());
    }

    #[test]
    fn test_registry_priority_bookkeeping() {
        let mut registry = Registry::new();
        assert_eq!(registry.above_max_priority(), 1);
        assert_eq!(registry.below_min_priority(), -1);

        registry.admit("a", None, 7);
        registry.admit("b", None, -3);
        assert_eq!(registry.above_max_priority(), 8);
        assert_eq!(registry.below_min_priority(), -4);
    }

    #[test]
    fn test_registry_priority_survives_retirement() {
        let mut registry = Registry::new();
        let id = registry.admit("a", None, 9).unwrap();
        registry.retire(id);
        assert_eq!(registry.above_max_priority(), 10);
    }
}
