//! Fixed-capacity cache with counter-based LRU eviction.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::trace;

/// Slots in a cache built with [`DrawableCache::default`].
pub const DEFAULT_DRAWABLE_CAPACITY: usize = 80;

/// Size component meaning "no particular size requested".
pub const UNSPECIFIED: u32 = 0;

/// Identity of a cached image: the resource plus the box it was fitted to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DrawableKey {
    pub content_id: String,
    pub max_width: u32,
    pub max_height: u32,
}

impl DrawableKey {
    pub fn new(content_id: impl Into<String>, max_width: u32, max_height: u32) -> Self {
        Self {
            content_id: content_id.into(),
            max_width,
            max_height,
        }
    }

    /// Key for the image at its natural size.
    pub fn natural(content_id: impl Into<String>) -> Self {
        Self::new(content_id, UNSPECIFIED, UNSPECIFIED)
    }
}

struct Entry<T> {
    key: DrawableKey,
    payload: T,
}

struct CacheState<T> {
    slots: Vec<Option<Entry<T>>>,
    /// Parallel to `slots`; empty slots stay at 0 so they are reused first.
    delete_priority: Vec<u64>,
    positions: HashMap<DrawableKey, usize>,
    counter: u64,
    hits: u64,
    misses: u64,
}

impl<T> CacheState<T> {
    fn empty(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            delete_priority: vec![0; capacity],
            positions: HashMap::with_capacity(capacity),
            counter: 0,
            hits: 0,
            misses: 0,
        }
    }

    fn touch(&mut self, position: usize) {
        self.counter += 1;
        self.delete_priority[position] = self.counter;
    }

    /// Slot with the smallest delete priority; first one wins ties.
    fn victim(&self) -> usize {
        self.delete_priority
            .iter()
            .enumerate()
            .min_by_key(|(_, priority)| **priority)
            .map(|(position, _)| position)
            .unwrap_or(0)
    }
}

/// Thread-safe cache of decoded images.
///
/// Every hit or insert stamps the entry with the next value of a running
/// counter. When a new entry needs room, the entry with the smallest stamp
/// (least recently touched) is evicted. Eviction scans all slots, which is
/// cheap at the capacities this is meant for.
pub struct DrawableCache<T> {
    state: Mutex<CacheState<T>>,
    capacity: usize,
}

impl<T: Clone> DrawableCache<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(CacheState::empty(capacity)),
            capacity,
        }
    }

    /// Fetch an entry and mark it most recently used.
    pub fn lookup(&self, content_id: &str, max_width: u32, max_height: u32) -> Option<T> {
        self.lookup_key(&DrawableKey::new(content_id, max_width, max_height))
    }

    pub fn lookup_key(&self, key: &DrawableKey) -> Option<T> {
        let mut state = self.state.lock().unwrap();
        let Some(&position) = state.positions.get(key) else {
            state.misses += 1;
            return None;
        };
        state.hits += 1;
        state.touch(position);
        state.slots[position].as_ref().map(|entry| entry.payload.clone())
    }

    /// Add an entry unless one with the same key exists.
    ///
    /// Returns `false` when the key was already cached; the existing payload
    /// is kept.
    pub fn insert(&self, payload: T, content_id: &str, max_width: u32, max_height: u32) -> bool {
        self.insert_key(payload, DrawableKey::new(content_id, max_width, max_height))
    }

    pub fn insert_key(&self, payload: T, key: DrawableKey) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.positions.contains_key(&key) {
            return false;
        }

        let position = state.victim();
        if let Some(evicted) = state.slots[position].take() {
            trace!(content_id = %evicted.key.content_id, "Evicting cached drawable");
            state.positions.remove(&evicted.key);
        }
        state.positions.insert(key.clone(), position);
        state.slots[position] = Some(Entry { key, payload });
        state.touch(position);
        true
    }

    pub fn contains(&self, content_id: &str, max_width: u32, max_height: u32) -> bool {
        let key = DrawableKey::new(content_id, max_width, max_height);
        self.state.lock().unwrap().positions.contains_key(&key)
    }

    /// Empty every slot and restart the priority counter.
    pub fn clear(&self) {
        *self.state.lock().unwrap() = CacheState::empty(self.capacity);
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Hit rate (0.0 to 1.0) since creation or the last clear.
    pub fn hit_rate(&self) -> f64 {
        let state = self.state.lock().unwrap();
        let total = state.hits + state.misses;
        if total == 0 {
            0.0
        } else {
            state.hits as f64 / total as f64
        }
    }
}

impl<T: Clone> Default for DrawableCache<T> {
    fn default() -> Self {
        Self::new(DEFAULT_DRAWABLE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drawable_cache_hit_and_miss() {
        let cache = DrawableCache::new(4);
        assert!(cache.insert("payload", "a", 10, 20));

        assert_eq!(cache.lookup("a", 10, 20), Some("payload"));
        assert_eq!(cache.lookup("a", 10, 21), None);
        assert_eq!(cache.lookup("b", 10, 20), None);
        assert_eq!(cache.hit_rate(), 1.0 / 3.0);
    }

    #[test]
    fn test_drawable_cache_first_writer_wins() {
        let cache = DrawableCache::new(4);
        assert!(cache.insert(1, "a", 0, 0));
        assert!(!cache.insert(2, "a", 0, 0));

        assert_eq!(cache.lookup("a", 0, 0), Some(1));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_drawable_cache_size_is_part_of_key() {
        let cache = DrawableCache::new(4);
        cache.insert("small", "a", 32, 32);
        cache.insert("large", "a", 256, 256);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.lookup("a", 32, 32), Some("small"));
        assert_eq!(cache.lookup_key(&DrawableKey::natural("a")), None);
    }

    #[test]
    fn test_drawable_cache_evicts_least_recently_touched() {
        let cache = DrawableCache::new(3);
        cache.insert("a", "a", 0, 0);
        cache.insert("b", "b", 0, 0);
        cache.insert("c", "c", 0, 0);

        cache.insert("d", "d", 0, 0);

        assert!(!cache.contains("a", 0, 0));
        assert!(cache.contains("b", 0, 0));
        assert!(cache.contains("d", 0, 0));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_drawable_cache_lookup_protects_from_eviction() {
        let cache = DrawableCache::new(3);
        cache.insert("a", "a", 0, 0);
        cache.insert("b", "b", 0, 0);
        cache.insert("c", "c", 0, 0);

        assert_eq!(cache.lookup("a", 0, 0), Some("a"));
        cache.insert("d", "d", 0, 0);

        assert!(cache.contains("a", 0, 0));
        assert!(!cache.contains("b", 0, 0));
    }

    #[test]
    fn test_drawable_cache_clear_resets() {
        let cache = DrawableCache::new(2);
        cache.insert("a", "a", 0, 0);
        cache.insert("b", "b", 0, 0);
        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.lookup("a", 0, 0), None);
        assert!(cache.insert("c", "c", 0, 0));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_drawable_cache_default_capacity() {
        let cache: DrawableCache<u8> = DrawableCache::default();
        assert_eq!(cache.capacity(), 80);
    }
}
