//! Pooled fixed-size byte buffers for download payloads.
//!
//! Downloads read into [`MemorySlot`]s of [`SLOT_SIZE`] bytes handed out by a
//! [`MemoryPool`]. The pool grows on demand and never blocks; slots come back
//! through [`MemoryPool::release_all`] or, more commonly, when the owning
//! [`SlotChain`] is dropped. [`MemoryPool::shrink_to_minimum`] trims free slots
//! back to a floor once the coordinator goes idle.
//!
//! A slot is owned by exactly one holder at a time: either it sits on the
//! pool's free list or it has been moved out to a caller. There is no way to
//! read a slot that the pool considers free.

use std::io::{self, Read, Write};
use std::sync::Mutex;

use tracing::debug;

/// Size of one pooled buffer in bytes.
pub const SLOT_SIZE: usize = 10_000;

/// Number of slots kept around after trimming.
pub const DEFAULT_MIN_SLOTS: usize = 10;

// =============================================================================
// MemorySlot
// =============================================================================

/// A fixed-size reusable buffer issued by a [`MemoryPool`].
pub struct MemorySlot {
    buffer: Box<[u8]>,
    used: usize,
}

impl MemorySlot {
    fn new() -> Self {
        Self {
            buffer: vec![0u8; SLOT_SIZE].into_boxed_slice(),
            used: 0,
        }
    }

    /// The bytes written into this slot so far.
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.used]
    }

    /// Mutable view of the written bytes.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[..self.used]
    }

    pub fn len(&self) -> usize {
        self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    pub fn is_full(&self) -> bool {
        self.used == self.buffer.len()
    }

    fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[self.used..]
    }

    fn reset(&mut self) {
        self.used = 0;
    }
}

impl std::fmt::Debug for MemorySlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySlot")
            .field("used", &self.used)
            .finish()
    }
}

// =============================================================================
// MemoryPool
// =============================================================================

struct PoolState {
    free: Vec<MemorySlot>,
    allocated: usize,
    peak_allocated: usize,
}

/// Grow-on-demand pool of [`MemorySlot`]s.
pub struct MemoryPool {
    state: Mutex<PoolState>,
    min_slots: usize,
}

impl MemoryPool {
    /// Create a pool pre-filled with `min_slots` free slots.
    pub fn new(min_slots: usize) -> Self {
        let free = (0..min_slots).map(|_| MemorySlot::new()).collect();
        Self {
            state: Mutex::new(PoolState {
                free,
                allocated: 0,
                peak_allocated: 0,
            }),
            min_slots,
        }
    }

    /// Take a slot, allocating a new one if none are free.
    pub fn acquire(&self) -> MemorySlot {
        let mut state = self.state.lock().unwrap();
        let slot = state.free.pop().unwrap_or_else(MemorySlot::new);
        state.allocated += 1;
        state.peak_allocated = state.peak_allocated.max(state.allocated);
        slot
    }

    /// Return slots to the free list.
    pub fn release_all(&self, slots: impl IntoIterator<Item = MemorySlot>) {
        let mut state = self.state.lock().unwrap();
        for mut slot in slots {
            slot.reset();
            state.free.push(slot);
            state.allocated = state.allocated.saturating_sub(1);
        }
    }

    /// Drop free slots until the pool holds at most `min_slots` in total.
    ///
    /// Slots currently handed out are never touched, so the pool can stay
    /// above the floor while work is in flight.
    pub fn shrink_to_minimum(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        let mut removed = 0;
        while state.free.len() + state.allocated > self.min_slots && state.free.pop().is_some() {
            removed += 1;
        }
        if removed > 0 {
            debug!(
                removed,
                remaining = state.free.len() + state.allocated,
                "Memory pool trimmed"
            );
        }
        removed
    }

    /// Slots currently held by callers.
    pub fn allocated_count(&self) -> usize {
        self.state.lock().unwrap().allocated
    }

    /// Slots sitting on the free list.
    pub fn free_count(&self) -> usize {
        self.state.lock().unwrap().free.len()
    }

    /// All slots owned by the pool, free or handed out.
    pub fn total_slots(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.free.len() + state.allocated
    }

    /// Highest number of simultaneously held slots since creation.
    pub fn peak_allocated(&self) -> usize {
        self.state.lock().unwrap().peak_allocated
    }

    pub fn min_slots(&self) -> usize {
        self.min_slots
    }
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_SLOTS)
    }
}

// =============================================================================
// SlotChain
// =============================================================================

/// An ordered run of slots holding one payload.
///
/// Every slot is full except possibly the last one, so slot `i` covers bytes
/// `i * SLOT_SIZE ..` of the payload. Dropping the chain hands all slots back
/// to the pool.
pub struct SlotChain<'a> {
    pool: &'a MemoryPool,
    slots: Vec<MemorySlot>,
    len: usize,
}

impl<'a> SlotChain<'a> {
    pub fn new(pool: &'a MemoryPool) -> Self {
        Self {
            pool,
            slots: Vec::new(),
            len: 0,
        }
    }

    /// Read the next batch of bytes from `reader` into the chain.
    ///
    /// Returns the number of bytes read; `0` means the reader is exhausted.
    pub fn fill_from<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<usize> {
        if self.slots.last().is_none_or(MemorySlot::is_full) {
            self.slots.push(self.pool.acquire());
        }
        let Some(slot) = self.slots.last_mut() else {
            return Ok(0);
        };

        let n = loop {
            match reader.read(slot.spare_mut()) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };
        slot.used += n;
        self.len += n;
        Ok(n)
    }

    /// Write every held byte to `writer`, then give the slots back.
    pub fn flush_to<W: Write + ?Sized>(&mut self, writer: &mut W) -> io::Result<()> {
        for slot in &self.slots {
            writer.write_all(slot.data())?;
        }
        self.release();
        Ok(())
    }

    /// Give every slot back to the pool and reset the length.
    pub fn release(&mut self) {
        self.pool.release_all(self.slots.drain(..));
        self.len = 0;
    }

    pub fn slots(&self) -> &[MemorySlot] {
        &self.slots
    }

    pub fn slots_mut(&mut self) -> &mut [MemorySlot] {
        &mut self.slots
    }

    /// Total payload bytes currently held.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy the payload into one contiguous buffer.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for slot in &self.slots {
            out.extend_from_slice(slot.data());
        }
        out
    }
}

impl Drop for SlotChain<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_pool_starts_with_floor() {
        let pool = MemoryPool::new(10);
        assert_eq!(pool.total_slots(), 10);
        assert_eq!(pool.free_count(), 10);
        assert_eq!(pool.allocated_count(), 0);
    }

    #[test]
    fn test_pool_acquire_grows_on_demand() {
        let pool = MemoryPool::new(2);
        let slots: Vec<_> = (0..5).map(|_| pool.acquire()).collect();

        assert_eq!(pool.allocated_count(), 5);
        assert_eq!(pool.total_slots(), 5);
        assert_eq!(pool.peak_allocated(), 5);

        pool.release_all(slots);
        assert_eq!(pool.allocated_count(), 0);
        assert_eq!(pool.free_count(), 5);
    }

    #[test]
    fn test_pool_shrink_respects_floor() {
        let pool = MemoryPool::new(3);
        let slots: Vec<_> = (0..8).map(|_| pool.acquire()).collect();
        pool.release_all(slots);

        assert_eq!(pool.shrink_to_minimum(), 5);
        assert_eq!(pool.total_slots(), 3);
        assert_eq!(pool.shrink_to_minimum(), 0);
    }

    #[test]
    fn test_pool_shrink_keeps_held_slots() {
        let pool = MemoryPool::new(2);
        let held: Vec<_> = (0..4).map(|_| pool.acquire()).collect();
        let extra = pool.acquire();
        pool.release_all([extra]);

        pool.shrink_to_minimum();
        assert_eq!(pool.allocated_count(), 4);
        assert_eq!(pool.free_count(), 0);

        pool.release_all(held);
    }

    #[test]
    fn test_released_slot_is_reset() {
        let pool = MemoryPool::new(0);
        let mut chain = SlotChain::new(&pool);
        chain.fill_from(&mut Cursor::new(vec![7u8; 10])).unwrap();
        drop(chain);

        let slot = pool.acquire();
        assert!(slot.is_empty());
        pool.release_all([slot]);
    }

    #[test]
    fn test_slot_chain_fills_slots_in_order() {
        let pool = MemoryPool::new(0);
        let payload: Vec<u8> = (0..25_000u32).map(|i| (i % 251) as u8).collect();
        let mut reader = Cursor::new(payload.clone());

        let mut chain = SlotChain::new(&pool);
        while chain.fill_from(&mut reader).unwrap() > 0 {}

        assert_eq!(chain.len(), payload.len());
        assert_eq!(chain.slots().len(), 3);
        assert!(chain.slots()[0].is_full());
        assert!(chain.slots()[1].is_full());
        assert_eq!(chain.slots()[2].len(), 5_000);
        assert_eq!(chain.to_vec(), payload);
    }

    #[test]
    fn test_slot_chain_releases_on_drop() {
        let pool = MemoryPool::new(0);
        {
            let mut chain = SlotChain::new(&pool);
            chain.fill_from(&mut Cursor::new(vec![1u8; 30_000])).unwrap();
            chain.fill_from(&mut Cursor::new(vec![1u8; 30_000])).unwrap();
            assert!(pool.allocated_count() > 0);
        }
        assert_eq!(pool.allocated_count(), 0);
    }

    #[test]
    fn test_slot_chain_flush_releases_slots() {
        let pool = MemoryPool::new(0);
        let mut reader = Cursor::new(vec![3u8; 12_345]);
        let mut chain = SlotChain::new(&pool);
        while chain.fill_from(&mut reader).unwrap() > 0 {}

        let mut sink = Vec::new();
        chain.flush_to(&mut sink).unwrap();

        assert_eq!(sink.len(), 12_345);
        assert!(chain.is_empty());
        assert_eq!(pool.allocated_count(), 0);
    }
}
