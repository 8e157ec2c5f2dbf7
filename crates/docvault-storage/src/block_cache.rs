//! Shared Block Cache with LRU Eviction and Pinning
//!
//! A process-wide, size-bounded cache of decompressed small blocks and
//! big-block fields, shared by every store opened under one
//! [`DocstoreContext`](crate::DocstoreContext). Entries are keyed by
//! `(store_uid, file_offset)`, so closing a store can evict everything it
//! owns in one pass.
//!
//! ## Structure
//!
//! A slab of entries (`Vec<Option<Entry>>` plus a free list) carries the LRU
//! links as slot indices, and a hash map resolves keys to slots. Slots never
//! move, so the list can be rewired without touching payloads.
//!
//! ## Pinning
//!
//! `find` and `add` return a [`BlockHandle`] that increments the entry's
//! reference count; dropping the handle decrements it without taking the
//! cache lock. The sweep that makes room for new entries walks from the LRU
//! tail and skips any entry whose count is non-zero, so a reader holding a
//! handle can trigger further cache traffic without losing the block it is
//! parsing.
//!
//! ## Capacity
//!
//! `mem_used` counts payload bytes plus a fixed per-entry overhead and never
//! exceeds the configured capacity. A single entry larger than
//! `capacity / 64` is refused outright — `add` returns `None`, the caller
//! keeps its locally owned copy, and cache state is unchanged.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Bookkeeping bytes charged per entry on top of the payload
const ENTRY_OVERHEAD: usize = 64;

/// A decompressed small-block body or big-block field
#[derive(Debug)]
pub struct CachedBlock {
    pub flags: u8,
    pub num_docs: u32,
    pub data: Bytes,
}

impl CachedBlock {
    fn size(&self) -> usize {
        self.data.len()
    }
}

type CacheKey = (u32, u64);

struct Entry {
    key: CacheKey,
    payload: Arc<CachedBlock>,
    refs: Arc<AtomicI32>,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Pinned view of a cached block.
///
/// Holding the handle keeps the entry off the eviction sweep; dropping it
/// releases the pin. The payload bytes must not be mutated while any handle
/// exists, which `Bytes` guarantees.
pub struct BlockHandle {
    payload: Arc<CachedBlock>,
    refs: Arc<AtomicI32>,
}

impl BlockHandle {
    pub fn payload(&self) -> Arc<CachedBlock> {
        Arc::clone(&self.payload)
    }
}

impl std::ops::Deref for BlockHandle {
    type Target = CachedBlock;

    fn deref(&self) -> &CachedBlock {
        &self.payload
    }
}

impl Drop for BlockHandle {
    fn drop(&mut self) {
        let prev = self.refs.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "cache handle released more than once");
    }
}

#[derive(Default)]
struct CacheInner {
    slots: Vec<Option<Entry>>,
    free: Vec<usize>,
    map: HashMap<CacheKey, usize>,
    head: Option<usize>,
    tail: Option<usize>,
    mem_used: usize,
}

/// Process-wide cache of decompressed blocks
pub struct BlockCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
}

impl BlockCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Look up a block, pinning it and marking it most recently used
    pub fn find(&self, store_uid: u32, offset: u64) -> Option<BlockHandle> {
        let mut inner = self.inner.lock().unwrap();

        let slot = *inner.map.get(&(store_uid, offset))?;
        inner.unlink(slot);
        inner.link_front(slot);

        let entry = inner.slots[slot].as_ref().expect("mapped slot is live");
        entry.refs.fetch_add(1, Ordering::SeqCst);
        Some(BlockHandle {
            payload: Arc::clone(&entry.payload),
            refs: Arc::clone(&entry.refs),
        })
    }

    /// Insert a block and return a pinned handle, or `None` when the entry
    /// is oversized or no room can be swept free. Cache state is unchanged
    /// on refusal; the caller keeps using its own copy.
    pub fn add(
        &self,
        store_uid: u32,
        offset: u64,
        payload: Arc<CachedBlock>,
    ) -> Option<BlockHandle> {
        let needed = payload.size() + ENTRY_OVERHEAD;
        let mut inner = self.inner.lock().unwrap();

        // two readers can miss concurrently and race to insert the same
        // block; the loser pins the winner's entry instead
        if let Some(&slot) = inner.map.get(&(store_uid, offset)) {
            inner.unlink(slot);
            inner.link_front(slot);
            let entry = inner.slots[slot].as_ref().expect("mapped slot is live");
            entry.refs.fetch_add(1, Ordering::SeqCst);
            return Some(BlockHandle {
                payload: Arc::clone(&entry.payload),
                refs: Arc::clone(&entry.refs),
            });
        }

        if inner.mem_used + needed > self.capacity {
            if needed > self.capacity / 64 {
                warn!(
                    size = payload.size(),
                    capacity = self.capacity,
                    "block too large to cache"
                );
                return None;
            }

            inner.sweep_unused(needed, self.capacity);
            if inner.mem_used + needed > self.capacity {
                return None;
            }
        }

        let refs = Arc::new(AtomicI32::new(1));
        let entry = Entry {
            key: (store_uid, offset),
            payload: Arc::clone(&payload),
            refs: Arc::clone(&refs),
            prev: None,
            next: None,
        };

        let slot = match inner.free.pop() {
            Some(slot) => {
                inner.slots[slot] = Some(entry);
                slot
            }
            None => {
                inner.slots.push(Some(entry));
                inner.slots.len() - 1
            }
        };

        inner.map.insert((store_uid, offset), slot);
        inner.link_front(slot);
        inner.mem_used += needed;

        Some(BlockHandle { payload, refs })
    }

    /// Drop every entry owned by a store. The caller guarantees none are
    /// pinned.
    pub fn evict_store(&self, store_uid: u32) {
        let mut inner = self.inner.lock().unwrap();

        let mut cursor = inner.head;
        while let Some(slot) = cursor {
            let entry = inner.slots[slot].as_ref().expect("linked slot is live");
            cursor = entry.next;
            if entry.key.0 == store_uid {
                debug_assert_eq!(
                    entry.refs.load(Ordering::SeqCst),
                    0,
                    "evicting a pinned block"
                );
                inner.remove(slot);
            }
        }

        debug!(store_uid, "evicted store from block cache");
    }

    /// Bytes currently accounted against capacity
    pub fn mem_used(&self) -> usize {
        self.inner.lock().unwrap().mem_used
    }

    pub fn entry_count(&self) -> usize {
        self.inner.lock().unwrap().map.len()
    }

    /// Number of resident entries owned by one store
    pub fn entries_for_store(&self, store_uid: u32) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.map.keys().filter(|(uid, _)| *uid == store_uid).count()
    }

    /// Whether a key is resident, without touching LRU order
    pub fn contains(&self, store_uid: u32, offset: u64) -> bool {
        self.inner
            .lock()
            .unwrap()
            .map
            .contains_key(&(store_uid, offset))
    }
}

impl CacheInner {
    fn link_front(&mut self, slot: usize) {
        let old_head = self.head;
        {
            let entry = self.slots[slot].as_mut().expect("slot is live");
            entry.prev = None;
            entry.next = old_head;
        }
        if let Some(old_head) = old_head {
            self.slots[old_head].as_mut().expect("head is live").prev = Some(slot);
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = {
            let entry = self.slots[slot].as_mut().expect("slot is live");
            let links = (entry.prev, entry.next);
            entry.prev = None;
            entry.next = None;
            links
        };

        match prev {
            Some(prev_slot) => {
                self.slots[prev_slot].as_mut().expect("linked slot").next = next
            }
            None => self.head = next,
        }
        match next {
            Some(next_slot) => {
                self.slots[next_slot].as_mut().expect("linked slot").prev = prev
            }
            None => self.tail = prev,
        }
    }

    fn remove(&mut self, slot: usize) {
        self.unlink(slot);
        let entry = self.slots[slot].take().expect("slot is live");
        self.map.remove(&entry.key);
        self.mem_used -= entry.payload.size() + ENTRY_OVERHEAD;
        self.free.push(slot);
    }

    /// Walk from the LRU tail, freeing unpinned entries until `needed`
    /// bytes fit
    fn sweep_unused(&mut self, needed: usize, capacity: usize) {
        let mut cursor = self.tail;
        while let Some(slot) = cursor {
            if self.mem_used + needed <= capacity {
                return;
            }
            let entry = self.slots[slot].as_ref().expect("linked slot is live");
            cursor = entry.prev;
            if entry.refs.load(Ordering::SeqCst) == 0 {
                debug!(uid = entry.key.0, offset = entry.key.1, "evicting block");
                self.remove(slot);
            }
        }
    }
}
