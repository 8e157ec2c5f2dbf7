//! Docstore Context and Sessions
//!
//! One [`DocstoreContext`] per process owns the shared state every store
//! hangs off: the block cache, the session-reader table and the UID
//! generators for stores and sessions. The handle is cheap to clone
//! (`Arc` inside) and is threaded into builders and readers instead of
//! living in globals; dropping the last clone tears everything down.
//!
//! A [`Session`] scopes buffered readers. Dropping it evicts the readers it
//! created across all stores.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::block_cache::BlockCache;
use crate::reader_cache::{ReaderCache, SessionId};

struct ContextInner {
    block_cache: Option<BlockCache>,
    readers: ReaderCache,
    store_uids: AtomicU32,
    session_uids: AtomicU64,
}

/// Shared handle to the process-wide docstore state
#[derive(Clone)]
pub struct DocstoreContext {
    inner: Arc<ContextInner>,
}

impl DocstoreContext {
    /// Create a context with a block cache of `cache_size` bytes;
    /// `0` disables block caching entirely.
    pub fn new(cache_size: usize) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                block_cache: (cache_size > 0).then(|| BlockCache::new(cache_size)),
                readers: ReaderCache::new(),
                store_uids: AtomicU32::new(0),
                session_uids: AtomicU64::new(0),
            }),
        }
    }

    pub fn block_cache(&self) -> Option<&BlockCache> {
        self.inner.block_cache.as_ref()
    }

    pub fn reader_cache(&self) -> &ReaderCache {
        &self.inner.readers
    }

    pub(crate) fn next_store_uid(&self) -> u32 {
        self.inner.store_uids.fetch_add(1, Ordering::Relaxed)
    }

    /// Open a session; its buffered readers are evicted when it drops
    pub fn create_session(&self) -> Session {
        Session {
            id: self.inner.session_uids.fetch_add(1, Ordering::Relaxed) + 1,
            ctx: self.clone(),
        }
    }
}

/// Caller-scoped context that amortises I/O via buffered readers
pub struct Session {
    id: SessionId,
    ctx: DocstoreContext,
}

impl Session {
    pub fn id(&self) -> SessionId {
        self.id
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.ctx.reader_cache().evict_session(self.id);
    }
}
