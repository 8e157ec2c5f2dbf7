//! Session Reader Cache
//!
//! Sequential scans (fetching stored fields for a whole result set) hit the
//! same store file over and over with ascending offsets. A per-(session,
//! store) buffered reader turns those into large sequential reads; readers
//! live in one process-wide table so closing a session or a store can drop
//! exactly its readers.
//!
//! A reader is created only when buffering can actually help:
//! - buffer = `clamp(8 × block_size, 256 KiB, 1 MiB)`
//! - the buffer must be strictly larger than one block
//! - the global budget of 8 MiB across all readers must have room
//!
//! Otherwise `get` finds nothing and callers fall back to positional reads
//! on the shared descriptor.
//!
//! A session reader is single-consumer by contract; the per-reader mutex
//! only enforces memory safety, not ordering.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Process-unique session identifier
pub type SessionId = u64;

pub(crate) const MIN_READER_BUFFER: usize = 256 * 1024;
pub(crate) const MAX_READER_BUFFER: usize = 1024 * 1024;
pub(crate) const TOTAL_READER_BUDGET: usize = 8 * 1024 * 1024;

/// Buffered reader over a store file that keeps its buffer across
/// nearby seeks
pub(crate) struct SessionReader {
    inner: BufReader<File>,
    /// Logical stream position after the last read
    pos: u64,
    buffer_size: usize,
}

impl SessionReader {
    fn new(file: File, buffer_size: usize) -> Self {
        Self {
            inner: BufReader::with_capacity(buffer_size, file),
            pos: 0,
            buffer_size,
        }
    }

    /// Read exactly `buf.len()` bytes at `offset`.
    ///
    /// Relative seeking keeps the internal buffer when the target is
    /// already buffered, which is the common case for ascending reads.
    pub fn read_at(&mut self, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
        let delta = offset as i64 - self.pos as i64;
        self.inner.seek_relative(delta)?;
        self.inner.read_exact(buf)?;
        self.pos = offset + buf.len() as u64;
        Ok(())
    }
}

type ReaderKey = (SessionId, u32);

#[derive(Default)]
struct ReaderCacheInner {
    readers: HashMap<ReaderKey, Arc<Mutex<SessionReader>>>,
    total_size: usize,
}

/// Table of buffered readers keyed by `(session, store)`
#[derive(Default)]
pub struct ReaderCache {
    inner: Mutex<ReaderCacheInner>,
}

impl ReaderCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Create a buffered reader for `(session, store)` if buffering pays
    /// off and the budget allows. A no-op otherwise.
    pub(crate) fn create(
        &self,
        session_id: SessionId,
        store_uid: u32,
        file: &File,
        block_size: u32,
    ) -> std::io::Result<()> {
        let buffer_size =
            (8 * block_size as usize).clamp(MIN_READER_BUFFER, MAX_READER_BUFFER);

        if buffer_size <= block_size as usize {
            return Ok(());
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.total_size + buffer_size > TOTAL_READER_BUDGET {
            debug!(session_id, store_uid, "reader budget exhausted");
            return Ok(());
        }
        if inner.readers.contains_key(&(session_id, store_uid)) {
            return Ok(());
        }

        let reader = SessionReader::new(file.try_clone()?, buffer_size);
        inner
            .readers
            .insert((session_id, store_uid), Arc::new(Mutex::new(reader)));
        inner.total_size += buffer_size;

        Ok(())
    }

    pub(crate) fn get(
        &self,
        session_id: SessionId,
        store_uid: u32,
    ) -> Option<Arc<Mutex<SessionReader>>> {
        self.inner
            .lock()
            .unwrap()
            .readers
            .get(&(session_id, store_uid))
            .cloned()
    }

    /// Drop every reader belonging to a session
    pub(crate) fn evict_session(&self, session_id: SessionId) {
        let mut inner = self.inner.lock().unwrap();
        let removed: Vec<ReaderKey> = inner
            .readers
            .keys()
            .filter(|(session, _)| *session == session_id)
            .copied()
            .collect();
        for key in removed {
            if let Some(reader) = inner.readers.remove(&key) {
                inner.total_size -= reader.lock().unwrap().buffer_size;
            }
        }
    }

    /// Drop every reader belonging to a store
    pub(crate) fn evict_store(&self, store_uid: u32) {
        let mut inner = self.inner.lock().unwrap();
        let removed: Vec<ReaderKey> = inner
            .readers
            .keys()
            .filter(|(_, uid)| *uid == store_uid)
            .copied()
            .collect();
        for key in removed {
            if let Some(reader) = inner.readers.remove(&key) {
                inner.total_size -= reader.lock().unwrap().buffer_size;
            }
        }
    }

    /// Total buffer bytes currently allocated
    pub fn total_buffered(&self) -> usize {
        self.inner.lock().unwrap().total_size
    }

    pub fn reader_count(&self) -> usize {
        self.inner.lock().unwrap().readers.len()
    }

    /// Number of readers attached to one store
    pub fn readers_for_store(&self, store_uid: u32) -> usize {
        self.inner
            .lock()
            .unwrap()
            .readers
            .keys()
            .filter(|(_, uid)| *uid == store_uid)
            .count()
    }
}
