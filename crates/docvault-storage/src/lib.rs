//! DocVault Storage
//!
//! A persistent, block-structured, compressed row store mapping a dense
//! RowID to a vector of per-field byte payloads. It backs the "return the
//! original field contents of a matched row" half of a search engine; it
//! indexes nothing itself.
//!
//! Build side:
//! ```ignore
//! let mut builder = DocstoreBuilder::create("idx.docstore", StoreSettings::default())?;
//! builder.add_field("title", FieldType::Text);
//! builder.add_field("body", FieldType::Text);
//! for (row_id, doc) in docs {
//!     builder.add_doc(row_id, &doc)?;
//! }
//! builder.finalize()?;
//! ```
//!
//! Read side:
//! ```ignore
//! let ctx = DocstoreContext::new(256 * 1024 * 1024);
//! let store = Docstore::open("idx.docstore", &ctx)?;
//! let session = ctx.create_session();
//! store.create_reader(session.id())?;
//! let doc = store.get_doc(row_id, None, session.id(), false)?;
//! ```

pub mod block;
pub mod block_cache;
pub mod builder;
pub mod codec;
pub mod context;
pub mod memstore;
pub mod reader_cache;
pub mod store;

pub use block::BlockType;
pub use block_cache::{BlockCache, BlockHandle, CachedBlock};
pub use builder::DocstoreBuilder;
pub use codec::Codec;
pub use context::{DocstoreContext, Session};
pub use memstore::MemStore;
pub use reader_cache::{ReaderCache, SessionId};
pub use store::Docstore;

use docvault_core::{Document, FieldType, Result, RowId, StoreSettings};

/// A store of either kind behind one dispatch point.
///
/// The persistent variant is read-only; the in-memory variant additionally
/// offers its append/load/save operations on the concrete [`MemStore`].
pub enum AnyDocstore {
    Persistent(Docstore),
    Memory(MemStore),
}

impl AnyDocstore {
    pub fn get_doc(
        &self,
        row_id: RowId,
        field_ids: Option<&[usize]>,
        session_id: SessionId,
        pack: bool,
    ) -> Result<Document> {
        match self {
            AnyDocstore::Persistent(store) => store.get_doc(row_id, field_ids, session_id, pack),
            AnyDocstore::Memory(store) => store.get_doc(row_id, field_ids, session_id, pack),
        }
    }

    pub fn field_id(&self, name: &str, field_type: FieldType) -> Option<usize> {
        match self {
            AnyDocstore::Persistent(store) => store.field_id(name, field_type),
            AnyDocstore::Memory(store) => store.field_id(name, field_type),
        }
    }

    /// Build settings; the in-memory variant has none
    pub fn settings(&self) -> Option<&StoreSettings> {
        match self {
            AnyDocstore::Persistent(store) => Some(store.settings()),
            AnyDocstore::Memory(_) => None,
        }
    }

    /// Attach a session reader; a no-op for the in-memory variant
    pub fn create_reader(&self, session_id: SessionId) -> Result<()> {
        match self {
            AnyDocstore::Persistent(store) => store.create_reader(session_id),
            AnyDocstore::Memory(_) => Ok(()),
        }
    }
}
