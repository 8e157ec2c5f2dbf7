//! In-Memory Docstore
//!
//! Holds newly ingested rows that have not been persisted yet. The logical
//! row/field model matches the persistent store, but the layout is a dense
//! array indexed by RowID where each entry is one contiguous allocation:
//! per field, a varint length followed by the raw bytes.
//!
//! Rows can only be appended (`add_doc` requires `row_id == len`); mutation
//! of existing rows never happens. `save`/`load` round-trip the whole
//! structure as a linear stream, and the packed-doc operations move an
//! already-encoded blob in or out without reformatting (the segment merge
//! path). `allocated_bytes` reports heap use for ingestion accounting.

use bytes::BufMut;

use docvault_core::{varint, Doc, Document, Error, FieldType, Result, RowId, Schema};

use crate::reader_cache::SessionId;
use crate::store::write_field_payload;

/// Growable in-memory document store
#[derive(Default)]
pub struct MemStore {
    schema: Schema,
    docs: Vec<Option<Box<[u8]>>>,
    allocated: usize,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a field; must precede the first document
    pub fn add_field(&mut self, name: &str, field_type: FieldType) -> usize {
        debug_assert!(
            self.docs.is_empty(),
            "fields must be registered before any document"
        );
        self.schema.add_field(name, field_type)
    }

    pub fn field_id(&self, name: &str, field_type: FieldType) -> Option<usize> {
        self.schema.field_id(name, field_type)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Append a document; `row_id` must equal the current row count
    pub fn add_doc(&mut self, row_id: RowId, doc: &Doc) {
        debug_assert_eq!(
            row_id as usize,
            self.docs.len(),
            "rows must be appended densely"
        );
        debug_assert_eq!(doc.fields.len(), self.schema.len());

        let mut stored_lens = Vec::with_capacity(doc.fields.len());
        let mut packed_len = 0usize;
        for (i, field) in doc.fields.iter().enumerate() {
            let mut len = field.len();
            // strip at most one trailing NUL from text fields
            if self.schema.field(i).field_type == FieldType::Text
                && len > 0
                && field[len - 1] == 0
            {
                len -= 1;
            }
            packed_len += varint::encoded_len_u32(len as u32) + len;
            stored_lens.push(len);
        }

        let mut packed = Vec::with_capacity(packed_len);
        for (field, &len) in doc.fields.iter().zip(&stored_lens) {
            varint::encode_u32(&mut packed, len as u32);
            packed.put_slice(&field[..len]);
        }
        debug_assert_eq!(packed.len(), packed_len);

        self.docs.push(Some(packed.into_boxed_slice()));
        self.allocated += packed_len;
    }

    /// Fetch one document; same contract as the persistent reader
    pub fn get_doc(
        &self,
        row_id: RowId,
        field_ids: Option<&[usize]>,
        _session_id: SessionId,
        pack: bool,
    ) -> Result<Document> {
        debug_assert!(
            field_ids.map_or(true, |ids| ids.windows(2).all(|w| w[0] < w[1])),
            "field ids must be strictly ascending"
        );

        let Some(Some(packed)) = self.docs.get(row_id as usize) else {
            return Ok(Document::default());
        };

        let remap: Vec<Option<usize>> = match field_ids {
            None => (0..self.schema.len()).map(Some).collect(),
            Some(ids) => {
                let mut remap = vec![None; self.schema.len()];
                for (slot, &field) in ids.iter().enumerate() {
                    remap[field] = Some(slot);
                }
                remap
            }
        };
        let result_len = field_ids.map_or(self.schema.len(), |ids| ids.len());
        let mut fields = vec![Vec::new(); result_len];

        let mut cursor: &[u8] = packed;
        for field in 0..self.schema.len() {
            let len = varint::decode_u32(&mut cursor, "field length")? as usize;
            if cursor.len() < len {
                return Err(Error::Truncated("field payload"));
            }
            let (payload, tail) = cursor.split_at(len);
            cursor = tail;

            if let Some(slot) = remap[field] {
                let is_text = self.schema.field(field).field_type == FieldType::Text;
                write_field_payload(&mut fields[slot], payload, is_text, pack);
            }
        }

        Ok(Document::new(fields))
    }

    /// Append an already-packed blob, taking ownership without reformatting
    pub fn add_packed_doc(&mut self, row_id: RowId, packed: Box<[u8]>) {
        debug_assert_eq!(row_id as usize, self.docs.len());
        self.allocated += packed.len();
        self.docs.push(Some(packed));
    }

    /// Move a packed blob out; its row reads back as an empty document
    pub fn take_packed_doc(&mut self, row_id: RowId) -> Option<Box<[u8]>> {
        let taken = self.docs.get_mut(row_id as usize)?.take();
        if let Some(packed) = &taken {
            self.allocated -= packed.len();
        }
        taken
    }

    /// Heap bytes held by the store, including the row array itself
    pub fn allocated_bytes(&self) -> usize {
        self.allocated + self.docs.len() * std::mem::size_of::<Option<Box<[u8]>>>()
    }

    /// Serialise all rows as `varint count`, then per row
    /// `varint byte_len` + bytes
    pub fn save(&self, w: &mut impl std::io::Write) -> Result<()> {
        varint::write_u32(w, self.docs.len() as u32)?;
        for doc in &self.docs {
            let bytes: &[u8] = doc.as_deref().unwrap_or(&[]);
            varint::write_u32(w, bytes.len() as u32)?;
            w.write_all(bytes)?;
        }
        Ok(())
    }

    /// Load rows from a stream written by `save`; the store must be empty
    pub fn load(&mut self, r: &mut impl std::io::Read) -> Result<()> {
        debug_assert!(self.docs.is_empty() && self.allocated == 0);

        let count = varint::read_u32(r, "doc count")?;
        self.docs.reserve(count as usize);
        for _ in 0..count {
            let len = varint::read_u32(r, "doc length")? as usize;
            let mut bytes = vec![0u8; len];
            r.read_exact(&mut bytes)?;
            self.allocated += len;
            self.docs.push(Some(bytes.into_boxed_slice()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_store() -> MemStore {
        let mut store = MemStore::new();
        store.add_field("title", FieldType::Text);
        store.add_field("blob", FieldType::Binary);
        store.add_doc(0, &Doc::new(vec![b"first".as_ref(), b"\x01\x02".as_ref()]));
        store.add_doc(1, &Doc::new(vec![b"second".as_ref(), b"".as_ref()]));
        store
    }

    // ---------------------------------------------------------------
    // Append and fetch
    // ---------------------------------------------------------------

    #[test]
    fn test_roundtrip_all_fields() {
        let store = sample_store();

        let doc = store.get_doc(0, None, 0, false).unwrap();
        assert_eq!(doc.fields[0], b"first\0");
        assert_eq!(doc.fields[1], b"\x01\x02");

        let doc = store.get_doc(1, None, 0, false).unwrap();
        assert_eq!(doc.fields[0], b"second\0");
        assert!(doc.fields[1].is_empty());
    }

    #[test]
    fn test_subset_projection() {
        let store = sample_store();
        let doc = store.get_doc(0, Some(&[1]), 0, false).unwrap();
        assert_eq!(doc.fields.len(), 1);
        assert_eq!(doc.fields[0], b"\x01\x02");
    }

    #[test]
    fn test_packed_output() {
        let store = sample_store();
        let doc = store.get_doc(0, None, 0, true).unwrap();
        assert_eq!(doc.fields[0], b"\x05first");
    }

    #[test]
    fn test_unknown_rowid_returns_empty_document() {
        let store = sample_store();
        assert!(store.get_doc(10, None, 0, false).unwrap().fields.is_empty());
    }

    #[test]
    fn test_text_nul_stripped_on_input() {
        let mut store = MemStore::new();
        store.add_field("t", FieldType::Text);
        store.add_doc(0, &Doc::new(vec![b"abc\0".as_ref()]));

        // exactly one NUL back on unpacked output
        let doc = store.get_doc(0, None, 0, false).unwrap();
        assert_eq!(doc.fields[0], b"abc\0");

        // and none in the packed form
        let doc = store.get_doc(0, None, 0, true).unwrap();
        assert_eq!(doc.fields[0], b"\x03abc");
    }

    // ---------------------------------------------------------------
    // Packed-doc ownership transfer
    // ---------------------------------------------------------------

    #[test]
    fn test_take_and_readd_packed_doc() {
        let mut store = sample_store();
        let before = store.allocated_bytes();

        let packed = store.take_packed_doc(0).expect("row exists");
        assert!(store.allocated_bytes() < before);

        // the vacated row reads as empty
        assert!(store.get_doc(0, None, 0, false).unwrap().fields.is_empty());

        let mut other = MemStore::new();
        other.add_field("title", FieldType::Text);
        other.add_field("blob", FieldType::Binary);
        other.add_packed_doc(0, packed);

        let doc = other.get_doc(0, None, 0, false).unwrap();
        assert_eq!(doc.fields[0], b"first\0");
    }

    #[test]
    fn test_take_twice_returns_none() {
        let mut store = sample_store();
        assert!(store.take_packed_doc(0).is_some());
        assert!(store.take_packed_doc(0).is_none());
    }

    #[test]
    fn test_allocated_bytes_grows_with_docs() {
        let mut store = MemStore::new();
        store.add_field("t", FieldType::Text);
        let empty = store.allocated_bytes();

        store.add_doc(0, &Doc::new(vec![vec![b'x'; 1000].as_slice()]));
        assert!(store.allocated_bytes() > empty + 1000);
    }

    // ---------------------------------------------------------------
    // Save / load
    // ---------------------------------------------------------------

    #[test]
    fn test_save_load_roundtrip() {
        let store = sample_store();
        let mut bytes = Vec::new();
        store.save(&mut bytes).unwrap();

        let mut loaded = MemStore::new();
        loaded.add_field("title", FieldType::Text);
        loaded.add_field("blob", FieldType::Binary);
        loaded.load(&mut std::io::Cursor::new(&bytes)).unwrap();

        assert_eq!(loaded.len(), 2);
        for row in 0..2 {
            assert_eq!(
                loaded.get_doc(row, None, 0, false).unwrap(),
                store.get_doc(row, None, 0, false).unwrap()
            );
        }
    }

    #[test]
    fn test_save_load_stream_equality() {
        let store = sample_store();
        let mut first = Vec::new();
        store.save(&mut first).unwrap();

        let mut loaded = MemStore::new();
        loaded.add_field("title", FieldType::Text);
        loaded.add_field("blob", FieldType::Binary);
        loaded.load(&mut std::io::Cursor::new(&first)).unwrap();

        let mut second = Vec::new();
        loaded.save(&mut second).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_load_truncated_stream_is_error() {
        let mut bytes = Vec::new();
        sample_store().save(&mut bytes).unwrap();
        bytes.truncate(bytes.len() - 1);

        let mut loaded = MemStore::new();
        assert!(loaded.load(&mut std::io::Cursor::new(&bytes)).is_err());
    }

    #[test]
    fn test_empty_store_roundtrip() {
        let store = MemStore::new();
        let mut bytes = Vec::new();
        store.save(&mut bytes).unwrap();
        assert_eq!(bytes, vec![0]);

        let mut loaded = MemStore::new();
        loaded.load(&mut std::io::Cursor::new(&bytes)).unwrap();
        assert!(loaded.is_empty());
    }
}
