//! Document Value Types
//!
//! A document is an ordered vector of per-field byte payloads, one entry per
//! registered field. Two representations exist:
//!
//! - [`Document`]: the owned value a store returns from `get_doc`. When a
//!   subset of fields was requested, `fields` holds only those, in request
//!   order.
//! - [`Doc`]: the borrowed view a builder consumes. It holds slices so a
//!   caller can feed payloads without copying; a returned [`Document`] can be
//!   re-borrowed as a [`Doc`] to move rows from one store into another
//!   (the merge/optimize path).
//!
//! An empty payload is a real value, distinct from an unrequested field.

/// Dense 32-bit row identifier, contiguous within a build
pub type RowId = u32;

/// An owned document as returned by `get_doc`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pub fields: Vec<Vec<u8>>,
}

impl Document {
    pub fn new(fields: Vec<Vec<u8>>) -> Self {
        Self { fields }
    }
}

/// A borrowed document fed to a builder or in-memory store
#[derive(Debug, Clone)]
pub struct Doc<'a> {
    pub fields: Vec<&'a [u8]>,
}

impl<'a> Doc<'a> {
    pub fn new(fields: Vec<&'a [u8]>) -> Self {
        Self { fields }
    }
}

impl<'a> From<&'a Document> for Doc<'a> {
    fn from(doc: &'a Document) -> Self {
        Doc {
            fields: doc.fields.iter().map(|f| f.as_slice()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doc_from_document_borrows_fields() {
        let document = Document::new(vec![b"hello".to_vec(), Vec::new(), b"\x00\x01".to_vec()]);
        let doc = Doc::from(&document);

        assert_eq!(doc.fields.len(), 3);
        assert_eq!(doc.fields[0], b"hello");
        assert!(doc.fields[1].is_empty());
        assert_eq!(doc.fields[2], b"\x00\x01");
    }

    #[test]
    fn test_default_document_is_empty() {
        let document = Document::default();
        assert!(document.fields.is_empty());
    }
}
