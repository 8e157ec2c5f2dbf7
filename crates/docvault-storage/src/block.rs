//! On-Disk Block Format
//!
//! A store file is a fixed header, a run of block bodies, and a trailing
//! delta-coded block directory:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ Header                                                      │
//! │ - storage version (u32 LE, currently 1)                     │
//! │ - block size (u32 LE)                                       │
//! │ - compression (u8: 0=None 1=LZ4 2=LZ4HC)                    │
//! │ - field registry (see docvault_core::schema)                │
//! │ - block count (u32 LE, patched at finalize)                 │
//! │ - directory offset (u64 LE, patched at finalize)            │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Block bodies, appended in RowID order                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Directory, one entry per block, delta-coded from previous:  │
//! │ - varint RowID delta                                        │
//! │ - u8 block type (0=SMALL 1=BIG)                             │
//! │ - varint offset delta                                       │
//! │ - varint header size (BIG blocks only)                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Small blocks
//!
//! Many small docs with strictly consecutive RowIDs, packed into one byte
//! stream and compressed as a single unit:
//!
//! ```text
//! u8 block_flags (bit0 = COMPRESSED)
//! varint num_docs
//! varint uncompressed_len
//! varint compressed_len      (only if COMPRESSED)
//! body bytes
//! ```
//!
//! Uncompressed body, per doc:
//! ```text
//! u8 doc_flags (bit0 = ALL_EMPTY, bit1 = EMPTY_BITMASK)
//! empty-field bitmap         (only if EMPTY_BITMASK; 32-bit LE words)
//! per non-empty field: varint len, len bytes
//! ```
//!
//! ## Big blocks
//!
//! Exactly one doc whose total size reached the block size. Fields are
//! compressed independently and may be stored in ascending stored-size
//! order, with a permutation table so a reader can skip unwanted fields by
//! summing lengths:
//!
//! ```text
//! u8 block_flags (bit1 = FIELD_REORDER)
//! permutation: num_fields × varint original_field_index   (if FIELD_REORDER)
//! num_fields × {
//!   u8 field_flags (bit0 = COMPRESSED, bit1 = EMPTY)
//!   varint uncompressed_len   (if not EMPTY)
//!   varint compressed_len     (if COMPRESSED)
//! }
//! <field bodies in file order>
//! ```
//!
//! The directory records everything up to the first field body as the
//! block's `header_size`.

use bytes::{Buf, BufMut};
use docvault_core::{varint, Error, Result, RowId};

/// Highest storage version this binary can read
pub const STORAGE_VERSION: u32 = 1;

pub(crate) const BLOCK_FLAG_COMPRESSED: u8 = 1 << 0;
pub(crate) const BLOCK_FLAG_FIELD_REORDER: u8 = 1 << 1;

pub(crate) const DOC_FLAG_ALL_EMPTY: u8 = 1 << 0;
pub(crate) const DOC_FLAG_EMPTY_BITMASK: u8 = 1 << 1;

pub(crate) const FIELD_FLAG_COMPRESSED: u8 = 1 << 0;
pub(crate) const FIELD_FLAG_EMPTY: u8 = 1 << 1;

/// Kind of a block in the directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockType {
    Small = 0,
    Big = 1,
}

impl TryFrom<u8> for BlockType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(BlockType::Small),
            1 => Ok(BlockType::Big),
            _ => Err(Error::InvalidBlockType(value)),
        }
    }
}

/// One materialised directory entry
#[derive(Debug, Clone)]
pub(crate) struct BlockInfo {
    /// First RowID stored in the block
    pub row_id: RowId,
    pub block_type: BlockType,
    /// File offset of the block (for BIG blocks, of the block header)
    pub offset: u64,
    /// Body length, derived from the next entry's offset
    pub size: u32,
    /// Header length for BIG blocks, zero for SMALL
    pub header_size: u32,
}

/// Empty-field bitmap stored as whole 32-bit little-endian words.
///
/// The word width is fixed so files are interchangeable between 32- and
/// 64-bit builds.
#[derive(Debug, Clone)]
pub(crate) struct FieldBitmap {
    words: Vec<u32>,
}

impl FieldBitmap {
    pub fn new(num_fields: usize) -> Self {
        Self {
            words: vec![0; num_fields.div_ceil(32)],
        }
    }

    /// Bytes a bitmap for `num_fields` fields occupies on disk
    pub fn byte_len(num_fields: usize) -> usize {
        num_fields.div_ceil(32) * 4
    }

    pub fn set(&mut self, field: usize) {
        self.words[field / 32] |= 1 << (field % 32);
    }

    pub fn get(&self, field: usize) -> bool {
        self.words[field / 32] & (1 << (field % 32)) != 0
    }

    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    pub fn write_to(&self, buf: &mut impl BufMut) {
        for word in &self.words {
            buf.put_u32_le(*word);
        }
    }

    pub fn read_from(buf: &mut impl Buf, num_fields: usize) -> Result<Self> {
        let words = num_fields.div_ceil(32);
        if buf.remaining() < words * 4 {
            return Err(Error::Truncated("empty-field bitmap"));
        }
        Ok(Self {
            words: (0..words).map(|_| buf.get_u32_le()).collect(),
        })
    }
}

/// Decoded per-field metadata from a big-block header
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct FieldInfo {
    pub flags: u8,
    pub uncompressed_len: u32,
    pub compressed_len: u32,
}

impl FieldInfo {
    pub fn is_empty(&self) -> bool {
        self.flags & FIELD_FLAG_EMPTY != 0
    }

    pub fn is_compressed(&self) -> bool {
        self.flags & FIELD_FLAG_COMPRESSED != 0
    }

    /// Bytes the field occupies on disk
    pub fn stored_len(&self) -> u32 {
        if self.is_empty() {
            0
        } else if self.is_compressed() {
            self.compressed_len
        } else {
            self.uncompressed_len
        }
    }
}

/// Parse the per-field section of a big-block header.
///
/// Returns `(file_order, infos)`: the registry index of each field in file
/// order, and the decoded metadata indexed by registry id.
pub(crate) fn read_big_block_header(
    cursor: &mut impl Buf,
    num_fields: usize,
) -> Result<(Vec<usize>, Vec<FieldInfo>)> {
    if !cursor.has_remaining() {
        return Err(Error::Truncated("big block flags"));
    }
    let block_flags = cursor.get_u8();
    let reorder = block_flags & BLOCK_FLAG_FIELD_REORDER != 0;

    let file_order: Vec<usize> = if reorder {
        (0..num_fields)
            .map(|_| {
                let id = varint::decode_u32(cursor, "field permutation")? as usize;
                if id >= num_fields {
                    return Err(Error::InvalidStore(format!(
                        "field permutation entry {id} out of range (have {num_fields} fields)"
                    )));
                }
                Ok(id)
            })
            .collect::<Result<_>>()?
    } else {
        (0..num_fields).collect()
    };

    let mut infos = vec![FieldInfo::default(); num_fields];
    for &field in &file_order {
        let info = &mut infos[field];
        if !cursor.has_remaining() {
            return Err(Error::Truncated("field flags"));
        }
        info.flags = cursor.get_u8();
        if info.is_empty() {
            continue;
        }
        info.uncompressed_len = varint::decode_u32(cursor, "field uncompressed length")?;
        if info.is_compressed() {
            info.compressed_len = varint::decode_u32(cursor, "field compressed length")?;
        }
    }

    Ok((file_order, infos))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    // ---------------------------------------------------------------
    // BlockType
    // ---------------------------------------------------------------

    #[test]
    fn test_block_type_roundtrip() {
        assert_eq!(BlockType::try_from(0).unwrap(), BlockType::Small);
        assert_eq!(BlockType::try_from(1).unwrap(), BlockType::Big);
        assert!(matches!(
            BlockType::try_from(2),
            Err(Error::InvalidBlockType(2))
        ));
    }

    // ---------------------------------------------------------------
    // FieldBitmap
    // ---------------------------------------------------------------

    #[test]
    fn test_bitmap_set_get() {
        let mut bitmap = FieldBitmap::new(10);
        bitmap.set(0);
        bitmap.set(9);
        assert!(bitmap.get(0));
        assert!(!bitmap.get(5));
        assert!(bitmap.get(9));
        assert_eq!(bitmap.count_ones(), 2);
    }

    #[test]
    fn test_bitmap_byte_len_is_whole_words() {
        assert_eq!(FieldBitmap::byte_len(1), 4);
        assert_eq!(FieldBitmap::byte_len(32), 4);
        assert_eq!(FieldBitmap::byte_len(33), 8);
        assert_eq!(FieldBitmap::byte_len(64), 8);
        assert_eq!(FieldBitmap::byte_len(65), 12);
    }

    #[test]
    fn test_bitmap_wire_roundtrip() {
        let mut bitmap = FieldBitmap::new(40);
        bitmap.set(3);
        bitmap.set(31);
        bitmap.set(32);
        bitmap.set(39);

        let mut buf = BytesMut::new();
        bitmap.write_to(&mut buf);
        assert_eq!(buf.len(), FieldBitmap::byte_len(40));

        let decoded = FieldBitmap::read_from(&mut buf.as_ref(), 40).unwrap();
        for i in 0..40 {
            assert_eq!(decoded.get(i), bitmap.get(i), "bit {}", i);
        }
    }

    #[test]
    fn test_bitmap_little_endian_words() {
        let mut bitmap = FieldBitmap::new(8);
        bitmap.set(0);
        bitmap.set(8 - 1);

        let mut buf = BytesMut::new();
        bitmap.write_to(&mut buf);
        // bit 0 and bit 7 both live in the first byte of the LE word
        assert_eq!(buf.as_ref(), &[0x81, 0, 0, 0]);
    }

    #[test]
    fn test_bitmap_truncated_read() {
        let data = [0u8; 3];
        assert!(FieldBitmap::read_from(&mut &data[..], 10).is_err());
    }

    #[test]
    fn test_bitmap_clear() {
        let mut bitmap = FieldBitmap::new(16);
        bitmap.set(5);
        bitmap.clear();
        assert_eq!(bitmap.count_ones(), 0);
    }

    // ---------------------------------------------------------------
    // FieldInfo
    // ---------------------------------------------------------------

    #[test]
    fn test_field_info_stored_len() {
        let empty = FieldInfo {
            flags: FIELD_FLAG_EMPTY,
            ..Default::default()
        };
        assert_eq!(empty.stored_len(), 0);

        let raw = FieldInfo {
            flags: 0,
            uncompressed_len: 100,
            compressed_len: 0,
        };
        assert_eq!(raw.stored_len(), 100);

        let compressed = FieldInfo {
            flags: FIELD_FLAG_COMPRESSED,
            uncompressed_len: 100,
            compressed_len: 40,
        };
        assert_eq!(compressed.stored_len(), 40);
    }

    // ---------------------------------------------------------------
    // Big-block header parsing
    // ---------------------------------------------------------------

    #[test]
    fn test_big_block_header_without_reorder() {
        let mut buf = BytesMut::new();
        buf.put_u8(0); // flags: no reorder
        buf.put_u8(0); // field 0: not empty, not compressed
        docvault_core::varint::encode_u32(&mut buf, 10);
        buf.put_u8(FIELD_FLAG_EMPTY); // field 1: empty

        let (order, infos) = read_big_block_header(&mut buf.as_ref(), 2).unwrap();
        assert_eq!(order, vec![0, 1]);
        assert_eq!(infos[0].uncompressed_len, 10);
        assert!(infos[1].is_empty());
    }

    #[test]
    fn test_big_block_header_with_reorder() {
        let mut buf = BytesMut::new();
        buf.put_u8(BLOCK_FLAG_FIELD_REORDER);
        // file order: field 1 first, then field 0
        docvault_core::varint::encode_u32(&mut buf, 1);
        docvault_core::varint::encode_u32(&mut buf, 0);
        // field 1 metadata (first in file order)
        buf.put_u8(FIELD_FLAG_COMPRESSED);
        docvault_core::varint::encode_u32(&mut buf, 500);
        docvault_core::varint::encode_u32(&mut buf, 50);
        // field 0 metadata
        buf.put_u8(0);
        docvault_core::varint::encode_u32(&mut buf, 200);

        let (order, infos) = read_big_block_header(&mut buf.as_ref(), 2).unwrap();
        assert_eq!(order, vec![1, 0]);
        assert_eq!(infos[1].compressed_len, 50);
        assert_eq!(infos[1].uncompressed_len, 500);
        assert_eq!(infos[0].uncompressed_len, 200);
        assert!(!infos[0].is_compressed());
    }

    #[test]
    fn test_big_block_header_permutation_out_of_range() {
        let mut buf = BytesMut::new();
        buf.put_u8(BLOCK_FLAG_FIELD_REORDER);
        docvault_core::varint::encode_u32(&mut buf, 5); // only 2 fields exist
        docvault_core::varint::encode_u32(&mut buf, 0);

        assert!(read_big_block_header(&mut buf.as_ref(), 2).is_err());
    }

    #[test]
    fn test_big_block_header_truncated() {
        let data = [0u8]; // flags only, field metadata missing
        assert!(read_big_block_header(&mut &data[..], 1).is_err());
    }
}
