//! Docstore Builder
//!
//! Packs documents into size-bounded blocks and writes a sealed store file.
//!
//! ## Write Path
//!
//! 1. Register fields with `add_field` (before the first document)
//! 2. Append documents in ascending RowID order with `add_doc`
//! 3. `finalize` flushes the last block, appends the trailing directory and
//!    patches the reserved header slots
//!
//! Documents accumulate in a pending buffer. When appending a document would
//! push the buffered payload past `block_size`, the buffer is flushed as a
//! block first. A flush produces a BIG block only when the buffer holds
//! exactly one document whose payload alone reached `block_size`; any other
//! buffer becomes a SMALL block, even if the total exceeds `block_size`
//! (the threshold was checked before the last append).
//!
//! The fixed header is written lazily on the first flush, so a builder that
//! never sees a document still finalizes into a valid zero-block store.
//!
//! The builder is single-threaded by contract.

use byteorder::{LittleEndian, WriteBytesExt};
use bytes::{BufMut, BytesMut};
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use docvault_core::{varint, Doc, FieldType, Result, RowId, Schema, StoreSettings};

use crate::block::{
    BlockType, FieldBitmap, BLOCK_FLAG_COMPRESSED, BLOCK_FLAG_FIELD_REORDER, DOC_FLAG_ALL_EMPTY,
    DOC_FLAG_EMPTY_BITMASK, FIELD_FLAG_COMPRESSED, FIELD_FLAG_EMPTY, STORAGE_VERSION,
};
use crate::codec::Codec;

struct PendingDoc {
    row_id: RowId,
    fields: Vec<Vec<u8>>,
}

/// Builds a sealed document store file
pub struct DocstoreBuilder {
    path: PathBuf,
    writer: BufWriter<File>,
    settings: StoreSettings,
    codec: Codec,
    schema: Schema,

    pending: Vec<PendingDoc>,
    /// Total payload bytes buffered in `pending` (pre-strip lengths)
    stored_len: u32,

    num_blocks: u32,
    directory: BytesMut,
    /// Position of the reserved block-count / directory-offset slots
    header_patch_offset: u64,
    wrote_header: bool,

    prev_block_row_id: RowId,
    prev_block_offset: u64,
}

impl DocstoreBuilder {
    /// Create a store file at `path`
    pub fn create(path: impl AsRef<Path>, settings: StoreSettings) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            codec: Codec::new(settings.compression, settings.compression_level),
            settings,
            schema: Schema::new(),
            pending: Vec::new(),
            stored_len: 0,
            num_blocks: 0,
            directory: BytesMut::new(),
            header_patch_offset: 0,
            wrote_header: false,
            prev_block_row_id: 0,
            prev_block_offset: 0,
        })
    }

    /// Register a field; must precede the first `add_doc`
    pub fn add_field(&mut self, name: &str, field_type: FieldType) -> usize {
        debug_assert!(
            !self.wrote_header,
            "fields must be registered before any block is written"
        );
        self.schema.add_field(name, field_type)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// Append a document; RowIDs must arrive in ascending order
    pub fn add_doc(&mut self, row_id: RowId, doc: &Doc) -> Result<()> {
        debug_assert_eq!(
            doc.fields.len(),
            self.schema.len(),
            "document field count must match the registry"
        );

        let len: u32 = doc.fields.iter().map(|f| f.len() as u32).sum();

        if self.stored_len + len > self.settings.block_size {
            self.write_block()?;
        }

        let mut fields = Vec::with_capacity(doc.fields.len());
        for (i, field) in doc.fields.iter().enumerate() {
            let mut stored_len = field.len();
            // strip at most one trailing NUL from text fields
            if self.schema.field(i).field_type == FieldType::Text
                && stored_len > 0
                && field[stored_len - 1] == 0
            {
                stored_len -= 1;
            }
            fields.push(field[..stored_len].to_vec());
        }

        self.pending.push(PendingDoc { row_id, fields });
        self.stored_len += len;

        Ok(())
    }

    /// Flush pending documents, write the directory and seal the file
    pub fn finalize(mut self) -> Result<()> {
        self.write_block()?;

        let directory_offset = self.writer.stream_position()?;
        self.writer.write_all(&self.directory)?;

        self.writer.flush()?;
        self.writer.seek(SeekFrom::Start(self.header_patch_offset))?;
        self.writer.write_u32::<LittleEndian>(self.num_blocks)?;
        self.writer.write_u64::<LittleEndian>(directory_offset)?;
        self.writer.flush()?;

        debug!(
            path = %self.path.display(),
            blocks = self.num_blocks,
            "sealed docstore"
        );
        Ok(())
    }

    fn write_initial_header(&mut self) -> Result<()> {
        self.writer.write_u32::<LittleEndian>(STORAGE_VERSION)?;
        self.writer
            .write_u32::<LittleEndian>(self.settings.block_size)?;
        self.writer.write_u8(self.settings.compression as u8)?;
        self.schema.save(&mut self.writer)?;

        self.header_patch_offset = self.writer.stream_position()?;

        // reserved: block count and directory offset, patched at finalize
        self.writer.write_u32::<LittleEndian>(0)?;
        self.writer.write_u64::<LittleEndian>(0)?;

        self.wrote_header = true;
        Ok(())
    }

    fn write_block(&mut self) -> Result<()> {
        if !self.wrote_header {
            self.write_initial_header()?;
        }

        if self.pending.is_empty() {
            return Ok(());
        }

        let big = self.pending.len() == 1 && self.stored_len >= self.settings.block_size;
        if big {
            self.write_big_block()?;
        } else {
            self.write_small_block()?;
        }

        self.num_blocks += 1;
        self.stored_len = 0;
        self.pending.clear();
        Ok(())
    }

    fn push_directory_entry(
        &mut self,
        block_type: BlockType,
        offset: u64,
        header_size: Option<u32>,
    ) {
        let first_row_id = self.pending[0].row_id;

        varint::encode_u32(&mut self.directory, first_row_id - self.prev_block_row_id);
        self.directory.put_u8(block_type as u8);
        varint::encode_u64(&mut self.directory, offset - self.prev_block_offset);
        if let Some(header_size) = header_size {
            varint::encode_u32(&mut self.directory, header_size);
        }

        self.prev_block_row_id = first_row_id;
        self.prev_block_offset = offset;
    }

    fn write_small_block(&mut self) -> Result<()> {
        debug_assert!(
            self.pending.windows(2).all(|w| w[1].row_id == w[0].row_id + 1),
            "small-block RowIDs must be consecutive"
        );

        let num_fields = self.schema.len();
        let mut scratch = BytesMut::new();
        let mut empty = FieldBitmap::new(num_fields);

        for doc in &self.pending {
            empty.clear();
            let mut empty_count = 0usize;
            for (i, field) in doc.fields.iter().enumerate() {
                if field.is_empty() {
                    empty.set(i);
                    empty_count += 1;
                }
            }

            if empty_count == num_fields {
                scratch.put_u8(DOC_FLAG_ALL_EMPTY);
                continue;
            }

            // a bitmap only pays when shorter than one zero-length varint
            // per empty field
            let needs_bitmap =
                empty_count > 0 && FieldBitmap::byte_len(num_fields) < empty_count;

            scratch.put_u8(if needs_bitmap { DOC_FLAG_EMPTY_BITMASK } else { 0 });
            if needs_bitmap {
                empty.write_to(&mut scratch);
            }

            for (i, field) in doc.fields.iter().enumerate() {
                if needs_bitmap && empty.get(i) {
                    continue;
                }
                varint::encode_u32(&mut scratch, field.len() as u32);
                scratch.put_slice(field);
            }
        }

        let compressed = self.codec.compress(&scratch);

        let block_offset = self.writer.stream_position()?;
        self.push_directory_entry(BlockType::Small, block_offset, None);

        let mut block_flags = 0u8;
        if compressed.is_some() {
            block_flags |= BLOCK_FLAG_COMPRESSED;
        }

        self.writer.write_u8(block_flags)?;
        varint::write_u32(&mut self.writer, self.pending.len() as u32)?;
        varint::write_u32(&mut self.writer, scratch.len() as u32)?;

        match compressed {
            Some(compressed) => {
                varint::write_u32(&mut self.writer, compressed.len() as u32)?;
                self.writer.write_all(&compressed)?;
            }
            None => self.writer.write_all(&scratch)?,
        }

        Ok(())
    }

    fn write_big_block(&mut self) -> Result<()> {
        debug_assert_eq!(self.pending.len(), 1);
        let num_fields = self.schema.len();
        let doc = &self.pending[0];

        let mut compressed: Vec<Option<Vec<u8>>> = Vec::with_capacity(num_fields);
        let mut stored_sizes: Vec<usize> = Vec::with_capacity(num_fields);
        let mut need_reorder = false;
        let mut prev_stored = 0usize;
        for field in &doc.fields {
            let c = self.codec.compress(field);
            let stored = c.as_ref().map_or(field.len(), |c| c.len());
            need_reorder |= stored < prev_stored;
            prev_stored = stored;
            compressed.push(c);
            stored_sizes.push(stored);
        }

        let file_order: Vec<usize> = if need_reorder {
            let mut order: Vec<usize> = (0..num_fields).collect();
            order.sort_by_key(|&i| stored_sizes[i]);
            order
        } else {
            (0..num_fields).collect()
        };

        let header_start = self.writer.stream_position()?;

        let block_flags = if need_reorder {
            BLOCK_FLAG_FIELD_REORDER
        } else {
            0
        };
        self.writer.write_u8(block_flags)?;

        if need_reorder {
            for &field in &file_order {
                varint::write_u32(&mut self.writer, field as u32)?;
            }
        }

        for &field in &file_order {
            let is_empty = doc.fields[field].is_empty();
            let is_compressed = compressed[field].is_some();

            let mut field_flags = 0u8;
            if is_compressed {
                field_flags |= FIELD_FLAG_COMPRESSED;
            }
            if is_empty {
                field_flags |= FIELD_FLAG_EMPTY;
            }
            self.writer.write_u8(field_flags)?;

            if is_empty {
                continue;
            }

            varint::write_u32(&mut self.writer, doc.fields[field].len() as u32)?;
            if let Some(compressed) = &compressed[field] {
                varint::write_u32(&mut self.writer, compressed.len() as u32)?;
            }
        }

        let header_size = self.writer.stream_position()? - header_start;

        for &field in &file_order {
            if doc.fields[field].is_empty() {
                continue;
            }
            match &compressed[field] {
                Some(compressed) => self.writer.write_all(compressed)?,
                None => self.writer.write_all(&doc.fields[field])?,
            }
        }

        self.push_directory_entry(BlockType::Big, header_start, Some(header_size as u32));

        Ok(())
    }
}
