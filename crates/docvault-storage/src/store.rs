//! Persistent Docstore Reader
//!
//! Opens a sealed store file, materialises the block directory, and serves
//! `get_doc` lookups by decompressing only what a request actually needs:
//!
//! - SMALL blocks are decompressed as one unit (and cached whole), then
//!   walked doc by doc until the requested RowID; earlier docs are skipped
//!   by their recorded lengths without copying.
//! - BIG blocks are read field by field; unrequested fields are skipped by
//!   adding their stored lengths to a cursor, and each requested field is
//!   decompressed (and cached) independently.
//!
//! The reader is immutable after `open`, so concurrent `get_doc` calls from
//! multiple threads need no locking here; all shared mutable state lives in
//! the caches. Reads go through a session's buffered reader when one exists
//! and fall back to positional reads on the shared descriptor otherwise.

use byteorder::{LittleEndian, ReadBytesExt};
use bytes::{Buf, Bytes};
use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use docvault_core::{
    varint, Compression, Document, Error, FieldType, Result, RowId, Schema, StoreSettings,
    DEFAULT_COMPRESSION_LEVEL,
};

use crate::block::{
    read_big_block_header, BlockInfo, BlockType, FieldBitmap, FieldInfo, BLOCK_FLAG_COMPRESSED,
    DOC_FLAG_ALL_EMPTY, DOC_FLAG_EMPTY_BITMASK, STORAGE_VERSION,
};
use crate::block_cache::{BlockHandle, CachedBlock};
use crate::codec::Codec;
use crate::context::DocstoreContext;
use crate::reader_cache::SessionId;

/// Write one returned field in the selected output encoding.
///
/// `pack` produces the length-prefixed transport form; otherwise raw bytes,
/// with a trailing NUL appended for text fields.
pub(crate) fn write_field_payload(dst: &mut Vec<u8>, src: &[u8], is_text: bool, pack: bool) {
    if pack {
        varint::encode_u32(dst, src.len() as u32);
        dst.extend_from_slice(src);
    } else {
        dst.extend_from_slice(src);
        if is_text {
            dst.push(0);
        }
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    std::os::unix::fs::FileExt::read_exact_at(file, buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut done = 0;
    while done < buf.len() {
        let n = file.seek_read(&mut buf[done..], offset + done as u64)?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "unexpected end of file",
            ));
        }
        done += n;
    }
    Ok(())
}

/// Read-only view of a sealed document store
pub struct Docstore {
    uid: u32,
    path: PathBuf,
    file: File,
    settings: StoreSettings,
    codec: Codec,
    schema: Schema,
    blocks: Vec<BlockInfo>,
    ctx: DocstoreContext,
}

impl std::fmt::Debug for Docstore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Docstore")
            .field("uid", &self.uid)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Docstore {
    /// Open a store file, validating the header and loading the directory
    pub fn open(path: impl AsRef<Path>, ctx: &DocstoreContext) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mut reader = BufReader::new(file.try_clone()?);

        let version = reader.read_u32::<LittleEndian>()?;
        if version > STORAGE_VERSION {
            return Err(Error::UnsupportedVersion {
                path: path.display().to_string(),
                found: version,
                supported: STORAGE_VERSION,
            });
        }

        let block_size = reader.read_u32::<LittleEndian>()?;
        let compression = Compression::try_from(reader.read_u8()?)?;
        let schema = Schema::load(&mut reader)?;

        let block_count = reader.read_u32::<LittleEndian>()?;
        let directory_offset = reader.read_u64::<LittleEndian>()?;

        reader.seek(SeekFrom::Start(directory_offset))?;

        let mut blocks: Vec<BlockInfo> = Vec::with_capacity(block_count as usize);
        let mut prev_row_id: RowId = 0;
        let mut prev_offset: u64 = 0;
        for _ in 0..block_count {
            let row_delta = varint::read_u32(&mut reader, "directory RowID delta")?;
            let row_id = prev_row_id.checked_add(row_delta).ok_or_else(|| {
                Error::InvalidStore(format!(
                    "{}: directory RowID overflows past {prev_row_id}",
                    path.display()
                ))
            })?;
            let block_type = BlockType::try_from(reader.read_u8()?)?;
            let offset_delta = varint::read_u64(&mut reader, "directory offset delta")?;
            let offset = prev_offset.checked_add(offset_delta).ok_or_else(|| {
                Error::InvalidStore(format!(
                    "{}: directory offset overflows past {prev_offset}",
                    path.display()
                ))
            })?;
            let header_size = match block_type {
                BlockType::Big => varint::read_u32(&mut reader, "big block header size")?,
                BlockType::Small => 0,
            };

            blocks.push(BlockInfo {
                row_id,
                block_type,
                offset,
                size: 0,
                header_size,
            });

            prev_row_id = row_id;
            prev_offset = offset;
        }

        for i in 1..blocks.len() {
            blocks[i - 1].size = (blocks[i].offset - blocks[i - 1].offset) as u32;
        }
        if let Some(last) = blocks.last_mut() {
            if directory_offset < last.offset {
                return Err(Error::InvalidStore(format!(
                    "{}: directory offset {directory_offset} precedes last block at {}",
                    path.display(),
                    last.offset
                )));
            }
            last.size = (directory_offset - last.offset) as u32;
        }

        debug!(
            path = %path.display(),
            blocks = blocks.len(),
            block_size,
            "opened docstore"
        );

        Ok(Self {
            uid: ctx.next_store_uid(),
            path,
            file,
            settings: StoreSettings {
                block_size,
                compression,
                compression_level: DEFAULT_COMPRESSION_LEVEL,
            },
            codec: Codec::new(compression, DEFAULT_COMPRESSION_LEVEL),
            schema,
            blocks,
            ctx: ctx.clone(),
        })
    }

    /// Process-unique identifier scoping this store's cache entries
    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Settings the file was built with (compression level is not persisted
    /// and reads back as the default)
    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    pub fn field_id(&self, name: &str, field_type: FieldType) -> Option<usize> {
        self.schema.field_id(name, field_type)
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Directory introspection: `(first RowID, type, header size)` per block
    pub fn block_summaries(&self) -> impl Iterator<Item = (RowId, BlockType, u32)> + '_ {
        self.blocks
            .iter()
            .map(|b| (b.row_id, b.block_type, b.header_size))
    }

    /// Attach a buffered reader for `session_id` if buffering pays off
    pub fn create_reader(&self, session_id: SessionId) -> Result<()> {
        self.ctx
            .reader_cache()
            .create(session_id, self.uid, &self.file, self.settings.block_size)?;
        Ok(())
    }

    /// Fetch one document.
    ///
    /// `field_ids` is either `None` (all fields in registry order) or a
    /// strictly ascending list of registry indices (those fields, in that
    /// order). An unknown RowID yields an empty document.
    pub fn get_doc(
        &self,
        row_id: RowId,
        field_ids: Option<&[usize]>,
        session_id: SessionId,
        pack: bool,
    ) -> Result<Document> {
        debug_assert!(
            field_ids.map_or(true, |ids| ids.windows(2).all(|w| w[0] < w[1])),
            "field ids must be strictly ascending"
        );
        debug_assert!(
            field_ids.map_or(true, |ids| ids.iter().all(|&id| id < self.schema.len())),
            "field id out of range"
        );

        let Some(block) = self.find_block(row_id) else {
            return Ok(Document::default());
        };

        match block.block_type {
            BlockType::Small => {
                self.read_doc_from_small_block(block, row_id, field_ids, session_id, pack)
            }
            BlockType::Big => {
                // a big block holds exactly its first RowID
                if row_id != block.row_id {
                    return Ok(Document::default());
                }
                self.read_doc_from_big_block(block, field_ids, session_id, pack)
            }
        }
    }

    /// Block whose `[row_id, next.row_id)` interval covers `row_id`
    fn find_block(&self, row_id: RowId) -> Option<&BlockInfo> {
        let idx = self.blocks.partition_point(|b| b.row_id <= row_id);
        if idx == 0 {
            None
        } else {
            Some(&self.blocks[idx - 1])
        }
    }

    /// Destination slot per registry field: `remap[field] == Some(slot)`
    /// iff the field was requested
    fn field_remap(&self, field_ids: Option<&[usize]>) -> Vec<Option<usize>> {
        match field_ids {
            None => (0..self.schema.len()).map(Some).collect(),
            Some(ids) => {
                let mut remap = vec![None; self.schema.len()];
                for (slot, &field) in ids.iter().enumerate() {
                    remap[field] = Some(slot);
                }
                remap
            }
        }
    }

    fn is_text(&self, field: usize) -> bool {
        self.schema.field(field).field_type == FieldType::Text
    }

    /// Buffered read through the session reader when one exists, positional
    /// read on the shared descriptor otherwise
    fn read_from_file(&self, buf: &mut [u8], offset: u64, session_id: SessionId) -> Result<()> {
        if let Some(reader) = self.ctx.reader_cache().get(session_id, self.uid) {
            reader.lock().unwrap().read_at(buf, offset)?;
        } else {
            read_exact_at(&self.file, buf, offset)?;
        }
        Ok(())
    }

    /// Fetch a cached payload or load it, trying to cache the result.
    /// Returns the payload and the pin keeping it resident (if cached).
    fn fetch_payload(
        &self,
        offset: u64,
        load: impl FnOnce() -> Result<CachedBlock>,
    ) -> Result<(Arc<CachedBlock>, Option<BlockHandle>)> {
        let cache = self.ctx.block_cache();

        if let Some(handle) = cache.and_then(|c| c.find(self.uid, offset)) {
            let payload = handle.payload();
            return Ok((payload, Some(handle)));
        }

        let loaded = Arc::new(load()?);
        let pin = cache.and_then(|c| c.add(self.uid, offset, Arc::clone(&loaded)));
        Ok((loaded, pin))
    }

    fn read_doc_from_small_block(
        &self,
        block: &BlockInfo,
        row_id: RowId,
        field_ids: Option<&[usize]>,
        session_id: SessionId,
        pack: bool,
    ) -> Result<Document> {
        let (payload, _pin) =
            self.fetch_payload(block.offset, || self.load_small_block(block, session_id))?;

        let remap = self.field_remap(field_ids);
        let result_len = field_ids.map_or(self.schema.len(), |ids| ids.len());

        let mut cursor: &[u8] = &payload.data;
        let mut current_row = block.row_id;

        for _ in 0..payload.num_docs {
            let found = current_row == row_id;

            if !cursor.has_remaining() {
                return Err(Error::Truncated("doc flags"));
            }
            let doc_flags = cursor.get_u8();

            if doc_flags & DOC_FLAG_ALL_EMPTY != 0 {
                if found {
                    let mut fields = vec![Vec::new(); result_len];
                    for (field, slot) in remap.iter().enumerate() {
                        if let Some(slot) = *slot {
                            write_field_payload(&mut fields[slot], &[], self.is_text(field), pack);
                        }
                    }
                    return Ok(Document::new(fields));
                }
                current_row += 1;
                continue;
            }

            let bitmap = if doc_flags & DOC_FLAG_EMPTY_BITMASK != 0 {
                Some(FieldBitmap::read_from(&mut cursor, self.schema.len())?)
            } else {
                None
            };

            let mut fields = if found {
                Some(vec![Vec::new(); result_len])
            } else {
                None
            };

            for field in 0..self.schema.len() {
                let marked_empty = bitmap.as_ref().is_some_and(|b| b.get(field));
                let payload_bytes: &[u8] = if marked_empty {
                    &[]
                } else {
                    let len = varint::decode_u32(&mut cursor, "field length")? as usize;
                    if cursor.len() < len {
                        return Err(Error::Truncated("field payload"));
                    }
                    let (head, tail) = cursor.split_at(len);
                    cursor = tail;
                    head
                };

                if let Some(fields) = fields.as_mut() {
                    if let Some(slot) = remap[field] {
                        write_field_payload(
                            &mut fields[slot],
                            payload_bytes,
                            self.is_text(field),
                            pack,
                        );
                    }
                }
            }

            if let Some(fields) = fields {
                return Ok(Document::new(fields));
            }
            current_row += 1;
        }

        Ok(Document::default())
    }

    /// Read and decompress a whole small block body
    fn load_small_block(&self, block: &BlockInfo, session_id: SessionId) -> Result<CachedBlock> {
        let mut raw = vec![0u8; block.size as usize];
        self.read_from_file(&mut raw, block.offset, session_id)?;

        let mut cursor: &[u8] = &raw;
        if !cursor.has_remaining() {
            return Err(Error::Truncated("small block header"));
        }
        let flags = cursor.get_u8();
        let num_docs = varint::decode_u32(&mut cursor, "small block doc count")?;
        let uncompressed_len =
            varint::decode_u32(&mut cursor, "small block uncompressed length")? as usize;

        let data = if flags & BLOCK_FLAG_COMPRESSED != 0 {
            let compressed_len =
                varint::decode_u32(&mut cursor, "small block compressed length")? as usize;
            if cursor.len() < compressed_len {
                return Err(Error::Truncated("small block body"));
            }
            Bytes::from(self.codec.decompress(&cursor[..compressed_len], uncompressed_len)?)
        } else {
            if cursor.len() < uncompressed_len {
                return Err(Error::Truncated("small block body"));
            }
            Bytes::copy_from_slice(&cursor[..uncompressed_len])
        };

        Ok(CachedBlock {
            flags,
            num_docs,
            data,
        })
    }

    fn read_doc_from_big_block(
        &self,
        block: &BlockInfo,
        field_ids: Option<&[usize]>,
        session_id: SessionId,
        pack: bool,
    ) -> Result<Document> {
        let mut header = vec![0u8; block.header_size as usize];
        self.read_from_file(&mut header, block.offset, session_id)?;

        let mut cursor: &[u8] = &header;
        let (file_order, infos) = read_big_block_header(&mut cursor, self.schema.len())?;

        let remap = self.field_remap(field_ids);
        let result_len = field_ids.map_or(self.schema.len(), |ids| ids.len());
        let mut fields = vec![Vec::new(); result_len];

        // walk fields in file order, advancing past the ones not requested
        let mut offset = block.offset + block.header_size as u64;
        for &field in &file_order {
            let info = infos[field];

            if info.is_empty() {
                if let Some(slot) = remap[field] {
                    write_field_payload(&mut fields[slot], &[], self.is_text(field), pack);
                }
                continue;
            }

            let stored = info.stored_len() as u64;
            let Some(slot) = remap[field] else {
                offset += stored;
                continue;
            };

            let (payload, _pin) =
                self.fetch_payload(offset, || self.load_big_block_field(offset, &info, session_id))?;

            write_field_payload(&mut fields[slot], &payload.data, self.is_text(field), pack);
            offset += stored;
        }

        Ok(Document::new(fields))
    }

    /// Read and decompress one big-block field body
    fn load_big_block_field(
        &self,
        offset: u64,
        info: &FieldInfo,
        session_id: SessionId,
    ) -> Result<CachedBlock> {
        let mut raw = vec![0u8; info.stored_len() as usize];
        self.read_from_file(&mut raw, offset, session_id)?;

        let data = if info.is_compressed() {
            Bytes::from(
                self.codec
                    .decompress(&raw, info.uncompressed_len as usize)?,
            )
        } else {
            Bytes::from(raw)
        };

        Ok(CachedBlock {
            flags: 0,
            num_docs: 0,
            data,
        })
    }
}

impl Drop for Docstore {
    fn drop(&mut self) {
        if let Some(cache) = self.ctx.block_cache() {
            cache.evict_store(self.uid);
        }
        self.ctx.reader_cache().evict_store(self.uid);
        debug!(path = %self.path.display(), uid = self.uid, "closed docstore");
    }
}
