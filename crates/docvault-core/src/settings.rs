//! Store Settings
//!
//! Build-time knobs for a document store: the target block size and the
//! compression applied to block bodies. The block size and compression kind
//! are recorded in the store header; the compression level only affects
//! writing and is not persisted.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Compression applied to block bodies and big-block fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Compression {
    None = 0,
    Lz4 = 1,
    Lz4Hc = 2,
}

impl TryFrom<u8> for Compression {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Error> {
        match value {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Lz4),
            2 => Ok(Compression::Lz4Hc),
            _ => Err(Error::InvalidCompression(value)),
        }
    }
}

/// Default LZ4-HC level when none is configured
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 9;

/// Settings a store is built with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Target uncompressed size of a small block, in bytes
    pub block_size: u32,
    pub compression: Compression,
    /// LZ4-HC level; ignored for `None` and `Lz4`
    pub compression_level: i32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            block_size: 16 * 1024,
            compression: Compression::Lz4,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}
