//! Error Types for DocVault
//!
//! All fallible operations in the store return `Result<T>`, aliased to
//! `Result<T, Error>` so that `?` propagation works across both crates.
//!
//! ## Error Categories
//!
//! ### I/O Errors
//! - `Io`: file open/read/write/seek failures, converted via `#[from]`
//!
//! ### Format Errors (detected at open time or while decoding a block)
//! - `UnsupportedVersion`: the file was written by a newer binary
//! - `InvalidCompression` / `InvalidBlockType` / `InvalidFieldType`:
//!   unknown enum tag on disk
//! - `Truncated`: the data ended in the middle of a value
//! - `VarintOverflow`: a length-encoded integer does not fit its target type
//! - `InvalidStore`: anything else malformed (bad directory deltas, short
//!   block bodies), with the file name and the observed values in the message
//!
//! ### Decompression Errors
//! - `Decompression`: LZ4 failed or produced a length that does not match the
//!   recorded uncompressed length. Treated as fatal for the request; the
//!   store never attempts partial recovery.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unable to load {path}: file is v{found}, binary supports up to v{supported}")]
    UnsupportedVersion {
        path: String,
        found: u32,
        supported: u32,
    },

    #[error("invalid compression type: {0}")]
    InvalidCompression(u8),

    #[error("invalid block type: {0}")]
    InvalidBlockType(u8),

    #[error("invalid field type: {0}")]
    InvalidFieldType(u8),

    #[error("unexpected end of data while reading {0}")]
    Truncated(&'static str),

    #[error("varint overflow while reading {0}")]
    VarintOverflow(&'static str),

    #[error("decompression error: {0}")]
    Decompression(String),

    #[error("invalid store: {0}")]
    InvalidStore(String),
}

pub type Result<T> = std::result::Result<T, Error>;
