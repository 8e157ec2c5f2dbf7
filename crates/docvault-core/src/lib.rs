pub mod document;
pub mod error;
pub mod schema;
pub mod settings;
pub mod varint;

pub use document::{Doc, Document, RowId};
pub use error::{Error, Result};
pub use schema::{Field, FieldType, Schema};
pub use settings::{Compression, StoreSettings, DEFAULT_COMPRESSION_LEVEL};
