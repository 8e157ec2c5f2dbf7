//! Field Registry
//!
//! The schema is an ordered list of `(name, type)` field descriptors. A
//! field's id is its zero-based position in insertion order; that id indexes
//! both the per-document payload vector and every on-disk block body, so the
//! registry serialised into the store header must be exactly the one used to
//! interpret the blocks that follow it.
//!
//! Names are not unique on their own: a TEXT field and a BINARY field may
//! share a name (a field that is both indexed and stored raw). Lookup
//! therefore keys on `(type, name)`.
//!
//! ## Wire format (store header)
//!
//! ```text
//! u32 field_count            (little-endian)
//! field_count × {
//!   u8  type                 (0 = TEXT, 1 = BINARY)
//!   u32 name_len             (little-endian)
//!   name_len × u8            (UTF-8 name bytes)
//! }
//! ```
//!
//! The registry is append-only while building and read-only after load.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};

use crate::error::{Error, Result};

/// Kind of payload a field stores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum FieldType {
    /// Text payload; a trailing NUL is stripped on input and re-appended on
    /// unpacked output
    Text = 0,
    /// Opaque bytes, returned exactly as stored
    Binary = 1,
}

impl TryFrom<u8> for FieldType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(FieldType::Text),
            1 => Ok(FieldType::Binary),
            _ => Err(Error::InvalidFieldType(value)),
        }
    }
}

/// A single field descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
}

/// Ordered field registry with `(type, name)` lookup
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<Field>,
    lookup: HashMap<String, usize>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a field and return its id (the next free index)
    pub fn add_field(&mut self, name: &str, field_type: FieldType) -> usize {
        let id = self.fields.len();
        self.lookup.insert(Self::lookup_key(name, field_type), id);
        self.fields.push(Field {
            name: name.to_string(),
            field_type,
        });
        id
    }

    /// Find a field id by `(type, name)`
    pub fn field_id(&self, name: &str, field_type: FieldType) -> Option<usize> {
        self.lookup.get(&Self::lookup_key(name, field_type)).copied()
    }

    pub fn field(&self, id: usize) -> &Field {
        &self.fields[id]
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Serialise the registry in header wire format
    pub fn save(&self, w: &mut impl Write) -> std::io::Result<()> {
        w.write_u32::<LittleEndian>(self.fields.len() as u32)?;
        for field in &self.fields {
            w.write_u8(field.field_type as u8)?;
            w.write_u32::<LittleEndian>(field.name.len() as u32)?;
            w.write_all(field.name.as_bytes())?;
        }
        Ok(())
    }

    /// Load a registry from header wire format
    pub fn load(r: &mut impl Read) -> Result<Self> {
        let mut schema = Schema::new();

        let count = r.read_u32::<LittleEndian>()?;
        for _ in 0..count {
            let field_type = FieldType::try_from(r.read_u8()?)?;
            let name_len = r.read_u32::<LittleEndian>()? as usize;
            let mut name = vec![0u8; name_len];
            r.read_exact(&mut name)?;
            let name = String::from_utf8(name)
                .map_err(|e| Error::InvalidStore(format!("field name is not UTF-8: {e}")))?;
            schema.add_field(&name, field_type);
        }

        Ok(schema)
    }

    // Type byte prefixed to the name keeps same-named TEXT/BINARY fields apart.
    fn lookup_key(name: &str, field_type: FieldType) -> String {
        format!("{}{}", field_type as u8, name)
    }
}
