//! Variable-length Integer Encoding (Varint)
//!
//! Unsigned LEB128: each byte carries 7 value bits plus a continuation flag,
//! least-significant group first. Small numbers (0-127) use one byte; a u64
//! never needs more than 10.
//!
//! Every length and delta in the store file is a varint:
//! - field lengths inside small-block bodies
//! - RowID and file-offset deltas in the trailing block directory
//!   (consecutive blocks have small deltas, so most entries are 2-4 bytes)
//! - per-field lengths in big-block headers and packed documents
//!
//! Two families of helpers are provided. The `encode_*`/`decode_*` functions
//! work over `bytes::{BufMut, Buf}` for in-memory block bodies; the
//! `read_*`/`write_*` functions work over `std::io` streams for the store
//! header and directory. Decoding truncated or oversized input returns an
//! error rather than panicking, since block bytes come straight off disk.

use bytes::{Buf, BufMut};
use std::io::{Read, Write};

use crate::error::{Error, Result};

/// Encode an unsigned integer into a buffer
pub fn encode_u64(buf: &mut impl BufMut, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;

        if value != 0 {
            byte |= 0x80; // continuation bit
        }

        buf.put_u8(byte);

        if value == 0 {
            break;
        }
    }
}

/// Encode a 32-bit unsigned integer into a buffer
pub fn encode_u32(buf: &mut impl BufMut, value: u32) {
    encode_u64(buf, value as u64);
}

/// Decode an unsigned integer from a buffer.
///
/// `what` names the value being read and is included in error messages.
pub fn decode_u64(buf: &mut impl Buf, what: &'static str) -> Result<u64> {
    let mut value: u64 = 0;
    let mut shift = 0;

    loop {
        if !buf.has_remaining() {
            return Err(Error::Truncated(what));
        }

        let byte = buf.get_u8();
        if shift == 63 && byte > 1 {
            return Err(Error::VarintOverflow(what));
        }
        value |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            return Ok(value);
        }

        shift += 7;
        if shift >= 64 {
            return Err(Error::VarintOverflow(what));
        }
    }
}

/// Decode a 32-bit unsigned integer from a buffer
pub fn decode_u32(buf: &mut impl Buf, what: &'static str) -> Result<u32> {
    let value = decode_u64(buf, what)?;
    u32::try_from(value).map_err(|_| Error::VarintOverflow(what))
}

/// Write an unsigned integer to an `io::Write` stream
pub fn write_u64(w: &mut impl Write, mut value: u64) -> std::io::Result<()> {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;

        if value != 0 {
            byte |= 0x80;
        }

        w.write_all(&[byte])?;

        if value == 0 {
            return Ok(());
        }
    }
}

/// Write a 32-bit unsigned integer to an `io::Write` stream
pub fn write_u32(w: &mut impl Write, value: u32) -> std::io::Result<()> {
    write_u64(w, value as u64)
}

/// Read an unsigned integer from an `io::Read` stream
pub fn read_u64(r: &mut impl Read, what: &'static str) -> Result<u64> {
    let mut value: u64 = 0;
    let mut shift = 0;
    let mut byte = [0u8; 1];

    loop {
        r.read_exact(&mut byte)?;
        let byte = byte[0];
        if shift == 63 && byte > 1 {
            return Err(Error::VarintOverflow(what));
        }
        value |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            return Ok(value);
        }

        shift += 7;
        if shift >= 64 {
            return Err(Error::VarintOverflow(what));
        }
    }
}

/// Read a 32-bit unsigned integer from an `io::Read` stream
pub fn read_u32(r: &mut impl Read, what: &'static str) -> Result<u32> {
    let value = read_u64(r, what)?;
    u32::try_from(value).map_err(|_| Error::VarintOverflow(what))
}

/// Number of bytes `encode_u32` would produce for `value`
pub fn encoded_len_u32(value: u32) -> usize {
    encoded_len_u64(value as u64)
}

/// Number of bytes `encode_u64` would produce for `value`
pub fn encoded_len_u64(value: u64) -> usize {
    if value == 0 {
        return 1;
    }
    (64 - value.leading_zeros() as usize).div_ceil(7)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn roundtrip(value: u64) -> u64 {
        let mut buf = BytesMut::new();
        encode_u64(&mut buf, value);
        let mut cursor = buf.as_ref();
        let decoded = decode_u64(&mut cursor, "test").unwrap();
        assert!(!cursor.has_remaining());
        decoded
    }

    // ---------------------------------------------------------------
    // Round-trips
    // ---------------------------------------------------------------

    #[test]
    fn test_zero() {
        assert_eq!(roundtrip(0), 0);
    }

    #[test]
    fn test_small_values() {
        for v in 0..300 {
            assert_eq!(roundtrip(v), v);
        }
    }

    #[test]
    fn test_large_values() {
        for v in [1_000_000, u32::MAX as u64, u64::MAX / 2, u64::MAX] {
            assert_eq!(roundtrip(v), v);
        }
    }

    #[test]
    fn test_u32_roundtrip() {
        let mut buf = BytesMut::new();
        encode_u32(&mut buf, 123_456);
        let decoded = decode_u32(&mut buf.as_ref(), "test").unwrap();
        assert_eq!(decoded, 123_456);
    }

    // ---------------------------------------------------------------
    // Byte-length boundaries
    // ---------------------------------------------------------------

    #[test]
    fn test_length_boundaries() {
        for (value, expected) in [(0u64, 1), (127, 1), (128, 2), (16_383, 2), (16_384, 3)] {
            let mut buf = BytesMut::new();
            encode_u64(&mut buf, value);
            assert_eq!(buf.len(), expected, "length of {}", value);
            assert_eq!(encoded_len_u64(value), expected);
        }
    }

    #[test]
    fn test_encoded_len_matches_encoding() {
        for v in [0u32, 1, 127, 128, 300, 65_535, u32::MAX] {
            let mut buf = BytesMut::new();
            encode_u32(&mut buf, v);
            assert_eq!(buf.len(), encoded_len_u32(v));
        }
    }

    // ---------------------------------------------------------------
    // Malformed input
    // ---------------------------------------------------------------

    #[test]
    fn test_truncated_input_is_error() {
        // continuation bit set, but no next byte
        let data = [0x80u8];
        let err = decode_u64(&mut &data[..], "test").unwrap_err();
        assert!(matches!(err, crate::Error::Truncated("test")));
    }

    #[test]
    fn test_empty_input_is_error() {
        let data: [u8; 0] = [];
        assert!(decode_u64(&mut &data[..], "test").is_err());
    }

    #[test]
    fn test_overflow_is_error() {
        // 11 continuation bytes cannot fit in a u64
        let data = [0xFFu8; 11];
        let err = decode_u64(&mut &data[..], "test").unwrap_err();
        assert!(matches!(err, crate::Error::VarintOverflow("test")));
    }

    #[test]
    fn test_u32_overflow_is_error() {
        let mut buf = BytesMut::new();
        encode_u64(&mut buf, u32::MAX as u64 + 1);
        assert!(decode_u32(&mut buf.as_ref(), "test").is_err());
    }

    // ---------------------------------------------------------------
    // io::Read / io::Write variants
    // ---------------------------------------------------------------

    #[test]
    fn test_io_roundtrip() {
        let mut out = Vec::new();
        for v in [0u64, 1, 127, 128, 1_000_000, u64::MAX] {
            write_u64(&mut out, v).unwrap();
        }

        let mut cursor = std::io::Cursor::new(out);
        for expected in [0u64, 1, 127, 128, 1_000_000, u64::MAX] {
            assert_eq!(read_u64(&mut cursor, "test").unwrap(), expected);
        }
    }

    #[test]
    fn test_io_matches_buf_encoding() {
        for v in [0u64, 127, 128, 99_999_999] {
            let mut io_bytes = Vec::new();
            write_u64(&mut io_bytes, v).unwrap();

            let mut buf_bytes = BytesMut::new();
            encode_u64(&mut buf_bytes, v);

            assert_eq!(io_bytes.as_slice(), buf_bytes.as_ref());
        }
    }

    #[test]
    fn test_io_truncated_is_error() {
        let mut cursor = std::io::Cursor::new(vec![0x80u8]);
        assert!(read_u64(&mut cursor, "test").is_err());
    }
}
