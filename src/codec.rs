//! Hex/Binary Codec
//!
//! Fixed-width little-endian integers, 32-byte hashes, length-prefixed blobs
//! and JSON records. Everything that crosses the wire boundary goes through
//! this module; nothing else in the crate slices raw bytes.

use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::{MarketError, Result};

/// Width of the length prefix in front of variable-size fields
pub const VAR_LENGTH_WIDTH: usize = 2;

// ============================================================================
// HASH
// ============================================================================

/// A SHA-256 digest
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub const LEN: usize = 32;
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| MarketError::format(format!("Expected 32 byte hash, got {}", bytes.len())))?;
        Ok(Hash256(array))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self.to_hex())
    }
}

impl FromStr for Hash256 {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self> {
        Hash256::from_slice(&from_hex(s)?)
    }
}

/// SHA-256 of a byte string
pub fn sha256(data: &[u8]) -> Hash256 {
    Hash256(Sha256::digest(data).into())
}

/// SHA-256 of the concatenation of two hashes
pub fn sha256_pair(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(left.0);
    hasher.update(right.0);
    Hash256(hasher.finalize().into())
}

// ============================================================================
// INTEGERS
// ============================================================================

/// Encode `n` as exactly `width` little-endian bytes.
pub fn encode_uint(n: u64, width: usize) -> Result<Vec<u8>> {
    if width == 0 || width > 8 {
        return Err(MarketError::bounds(format!("Unsupported integer width {}", width)));
    }
    if width < 8 && n >> (8 * width) != 0 {
        return Err(MarketError::bounds(format!("{} does not fit in {} byte(s)", n, width)));
    }
    Ok(n.to_le_bytes()[..width].to_vec())
}

/// Decode a little-endian integer; the width is the slice length.
pub fn decode_uint(bytes: &[u8]) -> Result<u64> {
    if bytes.is_empty() || bytes.len() > 8 {
        return Err(MarketError::format(format!("Unsupported integer width {}", bytes.len())));
    }
    let mut buf = [0u8; 8];
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(u64::from_le_bytes(buf))
}

// ============================================================================
// HEX & JSON
// ============================================================================

pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

pub fn from_hex(s: &str) -> Result<Vec<u8>> {
    hex::decode(s).map_err(|e| MarketError::format(format!("Invalid hex: {}", e)))
}

/// Encode a structured record as JSON bytes
pub fn encode_json_field<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| MarketError::format(format!("JSON encode failed: {}", e)))
}

/// Decode a structured record from JSON bytes
pub fn decode_json_field<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| MarketError::format(format!("Malformed JSON field: {}", e)))
}

/// Append a length-prefixed variable field
pub fn write_var(out: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    out.extend(encode_uint(bytes.len() as u64, VAR_LENGTH_WIDTH)?);
    out.extend_from_slice(bytes);
    Ok(())
}

// ============================================================================
// BYTE READER
// ============================================================================

/// Cursor over wire bytes. Short reads and trailing bytes are format errors.
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn read(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(MarketError::format(format!(
                "Unexpected end of input: wanted {} byte(s) at offset {}, {} left",
                len,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read(1)?[0])
    }

    pub fn read_uint(&mut self, width: usize) -> Result<u64> {
        decode_uint(self.read(width)?)
    }

    pub fn read_hash(&mut self) -> Result<Hash256> {
        Hash256::from_slice(self.read(Hash256::LEN)?)
    }

    pub fn read_var(&mut self) -> Result<&'a [u8]> {
        let len = self.read_uint(VAR_LENGTH_WIDTH)? as usize;
        self.read(len)
    }

    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.bytes[self.pos..];
        self.pos = self.bytes.len();
        rest
    }

    /// Fail if anything is left unread
    pub fn finish(self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(MarketError::format(format!("{} trailing byte(s)", self.remaining())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_encode_uint_fixed_width() {
        assert_eq!(encode_uint(0, 1).unwrap(), vec![0x00]);
        assert_eq!(encode_uint(255, 1).unwrap(), vec![0xff]);
        assert_eq!(encode_uint(0x0102, 2).unwrap(), vec![0x02, 0x01]);
        assert_eq!(encode_uint(726_818, 6).unwrap().len(), 6);
    }

    #[test]
    fn test_encode_uint_rejects_overflow() {
        assert!(matches!(encode_uint(256, 1), Err(MarketError::Bounds(_))));
        assert!(matches!(encode_uint(1 << 48, 6), Err(MarketError::Bounds(_))));
        assert!(matches!(encode_uint(1, 0), Err(MarketError::Bounds(_))));
        assert!(encode_uint(u64::MAX, 8).is_ok());
    }

    #[test]
    fn test_decode_uint_inverts_encode() {
        for (n, width) in [(0u64, 1usize), (200, 1), (65_535, 2), (123_456_789, 6), (u64::MAX, 8)] {
            let bytes = encode_uint(n, width).unwrap();
            assert_eq!(decode_uint(&bytes).unwrap(), n);
        }
        assert!(decode_uint(&[]).is_err());
    }

    #[test]
    fn test_hash_hex_parsing() {
        let h = sha256(b"blackbook");
        let parsed: Hash256 = h.to_hex().parse().unwrap();
        assert_eq!(parsed, h);
        assert!("abcd".parse::<Hash256>().is_err());
        assert!("zz".parse::<Hash256>().is_err());
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        resolve: String,
        limit: Option<u32>,
    }

    #[test]
    fn test_json_field() {
        let record = Record { resolve: "oracle.example".into(), limit: Some(3) };
        let bytes = encode_json_field(&record).unwrap();
        assert_eq!(decode_json_field::<Record>(&bytes).unwrap(), record);
        assert!(matches!(decode_json_field::<Record>(b"{not json"), Err(MarketError::Format(_))));
    }

    #[test]
    fn test_reader_short_and_trailing() {
        let mut out = Vec::new();
        write_var(&mut out, b"abc").unwrap();
        out.push(7);

        let mut reader = ByteReader::new(&out);
        assert_eq!(reader.read_var().unwrap(), b"abc");
        assert_eq!(reader.remaining(), 1);
        assert!(ByteReader::new(&out).read(10).is_err());

        let mut reader = ByteReader::new(&out);
        reader.read_var().unwrap();
        assert!(matches!(reader.finish(), Err(MarketError::Format(_))));
    }
}
