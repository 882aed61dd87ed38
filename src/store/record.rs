//! On-media record format
//!
//! ```text
//! ┌──────────────┬──────────┬──────────────┬───────────┬──────────────┐
//! │ ValueLen (2) │ Key (16) │ Version (2)  │ Value (N) │ Checksum (4) │
//! └──────────────┴──────────┴──────────────┴───────────┴──────────────┘
//! ```
//!
//! All integers are little-endian. The checksum is the DJB hash of every
//! preceding byte of the record. A record always starts on a block boundary.

use std::fmt;

use crate::error::{NvmError, Result};
use crate::hash::{Djb2, KeyHasher};

pub const KEY_LEN: usize = 16;
pub const VAL_SIZE_LEN: usize = 2;
pub const VERSION_LEN: usize = 2;
pub const CHECKSUM_LEN: usize = 4;

pub const VAL_SIZE_OFFSET: usize = 0;
pub const KEY_OFFSET: usize = VAL_SIZE_OFFSET + VAL_SIZE_LEN;
pub const VERSION_OFFSET: usize = KEY_OFFSET + KEY_LEN;
pub const VALUE_OFFSET: usize = VERSION_OFFSET + VERSION_LEN;

/// Header plus trailing checksum
pub const RECORD_FIX_LEN: usize = VALUE_OFFSET + CHECKSUM_LEN;

/// Fixed-width key
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key([u8; KEY_LEN]);

impl Key {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Build a key from a slice of exactly `KEY_LEN` bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; KEY_LEN] = bytes.try_into().map_err(|_| NvmError::InvalidKey {
            len: bytes.len(),
            expected: KEY_LEN,
        })?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl TryFrom<&[u8]> for Key {
    type Error = NvmError;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        Self::from_slice(bytes)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", String::from_utf8_lossy(&self.0).escape_debug())
    }
}

/// Serialized length of a record holding `value_len` bytes
#[inline]
pub fn record_len(value_len: usize) -> usize {
    RECORD_FIX_LEN + value_len
}

/// Blocks needed for a record holding `value_len` bytes
#[inline]
pub fn blocks_for(value_len: usize, block_size: usize) -> usize {
    record_len(value_len).div_ceil(block_size)
}

/// Serialize a record into `buf`, replacing its contents
///
/// The value must already be checked against the 2-byte length field.
pub fn encode(key: &Key, version: u16, value: &[u8], buf: &mut Vec<u8>) {
    debug_assert!(value.len() <= u16::MAX as usize);

    buf.clear();
    buf.reserve(record_len(value.len()));
    buf.extend_from_slice(&(value.len() as u16).to_le_bytes());
    buf.extend_from_slice(key.as_bytes());
    buf.extend_from_slice(&version.to_le_bytes());
    buf.extend_from_slice(value);

    let checksum = Djb2::hash(buf);
    buf.extend_from_slice(&checksum.to_le_bytes());
}

/// Read the value length field from the first bytes of a candidate record
#[inline]
pub fn peek_value_len(header: &[u8]) -> u16 {
    u16::from_le_bytes([header[VAL_SIZE_OFFSET], header[VAL_SIZE_OFFSET + 1]])
}

/// Borrowed view over the bytes of one serialized record
#[derive(Clone, Copy)]
pub struct RecordView<'a> {
    bytes: &'a [u8],
}

impl<'a> RecordView<'a> {
    /// Wrap `bytes` if they are long enough to hold the record their length
    /// field describes
    ///
    /// Trailing bytes past the record are ignored.
    pub fn parse(bytes: &'a [u8]) -> Option<Self> {
        if bytes.len() < RECORD_FIX_LEN {
            return None;
        }
        let len = record_len(peek_value_len(bytes) as usize);
        bytes.get(..len).map(|bytes| Self { bytes })
    }

    pub fn value_len(&self) -> u16 {
        peek_value_len(self.bytes)
    }

    pub fn key(&self) -> Key {
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&self.bytes[KEY_OFFSET..KEY_OFFSET + KEY_LEN]);
        Key(key)
    }

    pub fn version(&self) -> u16 {
        u16::from_le_bytes([self.bytes[VERSION_OFFSET], self.bytes[VERSION_OFFSET + 1]])
    }

    pub fn value(&self) -> &'a [u8] {
        &self.bytes[VALUE_OFFSET..self.bytes.len() - CHECKSUM_LEN]
    }

    pub fn stored_checksum(&self) -> u32 {
        let at = self.bytes.len() - CHECKSUM_LEN;
        u32::from_le_bytes([
            self.bytes[at],
            self.bytes[at + 1],
            self.bytes[at + 2],
            self.bytes[at + 3],
        ])
    }

    /// Whether the trailing checksum covers exactly the preceding bytes
    pub fn is_valid(&self) -> bool {
        let body = &self.bytes[..self.bytes.len() - CHECKSUM_LEN];
        Djb2::hash(body) == self.stored_checksum()
    }

    /// Total serialized length
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
