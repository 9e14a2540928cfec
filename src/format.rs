//! On-disk layout constants and the fixed 16-byte file header.
//!
//! ```text
//! offset 0   4 B   magic "EMB1"
//! offset 4   2 B   format version, little-endian u16, currently 1
//! offset 6   4 B   vector dimension, little-endian u32
//! offset 10  6 B   zero padding
//! offset 16  ...   records, back-to-back: id[16] then dim * 4 B of
//!                  little-endian IEEE-754 f32
//! ```
//!
//! The header size is part of the format and never changes. The record
//! region length is always a multiple of the record length; anything
//! else is a crashed append and is truncated away at open time.

use crate::error::{Error, Result};

/// First four bytes of every database file.
pub const MAGIC: [u8; 4] = *b"EMB1";

/// Current format version.
pub const VERSION: u16 = 1;

/// Fixed header length in bytes.
pub const HEADER_LEN: usize = 16;

/// Fixed id width in bytes. Ids are opaque; the engine never interprets
/// them beyond byte equality in callers' hands.
pub const ID_LEN: usize = 16;

/// Bytes occupied by one record for a database of dimension `dim`.
pub(crate) fn record_len(dim: u32) -> usize {
    ID_LEN + 4 * dim as usize
}

/// Parsed file header. Only the dimension is variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub dim: u32,
}

impl Header {
    pub fn new(dim: u32) -> Self {
        debug_assert!(dim >= 1);
        Self { dim }
    }

    pub fn record_len(&self) -> usize {
        record_len(self.dim)
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..6].copy_from_slice(&VERSION.to_le_bytes());
        buf[6..10].copy_from_slice(&self.dim.to_le_bytes());
        buf
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(Error::Corrupt("file shorter than header"));
        }
        if buf[0..4] != MAGIC {
            return Err(Error::HeaderMismatch);
        }
        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version != VERSION {
            return Err(Error::VersionUnsupported(version));
        }
        let dim = u32::from_le_bytes([buf[6], buf[7], buf[8], buf[9]]);
        if dim == 0 {
            return Err(Error::Corrupt("header carries a zero dimension"));
        }
        Ok(Self { dim })
    }
}
