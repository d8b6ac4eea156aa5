//! Payload compression
//!
//! Records travel to the broker as self-describing frames so the receiving
//! side never needs to know which codec the writer was configured with.
//!
//! # Wire Format
//!
//! ```text
//! +-------+------------------+
//! | Codec | Body             |
//! | 1 byte| N bytes          |
//! +-------+------------------+
//!
//! Codec byte: 0 = None, 1 = Snappy (raw), 2 = LZ4 (size-prepended block)
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Upper bound for a decompressed record
pub const MAX_DECOMPRESSED_SIZE: usize = 64 * 1024 * 1024;

// ============================================================================
// Codec Selection
// ============================================================================

/// Compression codec applied to record payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum CompressionCodec {
    /// Passthrough
    #[default]
    None = 0,
    /// Snappy raw block format
    Snappy = 1,
    /// LZ4 block with a little-endian size prefix
    Lz4 = 2,
}

impl CompressionCodec {
    /// Codec identifier written in the frame header
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Parse a codec identifier from a frame header
    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(Self::None),
            1 => Ok(Self::Snappy),
            2 => Ok(Self::Lz4),
            other => Err(Error::UnknownCodec(format!("codec id {}", other))),
        }
    }

    /// Name as used in configuration files and on the command line
    pub const fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Snappy => "snappy",
            Self::Lz4 => "lz4",
        }
    }
}

impl fmt::Display for CompressionCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CompressionCodec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "snappy" => Ok(Self::Snappy),
            "lz4" => Ok(Self::Lz4),
            other => Err(Error::UnknownCodec(other.to_string())),
        }
    }
}

// ============================================================================
// Encode / Decode
// ============================================================================

/// Compress `data` into a self-describing frame
pub fn compress(codec: CompressionCodec, data: &[u8]) -> Result<Bytes> {
    let body = match codec {
        CompressionCodec::None => None,
        CompressionCodec::Snappy => Some(
            snap::raw::Encoder::new()
                .compress_vec(data)
                .map_err(|e| Error::Compression(e.to_string()))?,
        ),
        CompressionCodec::Lz4 => Some(lz4_flex::block::compress_prepend_size(data)),
    };

    let body: &[u8] = body.as_deref().unwrap_or(data);
    let mut out = BytesMut::with_capacity(1 + body.len());
    out.put_u8(codec.as_byte());
    out.put_slice(body);
    Ok(out.freeze())
}

/// Decompress a frame produced by [`compress`], refusing outputs larger than `max_size`
pub fn decompress(frame: &[u8], max_size: usize) -> Result<Bytes> {
    let (&flag, body) = frame
        .split_first()
        .ok_or_else(|| Error::Decompression("empty frame".to_string()))?;

    match CompressionCodec::from_byte(flag)? {
        CompressionCodec::None => {
            if body.len() > max_size {
                return Err(Error::PayloadTooLarge(body.len(), max_size));
            }
            Ok(Bytes::copy_from_slice(body))
        }
        CompressionCodec::Snappy => {
            let len = snap::raw::decompress_len(body)
                .map_err(|e| Error::Decompression(e.to_string()))?;
            if len > max_size {
                return Err(Error::PayloadTooLarge(len, max_size));
            }
            snap::raw::Decoder::new()
                .decompress_vec(body)
                .map(Bytes::from)
                .map_err(|e| Error::Decompression(e.to_string()))
        }
        CompressionCodec::Lz4 => {
            let prefix: [u8; 4] = body
                .get(..4)
                .and_then(|p| p.try_into().ok())
                .ok_or_else(|| Error::Decompression("truncated lz4 size prefix".to_string()))?;
            let len = u32::from_le_bytes(prefix) as usize;
            if len > max_size {
                return Err(Error::PayloadTooLarge(len, max_size));
            }
            lz4_flex::block::decompress_size_prepended(body)
                .map(Bytes::from)
                .map_err(|e| Error::Decompression(e.to_string()))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
