//! Block compression used by the container engine.
//!
//! Every data block records the id of the compressor that produced it, so a
//! container may mix stored and compressed blocks (for example after
//! appending with `-u` to a compressed container).  Ids are written to disk
//! and are never reused.

use thiserror::Error;

/// Default zstd level for new blocks.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

// ── CompressionId ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionId {
    /// Payload stored verbatim.
    None = 0,
    Zstd = 1,
}

impl CompressionId {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(CompressionId::None),
            1 => Some(CompressionId::Zstd),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CompressionId::None => "none",
            CompressionId::Zstd => "zstd",
        }
    }
}

// ── Compression setting ──────────────────────────────────────────────────────

/// Compression applied to newly written blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compression {
    pub id:    CompressionId,
    pub level: i32,
}

impl Compression {
    pub const NONE: Compression = Compression { id: CompressionId::None, level: 0 };

    pub fn zstd(level: i32) -> Self {
        Self { id: CompressionId::Zstd, level }
    }
}

impl Default for Compression {
    fn default() -> Self { Self::zstd(DEFAULT_COMPRESSION_LEVEL) }
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Decompression error: {0}")]
    Decompression(String),
    #[error("Unknown compression id {0}")]
    UnknownId(u8),
}

// ── Compressor trait ─────────────────────────────────────────────────────────

pub trait Compressor {
    fn id(&self) -> CompressionId;
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CompressionError>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError>;
}

pub struct Stored;
impl Compressor for Stored {
    fn id(&self) -> CompressionId { CompressionId::None }
    fn compress(&self, data: &[u8], _: i32) -> Result<Vec<u8>, CompressionError> { Ok(data.to_vec()) }
    fn decompress(&self, data: &[u8])        -> Result<Vec<u8>, CompressionError> { Ok(data.to_vec()) }
}

pub struct Zstd;
impl Compressor for Zstd {
    fn id(&self) -> CompressionId { CompressionId::Zstd }
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CompressionError> {
        zstd::encode_all(data, level).map_err(|e| CompressionError::Compression(e.to_string()))
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        zstd::decode_all(data).map_err(|e| CompressionError::Decompression(e.to_string()))
    }
}

/// Resolve a compression id to its implementation.
pub fn get_compressor(id: CompressionId) -> Box<dyn Compressor> {
    match id {
        CompressionId::None => Box::new(Stored),
        CompressionId::Zstd => Box::new(Zstd),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zstd_roundtrip() {
        let data: Vec<u8> = (0u8..=255).cycle().take(10_000).collect();
        let c = get_compressor(CompressionId::Zstd);
        let packed = c.compress(&data, DEFAULT_COMPRESSION_LEVEL).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(c.decompress(&packed).unwrap(), data);
    }

    #[test]
    fn unknown_ids_are_rejected() {
        assert_eq!(CompressionId::from_u8(1), Some(CompressionId::Zstd));
        assert_eq!(CompressionId::from_u8(7), None);
    }
}
