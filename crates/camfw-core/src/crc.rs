//! CRC32 engine.
//!
//! Containers use the standard reflected CRC-32 (ISO-HDLC, the zlib one) for
//! both the global checksum and every section checksum. The [`Checksum`]
//! trait keeps the engine swappable; [`Crc32`] is backed by `crc32fast`.

/// A 32-bit checksum over a byte range
pub trait Checksum: Send + Sync {
    /// Computes the checksum of `data`
    fn checksum(&self, data: &[u8]) -> u32;
}

/// CRC-32/ISO-HDLC via `crc32fast`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Crc32;

impl Checksum for Crc32 {
    fn checksum(&self, data: &[u8]) -> u32 {
        crc32(data)
    }
}

/// Computes the CRC-32 of a byte slice
pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}
