//! Section header decoding.
//!
//! Each section payload is preceded by a 256-byte header span. Only the
//! first 28 bytes carry data, seven little-endian words:
//!
//! | offset | field        |
//! |--------|--------------|
//! | 0      | payload CRC  |
//! | 4      | version      |
//! | 8      | build date   |
//! | 12     | length       |
//! | 16     | reserved     |
//! | 20     | flags        |
//! | 24     | magic        |
//!
//! The magic word is the trailer the scanner synchronizes on, so a header is
//! located from its end rather than its start.

use crate::error::ParseError;
use bytes::{Buf, BufMut};

/// Number of decoded bytes at the start of a section header
pub const SECTION_HEADER_SIZE: usize = 28;

/// Total span of a section header, from its first byte to the payload
pub const SECTION_HEADER_SPAN: usize = 0x100;

/// Magic word closing every section header (`90 EB 24 A3` on disk)
pub const MAGIC: u32 = 0xA324_EB90;

/// A decoded section header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    /// CRC the payload is expected to have
    pub header_crc: u32,
    /// Opaque version word
    pub version: u32,
    /// Opaque build date word
    pub build_date: u32,
    /// Payload length in bytes
    pub length: u32,
    /// Opaque flags word
    pub flags: u32,
    /// Trailer word, [`MAGIC`] for any header found by the scanner
    pub magic: u32,
    /// Offset of the first payload byte
    pub payload_start: usize,
}

impl SectionHeader {
    /// Offset of the first header byte
    pub fn header_start(&self) -> usize {
        self.payload_start - SECTION_HEADER_SPAN
    }

    /// Encodes the 28 data bytes of the header. The reserved word is zero.
    pub fn encode(&self) -> [u8; SECTION_HEADER_SIZE] {
        let mut out = [0u8; SECTION_HEADER_SIZE];
        let mut dst = &mut out[..];
        dst.put_u32_le(self.header_crc);
        dst.put_u32_le(self.version);
        dst.put_u32_le(self.build_date);
        dst.put_u32_le(self.length);
        dst.put_u32_le(0);
        dst.put_u32_le(self.flags);
        dst.put_u32_le(self.magic);
        out
    }
}

/// Decodes the section header whose trailer ends at `end_offset`.
///
/// This is a pure structural read: neither the magic word nor the length
/// is checked against the buffer here.
pub fn decode_header(data: &[u8], end_offset: usize) -> Result<SectionHeader, ParseError> {
    if end_offset > data.len() || end_offset < SECTION_HEADER_SIZE {
        return Err(ParseError::HeaderOutOfRange { end_offset });
    }

    let header_start = end_offset - SECTION_HEADER_SIZE;
    let mut buf = &data[header_start..end_offset];

    let header_crc = buf.get_u32_le();
    let version = buf.get_u32_le();
    let build_date = buf.get_u32_le();
    let length = buf.get_u32_le();
    let _reserved = buf.get_u32_le();
    let flags = buf.get_u32_le();
    let magic = buf.get_u32_le();

    Ok(SectionHeader {
        header_crc,
        version,
        build_date,
        length,
        flags,
        magic,
        payload_start: header_start + SECTION_HEADER_SPAN,
    })
}

/// Reads a little-endian word at `offset`, if in range
pub fn read_u32_le(data: &[u8], offset: usize) -> Option<u32> {
    let mut buf = data.get(offset..offset.checked_add(4)?)?;
    Some(buf.get_u32_le())
}

/// Writes a little-endian word at `offset`.
///
/// # Panics
///
/// Panics if `offset + 4` exceeds the buffer; callers only write at offsets
/// the parser has already bounds-checked.
pub fn write_u32_le(data: &mut [u8], offset: usize, value: u32) {
    let mut dst = &mut data[offset..offset + 4];
    dst.put_u32_le(value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn header_bytes() -> Vec<u8> {
        let mut data = vec![0xEEu8; 4];
        data.extend_from_slice(&0x1111_1111u32.to_le_bytes());
        data.extend_from_slice(&0x0000_0002u32.to_le_bytes());
        data.extend_from_slice(&0x2013_0401u32.to_le_bytes());
        data.extend_from_slice(&0x0000_0040u32.to_le_bytes());
        data.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        data.extend_from_slice(&0x0000_0003u32.to_le_bytes());
        data.extend_from_slice(&[0x90, 0xEB, 0x24, 0xA3]);
        data
    }

    #[test]
    fn test_decode_header() {
        let data = header_bytes();
        let header = decode_header(&data, data.len()).unwrap();

        assert_eq!(
            header,
            SectionHeader {
                header_crc: 0x1111_1111,
                version: 2,
                build_date: 0x2013_0401,
                length: 0x40,
                flags: 3,
                magic: MAGIC,
                payload_start: 4 + SECTION_HEADER_SPAN,
            }
        );
        assert_eq!(header.header_start(), 4);
    }

    #[test]
    fn test_decode_out_of_range() {
        let data = header_bytes();
        assert_eq!(
            decode_header(&data, 27),
            Err(ParseError::HeaderOutOfRange { end_offset: 27 })
        );
        assert_eq!(
            decode_header(&data, data.len() + 1),
            Err(ParseError::HeaderOutOfRange {
                end_offset: data.len() + 1
            })
        );
    }

    #[test]
    fn test_encode_zeroes_reserved() {
        let data = header_bytes();
        let header = decode_header(&data, data.len()).unwrap();
        let encoded = header.encode();

        assert_eq!(&encoded[..16], &data[4..20]);
        assert_eq!(&encoded[16..20], &[0, 0, 0, 0]);
        assert_eq!(&encoded[20..], &data[24..]);
    }

    #[test]
    fn test_word_helpers() {
        let mut data = [0u8; 8];
        write_u32_le(&mut data, 2, 0xA324_EB90);
        assert_eq!(&data[2..6], &[0x90, 0xEB, 0x24, 0xA3]);
        assert_eq!(read_u32_le(&data, 2), Some(MAGIC));
        assert_eq!(read_u32_le(&data, 5), None);
        assert_eq!(read_u32_le(&data, usize::MAX), None);
    }
}
