//! Container synthesis.
//!
//! [`ImageBuilder`] lays out a global header followed by one header span
//! and payload per section, filling in every CRC. Header words that are not
//! given default to zero, and the reserved word is always written as zero.

use crate::container::GLOBAL_HEADER_SIZE;
use crate::crc::crc32;
use crate::scanner::{write_u32_le, SectionHeader, MAGIC, SECTION_HEADER_SPAN};

/// Description of one section to lay out
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionSpec {
    /// Opaque version word
    pub version: u32,
    /// Opaque build date word
    pub build_date: u32,
    /// Opaque flags word
    pub flags: u32,
    /// Payload bytes
    pub payload: Vec<u8>,
}

impl SectionSpec {
    /// Creates a section with zeroed header words
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            ..Self::default()
        }
    }

    /// Sets the version word
    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Sets the build date word
    pub fn build_date(mut self, build_date: u32) -> Self {
        self.build_date = build_date;
        self
    }

    /// Sets the flags word
    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }
}

#[derive(Debug, Clone)]
enum Item {
    Section(SectionSpec),
    Gap(usize),
}

/// Builds well-formed containers
#[derive(Debug, Clone, Default)]
pub struct ImageBuilder {
    items: Vec<Item>,
}

impl ImageBuilder {
    /// Creates an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a section with zeroed header words
    pub fn section(self, payload: impl Into<Vec<u8>>) -> Self {
        self.section_with(SectionSpec::new(payload))
    }

    /// Appends a fully described section
    pub fn section_with(mut self, spec: SectionSpec) -> Self {
        self.items.push(Item::Section(spec));
        self
    }

    /// Appends `len` zero bytes between sections
    pub fn gap(mut self, len: usize) -> Self {
        self.items.push(Item::Gap(len));
        self
    }

    /// Lays out the image and computes every CRC
    pub fn build(&self) -> Vec<u8> {
        let mut image = vec![0u8; GLOBAL_HEADER_SIZE];

        for item in &self.items {
            match item {
                Item::Gap(len) => image.resize(image.len() + len, 0),
                Item::Section(spec) => {
                    let header_start = image.len();
                    let header = SectionHeader {
                        header_crc: crc32(&spec.payload),
                        version: spec.version,
                        build_date: spec.build_date,
                        length: spec.payload.len() as u32,
                        flags: spec.flags,
                        magic: MAGIC,
                        payload_start: header_start + SECTION_HEADER_SPAN,
                    };

                    image.extend_from_slice(&header.encode());
                    image.resize(header_start + SECTION_HEADER_SPAN, 0);
                    image.extend_from_slice(&spec.payload);
                }
            }
        }

        let global_crc = crc32(&image[GLOBAL_HEADER_SIZE..]);
        write_u32_le(&mut image, 0, global_crc);
        image
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::parse;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_image() {
        let image = ImageBuilder::new().build();
        assert_eq!(image, vec![0u8; GLOBAL_HEADER_SIZE]);
    }

    #[test]
    fn test_header_words() {
        let image = ImageBuilder::new()
            .section_with(
                SectionSpec::new(b"payload".to_vec())
                    .version(7)
                    .build_date(0x2014_0102)
                    .flags(0x10),
            )
            .build();

        let sections = parse(&image).unwrap();
        assert_eq!(sections.len(), 1);

        let section = sections[0];
        assert_eq!(section.version, 7);
        assert_eq!(section.build_date, 0x2014_0102);
        assert_eq!(section.flags, 0x10);
        assert_eq!(section.magic, MAGIC);
        assert_eq!(section.header_offset(), GLOBAL_HEADER_SIZE);
        assert_eq!(
            image.len(),
            GLOBAL_HEADER_SIZE + SECTION_HEADER_SPAN + b"payload".len()
        );
    }

    #[test]
    fn test_gap_shifts_sections() {
        let image = ImageBuilder::new()
            .section(vec![1u8; 10])
            .gap(100)
            .section(vec![2u8; 10])
            .build();
        let sections = parse(&image).unwrap();

        assert_eq!(sections[1].header_offset(), sections[0].end() + 100);
    }
}
