//! Container parsing.
//!
//! A container is a 224-byte global header followed by sections. The
//! global header starts with a CRC over everything after it; each section
//! is a 256-byte header span followed by a payload protected by the CRC in
//! that header.
//!
//! [`Parser::parse`] drives the trailer scanner across the image and
//! returns the sections in stream order. The scan resumes after each
//! payload, so trailer bytes that happen to appear inside payload data are
//! never mistaken for a section boundary.

mod patch;

use crate::crc::{Checksum, Crc32};
use crate::error::ParseError;
use crate::scanner::{decode_header, find_magic, read_u32_le, SectionHeader, SECTION_HEADER_SPAN};
use std::ops::Range;
use tracing::{debug, trace, warn};

pub use patch::{patch, PatchPlan, PatchReport, Patcher};

/// Size of the global header; the global CRC covers everything after it
pub const GLOBAL_HEADER_SIZE: usize = 224;

/// Default ceiling on the number of sections in one image
pub const DEFAULT_MAX_SECTIONS: usize = 100;

/// A section found in a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    /// Position in the stream, starting at 0
    pub index: usize,
    /// Offset of the first payload byte
    pub offset: usize,
    /// Payload length in bytes
    pub length: usize,
    /// CRC stored in the section header
    pub header_crc: u32,
    /// CRC computed over the payload
    pub actual_crc: u32,
    /// Opaque version word
    pub version: u32,
    /// Opaque build date word
    pub build_date: u32,
    /// Opaque flags word
    pub flags: u32,
    /// Trailer word
    pub magic: u32,
}

impl Section {
    fn new(index: usize, header: &SectionHeader, actual_crc: u32) -> Self {
        Self {
            index,
            offset: header.payload_start,
            length: header.length as usize,
            header_crc: header.header_crc,
            actual_crc,
            version: header.version,
            build_date: header.build_date,
            flags: header.flags,
            magic: header.magic,
        }
    }

    /// Offset of the section header, where the CRC word lives
    pub fn header_offset(&self) -> usize {
        self.offset - SECTION_HEADER_SPAN
    }

    /// Offset just past the payload
    pub fn end(&self) -> usize {
        self.offset + self.length
    }

    /// Byte range of the payload
    pub fn range(&self) -> Range<usize> {
        self.offset..self.end()
    }

    /// Returns the payload bytes from the image this section was parsed from
    pub fn payload<'a>(&self, image: &'a [u8]) -> &'a [u8] {
        &image[self.range()]
    }

    /// Returns true if the stored CRC matches the payload
    pub fn is_valid(&self) -> bool {
        self.header_crc == self.actual_crc
    }
}

/// Configuration for the parser
#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Maximum number of sections before the image is rejected
    pub max_sections: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_sections: DEFAULT_MAX_SECTIONS,
        }
    }
}

impl ParserConfig {
    /// Creates a new parser config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of sections
    pub fn max_sections(mut self, max: usize) -> Self {
        self.max_sections = max;
        self
    }
}

/// Result of a non-aborting walk over a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Survey {
    /// CRC stored at offset 0
    pub global_crc: u32,
    /// CRC computed over the body
    pub actual_global_crc: u32,
    /// Every section found, valid or not
    pub sections: Vec<Section>,
}

impl Survey {
    /// Returns true if the global CRC matches the body
    pub fn global_crc_ok(&self) -> bool {
        self.global_crc == self.actual_global_crc
    }

    /// Returns true if the global CRC and every section CRC match
    pub fn is_valid(&self) -> bool {
        self.global_crc_ok() && self.sections.iter().all(Section::is_valid)
    }

    /// Returns the first section whose CRC does not match
    pub fn first_mismatch(&self) -> Option<&Section> {
        self.sections.iter().find(|s| !s.is_valid())
    }
}

/// Container parser
#[derive(Debug, Clone)]
pub struct Parser<C = Crc32> {
    config: ParserConfig,
    checksum: C,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    /// Creates a new parser with default configuration
    pub fn new() -> Self {
        Self::with_config(ParserConfig::default())
    }

    /// Creates a new parser with custom configuration
    pub fn with_config(config: ParserConfig) -> Self {
        Self {
            config,
            checksum: Crc32,
        }
    }
}

impl<C: Checksum> Parser<C> {
    /// Creates a parser with a custom checksum engine
    pub fn with_checksum(config: ParserConfig, checksum: C) -> Self {
        Self { config, checksum }
    }

    /// Returns the parser configuration
    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Computes a checksum with this parser's engine
    pub fn checksum(&self, data: &[u8]) -> u32 {
        self.checksum.checksum(data)
    }

    /// Parses and validates a container.
    ///
    /// Fails on the first structural or CRC problem. On success the
    /// sections are in increasing, non-overlapping offset order and each
    /// one's CRC matches its payload.
    pub fn parse(&self, data: &[u8]) -> Result<Vec<Section>, ParseError> {
        debug!("Parsing {} byte image", data.len());

        let (expected, actual) = self.global_crcs(data)?;
        if expected != actual {
            return Err(ParseError::GlobalCrcMismatch { expected, actual });
        }

        let mut sections = Vec::new();
        self.walk(data, |section| {
            if !section.is_valid() {
                return Err(ParseError::SectionCrcMismatch {
                    index: section.index,
                    expected: section.header_crc,
                    actual: section.actual_crc,
                });
            }
            sections.push(section);
            Ok(())
        })?;

        debug!("Parse complete: found {} sections", sections.len());
        Ok(sections)
    }

    /// Walks a container without stopping at CRC mismatches.
    ///
    /// Structural problems (image too small, truncated sections, too many
    /// sections) still fail. The result must not be used to patch.
    pub fn survey(&self, data: &[u8]) -> Result<Survey, ParseError> {
        let (global_crc, actual_global_crc) = self.global_crcs(data)?;
        if global_crc != actual_global_crc {
            warn!(
                "Global CRC mismatch: header 0x{:08x}, body 0x{:08x}",
                global_crc, actual_global_crc
            );
        }

        let mut sections = Vec::new();
        self.walk(data, |section| {
            if !section.is_valid() {
                warn!(
                    "Section {} CRC mismatch: header 0x{:08x}, payload 0x{:08x}",
                    section.index, section.header_crc, section.actual_crc
                );
            }
            sections.push(section);
            Ok(())
        })?;

        Ok(Survey {
            global_crc,
            actual_global_crc,
            sections,
        })
    }

    /// Returns the stored and computed global CRC
    fn global_crcs(&self, data: &[u8]) -> Result<(u32, u32), ParseError> {
        let expected = stored_global_crc(data).ok_or(ParseError::ImageTooSmall {
            size: data.len(),
            min: GLOBAL_HEADER_SIZE,
        })?;
        let actual = self.checksum.checksum(&data[GLOBAL_HEADER_SIZE..]);
        trace!(
            "Global CRC: header 0x{:08x}, body 0x{:08x}",
            expected,
            actual
        );
        Ok((expected, actual))
    }

    /// Scans the image section by section, handing each one to `visit`
    fn walk<F>(&self, data: &[u8], mut visit: F) -> Result<(), ParseError>
    where
        F: FnMut(Section) -> Result<(), ParseError>,
    {
        let mut cursor = 0;
        let mut index = 0;

        while let Some(end_offset) = find_magic(data, cursor) {
            if index >= self.config.max_sections {
                return Err(ParseError::TooManySections {
                    max: self.config.max_sections,
                });
            }

            let header = decode_header(data, end_offset)?;
            let payload = payload_range(data, index, &header)?;
            let actual_crc = self.checksum.checksum(&data[payload.clone()]);
            let section = Section::new(index, &header, actual_crc);

            trace!(
                "Section {} at offset {} length {} CRC 0x{:08x}",
                index,
                section.offset,
                section.length,
                section.header_crc
            );

            visit(section)?;
            cursor = payload.end;
            index += 1;
        }

        Ok(())
    }
}

/// Bounds-checks a section payload against the image
fn payload_range(
    data: &[u8],
    index: usize,
    header: &SectionHeader,
) -> Result<Range<usize>, ParseError> {
    let start = header.payload_start;
    let end = start.checked_add(header.length as usize);

    match end {
        Some(end) if end <= data.len() => Ok(start..end),
        _ => Err(ParseError::TruncatedSection {
            index,
            offset: start,
            length: header.length,
            available: data.len().saturating_sub(start),
        }),
    }
}

/// Global CRC stored at offset 0, if the global header is complete
pub fn stored_global_crc(data: &[u8]) -> Option<u32> {
    if data.len() < GLOBAL_HEADER_SIZE {
        return None;
    }
    read_u32_le(data, 0)
}

/// Parses a container with the default configuration
pub fn parse(data: &[u8]) -> Result<Vec<Section>, ParseError> {
    Parser::new().parse(data)
}
