//! Section replacement.
//!
//! A patch overwrites one section payload in place, zero-padding a shorter
//! replacement up to the section length, then rewrites the section CRC and
//! the global CRC. Containers cannot grow, so a longer replacement is
//! rejected before anything is written.
//!
//! After writing, the image is parsed again from scratch. The patch only
//! succeeds if the re-parse finds the same section layout; otherwise the
//! buffer holds a broken image and must be thrown away.

use super::{stored_global_crc, Parser, Section, GLOBAL_HEADER_SIZE};
use crate::crc::{Checksum, Crc32};
use crate::error::PatchError;
use crate::scanner::write_u32_le;
use tracing::{debug, info};

/// Outcome of the pre-write checks for a patch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchPlan {
    /// Target section
    pub index: usize,
    /// Payload offset of the target section
    pub offset: usize,
    /// Payload length of the target section
    pub length: usize,
    /// Size of the replacement
    pub replacement_len: usize,
    /// Zero bytes appended after the replacement
    pub padding: usize,
}

impl PatchPlan {
    /// Returns true if the replacement is shorter than the section
    pub fn is_padded(&self) -> bool {
        self.padding > 0
    }
}

/// Record of a completed, verified patch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchReport {
    /// Target section
    pub index: usize,
    /// Payload offset of the target section
    pub offset: usize,
    /// Payload length of the target section
    pub length: usize,
    /// Zero bytes appended after the replacement
    pub padding: usize,
    /// Section CRC before the patch
    pub old_crc: u32,
    /// Section CRC after the patch
    pub new_crc: u32,
    /// Global CRC before the patch
    pub old_global_crc: u32,
    /// Global CRC after the patch
    pub new_global_crc: u32,
}

impl PatchReport {
    /// Returns true if the replacement was zero-padded
    pub fn is_padded(&self) -> bool {
        self.padding > 0
    }
}

/// Replaces section payloads and keeps every CRC consistent
#[derive(Debug, Clone)]
pub struct Patcher<C = Crc32> {
    parser: Parser<C>,
}

impl Default for Patcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Patcher {
    /// Creates a patcher with the default parser
    pub fn new() -> Self {
        Self {
            parser: Parser::new(),
        }
    }
}

impl<C: Checksum> Patcher<C> {
    /// Creates a patcher around a configured parser
    pub fn with_parser(parser: Parser<C>) -> Self {
        Self { parser }
    }

    /// Runs every check a patch would run, without writing.
    pub fn plan(
        &self,
        data: &[u8],
        index: usize,
        replacement_len: usize,
    ) -> Result<PatchPlan, PatchError> {
        let sections = self.parser.parse(data)?;
        plan_for(&sections, index, replacement_len)
    }

    /// Replaces the payload of section `index` with `replacement`.
    ///
    /// On [`PatchError::PostPatchVerificationFailed`] the buffer has
    /// already been modified and must not be persisted. On every other
    /// error it is untouched.
    pub fn patch(
        &self,
        data: &mut [u8],
        index: usize,
        replacement: &[u8],
    ) -> Result<PatchReport, PatchError> {
        let before = self.parser.parse(data)?;
        let plan = plan_for(&before, index, replacement.len())?;
        let section = before[index];
        // parse has already checked the global header is complete
        let old_global_crc = stored_global_crc(data).unwrap_or_default();

        if plan.is_padded() {
            info!(
                "Replacement for section {} is {} bytes short, zero-padding",
                index, plan.padding
            );
        }

        let payload = &mut data[section.range()];
        payload.fill(0);
        payload[..replacement.len()].copy_from_slice(replacement);

        let new_crc = self.parser.checksum(&data[section.range()]);
        write_u32_le(data, section.header_offset(), new_crc);
        debug!("Section {} CRC 0x{:08x} -> 0x{:08x}", index, section.header_crc, new_crc);

        let new_global_crc = self.parser.checksum(&data[GLOBAL_HEADER_SIZE..]);
        write_u32_le(data, 0, new_global_crc);
        debug!("Global CRC 0x{:08x} -> 0x{:08x}", old_global_crc, new_global_crc);

        self.verify(data, &before)?;

        Ok(PatchReport {
            index,
            offset: section.offset,
            length: section.length,
            padding: plan.padding,
            old_crc: section.header_crc,
            new_crc,
            old_global_crc,
            new_global_crc,
        })
    }

    /// Re-parses a patched image and compares it against the old layout
    fn verify(&self, data: &[u8], before: &[Section]) -> Result<(), PatchError> {
        let after = self
            .parser
            .parse(data)
            .map_err(|e| PatchError::verification(format!("re-parse failed: {}", e)))?;

        if after.len() != before.len() {
            return Err(PatchError::verification(format!(
                "section count changed from {} to {}",
                before.len(),
                after.len()
            )));
        }

        if let Some((old, new)) = before
            .iter()
            .zip(&after)
            .find(|(old, new)| old.range() != new.range())
        {
            return Err(PatchError::verification(format!(
                "section {} moved from {:?} to {:?}",
                old.index,
                old.range(),
                new.range()
            )));
        }

        debug!("Verified {} sections after patch", after.len());
        Ok(())
    }
}

fn plan_for(
    sections: &[Section],
    index: usize,
    replacement_len: usize,
) -> Result<PatchPlan, PatchError> {
    let section = sections
        .get(index)
        .ok_or(PatchError::SectionIndexOutOfRange {
            index,
            count: sections.len(),
        })?;

    if replacement_len > section.length {
        return Err(PatchError::ReplacementTooLarge {
            index,
            size: replacement_len,
            capacity: section.length,
        });
    }

    Ok(PatchPlan {
        index,
        offset: section.offset,
        length: section.length,
        replacement_len,
        padding: section.length - replacement_len,
    })
}

/// Patches one section using the default parser
pub fn patch(data: &mut [u8], index: usize, replacement: &[u8]) -> Result<PatchReport, PatchError> {
    Patcher::new().patch(data, index, replacement)
}
