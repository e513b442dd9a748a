//! Byte scanning for section boundaries.
//!
//! Containers carry no section index. Sections are discovered by scanning
//! for the 4-byte trailer `90 EB 24 A3` that closes each section header,
//! then decoding the header backwards from the trailer end.
//!
//! ## Algorithm Overview
//!
//! A four-state matcher consumes one byte at a time:
//!
//! 1. `Idle` moves to `Seen90` on `0x90`
//! 2. `Seen90` moves to `SeenEb` on `0xEB`
//! 3. `SeenEb` moves to `Seen24` on `0x24`
//! 4. `Seen24` matches on `0xA3`
//!
//! Any other byte drops back to `Idle`. After every step, a consumed `0x90`
//! forces the state to `Seen90`, so a run such as `90 90 EB 24 A3` still
//! matches on the second `0x90`.

mod header;

use tracing::trace;

pub use header::{
    decode_header, read_u32_le, write_u32_le, SectionHeader, MAGIC, SECTION_HEADER_SIZE,
    SECTION_HEADER_SPAN,
};

/// The trailer bytes in stream order
pub const TRAILER: [u8; 4] = [0x90, 0xEB, 0x24, 0xA3];

/// Matcher state, named after the last trailer byte accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Seen90,
    SeenEb,
    Seen24,
}

impl State {
    /// Advances by one byte. Returns `None` once the trailer is complete.
    fn step(self, byte: u8) -> Option<State> {
        let next = match (self, byte) {
            (State::Idle, 0x90) => State::Seen90,
            (State::Idle, _) => State::Idle,
            (State::Seen90, 0xEB) => State::SeenEb,
            (State::Seen90, _) => State::Idle,
            (State::SeenEb, 0x24) => State::Seen24,
            (State::SeenEb, _) => State::Idle,
            (State::Seen24, 0xA3) => return None,
            (State::Seen24, _) => State::Idle,
        };

        if byte == TRAILER[0] {
            Some(State::Seen90)
        } else {
            Some(next)
        }
    }
}

/// Finds the next trailer at or after `start_offset`.
///
/// Returns the offset just past the trailer's last byte, or `None` when the
/// buffer ends first. Running out of data is the normal way a scan ends.
pub fn find_magic(data: &[u8], start_offset: usize) -> Option<usize> {
    let mut state = State::Idle;

    for (position, &byte) in data.iter().enumerate().skip(start_offset) {
        match state.step(byte) {
            Some(next) => state = next,
            None => {
                trace!("Found trailer ending at offset {}", position + 1);
                return Some(position + 1);
            }
        }
    }

    None
}

/// Iterator over every trailer end in a buffer.
///
/// Unlike the container parser, this resumes right after each trailer
/// instead of skipping the payload, so it also reports trailers embedded
/// in payload data.
#[derive(Debug, Clone)]
pub struct MagicScanner<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> MagicScanner<'a> {
    /// Creates a scanner starting at the beginning of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Current scan position
    pub fn position(&self) -> usize {
        self.position
    }
}

impl Iterator for MagicScanner<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let end = find_magic(self.data, self.position)?;
        self.position = end;
        Some(end)
    }
}
