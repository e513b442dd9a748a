//! Error types for the camfw-core library.
//!
//! Parsing and patching have their own error enums so callers can tell a
//! malformed container apart from a rejected mutation. [`Error`] wraps both
//! together with the file I/O failures of the convenience helpers.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for camfw operations
pub type Result<T> = std::result::Result<T, Error>;

/// Structural or integrity failure found while parsing a container.
///
/// Every variant is fatal: a container that fails any check is never
/// treated as valid.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Image is shorter than the global header
    #[error("image too small: {size} bytes, need at least {min}")]
    ImageTooSmall {
        /// Actual image size
        size: usize,
        /// Minimum required size
        min: usize,
    },

    /// Global CRC in the header does not match the image body
    #[error("global CRC mismatch: header says 0x{expected:08x}, body is 0x{actual:08x}")]
    GlobalCrcMismatch {
        /// CRC stored at offset 0
        expected: u32,
        /// CRC computed over the body
        actual: u32,
    },

    /// A trailer was found too close to the start of the image to hold a header
    #[error("section header ending at offset {end_offset} lies outside the image")]
    HeaderOutOfRange {
        /// Offset just past the trailer
        end_offset: usize,
    },

    /// Section payload runs past the end of the image
    #[error(
        "section {index} at offset {offset} claims {length} bytes, only {available} available"
    )]
    TruncatedSection {
        /// Position of the section in the stream
        index: usize,
        /// Payload start offset
        offset: usize,
        /// Length from the section header
        length: u32,
        /// Bytes left in the image from `offset`
        available: usize,
    },

    /// Section payload does not match the CRC in its header
    #[error("section {index} CRC mismatch: header says 0x{expected:08x}, payload is 0x{actual:08x}")]
    SectionCrcMismatch {
        /// Position of the section in the stream
        index: usize,
        /// CRC from the section header
        expected: u32,
        /// CRC computed over the payload
        actual: u32,
    },

    /// More sections than the configured ceiling
    #[error("image contains more than {max} sections")]
    TooManySections {
        /// The configured ceiling
        max: usize,
    },
}

/// Failure while replacing a section payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    /// The image did not parse before patching
    #[error("cannot patch an invalid image: {0}")]
    Parse(#[from] ParseError),

    /// Requested section does not exist
    #[error("section {index} does not exist, image has {count} sections")]
    SectionIndexOutOfRange {
        /// Requested index
        index: usize,
        /// Number of sections in the image
        count: usize,
    },

    /// Replacement does not fit into the section
    #[error("replacement for section {index} is {size} bytes, section holds only {capacity}")]
    ReplacementTooLarge {
        /// Target section
        index: usize,
        /// Replacement size
        size: usize,
        /// Section payload length
        capacity: usize,
    },

    /// The patched image no longer parses the same way. The buffer has
    /// been written to and must be discarded.
    #[error("patched image failed verification: {reason}")]
    PostPatchVerificationFailed {
        /// What the re-parse found
        reason: String,
    },
}

impl PatchError {
    /// Creates a new post-patch verification error
    pub fn verification(reason: impl Into<String>) -> Self {
        Self::PostPatchVerificationFailed {
            reason: reason.into(),
        }
    }

    /// Returns true if the image buffer may have been modified
    pub fn buffer_modified(&self) -> bool {
        matches!(self, Self::PostPatchVerificationFailed { .. })
    }
}

/// Comprehensive error type for all camfw operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Failed to read input file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        /// Path to the file that failed to read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to write output file
    #[error("failed to write file '{path}': {source}")]
    FileWrite {
        /// Path to the file that failed to write
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Container failed to parse
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Section patch was rejected
    #[error(transparent)]
    Patch(#[from] PatchError),
}

impl Error {
    /// Creates a new file read error
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Creates a new file write error
    pub fn file_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileWrite {
            path: path.into(),
            source,
        }
    }

    /// Returns true if this is a file I/O failure
    pub fn is_io(&self) -> bool {
        matches!(self, Self::FileRead { .. } | Self::FileWrite { .. })
    }
}
