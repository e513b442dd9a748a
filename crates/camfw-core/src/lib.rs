//! # camfw-core
//!
//! A library for parsing, verifying and patching sectioned camera firmware
//! containers.
//!
//! A container is a 224-byte global header, whose first word is a CRC32 of
//! everything after the header, followed by sections. Each section is a
//! 256-byte header span ending in the trailer `90 EB 24 A3`, then a payload
//! whose CRC32 is stored in that header.
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`scanner`]: Trailer scanning and section header decoding
//! - [`container`]: Container parsing and section patching
//! - [`builder`]: Synthesis of well-formed containers
//! - [`image`]: Owned images and file helpers
//! - [`crc`]: The CRC32 engine
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```no_run
//! use camfw_core::FirmwareImage;
//!
//! let mut image = FirmwareImage::load("camera_firmware.bin")?;
//! for section in image.parse()? {
//!     println!("section_{} at {} ({} bytes)", section.index, section.offset, section.length);
//! }
//!
//! let report = image.patch(2, b"replacement payload")?;
//! if report.is_padded() {
//!     println!("zero-padded by {} bytes", report.padding);
//! }
//! image.save("patched.bin")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod builder;
pub mod container;
pub mod crc;
pub mod error;
pub mod image;
pub mod scanner;

// Re-export primary types for convenience
pub use builder::{ImageBuilder, SectionSpec};
pub use container::{
    parse, patch, stored_global_crc, Parser, ParserConfig, PatchPlan, PatchReport, Patcher,
    Section, Survey, DEFAULT_MAX_SECTIONS, GLOBAL_HEADER_SIZE,
};
pub use crc::{crc32, Checksum, Crc32};
pub use error::{Error, ParseError, PatchError, Result};
pub use image::{parse_file, FirmwareImage};
pub use scanner::{find_magic, MagicScanner, SectionHeader, MAGIC};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
