//! In-memory firmware images and file helpers.

use crate::container::{stored_global_crc, PatchReport, Patcher, Parser, Section};
use crate::crc::Checksum;
use crate::error::{Error, PatchError, ParseError, Result};
use std::fs;
use std::path::Path;
use tracing::trace;

/// A firmware image loaded fully into memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    data: Vec<u8>,
}

impl FirmwareImage {
    /// Wraps raw image bytes
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    /// Reads a whole file into memory
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|e| Error::file_read(path, e))?;
        trace!("Read {} bytes from {}", data.len(), path.display());
        Ok(Self { data })
    }

    /// Writes the whole image to a file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, &self.data).map_err(|e| Error::file_write(path, e))?;
        trace!("Wrote {} bytes to {}", self.data.len(), path.display());
        Ok(())
    }

    /// Returns the raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the image, returning the raw bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Image size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the image holds no bytes
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Global CRC stored in the header, if the header is complete
    pub fn global_crc(&self) -> Option<u32> {
        stored_global_crc(&self.data)
    }

    /// Parses the image with the default parser
    pub fn parse(&self) -> std::result::Result<Vec<Section>, ParseError> {
        Parser::new().parse(&self.data)
    }

    /// Replaces one section payload with the default patcher.
    ///
    /// The patch runs on a copy of the image and is committed only after
    /// verification, so on any error `self` still holds the original bytes.
    pub fn patch(
        &mut self,
        index: usize,
        replacement: &[u8],
    ) -> std::result::Result<PatchReport, PatchError> {
        self.patch_with(&Patcher::new(), index, replacement)
    }

    /// Replaces one section payload with a configured patcher
    pub fn patch_with<C: Checksum>(
        &mut self,
        patcher: &Patcher<C>,
        index: usize,
        replacement: &[u8],
    ) -> std::result::Result<PatchReport, PatchError> {
        let mut scratch = self.data.clone();
        let report = patcher.patch(&mut scratch, index, replacement)?;
        self.data = scratch;
        Ok(report)
    }
}

impl AsRef<[u8]> for FirmwareImage {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

/// Reads and parses a firmware file
pub fn parse_file(path: impl AsRef<Path>) -> Result<Vec<Section>> {
    let image = FirmwareImage::load(path)?;
    Ok(image.parse()?)
}
