//! Firmware images.
//!
//! The bootloader takes the `.img` file produced by the SDK verbatim, so an
//! image is just its bytes plus the block arithmetic the transfer needs.

use std::fs;
use std::path::Path;

use log::debug;

use crate::error::{Error, Result};
use crate::protocol::xmodem::BLOCK_SIZE;

/// A firmware image ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    data: Vec<u8>,
}

impl FirmwareImage {
    /// Wrap raw image bytes.
    pub fn new(data: Vec<u8>) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "firmware image is empty",
            )));
        }
        Ok(Self { data })
    }

    /// Read an image from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        debug!("Loaded {} ({} bytes)", path.display(), data.len());
        Self::new(data)
    }

    /// Image bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Image size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always false; empty images are rejected on construction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of 1024-byte packets the image occupies.
    #[must_use]
    pub fn total_packets(&self) -> usize {
        total_packets(self.data.len())
    }
}

/// `ceil(len / 1024)`.
#[must_use]
pub fn total_packets(len: usize) -> usize {
    len.div_ceil(BLOCK_SIZE)
}
