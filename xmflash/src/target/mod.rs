//! Programming targets.
//!
//! The receive engine commits each accepted block through the
//! [`ProgramSink`] trait. A sink is a persistent store that accepts 128-byte
//! writes at 128-byte aligned, monotonically increasing addresses and is
//! assumed to be erased beforehand; the engine never erases.
//!
//! Two sinks ship with the crate:
//!
//! - [`MemoryFlash`]: an in-memory NOR flash model that refuses writes over
//!   programmed bytes.
//! - [`ImageFile`]: a file-backed flash image for the host tool.

pub mod image;
pub mod memory;

pub use image::ImageFile;
pub use memory::MemoryFlash;

use crate::error::{Error, Result};
use crate::protocol::frame::PAYLOAD_LEN;

/// Alignment required for every destination address.
pub const BLOCK_ALIGN: u32 = PAYLOAD_LEN as u32;

/// Persistent store written block by block.
pub trait ProgramSink {
    /// Program one block at `address`.
    ///
    /// `Err(_)` is a programming failure; the engine cancels the transfer
    /// and does not retry.
    fn program(&mut self, address: u32, block: &[u8; PAYLOAD_LEN]) -> Result<()>;
}

impl<S: ProgramSink + ?Sized> ProgramSink for &mut S {
    fn program(&mut self, address: u32, block: &[u8; PAYLOAD_LEN]) -> Result<()> {
        (**self).program(address, block)
    }
}

/// Writable address window of a programming target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlashRegion {
    /// First writable address.
    pub base: u32,
    /// Window size in bytes.
    pub size: u32,
}

impl FlashRegion {
    /// Create a region.
    #[must_use]
    pub const fn new(base: u32, size: u32) -> Self {
        Self { base, size }
    }

    /// One past the last writable address.
    #[must_use]
    pub fn end(&self) -> u64 {
        u64::from(self.base) + u64::from(self.size)
    }

    /// Whether `[address, address + len)` lies inside the region.
    #[must_use]
    pub fn contains(&self, address: u32, len: usize) -> bool {
        let start = u64::from(address);
        start >= u64::from(self.base) && start + len as u64 <= self.end()
    }

    /// Check a download destination before starting a transfer.
    ///
    /// The address must sit on a 128-byte boundary and leave room for at
    /// least one block inside the region.
    pub fn validate_destination(&self, address: u32) -> Result<()> {
        if address % BLOCK_ALIGN != 0 {
            return Err(Error::InvalidAddress {
                address,
                reason: format!("not on a {BLOCK_ALIGN}-byte boundary"),
            });
        }
        if !self.contains(address, PAYLOAD_LEN) {
            return Err(Error::InvalidAddress {
                address,
                reason: format!(
                    "outside writable region {:#010x}..{:#010x}",
                    self.base,
                    self.end()
                ),
            });
        }
        Ok(())
    }
}
