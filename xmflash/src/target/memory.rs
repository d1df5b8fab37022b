//! In-memory NOR flash model.

use log::trace;

use crate::error::{Error, Result};
use crate::protocol::frame::PAYLOAD_LEN;
use crate::target::{FlashRegion, ProgramSink};

/// Value of an erased flash byte.
pub const ERASED: u8 = 0xFF;

/// Flash contents held in memory, starting out erased.
///
/// Programming a block whose bytes are not all erased fails, like writing
/// over programmed NOR cells without an erase.
#[derive(Debug, Clone)]
pub struct MemoryFlash {
    region: FlashRegion,
    data: Vec<u8>,
    writes: u32,
}

impl MemoryFlash {
    /// Create an erased flash covering `region`.
    #[must_use]
    pub fn new(region: FlashRegion) -> Self {
        Self {
            region,
            data: vec![ERASED; region.size as usize],
            writes: 0,
        }
    }

    /// Read `len` bytes at `address`, if the range is inside the region.
    #[must_use]
    pub fn read(&self, address: u32, len: usize) -> Option<&[u8]> {
        if !self.region.contains(address, len) {
            return None;
        }
        let offset = (address - self.region.base) as usize;
        Some(&self.data[offset..offset + len])
    }

    /// Erase every byte.
    pub fn erase_all(&mut self) {
        self.data.fill(ERASED);
    }

    /// Number of successful block writes.
    #[must_use]
    pub fn write_count(&self) -> u32 {
        self.writes
    }

    /// Whole flash contents.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl ProgramSink for MemoryFlash {
    fn program(&mut self, address: u32, block: &[u8; PAYLOAD_LEN]) -> Result<()> {
        self.region
            .validate_destination(address)
            .map_err(|e| Error::Sink(e.to_string()))?;

        let offset = (address - self.region.base) as usize;
        let cells = &mut self.data[offset..offset + PAYLOAD_LEN];
        if cells.iter().any(|&b| b != ERASED) {
            return Err(Error::Sink(format!(
                "{address:#010x} is not erased"
            )));
        }

        cells.copy_from_slice(block);
        self.writes += 1;
        trace!("Programmed {PAYLOAD_LEN} bytes at {address:#010x}");
        Ok(())
    }
}
