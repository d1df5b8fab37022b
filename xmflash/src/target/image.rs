//! File-backed flash image.
//!
//! The image file stands in for the flash of a target region: offset 0 in
//! the file is `region.base`. On creation the whole region is filled with
//! 0xFF so that every block the engine programs lands on erased space.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::protocol::frame::PAYLOAD_LEN;
use crate::target::memory::ERASED;
use crate::target::{FlashRegion, ProgramSink};

const FILL_CHUNK: usize = 64 * 1024;

/// Flash image written to a file.
#[derive(Debug)]
pub struct ImageFile {
    file: File,
    reader: File,
    path: PathBuf,
    region: FlashRegion,
    verify: bool,
    high_water: u64,
}

impl ImageFile {
    /// Create (or truncate) `path` and fill it with an erased region.
    pub fn create(path: impl AsRef<Path>, region: FlashRegion) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        let erased = vec![ERASED; FILL_CHUNK];
        let mut remaining = u64::from(region.size);
        while remaining > 0 {
            let n = remaining.min(FILL_CHUNK as u64) as usize;
            file.write_all(&erased[..n])?;
            remaining -= n as u64;
        }
        file.flush()?;
        let reader = File::open(&path)?;

        debug!(
            "Created image {} for region {:#010x}+{:#x}",
            path.display(),
            region.base,
            region.size
        );

        Ok(Self {
            file,
            reader,
            path,
            region,
            verify: false,
            high_water: 0,
        })
    }

    /// Read every programmed block back and compare it.
    ///
    /// Each block is synced with `sync_data` and read through a second
    /// handle. That catches short or misplaced writes and storage errors
    /// reported on sync; the read itself is still served by the OS page
    /// cache, so it says nothing about what the medium holds.
    #[must_use]
    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Path of the image file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// End offset of the highest block programmed so far.
    #[must_use]
    pub fn high_water(&self) -> u64 {
        self.high_water
    }

    /// Flush the image to disk and return its final length.
    ///
    /// With `trim_erased_tail`, the file is cut after the last programmed
    /// block instead of covering the whole region.
    pub fn finish(mut self, trim_erased_tail: bool) -> Result<u64> {
        if trim_erased_tail {
            self.file.set_len(self.high_water)?;
        }
        self.file.sync_all()?;
        let len = self.file.metadata()?.len();
        debug!("Image {} finished at {len} bytes", self.path.display());
        Ok(len)
    }

    fn write_block(&mut self, offset: u64, block: &[u8; PAYLOAD_LEN]) -> std::io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(block)?;
        self.file.flush()
    }

    fn verify_block(&mut self, address: u32, expected: &[u8; PAYLOAD_LEN]) -> Result<()> {
        let offset = u64::from(address - self.region.base);
        let mut readback = [0u8; PAYLOAD_LEN];
        self.file
            .sync_data()
            .and_then(|()| self.reader.seek(SeekFrom::Start(offset)))
            .and_then(|_| self.reader.read_exact(&mut readback))
            .map_err(|e| Error::Sink(format!("read-back at {address:#010x} failed: {e}")))?;

        if &readback != expected {
            return Err(Error::Sink(format!("verify mismatch at {address:#010x}")));
        }
        Ok(())
    }
}

impl ProgramSink for ImageFile {
    fn program(&mut self, address: u32, block: &[u8; PAYLOAD_LEN]) -> Result<()> {
        if !self.region.contains(address, PAYLOAD_LEN) {
            return Err(Error::Sink(format!(
                "{address:#010x} is outside the image region"
            )));
        }
        let offset = u64::from(address - self.region.base);

        self.write_block(offset, block)
            .map_err(|e| Error::Sink(format!("write at {address:#010x} failed: {e}")))?;

        if self.verify {
            self.verify_block(address, block)?;
        }

        self.high_water = self.high_water.max(offset + PAYLOAD_LEN as u64);
        trace!("Image block at offset {offset:#x} written");
        Ok(())
    }
}
