//! Error types for xmflash.

use std::io;
use thiserror::Error;

use crate::protocol::xmodem::TerminalStatus;

/// Result type for xmflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for xmflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file image, host side plumbing).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Destination address is unaligned or outside the writable region.
    #[error("Invalid address {address:#010x}: {reason}")]
    InvalidAddress {
        /// Rejected destination address.
        address: u32,
        /// Why the address was rejected.
        reason: String,
    },

    /// The transport reported a failure; the link is assumed broken.
    #[error("Comms error after {blocks_written} block(s): {reason}")]
    Comms {
        /// Transport failure description.
        reason: String,
        /// Blocks committed before the failure.
        blocks_written: u32,
    },

    /// The sender did not deliver a frame within the retry budget.
    #[error("Timeout: no frame after {attempts} attempt(s), {blocks_written} block(s) written")]
    Timeout {
        /// Receive attempts made for the last frame request.
        attempts: u32,
        /// Blocks committed before the timeout.
        blocks_written: u32,
    },

    /// The programming sink rejected a block. The transfer was cancelled.
    #[error("Programming failed for block {block} at {address:#010x}: {reason}")]
    ProgramFailed {
        /// Destination address of the failed block.
        address: u32,
        /// Block number of the failed frame.
        block: u8,
        /// Blocks committed before the failure.
        blocks_written: u32,
        /// Failure reported by the sink.
        reason: String,
    },

    /// A programming sink could not complete a write.
    #[error("Sink error: {0}")]
    Sink(String),
}

impl Error {
    /// Map the error onto the terminal status reported to the caller.
    ///
    /// Errors raised outside the transfer loop (file plumbing, serial setup,
    /// configuration) count as comms errors: the transfer never got a link.
    #[must_use]
    pub fn status(&self) -> TerminalStatus {
        match self {
            Self::InvalidAddress { .. } => TerminalStatus::AddressError,
            Self::Timeout { .. } => TerminalStatus::Timeout,
            Self::ProgramFailed { .. } | Self::Sink(_) => TerminalStatus::ProgramFailed,
            _ => TerminalStatus::CommsError,
        }
    }

    /// Blocks committed before the transfer stopped, when the error came from
    /// the receive loop.
    #[must_use]
    pub fn blocks_written(&self) -> Option<u32> {
        match self {
            Self::Comms { blocks_written, .. }
            | Self::Timeout { blocks_written, .. }
            | Self::ProgramFailed { blocks_written, .. } => Some(*blocks_written),
            _ => None,
        }
    }
}
