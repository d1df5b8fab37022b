//! XMODEM checksum frame codec.
//!
//! ```text
//! Frame format:
//! +-----+-----+------+---------------+----------+
//! | SOH | SEQ | ~SEQ |   DATA (128)  | CHECKSUM |
//! +-----+-----+------+---------------+----------+
//! | 1   | 1   | 1    |      128      | 1        |
//! +-----+-----+------+---------------+----------+
//! ```
//!
//! The checksum is the 8-bit wrapping sum of the data bytes.

use crate::protocol::control;
use std::fmt;

/// Payload bytes carried by one frame.
pub const PAYLOAD_LEN: usize = 128;

/// Marker, block number and its complement.
pub const HEADER_LEN: usize = 3;

/// Total frame length on the wire.
pub const FRAME_LEN: usize = HEADER_LEN + PAYLOAD_LEN + 1;

/// Compute the 8-bit wrapping checksum of a payload.
#[must_use]
pub fn checksum(payload: &[u8]) -> u8 {
    payload
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Why a received frame was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFault {
    /// Fewer than 132 bytes arrived before the receive completed.
    Truncated {
        /// Bytes actually received.
        len: usize,
    },
    /// First byte is neither SOH nor EOT.
    BadMarker(u8),
    /// Block number and complement do not sum to 255.
    BadComplement {
        /// Block number byte.
        block: u8,
        /// Complement byte.
        complement: u8,
    },
    /// Block number is neither the expected block nor its predecessor.
    OutOfSequence {
        /// Block number byte.
        block: u8,
        /// Block number the receiver is waiting for.
        expected: u8,
    },
    /// Checksum byte does not match the payload.
    BadChecksum {
        /// Checksum computed over the payload.
        expected: u8,
        /// Checksum byte carried by the frame.
        actual: u8,
    },
}

impl fmt::Display for FrameFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { len } => write!(f, "truncated frame ({len} of {FRAME_LEN} bytes)"),
            Self::BadMarker(b) => write!(f, "bad start marker 0x{b:02X}"),
            Self::BadComplement { block, complement } => {
                write!(f, "block {block} has bad complement 0x{complement:02X}")
            },
            Self::OutOfSequence { block, expected } => {
                write!(f, "block {block} out of sequence (expected {expected})")
            },
            Self::BadChecksum { expected, actual } => {
                write!(f, "checksum 0x{actual:02X} does not match 0x{expected:02X}")
            },
        }
    }
}

/// Classification of a received frame against the receiver's expected block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCheck {
    /// The sender has finished.
    EndOfTransfer,
    /// The next block in sequence.
    New {
        /// Block number.
        block: u8,
    },
    /// A resend of the block committed last.
    Duplicate {
        /// Block number.
        block: u8,
    },
    /// Corrupted or malformed frame.
    Invalid(FrameFault),
}

/// A fixed-size XMODEM frame buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: [u8; FRAME_LEN],
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("marker", &format_args!("0x{:02X}", self.marker()))
            .field("block", &self.block())
            .field("complement", &self.complement())
            .field("checksum", &format_args!("0x{:02X}", self.checksum_byte()))
            .finish_non_exhaustive()
    }
}

impl Frame {
    /// Create a zeroed frame buffer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bytes: [0u8; FRAME_LEN],
        }
    }

    /// Build a data frame. Short payloads are padded with SUB.
    ///
    /// Only the first 128 bytes of `payload` are used.
    #[must_use]
    pub fn data(block: u8, payload: &[u8]) -> Self {
        let mut frame = Self::new();
        frame.bytes[0] = control::SOH;
        frame.bytes[1] = block;
        frame.bytes[2] = !block;

        let n = payload.len().min(PAYLOAD_LEN);
        let body = &mut frame.bytes[HEADER_LEN..HEADER_LEN + PAYLOAD_LEN];
        body[..n].copy_from_slice(&payload[..n]);
        body[n..].fill(control::SUB);

        let sum = checksum(frame.payload());
        frame.bytes[FRAME_LEN - 1] = sum;
        frame
    }

    /// Raw frame bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.bytes
    }

    /// Mutable access to the raw bytes, for receiving into.
    pub fn as_mut_bytes(&mut self) -> &mut [u8; FRAME_LEN] {
        &mut self.bytes
    }

    /// Zero the buffer before a new receive.
    pub fn clear(&mut self) {
        self.bytes.fill(0);
    }

    /// Start marker byte.
    #[must_use]
    pub fn marker(&self) -> u8 {
        self.bytes[0]
    }

    /// Block number byte.
    #[must_use]
    pub fn block(&self) -> u8 {
        self.bytes[1]
    }

    /// Block number complement byte.
    #[must_use]
    pub fn complement(&self) -> u8 {
        self.bytes[2]
    }

    /// The 128 payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8; PAYLOAD_LEN] {
        self.bytes[HEADER_LEN..HEADER_LEN + PAYLOAD_LEN]
            .try_into()
            .expect("payload range is exactly PAYLOAD_LEN bytes")
    }

    /// Checksum byte carried by the frame.
    #[must_use]
    pub fn checksum_byte(&self) -> u8 {
        self.bytes[FRAME_LEN - 1]
    }

    /// Classify the first `received` bytes of this buffer.
    ///
    /// An EOT in the first byte wins over every other check. A block number
    /// one behind `expected` (wrapping) is a resend of the last committed
    /// block; anything else that is not `expected` is out of sequence.
    #[must_use]
    pub fn classify(&self, received: usize, expected: u8) -> FrameCheck {
        if received >= 1 && self.marker() == control::EOT {
            return FrameCheck::EndOfTransfer;
        }
        if received < FRAME_LEN {
            return FrameCheck::Invalid(FrameFault::Truncated { len: received });
        }
        if self.marker() != control::SOH {
            return FrameCheck::Invalid(FrameFault::BadMarker(self.marker()));
        }

        let block = self.block();
        let previous = expected.wrapping_sub(1);
        if block != expected && block != previous {
            return FrameCheck::Invalid(FrameFault::OutOfSequence { block, expected });
        }

        let complement = self.complement();
        if u16::from(block) + u16::from(complement) != 255 {
            return FrameCheck::Invalid(FrameFault::BadComplement { block, complement });
        }

        let sum = checksum(self.payload());
        if sum != self.checksum_byte() {
            return FrameCheck::Invalid(FrameFault::BadChecksum {
                expected: sum,
                actual: self.checksum_byte(),
            });
        }

        if block == expected {
            FrameCheck::New { block }
        } else {
            FrameCheck::Duplicate { block }
        }
    }
}
