//! Protocol implementations.

pub mod frame;
pub mod xmodem;

/// XMODEM control characters.
pub mod control {
    /// Start of Header (128-byte data frame).
    pub const SOH: u8 = 0x01;
    /// End of Transmission.
    pub const EOT: u8 = 0x04;
    /// Acknowledge.
    pub const ACK: u8 = 0x06;
    /// Not Acknowledge. Also kicks off a checksum-mode transfer.
    pub const NAK: u8 = 0x15;
    /// Cancel.
    pub const CAN: u8 = 0x18;
    /// Padding for short final blocks.
    pub const SUB: u8 = 0x1A;
}

// Re-export common types
pub use frame::{FRAME_LEN, Frame, FrameCheck, FrameFault, PAYLOAD_LEN, checksum};
pub use xmodem::{
    Progress, ReceiveState, TerminalStatus, TransferSummary, XmodemConfig, XmodemReceiver,
};
