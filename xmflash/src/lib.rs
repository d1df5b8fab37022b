//! # xmflash
//!
//! An XMODEM receive engine that programs a flash target block by block.
//!
//! The engine pulls 132-byte checksum frames from a byte link, validates
//! each one, and commits every new block to a programming sink before it
//! acknowledges it. Resent blocks are acknowledged without a second write,
//! corrupted frames are rejected with a NAK, and a failed write cancels the
//! transfer.
//!
//! The crate is split into:
//!
//! - [`protocol`]: the frame codec and the receive state machine
//! - [`port`]: the [`Transport`] link abstraction and a native serial port
//! - [`target`]: the [`ProgramSink`] abstraction, an in-memory flash model
//!   and a file-backed image
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport` crate
//! - `serde`: Serialization support for summaries and port listings
//!
//! ## Example
//!
//! ```rust,no_run
//! use xmflash::{FlashRegion, ImageFile, NativePort, TerminalStatus, XmodemReceiver};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let region = FlashRegion::new(0x0001_0000, 0x0008_0000);
//!     let base = 0x0001_0000;
//!     region.validate_destination(base)?;
//!
//!     let mut port = NativePort::open_simple("/dev/ttyUSB0", 115200)?;
//!     let mut image = ImageFile::create("app.bin", region)?;
//!
//!     let result = XmodemReceiver::new(&mut port, &mut image).download_and_program(base);
//!     println!("{}", TerminalStatus::from_result(&result));
//!
//!     let summary = result?;
//!     println!("{} bytes programmed", summary.bytes_written);
//!     image.finish(true)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod port;
pub mod protocol;
pub mod target;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    error::{Error, Result},
    port::{Port, PortEnumerator, PortInfo, Received, SerialConfig, Transport},
    protocol::{
        Frame, FrameCheck, FrameFault, Progress, ReceiveState, TerminalStatus, TransferSummary,
        XmodemConfig, XmodemReceiver, checksum,
    },
    target::{FlashRegion, ImageFile, MemoryFlash, ProgramSink},
};
