//! Port abstraction for the byte-oriented link the receiver talks over.
//!
//! The receive engine only needs two operations from its link: send a few
//! bytes, and receive up to a buffer's worth of bytes within a deadline. That
//! contract is the [`Transport`] trait. Any [`Port`] (a blocking `Read + Write`
//! stream with a settable read timeout) gets a [`Transport`] implementation for
//! free; tests and exotic links can implement [`Transport`] directly.
//!
//! ```text
//! +------------------+
//! |  XmodemReceiver  |
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! |  Transport Trait |  <- scripted mocks in tests
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! |    Port Trait    |
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! | Native SerialPort|
//! |   (serialport)   |
//! +------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use xmflash::port::{Received, Transport};
//!
//! fn example<T: Transport>(link: &mut T) -> xmflash::Result<()> {
//!     link.send(&[0x15])?;
//!
//!     let mut buf = [0u8; 132];
//!     match link.receive(&mut buf, Duration::from_secs(1))? {
//!         Received::Data(n) => println!("Received {n} bytes"),
//!         Received::Timeout => println!("Nothing yet"),
//!     }
//!     Ok(())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use log::trace;

use crate::error::{Error, Result};
use crate::protocol::control;

/// Serial port configuration.
///
/// XMODEM runs over 8N1 without flow control; only the name, speed and the
/// initial read timeout vary.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Initial read/write timeout.
    pub timeout: Duration,
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeout: Duration::from_millis(1000),
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Serial port information.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
}

/// Outcome of a receive call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// This many bytes were written to the start of the buffer.
    Data(usize),
    /// Nothing arrived before the deadline.
    Timeout,
}

/// Byte-oriented link consumed by the receive engine.
///
/// `Err(_)` from either method means the link is broken; the engine does not
/// retry it.
pub trait Transport {
    /// Send all bytes.
    fn send(&mut self, bytes: &[u8]) -> Result<()>;

    /// Receive up to `buf.len()` bytes, waiting at most `timeout`.
    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<Received>;
}

/// Blocking serial-style stream with a settable read timeout.
pub trait Port: Read + Write + Send {
    /// Set the read/write timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Drop bytes waiting in the input and output buffers.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

impl<P: Port + ?Sized> Transport for P {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        trace!("-> {bytes:02X?}");
        self.write_all_bytes(bytes)
    }

    /// Fill `buf` until it is full or the deadline passes.
    ///
    /// A lone EOT as the first byte completes the receive early, since the
    /// sender never follows it with a frame body.
    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<Received> {
        let deadline = Instant::now() + timeout;
        let mut filled = 0;

        while filled < buf.len() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            self.set_timeout(deadline - now)?;

            match self.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(Error::Io(std::io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "link closed",
                    )));
                },
                Ok(n) => {
                    filled += n;
                    if buf[0] == control::EOT {
                        break;
                    }
                },
                Err(e) if e.kind() == ErrorKind::TimedOut => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) => return Err(Error::Io(e)),
            }
        }

        trace!("<- {filled} byte(s)");
        if filled == 0 {
            Ok(Received::Timeout)
        } else {
            Ok(Received::Data(filled))
        }
    }
}

/// Trait for listing available serial ports.
///
/// This is separated from `Port` because it's a static operation that
/// doesn't require an open port instance.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};
