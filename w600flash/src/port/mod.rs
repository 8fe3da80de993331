//! Port abstraction for serial communication with the bootloader.
//!
//! The protocol layer (handshake, XMODEM) only ever talks to the [`Port`]
//! trait, so it can be driven by a real serial port or by a scripted fake
//! in tests.
//!
//! ```text
//! +---------------------------+
//! |      Protocol Layer       |
//! | (handshake, baud, xmodem) |
//! +-------------+-------------+
//!               |
//!               v
//! +-------------+-------------+
//! |        Port Trait         |
//! +-------------+-------------+
//!               |
//!               v
//! +-------------+-------------+
//! |  NativePort (serialport)  |
//! +---------------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use w600flash::port::Port;
//!
//! fn poke<P: Port>(port: &mut P) -> w600flash::Result<()> {
//!     port.write_all_bytes(&[0x1B])?;
//!     let reply = port.read_bytes(1, Duration::from_millis(200))?;
//!     println!("Received: {reply:?}");
//!     Ok(())
//! }
//! ```

#[cfg(test)]
pub(crate) mod mock;
#[cfg(feature = "native")]
pub mod native;

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Serial port configuration.
///
/// The bootloader link is always 8 data bits, no parity, one stop bit and no
/// flow control, so only the name, speed and timeout vary.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM6").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115200,
            timeout: Duration::from_millis(1000),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
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
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Product string (if available).
    pub product: Option<String>,
}

/// Serial link to the bootloader.
///
/// Every read is bounded by the current timeout; implementations must never
/// block indefinitely.
pub trait Port: Read + Write + Send {
    /// Set the read/write timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current timeout.
    fn timeout(&self) -> Duration;

    /// Get the current baud rate.
    fn baud_rate(&self) -> u32;

    /// Discard bytes queued for transmission.
    fn clear_output(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Set RTS (Request To Send) pin state.
    fn set_rts(&mut self, level: bool) -> Result<()>;

    /// Close the port and release resources. Closing twice is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Close the port and open it again at `baud_rate`, keeping the timeout.
    ///
    /// This is the only way to change speed: USB-UART bridges do not
    /// reliably apply a new baud rate to an open handle.
    fn reopen(&mut self, baud_rate: u32) -> Result<()>;

    /// Drive the reset line. RTS is wired to the target's reset input.
    fn set_reset_line(&mut self, asserted: bool) -> Result<()> {
        self.set_rts(asserted)
    }

    /// Read up to `max` bytes, waiting at most `timeout`.
    ///
    /// Returns an empty vector when nothing arrived in time.
    fn read_bytes(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>> {
        if self.timeout() != timeout {
            self.set_timeout(timeout)?;
        }
        let mut buf = vec![0u8; max];
        match self.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            },
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

/// Trait for listing available serial ports.
///
/// This is separated from `Port` because it's a static operation that
/// doesn't require an open port instance.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;

    /// Whether a port with this name is currently present.
    fn is_available(name: &str) -> bool {
        Self::list_ports().is_ok_and(|ports| ports.iter().any(|p| p.name == name))
    }
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};
