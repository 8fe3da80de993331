//! # w600flash
//!
//! A library for flashing W600 chips through their mask-ROM bootloader.
//!
//! This crate provides:
//!
//! - The bootloader handshake as an explicit state machine
//! - The five bit-exact baud-switch frames
//! - An XMODEM-1K sender with CRC16 blocks
//! - A session that sequences reset, handshake, transfer and teardown
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport` crate
//!
//! ## Example
//!
//! ```rust,no_run
//! use w600flash::{FirmwareImage, FlashSession, SessionConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = FirmwareImage::from_file("w600_gz.img")?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let session = FlashSession::new(SessionConfig::new("/dev/ttyUSB0", 2_000_000))?;
//!         session.run_native(image.data(), &mut |done: usize, total: usize| {
//!             println!("Flashing: {}/{}", done, total);
//!         })?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod error;
pub mod image;
pub mod port;
pub mod progress;
pub mod protocol;
pub mod session;
pub mod timing;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker consulted by the block transfer.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). The transfer
/// then sends CAN to the device and aborts with
/// [`AbortReason::Interrupted`].
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    error::{AbortReason, Error, Result},
    image::FirmwareImage,
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    progress::{NoProgress, ProgressSink},
    protocol::{
        baud::{BaudProfile, BaudRate, DEFAULT_BAUD, INITIAL_BAUD, SUPPORTED_BAUDS},
        handshake::{HandshakeConfig, HandshakeReport, HandshakeState},
        xmodem::{TransferReport, XmodemConfig},
    },
    session::{FlashSession, SessionConfig, SessionError, SessionReport, Stage},
    timing::Timings,
};
