//! Error types for w600flash.

use std::{fmt, io};
use thiserror::Error;

/// Result type for w600flash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a block transfer was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The receiver rejected the same packet too many times.
    NakExhausted,
    /// The receiver sent CAN.
    Cancelled,
    /// The receiver stopped answering.
    IoTimeout,
    /// The embedding application requested an orderly abort.
    Interrupted,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NakExhausted => write!(f, "packet retry limit exhausted"),
            Self::Cancelled => write!(f, "cancelled by receiver"),
            Self::IoTimeout => write!(f, "receiver timed out"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Error type for w600flash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port driver error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(serialport::Error),

    /// No usable serial port could be determined.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The serial port does not exist or cannot be opened.
    #[error("Serial port {0} is not available")]
    PortUnavailable(String),

    /// The requested baud rate has no baud-switch frame.
    #[error("Unsupported baud rate {0}")]
    UnsupportedBaud(u32),

    /// The bootloader never produced the sync sequence.
    #[error("Bootloader sync failed after {attempts} attempts")]
    SyncTimeout {
        /// Number of handshake iterations performed.
        attempts: usize,
    },

    /// Writing the baud-switch frame or reconfiguring the link failed.
    #[error("Baud switch failed: {0}")]
    BaudSwitchFailure(String),

    /// The block transfer was abandoned.
    #[error("Transfer aborted: {0}")]
    TransferAborted(AbortReason),
}

#[cfg(feature = "native")]
impl From<serialport::Error> for Error {
    fn from(err: serialport::Error) -> Self {
        match err.kind() {
            serialport::ErrorKind::Io(kind) => Self::Io(io::Error::new(kind, err.description)),
            _ => Self::Serial(err),
        }
    }
}

impl Error {
    /// Whether this error came from the driver rather than the protocol.
    #[must_use]
    pub fn is_io(&self) -> bool {
        #[cfg(feature = "native")]
        if matches!(self, Self::Serial(_)) {
            return true;
        }
        matches!(self, Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_reason_display() {
        let err = Error::TransferAborted(AbortReason::NakExhausted);
        assert_eq!(err.to_string(), "Transfer aborted: packet retry limit exhausted");
    }

    #[test]
    fn test_unsupported_baud_display() {
        assert_eq!(
            Error::UnsupportedBaud(57600).to_string(),
            "Unsupported baud rate 57600"
        );
    }

    #[test]
    fn test_is_io() {
        assert!(Error::Io(io::Error::other("boom")).is_io());
        assert!(!Error::SyncTimeout { attempts: 39 }.is_io());
    }
}
