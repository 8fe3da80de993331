//! Bootloader protocol implementations.

pub mod baud;
pub mod command;
pub mod crc;
pub mod handshake;
pub mod xmodem;

// Re-export common types
pub use baud::{BaudProfile, BaudRate};
pub use command::{Command, query_loader_version};
pub use handshake::{Handshake, HandshakeMachine};
pub use xmodem::{Packet, XmodemTransfer};
