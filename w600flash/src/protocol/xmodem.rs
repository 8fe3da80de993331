//! XMODEM-1K sender.
//!
//! The W600 bootloader receives the firmware image as a plain XMODEM-1K
//! stream in CRC mode. There is no YMODEM header block and no pipelining:
//! block *k+1* is never written before block *k* is acknowledged.
//!
//! ```text
//! Block format:
//! +-----+-----+----------+---------------+---------+
//! | STX | SEQ | 255-SEQ  |   DATA (1024) | CRC16   |
//! +-----+-----+----------+---------------+---------+
//! | 1   | 1   | 1        |     1024      | 2 (BE)  |
//! +-----+-----+----------+---------------+---------+
//! ```
//!
//! Sequence numbers start at 1 and wrap from 255 back to 1; the loader
//! reserves 0. The final block is padded with zeros.

use std::fmt;
use std::time::Duration;

use log::{debug, trace, warn};

use crate::error::{AbortReason, Error, Result};
use crate::image::total_packets;
use crate::port::Port;
use crate::progress::ProgressSink;
use crate::protocol::crc::crc16_xmodem;

/// XMODEM control characters.
pub mod control {
    /// Start of Text (1024-byte block).
    pub const STX: u8 = 0x02;
    /// End of Transmission.
    pub const EOT: u8 = 0x04;
    /// Acknowledge.
    pub const ACK: u8 = 0x06;
    /// Not Acknowledge.
    pub const NAK: u8 = 0x15;
    /// Cancel.
    pub const CAN: u8 = 0x18;
    /// CRC mode request character.
    pub const C: u8 = b'C';
}

/// Payload bytes per block.
pub const BLOCK_SIZE: usize = 1024;

/// Bytes on the wire per block.
pub const PACKET_LEN: usize = 3 + BLOCK_SIZE + 2;

/// Filler for the tail of the last block.
pub const PAD_BYTE: u8 = 0x00;

/// Default retry bound for every wait in the transfer.
pub const DEFAULT_RETRIES: u32 = 16;

/// XMODEM configuration options.
#[derive(Debug, Clone)]
pub struct XmodemConfig {
    /// Timeout for waiting for a single reply byte.
    pub char_timeout: Duration,
    /// Reads spent waiting for the receiver's initial 'C'.
    pub ready_attempts: u32,
    /// NAKs tolerated per packet; reaching it aborts.
    pub max_retries: u32,
    /// Silent reads tolerated per packet; reaching it aborts.
    pub max_timeouts: u32,
    /// Times EOT is sent before giving up on its ACK.
    pub eot_retries: u32,
}

impl Default for XmodemConfig {
    fn default() -> Self {
        Self {
            char_timeout: Duration::from_secs(1),
            ready_attempts: DEFAULT_RETRIES,
            max_retries: DEFAULT_RETRIES,
            max_timeouts: DEFAULT_RETRIES,
            eot_retries: DEFAULT_RETRIES,
        }
    }
}

/// Sequence number following `seq`, skipping the reserved 0.
#[must_use]
pub fn next_sequence(seq: u8) -> u8 {
    if seq == u8::MAX { 1 } else { seq + 1 }
}

/// One framed 1024-byte block.
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    bytes: Vec<u8>,
}

impl Packet {
    /// Frame `data` as block `sequence`, padding short blocks.
    ///
    /// `data` must be at most [`BLOCK_SIZE`] bytes.
    #[must_use]
    pub fn new(sequence: u8, data: &[u8]) -> Self {
        debug_assert!(
            data.len() <= BLOCK_SIZE,
            "block of {} bytes exceeds {BLOCK_SIZE}",
            data.len()
        );

        let mut bytes = Vec::with_capacity(PACKET_LEN);
        bytes.push(control::STX);
        bytes.push(sequence);
        bytes.push(u8::MAX - sequence);
        bytes.extend_from_slice(data);
        bytes.resize(3 + BLOCK_SIZE, PAD_BYTE);

        let crc = crc16_xmodem(&bytes[3..]);
        bytes.extend_from_slice(&crc.to_be_bytes());

        Self { bytes }
    }

    /// Block sequence number.
    #[must_use]
    pub fn sequence(&self) -> u8 {
        self.bytes[1]
    }

    /// `255 - sequence`.
    #[must_use]
    pub fn complement(&self) -> u8 {
        self.bytes[2]
    }

    /// Padded payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.bytes[3..3 + BLOCK_SIZE]
    }

    /// CRC16-XMODEM of the payload.
    #[must_use]
    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.bytes[PACKET_LEN - 2], self.bytes[PACKET_LEN - 1]])
    }

    /// Wire encoding.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("sequence", &self.sequence())
            .field("checksum", &format_args!("{:#06x}", self.checksum()))
            .finish_non_exhaustive()
    }
}

/// Live state of one image transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSession {
    /// Image length in bytes.
    pub image_len: usize,
    /// `ceil(image_len / 1024)`.
    pub total_packets: usize,
    /// Sequence number of the packet in flight.
    pub sequence: u8,
    /// Image bytes acknowledged so far.
    pub bytes_transferred: usize,
    /// Packets acknowledged so far.
    pub packets_acknowledged: usize,
    /// Resends of the packet in flight.
    pub retries: u32,
    /// Resends over the whole transfer.
    pub total_retries: u32,
}

impl TransferSession {
    /// Fresh session for an image of `image_len` bytes.
    #[must_use]
    pub fn new(image_len: usize) -> Self {
        Self {
            image_len,
            total_packets: total_packets(image_len),
            sequence: 1,
            bytes_transferred: 0,
            packets_acknowledged: 0,
            retries: 0,
            total_retries: 0,
        }
    }

    fn acknowledge(&mut self, payload_len: usize) {
        self.sequence = next_sequence(self.sequence);
        self.bytes_transferred += payload_len;
        self.packets_acknowledged += 1;
        self.retries = 0;
    }

    fn retry(&mut self) {
        self.retries += 1;
        self.total_retries += 1;
    }
}

/// Outcome of a completed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReport {
    /// Packets acknowledged.
    pub packets: usize,
    /// Image bytes delivered.
    pub bytes: usize,
    /// Packet resends over the whole transfer.
    pub retransmissions: u32,
    /// Whether the receiver acknowledged EOT.
    pub eot_acknowledged: bool,
}

/// XMODEM-1K transfer handler.
pub struct XmodemTransfer<'a, P: Port + ?Sized> {
    port: &'a mut P,
    config: XmodemConfig,
    interrupted: fn() -> bool,
}

impl<'a, P: Port + ?Sized> XmodemTransfer<'a, P> {
    /// Create a new transfer handler.
    pub fn new(port: &'a mut P) -> Self {
        Self::with_config(port, XmodemConfig::default())
    }

    /// Create a new transfer handler with custom configuration.
    pub fn with_config(port: &'a mut P, config: XmodemConfig) -> Self {
        Self {
            port,
            config,
            interrupted: crate::is_interrupted_requested,
        }
    }

    /// Replace the interrupt check consulted before every packet.
    #[must_use]
    pub fn with_interrupt_check(mut self, check: fn() -> bool) -> Self {
        self.interrupted = check;
        self
    }

    /// Read one reply byte; `None` on timeout.
    fn read_reply(&mut self) -> Result<Option<u8>> {
        let reply = self.port.read_bytes(1, self.config.char_timeout)?;
        Ok(reply.first().copied())
    }

    fn check_interrupt(&mut self) -> Result<()> {
        if (self.interrupted)() {
            warn!("Interrupt requested, cancelling transfer");
            self.port.write_all_bytes(&[control::CAN; 3])?;
            return Err(Error::TransferAborted(AbortReason::Interrupted));
        }
        Ok(())
    }

    /// Wait for the receiver to send 'C' (CRC mode request).
    pub fn wait_for_ready(&mut self) -> Result<()> {
        debug!("Waiting for 'C' from receiver...");

        for _ in 0..self.config.ready_attempts {
            self.check_interrupt()?;
            match self.read_reply()? {
                Some(control::C) => {
                    debug!("Received 'C', starting transfer");
                    return Ok(());
                },
                Some(control::CAN) => return Err(Error::TransferAborted(AbortReason::Cancelled)),
                Some(c) => trace!("Ignoring 0x{c:02X} while waiting for 'C'"),
                None => {},
            }
        }

        Err(Error::TransferAborted(AbortReason::IoTimeout))
    }

    /// Send a packet until it is acknowledged or a retry bound is hit.
    fn send_packet(&mut self, packet: &Packet, session: &mut TransferSession) -> Result<()> {
        let mut naks = 0;
        let mut timeouts = 0;

        loop {
            trace!("Sending {packet:?} (attempt {})", session.retries + 1);
            self.port.write_all_bytes(packet.as_bytes())?;

            match self.read_reply()? {
                Some(control::ACK) => {
                    trace!("Block {} ACKed", packet.sequence());
                    return Ok(());
                },
                Some(control::CAN) => {
                    return Err(Error::TransferAborted(AbortReason::Cancelled));
                },
                Some(control::NAK) => {
                    naks += 1;
                    debug!("Block {} NAKed ({naks})", packet.sequence());
                },
                Some(c) => {
                    naks += 1;
                    debug!("Unexpected response 0x{c:02X} to block {}", packet.sequence());
                },
                None => {
                    timeouts += 1;
                    debug!("Timeout waiting for ACK of block {}", packet.sequence());
                    if timeouts >= self.config.max_timeouts {
                        return Err(Error::TransferAborted(AbortReason::IoTimeout));
                    }
                },
            }

            if naks >= self.config.max_retries {
                return Err(Error::TransferAborted(AbortReason::NakExhausted));
            }
            session.retry();
        }
    }

    /// Send EOT; returns whether it was acknowledged.
    pub fn send_eot(&mut self) -> Result<bool> {
        debug!("Sending EOT");

        for _ in 0..self.config.eot_retries {
            self.port.write_all_bytes(&[control::EOT])?;
            // NAK, timeout, or unexpected response - retry
            if self.read_reply()? == Some(control::ACK) {
                debug!("EOT ACKed");
                return Ok(true);
            }
        }

        warn!(
            "No ACK for EOT after {} tries; the image is most likely flashed anyway",
            self.config.eot_retries
        );
        Ok(false)
    }

    /// Transfer `data`, reporting each acknowledged block to `progress`.
    pub fn transfer<S>(&mut self, data: &[u8], progress: &mut S) -> Result<TransferReport>
    where
        S: ProgressSink + ?Sized,
    {
        let mut session = TransferSession::new(data.len());
        debug!(
            "Starting XMODEM-1K transfer: {} bytes, {} packets",
            session.image_len, session.total_packets
        );

        self.wait_for_ready()?;

        for chunk in data.chunks(BLOCK_SIZE) {
            self.check_interrupt()?;

            let packet = Packet::new(session.sequence, chunk);
            self.send_packet(&packet, &mut session)?;

            session.acknowledge(chunk.len());
            progress.block_acknowledged(session.packets_acknowledged, session.total_packets);
        }

        let eot_acknowledged = self.send_eot()?;

        debug!("XMODEM transfer complete");
        Ok(TransferReport {
            packets: session.packets_acknowledged,
            bytes: session.bytes_transferred,
            retransmissions: session.total_retries,
            eot_acknowledged,
        })
    }
}
