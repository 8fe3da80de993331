//! One complete flashing run.
//!
//! A [`FlashSession`] owns the serial link for its whole lifetime:
//! open at 115200 -> handshake and baud switch -> XMODEM-1K transfer ->
//! close. Each stage's failure ends the run; nothing is retried across
//! stages. The link is closed on every exit path, including early returns
//! and panics.
//!
//! ## Example
//!
//! ```rust,no_run
//! use w600flash::{FirmwareImage, FlashSession, SessionConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = FirmwareImage::from_file("w600_gz.img")?;
//!     let session = FlashSession::new(SessionConfig::new("COM6", 2_000_000))?;
//!
//!     let report = session.run_native(image.data(), &mut |done: usize, total: usize| {
//!         println!("{done}/{total}");
//!     })?;
//!     println!("{} packets sent", report.transfer.packets);
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::ops::{Deref, DerefMut};

use log::{debug, info, warn};
use thiserror::Error;

use crate::error::Error;
use crate::port::{Port, SerialConfig};
use crate::progress::ProgressSink;
use crate::protocol::baud::{BaudRate, DEFAULT_BAUD, INITIAL_BAUD};
use crate::protocol::handshake::{
    DEFAULT_SYNC_ATTEMPTS, Handshake, HandshakeConfig, HandshakeReport,
};
use crate::protocol::xmodem::{TransferReport, XmodemConfig, XmodemTransfer};
use crate::timing::{Timings, settle};

/// Where in the run a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Validating the session parameters, before any I/O.
    Configure,
    /// Opening the serial port.
    Open,
    /// Bootloader sync and baud switch.
    Handshake,
    /// Image transfer.
    Transfer,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configure => write!(f, "configuration"),
            Self::Open => write!(f, "opening port"),
            Self::Handshake => write!(f, "handshake"),
            Self::Transfer => write!(f, "transfer"),
        }
    }
}

/// A failed run, tagged with its stage.
#[derive(Debug, Error)]
#[error("{stage} failed: {error}")]
pub struct SessionError {
    /// Stage that failed.
    pub stage: Stage,
    /// Why.
    #[source]
    pub error: Error,
}

impl SessionError {
    fn at(stage: Stage) -> impl FnOnce(Error) -> Self {
        move |error| Self { stage, error }
    }
}

/// Session parameters.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Serial port name.
    pub port_name: String,
    /// Speed for the transfer.
    pub target_baud: u32,
    /// Handshake iteration budget.
    pub handshake_attempts: usize,
    /// Settle times and pacing.
    pub timings: Timings,
    /// Block-transfer retry bounds.
    pub xmodem: XmodemConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            target_baud: DEFAULT_BAUD,
            handshake_attempts: DEFAULT_SYNC_ATTEMPTS,
            timings: Timings::default(),
            xmodem: XmodemConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Configuration with default timing for `port_name` at `target_baud`.
    pub fn new(port_name: impl Into<String>, target_baud: u32) -> Self {
        Self {
            port_name: port_name.into(),
            target_baud,
            ..Default::default()
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionReport {
    /// Handshake statistics.
    pub handshake: HandshakeReport,
    /// Transfer statistics.
    pub transfer: TransferReport,
}

/// Exclusive ownership of an open port; closes it when dropped.
struct Link<P: Port> {
    port: P,
}

impl<P: Port> Link<P> {
    fn new(port: P) -> Self {
        debug!("Link to {} acquired", port.name());
        Self { port }
    }
}

impl<P: Port> Drop for Link<P> {
    fn drop(&mut self) {
        if let Err(e) = self.port.close() {
            warn!("Failed to close {}: {e}", self.port.name());
        }
    }
}

impl<P: Port> Deref for Link<P> {
    type Target = P;

    fn deref(&self) -> &P {
        &self.port
    }
}

impl<P: Port> DerefMut for Link<P> {
    fn deref_mut(&mut self) -> &mut P {
        &mut self.port
    }
}

/// A validated flashing run.
#[derive(Debug, Clone)]
pub struct FlashSession {
    config: SessionConfig,
    target: BaudRate,
}

impl FlashSession {
    /// Validate `config`. Unsupported bauds are rejected here, before any
    /// port is touched.
    pub fn new(config: SessionConfig) -> Result<Self, SessionError> {
        let target = BaudRate::try_from(config.target_baud).map_err(SessionError::at(Stage::Configure))?;
        if config.port_name.is_empty() {
            return Err(SessionError {
                stage: Stage::Configure,
                error: Error::Config("no serial port given".into()),
            });
        }
        Ok(Self { config, target })
    }

    /// Session parameters.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Target speed.
    pub fn target(&self) -> BaudRate {
        self.target
    }

    /// How the port is opened: bootloader speed, link timeout.
    pub fn serial_config(&self) -> SerialConfig {
        SerialConfig::new(&self.config.port_name, INITIAL_BAUD)
            .with_timeout(self.config.timings.link_timeout)
    }

    /// Run the session over a port produced by `open`.
    pub fn run<P, O, S>(
        &self,
        open: O,
        image: &[u8],
        progress: &mut S,
    ) -> Result<SessionReport, SessionError>
    where
        P: Port,
        O: FnOnce(&SerialConfig) -> crate::Result<P>,
        S: ProgressSink + ?Sized,
    {
        let timings = self.config.timings;
        let serial = self.serial_config();

        info!("Opening {} at {} baud", serial.port_name, serial.baud_rate);
        let mut link = Link::new(open(&serial).map_err(SessionError::at(Stage::Open))?);

        let handshake = Handshake::new(
            &mut *link,
            HandshakeConfig {
                target_baud: self.target.get(),
                initial_baud: INITIAL_BAUD,
                max_attempts: self.config.handshake_attempts,
                timings,
            },
        )
        .negotiate()
        .map_err(SessionError::at(Stage::Handshake))?;

        link.set_timeout(self.config.xmodem.char_timeout)
            .map_err(SessionError::at(Stage::Transfer))?;
        settle(timings.pre_transfer_settle);

        info!(
            "Downloading {} bytes ({} packets)",
            image.len(),
            crate::image::total_packets(image.len())
        );
        let transfer = XmodemTransfer::with_config(&mut *link, self.config.xmodem.clone())
            .transfer(image, progress)
            .map_err(SessionError::at(Stage::Transfer))?;

        settle(timings.post_transfer_settle);
        drop(link);

        info!(
            "Done: {} packets, {} retransmissions",
            transfer.packets, transfer.retransmissions
        );
        Ok(SessionReport {
            handshake,
            transfer,
        })
    }

    /// Run the session over a native serial port.
    #[cfg(feature = "native")]
    pub fn run_native<S>(&self, image: &[u8], progress: &mut S) -> Result<SessionReport, SessionError>
    where
        S: ProgressSink + ?Sized,
    {
        self.run(crate::port::NativePort::open, image, progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AbortReason;
    use crate::port::mock::{Reply, ScriptedPort, Wire};
    use crate::progress::NoProgress;
    use crate::protocol::xmodem::{PACKET_LEN, control};
    use std::sync::{Arc, Mutex};

    fn fast_config(port: &str, baud: u32) -> SessionConfig {
        SessionConfig {
            timings: Timings::immediate(),
            xmodem: XmodemConfig {
                ready_attempts: 3,
                max_retries: 3,
                max_timeouts: 3,
                eot_retries: 2,
                ..XmodemConfig::default()
            },
            ..SessionConfig::new(port, baud)
        }
    }

    /// Sync, readiness, one ACK per block, ACK for EOT.
    fn device_script(blocks: usize) -> Vec<u8> {
        let mut script = b"CCC".to_vec();
        script.push(control::C);
        script.extend(std::iter::repeat_n(control::ACK, blocks + 1));
        script
    }

    /// Hands out `port` once and records the configuration it was opened with.
    fn port_opener(
        port: ScriptedPort,
    ) -> (
        impl FnOnce(&SerialConfig) -> crate::Result<ScriptedPort>,
        Arc<Mutex<Option<SerialConfig>>>,
    ) {
        let seen = Arc::new(Mutex::new(None));
        let seen_by_opener = Arc::clone(&seen);
        let opener = move |config: &SerialConfig| {
            *seen_by_opener.lock().unwrap() = Some(config.clone());
            Ok(port)
        };
        (opener, seen)
    }

    fn scripted_opener(
        script: Vec<Reply>,
    ) -> (
        impl FnOnce(&SerialConfig) -> crate::Result<ScriptedPort>,
        Arc<Mutex<Wire>>,
        Arc<Mutex<Option<SerialConfig>>>,
    ) {
        let (port, wire) = ScriptedPort::new(script);
        let (opener, seen) = port_opener(port);
        (opener, wire, seen)
    }

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn test_end_to_end_com6_2m() {
        init_logging();
        let image = vec![0x5A; 37_000];
        let script = device_script(37).into_iter().map(Reply::Byte).collect();
        let (opener, wire, seen) = scripted_opener(script);
        let mut progress = Vec::new();

        let session = FlashSession::new(fast_config("COM6", 2_000_000)).unwrap();
        let report = session
            .run(opener, &image, &mut |done: usize, total: usize| progress.push((done, total)))
            .unwrap();

        let opened = seen.lock().unwrap().clone().unwrap();
        assert_eq!(opened.port_name, "COM6");
        assert_eq!(opened.baud_rate, INITIAL_BAUD);

        assert_eq!(report.handshake.baud, 2_000_000);
        assert!(report.handshake.attempts <= DEFAULT_SYNC_ATTEMPTS);
        assert_eq!(report.transfer.packets, 37);
        assert_eq!(report.transfer.bytes, 37_000);
        assert!(report.transfer.eot_acknowledged);
        assert_eq!(progress.len(), 37);
        assert_eq!(progress.last(), Some(&(37, 37)));

        let wire = wire.lock().unwrap();
        assert_eq!(wire.writes_of_len(PACKET_LEN).len(), 37);
        assert_eq!(wire.reopened_at.last(), Some(&2_000_000));
        assert_eq!(wire.closed, 1);
    }

    #[test]
    fn test_unsupported_baud_rejected_before_open() {
        let err = FlashSession::new(fast_config("COM6", 57600)).unwrap_err();
        assert_eq!(err.stage, Stage::Configure);
        assert!(matches!(err.error, Error::UnsupportedBaud(57600)));
    }

    #[test]
    fn test_empty_port_name_is_config_error() {
        let err = FlashSession::new(fast_config("", DEFAULT_BAUD)).unwrap_err();
        assert_eq!(err.stage, Stage::Configure);
        assert!(matches!(err.error, Error::Config(_)));
    }

    #[test]
    fn test_open_failure_is_tagged() {
        let session = FlashSession::new(fast_config("COM9", DEFAULT_BAUD)).unwrap();
        let err = session
            .run(
                |c: &SerialConfig| -> crate::Result<ScriptedPort> {
                    Err(Error::PortUnavailable(c.port_name.clone()))
                },
                &[0u8; 16],
                &mut NoProgress,
            )
            .unwrap_err();

        assert_eq!(err.stage, Stage::Open);
        assert!(matches!(err.error, Error::PortUnavailable(ref p) if p == "COM9"));
        assert_eq!(err.to_string(), "opening port failed: Serial port COM9 is not available");
    }

    #[test]
    fn test_sync_timeout_closes_link() {
        let (opener, wire, _) = scripted_opener(vec![Reply::Timeout; 64]);
        let session = FlashSession::new(fast_config("COM6", DEFAULT_BAUD)).unwrap();

        let err = session.run(opener, &[0u8; 16], &mut NoProgress).unwrap_err();

        assert_eq!(err.stage, Stage::Handshake);
        assert!(matches!(err.error, Error::SyncTimeout { .. }));
        let wire = wire.lock().unwrap();
        assert_eq!(wire.closed, 1);
        assert!(wire.writes_of_len(PACKET_LEN).is_empty());
    }

    #[test]
    fn test_transfer_abort_closes_link() {
        let mut script = b"CCC".to_vec();
        script.push(control::C);
        script.extend([control::NAK; 3]);
        let (opener, wire, _) = scripted_opener(script.into_iter().map(Reply::Byte).collect());
        let session = FlashSession::new(fast_config("COM6", 921_600)).unwrap();

        let err = session.run(opener, &[1u8; 100], &mut NoProgress).unwrap_err();

        assert_eq!(err.stage, Stage::Transfer);
        assert!(matches!(err.error, Error::TransferAborted(AbortReason::NakExhausted)));
        assert_eq!(wire.lock().unwrap().closed, 1);
    }

    #[test]
    fn test_failed_baud_switch_is_tagged_handshake() {
        let (port, wire) = ScriptedPort::from_bytes(b"CCC");
        let (opener, _) = port_opener(port.with_failing_reopen());
        let session = FlashSession::new(fast_config("COM6", 921_600)).unwrap();

        let err = session.run(opener, &[0u8; 16], &mut NoProgress).unwrap_err();

        assert_eq!(err.stage, Stage::Handshake);
        assert!(matches!(err.error, Error::BaudSwitchFailure(ref m) if m.contains("921600")));
        let wire = wire.lock().unwrap();
        assert_eq!(wire.closed, 1);
        assert!(wire.reopened_at.is_empty());
        assert!(wire.writes_of_len(PACKET_LEN).is_empty());
    }

    #[test]
    fn test_read_failure_during_transfer_closes_link() {
        let mut script: Vec<Reply> = b"CCC".iter().copied().map(Reply::Byte).collect();
        script.push(Reply::Byte(control::C));
        script.push(Reply::Error(std::io::ErrorKind::BrokenPipe));
        let (opener, wire, _) = scripted_opener(script);
        let session = FlashSession::new(fast_config("COM6", 921_600)).unwrap();

        let err = session.run(opener, &[1u8; 100], &mut NoProgress).unwrap_err();

        assert_eq!(err.stage, Stage::Transfer);
        assert!(matches!(err.error, Error::Io(ref e) if e.kind() == std::io::ErrorKind::BrokenPipe));
        let wire = wire.lock().unwrap();
        assert_eq!(wire.closed, 1);
        assert_eq!(wire.writes_of_len(PACKET_LEN).len(), 1);
    }

    #[test]
    fn test_serial_config_uses_bootloader_speed() {
        let session = FlashSession::new(SessionConfig::new("/dev/ttyUSB0", 460_800)).unwrap();
        let serial = session.serial_config();
        assert_eq!(serial.baud_rate, 115_200);
        assert_eq!(serial.timeout, Timings::default().link_timeout);
        assert_eq!(session.target().get(), 460_800);
    }
}
