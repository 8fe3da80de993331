//! Bootloader sync and baud switch.
//!
//! After a hardware reset the ROM bootloader prints a short banner and then
//! emits `'C'` while it waits for a download. The host keeps poking it with
//! ESC; three `'C'` in a row mean the loader is listening, at which point the
//! host sends the baud-switch frame and both sides move to the target speed.
//!
//! ```text
//!            Tick/ResetDevice
//!  Start ─────────────────────▶ AwaitingSync(0)
//!                                 │  'C'  ─▶ AwaitingSync(n+1), n+1 > 2 ─▶ BaudSwitchPending
//!                                 │  'P'  ─▶ AwaitingSync(0)
//!                                 └  other/timeout ─▶ AwaitingSync(0) + Resync
//!  BaudSwitchPending ── Tick ──▶ Synced + SwitchBaud  |  Failed(UnsupportedBaud)
//! ```
//!
//! [`HandshakeMachine::transition`] is pure; [`Handshake`] feeds it events
//! read from a [`Port`] and carries out the returned [`Action`]s.

use log::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::baud::{BaudProfile, DEFAULT_BAUD, INITIAL_BAUD};
use crate::protocol::command::Command;
use crate::timing::{Timings, settle};

/// Banner the bootloader prints right after reset.
///
/// Its bytes arrive as noise before the first sync byte, so the attempt
/// budget has to cover them. Observed on V3.1 loaders; other loader versions
/// may print something of a different length, hence
/// [`HandshakeConfig::max_attempts`] is tunable.
pub const BOOT_BANNER: &str = "secboot running V3.1...";

/// Default number of handshake iterations.
pub const DEFAULT_SYNC_ATTEMPTS: usize = 16 + BOOT_BANNER.len();

/// Byte the loader sends while waiting for a download.
pub const SYNC_BYTE: u8 = b'C';

/// Byte the loader sends while in its intermediate sub-phase.
pub const PENDING_BYTE: u8 = b'P';

/// Consecutive sync bytes must exceed this.
const SYNC_THRESHOLD: u8 = 2;

/// Terminal failure of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeFailure {
    /// Target baud has no switch frame.
    UnsupportedBaud(u32),
    /// Attempt budget ran out.
    SyncTimeout,
    /// The baud-switch frame could not be sent or the link not reopened.
    BaudSwitchFailure,
    /// The link failed while resetting or syncing.
    Io,
}

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Nothing done yet.
    Start,
    /// Counting consecutive sync bytes.
    AwaitingSync(u8),
    /// Sync seen, baud switch not yet sent.
    BaudSwitchPending,
    /// Link runs at the target baud.
    Synced,
    /// Gave up.
    Failed(HandshakeFailure),
}

impl HandshakeState {
    /// Whether no further transitions happen.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Synced | Self::Failed(_))
    }
}

/// Input to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// States that need no input advance on a tick.
    Tick,
    /// One byte from the loader.
    Byte(u8),
    /// The read timed out.
    Timeout,
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing to do.
    None,
    /// Poke, pulse the reset line, switch to the short sync timeout.
    ResetDevice,
    /// Flush output and reopen the link at the initial baud.
    Resync,
    /// Send the frame, wait for the device, reopen at the new baud.
    SwitchBaud(&'static BaudProfile),
}

/// Pure handshake transition function.
#[derive(Debug, Clone, Copy)]
pub struct HandshakeMachine {
    target_baud: u32,
}

impl HandshakeMachine {
    /// Machine that will switch to `target_baud`.
    #[must_use]
    pub fn new(target_baud: u32) -> Self {
        Self { target_baud }
    }

    /// Compute the next state and the side effect to perform.
    #[must_use]
    pub fn transition(&self, state: HandshakeState, event: Event) -> (HandshakeState, Action) {
        use HandshakeState::{AwaitingSync, BaudSwitchPending, Failed, Start, Synced};

        match (state, event) {
            (Start, _) => (AwaitingSync(0), Action::ResetDevice),
            (AwaitingSync(n), Event::Byte(SYNC_BYTE)) => {
                let n = n.saturating_add(1);
                if n > SYNC_THRESHOLD {
                    (BaudSwitchPending, Action::None)
                } else {
                    (AwaitingSync(n), Action::None)
                }
            },
            (AwaitingSync(_), Event::Byte(PENDING_BYTE)) => (AwaitingSync(0), Action::None),
            (AwaitingSync(_), Event::Byte(_) | Event::Timeout) => (AwaitingSync(0), Action::Resync),
            (AwaitingSync(n), Event::Tick) => (AwaitingSync(n), Action::None),
            (BaudSwitchPending, _) => match BaudProfile::lookup(self.target_baud) {
                Some(profile) => (Synced, Action::SwitchBaud(profile)),
                None => (
                    Failed(HandshakeFailure::UnsupportedBaud(self.target_baud)),
                    Action::None,
                ),
            },
            (terminal @ (Synced | Failed(_)), _) => (terminal, Action::None),
        }
    }
}

/// Handshake parameters.
#[derive(Debug, Clone, Copy)]
pub struct HandshakeConfig {
    /// Speed to switch to.
    pub target_baud: u32,
    /// Speed the loader listens on after reset.
    pub initial_baud: u32,
    /// Iteration budget; see [`BOOT_BANNER`].
    pub max_attempts: usize,
    /// Settle times.
    pub timings: Timings,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            target_baud: DEFAULT_BAUD,
            initial_baud: INITIAL_BAUD,
            max_attempts: DEFAULT_SYNC_ATTEMPTS,
            timings: Timings::default(),
        }
    }
}

/// What a successful handshake took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeReport {
    /// Iterations used, out of the budget.
    pub attempts: usize,
    /// Number of times the link was reopened at the initial baud.
    pub resyncs: usize,
    /// Baud the link now runs at.
    pub baud: u32,
}

/// Drives [`HandshakeMachine`] over a port.
pub struct Handshake<'a, P: Port + ?Sized> {
    port: &'a mut P,
    machine: HandshakeMachine,
    config: HandshakeConfig,
    state: HandshakeState,
    resyncs: usize,
}

impl<'a, P: Port + ?Sized> Handshake<'a, P> {
    /// Create a handshake driver.
    pub fn new(port: &'a mut P, config: HandshakeConfig) -> Self {
        Self {
            port,
            machine: HandshakeMachine::new(config.target_baud),
            config,
            state: HandshakeState::Start,
            resyncs: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Run until synced or out of attempts.
    pub fn negotiate(&mut self) -> Result<HandshakeReport> {
        info!(
            "Syncing with bootloader on {} (target {} baud)",
            self.port.name(),
            self.config.target_baud
        );

        for attempt in 1..=self.config.max_attempts {
            settle(self.config.timings.poll_interval);

            let event = match self.next_event() {
                Ok(event) => event,
                Err(e) => return Err(self.fail(e)),
            };
            let (next, action) = self.machine.transition(self.state, event);
            trace!("{:?} + {event:?} -> {next:?} ({action:?})", self.state);

            if let Err(e) = self.perform(action) {
                return Err(self.fail(e));
            }
            self.state = next;

            match self.state {
                HandshakeState::Synced => {
                    info!("Synced at {} baud after {attempt} attempts", self.config.target_baud);
                    return Ok(HandshakeReport {
                        attempts: attempt,
                        resyncs: self.resyncs,
                        baud: self.config.target_baud,
                    });
                },
                HandshakeState::Failed(HandshakeFailure::UnsupportedBaud(baud)) => {
                    return Err(Error::UnsupportedBaud(baud));
                },
                HandshakeState::BaudSwitchPending => debug!("Bootloader sync detected"),
                _ => {},
            }
        }

        self.state = HandshakeState::Failed(HandshakeFailure::SyncTimeout);
        Err(Error::SyncTimeout {
            attempts: self.config.max_attempts,
        })
    }

    /// Move to the terminal failure matching `err` and hand it back.
    fn fail(&mut self, err: Error) -> Error {
        let reason = match err {
            Error::BaudSwitchFailure(_) => HandshakeFailure::BaudSwitchFailure,
            _ => HandshakeFailure::Io,
        };
        warn!("Handshake failed in {:?}: {err}", self.state);
        self.state = HandshakeState::Failed(reason);
        err
    }

    fn next_event(&mut self) -> Result<Event> {
        match self.state {
            HandshakeState::AwaitingSync(_) => {
                Command::EnterLoadMode.send(&mut *self.port)?;
                let reply = self
                    .port
                    .read_bytes(1, self.config.timings.sync_read_timeout)?;
                Ok(reply.first().map_or(Event::Timeout, |&b| Event::Byte(b)))
            },
            _ => Ok(Event::Tick),
        }
    }

    fn perform(&mut self, action: Action) -> Result<()> {
        let timings = self.config.timings;
        match action {
            Action::None => {},
            Action::ResetDevice => {
                debug!("Resetting device");
                Command::EnterLoadMode.send(&mut *self.port)?;
                self.port.set_reset_line(true)?;
                self.port.clear_output()?;
                settle(timings.reset_hold);
                self.port.set_reset_line(false)?;
                self.port.set_timeout(timings.sync_read_timeout)?;
            },
            Action::Resync => {
                trace!("No sync byte, reopening at {}", self.config.initial_baud);
                self.resyncs += 1;
                self.port.clear_output()?;
                self.port.reopen(self.config.initial_baud)?;
            },
            Action::SwitchBaud(profile) => {
                info!("Switching to {} baud", profile.baud);
                self.switch_baud(profile)
                    .map_err(|e| Error::BaudSwitchFailure(format!("{} baud: {e}", profile.baud)))?;
            },
        }
        Ok(())
    }

    fn switch_baud(&mut self, profile: &BaudProfile) -> Result<()> {
        debug!(
            "Sending baud frame (encoded baud {})",
            profile.encoded_baud()
        );
        self.port.write_all_bytes(&profile.frame)?;
        settle(self.config.timings.baud_settle);
        self.port.reopen(profile.baud)
    }
}
