//! Fixed device settle times and pacing.
//!
//! These encode hardware timing of the W600 ROM bootloader, not congestion
//! control, so they never back off. Tests use [`Timings::immediate`].

use std::time::Duration;

/// Named delays used by the handshake and the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// How long the reset line stays asserted.
    pub reset_hold: Duration,
    /// Read timeout while waiting for sync bytes.
    pub sync_read_timeout: Duration,
    /// Delay before every handshake iteration.
    pub poll_interval: Duration,
    /// Wait after sending a baud-switch frame, before reconfiguring locally.
    pub baud_settle: Duration,
    /// Read timeout the link is opened with.
    pub link_timeout: Duration,
    /// Wait between the handshake and the first transfer byte.
    pub pre_transfer_settle: Duration,
    /// Wait after the transfer so the device can finish writing flash.
    pub post_transfer_settle: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            reset_hold: Duration::from_millis(50),
            sync_read_timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(20),
            baud_settle: Duration::from_millis(500),
            link_timeout: Duration::from_secs(1),
            pre_transfer_settle: Duration::from_millis(200),
            post_transfer_settle: Duration::from_secs(1),
        }
    }
}

impl Timings {
    /// All sleeps zero. Read timeouts stay non-zero so fakes behave.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            reset_hold: Duration::ZERO,
            sync_read_timeout: Duration::from_millis(1),
            poll_interval: Duration::ZERO,
            baud_settle: Duration::ZERO,
            link_timeout: Duration::from_millis(1),
            pre_transfer_settle: Duration::ZERO,
            post_transfer_settle: Duration::ZERO,
        }
    }
}

/// Sleep unless `d` is zero.
pub(crate) fn settle(d: Duration) {
    if !d.is_zero() {
        std::thread::sleep(d);
    }
}
