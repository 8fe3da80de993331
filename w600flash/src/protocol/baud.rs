//! Baud-switch command frames.
//!
//! The ROM bootloader always starts at [`INITIAL_BAUD`]. To go faster the
//! host sends one of five fixed 13-byte frames, after which both sides move
//! to the new speed.
//!
//! ```text
//! +------+--------+--------+-------------+-------------+
//! | 0x21 | LEN=10 | CRC16  | CMD=0x31    | BAUD        |
//! +------+--------+--------+-------------+-------------+
//! | 1    | 2 (LE) | 2 (LE) | 4 (LE)      | 4 (LE)      |
//! +------+--------+--------+-------------+-------------+
//! ```
//!
//! The CRC is CRC16-CCITT-FALSE over the last eight bytes. The frames are
//! kept as captured from the vendor tool and only decoded for diagnostics.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};
use crate::protocol::crc::crc16_ccitt_false;

/// Speed the bootloader listens on after reset.
pub const INITIAL_BAUD: u32 = 115_200;

/// Target speed when the user does not pick one.
pub const DEFAULT_BAUD: u32 = 2_000_000;

/// Length of every baud-switch frame.
pub const FRAME_LEN: usize = 13;

/// Frame opcode.
pub const OPCODE: u8 = 0x21;

/// Command word carried in the frame.
pub const SET_BAUD_COMMAND: u32 = 0x31;

/// A supported baud rate and the frame that selects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaudProfile {
    /// Baud rate in bits per second.
    pub baud: u32,
    /// Bit-exact frame sent to the bootloader.
    pub frame: [u8; FRAME_LEN],
}

static PROFILES: [BaudProfile; 5] = [
    BaudProfile {
        baud: 115_200,
        frame: [
            0x21, 0x0a, 0x00, 0x97, 0x4b, 0x31, 0x00, 0x00, 0x00, 0x00, 0xc2, 0x01, 0x00,
        ],
    },
    BaudProfile {
        baud: 460_800,
        frame: [
            0x21, 0x0a, 0x00, 0x07, 0x00, 0x31, 0x00, 0x00, 0x00, 0x00, 0x08, 0x07, 0x00,
        ],
    },
    BaudProfile {
        baud: 921_600,
        frame: [
            0x21, 0x0a, 0x00, 0x5d, 0x50, 0x31, 0x00, 0x00, 0x00, 0x00, 0x10, 0x0e, 0x00,
        ],
    },
    BaudProfile {
        baud: 1_000_000,
        frame: [
            0x21, 0x0a, 0x00, 0x5e, 0x3d, 0x31, 0x00, 0x00, 0x00, 0x40, 0x42, 0x0f, 0x00,
        ],
    },
    BaudProfile {
        baud: 2_000_000,
        frame: [
            0x21, 0x0a, 0x00, 0xef, 0x2a, 0x31, 0x00, 0x00, 0x00, 0x80, 0x84, 0x1e, 0x00,
        ],
    },
];

/// All baud rates that have a switch frame, ascending.
pub const SUPPORTED_BAUDS: [u32; 5] = [115_200, 460_800, 921_600, 1_000_000, 2_000_000];

impl BaudProfile {
    /// Look up the profile for `baud`.
    #[must_use]
    pub fn lookup(baud: u32) -> Option<&'static Self> {
        let index = match baud {
            115_200 => 0,
            460_800 => 1,
            921_600 => 2,
            1_000_000 => 3,
            2_000_000 => 4,
            _ => return None,
        };
        Some(&PROFILES[index])
    }

    /// All five profiles.
    #[must_use]
    pub fn all() -> &'static [Self] {
        &PROFILES
    }

    /// Baud parameter encoded in the frame.
    #[must_use]
    pub fn encoded_baud(&self) -> u32 {
        LittleEndian::read_u32(&self.frame[9..13])
    }

    /// Whether the frame's own checksum and baud parameter are consistent.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let len = LittleEndian::read_u16(&self.frame[1..3]);
        let crc = LittleEndian::read_u16(&self.frame[3..5]);
        self.frame[0] == OPCODE
            && usize::from(len) == FRAME_LEN - 3
            && crc == crc16_ccitt_false(&self.frame[5..])
            && LittleEndian::read_u32(&self.frame[5..9]) == SET_BAUD_COMMAND
            && self.encoded_baud() == self.baud
    }
}

/// A baud rate known to have a switch frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaudRate(&'static BaudProfile);

impl BaudRate {
    /// Bits per second.
    #[must_use]
    pub fn get(self) -> u32 {
        self.0.baud
    }

    /// The switch frame for this rate.
    #[must_use]
    pub fn profile(self) -> &'static BaudProfile {
        self.0
    }
}

impl Default for BaudRate {
    fn default() -> Self {
        Self(&PROFILES[4])
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = Error;

    fn try_from(baud: u32) -> Result<Self> {
        BaudProfile::lookup(baud)
            .map(Self)
            .ok_or(Error::UnsupportedBaud(baud))
    }
}

impl fmt::Display for BaudRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.baud)
    }
}
