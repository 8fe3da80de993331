//! Single-byte bootloader commands.

use std::time::{Duration, Instant};

use log::debug;

use crate::error::{Error, Result};
use crate::port::Port;

/// Commands understood by the ROM bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// ESC: keep the bootloader in download mode.
    EnterLoadMode = 0x1B,
    /// 'V': print the loader version line.
    QueryLoaderVersion = 0x56,
    /// 'X': start a firmware download.
    LoadFirmware = 0x58,
}

impl Command {
    /// Wire byte.
    #[must_use]
    pub fn byte(self) -> u8 {
        self as u8
    }

    /// Write the command byte.
    pub fn send<P: Port + ?Sized>(self, port: &mut P) -> Result<()> {
        port.write_all_bytes(&[self.byte()])
    }
}

const MAX_VERSION_LEN: usize = 128;

/// Ask the bootloader for its version string.
///
/// Reads until a newline, `timeout` elapses, or the line gets implausibly
/// long. Must be called while the bootloader is in download mode.
pub fn query_loader_version<P: Port + ?Sized>(port: &mut P, timeout: Duration) -> Result<String> {
    Command::QueryLoaderVersion.send(port)?;

    let start = Instant::now();
    let mut line = Vec::new();
    while start.elapsed() < timeout && line.len() < MAX_VERSION_LEN {
        let chunk = port.read_bytes(1, timeout.saturating_sub(start.elapsed()))?;
        match chunk.first() {
            Some(b'\n') => break,
            Some(&b) => line.push(b),
            None => {
                if line.is_empty() {
                    return Err(Error::Io(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "no loader version reply",
                    )));
                }
                break;
            },
        }
    }

    let version = String::from_utf8_lossy(&line).trim().to_string();
    debug!("Loader version: {version}");
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::{Reply, ScriptedPort};

    #[test]
    fn test_command_bytes() {
        assert_eq!(Command::EnterLoadMode.byte(), 0x1B);
        assert_eq!(Command::QueryLoaderVersion.byte(), 0x56);
        assert_eq!(Command::LoadFirmware.byte(), 0x58);
    }

    #[test]
    fn test_query_loader_version_reads_line() {
        let (mut port, wire) = ScriptedPort::from_bytes(b"V3.1\r\nextra");
        let version = query_loader_version(&mut port, Duration::from_secs(1)).unwrap();
        assert_eq!(version, "V3.1");
        assert_eq!(wire.lock().unwrap().writes, vec![vec![0x56]]);
    }

    #[test]
    fn test_query_loader_version_silent_device() {
        let (mut port, _wire) = ScriptedPort::new([Reply::Timeout]);
        let err = query_loader_version(&mut port, Duration::from_secs(1)).unwrap_err();
        assert!(err.is_io());
    }

    #[test]
    fn test_query_loader_version_partial_line() {
        let (mut port, _wire) = ScriptedPort::new([Reply::Byte(b'V'), Reply::Byte(b'2'), Reply::Timeout]);
        let version = query_loader_version(&mut port, Duration::from_secs(1)).unwrap();
        assert_eq!(version, "V2");
    }
}
