//! Scripted in-memory port for protocol tests.
//!
//! Reads are served from a fixed script; everything the protocol does to the
//! port is recorded in a shared [`Wire`] so tests can inspect it after the
//! port has been moved into a session.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::port::Port;

/// One scripted answer to a read call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reply {
    Byte(u8),
    Timeout,
    /// The driver fails the read.
    Error(io::ErrorKind),
}

/// Everything observed on the fake wire.
#[derive(Debug, Default)]
pub(crate) struct Wire {
    /// One entry per `write` call.
    pub writes: Vec<Vec<u8>>,
    pub rts: Vec<bool>,
    pub reopened_at: Vec<u32>,
    pub output_clears: usize,
    pub closed: usize,
    pub reads: usize,
}

impl Wire {
    /// Writes of exactly `len` bytes.
    pub fn writes_of_len(&self, len: usize) -> Vec<&[u8]> {
        self.writes
            .iter()
            .filter(|w| w.len() == len)
            .map(Vec::as_slice)
            .collect()
    }
}

pub(crate) struct ScriptedPort {
    script: VecDeque<Reply>,
    wire: Arc<Mutex<Wire>>,
    baud_rate: u32,
    timeout: Duration,
    open: bool,
    failing_reopen: bool,
    failing_rts: bool,
}

impl ScriptedPort {
    pub fn new(script: impl IntoIterator<Item = Reply>) -> (Self, Arc<Mutex<Wire>>) {
        let wire = Arc::new(Mutex::new(Wire::default()));
        let port = Self {
            script: script.into_iter().collect(),
            wire: Arc::clone(&wire),
            baud_rate: 115200,
            timeout: Duration::from_secs(1),
            open: true,
            failing_reopen: false,
            failing_rts: false,
        };
        (port, wire)
    }

    /// Every `reopen` fails as if the adapter was unplugged.
    pub fn with_failing_reopen(mut self) -> Self {
        self.failing_reopen = true;
        self
    }

    /// Every `set_rts` fails.
    pub fn with_failing_rts(mut self) -> Self {
        self.failing_rts = true;
        self
    }

    fn unplugged() -> Error {
        Error::Io(io::Error::new(io::ErrorKind::NotConnected, "unplugged"))
    }

    /// Script made of plain bytes, no timeouts.
    pub fn from_bytes(bytes: &[u8]) -> (Self, Arc<Mutex<Wire>>) {
        Self::new(bytes.iter().copied().map(Reply::Byte))
    }
}

impl Read for ScriptedPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.wire.lock().unwrap().reads += 1;
        match self.script.pop_front() {
            Some(Reply::Byte(b)) if !buf.is_empty() => {
                buf[0] = b;
                Ok(1)
            },
            Some(Reply::Byte(_)) => Ok(0),
            Some(Reply::Error(kind)) => Err(io::Error::new(kind, "driver failure")),
            Some(Reply::Timeout) | None => Err(io::Error::new(io::ErrorKind::TimedOut, "no data")),
        }
    }
}

impl Write for ScriptedPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.wire.lock().unwrap().writes.push(buf.to_vec());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for ScriptedPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn clear_output(&mut self) -> Result<()> {
        self.wire.lock().unwrap().output_clears += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        if self.failing_rts {
            return Err(Self::unplugged());
        }
        self.wire.lock().unwrap().rts.push(level);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            self.wire.lock().unwrap().closed += 1;
        }
        Ok(())
    }

    fn reopen(&mut self, baud_rate: u32) -> Result<()> {
        if self.failing_reopen {
            self.close()?;
            return Err(Self::unplugged());
        }
        self.baud_rate = baud_rate;
        self.open = true;
        self.wire.lock().unwrap().reopened_at.push(baud_rate);
        Ok(())
    }
}
