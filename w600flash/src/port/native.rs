//! Native serial port implementation using the `serialport` crate.
//!
//! This module provides the serial port implementation for native platforms
//! (Linux, macOS, Windows, FreeBSD, etc.).

use {
    crate::{
        error::{Error, Result},
        port::{Port, PortEnumerator, PortInfo, SerialConfig},
    },
    log::{debug, trace},
    serialport::ClearBuffer,
    std::{
        io::{Read, Write},
        time::Duration,
    },
};

/// Native serial port implementation.
pub struct NativePort {
    port: Option<Box<dyn serialport::SerialPort>>,
    config: SerialConfig,
}

impl NativePort {
    /// Open a serial port with the given configuration.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let port = Self::open_raw(config)?;
        Ok(Self {
            port: Some(port),
            config: config.clone(),
        })
    }

    fn open_raw(config: &SerialConfig) -> Result<Box<dyn serialport::SerialPort>> {
        serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => Error::PortUnavailable(config.port_name.clone()),
                serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
                    Error::PortUnavailable(config.port_name.clone())
                },
                _ => e.into(),
            })
    }

    fn closed() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed")
    }
}

impl Port for NativePort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        if let Some(ref mut p) = self.port {
            p.set_timeout(timeout)?;
        }
        self.config.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.config.timeout
    }

    fn baud_rate(&self) -> u32 {
        self.config.baud_rate
    }

    fn clear_output(&mut self) -> Result<()> {
        if let Some(ref mut p) = self.port {
            p.clear(ClearBuffer::Output)?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.config.port_name
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        trace!("Setting RTS to {level}");
        if let Some(ref mut p) = self.port {
            p.write_request_to_send(level)?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut p) = self.port.take() {
            // Pending output is best effort; the handle is released either way.
            let _ = p.flush();
            let _ = p.clear(ClearBuffer::Input);
            debug!("Closed {}", self.config.port_name);
        }
        Ok(())
    }

    fn reopen(&mut self, baud_rate: u32) -> Result<()> {
        self.close()?;
        self.config.baud_rate = baud_rate;
        self.port = Some(Self::open_raw(&self.config)?);
        debug!("Reopened {} at {baud_rate}", self.config.port_name);
        Ok(())
    }
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(Self::closed)
            .and_then(|p| p.read(buf))
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(Self::closed)
            .and_then(|p| p.write(buf))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.port
            .as_mut()
            .ok_or_else(Self::closed)
            .and_then(std::io::Write::flush)
    }
}

/// Native port enumerator.
pub struct NativePortEnumerator;

impl PortEnumerator for NativePortEnumerator {
    fn list_ports() -> Result<Vec<PortInfo>> {
        let ports = serialport::available_ports()?;

        Ok(ports
            .into_iter()
            .map(|p| {
                let (vid, pid, product) = match &p.port_type {
                    serialport::SerialPortType::UsbPort(info) => {
                        (Some(info.vid), Some(info.pid), info.product.clone())
                    },
                    _ => (None, None, None),
                };

                PortInfo {
                    name: p.port_name,
                    vid,
                    pid,
                    product,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ports() {
        // This test just verifies that list_ports doesn't panic
        let _ = NativePortEnumerator::list_ports();
    }

    #[test]
    fn test_open_missing_port_is_unavailable() {
        let config = SerialConfig::new("W600FLASH_NO_SUCH_PORT", 115200);
        match NativePort::open(&config) {
            Err(Error::PortUnavailable(name)) => assert_eq!(name, "W600FLASH_NO_SUCH_PORT"),
            Err(other) => assert!(other.is_io(), "unexpected error: {other}"),
            Ok(_) => panic!("opening a nonexistent port must fail"),
        }
    }

    #[test]
    fn test_is_available_unknown_port() {
        assert!(!NativePortEnumerator::is_available("W600FLASH_NO_SUCH_PORT"));
    }
}
