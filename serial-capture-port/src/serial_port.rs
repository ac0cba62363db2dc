//! `serialport`-backed transport.
//!
//! Wraps a `Box<dyn serialport::SerialPort>` opened with the session's read
//! timeout, so every read is bounded and an idle line shows up as `Ok(0)`.

use std::io::{self, Read, Write};
use std::time::Duration;

use serial_capture_core::{CaptureError, SerialTransport, TransportOpener};

/// Opens ports through `serialport::new`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialPortOpener;

impl SerialPortOpener {
    pub fn new() -> Self {
        Self
    }
}

impl TransportOpener for SerialPortOpener {
    type Transport = SerialPortTransport;

    fn open(
        &self,
        port: &str,
        baud_rate: u32,
        read_timeout: Duration,
    ) -> Result<SerialPortTransport, CaptureError> {
        SerialPortTransport::open(port, baud_rate, read_timeout)
    }
}

/// A live serial connection.
pub struct SerialPortTransport {
    port_name: String,
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl SerialPortTransport {
    pub fn open(port: &str, baud_rate: u32, read_timeout: Duration) -> Result<Self, CaptureError> {
        let handle = serialport::new(port, baud_rate)
            .timeout(read_timeout)
            .open()
            .map_err(|e| open_error(port, e))?;

        log::debug!("opened {} at {} baud", port, baud_rate);
        Ok(Self {
            port_name: port.to_string(),
            port: Some(handle),
        })
    }

    fn handle(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>, CaptureError> {
        let name = &self.port_name;
        self.port
            .as_mut()
            .ok_or_else(|| CaptureError::DeviceNotAvailable(format!("{} is closed", name)))
    }
}

impl SerialTransport for SerialPortTransport {
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, CaptureError> {
        let name = self.port_name.clone();
        match self.handle()?.read(buf) {
            Ok(n) => Ok(n),
            Err(e) => classify_io_error(&name, e).map(|_| 0),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), CaptureError> {
        let name = self.port_name.clone();
        let port = self.handle()?;
        port.write_all(data)
            .and_then(|_| port.flush())
            .or_else(|e| classify_io_error(&name, e))
    }

    fn close(&mut self) -> Result<(), CaptureError> {
        if self.port.take().is_some() {
            log::debug!("closed {}", self.port_name);
        }
        Ok(())
    }

    fn port_name(&self) -> &str {
        &self.port_name
    }
}

fn open_error(port: &str, error: serialport::Error) -> CaptureError {
    let reason = match error.kind() {
        serialport::ErrorKind::NoDevice => format!("no such device ({})", error.description),
        _ => error.description,
    };
    CaptureError::PortOpenFailed {
        port: port.to_string(),
        reason,
    }
}

/// Timeouts mean "no data"; hang-ups mean the device is gone; everything
/// else is worth retrying.
fn classify_io_error(port: &str, error: io::Error) -> Result<(), CaptureError> {
    match error.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(()),
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::NotConnected
        | io::ErrorKind::NotFound
        | io::ErrorKind::PermissionDenied => Err(CaptureError::DeviceNotAvailable(format!(
            "{}: {}",
            port, error
        ))),
        _ => Err(CaptureError::Transient(format!("{}: {}", port, error))),
    }
}
