use std::time::Duration;

use crate::models::error::CaptureError;

/// An open serial connection owned by a capture session.
///
/// Implemented by:
/// - `SerialPortTransport` (serialport backend)
/// - `MockTransport` (in-memory, for tests and dry runs)
pub trait SerialTransport: Send {
    /// Read whatever bytes are available into `buf`, waiting at most the
    /// read timeout the transport was opened with.
    ///
    /// Returns `Ok(0)` when the wait elapsed without data. Implementations
    /// report a vanished device as `CaptureError::DeviceNotAvailable`;
    /// anything else is treated as transient by the capture loop.
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, CaptureError>;

    /// Write all of `data` to the port.
    fn write_all(&mut self, data: &[u8]) -> Result<(), CaptureError>;

    /// Release the underlying handle. Must be safe to call more than once.
    fn close(&mut self) -> Result<(), CaptureError>;

    /// Name of the port this transport is connected to.
    fn port_name(&self) -> &str;
}

/// Opens serial transports by port name.
///
/// The session manager holds one opener for its whole lifetime and asks it
/// for a fresh transport on every successful `start`.
pub trait TransportOpener: Send + Sync {
    type Transport: SerialTransport + 'static;

    fn open(
        &self,
        port: &str,
        baud_rate: u32,
        read_timeout: Duration,
    ) -> Result<Self::Transport, CaptureError>;
}
