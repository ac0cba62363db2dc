//! One-shot write-then-read exchange with a DUT.
//!
//! Used outside capture sessions to poke a device: send a command, then
//! collect whatever it answers within a fixed window.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use serial_capture_core::{CaptureError, SerialTransport};

/// What was sent and what came back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeResult {
    pub port: String,
    pub sent: String,
    pub read: String,
}

/// Write `data + terminator`, then read for `wait`.
///
/// The transport's own read timeout bounds each individual read, so the
/// total time spent can overshoot `wait` by at most one read timeout.
pub fn exchange<T: SerialTransport>(
    transport: &mut T,
    data: &str,
    terminator: &str,
    wait: Duration,
) -> Result<ExchangeResult, CaptureError> {
    let sent = format!("{}{}", data, terminator);
    transport.write_all(sent.as_bytes())?;

    let deadline = Instant::now() + wait;
    let mut received = Vec::new();
    let mut buf = [0u8; 512];
    while Instant::now() < deadline {
        match transport.read_available(&mut buf) {
            Ok(n) => received.extend_from_slice(&buf[..n]),
            Err(e) if e.is_transient() => {
                log::debug!("exchange on {}: {}", transport.port_name(), e);
            }
            Err(e) => return Err(e),
        }
    }

    Ok(ExchangeResult {
        port: transport.port_name().to_string(),
        sent,
        read: String::from_utf8_lossy(&received).into_owned(),
    })
}
