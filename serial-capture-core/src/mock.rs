//! In-memory serial transport for tests and dry runs.
//!
//! A [`MockOpener`] hands out [`MockTransport`]s that all share one
//! [`MockPortHandle`]. The test keeps a clone of the handle to feed input,
//! inject faults, and observe whether the port was closed.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::models::error::CaptureError;
use crate::traits::serial_transport::{SerialTransport, TransportOpener};

#[derive(Debug, Default)]
struct MockPortState {
    incoming: VecDeque<Result<Vec<u8>, CaptureError>>,
    written: Vec<u8>,
    open: bool,
    reads_blocked: bool,
    open_count: usize,
    close_count: usize,
    opened_with: Option<(String, u32)>,
}

#[derive(Debug, Default)]
struct MockPortShared {
    state: Mutex<MockPortState>,
    data_ready: Condvar,
}

/// Test-side view of the mock port.
#[derive(Debug, Clone, Default)]
pub struct MockPortHandle {
    inner: Arc<MockPortShared>,
}

impl MockPortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `line` followed by a newline.
    pub fn feed_line(&self, line: &str) {
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        self.feed_bytes(&bytes);
    }

    /// Queue raw bytes, delivered by a single read.
    pub fn feed_bytes(&self, bytes: &[u8]) {
        self.push(Ok(bytes.to_vec()));
    }

    /// Make the next read fail with `error`.
    pub fn inject_error(&self, error: CaptureError) {
        self.push(Err(error));
    }

    /// Make reads hang, ignoring the read timeout, until `unblock_reads`.
    pub fn block_reads(&self) {
        self.inner.state.lock().reads_blocked = true;
    }

    pub fn unblock_reads(&self) {
        self.inner.state.lock().reads_blocked = false;
        self.inner.data_ready.notify_all();
    }

    /// Reads still queued.
    pub fn pending_reads(&self) -> usize {
        self.inner.state.lock().incoming.len()
    }

    /// Everything written to the port so far.
    pub fn written(&self) -> Vec<u8> {
        self.inner.state.lock().written.clone()
    }

    pub fn is_open(&self) -> bool {
        self.inner.state.lock().open
    }

    pub fn open_count(&self) -> usize {
        self.inner.state.lock().open_count
    }

    pub fn close_count(&self) -> usize {
        self.inner.state.lock().close_count
    }

    /// Port name and baud rate of the most recent open.
    pub fn opened_with(&self) -> Option<(String, u32)> {
        self.inner.state.lock().opened_with.clone()
    }

    fn push(&self, item: Result<Vec<u8>, CaptureError>) {
        self.inner.state.lock().incoming.push_back(item);
        self.inner.data_ready.notify_all();
    }
}

/// A transport whose input is scripted through a [`MockPortHandle`].
#[derive(Debug)]
pub struct MockTransport {
    port: String,
    read_timeout: Duration,
    handle: MockPortHandle,
    closed: bool,
}

impl MockTransport {
    pub fn new(port: &str, read_timeout: Duration, handle: MockPortHandle) -> Self {
        Self {
            port: port.to_string(),
            read_timeout,
            handle,
            closed: false,
        }
    }
}

impl SerialTransport for MockTransport {
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, CaptureError> {
        if self.closed {
            return Err(CaptureError::DeviceNotAvailable(format!("{} is closed", self.port)));
        }

        let shared = &self.handle.inner;
        let mut state = shared.state.lock();
        while state.reads_blocked {
            shared.data_ready.wait(&mut state);
        }
        if state.incoming.is_empty() {
            shared.data_ready.wait_for(&mut state, self.read_timeout);
        }

        match state.incoming.pop_front() {
            None => Ok(0),
            Some(Err(e)) => Err(e),
            Some(Ok(mut chunk)) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    let rest = chunk.split_off(n);
                    state.incoming.push_front(Ok(rest));
                }
                Ok(n)
            }
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), CaptureError> {
        if self.closed {
            return Err(CaptureError::DeviceNotAvailable(format!("{} is closed", self.port)));
        }
        self.handle.inner.state.lock().written.extend_from_slice(data);
        Ok(())
    }

    fn close(&mut self) -> Result<(), CaptureError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut state = self.handle.inner.state.lock();
        state.open = false;
        state.close_count += 1;
        Ok(())
    }

    fn port_name(&self) -> &str {
        &self.port
    }
}

/// Opens [`MockTransport`]s on any port name.
#[derive(Debug, Default)]
pub struct MockOpener {
    handle: MockPortHandle,
    fail_next: Mutex<Option<CaptureError>>,
}

impl MockOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> MockPortHandle {
        self.handle.clone()
    }

    /// Make the next `open` fail with `error`.
    pub fn fail_next_open(&self, error: CaptureError) {
        *self.fail_next.lock() = Some(error);
    }
}

impl TransportOpener for MockOpener {
    type Transport = MockTransport;

    fn open(
        &self,
        port: &str,
        baud_rate: u32,
        read_timeout: Duration,
    ) -> Result<MockTransport, CaptureError> {
        if let Some(error) = self.fail_next.lock().take() {
            return Err(error);
        }

        {
            let mut state = self.handle.inner.state.lock();
            state.open = true;
            state.open_count += 1;
            state.opened_with = Some((port.to_string(), baud_rate));
        }
        Ok(MockTransport::new(port, read_timeout, self.handle.clone()))
    }
}
