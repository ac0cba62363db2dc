use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use serial_capture_core::{
    CaptureDelegate, CaptureError, CaptureState, CaptureStatus, CapturedLine, SessionManager,
    SessionSummary, TransportOpener,
};
use serial_capture_port::DeviceEnumerator;

/// Process-wide state shared by every request handler.
pub struct AgentState<O: TransportOpener> {
    pub manager: SessionManager<O>,
    pub enumerator: DeviceEnumerator,
    pub started_at: DateTime<Utc>,
}

impl<O: TransportOpener> AgentState<O> {
    pub fn new(manager: SessionManager<O>, enumerator: DeviceEnumerator) -> Self {
        manager.set_delegate(LogDelegate::new());
        Self {
            manager,
            enumerator,
            started_at: Utc::now(),
        }
    }

    /// The port a start request should use: the requested one, else the
    /// configured default, else the first USB-serial port attached.
    pub fn resolve_port(&self, requested: Option<&str>) -> Option<String> {
        requested
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .or_else(|| self.manager.config().default_port.clone())
            .or_else(|| {
                let guessed = self.enumerator.default_port();
                if let Some(port) = &guessed {
                    log::info!("no serial port configured, using {}", port);
                }
                guessed
            })
    }

    /// Stop any running capture before the process exits.
    pub fn shutdown(&self) {
        match self.manager.stop() {
            Ok(outcome) => log::info!("shutdown: {}", outcome.message()),
            Err(e) => log::error!("shutdown: {}", e),
        }
    }
}

/// CaptureDelegate that forwards session events to the log.
pub struct LogDelegate;

impl LogDelegate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl CaptureDelegate for LogDelegate {
    fn on_state_changed(&self, state: &CaptureState) {
        match state.job_id() {
            Some(job_id) => log::info!("capture state: {} (job_id={})", state.name(), job_id),
            None => log::info!("capture state: {}", state.name()),
        }
    }

    fn on_line_captured(&self, job_id: &str, line: &CapturedLine) {
        log::trace!("[{}] {}", job_id, line.text);
    }

    fn on_error(&self, error: &CaptureError) {
        if error.is_transient() {
            log::debug!("capture fault (retrying): {}", error);
        } else {
            log::error!("capture error: {}", error);
        }
    }

    fn on_session_finished(&self, summary: &SessionSummary) {
        log::info!(
            "capture finished: job_id={} lines={} duration={:.1}s text={} vars={}",
            summary.info.job_id,
            summary.lines_captured,
            summary.duration_secs(),
            summary.info.text_sink_path.display(),
            summary.info.vars_sink_path.display()
        );
    }
}

// -- Response payloads --

/// Reply to `start` and `stop`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureResponse {
    pub ok: bool,
    pub message: String,
    pub status: CaptureStatus,
}

/// Reply to requests that fail before reaching a handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub started_at: DateTime<Utc>,
    pub capture: CaptureStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionResponse {
    pub version: &'static str,
}
