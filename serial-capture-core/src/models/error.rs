use thiserror::Error;

/// Errors that can occur during serial capture operations.
///
/// Redundant requests (start while running, stop while idle) are not errors;
/// they are reported through [`StartOutcome`](crate::StartOutcome) and
/// [`StopOutcome`](crate::StopOutcome).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("failed to open serial port {port}: {reason}")]
    PortOpenFailed { port: String, reason: String },

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("device not available: {0}")]
    DeviceNotAvailable(String),

    #[error("transient i/o error: {0}")]
    Transient(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl CaptureError {
    /// Whether the capture loop should retry after this error instead of
    /// ending the session.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::StorageError(_) | Self::Timeout(_))
    }
}
