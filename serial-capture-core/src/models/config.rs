use std::path::PathBuf;
use std::time::Duration;

/// Process-wide defaults for capture sessions.
///
/// `start` requests may override the port and baud rate; everything else is
/// fixed for the lifetime of the session manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfiguration {
    /// Serial port used when a start request names none.
    pub default_port: Option<String>,

    /// Baud rate used when a start request names none (default: 115200).
    pub default_baud_rate: u32,

    /// Directory where sink files are written (default: `logs`).
    pub log_directory: PathBuf,

    /// Bounded wait for a single serial read (default: 1s).
    pub read_timeout: Duration,

    /// Pause after a transient read or write fault (default: 100ms).
    pub retry_backoff: Duration,

    /// How long `stop` waits for the capture loop to acknowledge (default: 2s).
    pub stop_timeout: Duration,
}

impl CaptureConfiguration {
    pub fn validate(&self) -> Result<(), String> {
        if self.default_baud_rate == 0 {
            return Err("baud rate must be positive".into());
        }
        if self.log_directory.as_os_str().is_empty() {
            return Err("log directory must not be empty".into());
        }
        if self.read_timeout.is_zero() {
            return Err("read timeout must be positive".into());
        }
        if self.stop_timeout.is_zero() {
            return Err("stop timeout must be positive".into());
        }
        // A read in flight holds the port until it returns.
        if self.read_timeout >= self.stop_timeout {
            return Err("read timeout must be shorter than the stop timeout".into());
        }
        if let Some(port) = &self.default_port {
            if port.trim().is_empty() {
                return Err("default port must not be blank".into());
            }
        }
        Ok(())
    }
}

impl Default for CaptureConfiguration {
    fn default() -> Self {
        Self {
            default_port: None,
            default_baud_rate: 115_200,
            log_directory: PathBuf::from("logs"),
            read_timeout: Duration::from_secs(1),
            retry_backoff: Duration::from_millis(100),
            stop_timeout: Duration::from_secs(2),
        }
    }
}
