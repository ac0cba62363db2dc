use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::naming::SinkPaths;

/// Describes the session that a successful `start` brought up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Internal identity of this run; distinguishes two runs with the same job id.
    pub session_id: String,
    pub job_id: String,
    pub port: String,
    pub baud_rate: u32,
    pub started_at: DateTime<Utc>,
    pub text_sink_path: PathBuf,
    pub vars_sink_path: PathBuf,
}

impl SessionInfo {
    pub fn new(job_id: &str, port: &str, baud_rate: u32, started_at: DateTime<Utc>, paths: SinkPaths) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            port: port.to_string(),
            baud_rate,
            started_at,
            text_sink_path: paths.text,
            vars_sink_path: paths.vars,
        }
    }
}

/// Result returned when a capture session is stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub info: SessionInfo,
    pub stopped_at: DateTime<Utc>,
    pub lines_captured: u64,
    /// Whether the capture loop acknowledged the stop signal in time.
    pub acknowledged: bool,
    /// SHA-256 of the text sink after close, if it could be read back.
    pub text_checksum: Option<String>,
    /// SHA-256 of the vars sink after close, if it could be read back.
    pub vars_checksum: Option<String>,
}

impl SessionSummary {
    pub fn duration_secs(&self) -> f64 {
        (self.stopped_at - self.info.started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// Outcome of a `start` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started(SessionInfo),
    /// A session was already running; nothing changed.
    AlreadyRunning { job_id: String },
}

impl StartOutcome {
    pub fn message(&self) -> String {
        match self {
            Self::Started(info) => format!(
                "serial logging started (job_id={}, port={}, baud={})",
                info.job_id, info.port, info.baud_rate
            ),
            Self::AlreadyRunning { job_id } => {
                format!("logger already running for job_id={}", job_id)
            }
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started(_))
    }
}

/// Outcome of a `stop` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped(SessionSummary),
    /// No session was running; nothing changed.
    NotRunning,
}

impl StopOutcome {
    pub fn message(&self) -> String {
        match self {
            Self::Stopped(summary) => {
                format!("serial logging stopped (job_id={})", summary.info.job_id)
            }
            Self::NotRunning => "serial logger not running".to_string(),
        }
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped(_))
    }
}
