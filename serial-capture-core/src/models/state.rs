use serde::{Deserialize, Serialize};

/// Capture session state machine.
///
/// State transitions:
/// ```text
/// idle ──start──→ running ──stop──→ stopping → stopped → idle
///                    │
///                    └──device lost──────────────────→ idle
/// ```
///
/// `Stopped` is reported to delegates and immediately reset to `Idle`. A
/// `stop` that cannot release the port in time leaves the session in
/// `Stopping` until the capture thread lets go of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Running { job_id: String },
    Stopping { job_id: String },
    Stopped { job_id: String },
}

impl CaptureState {
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::Idle => None,
            Self::Running { job_id } | Self::Stopping { job_id } | Self::Stopped { job_id } => {
                Some(job_id)
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running { .. } => "running",
            Self::Stopping { .. } => "stopping",
            Self::Stopped { .. } => "stopped",
        }
    }
}

/// Point-in-time view returned by `status()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureStatus {
    pub running: bool,
    pub job_id: Option<String>,
}

impl From<&CaptureState> for CaptureStatus {
    fn from(state: &CaptureState) -> Self {
        match state {
            // A stopping session still holds the port until it is released.
            CaptureState::Running { job_id } | CaptureState::Stopping { job_id } => Self {
                running: true,
                job_id: Some(job_id.clone()),
            },
            CaptureState::Idle | CaptureState::Stopped { .. } => Self::default(),
        }
    }
}
