use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::error::CaptureError;

/// `strftime` pattern for the timestamp embedded in sink file names.
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

pub const TEXT_SINK_SUFFIX: &str = "_text.log";
pub const VARS_SINK_SUFFIX: &str = "_vars.csv";

/// The pair of sink files belonging to one session.
///
/// Named `{job_id}_{YYYYMMDD_HHMMSS}_text.log` and
/// `{job_id}_{YYYYMMDD_HHMMSS}_vars.csv` inside the log directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkPaths {
    pub text: PathBuf,
    pub vars: PathBuf,
}

impl SinkPaths {
    pub fn derive(log_directory: &Path, job_id: &str, started_at: DateTime<Utc>) -> Self {
        let base = base_name(job_id, started_at);
        Self {
            text: log_directory.join(format!("{}{}", base, TEXT_SINK_SUFFIX)),
            vars: log_directory.join(format!("{}{}", base, VARS_SINK_SUFFIX)),
        }
    }
}

/// `{job_id}_{YYYYMMDD_HHMMSS}` with path separators in the job id replaced.
pub fn base_name(job_id: &str, started_at: DateTime<Utc>) -> String {
    format!(
        "{}_{}",
        file_safe_job_id(job_id),
        started_at.format(FILE_TIMESTAMP_FORMAT)
    )
}

/// Reject job ids that cannot name a file at all.
pub fn validate_job_id(job_id: &str) -> Result<(), CaptureError> {
    if job_id.trim().is_empty() {
        return Err(CaptureError::ConfigurationFailed("job_id must not be empty".into()));
    }
    Ok(())
}

fn file_safe_job_id(job_id: &str) -> String {
    let replaced: String = job_id
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();
    // "." and ".." would resolve to a directory once joined.
    if replaced.chars().all(|c| c == '.') {
        replaced.replace('.', "_")
    } else {
        replaced
    }
}
