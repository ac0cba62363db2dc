use crate::models::error::CaptureError;
use crate::models::session_info::SessionSummary;
use crate::models::state::CaptureState;
use crate::processing::line_framer::CapturedLine;

/// Event delegate for capture session notifications.
///
/// `on_line_captured` and loop-originated `on_error` calls come from the
/// capture thread; the rest come from whichever thread called `start` or
/// `stop`. Implementations must not call back into the session manager.
pub trait CaptureDelegate: Send + Sync {
    /// Called when the session state changes.
    fn on_state_changed(&self, state: &CaptureState);

    /// Called after a line has been written to both sinks.
    fn on_line_captured(&self, _job_id: &str, _line: &CapturedLine) {}

    /// Called when an error occurs during capture.
    fn on_error(&self, error: &CaptureError);

    /// Called when a session is stopped and its sinks are closed.
    fn on_session_finished(&self, summary: &SessionSummary);
}
