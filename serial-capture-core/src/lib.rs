//! # serial-capture-core
//!
//! Transport-agnostic serial capture core library.
//!
//! Provides the capture session manager, line framing, and the append-only
//! text/CSV sinks a session writes to. Serial backends implement the
//! `TransportOpener` / `SerialTransport` traits and plug into the generic
//! `SessionManager`.
//!
//! ## Architecture
//!
//! ```text
//! serial-capture-core (this crate)
//! ├── traits/       ← SerialTransport, TransportOpener, CaptureDelegate
//! ├── models/       ← CaptureError, CaptureState, CaptureConfiguration, SessionInfo, etc.
//! ├── processing/   ← LineFramer, CapturedLine
//! ├── session/      ← SessionManager (one capture at a time)
//! ├── storage/      ← SinkWriter, CaptureSinks, sink file naming
//! └── mock          ← MockOpener / MockTransport
//! ```

pub mod mock;
pub mod models;
pub mod processing;
pub mod session;
pub mod storage;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use models::config::CaptureConfiguration;
pub use models::error::CaptureError;
pub use models::session_info::{SessionInfo, SessionSummary, StartOutcome, StopOutcome};
pub use models::state::{CaptureState, CaptureStatus};
pub use processing::line_framer::{CapturedLine, LineFramer};
pub use session::manager::SessionManager;
pub use storage::naming::SinkPaths;
pub use storage::sink_writer::{CaptureSinks, SinkWriter};
pub use traits::capture_delegate::CaptureDelegate;
pub use traits::serial_transport::{SerialTransport, TransportOpener};
