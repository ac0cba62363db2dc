use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use crate::models::config::CaptureConfiguration;
use crate::models::error::CaptureError;
use crate::models::session_info::{SessionInfo, SessionSummary, StartOutcome, StopOutcome};
use crate::models::state::{CaptureState, CaptureStatus};
use crate::processing::line_framer::{CapturedLine, LineFramer};
use crate::storage::naming::{validate_job_id, SinkPaths};
use crate::storage::sink_writer::{sha256_file, CaptureSinks};
use crate::traits::capture_delegate::CaptureDelegate;
use crate::traits::serial_transport::{SerialTransport, TransportOpener};

const READ_CHUNK_SIZE: usize = 1024;
const LIFECYCLE_POLL: Duration = Duration::from_millis(10);
/// Part of `stop_timeout` kept back for closing handles after the ack wait.
const RELEASE_GRACE: Duration = Duration::from_millis(100);

type Slot<T> = Arc<Mutex<Option<T>>>;

/// The serial handle and both sinks of one session.
///
/// Each lives in its own slot, shared by the capture loop and `stop`. The
/// loop only locks a slot for a single read or a single line write, so
/// `stop` can take whichever one the loop is not using. Whoever takes a
/// value out of its slot closes it.
struct SessionResources<T: SerialTransport> {
    transport: Slot<T>,
    sinks: Slot<CaptureSinks>,
}

impl<T: SerialTransport> SessionResources<T> {
    fn new(transport: T, sinks: CaptureSinks) -> Self {
        Self {
            transport: Arc::new(Mutex::new(Some(transport))),
            sinks: Arc::new(Mutex::new(Some(sinks))),
        }
    }

    /// Close whatever is still open, waiting as long as it takes.
    fn release(&self) -> Result<(), CaptureError> {
        let transport = match self.transport.lock().take() {
            Some(mut transport) => transport.close(),
            None => Ok(()),
        };
        let sinks = match self.sinks.lock().take() {
            Some(mut sinks) => sinks.close(),
            None => Ok(()),
        };
        transport.and(sinks)
    }
}

impl<T: SerialTransport> Clone for SessionResources<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            sinks: Arc::clone(&self.sinks),
        }
    }
}

/// Bookkeeping for the session currently holding the port.
struct ActiveSession<T: SerialTransport> {
    info: SessionInfo,
    resources: SessionResources<T>,
    stop_requested: Arc<AtomicBool>,
    lines_captured: Arc<AtomicU64>,
    loop_done: Receiver<()>,
    loop_handle: Option<thread::JoinHandle<()>>,
}

type Lifecycle<T> = Arc<Mutex<Option<ActiveSession<T>>>>;

/// State visible to `status()` and to the capture thread.
struct SharedState {
    state: RwLock<CaptureState>,
    delegate: RwLock<Option<Arc<dyn CaptureDelegate>>>,
}

impl SharedState {
    fn set_state(&self, new_state: CaptureState) {
        *self.state.write() = new_state.clone();
        if let Some(delegate) = self.delegate() {
            delegate.on_state_changed(&new_state);
        }
    }

    fn delegate(&self) -> Option<Arc<dyn CaptureDelegate>> {
        self.delegate.read().clone()
    }

    fn report_error(&self, error: &CaptureError) {
        if let Some(delegate) = self.delegate() {
            delegate.on_error(error);
        }
    }
}

/// Owns at most one serial capture at a time.
///
/// Construct one per process and share it (e.g. in an `Arc`) with every
/// request handler. `start` and `stop` are serialized by an internal lock;
/// `status` only reads a snapshot and never waits on a transition.
///
/// ```text
/// [TransportOpener] → [SerialTransport] → capture thread → [LineFramer] → [CaptureSinks]
///                                              ↑                                ↓
///                                    stop flag / ack channel         text.log + vars.csv
/// ```
pub struct SessionManager<O: TransportOpener> {
    opener: O,
    config: CaptureConfiguration,
    lifecycle: Lifecycle<O::Transport>,
    shared: Arc<SharedState>,
}

impl<O: TransportOpener> SessionManager<O> {
    pub fn new(opener: O, config: CaptureConfiguration) -> Result<Self, CaptureError> {
        config.validate().map_err(CaptureError::ConfigurationFailed)?;
        Ok(Self {
            opener,
            config,
            lifecycle: Arc::new(Mutex::new(None)),
            shared: Arc::new(SharedState {
                state: RwLock::new(CaptureState::Idle),
                delegate: RwLock::new(None),
            }),
        })
    }

    pub fn set_delegate(&self, delegate: Arc<dyn CaptureDelegate>) {
        *self.shared.delegate.write() = Some(delegate);
    }

    pub fn config(&self) -> &CaptureConfiguration {
        &self.config
    }

    pub fn opener(&self) -> &O {
        &self.opener
    }

    pub fn state(&self) -> CaptureState {
        self.shared.state.read().clone()
    }

    /// `{running, job_id}` snapshot.
    pub fn status(&self) -> CaptureStatus {
        CaptureStatus::from(&*self.shared.state.read())
    }

    /// Details of the session holding the port, if any.
    pub fn current_session(&self) -> Option<SessionInfo> {
        self.lifecycle.lock().as_ref().map(|active| active.info.clone())
    }

    /// Start capturing `job_id` from `port` at `baud_rate`, falling back to
    /// the configured defaults.
    ///
    /// Returns `AlreadyRunning` without touching anything if a session is
    /// active. On error nothing is left open and the manager stays idle.
    pub fn start(
        &self,
        job_id: &str,
        port: Option<&str>,
        baud_rate: Option<u32>,
    ) -> Result<StartOutcome, CaptureError> {
        let mut lifecycle = self.lifecycle.lock();
        if let Some(active) = lifecycle.as_ref() {
            log::info!(
                "start({}) ignored: logger already running for job_id={}",
                job_id,
                active.info.job_id
            );
            return Ok(StartOutcome::AlreadyRunning {
                job_id: active.info.job_id.clone(),
            });
        }

        validate_job_id(job_id)?;
        let port = self.resolve_port(port)?;
        let baud_rate = baud_rate.unwrap_or(self.config.default_baud_rate);
        if baud_rate == 0 {
            return Err(CaptureError::ConfigurationFailed("baud rate must be positive".into()));
        }

        let started_at = Utc::now();
        let paths = SinkPaths::derive(&self.config.log_directory, job_id, started_at);

        let mut transport = self.opener.open(&port, baud_rate, self.config.read_timeout)?;
        let sinks = match CaptureSinks::open(&paths) {
            Ok(sinks) => sinks,
            Err(e) => {
                if let Err(close_err) = transport.close() {
                    log::warn!("failed to close {} after sink error: {}", port, close_err);
                }
                log::error!("start({}) failed: {}", job_id, e);
                return Err(e);
            }
        };

        let info = SessionInfo::new(job_id, &port, baud_rate, started_at, paths);
        let resources = SessionResources::new(transport, sinks);
        let stop_requested = Arc::new(AtomicBool::new(false));
        let lines_captured = Arc::new(AtomicU64::new(0));
        let (done_tx, done_rx) = mpsc::sync_channel(1);

        let ctx = LoopContext {
            info: info.clone(),
            resources: resources.clone(),
            stop_requested: Arc::clone(&stop_requested),
            lines_captured: Arc::clone(&lines_captured),
            done: done_tx,
            shared: Arc::clone(&self.shared),
            lifecycle: Arc::clone(&self.lifecycle),
            retry_backoff: self.config.retry_backoff,
        };

        // Publish Running before the loop exists so a fast device fault
        // cannot be overwritten by a late Running.
        self.shared.set_state(CaptureState::Running {
            job_id: info.job_id.clone(),
        });

        let spawned = thread::Builder::new()
            .name("serial-capture".into())
            .spawn(move || run_capture_loop(ctx));

        let loop_handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                let _ = resources.release();
                self.shared.set_state(CaptureState::Idle);
                return Err(CaptureError::Unknown(format!(
                    "failed to spawn capture thread: {}",
                    e
                )));
            }
        };

        log::info!(
            "serial logging started (job_id={}, port={}, baud={}) -> {}",
            info.job_id,
            info.port,
            info.baud_rate,
            info.text_sink_path.display()
        );

        *lifecycle = Some(ActiveSession {
            info: info.clone(),
            resources,
            stop_requested,
            lines_captured,
            loop_done: done_rx,
            loop_handle: Some(loop_handle),
        });

        Ok(StartOutcome::Started(info))
    }

    /// Stop the running session, if any.
    ///
    /// Gives the capture loop most of `stop_timeout` to acknowledge, then
    /// closes the port and sinks itself. The whole call is bounded by
    /// `stop_timeout`. If the loop is stuck inside a read or a write past
    /// that bound, the session stays in `Stopping`, `start` keeps refusing,
    /// and a `Timeout` error is returned; calling `stop` again retries.
    pub fn stop(&self) -> Result<StopOutcome, CaptureError> {
        let mut lifecycle = self.lifecycle.lock();
        let Some(mut active) = lifecycle.take() else {
            return Ok(StopOutcome::NotRunning);
        };

        let job_id = active.info.job_id.clone();
        let deadline = Instant::now() + self.config.stop_timeout;
        self.shared.set_state(CaptureState::Stopping {
            job_id: job_id.clone(),
        });

        active.stop_requested.store(true, Ordering::SeqCst);
        let grace = RELEASE_GRACE.min(self.config.stop_timeout / 2);
        let acknowledged = match active.loop_done.recv_timeout(self.config.stop_timeout - grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        };

        if acknowledged {
            if let Some(handle) = active.loop_handle.take() {
                if handle.join().is_err() {
                    log::error!("capture thread for job_id={} panicked", job_id);
                }
            }
        } else {
            log::warn!(
                "capture loop for job_id={} did not stop within {:?}; forcing release",
                job_id,
                self.config.stop_timeout
            );
        }

        let held = self.force_release(&active.resources, deadline, &job_id);
        if !held.is_empty() {
            let e = CaptureError::Timeout(format!(
                "capture thread for job_id={} still holds the {}; stop again to retry",
                job_id,
                held.join(" and ")
            ));
            log::error!("{}", e);
            self.shared.report_error(&e);
            *lifecycle = Some(active);
            return Err(e);
        }

        let summary = summarize(&active.info, active.lines_captured.load(Ordering::SeqCst), acknowledged);

        self.shared.set_state(CaptureState::Stopped {
            job_id: job_id.clone(),
        });
        if let Some(delegate) = self.shared.delegate() {
            delegate.on_session_finished(&summary);
        }
        self.shared.set_state(CaptureState::Idle);
        drop(lifecycle);

        log::info!(
            "serial logging stopped (job_id={}, lines={})",
            job_id,
            summary.lines_captured
        );
        Ok(StopOutcome::Stopped(summary))
    }

    fn resolve_port(&self, requested: Option<&str>) -> Result<String, CaptureError> {
        requested
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .or(self.config.default_port.as_deref())
            .map(str::to_string)
            .ok_or_else(|| {
                CaptureError::ConfigurationFailed(
                    "no serial port given and no default port configured".into(),
                )
            })
    }

    /// Close the port and sinks unless the loop holds them past `deadline`.
    /// Returns what could not be closed.
    fn force_release(
        &self,
        resources: &SessionResources<O::Transport>,
        deadline: Instant,
        job_id: &str,
    ) -> Vec<&'static str> {
        let mut held = Vec::new();

        match resources.transport.try_lock_until(deadline) {
            Some(mut slot) => {
                if let Some(mut transport) = slot.take() {
                    if let Err(e) = transport.close() {
                        log::error!("error closing port for job_id={}: {}", job_id, e);
                        self.shared.report_error(&e);
                    }
                }
            }
            None => held.push("serial port"),
        }

        match resources.sinks.try_lock_until(deadline) {
            Some(mut slot) => {
                if let Some(mut sinks) = slot.take() {
                    if let Err(e) = sinks.close() {
                        log::error!("error closing sinks for job_id={}: {}", job_id, e);
                        self.shared.report_error(&e);
                    }
                }
            }
            None => held.push("sink files"),
        }

        held
    }
}

impl<O: TransportOpener> Drop for SessionManager<O> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("failed to stop capture on shutdown: {}", e);
        }
    }
}

fn summarize(info: &SessionInfo, lines_captured: u64, acknowledged: bool) -> SessionSummary {
    SessionSummary {
        info: info.clone(),
        stopped_at: Utc::now(),
        lines_captured,
        acknowledged,
        text_checksum: checksum_or_log(&info.text_sink_path),
        vars_checksum: checksum_or_log(&info.vars_sink_path),
    }
}

fn checksum_or_log(path: &Path) -> Option<String> {
    match sha256_file(path) {
        Ok(checksum) => Some(checksum),
        Err(e) => {
            log::warn!("{}", e);
            None
        }
    }
}

/// Everything the capture thread needs, moved into it at spawn.
struct LoopContext<T: SerialTransport> {
    info: SessionInfo,
    resources: SessionResources<T>,
    stop_requested: Arc<AtomicBool>,
    lines_captured: Arc<AtomicU64>,
    done: SyncSender<()>,
    shared: Arc<SharedState>,
    lifecycle: Lifecycle<T>,
    retry_backoff: Duration,
}

impl<T: SerialTransport> LoopContext<T> {
    fn release(&self) {
        if let Err(e) = self.resources.release() {
            log::error!("job_id={}: error releasing resources: {}", self.info.job_id, e);
            self.shared.report_error(&e);
        }
    }
}

enum LoopExit {
    StopRequested,
    /// `stop` already took the port or the sinks.
    Released,
    Fault(CaptureError),
}

/// Tears the session down if the capture thread unwinds.
struct PanicGuard<'a, T: SerialTransport> {
    ctx: &'a LoopContext<T>,
}

impl<T: SerialTransport> Drop for PanicGuard<'_, T> {
    fn drop(&mut self) {
        if !thread::panicking() {
            return;
        }
        let ctx = self.ctx;
        log::error!("capture thread for job_id={} panicked", ctx.info.job_id);
        let _ = ctx.resources.release();
        retire_session(ctx);
    }
}

fn run_capture_loop<T: SerialTransport>(ctx: LoopContext<T>) {
    let _guard = PanicGuard { ctx: &ctx };
    let job_id = ctx.info.job_id.as_str();
    let delegate = ctx.shared.delegate();
    let mut framer = LineFramer::new();
    let mut buf = [0u8; READ_CHUNK_SIZE];

    let exit = 'capture: loop {
        if ctx.stop_requested.load(Ordering::SeqCst) {
            break LoopExit::StopRequested;
        }

        let read = {
            let mut slot = ctx.resources.transport.lock();
            let Some(transport) = slot.as_mut() else {
                break LoopExit::Released;
            };
            transport.read_available(&mut buf)
        };

        let fault = match read {
            Ok(0) => None,
            Ok(n) => {
                let mut write_fault = None;
                for text in framer.push(&buf[..n]) {
                    let line = CapturedLine::now(text);
                    let written = {
                        let mut slot = ctx.resources.sinks.lock();
                        let Some(sinks) = slot.as_mut() else {
                            break 'capture LoopExit::Released;
                        };
                        sinks.write(&line)
                    };
                    match written {
                        Ok(()) => {
                            ctx.lines_captured.fetch_add(1, Ordering::SeqCst);
                            if let Some(d) = &delegate {
                                d.on_line_captured(job_id, &line);
                            }
                        }
                        Err(e) => {
                            log::warn!("job_id={}: {}", job_id, e);
                            write_fault = Some(e);
                        }
                    }
                }
                write_fault
            }
            Err(e) => Some(e),
        };

        match fault {
            None => {}
            Some(e) if e.is_transient() => {
                log::debug!("job_id={}: transient fault, retrying: {}", job_id, e);
                ctx.shared.report_error(&e);
                thread::sleep(ctx.retry_backoff);
            }
            Some(e) => break LoopExit::Fault(e),
        }
    };

    match exit {
        LoopExit::StopRequested => {
            if let Some(text) = framer.finish() {
                let line = CapturedLine::now(text);
                if let Some(sinks) = ctx.resources.sinks.lock().as_mut() {
                    match sinks.write(&line) {
                        Ok(()) => {
                            ctx.lines_captured.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(e) => log::warn!("job_id={}: lost trailing partial line: {}", job_id, e),
                    }
                }
            }
            ctx.release();
        }
        LoopExit::Released => ctx.release(),
        LoopExit::Fault(error) => {
            log::error!("job_id={}: capture ended by fault: {}", job_id, error);
            ctx.shared.report_error(&error);
            ctx.release();
        }
    }
    let _ = ctx.done.try_send(());
    retire_session(&ctx);
}

/// Return the manager to idle once the loop has released everything.
///
/// Covers a loop that gave up on its own and a `stop` that timed out and
/// left the session in place. A `stop` in progress owns the teardown, and
/// a newer session in the slot is left alone.
fn retire_session<T: SerialTransport>(ctx: &LoopContext<T>) {
    let mut lifecycle = loop {
        if let Some(guard) = ctx.lifecycle.try_lock_for(LIFECYCLE_POLL) {
            break guard;
        }
        // `stop` holds the lock and may be joining this thread.
        if ctx.stop_requested.load(Ordering::SeqCst) {
            return;
        }
    };
    let ours = lifecycle
        .as_ref()
        .is_some_and(|active| active.info.session_id == ctx.info.session_id);
    if !ours {
        return;
    }
    // Dropping our own JoinHandle just detaches this thread.
    let _ = lifecycle.take();

    let summary = summarize(&ctx.info, ctx.lines_captured.load(Ordering::SeqCst), true);
    if let Some(delegate) = ctx.shared.delegate() {
        delegate.on_session_finished(&summary);
    }
    ctx.shared.set_state(CaptureState::Idle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockOpener;
    use std::fs;
    use std::time::Instant;

    fn config_in(dir: &Path) -> CaptureConfiguration {
        CaptureConfiguration {
            default_port: Some("MOCK".into()),
            default_baud_rate: 9600,
            log_directory: dir.to_path_buf(),
            read_timeout: Duration::from_millis(20),
            retry_backoff: Duration::from_millis(5),
            stop_timeout: Duration::from_secs(2),
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        cond()
    }

    #[derive(Default)]
    struct RecordingDelegate {
        states: Mutex<Vec<String>>,
        lines: Mutex<Vec<String>>,
        errors: Mutex<Vec<CaptureError>>,
        finished: Mutex<Vec<SessionSummary>>,
    }

    impl CaptureDelegate for RecordingDelegate {
        fn on_state_changed(&self, state: &CaptureState) {
            self.states.lock().push(state.name().to_string());
        }

        fn on_line_captured(&self, _job_id: &str, line: &CapturedLine) {
            self.lines.lock().push(line.text.clone());
        }

        fn on_error(&self, error: &CaptureError) {
            self.errors.lock().push(error.clone());
        }

        fn on_session_finished(&self, summary: &SessionSummary) {
            self.finished.lock().push(summary.clone());
        }
    }

    #[test]
    fn rejects_invalid_config() {
        let config = CaptureConfiguration {
            default_baud_rate: 0,
            ..Default::default()
        };
        assert!(matches!(
            SessionManager::new(MockOpener::new(), config),
            Err(CaptureError::ConfigurationFailed(_))
        ));
    }

    #[test]
    fn start_uses_configured_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(MockOpener::new(), config_in(dir.path())).unwrap();
        let handle = manager.opener().handle();

        let outcome = manager.start("defaults", None, None).unwrap();
        assert!(outcome.is_started());
        assert_eq!(handle.opened_with(), Some(("MOCK".to_string(), 9600)));
        assert_eq!(manager.current_session().unwrap().job_id, "defaults");

        manager.stop().unwrap();
        assert!(manager.current_session().is_none());
    }

    #[test]
    fn start_without_any_port_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = CaptureConfiguration {
            default_port: None,
            ..config_in(dir.path())
        };
        let manager = SessionManager::new(MockOpener::new(), config).unwrap();
        let handle = manager.opener().handle();

        let err = manager.start("run1", None, None).unwrap_err();
        assert!(matches!(err, CaptureError::ConfigurationFailed(_)));
        assert_eq!(handle.open_count(), 0);
        assert!(!manager.status().running);
    }

    #[test]
    fn port_open_failure_leaves_idle_without_files() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(MockOpener::new(), config_in(dir.path())).unwrap();
        manager.opener().fail_next_open(CaptureError::PortOpenFailed {
            port: "MOCK".into(),
            reason: "no such device".into(),
        });

        assert!(matches!(
            manager.start("run1", None, None),
            Err(CaptureError::PortOpenFailed { .. })
        ));
        assert_eq!(manager.state(), CaptureState::Idle);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn blank_job_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(MockOpener::new(), config_in(dir.path())).unwrap();
        assert!(manager.start("   ", None, None).is_err());
        assert_eq!(manager.opener().handle().open_count(), 0);
    }

    #[test]
    fn delegate_sees_full_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(MockOpener::new(), config_in(dir.path())).unwrap();
        let delegate = Arc::new(RecordingDelegate::default());
        manager.set_delegate(delegate.clone());
        let handle = manager.opener().handle();

        manager.start("run1", None, None).unwrap();
        handle.feed_line("HELLO");
        assert!(wait_until(|| delegate.lines.lock().len() == 1));
        manager.stop().unwrap();

        assert_eq!(
            *delegate.states.lock(),
            vec!["running", "stopping", "stopped", "idle"]
        );
        let finished = delegate.finished.lock();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].lines_captured, 1);
        assert!(finished[0].acknowledged);
        assert!(finished[0].text_checksum.is_some());
    }

    #[test]
    fn transient_read_errors_keep_session_running() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(MockOpener::new(), config_in(dir.path())).unwrap();
        let delegate = Arc::new(RecordingDelegate::default());
        manager.set_delegate(delegate.clone());
        let handle = manager.opener().handle();

        manager.start("flaky", None, None).unwrap();
        handle.inject_error(CaptureError::Transient("framing error".into()));
        handle.feed_line("AFTER=1");

        assert!(wait_until(|| delegate.lines.lock().len() == 1));
        assert!(manager.status().running);
        assert_eq!(delegate.errors.lock().len(), 1);

        manager.stop().unwrap();
    }

    #[test]
    fn device_loss_ends_session() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(MockOpener::new(), config_in(dir.path())).unwrap();
        let delegate = Arc::new(RecordingDelegate::default());
        manager.set_delegate(delegate.clone());
        let handle = manager.opener().handle();

        manager.start("unplugged", None, None).unwrap();
        handle.inject_error(CaptureError::DeviceNotAvailable("MOCK".into()));

        assert!(wait_until(|| !manager.status().running));
        assert!(wait_until(|| manager.current_session().is_none()));
        assert!(!handle.is_open());
        assert_eq!(delegate.finished.lock().len(), 1);
        assert_eq!(manager.stop().unwrap(), StopOutcome::NotRunning);

        // The manager is usable again.
        assert!(manager.start("replugged", None, None).unwrap().is_started());
        manager.stop().unwrap();
    }

    #[test]
    fn partial_line_is_flushed_on_stop() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(MockOpener::new(), config_in(dir.path())).unwrap();
        let handle = manager.opener().handle();

        let StartOutcome::Started(info) = manager.start("tail", None, None).unwrap() else {
            panic!("expected a new session");
        };
        handle.feed_bytes(b"DONE=1\nPARTI");
        assert!(wait_until(|| handle.pending_reads() == 0));
        // Give the loop time to write the complete line.
        thread::sleep(Duration::from_millis(100));

        let StopOutcome::Stopped(summary) = manager.stop().unwrap() else {
            panic!("expected a stopped session");
        };
        assert_eq!(summary.lines_captured, 2);
        let text = fs::read_to_string(&info.text_sink_path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("] DONE=1"));
        assert!(lines[1].ends_with("] PARTI"));
    }

    #[test]
    fn drop_releases_running_session() {
        let dir = tempfile::tempdir().unwrap();
        let opener = MockOpener::new();
        let handle = opener.handle();
        {
            let manager = SessionManager::new(opener, config_in(dir.path())).unwrap();
            manager.start("dropped", None, None).unwrap();
            assert!(handle.is_open());
        }
        assert!(!handle.is_open());
    }

    /// Blocks inside the first `on_line_captured` for `stall`.
    struct StallingDelegate {
        stall: Duration,
        stalled: AtomicBool,
        resumed: AtomicBool,
    }

    impl StallingDelegate {
        fn new(stall: Duration) -> Arc<Self> {
            Arc::new(Self {
                stall,
                stalled: AtomicBool::new(false),
                resumed: AtomicBool::new(false),
            })
        }
    }

    impl CaptureDelegate for StallingDelegate {
        fn on_state_changed(&self, _state: &CaptureState) {}

        fn on_line_captured(&self, _job_id: &str, _line: &CapturedLine) {
            if !self.stalled.swap(true, Ordering::SeqCst) {
                thread::sleep(self.stall);
                self.resumed.store(true, Ordering::SeqCst);
            }
        }

        fn on_error(&self, _error: &CaptureError) {}

        fn on_session_finished(&self, _summary: &SessionSummary) {}
    }

    #[test]
    fn stop_closes_handles_when_loop_is_unresponsive() {
        let dir = tempfile::tempdir().unwrap();
        let stop_timeout = Duration::from_millis(300);
        let config = CaptureConfiguration {
            stop_timeout,
            ..config_in(dir.path())
        };
        let manager = SessionManager::new(MockOpener::new(), config).unwrap();
        let delegate = StallingDelegate::new(Duration::from_secs(1));
        manager.set_delegate(delegate.clone());
        let handle = manager.opener().handle();

        let StartOutcome::Started(stuck) = manager.start("stuck", None, None).unwrap() else {
            panic!("expected a new session");
        };
        handle.feed_line("X=1");
        assert!(wait_until(|| delegate.stalled.load(Ordering::SeqCst)));

        let began = Instant::now();
        let StopOutcome::Stopped(summary) = manager.stop().unwrap() else {
            panic!("expected a stopped session");
        };
        assert!(began.elapsed() < stop_timeout + Duration::from_millis(200));
        assert!(!summary.acknowledged);
        assert!(summary.text_checksum.is_some());
        assert!(!handle.is_open());
        assert_eq!(manager.status(), CaptureStatus::default());
        assert!(manager.current_session().is_none());

        // The stalled thread must not touch the next session.
        let StartOutcome::Started(next) = manager.start("next", None, None).unwrap() else {
            panic!("expected a new session");
        };
        assert!(wait_until(|| delegate.resumed.load(Ordering::SeqCst)));
        handle.feed_line("Y=2");
        assert!(wait_until(|| fs::read_to_string(&next.text_sink_path)
            .unwrap_or_default()
            .contains("Y=2")));
        assert!(manager.status().running);
        manager.stop().unwrap();

        let old = fs::read_to_string(&stuck.text_sink_path).unwrap();
        assert_eq!(old.lines().count(), 1);
        assert!(old.contains("X=1"));
        assert!(!handle.is_open());
    }
}
