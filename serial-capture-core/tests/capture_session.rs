use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serial_capture_core::mock::{MockOpener, MockPortHandle};
use serial_capture_core::{
    CaptureConfiguration, CaptureError, CaptureStatus, SessionManager, StartOutcome, StopOutcome,
};

fn config_in(dir: &Path) -> CaptureConfiguration {
    CaptureConfiguration {
        default_port: Some("MOCK".into()),
        default_baud_rate: 115_200,
        log_directory: dir.to_path_buf(),
        read_timeout: Duration::from_millis(20),
        retry_backoff: Duration::from_millis(5),
        stop_timeout: Duration::from_secs(2),
    }
}

fn manager_in(dir: &Path) -> (SessionManager<MockOpener>, MockPortHandle) {
    let manager = SessionManager::new(MockOpener::new(), config_in(dir)).unwrap();
    let handle = manager.opener().handle();
    (manager, handle)
}

fn wait_for_lines(path: &Path, count: usize) -> Vec<String> {
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        let lines: Vec<String> = fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect();
        if lines.len() >= count || Instant::now() > deadline {
            return lines;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

fn started(outcome: StartOutcome) -> serial_capture_core::SessionInfo {
    match outcome {
        StartOutcome::Started(info) => info,
        other => panic!("expected a new session, got {:?}", other),
    }
}

#[test]
fn second_start_does_not_replace_running_session() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, handle) = manager_in(dir.path());

    started(manager.start("first", None, None).unwrap());
    let again = manager.start("second", Some("OTHER"), Some(9600)).unwrap();

    assert_eq!(again, StartOutcome::AlreadyRunning { job_id: "first".into() });
    assert_eq!(again.message(), "logger already running for job_id=first");
    assert_eq!(handle.open_count(), 1);
    assert_eq!(manager.status().job_id.as_deref(), Some("first"));
    // Only one pair of sink files exists.
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);

    manager.stop().unwrap();
}

#[test]
fn stop_twice_is_harmless() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, handle) = manager_in(dir.path());

    started(manager.start("twice", None, None).unwrap());
    assert!(manager.stop().unwrap().is_stopped());

    let second = manager.stop().unwrap();
    assert_eq!(second, StopOutcome::NotRunning);
    assert_eq!(second.message(), "serial logger not running");
    assert_eq!(handle.close_count(), 1);
}

#[test]
fn stop_while_idle_is_informational() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, _handle) = manager_in(dir.path());
    assert_eq!(manager.stop().unwrap(), StopOutcome::NotRunning);
}

#[test]
fn sink_failure_releases_port() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocked");
    fs::write(&blocker, "a file where the log directory should be").unwrap();

    let config = CaptureConfiguration {
        log_directory: blocker.join("logs"),
        ..config_in(dir.path())
    };
    let manager = SessionManager::new(MockOpener::new(), config).unwrap();
    let handle = manager.opener().handle();

    let err = manager.start("doomed", None, None).unwrap_err();
    assert!(matches!(err, CaptureError::StorageError(_)));
    assert_eq!(handle.open_count(), 1);
    assert!(!handle.is_open());
    assert_eq!(handle.close_count(), 1);
    assert!(!manager.status().running);
    assert_eq!(manager.stop().unwrap(), StopOutcome::NotRunning);
}

#[test]
fn lines_are_written_in_order_and_blank_lines_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, handle) = manager_in(dir.path());

    let info = started(manager.start("ordered", None, None).unwrap());
    for line in ["A=1", "B=2", "", "C=3"] {
        handle.feed_line(line);
    }

    let text = wait_for_lines(&info.text_sink_path, 3);
    let vars = wait_for_lines(&info.vars_sink_path, 4);
    manager.stop().unwrap();

    let text_payloads: Vec<&str> = text
        .iter()
        .map(|l| l.split_once("] ").unwrap().1)
        .collect();
    assert_eq!(text_payloads, vec!["A=1", "B=2", "C=3"]);
    assert!(text.iter().all(|l| l.starts_with('[')));

    assert_eq!(vars[0], "ts_utc,line");
    let var_payloads: Vec<&str> = vars[1..]
        .iter()
        .map(|l| l.split_once(',').unwrap().1)
        .collect();
    assert_eq!(var_payloads, vec!["A=1", "B=2", "C=3"]);

    // Both sinks carry the same timestamp for a given line.
    for (t, v) in text.iter().zip(&vars[1..]) {
        let ts_text = &t[1..t.find(']').unwrap()];
        let ts_vars = v.split_once(',').unwrap().0;
        assert_eq!(ts_text, ts_vars);
    }
}

#[test]
fn restarting_same_job_does_not_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, handle) = manager_in(dir.path());

    let first = started(manager.start("repeat", None, None).unwrap());
    handle.feed_line("FIRST=1");
    wait_for_lines(&first.text_sink_path, 1);
    manager.stop().unwrap();

    // File names carry one-second resolution.
    thread::sleep(Duration::from_millis(1100));

    let second = started(manager.start("repeat", None, None).unwrap());
    handle.feed_line("SECOND=2");
    wait_for_lines(&second.text_sink_path, 1);
    manager.stop().unwrap();

    assert_ne!(first.text_sink_path, second.text_sink_path);
    assert_ne!(first.vars_sink_path, second.vars_sink_path);
    assert!(fs::read_to_string(&first.text_sink_path).unwrap().contains("FIRST=1"));
    assert!(!fs::read_to_string(&first.text_sink_path).unwrap().contains("SECOND=2"));
    assert!(fs::read_to_string(&second.text_sink_path).unwrap().contains("SECOND=2"));
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 4);
}

#[test]
fn status_is_pure() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, _handle) = manager_in(dir.path());

    for _ in 0..5 {
        assert_eq!(manager.status(), CaptureStatus::default());
    }

    started(manager.start("steady", None, None).unwrap());
    let snapshot = manager.status();
    for _ in 0..5 {
        assert_eq!(manager.status(), snapshot);
    }
    assert!(snapshot.running);
    assert_eq!(snapshot.job_id.as_deref(), Some("steady"));

    manager.stop().unwrap();
}

#[test]
fn end_to_end_capture() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, handle) = manager_in(dir.path());

    let outcome = manager.start("run1", Some("MOCK"), Some(9600)).unwrap();
    assert!(outcome.message().contains("run1"));
    assert_eq!(handle.opened_with(), Some(("MOCK".to_string(), 9600)));
    let info = started(outcome);

    handle.feed_line("TEMP=23.5");
    let text = wait_for_lines(&info.text_sink_path, 1);
    let vars = wait_for_lines(&info.vars_sink_path, 2);

    assert!(text[0].starts_with('['));
    assert!(text[0].ends_with("] TEMP=23.5"));
    assert!(vars[1].ends_with(",TEMP=23.5"));

    let stopped = manager.stop().unwrap();
    assert!(stopped.message().contains("run1"));
    assert_eq!(manager.status(), CaptureStatus { running: false, job_id: None });
    assert!(!handle.is_open());
}

#[test]
fn concurrent_starts_bring_up_one_session() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, handle) = manager_in(dir.path());
    let manager = Arc::new(manager);

    let workers: Vec<_> = (0..8)
        .map(|i| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || manager.start(&format!("job{}", i), None, None).unwrap())
        })
        .collect();
    let outcomes: Vec<StartOutcome> = workers.into_iter().map(|w| w.join().unwrap()).collect();

    let started_count = outcomes.iter().filter(|o| o.is_started()).count();
    assert_eq!(started_count, 1);
    assert_eq!(handle.open_count(), 1);

    let winner = manager.status().job_id.unwrap();
    for outcome in &outcomes {
        if let StartOutcome::AlreadyRunning { job_id } = outcome {
            assert_eq!(job_id, &winner);
        }
    }

    manager.stop().unwrap();
    assert!(!handle.is_open());
}

#[test]
fn concurrent_stop_and_start_leave_consistent_state() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, handle) = manager_in(dir.path());
    let manager = Arc::new(manager);

    started(manager.start("initial", None, None).unwrap());

    let stopper = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || manager.stop().unwrap())
    };
    let starter = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || manager.start("racer", None, None).unwrap())
    };
    stopper.join().unwrap();
    let start_outcome = starter.join().unwrap();

    match start_outcome {
        StartOutcome::Started(_) => {
            assert_eq!(manager.status().job_id.as_deref(), Some("racer"));
            assert!(handle.is_open());
        }
        StartOutcome::AlreadyRunning { job_id } => {
            assert_eq!(job_id, "initial");
            assert!(!manager.status().running);
            assert!(!handle.is_open());
        }
    }

    manager.stop().unwrap();
    assert!(!handle.is_open());
    assert!(!manager.status().running);
}

#[test]
fn stop_keeps_session_claimed_while_port_is_stuck() {
    let dir = tempfile::tempdir().unwrap();
    let stop_timeout = Duration::from_millis(300);
    let config = CaptureConfiguration {
        stop_timeout,
        ..config_in(dir.path())
    };
    let manager = SessionManager::new(MockOpener::new(), config).unwrap();
    let handle = manager.opener().handle();

    handle.block_reads();
    started(manager.start("wedged", None, None).unwrap());
    thread::sleep(Duration::from_millis(50));

    let began = Instant::now();
    let err = manager.stop().unwrap_err();
    assert!(began.elapsed() < stop_timeout + Duration::from_millis(200));
    assert!(matches!(err, CaptureError::Timeout(_)));
    assert!(err.to_string().contains("serial port"));

    // Still claimed: no second session may open the port.
    assert_eq!(
        manager.status(),
        CaptureStatus { running: true, job_id: Some("wedged".into()) }
    );
    assert_eq!(
        manager.start("intruder", None, None).unwrap(),
        StartOutcome::AlreadyRunning { job_id: "wedged".into() }
    );
    assert_eq!(handle.open_count(), 1);
    assert!(handle.is_open());

    handle.unblock_reads();
    let deadline = Instant::now() + Duration::from_secs(3);
    while manager.current_session().is_some() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert!(manager.current_session().is_none());
    assert!(!handle.is_open());
    assert_eq!(manager.status(), CaptureStatus::default());
    assert_eq!(manager.stop().unwrap(), StopOutcome::NotRunning);
}

#[test]
fn stop_retry_finishes_once_port_is_free() {
    let dir = tempfile::tempdir().unwrap();
    let config = CaptureConfiguration {
        stop_timeout: Duration::from_millis(300),
        ..config_in(dir.path())
    };
    let manager = SessionManager::new(MockOpener::new(), config).unwrap();
    let handle = manager.opener().handle();

    handle.block_reads();
    started(manager.start("retry", None, None).unwrap());
    thread::sleep(Duration::from_millis(50));
    assert!(manager.stop().is_err());

    handle.unblock_reads();
    // Either this stop finishes the teardown or the loop already did.
    let outcome = manager.stop().unwrap();
    if let StopOutcome::Stopped(summary) = &outcome {
        assert_eq!(summary.info.job_id, "retry");
    }
    assert!(!handle.is_open());
    assert_eq!(manager.status(), CaptureStatus::default());
}
