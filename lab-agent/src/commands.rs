use std::io::{self, BufRead, Write};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use serial_capture_core::{SerialTransport, StartOutcome, TransportOpener};
use serial_capture_port::{exchange, lsusb, ExchangeResult, SerialDevice, UsbDevice};

use crate::agent_state::{AgentState, CaptureResponse, ErrorResponse, HealthResponse, VersionResponse};

/// Per-read timeout used while collecting an exchange reply.
const EXCHANGE_READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Longest reply window a `txrx` request may ask for.
const MAX_EXCHANGE_WAIT_MS: u64 = 10_000;

fn default_wait_ms() -> u64 {
    300
}

/// One request line, tagged by `op`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Start {
        job_id: String,
        #[serde(default)]
        port: Option<String>,
        #[serde(default)]
        baud_rate: Option<u32>,
    },
    Stop,
    Status,
    Devices,
    UsbDevices,
    Txrx {
        data: String,
        #[serde(default)]
        terminator: String,
        #[serde(default = "default_wait_ms")]
        wait_ms: u64,
        #[serde(default)]
        port: Option<String>,
        #[serde(default)]
        baud_rate: Option<u32>,
    },
    Health,
    Version,
}

#[derive(Debug, Clone, Serialize)]
pub struct DevicesResponse {
    pub ok: bool,
    pub devices: Vec<SerialDevice>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsbDevicesResponse {
    pub ok: bool,
    pub devices: Vec<UsbDevice>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TxrxResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub result: ExchangeResult,
}

pub fn start_capture<O: TransportOpener>(
    state: &AgentState<O>,
    job_id: &str,
    port: Option<&str>,
    baud_rate: Option<u32>,
) -> CaptureResponse {
    // A running session answers before any port probing happens.
    let port = if state.manager.status().running {
        None
    } else {
        state.resolve_port(port)
    };

    let (ok, message) = match state.manager.start(job_id, port.as_deref(), baud_rate) {
        Ok(outcome @ StartOutcome::Started(_)) => (true, outcome.message()),
        // Informational, not a failure.
        Ok(outcome @ StartOutcome::AlreadyRunning { .. }) => (true, outcome.message()),
        Err(e) => (false, e.to_string()),
    };

    CaptureResponse {
        ok,
        message,
        status: state.manager.status(),
    }
}

pub fn stop_capture<O: TransportOpener>(state: &AgentState<O>) -> CaptureResponse {
    let (ok, message) = match state.manager.stop() {
        Ok(outcome) => (true, outcome.message()),
        Err(e) => (false, e.to_string()),
    };

    CaptureResponse {
        ok,
        message,
        status: state.manager.status(),
    }
}

pub fn serial_txrx<O: TransportOpener>(
    state: &AgentState<O>,
    data: &str,
    terminator: &str,
    wait_ms: u64,
    port: Option<&str>,
    baud_rate: Option<u32>,
) -> Result<TxrxResponse, String> {
    // Requests are served one at a time.
    if wait_ms > MAX_EXCHANGE_WAIT_MS {
        return Err(format!(
            "wait_ms={} exceeds the {} ms limit",
            wait_ms, MAX_EXCHANGE_WAIT_MS
        ));
    }

    let port = state
        .resolve_port(port)
        .ok_or_else(|| "no serial port found; set SERIAL_PORT".to_string())?;

    if let Some(session) = state.manager.current_session() {
        if session.port == port {
            return Err(format!(
                "{} is busy capturing job_id={}",
                port, session.job_id
            ));
        }
    }

    let baud_rate = baud_rate.unwrap_or(state.manager.config().default_baud_rate);
    let mut transport = state
        .manager
        .opener()
        .open(&port, baud_rate, EXCHANGE_READ_TIMEOUT)
        .map_err(|e| e.to_string())?;

    let result = exchange(&mut transport, data, terminator, Duration::from_millis(wait_ms));
    if let Err(e) = transport.close() {
        log::warn!("failed to close {} after exchange: {}", port, e);
    }

    result
        .map(|result| TxrxResponse { ok: true, result })
        .map_err(|e| e.to_string())
}

/// Dispatch one parsed request.
pub fn handle_request<O: TransportOpener>(state: &AgentState<O>, request: Request) -> Value {
    let response = match request {
        Request::Start {
            job_id,
            port,
            baud_rate,
        } => serde_json::to_value(start_capture(state, &job_id, port.as_deref(), baud_rate)),
        Request::Stop => serde_json::to_value(stop_capture(state)),
        Request::Status => serde_json::to_value(state.manager.status()),
        Request::Devices => match state.enumerator.list_serial_devices() {
            Ok(devices) => serde_json::to_value(DevicesResponse { ok: true, devices }),
            Err(e) => serde_json::to_value(ErrorResponse::new(e.to_string())),
        },
        Request::UsbDevices => serde_json::to_value(UsbDevicesResponse {
            ok: true,
            devices: lsusb::list_usb_devices(),
        }),
        Request::Txrx {
            data,
            terminator,
            wait_ms,
            port,
            baud_rate,
        } => match serial_txrx(state, &data, &terminator, wait_ms, port.as_deref(), baud_rate) {
            Ok(response) => serde_json::to_value(response),
            Err(message) => serde_json::to_value(ErrorResponse::new(message)),
        },
        Request::Health => serde_json::to_value(HealthResponse {
            status: "ok",
            started_at: state.started_at,
            capture: state.manager.status(),
        }),
        Request::Version => serde_json::to_value(VersionResponse {
            version: env!("CARGO_PKG_VERSION"),
        }),
    };

    response.unwrap_or_else(|e| serde_json::json!({ "ok": false, "message": e.to_string() }))
}

/// Parse and dispatch one request line.
pub fn handle_line<O: TransportOpener>(state: &AgentState<O>, line: &str) -> Value {
    match serde_json::from_str::<Request>(line) {
        Ok(request) => handle_request(state, request),
        Err(e) => serde_json::json!({ "ok": false, "message": format!("invalid request: {}", e) }),
    }
}

/// Serve requests from `input` until end of input, one JSON response per line.
pub fn serve<O, R, W>(state: &AgentState<O>, input: R, mut output: W) -> io::Result<()>
where
    O: TransportOpener,
    R: BufRead,
    W: Write,
{
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_line(state, &line);
        writeln!(output, "{}", response)?;
        output.flush()?;
    }
    Ok(())
}
