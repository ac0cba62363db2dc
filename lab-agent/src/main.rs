mod agent_state;
mod commands;
mod config;

use std::io;
use std::process::ExitCode;

use serial_capture_core::SessionManager;
use serial_capture_port::{DeviceEnumerator, SerialPortOpener};

use agent_state::AgentState;
use config::AgentConfig;

fn main() -> ExitCode {
    env_logger::init();

    let config = match AgentConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    if !config.env_overrides.is_empty() {
        log::info!("environment overrides: {}", config.env_overrides.join(", "));
    }

    let manager = match SessionManager::new(SerialPortOpener::new(), config.capture.clone()) {
        Ok(manager) => manager,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let enumerator = match &config.device_filters {
        Some(filters) => DeviceEnumerator::with_filters(filters),
        None => DeviceEnumerator::new(),
    };

    let state = AgentState::new(manager, enumerator);
    log::info!(
        "lab agent {} ready (logs in {})",
        env!("CARGO_PKG_VERSION"),
        config.capture.log_directory.display()
    );

    let result = commands::serve(&state, io::stdin().lock(), io::stdout().lock());
    state.shutdown();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("request stream failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
