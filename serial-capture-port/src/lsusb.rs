//! Parse `lsusb` output into USB device records.

use std::io;
use std::process::Command;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// One line of `lsusb`, e.g.
/// `Bus 001 Device 003: ID 0451:bef3 Texas Instruments, Inc. CC1352R1 Launchpad`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbDevice {
    pub bus: String,
    pub device: String,
    pub vid: String,
    pub pid: String,
    pub description: String,
}

fn lsusb_line() -> &'static Regex {
    static LINE: OnceLock<Regex> = OnceLock::new();
    LINE.get_or_init(|| {
        Regex::new(
            r"^Bus\s+(?P<bus>\d+)\s+Device\s+(?P<device>\d+):\s+ID\s+(?P<vid>[0-9a-fA-F]{4}):(?P<pid>[0-9a-fA-F]{4})\s+(?P<desc>.+)$",
        )
        .expect("lsusb pattern is valid")
    })
}

/// Parse raw `lsusb` lines, skipping anything that does not match.
pub fn parse_lsusb_lines<I, S>(lines: I) -> Vec<UsbDevice>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    lines
        .into_iter()
        .filter_map(|line| {
            let caps = lsusb_line().captures(line.as_ref().trim())?;
            Some(UsbDevice {
                bus: caps["bus"].to_string(),
                device: caps["device"].to_string(),
                vid: caps["vid"].to_lowercase(),
                pid: caps["pid"].to_lowercase(),
                description: caps["desc"].trim().to_string(),
            })
        })
        .collect()
}

/// Run `lsusb` and parse its output. Returns an empty list if it cannot run.
pub fn list_usb_devices() -> Vec<UsbDevice> {
    list_usb_devices_with(run_lsusb)
}

/// Like [`list_usb_devices`] with an injectable line source.
pub fn list_usb_devices_with<F>(provider: F) -> Vec<UsbDevice>
where
    F: FnOnce() -> io::Result<Vec<String>>,
{
    match provider() {
        Ok(lines) => parse_lsusb_lines(lines),
        Err(e) => {
            log::warn!("lsusb unavailable: {}", e);
            Vec::new()
        }
    }
}

fn run_lsusb() -> io::Result<Vec<String>> {
    let output = Command::new("lsusb").output()?;
    if !output.status.success() {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("lsusb exited with {}", output.status),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_string)
        .collect())
}
