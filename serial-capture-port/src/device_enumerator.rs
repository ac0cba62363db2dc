//! Serial device enumeration via `serialport::available_ports`.
//!
//! Lists attached serial ports as DUT records with USB vendor/product ids,
//! optionally filtered by a `vid:pid` allow list, and picks a default port
//! when none is configured.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serialport::{SerialPortInfo, SerialPortType};

use serial_capture_core::CaptureError;

/// Port name prefixes that look like a USB-serial DUT, in preference order.
const DUT_PORT_PREFIXES: [&str; 4] = ["tty.usbmodem", "tty.usbserial", "ttyACM", "ttyUSB"];

/// A serial port that may be a device under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialDevice {
    /// Device path with `/` replaced, stable enough to use as an id.
    pub id: String,
    pub port_name: String,
    pub bus: String,
    pub vid: String,
    pub pid: String,
    pub description: String,
    pub status: String,
}

/// Serial device enumerator.
#[derive(Debug, Clone, Default)]
pub struct DeviceEnumerator {
    filters: BTreeSet<String>,
}

impl DeviceEnumerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only report devices whose `vid:pid` is in `filters`
    /// (comma-separated lowercase hex, e.g. `0451:bef3,2341:0043`).
    pub fn with_filters(filters: &str) -> Self {
        let filters = filters
            .split(',')
            .map(|f| f.trim().to_lowercase())
            .filter(|f| !f.is_empty())
            .collect();
        Self { filters }
    }

    /// List serial devices currently attached.
    pub fn list_serial_devices(&self) -> Result<Vec<SerialDevice>, CaptureError> {
        let ports = serialport::available_ports()
            .map_err(|e| CaptureError::Unknown(format!("failed to enumerate serial ports: {}", e)))?;
        Ok(self.devices_from_ports(ports))
    }

    /// Convert raw port records, applying the filter list.
    pub fn devices_from_ports(&self, ports: Vec<SerialPortInfo>) -> Vec<SerialDevice> {
        ports
            .into_iter()
            .map(to_device)
            .filter(|d| self.filters.is_empty() || self.filters.contains(&format!("{}:{}", d.vid, d.pid)))
            .collect()
    }

    /// The first attached port that looks like a USB-serial DUT.
    pub fn default_port(&self) -> Option<String> {
        match serialport::available_ports() {
            Ok(ports) => guess_default_port(ports.iter().map(|p| p.port_name.as_str())),
            Err(e) => {
                log::warn!("failed to enumerate serial ports: {}", e);
                None
            }
        }
    }
}

/// Pick the preferred DUT-looking port among `names`.
///
/// Earlier prefixes in [`DUT_PORT_PREFIXES`] win; ties go to the
/// lexicographically smallest name.
pub fn guess_default_port<'a>(names: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let mut names: Vec<&str> = names.into_iter().collect();
    names.sort_unstable();
    DUT_PORT_PREFIXES.iter().find_map(|prefix| {
        names
            .iter()
            .find(|name| file_name(name).starts_with(prefix))
            .map(|name| name.to_string())
    })
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn to_device(info: SerialPortInfo) -> SerialDevice {
    let (bus, vid, pid, description) = match &info.port_type {
        SerialPortType::UsbPort(usb) => {
            let description = usb
                .product
                .clone()
                .or_else(|| known_device_name(usb.vid, usb.pid).map(str::to_string))
                .unwrap_or_else(|| "USB Serial Device".to_string());
            ("usb", usb.vid, usb.pid, description)
        }
        SerialPortType::PciPort => ("pci", 0, 0, "PCI Serial Port".to_string()),
        SerialPortType::BluetoothPort => ("bluetooth", 0, 0, "Bluetooth Serial Port".to_string()),
        SerialPortType::Unknown => ("unknown", 0, 0, "Serial Port".to_string()),
    };

    SerialDevice {
        id: info.port_name.replace('/', "_"),
        port_name: info.port_name,
        bus: bus.to_string(),
        vid: format!("{:04x}", vid),
        pid: format!("{:04x}", pid),
        description,
        status: "idle".to_string(),
    }
}

/// Friendly names for probes we see often in the lab.
fn known_device_name(vid: u16, pid: u16) -> Option<&'static str> {
    match (vid, pid) {
        (0x0451, 0xbef3) => Some("TI CC1352 LaunchPad"),
        _ => None,
    }
}
