//! # serial-capture-port
//!
//! `serialport` backend for serial-capture-core.
//!
//! Provides:
//! - `SerialPortOpener` / `SerialPortTransport`: real serial I/O for `SessionManager`
//! - `DeviceEnumerator`: attached serial devices with USB vid/pid
//! - `lsusb`: parsing of `lsusb` output
//! - `exchange`: one-shot write-then-read against a port
//!
//! ## Usage
//! ```no_run
//! use serial_capture_core::{CaptureConfiguration, SessionManager};
//! use serial_capture_port::SerialPortOpener;
//!
//! let manager = SessionManager::new(SerialPortOpener::new(), CaptureConfiguration::default()).unwrap();
//! manager.start("run1", Some("/dev/ttyACM0"), Some(115_200)).unwrap();
//! ```

pub mod device_enumerator;
pub mod exchange;
pub mod lsusb;
pub mod serial_port;

pub use device_enumerator::{DeviceEnumerator, SerialDevice};
pub use exchange::{exchange, ExchangeResult};
pub use lsusb::{list_usb_devices, parse_lsusb_lines, UsbDevice};
pub use serial_port::{SerialPortOpener, SerialPortTransport};
