pub mod capture_delegate;
pub mod serial_transport;
