//! USB Transport layer abstraction.
//!
//! Defines the `UsbTransport` trait for USB communication,
//! allowing different implementations (nusb, mock, etc.).

use std::time::Duration;

use thiserror::Error;

use crate::cancel::{CancelToken, Cancelled};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: VID={vid:04X} PID={pid:04X}")]
    DeviceNotFound { vid: u16, pid: u16 },

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("Endpoint not found: type={ep_type}, direction={direction}")]
    EndpointNotFound { ep_type: String, direction: String },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("Failed to close device: {}", .0.join("; "))]
    CloseFailed(Vec<String>),
}

impl From<Cancelled> for TransportError {
    fn from(_: Cancelled) -> Self {
        TransportError::Cancelled
    }
}

/// Abstract USB transport interface.
///
/// Reports are exchanged over a pair of interrupt endpoints. Both directions
/// block, honour the caller's cancellation token and give up after a bound.
pub trait UsbTransport: Send + Sync {
    /// Write one report to the OUT endpoint, returning the transferred length.
    fn write(&self, report: &[u8], cancel: &CancelToken) -> Result<usize, TransportError>;

    /// Read one report from the IN endpoint.
    ///
    /// Returns `TransportError::Timeout` when nothing arrives within `timeout`.
    fn read(&self, timeout: Duration, cancel: &CancelToken) -> Result<Vec<u8>, TransportError>;

    /// Release the device. Calling it more than once is a no-op.
    fn close(&self) -> Result<(), TransportError>;

    /// Check if device is still connected.
    fn is_connected(&self) -> bool;

    /// Get the current VID.
    fn vendor_id(&self) -> u16;

    /// Get the current PID.
    fn product_id(&self) -> u16;
}
