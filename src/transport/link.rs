//! Serial driver abstraction.
//!
//! The pool never touches the operating system directly. It opens ports
//! through a [`Transport`] and drives each open port through the
//! [`SerialLink`] it returns. Inbound bytes, driver errors and closes arrive
//! on the [`TransportEvent`] channel handed back by [`Transport::open`].

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::{ControlSignal, LineSettings};
use crate::error::Result;
use crate::identifiers::PortId;

// ============================================================================
// TransportEvent
// ============================================================================

/// Notification from an open port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Bytes read from the line.
    Data(Vec<u8>),
    /// Driver error; the port is no longer usable.
    Error(String),
    /// The port closed.
    Closed,
}

// ============================================================================
// OpenedLink
// ============================================================================

/// A freshly opened port: its control handle and its event stream.
pub struct OpenedLink {
    /// Write/control handle.
    pub link: Box<dyn SerialLink>,
    /// Inbound events.
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

// ============================================================================
// Traits
// ============================================================================

/// Control handle for one open port.
#[async_trait]
pub trait SerialLink: Send {
    /// Writes all bytes to the port and flushes the OS buffer.
    async fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Drives a modem control line to `level`.
    async fn set_control_signal(&mut self, signal: ControlSignal, level: bool) -> Result<()>;

    /// Closes the port. No further events are delivered.
    async fn close(&mut self) -> Result<()>;
}

/// Opens serial ports and enumerates the ones available.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens `port` with the given line settings.
    async fn open(&self, port: &PortId, line: &LineSettings) -> Result<OpenedLink>;

    /// Lists ports present on the system.
    async fn list_ports(&self) -> Result<Vec<PortInfo>>;
}

// ============================================================================
// PortInfo
// ============================================================================

/// A port reported by [`Transport::list_ports`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    /// Port identifier to pass to the pool.
    pub port_name: String,
    /// `USB`, `PCI`, `Bluetooth` or `Unknown`.
    pub port_type: String,
    /// USB manufacturer string.
    pub manufacturer: Option<String>,
    /// USB product string.
    pub product: Option<String>,
    /// USB serial number.
    pub serial_number: Option<String>,
    /// USB vendor ID.
    pub vid: Option<u16>,
    /// USB product ID.
    pub pid: Option<u16>,
}
