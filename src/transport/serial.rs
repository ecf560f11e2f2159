//! Serial driver backed by the `serialport` crate.
//!
//! `serialport` is blocking. Opens and writes run on the blocking pool, and
//! each open port gets a dedicated reader thread that forwards bytes as
//! [`TransportEvent::Data`] until the port closes or fails.

// ============================================================================
// Imports
// ============================================================================

use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serialport::{DataBits, SerialPort, SerialPortType, StopBits};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::config::{ControlSignal, LineSettings, Parity};
use crate::error::{Error, Result};
use crate::identifiers::PortId;

use super::link::{OpenedLink, PortInfo, SerialLink, Transport, TransportEvent};

// ============================================================================
// Constants
// ============================================================================

/// Read timeout; bounds how long the reader thread takes to notice a close.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Reader chunk size.
const READ_CHUNK: usize = 256;

// ============================================================================
// Conversions
// ============================================================================

fn to_data_bits(bits: u8) -> DataBits {
    match bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    }
}

fn to_stop_bits(bits: u8) -> StopBits {
    match bits {
        2 => StopBits::Two,
        _ => StopBits::One,
    }
}

fn to_parity(parity: Parity) -> serialport::Parity {
    match parity {
        Parity::None => serialport::Parity::None,
        Parity::Even => serialport::Parity::Even,
        Parity::Odd => serialport::Parity::Odd,
    }
}

fn join_error(e: tokio::task::JoinError) -> Error {
    Error::Io(std::io::Error::other(e))
}

// ============================================================================
// SerialPortTransport
// ============================================================================

/// [`Transport`] for real serial hardware.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialPortTransport;

impl SerialPortTransport {
    /// Creates the transport.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for SerialPortTransport {
    async fn open(&self, port: &PortId, line: &LineSettings) -> Result<OpenedLink> {
        let path = port.as_str().to_owned();
        let line = *line;

        let opened = tokio::task::spawn_blocking(move || {
            serialport::new(&path, line.baud_rate)
                .data_bits(to_data_bits(line.data_bits))
                .parity(to_parity(line.parity))
                .stop_bits(to_stop_bits(line.stop_bits))
                .flow_control(serialport::FlowControl::None)
                .timeout(READ_TIMEOUT)
                .open()
        })
        .await
        .map_err(join_error)?;

        let serial = opened.map_err(|e| Error::transport_open(port.clone(), e.description))?;
        let reader = serial
            .try_clone()
            .map_err(|e| Error::transport_open(port.clone(), e.description))?;

        let stop = Arc::new(AtomicBool::new(false));
        let (event_tx, events) = mpsc::unbounded_channel();

        let thread_stop = Arc::clone(&stop);
        let thread_port = port.clone();
        thread::Builder::new()
            .name(format!("serial-rx {port}"))
            .spawn(move || read_loop(reader, thread_port, event_tx, thread_stop))?;

        Ok(OpenedLink {
            link: Box::new(SerialPortLink {
                port: port.clone(),
                serial: Arc::new(Mutex::new(serial)),
                stop,
            }),
            events,
        })
    }

    async fn list_ports(&self) -> Result<Vec<PortInfo>> {
        let ports = tokio::task::spawn_blocking(serialport::available_ports)
            .await
            .map_err(join_error)??;

        Ok(ports.into_iter().map(port_info).collect())
    }
}

fn port_info(port: serialport::SerialPortInfo) -> PortInfo {
    let mut info = PortInfo {
        port_name: port.port_name,
        ..Default::default()
    };

    match port.port_type {
        SerialPortType::UsbPort(usb) => {
            info.port_type = "USB".into();
            info.manufacturer = usb.manufacturer;
            info.product = usb.product;
            info.serial_number = usb.serial_number;
            info.vid = Some(usb.vid);
            info.pid = Some(usb.pid);
        }
        SerialPortType::PciPort => info.port_type = "PCI".into(),
        SerialPortType::BluetoothPort => info.port_type = "Bluetooth".into(),
        SerialPortType::Unknown => info.port_type = "Unknown".into(),
    }

    info
}

// ============================================================================
// Reader Thread
// ============================================================================

fn read_loop(
    mut reader: Box<dyn SerialPort>,
    port: PortId,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    stop: Arc<AtomicBool>,
) {
    let mut buf = [0u8; READ_CHUNK];

    while !stop.load(Ordering::Acquire) {
        match reader.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                trace!(port = %port, bytes = n, "REC");
                if event_tx.send(TransportEvent::Data(buf[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(ref e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => {}
            Err(e) => {
                if !stop.load(Ordering::Acquire) {
                    let _ = event_tx.send(TransportEvent::Error(e.to_string()));
                }
                break;
            }
        }
    }

    debug!(port = %port, "Reader thread stopped");
}

// ============================================================================
// SerialPortLink
// ============================================================================

struct SerialPortLink {
    port: PortId,
    serial: Arc<Mutex<Box<dyn SerialPort>>>,
    stop: Arc<AtomicBool>,
}

#[async_trait]
impl SerialLink for SerialPortLink {
    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let serial = Arc::clone(&self.serial);
        let bytes = bytes.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut serial = serial.lock();
            serial.write_all(&bytes)?;
            serial.flush()
        })
        .await
        .map_err(join_error)??;

        Ok(())
    }

    async fn set_control_signal(&mut self, signal: ControlSignal, level: bool) -> Result<()> {
        let mut serial = self.serial.lock();
        match signal {
            ControlSignal::Rts => serial.write_request_to_send(level)?,
            ControlSignal::Dtr => serial.write_data_terminal_ready(level)?,
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::Release);
        debug!(port = %self.port, "Serial link closed");
        Ok(())
    }
}

impl Drop for SerialPortLink {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serialport::{SerialPortInfo, UsbPortInfo};

    #[test]
    fn test_line_conversions() {
        assert_eq!(to_data_bits(7), DataBits::Seven);
        assert_eq!(to_data_bits(8), DataBits::Eight);
        assert_eq!(to_stop_bits(2), StopBits::Two);
        assert_eq!(to_stop_bits(1), StopBits::One);
        assert_eq!(to_parity(Parity::Odd), serialport::Parity::Odd);
    }

    #[test]
    fn test_usb_port_info() {
        let info = port_info(SerialPortInfo {
            port_name: "/dev/ttyUSB0".into(),
            port_type: SerialPortType::UsbPort(UsbPortInfo {
                vid: 0x0403,
                pid: 0x6001,
                serial_number: Some("A50285BI".into()),
                manufacturer: Some("FTDI".into()),
                product: Some("FT232R USB UART".into()),
            }),
        });

        assert_eq!(info.port_name, "/dev/ttyUSB0");
        assert_eq!(info.port_type, "USB");
        assert_eq!(info.vid, Some(0x0403));
        assert_eq!(info.manufacturer.as_deref(), Some("FTDI"));
    }

    #[test]
    fn test_pci_port_info() {
        let info = port_info(SerialPortInfo {
            port_name: "/dev/ttyS0".into(),
            port_type: SerialPortType::PciPort,
        });
        assert_eq!(info.port_type, "PCI");
        assert!(info.vid.is_none());
    }

    #[tokio::test]
    async fn test_open_missing_port_fails() {
        let port = PortId::new("/dev/rs485-link-does-not-exist");
        let result = SerialPortTransport::new()
            .open(&port, &LineSettings::default())
            .await;

        let err = result.err().unwrap();
        assert!(matches!(err, Error::TransportOpen { .. }));
        assert!(err.is_retryable());
    }
}
