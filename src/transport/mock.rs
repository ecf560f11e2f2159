//! In-memory transport for tests.
//!
//! [`MockTransport`] stands in for the serial driver. It counts physical
//! opens, records every write and control-line change with its
//! [`tokio::time::Instant`], and lets a test inject open failures, inbound
//! bytes, runtime errors and closes.
//!
//! # Example
//!
//! ```ignore
//! let mock = MockTransport::new();
//! mock.fail_opens(["Error: No such file or directory"]);
//!
//! let pool = ConnectionPool::builder()
//!     .transport(mock.clone())
//!     .reconnect_delay(Duration::from_secs(1))
//!     .build();
//! let handle = pool.acquire(&config);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::{ControlSignal, LineSettings};
use crate::error::{Error, Result};
use crate::identifiers::PortId;

use super::link::{OpenedLink, PortInfo, SerialLink, Transport, TransportEvent};

// ============================================================================
// Records
// ============================================================================

/// Operation observed by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOp {
    /// Port opened.
    Open(PortId),
    /// Bytes written.
    Write(Vec<u8>),
    /// Control line driven.
    Signal(ControlSignal, bool),
    /// Port closed.
    Close(PortId),
}

/// Timestamped operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockRecord {
    /// When the operation happened.
    pub at: Instant,
    /// What happened.
    pub op: MockOp,
}

// ============================================================================
// MockTransport
// ============================================================================

#[derive(Default)]
struct MockState {
    opens: AtomicUsize,
    open_failures: Mutex<VecDeque<String>>,
    fail_all_opens: Mutex<Option<String>>,
    write_failure: Mutex<Option<String>>,
    ports: Mutex<Vec<PortInfo>>,
    records: Mutex<Vec<MockRecord>>,
    links: Mutex<FxHashMap<PortId, mpsc::UnboundedSender<TransportEvent>>>,
}

impl MockState {
    fn record(&self, op: MockOp) {
        self.records.lock().push(MockRecord {
            at: Instant::now(),
            op,
        });
    }
}

/// Scriptable [`Transport`] that never touches hardware.
///
/// Clones share state, so a test keeps one clone and hands another to the pool.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl MockTransport {
    /// Creates a mock where every open succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful and failed open attempts.
    #[must_use]
    pub fn open_attempts(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    /// Number of successful physical opens.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.state
            .records
            .lock()
            .iter()
            .filter(|r| matches!(r.op, MockOp::Open(_)))
            .count()
    }

    /// Number of physical closes.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.state
            .records
            .lock()
            .iter()
            .filter(|r| matches!(r.op, MockOp::Close(_)))
            .count()
    }

    /// Fails the next opens, one message per attempt.
    pub fn fail_opens<I, S>(&self, messages: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state
            .open_failures
            .lock()
            .extend(messages.into_iter().map(Into::into));
    }

    /// Fails every open with `message` until cleared with `None`.
    pub fn fail_all_opens(&self, message: Option<&str>) {
        *self.state.fail_all_opens.lock() = message.map(str::to_owned);
    }

    /// Fails every write with `message` until cleared with `None`.
    pub fn fail_writes(&self, message: Option<&str>) {
        *self.state.write_failure.lock() = message.map(str::to_owned);
    }

    /// Sets the ports returned by `list_ports`.
    pub fn set_ports(&self, ports: Vec<PortInfo>) {
        *self.state.ports.lock() = ports;
    }

    /// Delivers inbound bytes on an open port.
    ///
    /// Returns `false` if the port is not open.
    pub fn inject_data(&self, port: &str, bytes: &[u8]) -> bool {
        self.inject(port, TransportEvent::Data(bytes.to_vec()))
    }

    /// Reports a driver error on an open port.
    pub fn inject_error(&self, port: &str, message: &str) -> bool {
        self.inject(port, TransportEvent::Error(message.to_owned()))
    }

    /// Closes an open port from the driver side.
    pub fn inject_close(&self, port: &str) -> bool {
        self.inject(port, TransportEvent::Closed)
    }

    /// Returns every recorded operation in order.
    #[must_use]
    pub fn records(&self) -> Vec<MockRecord> {
        self.state.records.lock().clone()
    }

    /// Returns every payload written, in order.
    #[must_use]
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state
            .records
            .lock()
            .iter()
            .filter_map(|r| match &r.op {
                MockOp::Write(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns every control-line change with its timestamp.
    #[must_use]
    pub fn signals(&self) -> Vec<(Instant, ControlSignal, bool)> {
        self.state
            .records
            .lock()
            .iter()
            .filter_map(|r| match r.op {
                MockOp::Signal(signal, level) => Some((r.at, signal, level)),
                _ => None,
            })
            .collect()
    }

    /// Returns the timestamps of successful opens.
    #[must_use]
    pub fn open_times(&self) -> Vec<Instant> {
        self.state
            .records
            .lock()
            .iter()
            .filter(|r| matches!(r.op, MockOp::Open(_)))
            .map(|r| r.at)
            .collect()
    }

    fn inject(&self, port: &str, event: TransportEvent) -> bool {
        let links = self.state.links.lock();
        links
            .get(port)
            .is_some_and(|tx| tx.send(event).is_ok())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, port: &PortId, _line: &LineSettings) -> Result<OpenedLink> {
        self.state.opens.fetch_add(1, Ordering::SeqCst);

        let scripted = self.state.open_failures.lock().pop_front();
        let failure = scripted.or_else(|| self.state.fail_all_opens.lock().clone());
        if let Some(message) = failure {
            return Err(Error::transport_open(port.clone(), message));
        }

        let (event_tx, events) = mpsc::unbounded_channel();
        self.state.links.lock().insert(port.clone(), event_tx);
        self.state.record(MockOp::Open(port.clone()));

        Ok(OpenedLink {
            link: Box::new(MockLink {
                port: port.clone(),
                state: Arc::clone(&self.state),
            }),
            events,
        })
    }

    async fn list_ports(&self) -> Result<Vec<PortInfo>> {
        Ok(self.state.ports.lock().clone())
    }
}

// ============================================================================
// MockLink
// ============================================================================

struct MockLink {
    port: PortId,
    state: Arc<MockState>,
}

#[async_trait]
impl SerialLink for MockLink {
    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if let Some(message) = self.state.write_failure.lock().clone() {
            return Err(Error::Io(std::io::Error::other(message)));
        }
        self.state.record(MockOp::Write(bytes.to_vec()));
        Ok(())
    }

    async fn set_control_signal(&mut self, signal: ControlSignal, level: bool) -> Result<()> {
        self.state.record(MockOp::Signal(signal, level));
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.state.links.lock().remove(&self.port);
        self.state.record(MockOp::Close(self.port.clone()));
        Ok(())
    }
}
