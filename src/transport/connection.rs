//! Shared serial connection and its supervisor loop.
//!
//! One supervisor task owns each physical port. Every state change, write
//! and timer for that port is handled on that task, so nothing else ever
//! touches the link.
//!
//! # Event Loop
//!
//! The supervisor selects over:
//!
//! - Commands from [`ConnectionHandle`] (send, close)
//! - Events from the open link (data, error, close)
//! - The reconnect deadline
//! - The half-duplex hold deadline
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──► Opening ──► Open
//!      ▲              │          │
//!      └── reconnect ─┘◄─ lost ──┘
//!
//! any ──► Closing (release) ──► task exits
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::config::{LineSettings, LinkConfig};
use crate::error::{Error, Result};
use crate::identifiers::{PortId, SubscriptionId};

use super::link::{OpenedLink, SerialLink, Transport, TransportEvent};
use super::sequencer::{PendingWrite, Sequencer, WriteDone};
use super::sleep_until_deadline;

// ============================================================================
// Types
// ============================================================================

/// Map of subscribers to their event channels.
type SubscriberMap = FxHashMap<SubscriptionId, mpsc::UnboundedSender<LinkEvent>>;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of a shared connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not open; a reconnect may be scheduled.
    Disconnected,
    /// Open in progress.
    Opening,
    /// Open and usable.
    Open,
    /// Released; no further reconnects.
    Closing,
}

// ============================================================================
// LinkEvent
// ============================================================================

/// Event delivered to every subscriber of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Port opened.
    Ready,
    /// Port lost or not yet open.
    Closed,
    /// Raw bytes received, in arrival order.
    Data(Arc<[u8]>),
    /// Transport error detail.
    Error(String),
}

// ============================================================================
// ErrorDedup
// ============================================================================

/// Suppresses consecutive identical error messages.
#[derive(Debug, Default)]
pub(crate) struct ErrorDedup {
    last: Option<String>,
}

impl ErrorDedup {
    /// Returns `true` if `message` differs from the last one recorded.
    pub fn record(&mut self, message: &str) -> bool {
        if self.last.as_deref() == Some(message) {
            return false;
        }
        self.last = Some(message.to_owned());
        true
    }

    /// Forgets the last message.
    pub fn clear(&mut self) {
        self.last = None;
    }
}

// ============================================================================
// Shared State
// ============================================================================

struct Shared {
    state: Mutex<ConnectionState>,
    subscribers: Mutex<SubscriberMap>,
}

impl Shared {
    /// Changes state and notifies subscribers under one lock, so a new
    /// subscriber sees either the old state and the event or the new state.
    fn transition(&self, state: ConnectionState, event: Option<LinkEvent>) {
        let mut subscribers = self.subscribers.lock();
        *self.state.lock() = state;
        if let Some(event) = event {
            subscribers.retain(|_, tx| tx.send(event.clone()).is_ok());
        }
    }

    fn broadcast(&self, event: LinkEvent) {
        self.subscribers
            .lock()
            .retain(|_, tx| tx.send(event.clone()).is_ok());
    }
}

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the supervisor.
enum ConnectionCommand {
    /// Queue a write.
    Send { bytes: Vec<u8>, done_tx: WriteDone },
    /// Close the port and stop.
    Close,
}

// ============================================================================
// ConnectionHandle
// ============================================================================

/// Handle to a pooled serial connection.
///
/// Cheap to clone. All clones talk to the same supervisor task.
#[derive(Clone)]
pub struct ConnectionHandle {
    port: PortId,
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    shared: Arc<Shared>,
    closed_rx: watch::Receiver<bool>,
}

impl ConnectionHandle {
    /// Spawns the supervisor for `config.port` and starts the first open.
    ///
    /// With `predecessor`, the first open waits until that connection has
    /// closed its link, so the port is never open twice.
    pub(crate) fn spawn(
        config: &LinkConfig,
        transport: Arc<dyn Transport>,
        reconnect_delay: Duration,
        predecessor: Option<&ConnectionHandle>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            state: Mutex::new(ConnectionState::Opening),
            subscribers: Mutex::new(SubscriberMap::default()),
        });

        let supervisor = Supervisor {
            port: config.port.clone(),
            line: config.line,
            transport,
            reconnect_delay,
            shared: Arc::clone(&shared),
            link: None,
            events: None,
            sequencer: Sequencer::new(config.port.clone(), &config.line, config.flow_control),
            errors: ErrorDedup::default(),
            reconnect_at: None,
            closing: false,
            closed_tx,
        };

        let predecessor = predecessor.map(|handle| handle.closed_rx.clone());
        tokio::spawn(supervisor.run(command_rx, predecessor));

        Self {
            port: config.port.clone(),
            command_tx,
            shared,
            closed_rx,
        }
    }

    /// Returns `true` if both handles talk to the same supervisor.
    #[inline]
    pub(crate) fn same_connection(&self, other: &ConnectionHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Returns the port this connection serves.
    #[inline]
    #[must_use]
    pub fn port(&self) -> &PortId {
        &self.port
    }

    /// Returns the current lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    /// Returns `true` if the port is open.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Returns the number of live subscriptions.
    #[inline]
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.lock().len()
    }

    /// Subscribes to link events.
    ///
    /// The first event is the current state: [`LinkEvent::Ready`] if the
    /// port is open, otherwise [`LinkEvent::Closed`].
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let id = SubscriptionId::next();
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut subscribers = self.shared.subscribers.lock();
            let current = if *self.shared.state.lock() == ConnectionState::Open {
                LinkEvent::Ready
            } else {
                LinkEvent::Closed
            };
            let _ = tx.send(current);
            subscribers.insert(id, tx);
        }

        trace!(port = %self.port, subscription = %id, "Subscribed");

        Subscription {
            id,
            rx,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Sends bytes through the half-duplex sequencer.
    ///
    /// Completes after the direction signal has been released.
    ///
    /// # Errors
    ///
    /// - [`Error::WriteFailure`] if the port is not open or the write fails
    /// - [`Error::ConnectionClosed`] if the connection was released
    pub async fn send(&self, bytes: impl Into<Vec<u8>>) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();

        self.command_tx
            .send(ConnectionCommand::Send {
                bytes: bytes.into(),
                done_tx,
            })
            .map_err(|_| Error::ConnectionClosed)?;

        done_rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Closes the port and stops the supervisor.
    ///
    /// Waits for an in-flight write to release the line first.
    pub(crate) async fn close(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Close);
        self.closed().await;
    }

    /// Waits until the supervisor has closed the link and stopped.
    pub(crate) async fn closed(&self) {
        wait_closed(self.closed_rx.clone()).await;
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// Receiver of [`LinkEvent`]s. Unsubscribes on drop.
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<LinkEvent>,
    shared: Arc<Shared>,
}

impl Subscription {
    /// Returns the subscription ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Waits for the next event. Returns `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<LinkEvent> {
        self.rx.recv().await
    }

    /// Returns the next event if one is queued.
    pub fn try_recv(&mut self) -> Option<LinkEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shared.subscribers.lock().remove(&self.id);
    }
}

// ============================================================================
// Supervisor
// ============================================================================

/// Owns the link for one port.
struct Supervisor {
    port: PortId,
    line: LineSettings,
    transport: Arc<dyn Transport>,
    reconnect_delay: Duration,
    shared: Arc<Shared>,
    link: Option<Box<dyn SerialLink>>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    sequencer: Sequencer,
    errors: ErrorDedup,
    reconnect_at: Option<Instant>,
    closing: bool,
    closed_tx: watch::Sender<bool>,
}

impl Supervisor {
    async fn run(
        mut self,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        predecessor: Option<watch::Receiver<bool>>,
    ) {
        let mut handles_alive = true;

        if let Some(previous) = predecessor {
            debug!(port = %self.port, "Waiting for previous connection to close");
            wait_closed(previous).await;
        }

        self.open_link().await;

        loop {
            let hold_deadline = self.sequencer.hold_deadline();

            tokio::select! {
                command = command_rx.recv(), if handles_alive => {
                    match command {
                        Some(ConnectionCommand::Send { bytes, done_tx }) => {
                            self.handle_send(bytes, done_tx).await;
                        }

                        Some(ConnectionCommand::Close) => {
                            self.begin_close();
                        }

                        None => {
                            debug!(port = %self.port, "All handles dropped");
                            handles_alive = false;
                            self.begin_close();
                        }
                    }
                }

                event = next_event(&mut self.events) => {
                    self.handle_transport_event(event).await;
                }

                () = sleep_until_deadline(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.open_link().await;
                }

                () = sleep_until_deadline(hold_deadline) => {
                    self.finish_hold().await;
                }
            }

            if self.closing && self.sequencer.is_idle() {
                break;
            }
        }

        self.teardown().await;
    }

    async fn open_link(&mut self) {
        self.shared.transition(ConnectionState::Opening, None);
        debug!(port = %self.port, line = %self.line, "Opening serial port");

        match self.transport.open(&self.port, &self.line).await {
            Ok(OpenedLink { mut link, events }) => {
                self.sequencer.restore_idle(link.as_mut()).await;
                self.link = Some(link);
                self.events = Some(events);
                self.errors.clear();

                info!(port = %self.port, line = %self.line, "Serial port opened");
                self.shared
                    .transition(ConnectionState::Open, Some(LinkEvent::Ready));
            }
            Err(e) => {
                self.report(&e);
                self.shared.transition(ConnectionState::Disconnected, None);
                self.schedule_reconnect();
            }
        }
    }

    async fn handle_transport_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Data(bytes)) => {
                trace!(port = %self.port, bytes = bytes.len(), "REC");
                self.shared.broadcast(LinkEvent::Data(Arc::from(bytes)));
            }

            Some(TransportEvent::Error(message)) => {
                self.report(&Error::transport_runtime(self.port.clone(), message));
                self.link_lost().await;
            }

            Some(TransportEvent::Closed) | None => {
                if !self.closing {
                    self.report(&Error::unexpected_close(self.port.clone()));
                }
                self.link_lost().await;
            }
        }
    }

    async fn handle_send(&mut self, bytes: Vec<u8>, done_tx: WriteDone) {
        if self.closing {
            let _ = done_tx.send(Err(Error::ConnectionClosed));
            return;
        }

        let Some(link) = self.link.as_deref_mut() else {
            let _ = done_tx.send(Err(Error::write_failure(
                self.port.clone(),
                "Port not open",
            )));
            return;
        };

        self.sequencer
            .submit(PendingWrite { bytes, done_tx }, link)
            .await;
    }

    async fn finish_hold(&mut self) {
        self.sequencer.finish_hold(self.link.as_deref_mut()).await;

        if let Some(link) = self.link.as_deref_mut() {
            self.sequencer.start_next(link).await;
        }
    }

    /// Drops the link after an error or close and schedules a retry.
    async fn link_lost(&mut self) {
        self.events = None;
        if let Some(mut link) = self.link.take()
            && let Err(e) = link.close().await
        {
            debug!(port = %self.port, error = %e, "Close after link loss failed");
        }

        let port = self.port.clone();
        self.sequencer
            .fail_queued(move || Error::write_failure(port.clone(), "Port not open"));

        if self.closing {
            return;
        }

        self.shared
            .transition(ConnectionState::Disconnected, Some(LinkEvent::Closed));
        self.schedule_reconnect();
    }

    fn begin_close(&mut self) {
        if self.closing {
            return;
        }

        self.closing = true;
        self.reconnect_at = None;
        self.sequencer.fail_queued(|| Error::ConnectionClosed);
        self.shared.transition(ConnectionState::Closing, None);

        debug!(port = %self.port, "Closing serial port");
    }

    fn schedule_reconnect(&mut self) {
        if self.closing {
            return;
        }

        self.reconnect_at = Some(Instant::now() + self.reconnect_delay);
        debug!(
            port = %self.port,
            delay_ms = self.reconnect_delay.as_millis() as u64,
            "Reconnect scheduled"
        );
    }

    /// Logs and publishes an error unless it repeats the previous one.
    fn report(&mut self, error: &Error) {
        let message = error.to_string();

        if self.errors.record(&message) {
            error!(port = %self.port, error = %message, "Serial port error");
            self.shared.broadcast(LinkEvent::Error(message));
        } else {
            trace!(port = %self.port, "Repeated error suppressed");
        }
    }

    async fn teardown(mut self) {
        self.events = None;

        if let Some(mut link) = self.link.take() {
            if let Err(e) = link.close().await {
                warn!(port = %self.port, error = %e, "Failed to close serial port");
            }
            info!(port = %self.port, "Serial port closed");
        }

        // Dropping the senders ends every subscription.
        self.shared.subscribers.lock().clear();

        self.closed_tx.send_replace(true);

        debug!(port = %self.port, "Supervisor terminated");
    }
}

/// Resolves once the supervisor behind `closed_rx` has closed its link.
///
/// A dropped sender means the task is gone, which counts as closed.
async fn wait_closed(mut closed_rx: watch::Receiver<bool>) {
    let _ = closed_rx.wait_for(|closed| *closed).await;
}

/// Next event from the link, or never if there is no link.
async fn next_event(
    events: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

// ============================================================================
// Tests
// ============================================================================
