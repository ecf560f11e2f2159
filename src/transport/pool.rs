//! Connection pool keyed by port.
//!
//! One physical connection per port identifier, shared by every endpoint
//! that acquires it. The pool counts consumers and closes the port when the
//! last one releases.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                ConnectionPool                │
//! │  ┌────────────────────────────────────────┐  │
//! │  │ /dev/ttyUSB0 → Connection (2 consumers)│  │
//! │  │ /dev/ttyUSB1 → Connection (1 consumer) │  │
//! │  └────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The first acquirer's line settings and flow control win. Later acquirers
//! with different transport parameters share the existing connection and a
//! warning is logged.
//!
//! An entry stays in the pool until its port is closed. Acquiring a port
//! whose last consumer is still closing starts a new connection that opens
//! only after the old one has let go of the port.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::error::{Error, Result};
use crate::identifiers::PortId;

use super::connection::ConnectionHandle;
use super::link::{PortInfo, Transport};
use super::serial::SerialPortTransport;

// ============================================================================
// Constants
// ============================================================================

/// Default delay between a failed open and the next attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(15);

// ============================================================================
// PoolEntry
// ============================================================================

struct PoolEntry {
    handle: ConnectionHandle,
    /// Configuration of the first acquirer.
    config: LinkConfig,
    consumers: usize,
    /// Last consumer released; the close is in progress.
    closing: bool,
}

impl PoolEntry {
    fn new(handle: ConnectionHandle, config: &LinkConfig) -> Self {
        Self {
            handle,
            config: config.clone(),
            consumers: 1,
            closing: false,
        }
    }
}

// ============================================================================
// ConnectionPool
// ============================================================================

/// Registry of shared serial connections.
///
/// Created once at service start and passed to every endpoint.
///
/// # Example
///
/// ```ignore
/// let pool = ConnectionPool::new();
/// let handle = pool.acquire(&config);
/// handle.send(b"PING\r\n".to_vec()).await?;
/// pool.release(&config.port).await;
/// pool.shutdown().await;
/// ```
pub struct ConnectionPool {
    transport: Arc<dyn Transport>,
    reconnect_delay: Duration,
    entries: RwLock<FxHashMap<PortId, PoolEntry>>,
}

// ============================================================================
// ConnectionPool - Constructor
// ============================================================================

impl ConnectionPool {
    /// Creates a pool on real serial hardware with default settings.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::builder().build()
    }

    /// Creates a pool builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ConnectionPoolBuilder {
        ConnectionPoolBuilder::new()
    }

    /// Returns the reconnect delay.
    #[inline]
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay
    }
}

// ============================================================================
// ConnectionPool - Public API
// ============================================================================

impl ConnectionPool {
    /// Returns the shared connection for `config.port`, creating it if needed.
    ///
    /// Each call counts one consumer; pair it with [`release`](Self::release).
    /// Must be called from within a Tokio runtime.
    pub fn acquire(&self, config: &LinkConfig) -> ConnectionHandle {
        let mut entries = self.entries.write();

        let predecessor = match entries.get_mut(&config.port) {
            Some(entry) if entry.closing => Some(entry.handle.clone()),
            Some(entry) => {
                entry.consumers += 1;
                if !entry.config.same_transport(config) {
                    warn!(
                        port = %config.port,
                        active = %entry.config.line,
                        requested = %config.line,
                        "Port already open with different settings; keeping active settings"
                    );
                }
                debug!(port = %config.port, consumers = entry.consumers, "Connection shared");
                return entry.handle.clone();
            }
            None => None,
        };

        if predecessor.is_some() {
            debug!(port = %config.port, "Port still closing; new connection will wait");
        }

        let handle = ConnectionHandle::spawn(
            config,
            Arc::clone(&self.transport),
            self.reconnect_delay,
            predecessor.as_ref(),
        );
        entries.insert(config.port.clone(), PoolEntry::new(handle.clone(), config));

        info!(port = %config.port, line = %config.line, "Connection created");
        handle
    }

    /// Drops one consumer of `port`; the last one closes the port.
    ///
    /// Completes once the port is closed, then removes the entry. Completes
    /// immediately if the port has no connection or other consumers remain.
    pub async fn release(&self, port: &PortId) {
        let handle = {
            let mut entries = self.entries.write();
            let Some(entry) = entries.get_mut(port) else {
                return;
            };

            if entry.closing {
                entry.handle.clone()
            } else {
                entry.consumers = entry.consumers.saturating_sub(1);
                if entry.consumers > 0 {
                    debug!(port = %port, consumers = entry.consumers, "Consumer released");
                    return;
                }
                entry.closing = true;
                entry.handle.clone()
            }
        };

        handle.close().await;

        let mut entries = self.entries.write();
        if entries
            .get(port)
            .is_some_and(|entry| entry.closing && entry.handle.same_connection(&handle))
        {
            entries.remove(port);
            debug!(port = %port, "Connection removed from pool");
        }
    }

    /// Returns the shared connection for `port` without counting a consumer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PortNotFound`] if the port has no connection or its
    /// last consumer is closing it.
    pub fn get(&self, port: &PortId) -> Result<ConnectionHandle> {
        self.entries
            .read()
            .get(port)
            .filter(|entry| !entry.closing)
            .map(|entry| entry.handle.clone())
            .ok_or_else(|| Error::port_not_found(port.clone()))
    }

    /// Returns the number of pooled connections, including ones closing.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns the number of consumers of `port`.
    #[must_use]
    pub fn consumer_count(&self, port: &PortId) -> usize {
        self.entries
            .read()
            .get(port)
            .map_or(0, |entry| entry.consumers)
    }

    /// Lists serial ports available on the system.
    ///
    /// # Errors
    ///
    /// Returns the transport's enumeration error.
    pub async fn list_ports(&self) -> Result<Vec<PortInfo>> {
        self.transport.list_ports().await
    }
}

// ============================================================================
// ConnectionPool - Lifecycle
// ============================================================================

impl ConnectionPool {
    /// Closes every connection regardless of consumers.
    pub async fn shutdown(&self) {
        info!("ConnectionPool shutting down");

        let entries: Vec<_> = {
            let mut map = self.entries.write();
            map.drain().collect()
        };

        for (port, entry) in entries {
            entry.handle.close().await;
            debug!(port = %port, "Connection closed during shutdown");
        }

        info!("ConnectionPool shutdown complete");
    }
}

// ============================================================================
// ConnectionPoolBuilder
// ============================================================================

/// Builder for [`ConnectionPool`].
pub struct ConnectionPoolBuilder {
    transport: Option<Arc<dyn Transport>>,
    reconnect_delay: Duration,
}

impl Default for ConnectionPoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionPoolBuilder {
    /// Creates a builder with the serial transport and a 15 s reconnect delay.
    #[must_use]
    pub fn new() -> Self {
        Self {
            transport: None,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    /// Sets the transport used to open ports.
    #[must_use]
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport) as Arc<dyn Transport>);
        self
    }

    /// Sets the delay between a failed open and the next attempt.
    #[must_use]
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Builds the pool.
    #[must_use]
    pub fn build(self) -> Arc<ConnectionPool> {
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(SerialPortTransport::new()) as Arc<dyn Transport>);

        Arc::new(ConnectionPool {
            transport,
            reconnect_delay: self.reconnect_delay,
            entries: RwLock::new(FxHashMap::default()),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
