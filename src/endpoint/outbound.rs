//! Outbound endpoint: payloads to a shared port.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::config::LinkConfig;
use crate::error::{Error, Result};
use crate::identifiers::PortId;
use crate::transport::{ConnectionHandle, ConnectionPool, Subscription};

use super::status::{LinkStatus, StatusHandler};

// ============================================================================
// OutboundPayload
// ============================================================================

/// Payload accepted by [`OutboundEndpoint::send`].
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundPayload {
    /// Raw bytes, written as-is.
    Bytes(Vec<u8>),
    /// UTF-8 text.
    Text(String),
    /// JSON value; strings are written verbatim, anything else serialized.
    Json(Value),
}

impl OutboundPayload {
    /// Converts to wire bytes and appends `terminator`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if a JSON value fails to serialize.
    pub fn into_bytes(self, terminator: Option<&[u8]>) -> Result<Vec<u8>> {
        let mut bytes = match self {
            Self::Bytes(bytes) => bytes,
            Self::Text(text) => text.into_bytes(),
            Self::Json(Value::String(text)) => text.into_bytes(),
            Self::Json(value) => serde_json::to_vec(&value)?,
        };

        if let Some(terminator) = terminator {
            bytes.extend_from_slice(terminator);
        }
        Ok(bytes)
    }
}

impl From<Vec<u8>> for OutboundPayload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<&[u8]> for OutboundPayload {
    fn from(bytes: &[u8]) -> Self {
        Self::Bytes(bytes.to_vec())
    }
}

impl From<String> for OutboundPayload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for OutboundPayload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Value> for OutboundPayload {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

// ============================================================================
// OutboundEndpoint
// ============================================================================

/// Producer of payloads for one port.
///
/// Writes from every outbound endpoint on a port go through that port's
/// single sequencer, one at a time.
///
/// # Example
///
/// ```ignore
/// let endpoint = OutboundEndpoint::attach(&pool, Some(&config), None)?;
/// endpoint.send("READ 1").await?;
/// endpoint.send(serde_json::json!({ "cmd": "reset" })).await?;
/// endpoint.detach().await;
/// ```
pub struct OutboundEndpoint {
    handle: ConnectionHandle,
    pool: Arc<ConnectionPool>,
    terminator: Option<Vec<u8>>,
    status_task: Option<JoinHandle<()>>,
}

impl OutboundEndpoint {
    /// Acquires the port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationMissing`] if `config` is `None`.
    pub fn attach(
        pool: &Arc<ConnectionPool>,
        config: Option<&LinkConfig>,
        status: Option<StatusHandler>,
    ) -> Result<Self> {
        let Some(config) = config else {
            error!("Outbound endpoint has no serial port configuration");
            return Err(Error::ConfigurationMissing);
        };

        let handle = pool.acquire(config);
        let status_task = status.map(|handler| {
            let subscription = handle.subscribe();
            tokio::spawn(report_status(subscription, handler))
        });

        debug!(port = %config.port, "Outbound endpoint attached");

        Ok(Self {
            handle,
            pool: Arc::clone(pool),
            terminator: config.terminator.clone(),
            status_task,
        })
    }

    /// Returns the port this endpoint writes.
    #[inline]
    #[must_use]
    pub fn port(&self) -> &PortId {
        self.handle.port()
    }

    /// Sends a payload, appending the configured terminator.
    ///
    /// Completes once the bytes are on the wire and the direction signal
    /// is released.
    ///
    /// # Errors
    ///
    /// - [`Error::WriteFailure`] if the port is not open or the write fails
    /// - [`Error::ConnectionClosed`] if the port was released
    /// - [`Error::Json`] if a JSON payload fails to serialize
    pub async fn send(&self, payload: impl Into<OutboundPayload>) -> Result<()> {
        let bytes = payload.into().into_bytes(self.terminator.as_deref())?;

        self.handle.send(bytes).await.inspect_err(|e| {
            warn!(port = %self.handle.port(), error = %e, "Send failed");
        })
    }

    /// Releases the port.
    pub async fn detach(self) {
        if let Some(task) = self.status_task {
            task.abort();
            let _ = task.await;
        }
        self.pool.release(self.handle.port()).await;
        debug!(port = %self.handle.port(), "Outbound endpoint detached");
    }
}

async fn report_status(mut subscription: Subscription, handler: StatusHandler) {
    handler(LinkStatus::NotConnected);

    while let Some(event) = subscription.recv().await {
        if let Some(status) = LinkStatus::from_event(&event) {
            handler(status);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
