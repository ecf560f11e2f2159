//! Error types for rs485-link.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use rs485_link::{Result, Error};
//!
//! async fn example(endpoint: &OutboundEndpoint) -> Result<()> {
//!     endpoint.send("PING").await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::ConfigurationMissing`] |
//! | Transport | [`Error::TransportOpen`], [`Error::TransportRuntime`], [`Error::UnexpectedClose`] |
//! | Write | [`Error::WriteFailure`], [`Error::ConnectionClosed`] |
//! | Pool | [`Error::PortNotFound`] |
//! | External | [`Error::Io`], [`Error::Serial`], [`Error::Json`] |
//!
//! Transport errors are retryable and are normally delivered as link events
//! rather than returned. Only write failures reach the caller of `send`.

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;

use crate::identifiers::PortId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when link settings are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Endpoint was activated without a serial port configuration.
    ///
    /// The endpoint stays inert.
    #[error("Missing serial port configuration")]
    ConfigurationMissing,

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// The serial port could not be opened.
    #[error("Serialport {port}: open failed: {message}")]
    TransportOpen {
        /// Port that failed to open.
        port: PortId,
        /// Driver error message.
        message: String,
    },

    /// The serial driver reported an error on an open port.
    #[error("Serialport {port}: {message}")]
    TransportRuntime {
        /// Port that reported the error.
        port: PortId,
        /// Driver error message.
        message: String,
    },

    /// The port closed without a release.
    #[error("Serialport {port} closed unexpectedly")]
    UnexpectedClose {
        /// Port that closed.
        port: PortId,
    },

    // ========================================================================
    // Write Errors
    // ========================================================================
    /// Writing to the port failed.
    ///
    /// Not retried automatically.
    #[error("Serialport {port}: {message}")]
    WriteFailure {
        /// Port the write was addressed to.
        port: PortId,
        /// Description of the failure.
        message: String,
    },

    /// Connection was released or shut down.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Pool Errors
    // ========================================================================
    /// No pooled connection exists for this port.
    #[error("No connection for port: {port}")]
    PortNotFound {
        /// The requested port.
        port: PortId,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// Serial driver error.
    #[error("Serial error: {0}")]
    Serial(#[from] serialport::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a transport open error.
    #[inline]
    pub fn transport_open(port: PortId, message: impl Into<String>) -> Self {
        Self::TransportOpen {
            port,
            message: message.into(),
        }
    }

    /// Creates a transport runtime error.
    #[inline]
    pub fn transport_runtime(port: PortId, message: impl Into<String>) -> Self {
        Self::TransportRuntime {
            port,
            message: message.into(),
        }
    }

    /// Creates an unexpected close error.
    #[inline]
    pub fn unexpected_close(port: PortId) -> Self {
        Self::UnexpectedClose { port }
    }

    /// Creates a write failure error.
    #[inline]
    pub fn write_failure(port: PortId, message: impl Into<String>) -> Self {
        Self::WriteFailure {
            port,
            message: message.into(),
        }
    }

    /// Creates a port not found error.
    #[inline]
    pub fn port_not_found(port: PortId) -> Self {
        Self::PortNotFound { port }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this error came from the serial transport.
    #[inline]
    #[must_use]
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::TransportOpen { .. }
                | Self::TransportRuntime { .. }
                | Self::UnexpectedClose { .. }
                | Self::Serial(_)
        )
    }

    /// Returns `true` if the supervisor retries this error on its own.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransportOpen { .. } | Self::TransportRuntime { .. } | Self::UnexpectedClose { .. }
        )
    }

    /// Returns the port this error refers to, if any.
    #[must_use]
    pub fn port(&self) -> Option<&PortId> {
        match self {
            Self::TransportOpen { port, .. }
            | Self::TransportRuntime { port, .. }
            | Self::UnexpectedClose { port }
            | Self::WriteFailure { port, .. }
            | Self::PortNotFound { port } => Some(port),
            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
