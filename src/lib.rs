//! rs485-link - Shared serial links for half-duplex RS485 buses.
//!
//! This library keeps one auto-reconnecting connection per serial port,
//! shares it between any number of consumers, cuts the inbound byte stream
//! into frames and drives the RS485 direction line around every write.
//!
//! # Architecture
//!
//! - **Pool**: one supervisor task per port owns the physical link,
//!   reopens it on a fixed delay after failures and fans events out
//! - **Sequencer**: asserts RTS/DTR, writes, holds for the wire time at the
//!   configured baud rate, then releases
//! - **Decoder**: per-endpoint framing by delimiter, byte count, inter-byte
//!   silence, or one frame per byte
//!
//! Key design principles:
//!
//! - The pool is an explicit object passed to every endpoint
//! - Transport failures become events; only write failures are returned
//! - A started write always runs to release, even across a close
//!
//! # Quick Start
//!
//! ```no_run
//! use rs485_link::{ConnectionPool, Framing, InboundEndpoint, LinkConfig, OutboundEndpoint, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let pool = ConnectionPool::new();
//!
//!     let config = LinkConfig::builder("/dev/ttyUSB0")
//!         .baud_rate(9600)
//!         .framing(Framing::Delimiter(b'\n'))
//!         .flow_control("rts-on".parse()?)
//!         .terminator_escaped("\\r\\n")
//!         .build()?;
//!
//!     let (inbound, mut frames) = InboundEndpoint::attach(&pool, Some(&config), None)?;
//!     let outbound = OutboundEndpoint::attach(&pool, Some(&config), None)?;
//!
//!     outbound.send("READ 1").await?;
//!     if let Some(frame) = frames.recv().await {
//!         println!("{:?}", frame.payload);
//!     }
//!
//!     outbound.detach().await;
//!     inbound.detach().await;
//!     pool.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | Link configuration, host settings, builder |
//! | [`endpoint`] | Inbound and outbound endpoints, status |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`framing`] | Frame decoder |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`transport`] | Pool, supervisor, sequencer, drivers |
//!
//! # Features
//!
//! - `test-utils`: exposes `MockTransport` for downstream tests

// ============================================================================
// Modules
// ============================================================================

/// Link configuration.
///
/// Use [`LinkConfig::builder()`] or [`PortSettings`] to build a configuration.
pub mod config;

/// Host-facing endpoints.
pub mod endpoint;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Inbound stream framing.
pub mod framing;

/// Type-safe identifiers.
pub mod identifiers;

/// Serial transport layer.
///
/// Connection pool, per-port supervisor and drivers.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Configuration types
pub use config::{
    ControlSignal, FlowControl, Framing, LineSettings, LinkConfig, LinkConfigBuilder,
    OutputEncoding, Parity, PortSettings,
};

// Endpoint types
pub use endpoint::{
    InboundEndpoint, InboundMessage, LinkStatus, OutboundEndpoint, OutboundPayload,
    StatusHandler,
};

// Error types
pub use error::{Error, Result};

// Framing types
pub use framing::{Frame, FrameDecoder, Payload};

// Identifier types
pub use identifiers::{PortId, SubscriptionId};

// Transport types
pub use transport::{
    ConnectionHandle, ConnectionPool, ConnectionPoolBuilder, ConnectionState, LinkEvent,
    PortInfo, SerialPortTransport, Subscription, Transport,
};

#[cfg(any(test, feature = "test-utils"))]
pub use transport::MockTransport;
