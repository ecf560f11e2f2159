//! Serial transport layer.
//!
//! Owns the physical ports: opening them, reconnecting after failures,
//! sequencing half-duplex writes and fanning inbound bytes out to every
//! consumer.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐  acquire/release  ┌──────────────────┐  open/write/signal  ┌───────────┐
//! │   Endpoints    │──────────────────►│  ConnectionPool  │────────────────────►│ Transport │
//! │ (inbound/out)  │◄──── LinkEvent ───│  → Supervisor    │◄── TransportEvent ──│ (driver)  │
//! └────────────────┘                   └──────────────────┘                     └───────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `link` | Driver traits and events |
//! | `serial` | `serialport`-backed driver |
//! | `connection` | Per-port supervisor loop and handles |
//! | `sequencer` | Half-duplex transmit sequencing |
//! | `pool` | Port-keyed connection registry |
//! | `mock` | In-memory driver (tests and `test-utils`) |

// ============================================================================
// Imports
// ============================================================================

use tokio::time::{Instant, sleep_until};

// ============================================================================
// Submodules
// ============================================================================

/// Shared connection and supervisor loop.
pub mod connection;

/// Driver abstraction.
pub mod link;

/// Connection registry.
pub mod pool;

/// Half-duplex transmit sequencer.
pub mod sequencer;

/// `serialport` driver.
pub mod serial;

/// In-memory driver.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{ConnectionHandle, ConnectionState, LinkEvent, Subscription};
pub use link::{OpenedLink, PortInfo, SerialLink, Transport, TransportEvent};
pub use pool::{ConnectionPool, ConnectionPoolBuilder, DEFAULT_RECONNECT_DELAY};
pub use sequencer::LineTiming;
pub use serial::SerialPortTransport;

#[cfg(any(test, feature = "test-utils"))]
pub use mock::{MockOp, MockRecord, MockTransport};

// ============================================================================
// Timers
// ============================================================================

/// Sleeps until `deadline`, or forever when there is none.
pub(crate) async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
