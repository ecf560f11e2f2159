//! Host-facing endpoints.
//!
//! An endpoint is a logical consumer of a pooled port. Attaching acquires
//! the port; detaching releases it.
//!
//! | Endpoint | Direction | Per-endpoint state |
//! |----------|-----------|--------------------|
//! | [`InboundEndpoint`] | Port → host | Frame decoder |
//! | [`OutboundEndpoint`] | Host → port | Terminator |
//!
//! Both report [`LinkStatus`] changes through an optional [`StatusHandler`].

// ============================================================================
// Submodules
// ============================================================================

/// Decoded frames from a port.
pub mod inbound;

/// Payloads to a port.
pub mod outbound;

/// Status reporting.
pub mod status;

// ============================================================================
// Re-exports
// ============================================================================

pub use inbound::{InboundEndpoint, InboundMessage};
pub use outbound::{OutboundEndpoint, OutboundPayload};
pub use status::{LinkStatus, StatusHandler};
