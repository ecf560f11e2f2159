//! Link configuration module.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`LinkConfig`] | Complete endpoint configuration |
//! | [`LinkConfigBuilder`] | Fluent configuration builder |
//! | [`PortSettings`] | Host-form settings with defaults |
//! | [`LineSettings`] | Baud rate, data bits, parity, stop bits |
//! | [`Framing`] | Inbound framing rule |
//! | [`FlowControl`] | Half-duplex direction control |
//!
//! # Example
//!
//! ```no_run
//! use rs485_link::{Framing, LinkConfig};
//!
//! # fn example() -> rs485_link::Result<()> {
//! let config = LinkConfig::builder("/dev/ttyUSB0")
//!     .baud_rate(9600)
//!     .framing(Framing::Delimiter(b'\r'))
//!     .flow_control("rts-on".parse()?)
//!     .terminator_escaped("\\r")
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder for link configuration.
pub mod builder;

/// Escape-sequence parsing for delimiters and terminators.
pub mod escape;

/// Configuration types.
pub mod link;

/// Host-form settings.
pub mod settings;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::LinkConfigBuilder;
pub use link::{
    ControlSignal, FlowControl, Framing, LineSettings, LinkConfig, OutputEncoding, Parity,
};
pub use settings::PortSettings;
