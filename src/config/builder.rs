//! Builder pattern for link configuration.
//!
//! Provides a fluent API for configuring and validating [`LinkConfig`]
//! instances.
//!
//! # Example
//!
//! ```no_run
//! use rs485_link::{Framing, LinkConfig, OutputEncoding};
//!
//! # fn example() -> rs485_link::Result<()> {
//! let config = LinkConfig::builder("/dev/ttyUSB0")
//!     .baud_rate(19_200)
//!     .framing(Framing::Count(8))
//!     .encoding(OutputEncoding::Binary)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use crate::error::{Error, Result};
use crate::identifiers::PortId;

use super::escape::unescape;
use super::link::{FlowControl, Framing, LineSettings, LinkConfig, OutputEncoding, Parity};

// ============================================================================
// LinkConfigBuilder
// ============================================================================

/// Builder for a [`LinkConfig`].
///
/// Use [`LinkConfig::builder()`] to create a new builder.
#[derive(Debug, Clone)]
pub struct LinkConfigBuilder {
    /// Port identifier.
    port: PortId,
    /// Line parameters.
    line: LineSettings,
    /// Inbound framing.
    framing: Framing,
    /// Inbound encoding.
    encoding: OutputEncoding,
    /// Direction control.
    flow_control: FlowControl,
    /// Outbound terminator.
    terminator: Option<Vec<u8>>,
}

// ============================================================================
// LinkConfigBuilder Implementation
// ============================================================================

impl LinkConfigBuilder {
    /// Creates a builder with default line settings for `port`.
    #[inline]
    #[must_use]
    pub fn new(port: impl Into<PortId>) -> Self {
        Self {
            port: port.into(),
            line: LineSettings::default(),
            framing: Framing::default(),
            encoding: OutputEncoding::default(),
            flow_control: FlowControl::default(),
            terminator: None,
        }
    }

    /// Sets the baud rate.
    #[inline]
    #[must_use]
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.line.baud_rate = baud_rate;
        self
    }

    /// Sets the number of data bits.
    #[inline]
    #[must_use]
    pub fn data_bits(mut self, data_bits: u8) -> Self {
        self.line.data_bits = data_bits;
        self
    }

    /// Sets the parity mode.
    #[inline]
    #[must_use]
    pub fn parity(mut self, parity: Parity) -> Self {
        self.line.parity = parity;
        self
    }

    /// Sets the number of stop bits.
    #[inline]
    #[must_use]
    pub fn stop_bits(mut self, stop_bits: u8) -> Self {
        self.line.stop_bits = stop_bits;
        self
    }

    /// Replaces all line settings at once.
    #[inline]
    #[must_use]
    pub fn line(mut self, line: LineSettings) -> Self {
        self.line = line;
        self
    }

    /// Sets the inbound framing rule.
    #[inline]
    #[must_use]
    pub fn framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    /// Sets the inbound frame encoding.
    #[inline]
    #[must_use]
    pub fn encoding(mut self, encoding: OutputEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Sets the direction-control discipline.
    #[inline]
    #[must_use]
    pub fn flow_control(mut self, flow_control: FlowControl) -> Self {
        self.flow_control = flow_control;
        self
    }

    /// Appends raw `bytes` to every outbound payload.
    #[inline]
    #[must_use]
    pub fn terminator(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.terminator = Some(bytes.into());
        self
    }

    /// Appends an escaped terminator string (`\r\n` etc.) to every outbound payload.
    #[inline]
    #[must_use]
    pub fn terminator_escaped(self, escaped: &str) -> Self {
        self.terminator(unescape(escaped))
    }

    /// Builds the configuration with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the port is empty
    /// - [`Error::Config`] if line settings are out of range
    pub fn build(self) -> Result<LinkConfig> {
        self.validate_port()?;
        self.line.validate()?;

        Ok(LinkConfig {
            port: self.port,
            line: self.line,
            framing: self.framing.normalized(),
            encoding: self.encoding,
            flow_control: self.flow_control,
            terminator: self.terminator.filter(|t| !t.is_empty()),
        })
    }
}

// ============================================================================
// Validation
// ============================================================================

impl LinkConfigBuilder {
    /// Validates the port identifier.
    fn validate_port(&self) -> Result<()> {
        if self.port.as_str().trim().is_empty() {
            return Err(Error::config(
                "Serial port is required.\n\
                 Example: LinkConfig::builder(\"/dev/ttyUSB0\")",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::config::ControlSignal;

    #[test]
    fn test_defaults() {
        let config = LinkConfig::builder("/dev/ttyUSB0").build().unwrap();
        assert_eq!(config.line.baud_rate, 57_600);
        assert_eq!(config.line.data_bits, 8);
        assert_eq!(config.line.parity, Parity::None);
        assert_eq!(config.line.stop_bits, 1);
        assert_eq!(config.framing, Framing::Delimiter(b'\n'));
        assert_eq!(config.encoding, OutputEncoding::Text);
        assert!(config.flow_control.is_none());
        assert!(config.terminator.is_none());
    }

    #[test]
    fn test_setters() {
        let config = LinkConfig::builder("COM1")
            .baud_rate(9600)
            .data_bits(7)
            .parity(Parity::Even)
            .stop_bits(2)
            .framing(Framing::InterByteTimeout(Duration::from_millis(20)))
            .encoding(OutputEncoding::Binary)
            .flow_control(FlowControl::HalfDuplex {
                signal: ControlSignal::Dtr,
                active_high: true,
            })
            .terminator_escaped("\\r\\n")
            .build()
            .unwrap();

        assert_eq!(config.line.to_string(), "9600 7E2");
        assert_eq!(config.terminator.as_deref(), Some(&b"\r\n"[..]));
        assert_eq!(config.encoding, OutputEncoding::Binary);
    }

    #[test]
    fn test_build_fails_without_port() {
        let err = LinkConfig::builder("  ").build().unwrap_err();
        assert!(err.to_string().contains("Serial port is required"));
    }

    #[test]
    fn test_build_fails_with_bad_line() {
        assert!(LinkConfig::builder("COM1").baud_rate(0).build().is_err());
        assert!(LinkConfig::builder("COM1").data_bits(4).build().is_err());
    }

    #[test]
    fn test_build_normalizes_framing() {
        let config = LinkConfig::builder("COM1")
            .framing(Framing::Count(0))
            .build()
            .unwrap();
        assert_eq!(config.framing, Framing::PerByte);
    }

    #[test]
    fn test_empty_terminator_dropped() {
        let config = LinkConfig::builder("COM1").terminator(Vec::new()).build().unwrap();
        assert!(config.terminator.is_none());
    }
}
