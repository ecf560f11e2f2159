//! Link configuration types.
//!
//! A [`LinkConfig`] is immutable once built. The transport parameters in
//! [`LineSettings`] and [`FlowControl`] belong to the shared connection;
//! [`Framing`] and [`OutputEncoding`] belong to each endpoint.
//!
//! # Example
//!
//! ```ignore
//! use rs485_link::{FlowControl, Framing, LinkConfig};
//!
//! let config = LinkConfig::builder("/dev/ttyUSB0")
//!     .baud_rate(9600)
//!     .framing(Framing::Delimiter(b'\n'))
//!     .flow_control("rts-on".parse()?)
//!     .build()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::identifiers::PortId;

use super::builder::LinkConfigBuilder;
use super::escape::parse_delimiter;

// ============================================================================
// Constants
// ============================================================================

/// Default baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 57_600;

/// Default number of data bits.
pub const DEFAULT_DATA_BITS: u8 = 8;

/// Default number of stop bits.
pub const DEFAULT_STOP_BITS: u8 = 1;

// ============================================================================
// Parity
// ============================================================================

/// Parity setting for a serial line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    /// No parity bit.
    #[default]
    None,
    /// Even parity.
    Even,
    /// Odd parity.
    Odd,
}

impl Parity {
    /// Returns the conventional single-letter code (`N`, `E`, `O`).
    #[inline]
    #[must_use]
    pub fn letter(self) -> char {
        match self {
            Self::None => 'N',
            Self::Even => 'E',
            Self::Odd => 'O',
        }
    }
}

impl FromStr for Parity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "even" => Ok(Self::Even),
            "odd" => Ok(Self::Odd),
            other => Err(Error::config(format!("Unknown parity: {other}"))),
        }
    }
}

// ============================================================================
// LineSettings
// ============================================================================

/// Physical line parameters passed to the driver on open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSettings {
    /// Baud rate in bits per second.
    pub baud_rate: u32,
    /// Data bits per character (5..=8).
    pub data_bits: u8,
    /// Parity mode.
    pub parity: Parity,
    /// Stop bits per character (1 or 2).
    pub stop_bits: u8,
}

impl Default for LineSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DEFAULT_DATA_BITS,
            parity: Parity::None,
            stop_bits: DEFAULT_STOP_BITS,
        }
    }
}

impl LineSettings {
    /// Bits on the wire per transmitted character: start + data + parity + stop.
    #[inline]
    #[must_use]
    pub fn bits_per_char(&self) -> u32 {
        let parity = u32::from(self.parity != Parity::None);
        1 + u32::from(self.data_bits) + parity + u32::from(self.stop_bits)
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero baud rate or unsupported
    /// data/stop bit counts.
    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(Error::config("Baud rate must be greater than zero"));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(Error::config(format!(
                "Data bits must be 5-8, got {}",
                self.data_bits
            )));
        }
        if !(1..=2).contains(&self.stop_bits) {
            return Err(Error::config(format!(
                "Stop bits must be 1 or 2, got {}",
                self.stop_bits
            )));
        }
        Ok(())
    }
}

impl fmt::Display for LineSettings {
    /// Formats as `<baud> <databits><parity><stopbits>`, e.g. `9600 8N1`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}{}{}",
            self.baud_rate,
            self.data_bits,
            self.parity.letter(),
            self.stop_bits
        )
    }
}

// ============================================================================
// Flow Control
// ============================================================================

/// Modem control line used as the RS485 driver-enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlSignal {
    /// Request To Send.
    Rts,
    /// Data Terminal Ready.
    Dtr,
}

impl fmt::Display for ControlSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rts => f.write_str("RTS"),
            Self::Dtr => f.write_str("DTR"),
        }
    }
}

/// Direction-control discipline for half-duplex buses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FlowControl {
    /// No direction control.
    #[default]
    None,
    /// Drive `signal` to the transmit level for the duration of each send.
    HalfDuplex {
        /// Line that gates the transceiver.
        signal: ControlSignal,
        /// `true` if the line is high while transmitting.
        active_high: bool,
    },
}

impl FlowControl {
    /// Returns the signal and its level while transmitting.
    #[inline]
    #[must_use]
    pub fn transmit_level(self) -> Option<(ControlSignal, bool)> {
        match self {
            Self::None => None,
            Self::HalfDuplex {
                signal,
                active_high,
            } => Some((signal, active_high)),
        }
    }

    /// Returns the signal and its level while listening.
    #[inline]
    #[must_use]
    pub fn idle_level(self) -> Option<(ControlSignal, bool)> {
        self.transmit_level()
            .map(|(signal, level)| (signal, !level))
    }

    /// Returns `true` if no direction control is configured.
    #[inline]
    #[must_use]
    pub fn is_none(self) -> bool {
        matches!(self, Self::None)
    }
}

impl FromStr for FlowControl {
    type Err = Error;

    /// Parses `none`, `rts-on`, `rts-off`, `dtr-on`, `dtr-off`.
    fn from_str(s: &str) -> Result<Self> {
        let half_duplex = |signal, active_high| {
            Ok(Self::HalfDuplex {
                signal,
                active_high,
            })
        };
        match s.to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "rts-on" => half_duplex(ControlSignal::Rts, true),
            "rts-off" => half_duplex(ControlSignal::Rts, false),
            "dtr-on" => half_duplex(ControlSignal::Dtr, true),
            "dtr-off" => half_duplex(ControlSignal::Dtr, false),
            other => Err(Error::config(format!("Unknown flow control: {other}"))),
        }
    }
}

impl fmt::Display for FlowControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::HalfDuplex {
                signal,
                active_high,
            } => {
                let signal = match signal {
                    ControlSignal::Rts => "rts",
                    ControlSignal::Dtr => "dtr",
                };
                let level = if *active_high { "on" } else { "off" };
                write!(f, "{signal}-{level}")
            }
        }
    }
}

// ============================================================================
// Framing
// ============================================================================

/// Rule that splits the inbound byte stream into frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Frame ends at (and includes) this byte.
    Delimiter(u8),
    /// Frame is exactly this many bytes.
    Count(usize),
    /// Frame ends after this much line silence.
    InterByteTimeout(Duration),
    /// Every byte is its own frame.
    PerByte,
}

impl Default for Framing {
    fn default() -> Self {
        Self::Delimiter(b'\n')
    }
}

impl Framing {
    /// Builds a framing rule from a mode name and its value string.
    ///
    /// Modes: `char` / `byte-delimiter`, `count` / `byte-count`,
    /// `time` / `inter-byte-timeout`. An empty value, a zero count or a
    /// zero timeout selects [`Framing::PerByte`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unknown mode or unparsable value.
    pub fn parse(mode: &str, value: &str) -> Result<Self> {
        if value.is_empty() {
            return Ok(Self::PerByte);
        }

        let framing = match mode {
            "char" | "byte-delimiter" => {
                parse_delimiter(value)?.map_or(Self::PerByte, Self::Delimiter)
            }
            "count" | "byte-count" => {
                let count: usize = value
                    .trim()
                    .parse()
                    .map_err(|_| Error::config(format!("Invalid byte count: {value}")))?;
                Self::Count(count)
            }
            "time" | "inter-byte-timeout" => {
                let millis: u64 = value
                    .trim()
                    .parse()
                    .map_err(|_| Error::config(format!("Invalid timeout: {value}")))?;
                Self::InterByteTimeout(Duration::from_millis(millis))
            }
            other => return Err(Error::config(format!("Unknown framing mode: {other}"))),
        };

        Ok(framing.normalized())
    }

    /// Collapses degenerate values (count 0, zero timeout) to [`Framing::PerByte`].
    #[must_use]
    pub fn normalized(self) -> Self {
        match self {
            Self::Count(0) => Self::PerByte,
            Self::InterByteTimeout(d) if d.is_zero() => Self::PerByte,
            other => other,
        }
    }
}

// ============================================================================
// OutputEncoding
// ============================================================================

/// How decoded frames are handed to consumers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputEncoding {
    /// UTF-8 text (invalid sequences replaced).
    #[default]
    Text,
    /// Raw bytes.
    Binary,
}

// ============================================================================
// LinkConfig
// ============================================================================

/// Complete configuration for one serial endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Port identifier; the pool key.
    pub port: PortId,
    /// Physical line parameters.
    pub line: LineSettings,
    /// Inbound framing rule.
    pub framing: Framing,
    /// Inbound frame encoding.
    pub encoding: OutputEncoding,
    /// Half-duplex direction control.
    pub flow_control: FlowControl,
    /// Bytes appended to every outbound payload.
    pub terminator: Option<Vec<u8>>,
}

impl LinkConfig {
    /// Creates a builder for the given port.
    #[inline]
    #[must_use]
    pub fn builder(port: impl Into<PortId>) -> LinkConfigBuilder {
        LinkConfigBuilder::new(port)
    }

    /// Returns `true` if `other` would open the port with identical
    /// transport parameters.
    #[inline]
    #[must_use]
    pub fn same_transport(&self, other: &Self) -> bool {
        self.line == other.line && self.flow_control == other.flow_control
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_per_char() {
        let mut line = LineSettings::default();
        assert_eq!(line.bits_per_char(), 10);

        line.parity = Parity::Even;
        assert_eq!(line.bits_per_char(), 11);

        line.stop_bits = 2;
        line.data_bits = 7;
        assert_eq!(line.bits_per_char(), 11);
    }

    #[test]
    fn test_line_display() {
        let line = LineSettings {
            baud_rate: 9600,
            data_bits: 7,
            parity: Parity::Odd,
            stop_bits: 2,
        };
        assert_eq!(line.to_string(), "9600 7O2");
    }

    #[test]
    fn test_line_validate() {
        assert!(LineSettings::default().validate().is_ok());

        let zero_baud = LineSettings {
            baud_rate: 0,
            ..Default::default()
        };
        assert!(zero_baud.validate().is_err());

        let nine_bits = LineSettings {
            data_bits: 9,
            ..Default::default()
        };
        assert!(nine_bits.validate().is_err());

        let three_stop = LineSettings {
            stop_bits: 3,
            ..Default::default()
        };
        assert!(three_stop.validate().is_err());
    }

    #[test]
    fn test_flow_control_parse() {
        assert_eq!("none".parse::<FlowControl>().unwrap(), FlowControl::None);
        assert_eq!(
            "rts-on".parse::<FlowControl>().unwrap(),
            FlowControl::HalfDuplex {
                signal: ControlSignal::Rts,
                active_high: true
            }
        );
        assert_eq!(
            "DTR-OFF".parse::<FlowControl>().unwrap(),
            FlowControl::HalfDuplex {
                signal: ControlSignal::Dtr,
                active_high: false
            }
        );
        assert!("xon".parse::<FlowControl>().is_err());
    }

    #[test]
    fn test_flow_control_levels() {
        let rts_off: FlowControl = "rts-off".parse().unwrap();
        assert_eq!(rts_off.transmit_level(), Some((ControlSignal::Rts, false)));
        assert_eq!(rts_off.idle_level(), Some((ControlSignal::Rts, true)));
        assert_eq!(rts_off.to_string(), "rts-off");
        assert_eq!(FlowControl::None.idle_level(), None);
    }

    #[test]
    fn test_framing_parse_modes() {
        assert_eq!(Framing::parse("char", "\\n").unwrap(), Framing::Delimiter(b'\n'));
        assert_eq!(Framing::parse("char", "0x03").unwrap(), Framing::Delimiter(0x03));
        assert_eq!(Framing::parse("count", "8").unwrap(), Framing::Count(8));
        assert_eq!(
            Framing::parse("time", "50").unwrap(),
            Framing::InterByteTimeout(Duration::from_millis(50))
        );
        assert_eq!(
            Framing::parse("inter-byte-timeout", "5").unwrap(),
            Framing::InterByteTimeout(Duration::from_millis(5))
        );
    }

    #[test]
    fn test_framing_parse_degenerate_values() {
        assert_eq!(Framing::parse("char", "").unwrap(), Framing::PerByte);
        assert_eq!(Framing::parse("count", "0").unwrap(), Framing::PerByte);
        assert_eq!(Framing::parse("time", "").unwrap(), Framing::PerByte);
        assert_eq!(Framing::parse("char", "0").unwrap(), Framing::Delimiter(b'0'));
    }

    #[test]
    fn test_framing_parse_errors() {
        assert!(Framing::parse("count", "many").is_err());
        assert!(Framing::parse("time", "-5").is_err());
        assert!(Framing::parse("slip", "1").is_err());
    }

    #[test]
    fn test_framing_normalized() {
        assert_eq!(Framing::Count(0).normalized(), Framing::PerByte);
        assert_eq!(
            Framing::InterByteTimeout(Duration::ZERO).normalized(),
            Framing::PerByte
        );
        assert_eq!(Framing::Count(4).normalized(), Framing::Count(4));
    }

    #[test]
    fn test_parity_parse() {
        assert_eq!("Even".parse::<Parity>().unwrap(), Parity::Even);
        assert_eq!("".parse::<Parity>().unwrap(), Parity::None);
        assert!("mark".parse::<Parity>().is_err());
    }
}
