//! Host-form serial port settings.
//!
//! [`PortSettings`] mirrors the field names a flow editor stores for the
//! shared serial-port configuration node. Numeric fields accept JSON numbers
//! or numeric strings, and missing fields take the documented defaults.
//!
//! # Example
//!
//! ```ignore
//! let settings: PortSettings = serde_json::from_str(r#"{
//!     "serialport": "/dev/ttyUSB0",
//!     "serialbaud": "9600",
//!     "out": "count",
//!     "newline": "8",
//!     "flowcontrol": "rts-on"
//! }"#)?;
//! let config = settings.into_link_config()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

use super::escape::unescape;
use super::link::{
    DEFAULT_BAUD_RATE, DEFAULT_DATA_BITS, DEFAULT_STOP_BITS, Framing, LinkConfig, OutputEncoding,
};

// ============================================================================
// PortSettings
// ============================================================================

/// Serial port settings as stored by the host configuration form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortSettings {
    /// Port identifier.
    pub serialport: String,
    /// Baud rate.
    #[serde(deserialize_with = "loose_number")]
    pub serialbaud: u32,
    /// Data bits.
    #[serde(deserialize_with = "loose_number")]
    pub databits: u8,
    /// Parity: `none`, `even`, `odd`.
    pub parity: String,
    /// Stop bits.
    #[serde(deserialize_with = "loose_number")]
    pub stopbits: u8,
    /// Framing value; meaning depends on `out`. A numeric `0` means none.
    #[serde(deserialize_with = "framing_value")]
    pub newline: String,
    /// Whether `newline` is appended to outbound payloads.
    #[serde(deserialize_with = "loose_bool")]
    pub addchar: bool,
    /// `bin` for binary output, anything else for text.
    pub bin: String,
    /// Framing mode: `char`, `count`, `time`.
    pub out: String,
    /// Flow control: `none`, `rts-on`, `rts-off`, `dtr-on`, `dtr-off`.
    pub flowcontrol: String,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            serialport: String::new(),
            serialbaud: DEFAULT_BAUD_RATE,
            databits: DEFAULT_DATA_BITS,
            parity: "none".into(),
            stopbits: DEFAULT_STOP_BITS,
            newline: "\\n".into(),
            addchar: false,
            bin: "false".into(),
            out: "char".into(),
            flowcontrol: "none".into(),
        }
    }
}

impl PortSettings {
    /// Parses settings from a JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if a field has the wrong shape.
    pub fn from_json(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Returns the configured output encoding.
    #[inline]
    #[must_use]
    pub fn encoding(&self) -> OutputEncoding {
        if self.bin == "bin" {
            OutputEncoding::Binary
        } else {
            OutputEncoding::Text
        }
    }

    /// Converts and validates the settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an empty port, unknown parity,
    /// framing mode or flow control, or out-of-range line settings.
    pub fn into_link_config(self) -> Result<LinkConfig> {
        let framing = Framing::parse(&self.out, &self.newline)?;
        let mut builder = LinkConfig::builder(self.serialport.as_str())
            .baud_rate(or_default(self.serialbaud, DEFAULT_BAUD_RATE))
            .data_bits(or_default(self.databits, DEFAULT_DATA_BITS))
            .parity(self.parity.parse()?)
            .stop_bits(or_default(self.stopbits, DEFAULT_STOP_BITS))
            .framing(framing)
            .encoding(self.encoding())
            .flow_control(self.flowcontrol.parse()?);

        if self.addchar {
            builder = builder.terminator(unescape(&self.newline));
        }

        builder.build()
    }
}

impl TryFrom<PortSettings> for LinkConfig {
    type Error = Error;

    fn try_from(settings: PortSettings) -> Result<Self> {
        settings.into_link_config()
    }
}

// ============================================================================
// Lenient Field Parsers
// ============================================================================

/// Zero means "not set" in the host form.
fn or_default<T: PartialEq + Default>(value: T, default: T) -> T {
    if value == T::default() { default } else { value }
}

/// Accepts a number or numeric string; empty strings and `null` give zero.
fn loose_number<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64> + Default,
{
    let raw = match Value::deserialize(deserializer)? {
        Value::Null => return Ok(T::default()),
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| de::Error::custom(format!("expected unsigned integer, got {n}")))?,
        Value::String(s) if s.trim().is_empty() => return Ok(T::default()),
        Value::String(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| de::Error::custom(format!("expected integer, got {s:?}")))?,
        other => return Err(de::Error::custom(format!("expected integer, got {other}"))),
    };

    T::try_from(raw).map_err(|_| de::Error::custom(format!("integer out of range: {raw}")))
}

/// Accepts a string or a number, rendering numbers as decimal strings.
///
/// The number `0` (unlike the string `"0"`) selects per-byte framing in
/// every mode, so it maps to the empty value.
fn framing_value<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s),
        Value::Number(n) if n.as_f64() == Some(0.0) => Ok(String::new()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(de::Error::custom(format!("expected string, got {other}"))),
    }
}

/// Accepts a bool or the strings `"true"` / `"false"`.
fn loose_bool<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::String(s) => Ok(s == "true"),
        Value::Null => Ok(false),
        other => Err(de::Error::custom(format!("expected bool, got {other}"))),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use serde_json::json;

    use crate::config::{ControlSignal, FlowControl, Parity};

    #[test]
    fn test_defaults_fill_missing_fields() {
        let settings = PortSettings::from_json(json!({ "serialport": "/dev/ttyS0" })).unwrap();
        let config = settings.into_link_config().unwrap();

        assert_eq!(config.line.baud_rate, 57_600);
        assert_eq!(config.line.data_bits, 8);
        assert_eq!(config.line.parity, Parity::None);
        assert_eq!(config.line.stop_bits, 1);
        assert_eq!(config.framing, Framing::Delimiter(b'\n'));
        assert_eq!(config.encoding, OutputEncoding::Text);
        assert!(config.terminator.is_none());
    }

    #[test]
    fn test_numeric_strings_accepted() {
        let settings = PortSettings::from_json(json!({
            "serialport": "COM7",
            "serialbaud": "9600",
            "databits": 7,
            "parity": "even",
            "stopbits": "2",
            "out": "count",
            "newline": 12,
            "bin": "bin",
            "flowcontrol": "dtr-off"
        }))
        .unwrap();
        let config = LinkConfig::try_from(settings).unwrap();

        assert_eq!(config.line.to_string(), "9600 7E2");
        assert_eq!(config.framing, Framing::Count(12));
        assert_eq!(config.encoding, OutputEncoding::Binary);
        assert_eq!(
            config.flow_control,
            FlowControl::HalfDuplex {
                signal: ControlSignal::Dtr,
                active_high: false
            }
        );
    }

    #[test]
    fn test_empty_baud_uses_default() {
        let settings = PortSettings::from_json(json!({
            "serialport": "COM7",
            "serialbaud": ""
        }))
        .unwrap();
        assert_eq!(settings.serialbaud, 0);

        let config = settings.into_link_config().unwrap();
        assert_eq!(config.line.baud_rate, 57_600);
    }

    #[test]
    fn test_addchar_sets_terminator() {
        let settings = PortSettings::from_json(json!({
            "serialport": "COM7",
            "newline": "\\r\\n",
            "addchar": "true"
        }))
        .unwrap();
        let config = settings.into_link_config().unwrap();
        assert_eq!(config.terminator.as_deref(), Some(&b"\r\n"[..]));
        assert_eq!(config.framing, Framing::Delimiter(b'\r'));
    }

    #[test]
    fn test_time_mode() {
        let settings = PortSettings::from_json(json!({
            "serialport": "COM7",
            "out": "time",
            "newline": "25"
        }))
        .unwrap();
        let config = settings.into_link_config().unwrap();
        assert_eq!(
            config.framing,
            Framing::InterByteTimeout(Duration::from_millis(25))
        );
    }

    #[test]
    fn test_numeric_zero_is_per_byte_in_every_mode() {
        for mode in ["char", "count", "time"] {
            let settings = PortSettings::from_json(json!({
                "serialport": "COM7",
                "out": mode,
                "newline": 0
            }))
            .unwrap();
            assert_eq!(settings.newline, "");
            let config = settings.into_link_config().unwrap();
            assert_eq!(config.framing, Framing::PerByte, "mode {mode}");
        }

        let settings = PortSettings::from_json(json!({
            "serialport": "COM7",
            "newline": "0"
        }))
        .unwrap();
        let config = settings.into_link_config().unwrap();
        assert_eq!(config.framing, Framing::Delimiter(b'0'));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let bad_parity = PortSettings {
            serialport: "COM1".into(),
            parity: "mark".into(),
            ..Default::default()
        };
        assert!(bad_parity.into_link_config().is_err());

        let no_port = PortSettings::default();
        assert!(no_port.into_link_config().is_err());

        assert!(PortSettings::from_json(json!({ "serialbaud": "fast" })).is_err());
        assert!(PortSettings::from_json(json!({ "databits": 300 })).is_err());
    }
}
