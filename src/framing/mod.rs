//! Inbound stream framing.
//!
//! Turns the raw byte stream of a shared connection into discrete messages.
//!
//! # Modes
//!
//! | [`Framing`] | Frame boundary |
//! |-------------|----------------|
//! | `Delimiter(b)` | After byte `b` (included), or when the buffer fills |
//! | `Count(n)` | Every `n` bytes; never short |
//! | `InterByteTimeout(d)` | After `d` of silence |
//! | `PerByte` | Every byte |
//!
//! [`Framing`]: crate::config::Framing

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;

use crate::config::OutputEncoding;

// ============================================================================
// Submodules
// ============================================================================

/// Per-endpoint frame decoder.
pub mod decoder;

// ============================================================================
// Re-exports
// ============================================================================

pub use decoder::{DEFAULT_CAPACITY, DecodeBuffer, FrameDecoder};

// ============================================================================
// Frame
// ============================================================================

/// A complete frame cut from the inbound stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame bytes.
    bytes: Vec<u8>,
}

impl Frame {
    /// Wraps frame bytes.
    #[inline]
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Returns the frame bytes.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the frame length.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` if the frame has no bytes.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Converts the frame for delivery.
    #[must_use]
    pub fn into_payload(self, encoding: OutputEncoding) -> Payload {
        match encoding {
            OutputEncoding::Binary => Payload::Binary(self.bytes),
            OutputEncoding::Text => match String::from_utf8(self.bytes) {
                Ok(text) => Payload::Text(text),
                Err(e) => Payload::Text(String::from_utf8_lossy(e.as_bytes()).into_owned()),
            },
        }
    }
}

// ============================================================================
// Payload
// ============================================================================

/// Decoded frame as delivered to an inbound consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// Text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

impl Payload {
    /// Returns the payload as bytes.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    /// Returns the text, if this is a text payload.
    #[inline]
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_payload() {
        let payload = Frame::new(b"OK\r\n".to_vec()).into_payload(OutputEncoding::Text);
        assert_eq!(payload, Payload::Text("OK\r\n".into()));
        assert_eq!(payload.as_text(), Some("OK\r\n"));
    }

    #[test]
    fn test_binary_payload() {
        let payload = Frame::new(vec![0x01, 0xFF]).into_payload(OutputEncoding::Binary);
        assert_eq!(payload, Payload::Binary(vec![0x01, 0xFF]));
        assert!(payload.as_text().is_none());
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let payload = Frame::new(vec![b'a', 0xFF]).into_payload(OutputEncoding::Text);
        assert_eq!(payload.as_text(), Some("a\u{FFFD}"));
    }

    #[test]
    fn test_payload_serializes_untagged() {
        let json = serde_json::to_string(&Payload::Text("hi".into())).unwrap();
        assert_eq!(json, "\"hi\"");
        let json = serde_json::to_string(&Payload::Binary(vec![1, 2])).unwrap();
        assert_eq!(json, "[1,2]");
    }
}
