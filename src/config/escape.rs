//! Escape-sequence handling for delimiter and terminator strings.
//!
//! Host configuration forms carry control characters as two-character
//! escapes (`\n`, `\r`, `\t`, `\0`, `\f`, `\e`). Delimiters may also be
//! given as a hex byte (`0x0D`).

use crate::error::{Error, Result};

/// Expands escape sequences into raw bytes.
///
/// Unknown escapes are kept verbatim, including the backslash.
#[must_use]
pub fn unescape(input: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }

        let byte = match chars.peek() {
            Some('n') => b'\n',
            Some('r') => b'\r',
            Some('t') => b'\t',
            Some('0') => 0x00,
            Some('f') => 0x0C,
            Some('e') => 0x1B,
            Some('\\') => b'\\',
            _ => {
                out.push(b'\\');
                continue;
            }
        };
        chars.next();
        out.push(byte);
    }

    out
}

/// Parses a delimiter value into a single byte.
///
/// Returns `Ok(None)` for an empty value.
///
/// # Errors
///
/// Returns [`Error::Config`] if a `0x` value is not a valid byte.
pub fn parse_delimiter(value: &str) -> Result<Option<u8>> {
    if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        return u8::from_str_radix(hex, 16)
            .map(Some)
            .map_err(|_| Error::config(format!("Invalid hex delimiter: {value}")));
    }

    Ok(unescape(value).first().copied())
}

// ============================================================================
// Tests
// ============================================================================
