//! Wire encoding helpers.
//!
//! Agents speak base64-wrapped JSON. Every envelope, command and output
//! blob crosses the wire as standard (padded) base64 of UTF-8 bytes.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;

use crate::error::EncodingError;

/// Encode a string as base64.
pub fn encode_string(s: &str) -> String {
    STANDARD.encode(s.as_bytes())
}

/// Encode raw bytes as base64.
pub fn encode_bytes(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode base64 into raw bytes. Embedded whitespace is ignored.
pub fn decode_raw(s: &str) -> Result<Vec<u8>, EncodingError> {
    let compact: String = s.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    Ok(STANDARD.decode(compact)?)
}

/// Decode base64 into a UTF-8 string (lossy). Newlines in the payload are kept.
pub fn decode_bytes(s: &str) -> Result<String, EncodingError> {
    let raw = decode_raw(s)?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

/// Decode base64 text, keeping the input verbatim when it is not base64.
pub fn decode_or_raw(s: &str) -> String {
    decode_bytes(s).unwrap_or_else(|_| s.to_string())
}

/// Decode a base64-wrapped JSON document.
pub fn decode_json<T: for<'de> Deserialize<'de>>(body: &[u8]) -> Result<T, EncodingError> {
    let text = String::from_utf8_lossy(body);
    let raw = decode_raw(&text)?;
    Ok(serde_json::from_slice(&raw)?)
}

/// Serde helpers for agent-supplied integers, which arrive as either
/// JSON numbers or numeric strings depending on the implant.
pub mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    fn to_i64(value: Value) -> Option<i64> {
        match value {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            Value::Bool(b) => Some(i64::from(b)),
            _ => None,
        }
    }

    pub fn i64_or_zero<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        Ok(to_i64(Value::deserialize(d)?).unwrap_or(0))
    }

    pub fn opt_i64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        Ok(to_i64(Value::deserialize(d)?))
    }
}
