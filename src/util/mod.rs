//! Utility module
//!
//! Helpers for logging and parsing raw radio frames.

use crate::core::{Error, Result};

/// Upper-case hex dump with a space between bytes, as in the radio log
pub fn hex_dump(bytes: &[u8]) -> String {
    let encoded = hex::encode_upper(bytes);
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, pair) in encoded.as_bytes().chunks(2).enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.extend(pair.iter().map(|&c| c as char));
    }
    out
}

/// Parses hex text, ignoring spaces, colons and dashes
pub fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let compact: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':' && *c != '-')
        .collect();
    hex::decode(&compact).map_err(|e| Error::decode(format!("invalid hex '{}': {}", text.trim(), e)))
}
