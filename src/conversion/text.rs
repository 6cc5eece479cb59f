//! Character data and bytea codecs.
//!
//! Character data travels in the session's `client_encoding`; the driver
//! negotiates UTF8 and validates with simdutf8. bytea text format is the
//! `\x`-prefixed hex escape form.

use crate::error::{Error, Result};
use crate::value::Value;

pub fn string_from_binary(bytes: &[u8]) -> Result<String> {
    simdutf8::compat::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| Error::Decode(format!("invalid UTF-8: {}", e)))
}

/// `"char"` is a single octet; values above 0x7F pass through as a
/// one-byte string lossily.
pub fn char_from_binary(bytes: &[u8]) -> Result<String> {
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

pub fn string_to_binary(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Text(s) => {
            out.extend_from_slice(s.as_bytes());
            Ok(())
        }
        other => Err(Error::Decode(format!(
            "cannot encode {} as text",
            other.type_name()
        ))),
    }
}

pub fn bytea_to_binary(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Bytea(b) => {
            out.extend_from_slice(b);
            Ok(())
        }
        Value::Text(s) => {
            out.extend_from_slice(s.as_bytes());
            Ok(())
        }
        other => Err(Error::Decode(format!(
            "cannot encode {} as bytea",
            other.type_name()
        ))),
    }
}

/// Decode bytea text format: `\x` followed by hex digits. The legacy octal
/// escape format is not produced by supported servers.
pub fn bytea_from_text(s: &str) -> Result<Vec<u8>> {
    let Some(hex) = s.strip_prefix("\\x") else {
        return Err(Error::Decode("bytea text value missing \\x prefix".into()));
    };
    decode_hex(hex.as_bytes())
}

/// Render bytea in the `\x` hex escape format.
pub fn bytea_to_text(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

fn decode_hex(hex: &[u8]) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(Error::Decode("invalid hex length".into()));
    }

    let mut result = Vec::with_capacity(hex.len() / 2);
    for chunk in hex.chunks(2) {
        let high = hex_digit(chunk[0])?;
        let low = hex_digit(chunk[1])?;
        result.push((high << 4) | low);
    }
    Ok(result)
}

fn hex_digit(b: u8) -> Result<u8> {
    match b {
        b'0'..=b'9' => Ok(b - b'0'),
        b'a'..=b'f' => Ok(b - b'a' + 10),
        b'A'..=b'F' => Ok(b - b'A' + 10),
        _ => Err(Error::Decode(format!("invalid hex digit: {}", b as char))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytea_hex_round_trip() {
        let bytes = vec![0xDE, 0xAD, 0xBE, 0xEF];
        let text = bytea_to_text(&bytes);
        assert_eq!(text, "\\xdeadbeef");
        assert_eq!(bytea_from_text(&text).unwrap(), bytes);
        assert_eq!(bytea_from_text("\\xDEADBEEF").unwrap(), bytes);
    }

    #[test]
    fn bytea_rejects_bad_hex() {
        assert!(bytea_from_text("deadbeef").is_err());
        assert!(bytea_from_text("\\xzz").is_err());
        assert!(bytea_from_text("\\xabc").is_err());
    }

    #[test]
    fn utf8_validated() {
        assert!(string_from_binary(&[0xFF, 0xFE]).is_err());
        assert_eq!(string_from_binary("héllo".as_bytes()).unwrap(), "héllo");
    }
}
