//! Boolean, integer, and float codecs.

use crate::error::{Error, Result};
use crate::value::Value;

pub fn bool_from_binary(bytes: &[u8]) -> Result<bool> {
    if bytes.len() != 1 {
        return Err(Error::Decode(format!(
            "invalid boolean length: {}",
            bytes.len()
        )));
    }
    Ok(bytes[0] != 0)
}

pub fn bool_from_text(s: &str) -> Result<bool> {
    match s {
        "t" | "true" | "TRUE" | "T" | "1" => Ok(true),
        "f" | "false" | "FALSE" | "F" | "0" => Ok(false),
        _ => Err(Error::Decode(format!("invalid boolean: {:?}", s))),
    }
}

pub fn i16_from_binary(bytes: &[u8]) -> Result<i16> {
    let arr: [u8; 2] = bytes
        .try_into()
        .map_err(|_| Error::Decode(format!("invalid int2 length: {}", bytes.len())))?;
    Ok(i16::from_be_bytes(arr))
}

pub fn i32_from_binary(bytes: &[u8]) -> Result<i32> {
    let arr: [u8; 4] = bytes
        .try_into()
        .map_err(|_| Error::Decode(format!("invalid int4 length: {}", bytes.len())))?;
    Ok(i32::from_be_bytes(arr))
}

pub fn i64_from_binary(bytes: &[u8]) -> Result<i64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::Decode(format!("invalid int8 length: {}", bytes.len())))?;
    Ok(i64::from_be_bytes(arr))
}

pub fn u32_from_binary(bytes: &[u8]) -> Result<u32> {
    let arr: [u8; 4] = bytes
        .try_into()
        .map_err(|_| Error::Decode(format!("invalid oid length: {}", bytes.len())))?;
    Ok(u32::from_be_bytes(arr))
}

pub fn f32_from_binary(bytes: &[u8]) -> Result<f32> {
    let arr: [u8; 4] = bytes
        .try_into()
        .map_err(|_| Error::Decode(format!("invalid float4 length: {}", bytes.len())))?;
    Ok(f32::from_be_bytes(arr))
}

pub fn f64_from_binary(bytes: &[u8]) -> Result<f64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::Decode(format!("invalid float8 length: {}", bytes.len())))?;
    Ok(f64::from_be_bytes(arr))
}

pub fn parse_int<T: std::str::FromStr>(s: &str, type_name: &str) -> Result<T> {
    s.parse()
        .map_err(|_| Error::Decode(format!("invalid {}: {:?}", type_name, s)))
}

pub fn f32_from_text(s: &str) -> Result<f32> {
    match s {
        "NaN" => Ok(f32::NAN),
        "Infinity" => Ok(f32::INFINITY),
        "-Infinity" => Ok(f32::NEG_INFINITY),
        _ => s
            .parse()
            .map_err(|e| Error::Decode(format!("invalid float4: {}", e))),
    }
}

pub fn f64_from_text(s: &str) -> Result<f64> {
    match s {
        "NaN" => Ok(f64::NAN),
        "Infinity" => Ok(f64::INFINITY),
        "-Infinity" => Ok(f64::NEG_INFINITY),
        _ => s
            .parse()
            .map_err(|e| Error::Decode(format!("invalid float8: {}", e))),
    }
}

/// Render a float in PostgreSQL's text spelling of the special values.
pub fn render_float(v: f64) -> String {
    if v.is_nan() {
        "NaN".into()
    } else if v == f64::INFINITY {
        "Infinity".into()
    } else if v == f64::NEG_INFINITY {
        "-Infinity".into()
    } else {
        v.to_string()
    }
}

fn int_value(value: &Value) -> Result<i64> {
    value.as_i64().ok_or_else(|| {
        Error::Decode(format!(
            "cannot encode {} as an integer type",
            value.type_name()
        ))
    })
}

/// Encode an integer value to the target width (2, 4, or 8 bytes) with a
/// range check. Narrowing overflow raises a parameter-range error.
pub fn int_to_binary(value: &Value, width: usize, out: &mut Vec<u8>) -> Result<()> {
    let v = int_value(value)?;
    match width {
        2 => {
            let v = i16::try_from(v)
                .map_err(|_| Error::Decode(format!("value {} out of range for int2", v)))?;
            out.extend_from_slice(&v.to_be_bytes());
        }
        4 => {
            let v = i32::try_from(v)
                .map_err(|_| Error::Decode(format!("value {} out of range for int4", v)))?;
            out.extend_from_slice(&v.to_be_bytes());
        }
        8 => out.extend_from_slice(&v.to_be_bytes()),
        _ => return Err(Error::Decode(format!("invalid integer width: {}", width))),
    }
    Ok(())
}

pub fn bool_to_binary(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Bool(b) => {
            out.push(if *b { 1 } else { 0 });
            Ok(())
        }
        other => Err(Error::Decode(format!(
            "cannot encode {} as bool",
            other.type_name()
        ))),
    }
}

pub fn oid_to_binary(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    let v = match value {
        Value::Oid(v) => *v,
        other => {
            let v = int_value(other)?;
            u32::try_from(v)
                .map_err(|_| Error::Decode(format!("value {} out of range for oid", v)))?
        }
    };
    out.extend_from_slice(&v.to_be_bytes());
    Ok(())
}

pub fn f32_to_binary(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    let v = match value {
        Value::Float4(v) => *v,
        Value::Float8(v) => *v as f32,
        other => {
            return Err(Error::Decode(format!(
                "cannot encode {} as float4",
                other.type_name()
            )));
        }
    };
    out.extend_from_slice(&v.to_be_bytes());
    Ok(())
}

pub fn f64_to_binary(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    let v = match value {
        Value::Float4(v) => *v as f64,
        Value::Float8(v) => *v,
        other => {
            return Err(Error::Decode(format!(
                "cannot encode {} as float8",
                other.type_name()
            )));
        }
    };
    out.extend_from_slice(&v.to_be_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_text_spellings() {
        assert!(bool_from_text("t").unwrap());
        assert!(bool_from_text("true").unwrap());
        assert!(!bool_from_text("f").unwrap());
        assert!(bool_from_text("yes").is_err());
    }

    #[test]
    fn int_binary_round_trip() {
        assert_eq!(i32_from_binary(&[0, 0, 0x30, 0x39]).unwrap(), 12345);
        assert_eq!(i16_from_binary(&[0xFF, 0xFF]).unwrap(), -1);
        assert!(i64_from_binary(&[0; 4]).is_err());
    }

    #[test]
    fn widening_encode() {
        let mut buf = Vec::new();
        int_to_binary(&Value::Int2(42), 8, &mut buf).unwrap();
        assert_eq!(buf, 42_i64.to_be_bytes());
    }

    #[test]
    fn narrowing_overflow() {
        let mut buf = Vec::new();
        assert!(int_to_binary(&Value::Int8(1 << 33), 4, &mut buf).is_err());
        assert!(int_to_binary(&Value::Int4(40000), 2, &mut buf).is_err());
    }

    #[test]
    fn float_specials_text() {
        assert!(f64_from_text("NaN").unwrap().is_nan());
        assert_eq!(f64_from_text("Infinity").unwrap(), f64::INFINITY);
        assert_eq!(render_float(f64::NEG_INFINITY), "-Infinity");
    }
}
