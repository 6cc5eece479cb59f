//! Composite (row-type) codec.
//!
//! Binary layout: `{natts: uint32}` then for each attribute
//! `{oid: uint32, length: int32, bytes}` where length `-1` denotes NULL.

use crate::error::{Error, Result};
use crate::protocol::codec::{read_i32, read_u32};
use crate::protocol::types::Oid;
use crate::value::{Composite, Value};

/// Decode one attribute payload (`None` = NULL) of the given type.
pub type AttrBinaryDecode<'a> = &'a dyn Fn(Oid, Option<&[u8]>) -> Result<Value>;
/// Encode one attribute payload (no length prefix). NULL never reaches this.
pub type AttrBinaryEncode<'a> = &'a dyn Fn(Oid, &Value, &mut Vec<u8>) -> Result<()>;

pub fn from_binary(bytes: &[u8], decode_attr: AttrBinaryDecode<'_>) -> Result<Composite> {
    let (natts, mut rest) = read_u32(bytes)?;

    let mut attrs = Vec::with_capacity(natts as usize);
    for _ in 0..natts {
        let (oid, r) = read_u32(rest)?;
        let (len, r) = read_i32(r)?;
        if len == -1 {
            attrs.push((oid, decode_attr(oid, None)?));
            rest = r;
        } else {
            let len = len as usize;
            if r.len() < len {
                return Err(Error::Decode("composite attribute truncated".into()));
            }
            attrs.push((oid, decode_attr(oid, Some(&r[..len]))?));
            rest = &r[len..];
        }
    }

    Ok(Composite { attrs })
}

pub fn to_binary(
    composite: &Composite,
    encode_attr: AttrBinaryEncode<'_>,
    out: &mut Vec<u8>,
) -> Result<()> {
    out.extend_from_slice(&(composite.attrs.len() as u32).to_be_bytes());

    for (oid, value) in &composite.attrs {
        out.extend_from_slice(&oid.to_be_bytes());
        if value.is_null() {
            out.extend_from_slice(&(-1_i32).to_be_bytes());
            continue;
        }
        let len_pos = out.len();
        out.extend_from_slice(&[0, 0, 0, 0]);
        encode_attr(*oid, value, out)?;
        let len = (out.len() - len_pos - 4) as i32;
        out[len_pos..len_pos + 4].copy_from_slice(&len.to_be_bytes());
    }

    Ok(())
}

/// Split the text composite format `(a,,"c d")` into raw attribute strings;
/// an empty field denotes NULL.
pub fn split_text(s: &str) -> Result<Vec<Option<String>>> {
    let bad = |msg: &str| Error::Decode(format!("invalid composite text {:?}: {}", s, msg));

    let inner = s
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| bad("missing parentheses"))?;

    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut was_quoted = false;
    let mut chars = inner.chars().peekable();

    while let Some(c) = chars.next() {
        if quoted {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    current.push('"');
                }
                '"' => quoted = false,
                '\\' => match chars.next() {
                    Some(esc) => current.push(esc),
                    None => return Err(bad("dangling escape")),
                },
                other => current.push(other),
            }
            continue;
        }
        match c {
            '"' => {
                quoted = true;
                was_quoted = true;
            }
            ',' => {
                if current.is_empty() && !was_quoted {
                    fields.push(None);
                } else {
                    fields.push(Some(std::mem::take(&mut current)));
                }
                was_quoted = false;
            }
            other => current.push(other),
        }
    }
    if quoted {
        return Err(bad("unterminated quote"));
    }
    if current.is_empty() && !was_quoted {
        if !inner.is_empty() || !fields.is_empty() {
            fields.push(None);
        }
    } else {
        fields.push(Some(current));
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::{self, BaseKind, CodecEnv};
    use crate::protocol::types::{FormatCode, oid};

    fn decode_attr(attr_oid: Oid, bytes: Option<&[u8]>) -> Result<Value> {
        let kind = match attr_oid {
            oid::INT4 => BaseKind::Int4,
            oid::TEXT => BaseKind::Text,
            _ => BaseKind::Unknown,
        };
        match bytes {
            None => Ok(Value::Null),
            Some(b) => conversion::decode(kind, &CodecEnv::default(), FormatCode::Binary, b),
        }
    }

    fn encode_attr(attr_oid: Oid, value: &Value, out: &mut Vec<u8>) -> Result<()> {
        let kind = match attr_oid {
            oid::INT4 => BaseKind::Int4,
            oid::TEXT => BaseKind::Text,
            _ => BaseKind::Unknown,
        };
        conversion::encode(kind, &CodecEnv::default(), FormatCode::Binary, value, out)
    }

    #[test]
    fn binary_round_trip() {
        let composite = Composite {
            attrs: vec![
                (oid::INT4, Value::Int4(7)),
                (oid::TEXT, Value::Text("hi".into())),
                (oid::INT4, Value::Null),
            ],
        };

        let mut buf = Vec::new();
        to_binary(&composite, &encode_attr, &mut buf).unwrap();
        let back = from_binary(&buf, &decode_attr).unwrap();
        assert_eq!(back, composite);
    }

    #[test]
    fn text_split() {
        let fields = split_text("(1,,\"a,b\",plain)").unwrap();
        assert_eq!(
            fields,
            vec![
                Some("1".to_string()),
                None,
                Some("a,b".to_string()),
                Some("plain".to_string()),
            ]
        );
    }

    #[test]
    fn text_split_quoted_quote() {
        let fields = split_text("(\"he said \"\"hi\"\"\")").unwrap();
        assert_eq!(fields, vec![Some("he said \"hi\"".to_string())]);
    }

    #[test]
    fn text_split_empty_is_null() {
        assert_eq!(split_text("(,)").unwrap(), vec![None, None]);
        // A quoted empty string is an empty string, not NULL.
        assert_eq!(split_text("(\"\")").unwrap(), vec![Some(String::new())]);
    }
}
