//! Array codec.
//!
//! Binary layout: `{ndim, has_nulls, element_oid}` header, per-dimension
//! `{length, lower_bound}` pairs, then element blobs each prefixed by a
//! 4-byte length (`-1` denotes NULL). Ordering is row-major, leftmost
//! dimension varying slowest.
//!
//! Element conversion is delegated to a callback so the registry can route
//! nested arrays, composites, and domains.

use crate::error::{Error, Result};
use crate::protocol::codec::{read_i32, read_u32};
use crate::protocol::types::Oid;
use crate::value::{Array, ArrayDim, Value};

/// Decode one binary element payload (`None` = NULL).
pub type ElemBinaryDecode<'a> = &'a dyn Fn(Option<&[u8]>) -> Result<Value>;
/// Encode one element payload (no length prefix). NULL never reaches this.
pub type ElemBinaryEncode<'a> = &'a dyn Fn(&Value, &mut Vec<u8>) -> Result<()>;
/// Decode one text element (`None` = NULL).
pub type ElemTextDecode<'a> = &'a dyn Fn(Option<&str>) -> Result<Value>;
/// Render one element as text.
pub type ElemTextEncode<'a> = &'a dyn Fn(&Value) -> Result<String>;

const MAX_DIM: i32 = 6;

pub fn from_binary(bytes: &[u8], decode_elem: ElemBinaryDecode<'_>) -> Result<Array> {
    let (ndim, rest) = read_i32(bytes)?;
    let (_has_nulls, rest) = read_i32(rest)?;
    let (elem_oid, mut rest) = read_u32(rest)?;

    if !(0..=MAX_DIM).contains(&ndim) {
        return Err(Error::Decode(format!("invalid array ndim: {}", ndim)));
    }

    let mut dims = Vec::with_capacity(ndim as usize);
    let mut count: usize = 1;
    for _ in 0..ndim {
        let (len, r) = read_i32(rest)?;
        let (lower, r) = read_i32(r)?;
        if len < 0 {
            return Err(Error::Decode(format!("invalid array dimension: {}", len)));
        }
        count = count.saturating_mul(len as usize);
        dims.push(ArrayDim { len, lower });
        rest = r;
    }
    if ndim == 0 {
        count = 0;
    }

    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        let (len, r) = read_i32(rest)?;
        if len == -1 {
            values.push(decode_elem(None)?);
            rest = r;
        } else {
            let len = len as usize;
            if r.len() < len {
                return Err(Error::Decode("array element truncated".into()));
            }
            values.push(decode_elem(Some(&r[..len]))?);
            rest = &r[len..];
        }
    }

    Ok(Array {
        elem_oid,
        dims,
        values,
    })
}

pub fn to_binary(
    array: &Array,
    elem_oid: Oid,
    encode_elem: ElemBinaryEncode<'_>,
    out: &mut Vec<u8>,
) -> Result<()> {
    let expected: usize = array.dims.iter().map(|d| d.len.max(0) as usize).product();
    let expected = if array.dims.is_empty() { 0 } else { expected };
    if expected != array.values.len() {
        return Err(Error::Decode(format!(
            "array shape {:?} does not match {} element(s)",
            array.shape(),
            array.values.len()
        )));
    }
    if array.dims.len() as i32 > MAX_DIM {
        return Err(Error::Decode(format!(
            "too many array dimensions: {}",
            array.dims.len()
        )));
    }

    let has_nulls = array.values.iter().any(Value::is_null);

    out.extend_from_slice(&(array.dims.len() as i32).to_be_bytes());
    out.extend_from_slice(&(has_nulls as i32).to_be_bytes());
    out.extend_from_slice(&elem_oid.to_be_bytes());
    for dim in &array.dims {
        out.extend_from_slice(&dim.len.to_be_bytes());
        out.extend_from_slice(&dim.lower.to_be_bytes());
    }

    for value in &array.values {
        if value.is_null() {
            out.extend_from_slice(&(-1_i32).to_be_bytes());
            continue;
        }
        let len_pos = out.len();
        out.extend_from_slice(&[0, 0, 0, 0]);
        encode_elem(value, out)?;
        let len = (out.len() - len_pos - 4) as i32;
        out[len_pos..len_pos + 4].copy_from_slice(&len.to_be_bytes());
    }

    Ok(())
}

/// Parse the text array format, e.g. `{1,2,NULL,"a b"}` or `{{1,2},{3,4}}`.
/// An optional dimension-spec prefix (`[1:2]=`) is skipped.
pub fn from_text(s: &str, elem_oid: Oid, decode_elem: ElemTextDecode<'_>) -> Result<Array> {
    let body = match s.find('=') {
        Some(idx) if s.starts_with('[') => &s[idx + 1..],
        _ => s,
    };
    let body = body.trim();

    let mut chars = body.char_indices().peekable();
    // Dimension length observed at each nesting depth, outermost first.
    let mut dim_lens: Vec<Option<i32>> = Vec::new();
    let mut values = Vec::new();
    let mut depth = 0usize;
    let mut counts = Vec::new();

    let bad = |msg: &str| Error::Decode(format!("invalid array text {:?}: {}", s, msg));

    if !body.starts_with('{') {
        return Err(bad("missing opening brace"));
    }

    let bytes = body.as_bytes();
    while let Some((idx, c)) = chars.next() {
        match c {
            '{' => {
                depth += 1;
                if depth > counts.len() {
                    counts.push(0i32);
                    dim_lens.push(None);
                }
                if depth > MAX_DIM as usize {
                    return Err(bad("too many dimensions"));
                }
            }
            '}' => {
                if depth == 0 {
                    return Err(bad("unbalanced braces"));
                }
                match dim_lens[depth - 1] {
                    Some(len) if len != counts[depth - 1] => {
                        return Err(bad("ragged dimensions"));
                    }
                    Some(_) => {}
                    None => dim_lens[depth - 1] = Some(counts[depth - 1]),
                }
                counts[depth - 1] = 0;
                depth -= 1;
                if depth > 0 {
                    counts[depth - 1] += 1;
                }
            }
            ',' | ' ' => {}
            '"' => {
                if depth == 0 {
                    return Err(bad("content outside braces"));
                }
                // Quoted element with backslash escapes.
                let mut elem = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '\\' => match chars.next() {
                            Some((_, esc)) => elem.push(esc),
                            None => return Err(bad("dangling escape")),
                        },
                        '"' => {
                            closed = true;
                            break;
                        }
                        other => elem.push(other),
                    }
                }
                if !closed {
                    return Err(bad("unterminated quote"));
                }
                values.push(decode_elem(Some(&elem))?);
                counts[depth - 1] += 1;
            }
            _ => {
                if depth == 0 {
                    return Err(bad("content outside braces"));
                }
                // Bare element up to the next delimiter.
                let start = idx;
                let mut end = bytes.len();
                while let Some(&(i, c)) = chars.peek() {
                    if matches!(c, ',' | '}') {
                        end = i;
                        break;
                    }
                    chars.next();
                }
                let elem = body[start..end].trim();
                if elem.eq_ignore_ascii_case("NULL") {
                    values.push(decode_elem(None)?);
                } else {
                    values.push(decode_elem(Some(elem))?);
                }
                counts[depth - 1] += 1;
            }
        }
    }

    if depth != 0 {
        return Err(bad("unbalanced braces"));
    }

    let mut dims: Vec<ArrayDim> = dim_lens
        .into_iter()
        .flatten()
        .map(|len| ArrayDim { len, lower: 1 })
        .collect();
    if values.is_empty() {
        dims.clear();
    }

    Ok(Array {
        elem_oid,
        dims,
        values,
    })
}

/// Render the text array format.
pub fn to_text(array: &Array, encode_elem: ElemTextEncode<'_>) -> Result<String> {
    fn needs_quoting(s: &str) -> bool {
        s.is_empty()
            || s.eq_ignore_ascii_case("null")
            || s.contains(['{', '}', ',', '"', '\\', ' '])
    }

    fn render(
        dims: &[ArrayDim],
        values: &[Value],
        encode_elem: ElemTextEncode<'_>,
        out: &mut String,
    ) -> Result<()> {
        out.push('{');
        match dims.len() {
            0 => {}
            1 => {
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    if v.is_null() {
                        out.push_str("NULL");
                    } else {
                        let s = encode_elem(v)?;
                        if needs_quoting(&s) {
                            out.push('"');
                            for c in s.chars() {
                                if matches!(c, '"' | '\\') {
                                    out.push('\\');
                                }
                                out.push(c);
                            }
                            out.push('"');
                        } else {
                            out.push_str(&s);
                        }
                    }
                }
            }
            _ => {
                let chunk: usize = dims[1..].iter().map(|d| d.len.max(0) as usize).product();
                for (i, sub) in values.chunks(chunk.max(1)).enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    render(&dims[1..], sub, encode_elem, out)?;
                }
            }
        }
        out.push('}');
        Ok(())
    }

    let mut out = String::new();
    render(&array.dims, &array.values, encode_elem, &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::{self, BaseKind, CodecEnv};
    use crate::protocol::types::{FormatCode, oid};

    fn int4_decode_binary(bytes: Option<&[u8]>) -> Result<Value> {
        match bytes {
            None => Ok(Value::Null),
            Some(b) => conversion::decode(
                BaseKind::Int4,
                &CodecEnv::default(),
                FormatCode::Binary,
                b,
            ),
        }
    }

    fn int4_encode_binary(value: &Value, out: &mut Vec<u8>) -> Result<()> {
        conversion::encode(
            BaseKind::Int4,
            &CodecEnv::default(),
            FormatCode::Binary,
            value,
            out,
        )
    }

    #[test]
    fn binary_round_trip_2d() {
        let array = Array::from_rows(
            oid::INT4,
            vec![
                vec![Value::Int4(1), Value::Int4(2)],
                vec![Value::Int4(3), Value::Int4(4)],
            ],
        );

        let mut buf = Vec::new();
        to_binary(&array, oid::INT4, &int4_encode_binary, &mut buf).unwrap();
        let back = from_binary(&buf, &int4_decode_binary).unwrap();

        assert_eq!(back.shape(), vec![2, 2]);
        assert_eq!(back, array);
    }

    #[test]
    fn binary_nulls() {
        let array = Array::from_values(oid::INT4, vec![Value::Int4(1), Value::Null]);
        let mut buf = Vec::new();
        to_binary(&array, oid::INT4, &int4_encode_binary, &mut buf).unwrap();
        // has_nulls flag set
        assert_eq!(&buf[4..8], &1_i32.to_be_bytes());
        let back = from_binary(&buf, &int4_decode_binary).unwrap();
        assert_eq!(back.values, vec![Value::Int4(1), Value::Null]);
    }

    #[test]
    fn shape_mismatch_rejected() {
        let mut array = Array::from_values(oid::INT4, vec![Value::Int4(1)]);
        array.dims[0].len = 2;
        let mut buf = Vec::new();
        assert!(to_binary(&array, oid::INT4, &int4_encode_binary, &mut buf).is_err());
    }

    fn text_elem_decode(s: Option<&str>) -> Result<Value> {
        Ok(match s {
            None => Value::Null,
            Some(s) => Value::Text(s.to_string()),
        })
    }

    #[test]
    fn text_parse_flat() {
        let arr = from_text("{1,2,NULL,\"a b\"}", oid::TEXT, &text_elem_decode).unwrap();
        assert_eq!(arr.shape(), vec![4]);
        assert_eq!(
            arr.values,
            vec![
                Value::Text("1".into()),
                Value::Text("2".into()),
                Value::Null,
                Value::Text("a b".into()),
            ]
        );
    }

    #[test]
    fn text_parse_nested() {
        let arr = from_text("{{1,2},{3,4}}", oid::TEXT, &text_elem_decode).unwrap();
        assert_eq!(arr.shape(), vec![2, 2]);
        assert_eq!(arr.values.len(), 4);
    }

    #[test]
    fn text_parse_with_dimension_spec() {
        let arr = from_text("[0:1]={5,6}", oid::TEXT, &text_elem_decode).unwrap();
        assert_eq!(arr.shape(), vec![2]);
    }

    #[test]
    fn text_parse_empty() {
        let arr = from_text("{}", oid::TEXT, &text_elem_decode).unwrap();
        assert!(arr.values.is_empty());
        assert!(arr.dims.is_empty());
    }

    #[test]
    fn text_render_round_trip() {
        let array = Array::from_values(
            oid::TEXT,
            vec![
                Value::Text("plain".into()),
                Value::Text("needs quote".into()),
                Value::Null,
            ],
        );
        let rendered = to_text(&array, &|v| match v {
            Value::Text(s) => Ok(s.clone()),
            _ => unreachable!(),
        })
        .unwrap();
        assert_eq!(rendered, "{plain,\"needs quote\",NULL}");

        let back = from_text(&rendered, oid::TEXT, &text_elem_decode).unwrap();
        assert_eq!(back.values, array.values);
    }

    #[test]
    fn text_rejects_ragged() {
        assert!(from_text("{{1,2},{3}}", oid::TEXT, &text_elem_decode).is_err());
    }
}
