//! Typed value packing and unpacking for the PostgreSQL wire formats.
//!
//! Every base type the driver understands has a pure pack/unpack pair here,
//! in both the binary and the text wire format. Dispatch is by [`BaseKind`];
//! the type registry maps OIDs onto kinds (and onto array/composite/domain
//! structure) and calls back into this module.

pub mod array;
pub mod composite;
pub mod net;
pub mod numeric;
pub mod primitives;
pub mod temporal;
pub mod text;

use crate::error::{Error, Result};
use crate::protocol::types::FormatCode;
use crate::value::Value;

/// Session settings that codecs depend on, mirrored from `ParameterStatus`
/// before any subsequent decode.
#[derive(Debug, Clone)]
pub struct CodecEnv {
    /// `integer_datetimes`: binary temporal values are 64-bit microseconds
    /// when on, 64-bit float seconds when off. Read once at connection
    /// startup; the representation never changes mid-session.
    pub integer_datetimes: bool,
    /// `client_encoding`; the driver always negotiates UTF8.
    pub client_encoding: String,
    /// `DateStyle`; text-format temporal values are emitted and parsed in
    /// the ISO style.
    pub date_style: String,
    /// `standard_conforming_strings`
    pub standard_conforming_strings: bool,
    /// `server_version`
    pub server_version: String,
}

impl Default for CodecEnv {
    fn default() -> Self {
        Self {
            integer_datetimes: true,
            client_encoding: "UTF8".into(),
            date_style: "ISO, MDY".into(),
            standard_conforming_strings: true,
            server_version: String::new(),
        }
    }
}

/// Base-type codec selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseKind {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
    /// text / varchar / bpchar / json / xml and any other textual type
    Text,
    /// single-byte "char"
    Char,
    Name,
    Bytea,
    Oid,
    Date,
    Time,
    TimeTz,
    Timestamp,
    TimestampTz,
    Interval,
    Inet,
    Cidr,
    Uuid,
    /// jsonb: JSON text behind a one-octet version prefix in binary format
    Jsonb,
    Void,
    /// No known codec; values pass through as text
    Unknown,
}

impl BaseKind {
    /// Whether this driver has a binary send/recv pair for the kind. Types
    /// without one fall back to the text format per statement.
    pub fn has_binary(self) -> bool {
        !matches!(self, BaseKind::Unknown)
    }

    /// Canonical type name for error messages.
    pub fn name(self) -> &'static str {
        match self {
            BaseKind::Bool => "bool",
            BaseKind::Int2 => "int2",
            BaseKind::Int4 => "int4",
            BaseKind::Int8 => "int8",
            BaseKind::Float4 => "float4",
            BaseKind::Float8 => "float8",
            BaseKind::Numeric => "numeric",
            BaseKind::Text => "text",
            BaseKind::Char => "char",
            BaseKind::Name => "name",
            BaseKind::Bytea => "bytea",
            BaseKind::Oid => "oid",
            BaseKind::Date => "date",
            BaseKind::Time => "time",
            BaseKind::TimeTz => "timetz",
            BaseKind::Timestamp => "timestamp",
            BaseKind::TimestampTz => "timestamptz",
            BaseKind::Interval => "interval",
            BaseKind::Inet => "inet",
            BaseKind::Cidr => "cidr",
            BaseKind::Uuid => "uuid",
            BaseKind::Jsonb => "jsonb",
            BaseKind::Void => "void",
            BaseKind::Unknown => "unknown",
        }
    }
}

/// Unpack one non-NULL column value.
pub fn decode(kind: BaseKind, env: &CodecEnv, format: FormatCode, bytes: &[u8]) -> Result<Value> {
    match format {
        FormatCode::Binary => decode_binary(kind, env, bytes),
        FormatCode::Text => {
            let s = simdutf8::compat::from_utf8(bytes)
                .map_err(|e| Error::Decode(format!("invalid UTF-8 in text value: {}", e)))?;
            decode_text(kind, env, s)
        }
    }
}

fn decode_binary(kind: BaseKind, env: &CodecEnv, bytes: &[u8]) -> Result<Value> {
    match kind {
        BaseKind::Bool => primitives::bool_from_binary(bytes).map(Value::Bool),
        BaseKind::Int2 => primitives::i16_from_binary(bytes).map(Value::Int2),
        BaseKind::Int4 => primitives::i32_from_binary(bytes).map(Value::Int4),
        BaseKind::Int8 => primitives::i64_from_binary(bytes).map(Value::Int8),
        BaseKind::Float4 => primitives::f32_from_binary(bytes).map(Value::Float4),
        BaseKind::Float8 => primitives::f64_from_binary(bytes).map(Value::Float8),
        BaseKind::Oid => primitives::u32_from_binary(bytes).map(Value::Oid),
        BaseKind::Numeric => numeric::from_binary(bytes).map(Value::Numeric),
        BaseKind::Text | BaseKind::Name | BaseKind::Unknown => {
            text::string_from_binary(bytes).map(Value::Text)
        }
        BaseKind::Char => text::char_from_binary(bytes).map(Value::Text),
        BaseKind::Bytea => Ok(Value::Bytea(bytes.to_vec())),
        BaseKind::Date => temporal::date_from_binary(bytes).map(Value::Date),
        BaseKind::Time => temporal::time_from_binary(env, bytes).map(Value::Time),
        BaseKind::TimeTz => temporal::timetz_from_binary(env, bytes).map(Value::TimeTz),
        BaseKind::Timestamp => temporal::timestamp_from_binary(env, bytes).map(Value::Timestamp),
        BaseKind::TimestampTz => {
            temporal::timestamp_from_binary(env, bytes).map(Value::TimestampTz)
        }
        BaseKind::Interval => temporal::interval_from_binary(env, bytes).map(Value::Interval),
        BaseKind::Inet => net::from_binary(bytes, false).map(Value::Inet),
        BaseKind::Cidr => net::from_binary(bytes, true).map(Value::Inet),
        BaseKind::Jsonb => match bytes.split_first() {
            Some((&1, rest)) => text::string_from_binary(rest).map(Value::Text),
            Some((&v, _)) => Err(Error::Decode(format!("unknown jsonb version: {}", v))),
            None => Err(Error::Decode("empty jsonb value".into())),
        },
        BaseKind::Void => Ok(Value::Null),
        BaseKind::Uuid => decode_uuid_binary(bytes),
    }
}

fn decode_text(kind: BaseKind, env: &CodecEnv, s: &str) -> Result<Value> {
    match kind {
        BaseKind::Bool => primitives::bool_from_text(s).map(Value::Bool),
        BaseKind::Int2 => primitives::parse_int::<i16>(s, "int2").map(Value::Int2),
        BaseKind::Int4 => primitives::parse_int::<i32>(s, "int4").map(Value::Int4),
        BaseKind::Int8 => primitives::parse_int::<i64>(s, "int8").map(Value::Int8),
        BaseKind::Float4 => primitives::f32_from_text(s).map(Value::Float4),
        BaseKind::Float8 => primitives::f64_from_text(s).map(Value::Float8),
        BaseKind::Oid => primitives::parse_int::<u32>(s, "oid").map(Value::Oid),
        BaseKind::Numeric => numeric::parse_text(s).map(Value::Numeric),
        BaseKind::Text | BaseKind::Name | BaseKind::Char | BaseKind::Jsonb | BaseKind::Unknown => {
            Ok(Value::Text(s.to_string()))
        }
        BaseKind::Bytea => text::bytea_from_text(s).map(Value::Bytea),
        BaseKind::Date => temporal::date_from_text(s).map(Value::Date),
        BaseKind::Time => temporal::time_from_text(s).map(Value::Time),
        BaseKind::TimeTz => temporal::timetz_from_text(s).map(Value::TimeTz),
        BaseKind::Timestamp => temporal::timestamp_from_text(s).map(Value::Timestamp),
        BaseKind::TimestampTz => temporal::timestamp_from_text(s).map(Value::TimestampTz),
        BaseKind::Interval => temporal::interval_from_text(s).map(Value::Interval),
        BaseKind::Inet => net::from_text(s, false).map(Value::Inet),
        BaseKind::Cidr => net::from_text(s, true).map(Value::Inet),
        BaseKind::Void => Ok(Value::Null),
        BaseKind::Uuid => decode_uuid_text(s),
    }
}

/// Pack one non-NULL parameter value, appending the raw payload (no length
/// prefix) to `out`. Integer narrowing outside the target range fails with a
/// range error.
pub fn encode(
    kind: BaseKind,
    env: &CodecEnv,
    format: FormatCode,
    value: &Value,
    out: &mut Vec<u8>,
) -> Result<()> {
    match format {
        FormatCode::Binary => encode_binary(kind, env, value, out),
        FormatCode::Text => {
            let s = encode_text(kind, env, value)?;
            out.extend_from_slice(s.as_bytes());
            Ok(())
        }
    }
}

fn encode_binary(kind: BaseKind, env: &CodecEnv, value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match kind {
        BaseKind::Bool => primitives::bool_to_binary(value, out),
        BaseKind::Int2 => primitives::int_to_binary(value, 2, out),
        BaseKind::Int4 => primitives::int_to_binary(value, 4, out),
        BaseKind::Int8 => primitives::int_to_binary(value, 8, out),
        BaseKind::Float4 => primitives::f32_to_binary(value, out),
        BaseKind::Float8 => primitives::f64_to_binary(value, out),
        BaseKind::Oid => primitives::oid_to_binary(value, out),
        BaseKind::Numeric => numeric::to_binary(value, out),
        BaseKind::Text | BaseKind::Name | BaseKind::Char | BaseKind::Unknown => {
            text::string_to_binary(value, out)
        }
        BaseKind::Bytea => text::bytea_to_binary(value, out),
        BaseKind::Date => temporal::date_to_binary(value, out),
        BaseKind::Time => temporal::time_to_binary(env, value, out),
        BaseKind::TimeTz => temporal::timetz_to_binary(env, value, out),
        BaseKind::Timestamp | BaseKind::TimestampTz => {
            temporal::timestamp_to_binary(env, value, out)
        }
        BaseKind::Interval => temporal::interval_to_binary(env, value, out),
        BaseKind::Inet => net::to_binary(value, false, out),
        BaseKind::Cidr => net::to_binary(value, true, out),
        BaseKind::Jsonb => {
            out.push(1);
            text::string_to_binary(value, out)
        }
        BaseKind::Void => Ok(()),
        BaseKind::Uuid => encode_uuid_binary(value, out),
    }
}

/// Render a value in the text wire format for the given kind.
pub fn encode_text(kind: BaseKind, env: &CodecEnv, value: &Value) -> Result<String> {
    let _ = env;
    match (kind, value) {
        (BaseKind::Bool, Value::Bool(b)) => Ok(if *b { "t" } else { "f" }.into()),
        (_, Value::Int2(v)) => Ok(v.to_string()),
        (_, Value::Int4(v)) => Ok(v.to_string()),
        (_, Value::Int8(v)) => Ok(v.to_string()),
        (_, Value::Oid(v)) => Ok(v.to_string()),
        (_, Value::Float4(v)) => Ok(primitives::render_float(*v as f64)),
        (_, Value::Float8(v)) => Ok(primitives::render_float(*v)),
        (_, Value::Numeric(n)) => Ok(numeric::render_text(n)),
        (_, Value::Text(s)) => Ok(s.clone()),
        (_, Value::Bytea(b)) => Ok(text::bytea_to_text(b)),
        (_, Value::Date(d)) => Ok(temporal::render_date(*d)),
        (_, Value::Time(t)) => Ok(temporal::render_time(*t)),
        (_, Value::TimeTz(t)) => Ok(temporal::render_timetz(*t)),
        (_, Value::Timestamp(ts)) => Ok(temporal::render_timestamp(*ts)),
        (_, Value::TimestampTz(ts)) => Ok(temporal::render_timestamp(*ts)),
        (_, Value::Interval(iv)) => Ok(temporal::render_interval(*iv)),
        (_, Value::Inet(i)) => Ok(net::render_text(i)),
        #[cfg(feature = "with-uuid")]
        (_, Value::Uuid(u)) => Ok(u.to_string()),
        (kind, other) => Err(Error::Decode(format!(
            "cannot render {} as {}",
            other.type_name(),
            kind.name()
        ))),
    }
}

#[cfg(feature = "with-uuid")]
fn decode_uuid_binary(bytes: &[u8]) -> Result<Value> {
    uuid::Uuid::from_slice(bytes)
        .map(Value::Uuid)
        .map_err(|e| Error::Decode(format!("invalid uuid: {}", e)))
}

#[cfg(not(feature = "with-uuid"))]
fn decode_uuid_binary(bytes: &[u8]) -> Result<Value> {
    if bytes.len() != 16 {
        return Err(Error::Decode(format!("invalid uuid length: {}", bytes.len())));
    }
    let mut s = String::with_capacity(36);
    for (i, b) in bytes.iter().enumerate() {
        if matches!(i, 4 | 6 | 8 | 10) {
            s.push('-');
        }
        s.push_str(&format!("{:02x}", b));
    }
    Ok(Value::Text(s))
}

#[cfg(feature = "with-uuid")]
fn decode_uuid_text(s: &str) -> Result<Value> {
    s.parse()
        .map(Value::Uuid)
        .map_err(|e| Error::Decode(format!("invalid uuid: {}", e)))
}

#[cfg(not(feature = "with-uuid"))]
fn decode_uuid_text(s: &str) -> Result<Value> {
    Ok(Value::Text(s.to_string()))
}

#[cfg(feature = "with-uuid")]
fn encode_uuid_binary(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Uuid(u) => {
            out.extend_from_slice(u.as_bytes());
            Ok(())
        }
        Value::Text(s) => {
            let u: uuid::Uuid = s
                .parse()
                .map_err(|e| Error::Decode(format!("invalid uuid: {}", e)))?;
            out.extend_from_slice(u.as_bytes());
            Ok(())
        }
        other => Err(Error::Decode(format!(
            "cannot encode {} as uuid",
            other.type_name()
        ))),
    }
}

#[cfg(not(feature = "with-uuid"))]
fn encode_uuid_binary(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Text(s) => {
            let hex: String = s.chars().filter(|c| *c != '-').collect();
            if hex.len() != 32 {
                return Err(Error::Decode(format!("invalid uuid text: {}", s)));
            }
            for i in 0..16 {
                let byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                    .map_err(|e| Error::Decode(format!("invalid uuid text: {}", e)))?;
                out.push(byte);
            }
            Ok(())
        }
        other => Err(Error::Decode(format!(
            "cannot encode {} as uuid",
            other.type_name()
        ))),
    }
}
