//! Runtime value model.
//!
//! Results decode into [`Value`], a tagged union covering the wire types the
//! driver understands. NULL columns decode to the distinguished
//! [`Value::Null`] sentinel. Temporal values carry the protocol's own units
//! (days or microseconds from the 2000-01-01 epoch) so they round-trip
//! exactly regardless of any calendar library.

use std::net::IpAddr;

use crate::protocol::types::Oid;

/// Sign/class of a [`Numeric`] value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericSign {
    /// >= 0
    Positive,
    /// < 0
    Negative,
    /// Not a number
    NaN,
    /// +Infinity
    PositiveInfinity,
    /// -Infinity
    NegativeInfinity,
}

/// Arbitrary-precision decimal in PostgreSQL's base-10000 representation.
///
/// `digits` are base-10000 digits, most significant first; `weight` is the
/// position of the first digit relative to the decimal point (in units of
/// four decimal digits); `dscale` is the display scale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Numeric {
    /// Sign or special class
    pub sign: NumericSign,
    /// Position of the first digit group relative to the decimal point
    pub weight: i16,
    /// Display scale (fractional decimal digits)
    pub dscale: u16,
    /// Base-10000 digit groups, most significant first
    pub digits: Vec<i16>,
}

impl Numeric {
    /// The value zero.
    pub fn zero() -> Self {
        Self {
            sign: NumericSign::Positive,
            weight: 0,
            dscale: 0,
            digits: Vec::new(),
        }
    }

    /// Not-a-number sentinel.
    pub fn nan() -> Self {
        Self {
            sign: NumericSign::NaN,
            weight: 0,
            dscale: 0,
            digits: Vec::new(),
        }
    }

    /// Returns true for NaN and the infinities.
    pub fn is_special(&self) -> bool {
        !matches!(self.sign, NumericSign::Positive | NumericSign::Negative)
    }

    /// Approximate conversion to f64 (NaN/±Inf map to their float
    /// counterparts).
    pub fn to_f64(&self) -> f64 {
        match self.sign {
            NumericSign::NaN => return f64::NAN,
            NumericSign::PositiveInfinity => return f64::INFINITY,
            NumericSign::NegativeInfinity => return f64::NEG_INFINITY,
            _ => {}
        }
        let mut result = 0.0_f64;
        for (i, &d) in self.digits.iter().enumerate() {
            let power = (self.weight as i32) - (i as i32);
            result += (d as f64) * 10000_f64.powi(power);
        }
        if self.sign == NumericSign::Negative {
            result = -result;
        }
        result
    }
}

/// Days since 2000-01-01.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Date(pub i32);

/// Microseconds since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Time(pub i64);

/// Time of day with a UTC offset (seconds west of UTC, as on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeTz {
    /// Microseconds since midnight
    pub micros: i64,
    /// Seconds west of UTC
    pub offset_secs: i32,
}

/// Microseconds since 2000-01-01 00:00:00 (UTC for `timestamptz`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(pub i64);

/// PostgreSQL interval: months, days, and microseconds are independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interval {
    /// Whole months
    pub months: i32,
    /// Whole days
    pub days: i32,
    /// Microseconds
    pub micros: i64,
}

/// Network address (`inet` or `cidr`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inet {
    /// Address bytes (v4 or v6)
    pub addr: IpAddr,
    /// Prefix length in bits
    pub prefix: u8,
    /// True when the value is a `cidr` network rather than a host address
    pub is_cidr: bool,
}

/// One dimension of an [`Array`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayDim {
    /// Number of elements along this dimension
    pub len: i32,
    /// Lower bound (PostgreSQL arrays default to 1)
    pub lower: i32,
}

/// A (possibly multi-dimensional) array value.
///
/// Elements are stored row-major, leftmost dimension varying slowest.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    /// Element type OID
    pub elem_oid: Oid,
    /// Per-dimension length and lower bound
    pub dims: Vec<ArrayDim>,
    /// Flattened elements in row-major order
    pub values: Vec<Value>,
}

impl Array {
    /// Build a one-dimensional array.
    pub fn from_values(elem_oid: Oid, values: Vec<Value>) -> Self {
        Self {
            elem_oid,
            dims: vec![ArrayDim {
                len: values.len() as i32,
                lower: 1,
            }],
            values,
        }
    }

    /// Build a two-dimensional array from nested rows. Rows must be equal
    /// length; an empty outer vector yields an empty array.
    pub fn from_rows(elem_oid: Oid, rows: Vec<Vec<Value>>) -> Self {
        let inner = rows.first().map(Vec::len).unwrap_or(0);
        let dims = if rows.is_empty() {
            Vec::new()
        } else {
            vec![
                ArrayDim {
                    len: rows.len() as i32,
                    lower: 1,
                },
                ArrayDim {
                    len: inner as i32,
                    lower: 1,
                },
            ]
        };
        Self {
            elem_oid,
            dims,
            values: rows.into_iter().flatten().collect(),
        }
    }

    /// Shape as per-dimension lengths.
    pub fn shape(&self) -> Vec<usize> {
        self.dims.iter().map(|d| d.len as usize).collect()
    }
}

/// A composite (row-typed) value: ordered attributes with their OIDs.
#[derive(Debug, Clone, PartialEq)]
pub struct Composite {
    /// Attribute type OIDs and values in attribute order
    pub attrs: Vec<(Oid, Value)>,
}

/// A decoded SQL value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL
    Null,
    /// boolean
    Bool(bool),
    /// int2
    Int2(i16),
    /// int4
    Int4(i32),
    /// int8
    Int8(i64),
    /// float4
    Float4(f32),
    /// float8
    Float8(f64),
    /// numeric
    Numeric(Numeric),
    /// text / varchar / bpchar / name / char / json / unknown
    Text(String),
    /// bytea
    Bytea(Vec<u8>),
    /// oid
    Oid(Oid),
    /// date
    Date(Date),
    /// time
    Time(Time),
    /// timetz
    TimeTz(TimeTz),
    /// timestamp
    Timestamp(Timestamp),
    /// timestamptz
    TimestampTz(Timestamp),
    /// interval
    Interval(Interval),
    /// inet / cidr
    Inet(Inet),
    /// any array type
    Array(Array),
    /// composite / record
    Composite(Composite),
    /// uuid
    #[cfg(feature = "with-uuid")]
    Uuid(uuid::Uuid),
}

impl Value {
    /// Returns true for the NULL sentinel.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Variant name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int2(_) => "int2",
            Value::Int4(_) => "int4",
            Value::Int8(_) => "int8",
            Value::Float4(_) => "float4",
            Value::Float8(_) => "float8",
            Value::Numeric(_) => "numeric",
            Value::Text(_) => "text",
            Value::Bytea(_) => "bytea",
            Value::Oid(_) => "oid",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::TimeTz(_) => "timetz",
            Value::Timestamp(_) => "timestamp",
            Value::TimestampTz(_) => "timestamptz",
            Value::Interval(_) => "interval",
            Value::Inet(_) => "inet",
            Value::Array(_) => "array",
            Value::Composite(_) => "composite",
            #[cfg(feature = "with-uuid")]
            Value::Uuid(_) => "uuid",
        }
    }

    /// Widen any integer variant to i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int2(v) => Some(*v as i64),
            Value::Int4(v) => Some(*v as i64),
            Value::Int8(v) => Some(*v),
            Value::Oid(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// int4 view, widening int2 and narrowing checked from int8.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int2(v) => Some(*v as i32),
            Value::Int4(v) => Some(*v),
            Value::Int8(v) => i32::try_from(*v).ok(),
            _ => None,
        }
    }

    /// bool view.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Float view, widening float4.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float4(v) => Some(*v as f64),
            Value::Float8(v) => Some(*v),
            _ => None,
        }
    }

    /// Text view.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Bytes view.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytea(b) => Some(b),
            _ => None,
        }
    }

    /// Array view.
    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int2(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int4(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int8(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float4(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float8(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytea(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

impl From<Array> for Value {
    fn from(v: Array) -> Self {
        Value::Array(v)
    }
}

#[cfg(feature = "with-uuid")]
impl From<uuid::Uuid> for Value {
    fn from(v: uuid::Uuid) -> Self {
        Value::Uuid(v)
    }
}

#[cfg(feature = "with-rust-decimal")]
impl Numeric {
    /// Convert to a `rust_decimal::Decimal`; special values have no
    /// representation there and return `None`.
    pub fn to_decimal(&self) -> Option<rust_decimal::Decimal> {
        if self.is_special() {
            return None;
        }
        crate::conversion::numeric::render_text(self).parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sentinel() {
        assert!(Value::Null.is_null());
        assert!(!Value::Int4(0).is_null());
        assert_eq!(Value::from(Option::<i32>::None), Value::Null);
        assert_eq!(Value::from(Some(3_i32)), Value::Int4(3));
    }

    #[test]
    fn integer_widening() {
        assert_eq!(Value::Int2(7).as_i64(), Some(7));
        assert_eq!(Value::Int8(1 << 40).as_i32(), None);
        assert_eq!(Value::Int8(12).as_i32(), Some(12));
    }

    #[test]
    fn array_shape() {
        let arr = Array::from_rows(
            23,
            vec![
                vec![Value::Int4(1), Value::Int4(2)],
                vec![Value::Int4(3), Value::Int4(4)],
            ],
        );
        assert_eq!(arr.shape(), vec![2, 2]);
        assert_eq!(arr.values.len(), 4);
    }

    #[test]
    fn numeric_to_f64_approx() {
        // 123.45 = digits [123, 4500], weight 0, dscale 2
        let n = Numeric {
            sign: NumericSign::Positive,
            weight: 0,
            dscale: 2,
            digits: vec![123, 4500],
        };
        assert!((n.to_f64() - 123.45).abs() < 1e-9);

        assert!(Numeric::nan().to_f64().is_nan());
    }
}
