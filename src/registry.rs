//! Per-type I/O registry.
//!
//! Maps server type OIDs to pack/unpack routines. Well-known OIDs resolve
//! from a built-in table that always covers the types used by the driver's
//! own catalog queries (oid, text, char, bool, name, int2, int4, int8) —
//! resolving a type issues SQL, and those bootstrap codecs break the cycle.
//! Everything else is filled in lazily from `pg_type` by the connection
//! (arrays, composites, and domains recurse into their child OIDs) and
//! cached until the connection closes.

use std::collections::HashMap;
use std::sync::Arc;

use crate::conversion::{self, BaseKind, CodecEnv};
use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid, oid};
use crate::value::{Composite, Value};

/// A user-registered codec for one type.
pub trait UserCodec: Send + Sync {
    /// Unpack a non-NULL value.
    fn decode(&self, env: &CodecEnv, format: FormatCode, bytes: &[u8]) -> Result<Value>;
    /// Pack a non-NULL value (payload only, no length prefix).
    fn encode(
        &self,
        env: &CodecEnv,
        format: FormatCode,
        value: &Value,
        out: &mut Vec<u8>,
    ) -> Result<()>;
    /// Whether the codec implements the binary format.
    fn has_binary(&self) -> bool {
        true
    }
}

/// One attribute of a composite type, in `attnum` order.
#[derive(Debug, Clone)]
pub struct CompositeAttr {
    /// Attribute name
    pub name: String,
    /// Attribute type OID
    pub type_oid: Oid,
}

/// Category of a resolved type.
#[derive(Debug, Clone)]
pub enum TypeKind {
    /// Scalar with a driver codec
    Base(BaseKind),
    /// Array over an element type
    Array {
        /// Element OID
        elem: Oid,
    },
    /// Composite with resolved attributes
    Composite {
        /// Attributes in `attnum` order
        attrs: Vec<CompositeAttr>,
    },
    /// Anonymous record: attribute OIDs travel on the wire
    Record,
    /// Domain, already walked to its leaf base type
    Domain {
        /// Leaf base OID
        base: Oid,
    },
}

/// A resolved type.
#[derive(Debug, Clone)]
pub struct TypeEntry {
    /// Type OID
    pub oid: Oid,
    /// Schema name (`pg_catalog` for builtins)
    pub namespace: String,
    /// Type name
    pub name: String,
    /// Category and structure
    pub kind: TypeKind,
    /// Whether this type (recursively) has a binary send/recv pair on both
    /// sides; without one the type falls back to text format per statement
    pub has_binary: bool,
}

/// OID → codec registry. Owned by a connection and dropped with it.
#[derive(Default)]
pub struct TypeRegistry {
    entries: HashMap<Oid, Arc<TypeEntry>>,
    custom: HashMap<Oid, Arc<dyn UserCodec>>,
    /// Codecs registered by type name, attached to an OID once it resolves.
    custom_by_name: Vec<(String, Arc<dyn UserCodec>)>,
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("entries", &self.entries.len())
            .field("custom", &self.custom.len())
            .finish()
    }
}

fn base(oid: Oid, name: &str, kind: BaseKind) -> TypeEntry {
    TypeEntry {
        oid,
        namespace: "pg_catalog".into(),
        name: name.into(),
        kind: TypeKind::Base(kind),
        has_binary: kind.has_binary(),
    }
}

fn array(oid: Oid, name: &str, elem: Oid) -> TypeEntry {
    TypeEntry {
        oid,
        namespace: "pg_catalog".into(),
        name: name.into(),
        kind: TypeKind::Array { elem },
        has_binary: true,
    }
}

/// Built-in entries for well-known OIDs.
fn builtin(type_oid: Oid) -> Option<TypeEntry> {
    let entry = match type_oid {
        oid::BOOL => base(type_oid, "bool", BaseKind::Bool),
        oid::BYTEA => base(type_oid, "bytea", BaseKind::Bytea),
        oid::CHAR => base(type_oid, "char", BaseKind::Char),
        oid::NAME => base(type_oid, "name", BaseKind::Name),
        oid::INT8 => base(type_oid, "int8", BaseKind::Int8),
        oid::INT2 => base(type_oid, "int2", BaseKind::Int2),
        oid::INT4 => base(type_oid, "int4", BaseKind::Int4),
        oid::TEXT => base(type_oid, "text", BaseKind::Text),
        oid::OID => base(type_oid, "oid", BaseKind::Oid),
        oid::JSON => base(type_oid, "json", BaseKind::Text),
        oid::JSONB => base(type_oid, "jsonb", BaseKind::Jsonb),
        oid::FLOAT4 => base(type_oid, "float4", BaseKind::Float4),
        oid::FLOAT8 => base(type_oid, "float8", BaseKind::Float8),
        oid::UNKNOWN => base(type_oid, "unknown", BaseKind::Unknown),
        oid::INET => base(type_oid, "inet", BaseKind::Inet),
        oid::CIDR => base(type_oid, "cidr", BaseKind::Cidr),
        oid::BPCHAR => base(type_oid, "bpchar", BaseKind::Text),
        oid::VARCHAR => base(type_oid, "varchar", BaseKind::Text),
        oid::DATE => base(type_oid, "date", BaseKind::Date),
        oid::TIME => base(type_oid, "time", BaseKind::Time),
        oid::TIMETZ => base(type_oid, "timetz", BaseKind::TimeTz),
        oid::TIMESTAMP => base(type_oid, "timestamp", BaseKind::Timestamp),
        oid::TIMESTAMPTZ => base(type_oid, "timestamptz", BaseKind::TimestampTz),
        oid::INTERVAL => base(type_oid, "interval", BaseKind::Interval),
        oid::NUMERIC => base(type_oid, "numeric", BaseKind::Numeric),
        oid::UUID => base(type_oid, "uuid", BaseKind::Uuid),
        oid::VOID => base(type_oid, "void", BaseKind::Void),
        oid::RECORD => TypeEntry {
            oid: type_oid,
            namespace: "pg_catalog".into(),
            name: "record".into(),
            kind: TypeKind::Record,
            has_binary: true,
        },
        oid::BOOL_ARRAY => array(type_oid, "_bool", oid::BOOL),
        oid::BYTEA_ARRAY => array(type_oid, "_bytea", oid::BYTEA),
        oid::NAME_ARRAY => array(type_oid, "_name", oid::NAME),
        oid::INT2_ARRAY => array(type_oid, "_int2", oid::INT2),
        oid::INT4_ARRAY => array(type_oid, "_int4", oid::INT4),
        oid::TEXT_ARRAY => array(type_oid, "_text", oid::TEXT),
        oid::INT8_ARRAY => array(type_oid, "_int8", oid::INT8),
        oid::FLOAT4_ARRAY => array(type_oid, "_float4", oid::FLOAT4),
        oid::FLOAT8_ARRAY => array(type_oid, "_float8", oid::FLOAT8),
        oid::NUMERIC_ARRAY => array(type_oid, "_numeric", oid::NUMERIC),
        oid::TIMESTAMP_ARRAY => array(type_oid, "_timestamp", oid::TIMESTAMP),
        _ => return None,
    };
    Some(entry)
}

impl TypeRegistry {
    /// Create a registry seeded with the built-in lookup only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch an entry, falling back to the built-in table.
    pub fn get(&self, type_oid: Oid) -> Option<Arc<TypeEntry>> {
        if let Some(entry) = self.entries.get(&type_oid) {
            return Some(Arc::clone(entry));
        }
        builtin(type_oid).map(Arc::new)
    }

    /// Whether the OID is unresolved and needs a catalog lookup.
    pub fn needs_resolution(&self, type_oid: Oid) -> bool {
        !self.entries.contains_key(&type_oid)
            && !self.custom.contains_key(&type_oid)
            && builtin(type_oid).is_none()
    }

    /// Cache a resolved entry. Attaches any name-registered user codec.
    pub fn insert(&mut self, entry: TypeEntry) {
        if let Some(pos) = self
            .custom_by_name
            .iter()
            .position(|(name, _)| *name == entry.name)
        {
            let (_, codec) = self.custom_by_name.remove(pos);
            self.custom.insert(entry.oid, codec);
        }
        self.entries.insert(entry.oid, Arc::new(entry));
    }

    /// Register a user codec for a specific OID.
    pub fn register(&mut self, type_oid: Oid, codec: Arc<dyn UserCodec>) {
        self.custom.insert(type_oid, codec);
    }

    /// Register a user codec by type name; it takes effect when the name
    /// resolves through the catalog.
    pub fn register_by_name(&mut self, name: &str, codec: Arc<dyn UserCodec>) {
        self.custom_by_name.push((name.to_string(), codec));
    }

    /// Whether values of this type can travel in binary format on both
    /// sides. Unknown OIDs answer false so statements fall back to text.
    pub fn has_binary(&self, type_oid: Oid) -> bool {
        if let Some(codec) = self.custom.get(&type_oid) {
            return codec.has_binary();
        }
        match self.get(type_oid) {
            Some(entry) => match &entry.kind {
                TypeKind::Base(kind) => kind.has_binary(),
                TypeKind::Array { elem } => entry.has_binary && self.has_binary(*elem),
                TypeKind::Composite { attrs } => {
                    entry.has_binary && attrs.iter().all(|a| self.has_binary(a.type_oid))
                }
                TypeKind::Record => true,
                TypeKind::Domain { base } => self.has_binary(*base),
            },
            None => false,
        }
    }

    /// Unpack one column value. `bytes` of `None` decodes to the NULL
    /// sentinel.
    pub fn decode(
        &self,
        type_oid: Oid,
        env: &CodecEnv,
        format: FormatCode,
        bytes: Option<&[u8]>,
    ) -> Result<Value> {
        let Some(bytes) = bytes else {
            return Ok(Value::Null);
        };

        if let Some(codec) = self.custom.get(&type_oid) {
            return codec.decode(env, format, bytes);
        }

        let Some(entry) = self.get(type_oid) else {
            // Unresolved type: pass through as text.
            return conversion::decode(BaseKind::Unknown, env, FormatCode::Text, bytes);
        };

        match &entry.kind {
            TypeKind::Base(kind) => conversion::decode(*kind, env, format, bytes),
            TypeKind::Domain { base } => self.decode(*base, env, format, Some(bytes)),
            TypeKind::Array { elem } => {
                let elem = *elem;
                let array = match format {
                    FormatCode::Binary => conversion::array::from_binary(bytes, &|b| {
                        self.decode(elem, env, FormatCode::Binary, b)
                    })?,
                    FormatCode::Text => {
                        let s = simdutf8::compat::from_utf8(bytes)
                            .map_err(|e| Error::Decode(format!("invalid UTF-8: {}", e)))?;
                        conversion::array::from_text(s, elem, &|t| {
                            self.decode(elem, env, FormatCode::Text, t.map(str::as_bytes))
                        })?
                    }
                };
                Ok(Value::Array(array))
            }
            TypeKind::Record => match format {
                FormatCode::Binary => {
                    let composite = conversion::composite::from_binary(bytes, &|attr_oid, b| {
                        self.decode(attr_oid, env, FormatCode::Binary, b)
                    })?;
                    Ok(Value::Composite(composite))
                }
                FormatCode::Text => {
                    // Attribute types are unknowable from the text form.
                    let s = simdutf8::compat::from_utf8(bytes)
                        .map_err(|e| Error::Decode(format!("invalid UTF-8: {}", e)))?;
                    let fields = conversion::composite::split_text(s)?;
                    Ok(Value::Composite(Composite {
                        attrs: fields
                            .into_iter()
                            .map(|f| {
                                (
                                    oid::UNKNOWN,
                                    f.map(Value::Text).unwrap_or(Value::Null),
                                )
                            })
                            .collect(),
                    }))
                }
            },
            TypeKind::Composite { attrs } => match format {
                FormatCode::Binary => {
                    let composite = conversion::composite::from_binary(bytes, &|attr_oid, b| {
                        self.decode(attr_oid, env, FormatCode::Binary, b)
                    })?;
                    Ok(Value::Composite(composite))
                }
                FormatCode::Text => {
                    let s = simdutf8::compat::from_utf8(bytes)
                        .map_err(|e| Error::Decode(format!("invalid UTF-8: {}", e)))?;
                    let fields = conversion::composite::split_text(s)?;
                    if fields.len() != attrs.len() {
                        return Err(Error::Decode(format!(
                            "composite {} expects {} attribute(s), got {}",
                            entry.name,
                            attrs.len(),
                            fields.len()
                        )));
                    }
                    let mut out = Vec::with_capacity(attrs.len());
                    for (attr, field) in attrs.iter().zip(fields) {
                        let value = self.decode(
                            attr.type_oid,
                            env,
                            FormatCode::Text,
                            field.as_deref().map(str::as_bytes),
                        )?;
                        out.push((attr.type_oid, value));
                    }
                    Ok(Value::Composite(Composite { attrs: out }))
                }
            },
        }
    }

    /// Pack one parameter value as the payload for the given type and
    /// format. Returns `None` for NULL.
    pub fn encode(
        &self,
        type_oid: Oid,
        env: &CodecEnv,
        format: FormatCode,
        value: &Value,
    ) -> Result<Option<Vec<u8>>> {
        if value.is_null() {
            return Ok(None);
        }

        let mut out = Vec::new();
        self.encode_into(type_oid, env, format, value, &mut out)?;
        Ok(Some(out))
    }

    fn encode_into(
        &self,
        type_oid: Oid,
        env: &CodecEnv,
        format: FormatCode,
        value: &Value,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        if let Some(codec) = self.custom.get(&type_oid) {
            return codec.encode(env, format, value, out);
        }

        let Some(entry) = self.get(type_oid) else {
            // Unresolved target: ship the text rendering.
            return conversion::encode(BaseKind::Unknown, env, FormatCode::Text, value, out);
        };

        match &entry.kind {
            TypeKind::Base(kind) => conversion::encode(*kind, env, format, value, out),
            TypeKind::Domain { base } => self.encode_into(*base, env, format, value, out),
            TypeKind::Array { elem } => {
                let elem = *elem;
                let Value::Array(array) = value else {
                    return Err(Error::Decode(format!(
                        "cannot encode {} as {}",
                        value.type_name(),
                        entry.name
                    )));
                };
                match format {
                    FormatCode::Binary => conversion::array::to_binary(
                        array,
                        elem,
                        &|v, buf| self.encode_into(elem, env, FormatCode::Binary, v, buf),
                        out,
                    ),
                    FormatCode::Text => {
                        let s = conversion::array::to_text(array, &|v| {
                            let mut buf = Vec::new();
                            self.encode_into(elem, env, FormatCode::Text, v, &mut buf)?;
                            String::from_utf8(buf)
                                .map_err(|e| Error::Decode(format!("invalid UTF-8: {}", e)))
                        })?;
                        out.extend_from_slice(s.as_bytes());
                        Ok(())
                    }
                }
            }
            TypeKind::Composite { .. } | TypeKind::Record => {
                let Value::Composite(composite) = value else {
                    return Err(Error::Decode(format!(
                        "cannot encode {} as {}",
                        value.type_name(),
                        entry.name
                    )));
                };
                match format {
                    FormatCode::Binary => conversion::composite::to_binary(
                        composite,
                        &|attr_oid, v, buf| {
                            self.encode_into(attr_oid, env, FormatCode::Binary, v, buf)
                        },
                        out,
                    ),
                    FormatCode::Text => Err(Error::Unsupported(
                        "text-format composite parameters".into(),
                    )),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Array;

    #[test]
    fn builtin_bootstrap_types_present() {
        let registry = TypeRegistry::new();
        for type_oid in [
            oid::OID,
            oid::TEXT,
            oid::CHAR,
            oid::BOOL,
            oid::NAME,
            oid::INT2,
            oid::INT4,
            oid::INT8,
        ] {
            assert!(!registry.needs_resolution(type_oid), "oid {}", type_oid);
        }
        assert!(registry.needs_resolution(100_000));
    }

    #[test]
    fn decode_null_is_sentinel() {
        let registry = TypeRegistry::new();
        let env = CodecEnv::default();
        let v = registry
            .decode(oid::INT4, &env, FormatCode::Binary, None)
            .unwrap();
        assert!(v.is_null());
    }

    #[test]
    fn nested_array_round_trip() {
        let registry = TypeRegistry::new();
        let env = CodecEnv::default();
        let array = Array::from_rows(
            oid::INT4,
            vec![
                vec![Value::Int4(1), Value::Int4(2)],
                vec![Value::Int4(3), Value::Int4(4)],
            ],
        );

        let encoded = registry
            .encode(oid::INT4_ARRAY, &env, FormatCode::Binary, &Value::Array(array.clone()))
            .unwrap()
            .unwrap();
        let back = registry
            .decode(oid::INT4_ARRAY, &env, FormatCode::Binary, Some(&encoded))
            .unwrap();
        assert_eq!(back, Value::Array(array));
    }

    #[test]
    fn domain_delegates_to_leaf() {
        let mut registry = TypeRegistry::new();
        registry.insert(TypeEntry {
            oid: 90_001,
            namespace: "public".into(),
            name: "posint".into(),
            kind: TypeKind::Domain { base: oid::INT4 },
            has_binary: true,
        });

        let env = CodecEnv::default();
        let encoded = registry
            .encode(90_001, &env, FormatCode::Binary, &Value::Int4(5))
            .unwrap()
            .unwrap();
        assert_eq!(encoded, 5_i32.to_be_bytes());
        assert_eq!(
            registry
                .decode(90_001, &env, FormatCode::Binary, Some(&encoded))
                .unwrap(),
            Value::Int4(5)
        );
    }

    #[test]
    fn user_codec_overrides() {
        struct Reverse;
        impl UserCodec for Reverse {
            fn decode(&self, _: &CodecEnv, _: FormatCode, bytes: &[u8]) -> Result<Value> {
                Ok(Value::Bytea(bytes.iter().rev().copied().collect()))
            }
            fn encode(
                &self,
                _: &CodecEnv,
                _: FormatCode,
                value: &Value,
                out: &mut Vec<u8>,
            ) -> Result<()> {
                match value {
                    Value::Bytea(b) => {
                        out.extend(b.iter().rev());
                        Ok(())
                    }
                    _ => Err(Error::Decode("expected bytea".into())),
                }
            }
        }

        let mut registry = TypeRegistry::new();
        registry.register(oid::BYTEA, Arc::new(Reverse));

        let env = CodecEnv::default();
        let v = registry
            .decode(oid::BYTEA, &env, FormatCode::Binary, Some(&[1, 2, 3]))
            .unwrap();
        assert_eq!(v, Value::Bytea(vec![3, 2, 1]));
    }

    #[test]
    fn unknown_without_binary() {
        let registry = TypeRegistry::new();
        assert!(!registry.has_binary(oid::UNKNOWN));
        assert!(registry.has_binary(oid::INT4_ARRAY));
    }
}
