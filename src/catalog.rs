//! Catalog queries the driver issues.
//!
//! These SQL texts are part of the driver's external contract: type
//! resolution for the registry, session metadata, settings access,
//! notification channel introspection, advisory locks, and the read-only
//! two-phase-commit probes. A 9.2-minimum server is assumed.

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::protocol::types::{Oid, oid};
use crate::registry::CompositeAttr;
use crate::row::Row;
use crate::value::{Array, Value};

/// `pg_type` facts needed to build a registry entry.
#[derive(Debug, Clone)]
pub struct TypeInfo {
    /// Schema name
    pub namespace: String,
    /// Type name
    pub name: String,
    /// `typtype` category code (`b`, `c`, `d`, `e`, `p`, `r`)
    pub typtype: String,
    /// `typlen` (-1 for varlena)
    pub typlen: i16,
    /// Element OID for array types, else 0
    pub typelem: Oid,
    /// Backing relation for composite types, else 0
    pub typrelid: Oid,
    /// Whether the element type has a binary receive function
    pub elem_has_binary_recv: bool,
    /// Whether the element type has a binary send function
    pub elem_has_binary_send: bool,
}

fn column_text(row: &Row, index: usize) -> Result<String> {
    match row.get(index) {
        Some(Value::Text(s)) => Ok(s.clone()),
        Some(Value::Null) | None => Ok(String::new()),
        Some(other) => Err(Error::Decode(format!(
            "catalog column {}: expected text, got {}",
            index,
            other.type_name()
        ))),
    }
}

fn column_oid(row: &Row, index: usize) -> Result<Oid> {
    match row.get(index) {
        Some(Value::Oid(v)) => Ok(*v),
        Some(v) => v
            .as_i64()
            .and_then(|v| Oid::try_from(v).ok())
            .ok_or_else(|| Error::Decode(format!("catalog column {}: expected oid", index))),
        None => Err(Error::Decode(format!("catalog column {}: missing", index))),
    }
}

fn column_i16(row: &Row, index: usize) -> Result<i16> {
    row.get(index)
        .and_then(|v| v.as_i64())
        .and_then(|v| i16::try_from(v).ok())
        .ok_or_else(|| Error::Decode(format!("catalog column {}: expected int2", index)))
}

fn column_bool(row: &Row, index: usize) -> Result<bool> {
    match row.get(index) {
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::Null) => Ok(false),
        _ => Err(Error::Decode(format!(
            "catalog column {}: expected bool",
            index
        ))),
    }
}

/// Resolve one OID from `pg_type`.
pub fn lookup_type(conn: &mut Connection, type_oid: Oid) -> Result<TypeInfo> {
    const SQL: &str = "SELECT ns.nspname::text, t.typname::text, t.typtype::text, \
                       t.typlen, t.typelem, t.typrelid, \
                       COALESCE(ae.typreceive::oid != 0, false), \
                       COALESCE(ae.typsend::oid != 0, false) \
                       FROM pg_catalog.pg_type t \
                       JOIN pg_catalog.pg_namespace ns ON t.typnamespace = ns.oid \
                       LEFT JOIN pg_catalog.pg_type ae ON t.typelem = ae.oid \
                       WHERE t.oid = $1";

    let outcome = conn.query_once(SQL, &[Value::Oid(type_oid)])?;
    let row = outcome
        .rows
        .first()
        .ok_or_else(|| Error::Decode(format!("no pg_type row for oid {}", type_oid)))?;

    Ok(TypeInfo {
        namespace: column_text(row, 0)?,
        name: column_text(row, 1)?,
        typtype: column_text(row, 2)?,
        typlen: column_i16(row, 3)?,
        typelem: column_oid(row, 4)?,
        typrelid: column_oid(row, 5)?,
        elem_has_binary_recv: column_bool(row, 6)?,
        elem_has_binary_send: column_bool(row, 7)?,
    })
}

/// Attributes of a composite type's backing relation, in `attnum` order.
pub fn lookup_composite(conn: &mut Connection, typrelid: Oid) -> Result<Vec<CompositeAttr>> {
    const SQL: &str = "SELECT a.atttypid, a.attname::text \
                       FROM pg_catalog.pg_attribute a \
                       WHERE a.attrelid = $1 AND a.attnum > 0 AND NOT a.attisdropped \
                       ORDER BY a.attnum";

    let outcome = conn.query_once(SQL, &[Value::Oid(typrelid)])?;
    outcome
        .rows
        .iter()
        .map(|row| {
            Ok(CompositeAttr {
                type_oid: column_oid(row, 0)?,
                name: column_text(row, 1)?,
            })
        })
        .collect()
}

/// Walk a domain's `typbasetype` chain to its leaf base type.
pub fn lookup_basetype_recursive(conn: &mut Connection, type_oid: Oid) -> Result<Oid> {
    const SQL: &str = "WITH RECURSIVE typehier(typid, depth) AS ( \
                       SELECT t.typbasetype, 1 FROM pg_catalog.pg_type t \
                       WHERE t.oid = $1 AND t.typbasetype != 0 \
                       UNION ALL \
                       SELECT t.typbasetype, h.depth + 1 \
                       FROM pg_catalog.pg_type t JOIN typehier h ON t.oid = h.typid \
                       WHERE t.typbasetype != 0 \
                       ) SELECT typid FROM typehier ORDER BY depth DESC LIMIT 1";

    let outcome = conn.query_once(SQL, &[Value::Oid(type_oid)])?;
    let row = outcome
        .rows
        .first()
        .ok_or_else(|| Error::Decode(format!("oid {} is not a domain", type_oid)))?;
    column_oid(row, 0)
}

/// Session facts gathered at connection time.
#[derive(Debug, Clone)]
pub struct StartupData {
    /// `version()` string
    pub version: String,
    /// Backend start time (text form)
    pub backend_start: String,
    /// Client address as seen by the server, if over TCP
    pub client_addr: Option<String>,
    /// Client port as seen by the server, if over TCP
    pub client_port: Option<i32>,
}

/// Fetch version and connection endpoints for this backend.
pub fn startup_data(conn: &mut Connection) -> Result<StartupData> {
    const SQL: &str = "SELECT pg_catalog.version()::text, a.backend_start::text, \
                       a.client_addr::text, a.client_port \
                       FROM pg_catalog.pg_stat_activity a \
                       WHERE a.pid = pg_catalog.pg_backend_pid()";

    let outcome = conn.query_once(SQL, &[])?;
    let row = outcome
        .rows
        .first()
        .ok_or_else(|| Error::Decode("no pg_stat_activity row for this backend".into()))?;

    let client_addr = match row.get(2) {
        Some(Value::Text(s)) => Some(s.clone()),
        _ => None,
    };
    let client_port = row.get(3).and_then(|v| v.as_i32()).filter(|p| *p > 0);

    Ok(StartupData {
        version: column_text(row, 0)?,
        backend_start: column_text(row, 1)?,
        client_addr,
        client_port,
    })
}

/// Read one setting from `pg_settings`.
pub fn setting_get(conn: &mut Connection, name: &str) -> Result<Option<String>> {
    const SQL: &str = "SELECT setting::text FROM pg_catalog.pg_settings WHERE name = $1";
    let outcome = conn.query_once(SQL, &[Value::from(name)])?;
    match outcome.rows.first() {
        Some(row) => Ok(Some(column_text(row, 0)?)),
        None => Ok(None),
    }
}

/// Set one setting for the session.
pub fn setting_set(conn: &mut Connection, name: &str, value: &str) -> Result<()> {
    const SQL: &str = "SELECT pg_catalog.set_config($1, $2, false)";
    conn.query_once(SQL, &[Value::from(name), Value::from(value)])?;
    Ok(())
}

/// Read several settings in one round trip.
pub fn setting_mget(conn: &mut Connection, names: &[&str]) -> Result<Vec<(String, String)>> {
    const SQL: &str = "SELECT name::text, setting::text \
                       FROM pg_catalog.pg_settings WHERE name = ANY($1) ORDER BY name";
    let array = Array::from_values(
        oid::TEXT,
        names.iter().map(|n| Value::from(*n)).collect(),
    );
    let outcome = conn.query_once(SQL, &[Value::Array(array)])?;
    outcome
        .rows
        .iter()
        .map(|row| Ok((column_text(row, 0)?, column_text(row, 1)?)))
        .collect()
}

/// Apply several settings in one round trip.
pub fn setting_update(conn: &mut Connection, pairs: &[(&str, &str)]) -> Result<()> {
    if pairs.is_empty() {
        return Ok(());
    }
    let mut sql = String::from("SELECT ");
    let mut params = Vec::with_capacity(pairs.len() * 2);
    for (i, (name, value)) in pairs.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push_str(&format!(
            "pg_catalog.set_config(${}, ${}, false)",
            i * 2 + 1,
            i * 2 + 2
        ));
        params.push(Value::from(*name));
        params.push(Value::from(*value));
    }
    conn.query_once(&sql, &params)?;
    Ok(())
}

/// Iterate every `pg_settings` row as `(name, setting)`.
pub fn settings_items(conn: &mut Connection) -> Result<Vec<(String, String)>> {
    const SQL: &str =
        "SELECT name::text, setting::text FROM pg_catalog.pg_settings ORDER BY name";
    let outcome = conn.query_once(SQL, &[])?;
    outcome
        .rows
        .iter()
        .map(|row| Ok((column_text(row, 0)?, column_text(row, 1)?)))
        .collect()
}

/// Channels this session is listening on.
pub fn listening_channels(conn: &mut Connection) -> Result<Vec<String>> {
    const SQL: &str = "SELECT pg_catalog.pg_listening_channels()::text";
    let outcome = conn.query_once(SQL, &[])?;
    outcome.rows.iter().map(|row| column_text(row, 0)).collect()
}

/// Send `pg_notify` for every `(channel, payload)` pair in one round trip.
pub fn notify(conn: &mut Connection, pairs: &[(&str, &str)]) -> Result<()> {
    if pairs.is_empty() {
        return Ok(());
    }
    let mut sql = String::from("SELECT ");
    let mut params = Vec::with_capacity(pairs.len() * 2);
    for (i, (channel, payload)) in pairs.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push_str(&format!(
            "pg_catalog.pg_notify(${}, ${})",
            i * 2 + 1,
            i * 2 + 2
        ));
        params.push(Value::from(*channel));
        params.push(Value::from(*payload));
    }
    conn.query_once(&sql, &params)?;
    Ok(())
}

/// Key forms accepted by the advisory-lock functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvisoryKey {
    /// Single 64-bit key
    Int8(i64),
    /// Two 32-bit keys
    Pair(i32, i32),
}

fn advisory_calls(
    function: &str,
    keys: &[AdvisoryKey],
) -> (String, Vec<Value>) {
    let mut sql = String::from("SELECT ");
    let mut params = Vec::new();
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        match key {
            AdvisoryKey::Int8(k) => {
                params.push(Value::Int8(*k));
                sql.push_str(&format!("pg_catalog.{}(${})", function, params.len()));
            }
            AdvisoryKey::Pair(a, b) => {
                params.push(Value::Int4(*a));
                params.push(Value::Int4(*b));
                sql.push_str(&format!(
                    "pg_catalog.{}(${}, ${})",
                    function,
                    params.len() - 1,
                    params.len()
                ));
            }
        }
    }
    (sql, params)
}

/// Acquire session advisory locks (blocking), all keys in one round trip.
pub fn advisory_lock(conn: &mut Connection, keys: &[AdvisoryKey], shared: bool) -> Result<()> {
    if keys.is_empty() {
        return Ok(());
    }
    let function = if shared {
        "pg_advisory_lock_shared"
    } else {
        "pg_advisory_lock"
    };
    let (sql, params) = advisory_calls(function, keys);
    conn.query_once(&sql, &params)?;
    Ok(())
}

/// Try to acquire advisory locks without blocking; one bool per key.
pub fn advisory_try_lock(
    conn: &mut Connection,
    keys: &[AdvisoryKey],
    shared: bool,
) -> Result<Vec<bool>> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }
    let function = if shared {
        "pg_try_advisory_lock_shared"
    } else {
        "pg_try_advisory_lock"
    };
    let (sql, params) = advisory_calls(function, keys);
    let outcome = conn.query_once(&sql, &params)?;
    let row = outcome
        .rows
        .first()
        .ok_or_else(|| Error::Decode("advisory lock call returned no row".into()))?;
    (0..keys.len()).map(|i| column_bool(row, i)).collect()
}

/// Release advisory locks; one bool per key (false if not held).
pub fn advisory_unlock(
    conn: &mut Connection,
    keys: &[AdvisoryKey],
    shared: bool,
) -> Result<Vec<bool>> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }
    let function = if shared {
        "pg_advisory_unlock_shared"
    } else {
        "pg_advisory_unlock"
    };
    let (sql, params) = advisory_calls(function, keys);
    let outcome = conn.query_once(&sql, &params)?;
    let row = outcome
        .rows
        .first()
        .ok_or_else(|| Error::Decode("advisory unlock call returned no row".into()))?;
    (0..keys.len()).map(|i| column_bool(row, i)).collect()
}

/// One row of `pg_prepared_xacts`.
#[derive(Debug, Clone)]
pub struct PreparedXact {
    /// Global transaction identifier
    pub gid: String,
    /// Prepare time (text form)
    pub prepared: String,
    /// Owner role
    pub owner: String,
    /// Database name
    pub database: String,
}

/// Read-only probe over outstanding prepared transactions. Two-phase commit
/// itself is not driven by this crate.
pub fn prepared_xacts(conn: &mut Connection) -> Result<Vec<PreparedXact>> {
    const SQL: &str = "SELECT gid::text, prepared::text, owner::text, database::text \
                       FROM pg_catalog.pg_prepared_xacts ORDER BY prepared";
    let outcome = conn.query_once(SQL, &[])?;
    outcome
        .rows
        .iter()
        .map(|row| {
            Ok(PreparedXact {
                gid: column_text(row, 0)?,
                prepared: column_text(row, 1)?,
                owner: column_text(row, 2)?,
                database: column_text(row, 3)?,
            })
        })
        .collect()
}

/// Whether a prepared transaction with this gid exists.
pub fn xact_is_prepared(conn: &mut Connection, gid: &str) -> Result<bool> {
    const SQL: &str =
        "SELECT EXISTS(SELECT 1 FROM pg_catalog.pg_prepared_xacts WHERE gid = $1)";
    let outcome = conn.query_once(SQL, &[Value::from(gid)])?;
    let row = outcome
        .rows
        .first()
        .ok_or_else(|| Error::Decode("EXISTS query returned no row".into()))?;
    column_bool(row, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advisory_call_rendering() {
        let (sql, params) = advisory_calls(
            "pg_advisory_lock",
            &[AdvisoryKey::Int8(7), AdvisoryKey::Pair(1, 2)],
        );
        assert_eq!(
            sql,
            "SELECT pg_catalog.pg_advisory_lock($1), pg_catalog.pg_advisory_lock($2, $3)"
        );
        assert_eq!(
            params,
            vec![Value::Int8(7), Value::Int4(1), Value::Int4(2)]
        );
    }
}
