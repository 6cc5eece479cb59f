//! Result rows.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid};
use crate::value::Value;

/// Metadata for one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name from the row description
    pub name: String,
    /// Type OID
    pub type_oid: Oid,
    /// Wire format the column was requested in
    pub format: FormatCode,
}

/// An ordered sequence of typed values with column-name lookup.
///
/// Names map to indices; indices are authoritative (duplicate names resolve
/// to the first match). NULL columns hold [`Value::Null`].
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[Column]>,
    values: Vec<Value>,
}

impl Row {
    pub(crate) fn new(columns: Arc<[Column]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Shared column metadata.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Value at a positional index.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Index of the first column with the given name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Value of the first column with the given name.
    pub fn get_named(&self, name: &str) -> Option<&Value> {
        self.column_index(name).and_then(|i| self.get(i))
    }

    /// All values in order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Consume the row, keeping only the values.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Return a new row with the same schema, mapping each column through
    /// the positional callable at its index. `None` leaves the column
    /// unchanged; extra positions are ignored.
    pub fn transform(&self, callables: &[Option<&dyn Fn(Value) -> Value>]) -> Row {
        let values = self
            .values
            .iter()
            .enumerate()
            .map(|(i, v)| match callables.get(i) {
                Some(Some(f)) => f(v.clone()),
                _ => v.clone(),
            })
            .collect();
        Row {
            columns: Arc::clone(&self.columns),
            values,
        }
    }

    /// Like [`Row::transform`], with callables keyed by column name.
    /// Unknown names are an error.
    pub fn transform_named(&self, callables: &[(&str, &dyn Fn(Value) -> Value)]) -> Result<Row> {
        let mut positional: Vec<Option<&dyn Fn(Value) -> Value>> = vec![None; self.values.len()];
        for (name, f) in callables {
            let index = self
                .column_index(name)
                .ok_or_else(|| Error::InvalidUsage(format!("no such column: {}", name)))?;
            positional[index] = Some(*f);
        }
        Ok(self.transform(&positional))
    }
}

impl std::ops::Index<usize> for Row {
    type Output = Value;

    fn index(&self, index: usize) -> &Value {
        &self.values[index]
    }
}

impl IntoIterator for Row {
    type Item = Value;
    type IntoIter = std::vec::IntoIter<Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Row {
        let columns: Arc<[Column]> = vec![
            Column {
                name: "id".into(),
                type_oid: 23,
                format: FormatCode::Binary,
            },
            Column {
                name: "name".into(),
                type_oid: 25,
                format: FormatCode::Binary,
            },
        ]
        .into();
        Row::new(columns, vec![Value::Int4(7), Value::Text("alice".into())])
    }

    #[test]
    fn name_lookup_maps_to_index() {
        let row = sample();
        assert_eq!(row.column_index("name"), Some(1));
        assert_eq!(row.get_named("id"), Some(&Value::Int4(7)));
        assert!(row.get_named("missing").is_none());
    }

    #[test]
    fn transform_leaves_unmapped_columns() {
        let row = sample();
        let double = |v: Value| match v {
            Value::Int4(n) => Value::Int4(n * 2),
            other => other,
        };
        let out = row.transform(&[Some(&double), None]);
        assert_eq!(out.get(0), Some(&Value::Int4(14)));
        assert_eq!(out.get(1), Some(&Value::Text("alice".into())));
        assert_eq!(out.columns().len(), 2);
    }

    #[test]
    fn transform_named_unknown_column_fails() {
        let row = sample();
        let identity = |v: Value| v;
        assert!(row.transform_named(&[("nope", &identity)]).is_err());

        let upper = |v: Value| match v {
            Value::Text(s) => Value::Text(s.to_uppercase()),
            other => other,
        };
        let out = row.transform_named(&[("name", &upper)]).unwrap();
        assert_eq!(out.get_named("name"), Some(&Value::Text("ALICE".into())));
    }
}
