//! Raw result rows and decoded records.
//!
//! A [`Row`] is what the executor returns: column names and raw values in
//! result-set order. A [`Record`] is what callers receive: attributes decoded
//! through their scalar type, plus any populated relations as [`Field`]s.

use cms_rs_core::{CmsError, CmsResult};

use crate::metadata::{Attribute, ModelMetadata};
use crate::value::Value;

/// A single database result row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Creates a new row from column names and values.
    ///
    /// # Panics
    ///
    /// Panics if the number of columns does not match the number of values.
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        assert_eq!(
            columns.len(),
            values.len(),
            "Row column count must match value count"
        );
        Self { columns, values }
    }

    /// Returns the column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Iterates over `(column, value)` pairs in result-set order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns `true` if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Gets a typed value by column name.
    ///
    /// # Errors
    ///
    /// Returns an error if the column does not exist or the value cannot be
    /// converted to the requested type.
    pub fn get<T: FromValue>(&self, column: &str) -> CmsResult<T> {
        let value = self.get_value(column).ok_or_else(|| {
            CmsError::DatabaseError(format!("Column '{column}' not found in row"))
        })?;
        T::from_value(value)
    }

    /// Returns a reference to the raw value at the given column name.
    pub fn get_value(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }
}

/// Trait for converting a [`Value`] to a concrete Rust type.
pub trait FromValue: Sized {
    /// Attempts to convert a value reference to this type.
    fn from_value(value: &Value) -> CmsResult<Self>;
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> CmsResult<Self> {
        match value {
            Value::Int(i) => Ok(*i),
            _ => Err(CmsError::DatabaseError(format!(
                "Expected Int, got {value:?}"
            ))),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> CmsResult<Self> {
        match value {
            Value::Float(f) => Ok(*f),
            Value::Int(i) => Ok(*i as f64),
            _ => Err(CmsError::DatabaseError(format!(
                "Expected Float, got {value:?}"
            ))),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> CmsResult<Self> {
        match value {
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            _ => Err(CmsError::DatabaseError(format!(
                "Expected Bool, got {value:?}"
            ))),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> CmsResult<Self> {
        match value {
            Value::String(s) => Ok(s.clone()),
            _ => Err(CmsError::DatabaseError(format!(
                "Expected String, got {value:?}"
            ))),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> CmsResult<Self> {
        Ok(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> CmsResult<Self> {
        match value {
            Value::Null => Ok(None),
            _ => T::from_value(value).map(Some),
        }
    }
}

/// One attribute slot of a [`Record`].
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    /// A scalar value, or a raw relation column.
    Value(Value),
    /// A populated to-one relation.
    One(Option<Box<Record>>),
    /// A populated to-many relation.
    Many(Vec<Record>),
    /// A populated relation in count mode.
    Count(i64),
}

impl Field {
    /// Returns the scalar value, if this is a value slot.
    pub const fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the related record list, if this is a to-many slot.
    pub fn as_many(&self) -> Option<&[Record]> {
        match self {
            Self::Many(records) => Some(records),
            _ => None,
        }
    }

    /// Returns the related record, if this is a populated to-one slot.
    pub fn as_one(&self) -> Option<&Record> {
        match self {
            Self::One(record) => record.as_deref(),
            _ => None,
        }
    }

    /// Returns the count, if this is a count slot.
    pub const fn as_count(&self) -> Option<i64> {
        match self {
            Self::Count(n) => Some(*n),
            _ => None,
        }
    }

    /// Renders the slot as JSON. Counts render as `{"count": n}`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Value(v) => v.to_json(),
            Self::One(Some(record)) => record.to_json(),
            Self::One(None) => serde_json::Value::Null,
            Self::Many(records) => {
                serde_json::Value::Array(records.iter().map(Record::to_json).collect())
            }
            Self::Count(n) => serde_json::json!({ "count": n }),
        }
    }
}

/// A decoded entity: attribute names mapped to [`Field`]s, in column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Field)>,
}

impl Record {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the field with the given name.
    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    /// Returns the scalar value with the given name.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.get(name).and_then(Field::as_value)
    }

    /// Returns the `id` value, if present.
    pub fn id(&self) -> Option<&Value> {
        self.value("id")
    }

    /// Sets a field, replacing any previous value in place.
    pub fn set(&mut self, name: impl Into<String>, field: Field) {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = field,
            None => self.fields.push((name, field)),
        }
    }

    /// Returns a copy of this record with one field set.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, field: Field) -> Self {
        self.set(name, field);
        self
    }

    /// Iterates over `(name, field)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.fields.iter().map(|(n, f)| (n.as_str(), f))
    }

    /// Returns the number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Renders the record as a JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(name, field)| (name.clone(), field.to_json()))
                .collect(),
        )
    }
}

/// Decodes one raw row into a record.
///
/// Columns that do not name an attribute are dropped. Scalar columns are
/// decoded through their type; relation columns that share the attribute
/// name are passed through raw. Component, dynamic-zone and media attributes
/// are not stored as columns and are ignored.
///
/// # Errors
///
/// Returns [`CmsError::InvalidValue`] if a scalar column cannot be decoded.
pub fn from_row(meta: &ModelMetadata, row: &Row) -> CmsResult<Record> {
    let mut record = Record::new();
    for (column, value) in row.iter() {
        match meta.attribute_def(column) {
            Some(Attribute::Scalar(scalar)) => {
                record.set(column, Field::Value(scalar.from_db(value)?));
            }
            Some(Attribute::Relation(_)) => {
                record.set(column, Field::Value(value.clone()));
            }
            _ => {}
        }
    }
    Ok(record)
}

/// Decodes an optional row. `None` maps to `None`.
///
/// # Errors
///
/// See [`from_row`].
pub fn from_optional_row(meta: &ModelMetadata, row: Option<&Row>) -> CmsResult<Option<Record>> {
    row.map(|r| from_row(meta, r)).transpose()
}

/// Decodes every row, preserving order.
///
/// # Errors
///
/// See [`from_row`].
pub fn from_rows(meta: &ModelMetadata, rows: &[Row]) -> CmsResult<Vec<Record>> {
    rows.iter().map(|row| from_row(meta, row)).collect()
}
