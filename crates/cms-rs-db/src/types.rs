//! Scalar attribute types and their database coercions.
//!
//! Each [`ScalarType`] knows the physical [`ColumnType`] it is stored in and
//! how to convert a [`Value`] to its storage form ([`ScalarType::to_db`]) and
//! back ([`ScalarType::from_db`]). `from_db(to_db(v))` returns `v` for every
//! well-formed value.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use cms_rs_core::{CmsError, CmsResult};
use serde::{Deserialize, Serialize};

use crate::value::Value;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";

/// The scalar attribute types a model may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    /// Auto-incrementing integer primary key.
    Increments,
    /// Short string.
    String,
    /// Long text.
    Text,
    /// Rich text, stored as text.
    RichText,
    /// Email address, stored as a string.
    Email,
    /// Password hash, stored as a string.
    Password,
    /// Unique identifier string.
    Uid,
    /// One of a fixed set of strings.
    Enumeration,
    /// 32-bit integer.
    Integer,
    /// 64-bit integer.
    BigInteger,
    /// Floating-point number.
    Float,
    /// Fixed-precision decimal.
    Decimal,
    /// Calendar date.
    Date,
    /// Time of day.
    Time,
    /// Zoned timestamp.
    DateTime,
    /// Zoned timestamp.
    Timestamp,
    /// Boolean.
    Boolean,
    /// Arbitrary JSON document.
    Json,
}

impl ScalarType {
    /// Returns the canonical lowercase name of the type.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Increments => "increments",
            Self::String => "string",
            Self::Text => "text",
            Self::RichText => "richtext",
            Self::Email => "email",
            Self::Password => "password",
            Self::Uid => "uid",
            Self::Enumeration => "enumeration",
            Self::Integer => "integer",
            Self::BigInteger => "biginteger",
            Self::Float => "float",
            Self::Decimal => "decimal",
            Self::Date => "date",
            Self::Time => "time",
            Self::DateTime => "datetime",
            Self::Timestamp => "timestamp",
            Self::Boolean => "boolean",
            Self::Json => "json",
        }
    }

    /// Returns the physical column type used to store this scalar.
    pub fn column_type(self, enum_values: &[String]) -> ColumnType {
        match self {
            Self::Increments => ColumnType::Increments,
            Self::String | Self::Email | Self::Password | Self::Uid => ColumnType::String,
            Self::Text | Self::RichText => ColumnType::Text,
            Self::Json => ColumnType::Jsonb,
            Self::Enumeration => ColumnType::Enum(enum_values.to_vec()),
            Self::Integer => ColumnType::Integer,
            Self::BigInteger => ColumnType::BigInteger,
            Self::Float => ColumnType::Double,
            Self::Decimal => ColumnType::Decimal {
                precision: 10,
                scale: 2,
            },
            Self::Date => ColumnType::Date,
            Self::Time => ColumnType::Time { precision: 3 },
            Self::DateTime => ColumnType::DateTime { use_tz: false, precision: 6 },
            Self::Timestamp => ColumnType::Timestamp { use_tz: false, precision: 6 },
            Self::Boolean => ColumnType::Boolean,
        }
    }

    /// Whether a column of this type is declared unique by default.
    pub const fn is_unique_by_default(self) -> bool {
        matches!(self, Self::Uid)
    }

    /// Converts an application value to its storage representation.
    ///
    /// # Errors
    ///
    /// Returns [`CmsError::InvalidValue`] when the value cannot be coerced.
    pub fn to_db(self, value: &Value) -> CmsResult<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        match self {
            Self::Increments | Self::Integer | Self::BigInteger => to_int(self, value).map(Value::Int),
            Self::Float | Self::Decimal => to_float(self, value).map(Value::Float),
            Self::String
            | Self::Text
            | Self::RichText
            | Self::Email
            | Self::Password
            | Self::Uid
            | Self::Enumeration => to_text(self, value).map(Value::String),
            Self::Boolean => to_bool(value).map(Value::Bool),
            Self::Date => {
                to_date(value).map(|d| Value::String(d.format(DATE_FORMAT).to_string()))
            }
            Self::Time => {
                to_time(value).map(|t| Value::String(t.format(TIME_FORMAT).to_string()))
            }
            Self::DateTime | Self::Timestamp => to_datetime(value)
                .map(|dt| Value::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))),
            Self::Json => {
                let doc = match value {
                    Value::String(s) => serde_json::Value::String(s.clone()),
                    other => other.to_json(),
                };
                Ok(Value::String(serde_json::to_string(&doc)?))
            }
        }
    }

    /// Converts a raw column value read from the database to the attribute's
    /// application representation.
    ///
    /// # Errors
    ///
    /// Returns [`CmsError::InvalidValue`] when the stored value does not match
    /// the type.
    pub fn from_db(self, value: &Value) -> CmsResult<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        match self {
            Self::Increments | Self::Integer | Self::BigInteger => to_int(self, value).map(Value::Int),
            Self::Float | Self::Decimal => to_float(self, value).map(Value::Float),
            Self::String
            | Self::Text
            | Self::RichText
            | Self::Email
            | Self::Password
            | Self::Uid
            | Self::Enumeration => to_text(self, value).map(Value::String),
            Self::Boolean => to_bool(value).map(Value::Bool),
            Self::Date => to_date(value).map(Value::Date),
            Self::Time => to_time(value).map(Value::Time),
            Self::DateTime | Self::Timestamp => to_datetime(value).map(Value::DateTimeTz),
            Self::Json => match value {
                Value::String(s) => serde_json::from_str(s)
                    .map(Value::Json)
                    .map_err(|e| CmsError::InvalidValue(format!("invalid json column: {e}"))),
                Value::Bytes(b) => serde_json::from_slice(b)
                    .map(Value::Json)
                    .map_err(|e| CmsError::InvalidValue(format!("invalid json column: {e}"))),
                other => Ok(Value::Json(other.to_json())),
            },
        }
    }
}

impl FromStr for ScalarType {
    type Err = CmsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ty = match s {
            "increments" => Self::Increments,
            "string" => Self::String,
            "text" => Self::Text,
            "richtext" => Self::RichText,
            "email" => Self::Email,
            "password" => Self::Password,
            "uid" => Self::Uid,
            "enumeration" => Self::Enumeration,
            "integer" => Self::Integer,
            "biginteger" => Self::BigInteger,
            "float" => Self::Float,
            "decimal" => Self::Decimal,
            "date" => Self::Date,
            "time" => Self::Time,
            "datetime" => Self::DateTime,
            "timestamp" => Self::Timestamp,
            "boolean" => Self::Boolean,
            "json" => Self::Json,
            other => {
                return Err(CmsError::InvalidValue(format!(
                    "unknown attribute type {other}"
                )))
            }
        };
        Ok(ty)
    }
}

/// The physical column type a scalar attribute is stored in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    /// Auto-incrementing integer primary key.
    Increments,
    /// Variable-length string.
    String,
    /// Unbounded text.
    Text,
    /// Binary JSON (stored as text where unsupported).
    Jsonb,
    /// Enumerated string.
    Enum(Vec<String>),
    /// 32-bit integer.
    Integer,
    /// 64-bit integer.
    BigInteger,
    /// Double-precision float.
    Double,
    /// Fixed-precision decimal.
    Decimal {
        /// Total digits.
        precision: u32,
        /// Digits after the decimal point.
        scale: u32,
    },
    /// Calendar date.
    Date,
    /// Time of day.
    Time {
        /// Fractional-second digits.
        precision: u32,
    },
    /// Date and time.
    DateTime {
        /// Whether the column stores a timezone.
        use_tz: bool,
        /// Fractional-second digits.
        precision: u32,
    },
    /// Timestamp.
    Timestamp {
        /// Whether the column stores a timezone.
        use_tz: bool,
        /// Fractional-second digits.
        precision: u32,
    },
    /// Boolean.
    Boolean,
}

impl ColumnType {
    /// Returns the generic name of the column type.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Increments => "increments",
            Self::String => "string",
            Self::Text => "text",
            Self::Jsonb => "jsonb",
            Self::Enum(_) => "enum",
            Self::Integer => "integer",
            Self::BigInteger => "bigInteger",
            Self::Double => "double",
            Self::Decimal { .. } => "decimal",
            Self::Date => "date",
            Self::Time { .. } => "time",
            Self::DateTime { .. } => "datetime",
            Self::Timestamp { .. } => "timestamp",
            Self::Boolean => "boolean",
        }
    }

    /// Returns the SQLite column declaration for this type.
    pub const fn sqlite_type(&self) -> &'static str {
        match self {
            Self::Increments => "INTEGER PRIMARY KEY AUTOINCREMENT",
            Self::Integer | Self::BigInteger | Self::Boolean => "INTEGER",
            Self::Double | Self::Decimal { .. } => "REAL",
            Self::String
            | Self::Text
            | Self::Jsonb
            | Self::Enum(_)
            | Self::Date
            | Self::Time { .. }
            | Self::DateTime { .. }
            | Self::Timestamp { .. } => "TEXT",
        }
    }
}

// ── Coercion helpers ───────────────────────────────────────────────────

fn mismatch(ty: ScalarType, value: &Value) -> CmsError {
    CmsError::InvalidValue(format!("cannot convert {value:?} to {}", ty.name()))
}

fn to_int(ty: ScalarType, value: &Value) -> CmsResult<i64> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::Bool(b) => Ok(i64::from(*b)),
        #[allow(clippy::cast_possible_truncation)]
        Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Ok(*f as i64),
        Value::String(s) => s.trim().parse().map_err(|_| mismatch(ty, value)),
        _ => Err(mismatch(ty, value)),
    }
}

fn to_float(ty: ScalarType, value: &Value) -> CmsResult<f64> {
    match value {
        Value::Float(f) => Ok(*f),
        Value::Int(i) => Ok(*i as f64),
        Value::String(s) => s.trim().parse().map_err(|_| mismatch(ty, value)),
        _ => Err(mismatch(ty, value)),
    }
}

fn to_text(ty: ScalarType, value: &Value) -> CmsResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Bytes(b) => Ok(String::from_utf8_lossy(b).into_owned()),
        Value::List(_) | Value::Json(_) => Err(mismatch(ty, value)),
        other => Ok(other.to_string()),
    }
}

fn to_bool(value: &Value) -> CmsResult<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Int(i) => Ok(*i != 0),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(mismatch(ScalarType::Boolean, value)),
        },
        _ => Err(mismatch(ScalarType::Boolean, value)),
    }
}

fn to_date(value: &Value) -> CmsResult<NaiveDate> {
    match value {
        Value::Date(d) => Ok(*d),
        Value::DateTime(dt) => Ok(dt.date()),
        Value::DateTimeTz(dt) => Ok(dt.date_naive()),
        Value::String(s) => NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
            .map_err(|_| mismatch(ScalarType::Date, value)),
        _ => Err(mismatch(ScalarType::Date, value)),
    }
}

fn to_time(value: &Value) -> CmsResult<NaiveTime> {
    match value {
        Value::Time(t) => Ok(*t),
        Value::String(s) => {
            let s = s.trim();
            NaiveTime::parse_from_str(s, TIME_FORMAT)
                .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
                .map_err(|_| mismatch(ScalarType::Time, value))
        }
        _ => Err(mismatch(ScalarType::Time, value)),
    }
}

fn to_datetime(value: &Value) -> CmsResult<DateTime<Utc>> {
    match value {
        Value::DateTimeTz(dt) => Ok(*dt),
        Value::DateTime(dt) => Ok(dt.and_utc()),
        Value::Date(d) => Ok(d.and_time(NaiveTime::MIN).and_utc()),
        Value::Int(ms) => {
            DateTime::from_timestamp_millis(*ms).ok_or_else(|| mismatch(ScalarType::DateTime, value))
        }
        Value::String(s) => {
            let s = s.trim();
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .or_else(|_| {
                    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
                        .map(|dt| dt.and_utc())
                })
                .map_err(|_| mismatch(ScalarType::DateTime, value))
        }
        _ => Err(mismatch(ScalarType::DateTime, value)),
    }
}
