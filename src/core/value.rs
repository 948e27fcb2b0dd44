use std::fmt;
use std::hash::{Hash, Hasher};
use serde::{Deserialize, Serialize};
use crate::core::{DbError, Result};

/// A single column value as exchanged with the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Integer(_) => "INTEGER",
            Self::Float(_) => "FLOAT",
            Self::Text(_) => "TEXT",
            Self::Boolean(_) => "BOOLEAN",
            Self::Bytes(_) => "BYTES",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

// Structural equality: dirty checking depends on it, so no cross-type coercion.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => {
                if a.is_nan() && b.is_nan() {
                    return true;
                }
                a.to_bits() == b.to_bits() || a == b
            }
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Null => 0u8.hash(state),
            Self::Integer(i) => {
                1u8.hash(state);
                i.hash(state);
            }
            Self::Float(f) => {
                2u8.hash(state);
                if f.is_nan() {
                    f64::NAN.to_bits().hash(state);
                } else if *f == 0.0 {
                    0.0f64.to_bits().hash(state);
                } else {
                    f.to_bits().hash(state);
                }
            }
            Self::Text(s) => {
                3u8.hash(state);
                s.hash(state);
            }
            Self::Boolean(b) => {
                4u8.hash(state);
                b.hash(state);
            }
            Self::Bytes(b) => {
                5u8.hash(state);
                b.hash(state);
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(fl) => write!(f, "{}", fl),
            Self::Text(s) => write!(f, "{}", s),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

/// Conversion between an entity field and its column value.
pub trait ColumnValue: Sized {
    fn to_value(&self) -> Value;

    /// `value` is `None` when the column is missing from the row.
    fn from_column(value: Option<&Value>, column: &str) -> Result<Self>;
}

fn column_type_error(column: &str, expected: &str, value: Option<&Value>) -> DbError {
    DbError::TypeMismatch(format!(
        "column '{}' expected {}, got {}",
        column,
        expected,
        value.map(Value::type_name).unwrap_or("missing column")
    ))
}

impl ColumnValue for i64 {
    fn to_value(&self) -> Value {
        Value::Integer(*self)
    }

    fn from_column(value: Option<&Value>, column: &str) -> Result<Self> {
        match value {
            Some(Value::Integer(i)) => Ok(*i),
            other => Err(column_type_error(column, "INTEGER", other)),
        }
    }
}

impl ColumnValue for i32 {
    fn to_value(&self) -> Value {
        Value::Integer(i64::from(*self))
    }

    fn from_column(value: Option<&Value>, column: &str) -> Result<Self> {
        let wide = i64::from_column(value, column)?;
        i32::try_from(wide).map_err(|_| {
            DbError::TypeMismatch(format!("column '{}' value {} overflows i32", column, wide))
        })
    }
}

impl ColumnValue for u32 {
    fn to_value(&self) -> Value {
        Value::Integer(i64::from(*self))
    }

    fn from_column(value: Option<&Value>, column: &str) -> Result<Self> {
        let wide = i64::from_column(value, column)?;
        u32::try_from(wide).map_err(|_| {
            DbError::TypeMismatch(format!("column '{}' value {} is not a valid u32", column, wide))
        })
    }
}

impl ColumnValue for f64 {
    fn to_value(&self) -> Value {
        Value::Float(*self)
    }

    fn from_column(value: Option<&Value>, column: &str) -> Result<Self> {
        match value {
            Some(Value::Float(f)) => Ok(*f),
            Some(Value::Integer(i)) => Ok(*i as f64),
            other => Err(column_type_error(column, "FLOAT", other)),
        }
    }
}

impl ColumnValue for bool {
    fn to_value(&self) -> Value {
        Value::Boolean(*self)
    }

    fn from_column(value: Option<&Value>, column: &str) -> Result<Self> {
        match value {
            Some(Value::Boolean(b)) => Ok(*b),
            other => Err(column_type_error(column, "BOOLEAN", other)),
        }
    }
}

impl ColumnValue for String {
    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }

    fn from_column(value: Option<&Value>, column: &str) -> Result<Self> {
        match value {
            Some(Value::Text(s)) => Ok(s.clone()),
            other => Err(column_type_error(column, "TEXT", other)),
        }
    }
}

impl ColumnValue for Vec<u8> {
    fn to_value(&self) -> Value {
        Value::Bytes(self.clone())
    }

    fn from_column(value: Option<&Value>, column: &str) -> Result<Self> {
        match value {
            Some(Value::Bytes(b)) => Ok(b.clone()),
            other => Err(column_type_error(column, "BYTES", other)),
        }
    }
}

impl<T: ColumnValue> ColumnValue for Option<T> {
    fn to_value(&self) -> Value {
        match self {
            Some(inner) => inner.to_value(),
            None => Value::Null,
        }
    }

    fn from_column(value: Option<&Value>, column: &str) -> Result<Self> {
        match value {
            None | Some(Value::Null) => Ok(None),
            present => T::from_column(present, column).map(Some),
        }
    }
}
