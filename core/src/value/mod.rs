pub mod tuple;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::Display;

use crate::error::StoreError;

/// A dynamically typed field value. Every record exposes its indexed fields as
/// these, and the tuple codec (see [`tuple`]) defines their ordered key encoding.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<FieldValue>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Null,
    Bool,
    Int,
    Double,
    String,
    Bytes,
    Array,
}

impl FieldType {
    pub fn of(v: &FieldValue) -> Self {
        match v {
            FieldValue::Null => FieldType::Null,
            FieldValue::Bool(_) => FieldType::Bool,
            FieldValue::Int(_) => FieldType::Int,
            FieldValue::Double(_) => FieldType::Double,
            FieldValue::String(_) => FieldType::String,
            FieldValue::Bytes(_) => FieldType::Bytes,
            FieldValue::Array(_) => FieldType::Array,
        }
    }

    /// The zero value a masked restricted field is replaced with.
    pub fn zero_value(&self) -> FieldValue {
        match self {
            FieldType::Null => FieldValue::Null,
            FieldType::Bool => FieldValue::Bool(false),
            FieldType::Int => FieldValue::Int(0),
            FieldType::Double => FieldValue::Double(0.0),
            FieldType::String => FieldValue::String(String::new()),
            FieldType::Bytes => FieldValue::Bytes(Vec::new()),
            FieldType::Array => FieldValue::Array(Vec::new()),
        }
    }
}

impl FieldValue {
    pub fn is_null(&self) -> bool { matches!(self, FieldValue::Null) }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view: integers widen to f64, anything else is non-numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(i) => Some(*i as f64),
            FieldValue::Double(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Interpret an Array of numeric elements as a dense vector.
    pub fn as_vector(&self) -> Option<Vec<f32>> {
        match self {
            FieldValue::Array(elems) => elems.iter().map(|e| e.as_f64().map(|f| f as f32)).collect(),
            _ => None,
        }
    }

    pub fn vector(components: impl IntoIterator<Item = f32>) -> Self {
        FieldValue::Array(components.into_iter().map(|f| FieldValue::Double(f as f64)).collect())
    }

    /// Order two values for range evaluation. Numerics compare across Int/Double;
    /// any other cross-type pair is not comparable.
    pub fn compare(&self, other: &FieldValue) -> Result<Ordering, StoreError> {
        let incomparable = || StoreError::RangeIncomparable(format!("{:?} vs {:?}", FieldType::of(self), FieldType::of(other)));
        match (self, other) {
            (FieldValue::Int(a), FieldValue::Int(b)) => Ok(a.cmp(b)),
            (FieldValue::Bool(a), FieldValue::Bool(b)) => Ok(a.cmp(b)),
            (FieldValue::String(a), FieldValue::String(b)) => Ok(a.cmp(b)),
            (FieldValue::Bytes(a), FieldValue::Bytes(b)) => Ok(a.cmp(b)),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y).ok_or_else(incomparable),
                _ => Err(incomparable()),
            },
        }
    }
}

impl Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Null => write!(f, "null"),
            FieldValue::Bool(b) => write!(f, "{:?}", b),
            FieldValue::Int(i) => write!(f, "{:?}", i),
            FieldValue::Double(d) => write!(f, "{:?}", d),
            FieldValue::String(s) => write!(f, "{:?}", s),
            FieldValue::Bytes(b) => write!(f, "{:?}", b),
            FieldValue::Array(a) => {
                write!(f, "[")?;
                for (i, v) in a.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self { FieldValue::Int(i) }
}
impl From<i32> for FieldValue {
    fn from(i: i32) -> Self { FieldValue::Int(i as i64) }
}
impl From<f64> for FieldValue {
    fn from(f: f64) -> Self { FieldValue::Double(f) }
}
impl From<bool> for FieldValue {
    fn from(b: bool) -> Self { FieldValue::Bool(b) }
}
impl From<&str> for FieldValue {
    fn from(s: &str) -> Self { FieldValue::String(s.to_string()) }
}
impl From<String> for FieldValue {
    fn from(s: String) -> Self { FieldValue::String(s) }
}
impl From<Vec<u8>> for FieldValue {
    fn from(b: Vec<u8>) -> Self { FieldValue::Bytes(b) }
}
impl<V: Into<FieldValue>> From<Option<V>> for FieldValue {
    fn from(v: Option<V>) -> Self { v.map(Into::into).unwrap_or(FieldValue::Null) }
}
