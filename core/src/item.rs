//! The entity seam: application records implement [`Item`] to expose a stable type
//! name, a primary identifier, and a field map the index subsystems read.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;

use crate::error::StoreError;
use crate::value::{tuple, FieldValue};

pub type FieldMap = BTreeMap<String, FieldValue>;

/// One element of a primary identifier. Restricted to the orderable scalar types
/// so identifiers derive a total order that agrees with their tuple encoding.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IdElement {
    Int(i64),
    String(String),
    Bytes(Vec<u8>),
}

impl From<&IdElement> for FieldValue {
    fn from(e: &IdElement) -> Self {
        match e {
            IdElement::Int(i) => FieldValue::Int(*i),
            IdElement::String(s) => FieldValue::String(s.clone()),
            IdElement::Bytes(b) => FieldValue::Bytes(b.clone()),
        }
    }
}

/// A record's primary identifier: an ordered tuple of id elements.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(Vec<IdElement>);

impl ItemId {
    pub fn int(i: i64) -> Self { Self(vec![IdElement::Int(i)]) }

    pub fn string(s: impl Into<String>) -> Self { Self(vec![IdElement::String(s.into())]) }

    pub fn bytes(b: impl Into<Vec<u8>>) -> Self { Self(vec![IdElement::Bytes(b.into())]) }

    /// Fresh unique identifier (ULID bytes).
    pub fn generate() -> Self { Self(vec![IdElement::Bytes(ulid::Ulid::new().to_bytes().to_vec())]) }

    pub fn composite(elements: Vec<IdElement>) -> Self { Self(elements) }

    pub fn elements(&self) -> &[IdElement] { &self.0 }

    pub fn to_values(&self) -> Vec<FieldValue> { self.0.iter().map(FieldValue::from).collect() }

    /// Rebuild an identifier from decoded tuple elements (e.g. an index-entry
    /// key suffix). Non-identifier element types are a schema mismatch.
    pub fn from_values(values: &[FieldValue]) -> Result<Self, StoreError> {
        let mut elements = Vec::with_capacity(values.len());
        for v in values {
            elements.push(match v {
                FieldValue::Int(i) => IdElement::Int(*i),
                FieldValue::String(s) => IdElement::String(s.clone()),
                FieldValue::Bytes(b) => IdElement::Bytes(b.clone()),
                other => return Err(StoreError::SchemaMismatch(format!("invalid id element: {}", other))),
            });
        }
        Ok(Self(elements))
    }

    /// Tuple-packed bytes; the deterministic tie-break order for fused results.
    pub fn packed(&self) -> Vec<u8> { tuple::pack(&self.to_values()) }
}

impl Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", FieldValue::from(e))?;
        }
        write!(f, ")")
    }
}

impl From<i64> for ItemId {
    fn from(i: i64) -> Self { ItemId::int(i) }
}
impl From<&str> for ItemId {
    fn from(s: &str) -> Self { ItemId::string(s) }
}

/// Read/write policy for one restricted field. Held as a const table on the
/// entity rather than discovered at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestrictedField {
    pub name: &'static str,
    pub read_restricted: bool,
    pub write_restricted: bool,
}

/// The principal a call runs as. Passed explicitly to store entry points; never a
/// process-global.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    pub principal: Option<String>,
    /// Elevated contexts may read and write restricted fields.
    pub elevated: bool,
}

impl AuthContext {
    pub fn anonymous() -> Self { Self::default() }

    pub fn principal(name: impl Into<String>) -> Self { Self { principal: Some(name.into()), elevated: false } }

    pub fn elevated(name: impl Into<String>) -> Self { Self { principal: Some(name.into()), elevated: true } }
}

/// A typed record. `fields()` drives index maintenance and predicate evaluation;
/// `mask` is authored by the entity (usually generated) and replaces restricted
/// field values with their type's zero for non-elevated readers.
pub trait Item: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn type_name() -> &'static str;

    fn id(&self) -> ItemId;

    fn fields(&self) -> Vec<(&'static str, FieldValue)>;

    fn field(&self, name: &str) -> Option<FieldValue> {
        self.fields().into_iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    fn restricted_fields() -> &'static [RestrictedField] { &[] }

    fn mask(&self, _auth: &AuthContext) -> Self { self.clone() }

    fn field_map(&self) -> FieldMap {
        self.fields().into_iter().map(|(n, v)| (n.to_string(), v)).collect()
    }
}

/// Type-safe handle to one field: carries the field's name and a typed extractor.
/// Emitted by codegen in practice; hand-written in tests.
#[derive(Debug, Clone, Copy)]
pub struct FieldRef<T, V> {
    pub name: &'static str,
    pub extract: fn(&T) -> &V,
}

impl<T, V> FieldRef<T, V> {
    pub const fn new(name: &'static str, extract: fn(&T) -> &V) -> Self { Self { name, extract } }

    pub fn get<'a>(&self, item: &'a T) -> &'a V { (self.extract)(item) }
}

/// Reject writes that touch write-restricted fields from non-elevated contexts.
pub fn check_write<T: Item>(auth: &AuthContext) -> Result<(), StoreError> {
    if auth.elevated {
        return Ok(());
    }
    if let Some(f) = T::restricted_fields().iter().find(|f| f.write_restricted) {
        return Err(StoreError::SecurityWriteDenied(f.name.to_string()));
    }
    Ok(())
}

/// Reject reads of read-restricted fields from non-elevated contexts. Fetch paths
/// that mask instead of reject use [`Item::mask`].
pub fn check_read<T: Item>(auth: &AuthContext, requested: &[&str]) -> Result<(), StoreError> {
    if auth.elevated {
        return Ok(());
    }
    for f in T::restricted_fields() {
        if f.read_restricted && requested.iter().any(|r| *r == f.name) {
            return Err(StoreError::SecurityReadDenied(f.name.to_string()));
        }
    }
    Ok(())
}
