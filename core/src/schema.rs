use serde::{Deserialize, Serialize};

use quarry_pq::PqParams;

use crate::error::StoreError;

/// The set of entity descriptors a container serves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    entities: Vec<EntityDescriptor>,
}

impl Schema {
    pub fn new() -> Self { Self::default() }

    pub fn with_entity(mut self, entity: EntityDescriptor) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn entities(&self) -> &[EntityDescriptor] { &self.entities }

    pub fn entity(&self, type_name: &str) -> Result<&EntityDescriptor, StoreError> {
        self.entities.iter().find(|e| e.type_name == type_name).ok_or_else(|| StoreError::EntityNotFound(type_name.to_string()))
    }

    pub fn index(&self, index_name: &str) -> Result<(&EntityDescriptor, &IndexDescriptor), StoreError> {
        for entity in &self.entities {
            if let Some(index) = entity.indexes.iter().find(|i| i.name == index_name) {
                return Ok((entity, index));
            }
        }
        Err(StoreError::IndexNotFound(index_name.to_string()))
    }
}

/// Schema entry for one record type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub type_name: String,
    pub indexes: Vec<IndexDescriptor>,
}

impl EntityDescriptor {
    pub fn new(type_name: impl Into<String>) -> Self { Self { type_name: type_name.into(), indexes: Vec::new() } }

    pub fn with_index(mut self, index: IndexDescriptor) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn index(&self, name: &str) -> Result<&IndexDescriptor, StoreError> {
        self.indexes.iter().find(|i| i.name == name).ok_or_else(|| StoreError::IndexNotFound(name.to_string()))
    }
}

/// One secondary index: a name, a kind, and the ordered field list the key is
/// built from (the left-prefix rule applies to scalar kinds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub name: String,
    pub kind: IndexKind,
    pub fields: Vec<String>,
}

impl IndexDescriptor {
    pub fn scalar(name: impl Into<String>, fields: Vec<&str>) -> Self {
        Self { name: name.into(), kind: IndexKind::Scalar, fields: fields.into_iter().map(String::from).collect() }
    }

    pub fn rank(name: impl Into<String>, field: &str) -> Self {
        Self { name: name.into(), kind: IndexKind::Rank, fields: vec![field.to_string()] }
    }

    pub fn vector(name: impl Into<String>, field: &str, dim: usize, params: PqParams) -> Self {
        Self { name: name.into(), kind: IndexKind::VectorPq { dim, params }, fields: vec![field.to_string()] }
    }

    /// Whether this kind maintains per-record entries in the `I` region.
    /// Rank scores candidates on the fly and text indexes live behind the stage
    /// seam, so neither writes entries here.
    pub fn has_entries(&self) -> bool { matches!(self.kind, IndexKind::Scalar | IndexKind::VectorPq { .. }) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexKind {
    Scalar,
    Rank,
    VectorPq { dim: usize, params: PqParams },
    Text,
}

impl IndexKind {
    pub fn label(&self) -> &'static str {
        match self {
            IndexKind::Scalar => "scalar",
            IndexKind::Rank => "rank",
            IndexKind::VectorPq { .. } => "vector-pq",
            IndexKind::Text => "text",
        }
    }
}
