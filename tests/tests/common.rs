#[allow(unused)]
pub use quarry::{
    AuthContext, Container, EntityDescriptor, FieldPredicate, FieldValue, IndexDescriptor, Item, ItemId, Query,
    RestrictedField, Schema,
};
pub use quarry_storage_sled::SledKvEngine;

use quarry::pq::PqParams;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub age: i64,
    pub country: String,
    pub city: String,
    pub score: f64,
    pub secret: String,
}

impl User {
    pub fn new(id: i64, age: i64, country: &str, city: &str) -> Self {
        Self { id, age, country: country.into(), city: city.into(), score: 0.0, secret: String::new() }
    }
}

impl Item for User {
    fn type_name() -> &'static str { "user" }

    fn id(&self) -> ItemId { ItemId::int(self.id) }

    fn fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            ("age", self.age.into()),
            ("country", self.country.as_str().into()),
            ("city", self.city.as_str().into()),
            ("score", self.score.into()),
            ("secret", self.secret.as_str().into()),
        ]
    }

    fn restricted_fields() -> &'static [RestrictedField] {
        &[RestrictedField { name: "secret", read_restricted: true, write_restricted: false }]
    }

    fn mask(&self, auth: &AuthContext) -> Self {
        if auth.elevated {
            self.clone()
        } else {
            Self { secret: String::new(), ..self.clone() }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Doc {
    pub id: i64,
    pub topic: String,
    pub rating: f64,
    pub embedding: Vec<f32>,
}

impl Item for Doc {
    fn type_name() -> &'static str { "doc" }

    fn id(&self) -> ItemId { ItemId::int(self.id) }

    fn fields(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            ("topic", self.topic.as_str().into()),
            ("rating", self.rating.into()),
            ("embedding", FieldValue::vector(self.embedding.iter().copied())),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub id: i64,
    pub data: Vec<u8>,
}

impl Item for Payload {
    fn type_name() -> &'static str { "payload" }

    fn id(&self) -> ItemId { ItemId::int(self.id) }

    fn fields(&self) -> Vec<(&'static str, FieldValue)> { vec![("size", (self.data.len() as i64).into())] }
}

pub const DOC_DIM: usize = 8;

pub fn schema() -> Schema {
    Schema::new()
        .with_entity(
            EntityDescriptor::new("user")
                .with_index(IndexDescriptor::scalar("user_age", vec!["age"]))
                .with_index(IndexDescriptor::scalar("user_geo", vec!["country", "city"]))
                .with_index(IndexDescriptor::rank("user_score", "score")),
        )
        .with_entity(
            EntityDescriptor::new("doc")
                .with_index(IndexDescriptor::scalar("doc_topic", vec!["topic"]))
                .with_index(IndexDescriptor::rank("doc_rating", "rating"))
                .with_index(IndexDescriptor::vector("doc_embedding", "embedding", DOC_DIM, PqParams::new(4).with_seed(7))),
        )
        .with_entity(EntityDescriptor::new("payload"))
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).try_init();
}

/// Fresh container over a temporary sled engine, all indexes built.
pub async fn container() -> Container {
    init_tracing();
    let engine = SledKvEngine::new_test().expect("temporary sled engine");
    let container = Container::new(Arc::new(engine), schema(), b"q".to_vec());
    container.ensure_indexes().await.expect("ensure indexes");
    container
}

#[allow(unused)]
pub fn auth() -> AuthContext {
    AuthContext::principal("tester")
}

#[allow(unused)]
pub fn ids<T: Item>(items: &[T]) -> Vec<ItemId> {
    items.iter().map(|i| i.id()).collect()
}
