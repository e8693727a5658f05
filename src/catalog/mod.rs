//! Committed store and index definitions.
//!
//! The catalog is produced by whatever ran the schema upgrade before this
//! crate sees the database; engines receive it at construction and the query
//! and batch layers only ever read it.

pub mod schema;
pub mod types;

use crate::catalog::schema::StoreSchema;
use crate::error::ResourceType;
use crate::storage::engine::EngineError;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    stores: BTreeMap<String, StoreSchema>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(mut self, schema: StoreSchema) -> Self {
        self.stores.insert(schema.name.clone(), schema);
        self
    }

    pub fn store(&self, name: &str) -> Result<&StoreSchema, EngineError> {
        self.stores.get(name).ok_or_else(|| EngineError::NotFound {
            resource_type: ResourceType::Store,
            resource_id: name.to_string(),
        })
    }

    pub fn store_names(&self) -> impl Iterator<Item = &str> {
        self.stores.keys().map(String::as_str)
    }

    pub fn stores(&self) -> impl Iterator<Item = &StoreSchema> {
        self.stores.values()
    }
}
