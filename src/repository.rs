use crate::Database;
use crate::catalog::types::Value;
use crate::commit::batch::{BatchEntry, BatchOptions, BatchSlot};
use crate::commit::ops::TableOp;
use crate::error::OrdkvError;
use crate::query::builder::{Fresh, Query, QueryTarget, Values};
use crate::storage::engine::{CursorSource, EngineTransaction};
use serde::de::DeserializeOwned;

/// Entry point for one store outside any batch.
///
/// Writes run as one-operation batches, so they join the database's
/// current batch when it covers the store. Reads do the same, or use a
/// read-only transaction of their own.
#[derive(Clone)]
pub struct StoreHandle {
    db: Database,
    name: String,
}

impl StoreHandle {
    pub(crate) fn new(db: Database, name: impl Into<String>) -> Self {
        Self {
            db,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Query over the store's primary keys.
    pub fn query(&self) -> Query<Fresh, Values> {
        Query::new(QueryTarget::detached(self.db.clone()), &self.name, None)
    }

    /// Query over one of the store's indexes.
    pub fn query_index(&self, index: impl Into<String>) -> Query<Fresh, Values> {
        Query::new(
            QueryTarget::detached(self.db.clone()),
            &self.name,
            Some(index.into()),
        )
    }

    pub async fn add(&self, value: impl Into<Value>) -> Result<Value, OrdkvError> {
        self.write_one(TableOp::add(value)).await
    }

    pub async fn add_at(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<Value, OrdkvError> {
        self.write_one(TableOp::add_at(key, value)).await
    }

    pub async fn put(&self, value: impl Into<Value>) -> Result<Value, OrdkvError> {
        self.write_one(TableOp::put(value)).await
    }

    pub async fn put_at(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<Value, OrdkvError> {
        self.write_one(TableOp::put_at(key, value)).await
    }

    pub async fn delete(&self, key: impl Into<Value>) -> Result<(), OrdkvError> {
        self.write_one(TableOp::delete(key)).await.map(|_| ())
    }

    pub async fn clear(&self) -> Result<(), OrdkvError> {
        self.write_one(TableOp::Clear).await.map(|_| ())
    }

    pub async fn get(&self, key: impl Into<Value>) -> Result<Option<Value>, OrdkvError> {
        let key = key.into();
        self.db
            .read(&self.name, |native| Ok(native.get(&self.name, &key)?))
    }

    /// Reads a record and deserializes it.
    pub async fn get_as<T: DeserializeOwned>(&self, key: impl Into<Value>) -> Result<Option<T>, OrdkvError> {
        match self.get(key).await? {
            Some(record) => serde_json::from_value(record.to_json())
                .map(Some)
                .map_err(|err| OrdkvError::Validation(format!("cannot decode record: {err}"))),
            None => Ok(None),
        }
    }

    pub async fn count(&self) -> Result<u64, OrdkvError> {
        let source = CursorSource::Store(self.name.clone());
        self.db
            .read(&self.name, |native: &mut dyn EngineTransaction| {
                Ok(native.count(&source, None)?)
            })
    }

    async fn write_one(&self, op: TableOp) -> Result<Value, OrdkvError> {
        let options = BatchOptions::new().with_parallel(self.db.config().default_parallel);
        let slots = self
            .db
            .batch(vec![BatchEntry::store(self.name.clone(), vec![op])], options)
            .await?;
        let key = slots
            .first()
            .and_then(|slot: &BatchSlot| slot.keys(&self.name))
            .and_then(|keys| keys.first().cloned())
            .flatten();
        Ok(key.unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use crate::Database;
    use crate::catalog::Catalog;
    use crate::catalog::schema::{KeyPath, StoreSchema};
    use crate::catalog::types::Value;
    use crate::config::OrdkvConfig;
    use crate::storage::memory::MemoryEngine;
    use serde::Deserialize;
    use serde_json::json;

    fn db() -> Database {
        let catalog = Catalog::new()
            .with_store(StoreSchema::new("notes").with_auto_increment())
            .with_store(StoreSchema::new("people").with_key_path(KeyPath::field("id")));
        Database::open(MemoryEngine::new("repo", 1, catalog), OrdkvConfig::default())
            .expect("open")
    }

    #[tokio::test]
    async fn auto_increment_keys_are_returned_in_order() {
        let db = db();
        let notes = db.store("notes");
        assert_eq!(notes.add("first").await.expect("add"), Value::Integer(1));
        assert_eq!(notes.add("second").await.expect("add"), Value::Integer(2));
        assert_eq!(notes.get(2).await.expect("get"), Some(Value::from("second")));
        notes.delete(1).await.expect("delete");
        assert_eq!(notes.count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn put_at_writes_the_key_into_the_key_path() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Person {
            id: i64,
            name: String,
        }

        let db = db();
        let people = db.store("people");
        people
            .put_at(7, Value::from(json!({"name": "Ada"})))
            .await
            .expect("put");
        let person: Option<Person> = people.get_as(7).await.expect("get");
        assert_eq!(
            person,
            Some(Person {
                id: 7,
                name: "Ada".into()
            })
        );
    }
}
