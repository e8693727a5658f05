use crate::catalog::schema::{KeyPath, StoreSchema};
use crate::catalog::types::Value;
use crate::storage::encoded_key::EncodedKey;
use crate::storage::engine::EngineError;
use crate::storage::index::{SecondaryIndex, extract_index_keys};
use im::OrdMap;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub key: Value,
    pub value: Value,
}

/// Committed or in-flight contents of one object store.
///
/// Every map is persistent, so cloning a store for a transaction is O(1)
/// and abort is a discard.
#[derive(Debug, Clone)]
pub struct StoreData {
    pub schema: Arc<StoreSchema>,
    pub records: OrdMap<EncodedKey, StoredRecord>,
    pub indexes: BTreeMap<String, SecondaryIndex>,
    /// Last generated (or highest explicit numeric) key.
    pub key_generator: i64,
    /// Bumped on every commit that wrote this store.
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Fails when the key exists.
    Insert,
    /// Replaces an existing record.
    Upsert,
}

impl StoreData {
    pub fn new(schema: Arc<StoreSchema>) -> Self {
        let indexes = schema
            .indexes
            .iter()
            .map(|def| (def.name.clone(), SecondaryIndex::new(def.clone())))
            .collect();
        Self {
            schema,
            records: OrdMap::new(),
            indexes,
            key_generator: 0,
            version: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn get(&self, key: &Value) -> Result<Option<&StoredRecord>, EngineError> {
        let encoded = EncodedKey::from_key(key)?;
        Ok(self.records.get(&encoded))
    }

    pub fn index(&self, name: &str) -> Result<&SecondaryIndex, EngineError> {
        self.indexes
            .get(name)
            .ok_or_else(|| EngineError::index_not_found(self.name(), name))
    }

    pub fn count_range(&self, start: Bound<EncodedKey>, end: Bound<EncodedKey>) -> u64 {
        self.records.range((start, end)).count() as u64
    }

    /// Writes `value`, resolving its key from the key path, the explicit
    /// key or the key generator, and returns the key.
    pub fn write(
        &mut self,
        mut value: Value,
        key: Option<Value>,
        mode: WriteMode,
    ) -> Result<Value, EngineError> {
        let key = self.resolve_key(&mut value, key)?;
        let encoded = EncodedKey::from_key(&key)?;
        if mode == WriteMode::Insert && self.records.contains_key(&encoded) {
            return Err(EngineError::Constraint(format!(
                "key already exists in store '{}'",
                self.name()
            )));
        }
        self.replace(encoded, key.clone(), value)?;
        Ok(key)
    }

    /// Replaces the record stored under an existing primary key, keeping
    /// indexes in step. Used by cursor updates.
    pub fn overwrite(&mut self, key: &Value, value: Value) -> Result<(), EngineError> {
        if let Some(key_path) = &self.schema.key_path {
            let inline = key_path.extract(&value);
            if inline.as_ref() != Some(key) {
                return Err(EngineError::Data(format!(
                    "update would change the in-line key of a record in store '{}'",
                    self.name()
                )));
            }
        }
        let encoded = EncodedKey::from_key(key)?;
        self.replace(encoded, key.clone(), value)
    }

    pub fn remove(&mut self, key: &Value) -> Result<Option<StoredRecord>, EngineError> {
        let encoded = EncodedKey::from_key(key)?;
        let Some(existing) = self.records.remove(&encoded) else {
            return Ok(None);
        };
        self.unindex(&encoded, &existing.value);
        Ok(Some(existing))
    }

    pub fn clear(&mut self) {
        self.records = OrdMap::new();
        for index in self.indexes.values_mut() {
            index.clear();
        }
    }

    fn replace(&mut self, encoded: EncodedKey, key: Value, value: Value) -> Result<(), EngineError> {
        let mut additions = Vec::with_capacity(self.indexes.len());
        for (name, index) in self.indexes.iter() {
            let keys = extract_index_keys(&index.def, &value);
            if let Some((_, conflicting)) = keys
                .iter()
                .find(|(index_key, _)| index.unique_conflict(index_key, &encoded))
            {
                return Err(EngineError::Constraint(format!(
                    "unique index '{}.{}' already contains key {:?}",
                    self.name(),
                    name,
                    conflicting
                )));
            }
            additions.push((name.clone(), keys));
        }

        if let Some(previous) = self.records.get(&encoded).cloned() {
            self.unindex(&encoded, &previous.value);
        }
        for (name, keys) in additions {
            if let Some(index) = self.indexes.get_mut(&name) {
                for (index_key, key_value) in keys {
                    index.insert(index_key, key_value, encoded.clone());
                }
            }
        }
        self.records.insert(encoded, StoredRecord { key, value });
        Ok(())
    }

    fn unindex(&mut self, encoded: &EncodedKey, value: &Value) {
        for index in self.indexes.values_mut() {
            for (index_key, _) in extract_index_keys(&index.def, value) {
                index.remove(&index_key, encoded);
            }
        }
    }

    fn resolve_key(&mut self, value: &mut Value, key: Option<Value>) -> Result<Value, EngineError> {
        let schema = Arc::clone(&self.schema);
        let key = match (&schema.key_path, key) {
            (Some(_), Some(_)) => {
                return Err(EngineError::Data(format!(
                    "store '{}' uses in-line keys; an explicit key is not allowed",
                    self.name()
                )));
            }
            (Some(key_path), None) => match key_path.extract(value) {
                Some(inline) => inline,
                None => self.generate_inline(key_path.clone(), value)?,
            },
            (None, Some(explicit)) => explicit,
            (None, None) if schema.auto_increment => self.next_generated()?,
            (None, None) => {
                return Err(EngineError::Data(format!(
                    "store '{}' has no key path or key generator; a key is required",
                    self.name()
                )));
            }
        };
        if !key.is_valid_key() {
            return Err(EngineError::Data(format!(
                "{} is not a valid key",
                key.kind_name()
            )));
        }
        if schema.auto_increment
            && let Some(numeric) = key.as_f64()
            && numeric.floor() > self.key_generator as f64
        {
            self.key_generator = numeric.floor().min(i64::MAX as f64) as i64;
        }
        Ok(key)
    }

    fn generate_inline(&mut self, key_path: KeyPath, value: &mut Value) -> Result<Value, EngineError> {
        let KeyPath::Field(path) = key_path else {
            return Err(EngineError::Data(format!(
                "compound key path of store '{}' did not yield a key",
                self.name()
            )));
        };
        if !self.schema.auto_increment {
            return Err(EngineError::Data(format!(
                "key path '{path}' of store '{}' did not yield a key",
                self.name()
            )));
        }
        let generated = self.next_generated()?;
        if !value.set_field(&path, generated.clone()) {
            return Err(EngineError::Data(format!(
                "generated key cannot be written to '{path}'"
            )));
        }
        Ok(generated)
    }

    fn next_generated(&mut self) -> Result<Value, EngineError> {
        self.key_generator = self.key_generator.checked_add(1).ok_or_else(|| {
            EngineError::Constraint(format!("key generator of store '{}' exhausted", self.name()))
        })?;
        Ok(Value::Integer(self.key_generator))
    }
}
