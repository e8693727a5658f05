use crate::catalog::schema::IndexDef;
use crate::catalog::types::Value;
use crate::storage::encoded_key::EncodedKey;
use im::{OrdMap, OrdSet};
use std::ops::Bound;

/// Primary keys sharing one index key, ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexBucket {
    pub key: Value,
    pub primaries: OrdSet<EncodedKey>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondaryIndex {
    pub def: IndexDef,
    pub entries: OrdMap<EncodedKey, IndexBucket>,
}

impl SecondaryIndex {
    pub fn new(def: IndexDef) -> Self {
        Self {
            def,
            entries: OrdMap::new(),
        }
    }

    pub fn insert(&mut self, key: EncodedKey, key_value: Value, pk: EncodedKey) {
        let mut bucket = self.entries.get(&key).cloned().unwrap_or(IndexBucket {
            key: key_value,
            primaries: OrdSet::new(),
        });
        bucket.primaries.insert(pk);
        self.entries.insert(key, bucket);
    }

    pub fn remove(&mut self, key: &EncodedKey, pk: &EncodedKey) {
        let Some(mut bucket) = self.entries.get(key).cloned() else {
            return;
        };
        bucket.primaries.remove(pk);
        if bucket.primaries.is_empty() {
            self.entries.remove(key);
        } else {
            self.entries.insert(key.clone(), bucket);
        }
    }

    /// True when a unique index already maps `key` to a record other than `pk`.
    pub fn unique_conflict(&self, key: &EncodedKey, pk: &EncodedKey) -> bool {
        self.def.unique
            && self
                .entries
                .get(key)
                .is_some_and(|bucket| bucket.primaries.iter().any(|existing| existing != pk))
    }

    pub fn count_range(&self, start: Bound<EncodedKey>, end: Bound<EncodedKey>) -> u64 {
        self.entries
            .range((start, end))
            .map(|(_, bucket)| bucket.primaries.len() as u64)
            .sum()
    }

    pub fn clear(&mut self) {
        self.entries = OrdMap::new();
    }
}

/// Index keys a record contributes to `def`, deduplicated and encoded.
///
/// Records whose key path is missing or yields an invalid key are simply
/// not indexed. Multi-entry indexes contribute one key per valid array
/// element.
pub fn extract_index_keys(def: &IndexDef, record: &Value) -> Vec<(EncodedKey, Value)> {
    let Some(extracted) = def.key_path.extract(record) else {
        return Vec::new();
    };
    let candidates = match extracted {
        Value::Array(items) if def.multi_entry => items,
        single => vec![single],
    };
    let mut keys: Vec<(EncodedKey, Value)> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let Ok(encoded) = EncodedKey::from_key(&candidate) else {
            continue;
        };
        if !keys.iter().any(|(existing, _)| existing == &encoded) {
            keys.push((encoded, candidate));
        }
    }
    keys
}
