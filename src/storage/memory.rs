//! In-memory reference engine.
//!
//! Each transaction works on copy-on-write clones of the stores in its
//! scope. Commit swaps the clones in after checking that no other
//! transaction committed a write to the same stores in the meantime.

use crate::catalog::Catalog;
use crate::catalog::schema::KeyPath;
use crate::catalog::types::Value;
use crate::storage::encoded_key::EncodedKey;
use crate::storage::engine::{
    CursorDirection, CursorMode, CursorRecord, CursorSource, EngineCursor, EngineError,
    EngineTransaction, KeyRange, StorageEngine, TxMode,
};
use crate::storage::index::IndexBucket;
use crate::storage::keyspace::{StoreData, WriteMode};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

struct EngineState {
    name: String,
    version: u64,
    catalog: Catalog,
    stores: Mutex<BTreeMap<String, StoreData>>,
    next_tx_id: AtomicU64,
}

#[derive(Clone)]
pub struct MemoryEngine {
    state: Arc<EngineState>,
}

impl MemoryEngine {
    pub fn new(name: impl Into<String>, version: u64, catalog: Catalog) -> Self {
        let stores = catalog
            .stores()
            .map(|schema| {
                (
                    schema.name.clone(),
                    StoreData::new(Arc::new(schema.clone())),
                )
            })
            .collect();
        Self {
            state: Arc::new(EngineState {
                name: name.into(),
                version,
                catalog,
                stores: Mutex::new(stores),
                next_tx_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.state.catalog
    }

    /// Committed record count of a store, outside any transaction.
    pub fn committed_len(&self, store: &str) -> Option<usize> {
        self.state.stores.lock().get(store).map(|s| s.records.len())
    }
}

impl StorageEngine for MemoryEngine {
    fn name(&self) -> &str {
        &self.state.name
    }

    fn version(&self) -> u64 {
        self.state.version
    }

    fn store_names(&self) -> Vec<String> {
        self.state.catalog.store_names().map(str::to_string).collect()
    }

    fn transaction(
        &self,
        stores: &[String],
        mode: TxMode,
    ) -> Result<Box<dyn EngineTransaction>, EngineError> {
        if stores.is_empty() {
            return Err(EngineError::InvalidState(
                "transaction scope must name at least one store".into(),
            ));
        }
        let committed = self.state.stores.lock();
        let mut working = BTreeMap::new();
        for name in stores {
            let data = committed
                .get(name)
                .ok_or_else(|| EngineError::store_not_found(name))?;
            working.insert(name.clone(), data.clone());
        }
        drop(committed);

        let id = self.state.next_tx_id.fetch_add(1, Ordering::Relaxed);
        debug!(tx_id = id, ?mode, stores = ?stores, "engine transaction opened");
        Ok(Box::new(MemoryTransaction {
            id,
            mode,
            state: Arc::clone(&self.state),
            working,
            dirty: BTreeSet::new(),
        }))
    }
}

struct MemoryTransaction {
    id: u64,
    mode: TxMode,
    state: Arc<EngineState>,
    working: BTreeMap<String, StoreData>,
    dirty: BTreeSet<String>,
}

impl MemoryTransaction {
    fn store(&self, name: &str) -> Result<&StoreData, EngineError> {
        self.working
            .get(name)
            .ok_or_else(|| EngineError::store_not_found(name))
    }

    fn store_mut(&mut self, name: &str) -> Result<&mut StoreData, EngineError> {
        if self.mode == TxMode::ReadOnly {
            return Err(EngineError::ReadOnly(format!(
                "cannot write to store '{name}'"
            )));
        }
        let store = self
            .working
            .get_mut(name)
            .ok_or_else(|| EngineError::store_not_found(name))?;
        self.dirty.insert(name.to_string());
        Ok(store)
    }
}

impl EngineTransaction for MemoryTransaction {
    fn mode(&self) -> TxMode {
        self.mode
    }

    fn key_path(&self, store: &str) -> Result<Option<KeyPath>, EngineError> {
        Ok(self.store(store)?.schema.key_path.clone())
    }

    fn get(&mut self, store: &str, key: &Value) -> Result<Option<Value>, EngineError> {
        Ok(self
            .store(store)?
            .get(key)?
            .map(|record| record.value.clone()))
    }

    fn add(&mut self, store: &str, value: Value, key: Option<Value>) -> Result<Value, EngineError> {
        self.store_mut(store)?.write(value, key, WriteMode::Insert)
    }

    fn put(&mut self, store: &str, value: Value, key: Option<Value>) -> Result<Value, EngineError> {
        self.store_mut(store)?.write(value, key, WriteMode::Upsert)
    }

    fn delete(&mut self, store: &str, key: &Value) -> Result<(), EngineError> {
        self.store_mut(store)?.remove(key)?;
        Ok(())
    }

    fn clear(&mut self, store: &str) -> Result<(), EngineError> {
        self.store_mut(store)?.clear();
        Ok(())
    }

    fn count(&mut self, source: &CursorSource, range: Option<&KeyRange>) -> Result<u64, EngineError> {
        let (start, end) = encoded_bounds(range)?;
        let data = self.store(source.store_name())?;
        match source {
            CursorSource::Store(_) => Ok(data.count_range(start, end)),
            CursorSource::Index { index, .. } => Ok(data.index(index)?.count_range(start, end)),
        }
    }

    fn open_cursor<'a>(
        &'a mut self,
        source: &CursorSource,
        range: Option<&KeyRange>,
        direction: CursorDirection,
        mode: CursorMode,
    ) -> Result<Box<dyn EngineCursor + 'a>, EngineError> {
        let (start, end) = encoded_bounds(range)?;
        let store = source.store_name().to_string();
        let index = match source {
            CursorSource::Store(_) => {
                self.store(&store)?;
                None
            }
            CursorSource::Index { index, .. } => {
                self.store(&store)?.index(index)?;
                Some(index.clone())
            }
        };
        let mut cursor = MemoryCursor {
            tx: self,
            store,
            index,
            start,
            end,
            direction,
            mode,
            position: None,
            current: None,
        };
        cursor.seek_first()?;
        Ok(Box::new(cursor))
    }

    fn commit(self: Box<Self>) -> Result<(), EngineError> {
        let this = *self;
        if this.dirty.is_empty() {
            debug!(tx_id = this.id, "engine transaction committed (read-only)");
            return Ok(());
        }
        let mut committed = this.state.stores.lock();
        for name in &this.dirty {
            let base = this.working.get(name).map(|s| s.version);
            let current = committed.get(name).map(|s| s.version);
            if base != current {
                return Err(EngineError::Conflict {
                    store: name.clone(),
                });
            }
        }
        let mut working = this.working;
        for name in &this.dirty {
            if let Some(mut data) = working.remove(name) {
                data.version += 1;
                committed.insert(name.clone(), data);
            }
        }
        debug!(tx_id = this.id, stores = ?this.dirty, "engine transaction committed");
        Ok(())
    }

    fn abort(self: Box<Self>) {
        debug!(tx_id = self.id, "engine transaction aborted");
    }
}

fn encoded_bounds(
    range: Option<&KeyRange>,
) -> Result<(Bound<EncodedKey>, Bound<EncodedKey>), EngineError> {
    match range {
        Some(range) => range.encoded_bounds(),
        None => Ok((Bound::Unbounded, Bound::Unbounded)),
    }
}

fn above_start(start: &Bound<EncodedKey>, key: &EncodedKey) -> bool {
    match start {
        Bound::Included(s) => key >= s,
        Bound::Excluded(s) => key > s,
        Bound::Unbounded => true,
    }
}

fn below_end(end: &Bound<EncodedKey>, key: &EncodedKey) -> bool {
    match end {
        Bound::Included(e) => key <= e,
        Bound::Excluded(e) => key < e,
        Bound::Unbounded => true,
    }
}

/// Cursor position: index key (for index cursors) and primary key.
#[derive(Debug, Clone)]
struct Position {
    index_key: Option<EncodedKey>,
    primary: EncodedKey,
}

struct MemoryCursor<'a> {
    tx: &'a mut MemoryTransaction,
    store: String,
    index: Option<String>,
    start: Bound<EncodedKey>,
    end: Bound<EncodedKey>,
    direction: CursorDirection,
    mode: CursorMode,
    position: Option<Position>,
    current: Option<CursorRecord>,
}

impl MemoryCursor<'_> {
    fn seek_first(&mut self) -> Result<(), EngineError> {
        let next = self.locate(None)?;
        self.settle(next)
    }

    fn step(&mut self) -> Result<(), EngineError> {
        let Some(from) = self.position.clone() else {
            return Ok(());
        };
        let next = self.locate(Some(&from))?;
        self.settle(next)
    }

    /// First position strictly after `from` in the cursor direction, or the
    /// first position of the range when `from` is `None`.
    fn locate(&self, from: Option<&Position>) -> Result<Option<Position>, EngineError> {
        let data = self.tx.store(&self.store)?;
        let reverse = self.direction.is_reverse();
        let Some(index_name) = &self.index else {
            let candidate = match (from, reverse) {
                (None, false) => data
                    .records
                    .range((self.start.clone(), self.end.clone()))
                    .next(),
                (None, true) => data
                    .records
                    .range((self.start.clone(), self.end.clone()))
                    .next_back(),
                (Some(pos), false) => data
                    .records
                    .range((Bound::Excluded(pos.primary.clone()), Bound::Unbounded))
                    .next(),
                (Some(pos), true) => data
                    .records
                    .range((Bound::Unbounded, Bound::Excluded(pos.primary.clone())))
                    .next_back(),
            };
            return Ok(candidate
                .map(|(key, _)| key.clone())
                .filter(|key| above_start(&self.start, key) && below_end(&self.end, key))
                .map(|primary| Position {
                    index_key: None,
                    primary,
                }));
        };

        let index = data.index(index_name)?;
        // Every direction enters a bucket at the record a plain scan in that
        // direction meets first.
        let pick = |bucket: &IndexBucket| {
            if reverse {
                bucket.primaries.get_max().cloned()
            } else {
                bucket.primaries.get_min().cloned()
            }
        };

        if let Some(pos) = from
            && !self.direction.is_unique()
            && let Some(index_key) = &pos.index_key
            && let Some(bucket) = index.entries.get(index_key)
        {
            let sibling = if reverse {
                bucket
                    .primaries
                    .range((Bound::Unbounded, Bound::Excluded(pos.primary.clone())))
                    .next_back()
            } else {
                bucket
                    .primaries
                    .range((Bound::Excluded(pos.primary.clone()), Bound::Unbounded))
                    .next()
            };
            if let Some(primary) = sibling {
                return Ok(Some(Position {
                    index_key: Some(index_key.clone()),
                    primary: primary.clone(),
                }));
            }
        }

        let bucket = match (from.and_then(|p| p.index_key.clone()), reverse) {
            (None, false) => index
                .entries
                .range((self.start.clone(), self.end.clone()))
                .next(),
            (None, true) => index
                .entries
                .range((self.start.clone(), self.end.clone()))
                .next_back(),
            (Some(key), false) => index
                .entries
                .range((Bound::Excluded(key), Bound::Unbounded))
                .next(),
            (Some(key), true) => index
                .entries
                .range((Bound::Unbounded, Bound::Excluded(key)))
                .next_back(),
        };
        let Some((index_key, bucket)) = bucket else {
            return Ok(None);
        };
        if !above_start(&self.start, index_key) || !below_end(&self.end, index_key) {
            return Ok(None);
        }
        Ok(pick(bucket).map(|primary| Position {
            index_key: Some(index_key.clone()),
            primary,
        }))
    }

    fn settle(&mut self, position: Option<Position>) -> Result<(), EngineError> {
        self.current = match &position {
            Some(pos) => Some(self.load(pos)?),
            None => None,
        };
        self.position = position;
        Ok(())
    }

    fn load(&self, pos: &Position) -> Result<CursorRecord, EngineError> {
        let data = self.tx.store(&self.store)?;
        let record = data.records.get(&pos.primary).ok_or_else(|| {
            EngineError::InvalidState("index entry points at a missing record".into())
        })?;
        let key = match (&self.index, &pos.index_key) {
            (Some(index), Some(index_key)) => data
                .index(index)?
                .entries
                .get(index_key)
                .map(|bucket| bucket.key.clone())
                .ok_or_else(|| EngineError::InvalidState("cursor index key vanished".into()))?,
            _ => record.key.clone(),
        };
        Ok(CursorRecord {
            key,
            primary_key: record.key.clone(),
            value: match self.mode {
                CursorMode::Value => Some(record.value.clone()),
                CursorMode::Key => None,
            },
        })
    }

    fn current_primary(&self) -> Result<Value, EngineError> {
        self.current
            .as_ref()
            .map(|record| record.primary_key.clone())
            .ok_or_else(|| EngineError::InvalidState("cursor is not positioned on a record".into()))
    }
}

impl EngineCursor for MemoryCursor<'_> {
    fn current(&self) -> Option<CursorRecord> {
        self.current.clone()
    }

    fn advance(&mut self, count: u64) -> Result<(), EngineError> {
        if count == 0 {
            return Err(EngineError::Data("advance count must be > 0".into()));
        }
        for _ in 0..count {
            self.step()?;
            if self.position.is_none() {
                break;
            }
        }
        Ok(())
    }

    fn update(&mut self, value: Value) -> Result<Value, EngineError> {
        let primary = self.current_primary()?;
        if self.mode == CursorMode::Key {
            return Err(EngineError::InvalidState(
                "key cursors cannot update records".into(),
            ));
        }
        let store = self.store.clone();
        self.tx.store_mut(&store)?.overwrite(&primary, value.clone())?;
        if let Some(current) = self.current.as_mut() {
            current.value = Some(value);
        }
        Ok(primary)
    }

    fn delete(&mut self) -> Result<(), EngineError> {
        let primary = self.current_primary()?;
        let store = self.store.clone();
        self.tx.store_mut(&store)?.remove(&primary)?;
        Ok(())
    }
}
