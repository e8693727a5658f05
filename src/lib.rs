pub mod catalog;
pub mod commit;
pub mod config;
pub mod error;
pub mod query;
pub mod repository;
pub mod storage;

pub use crate::catalog::Catalog;
pub use crate::catalog::schema::{IndexDef, KeyPath, StoreSchema};
pub use crate::catalog::types::Value;
pub use crate::commit::batch::{BatchEntry, BatchOptions, BatchSlot, PendingCallback};
pub use crate::commit::ops::{OpGroup, TableOp, TableOps};
pub use crate::commit::tx::{TxScope, TxStore};
pub use crate::config::OrdkvConfig;
pub use crate::error::{EvalError, OrdkvError, OrdkvErrorCode};
pub use crate::query::builder::Query;
pub use crate::query::plan::ModifyPatch;
pub use crate::query::range::RangeSpec;
pub use crate::repository::StoreHandle;
pub use crate::storage::engine::{KeyRange, StorageEngine};
pub use crate::storage::memory::MemoryEngine;

use crate::commit::batch::run_batch;
use crate::commit::tx::{TxShared, enclosing};
use crate::storage::engine::{EngineTransaction, TxMode};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info};

static NEXT_DATABASE_ID: AtomicU64 = AtomicU64::new(1);

struct DatabaseInner {
    id: u64,
    engine: Arc<dyn StorageEngine>,
    config: OrdkvConfig,
    closed: Arc<AtomicBool>,
    next_tx_id: AtomicU64,
}

/// A connection to one engine. Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    pub fn open(engine: impl StorageEngine, config: OrdkvConfig) -> Result<Self, OrdkvError> {
        Self::open_shared(Arc::new(engine), config)
    }

    pub fn open_shared(engine: Arc<dyn StorageEngine>, config: OrdkvConfig) -> Result<Self, OrdkvError> {
        config.validate()?;
        info!(
            name = engine.name(),
            version = engine.version(),
            stores = engine.store_names().len(),
            "database opened"
        );
        Ok(Self {
            inner: Arc::new(DatabaseInner {
                id: NEXT_DATABASE_ID.fetch_add(1, Ordering::Relaxed),
                engine,
                config,
                closed: Arc::new(AtomicBool::new(false)),
                next_tx_id: AtomicU64::new(1),
            }),
        })
    }

    pub fn name(&self) -> &str {
        self.inner.engine.name()
    }

    pub fn version(&self) -> u64 {
        self.inner.engine.version()
    }

    pub fn store_names(&self) -> Vec<String> {
        self.inner.engine.store_names()
    }

    pub fn config(&self) -> &OrdkvConfig {
        &self.inner.config
    }

    /// Closes the connection. Every later operation, including requests
    /// through live [`TxScope`]s, fails with `StoreClosed`.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            info!(name = self.name(), "database closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn store(&self, name: impl Into<String>) -> StoreHandle {
        StoreHandle::new(self.clone(), name)
    }

    /// Runs `entries` in one read-write transaction and resolves with one
    /// slot per entry, or with the first failure after rolling back.
    pub async fn batch(
        &self,
        entries: Vec<BatchEntry>,
        options: BatchOptions,
    ) -> Result<Vec<BatchSlot>, OrdkvError> {
        run_batch(self, entries, options).await
    }

    /// Single-store batch. Resolves with one key (or `None`) per operation.
    pub async fn table_batch(
        &self,
        store: impl Into<String>,
        ops: impl Into<TableOps>,
        options: BatchOptions,
    ) -> Result<Vec<Option<Value>>, OrdkvError> {
        let store = store.into();
        let slots = run_batch(self, vec![BatchEntry::store(store.clone(), ops)], options).await?;
        Ok(slots
            .into_iter()
            .next()
            .and_then(|slot| match slot {
                BatchSlot::Stores(mut stores) => stores.remove(&store),
                BatchSlot::Value(_) | BatchSlot::Pending(_) => None,
            })
            .unwrap_or_default())
    }

    pub(crate) fn ensure_open(&self) -> Result<(), OrdkvError> {
        if self.is_closed() {
            return Err(OrdkvError::StoreClosed);
        }
        Ok(())
    }

    pub(crate) fn engine(&self) -> &dyn StorageEngine {
        self.inner.engine.as_ref()
    }

    pub(crate) fn next_tx_id(&self) -> u64 {
        self.inner.next_tx_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.inner.closed)
    }

    pub(crate) fn id(&self) -> u64 {
        self.inner.id
    }

    /// The batch transaction of this database whose callback is running on
    /// the calling task, when transaction reuse is enabled. Calls from any
    /// other task get `None` and open a transaction of their own.
    pub(crate) fn current_transaction(&self) -> Option<Arc<TxShared>> {
        if !self.inner.config.reuse_current_transaction {
            return None;
        }
        enclosing(self.inner.id)
    }

    /// The current transaction, if it covers every store in `stores`.
    pub(crate) fn joinable_current(&self, stores: &[String]) -> Option<Arc<TxShared>> {
        self.current_transaction().filter(|tx| tx.covers(stores))
    }

    /// Runs a read against `store` in the enclosing batch transaction when
    /// it covers the store, otherwise in a read-only transaction of its own.
    pub(crate) fn read<R>(
        &self,
        store: &str,
        f: impl FnOnce(&mut dyn EngineTransaction) -> Result<R, OrdkvError>,
    ) -> Result<R, OrdkvError> {
        self.ensure_open()?;
        if let Some(tx) = self.joinable_current(&[store.to_string()]) {
            return tx.with_active(f);
        }
        let tx = TxShared::open(self, vec![store.to_string()], TxMode::ReadOnly)?;
        let output = tx.with_active(f)?;
        tx.commit()?;
        debug!(tx_id = tx.id(), store, "read completed");
        Ok(output)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name())
            .field("version", &self.version())
            .field("closed", &self.is_closed())
            .finish()
    }
}
