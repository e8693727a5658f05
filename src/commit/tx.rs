use crate::catalog::schema::KeyPath;
use crate::catalog::types::Value;
use crate::error::OrdkvError;
use crate::query::builder::{Fresh, Query, QueryTarget, Values};
use crate::storage::engine::{CursorSource, EngineError, EngineTransaction, TxMode};
use crate::Database;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

pub(crate) enum TxPhase {
    Active(Box<dyn EngineTransaction>),
    Committed,
    Aborted(OrdkvError),
}

/// One engine transaction shared by a batch, its callbacks and any query
/// that joins it.
///
/// The first failing request aborts it; every later request and the final
/// commit observe that first failure or `TransactionInactive`.
pub(crate) struct TxShared {
    id: u64,
    db_id: u64,
    scope: Vec<String>,
    mode: TxMode,
    closed: Arc<AtomicBool>,
    phase: Mutex<TxPhase>,
}

impl TxShared {
    pub(crate) fn open(db: &Database, mut scope: Vec<String>, mode: TxMode) -> Result<Arc<Self>, OrdkvError> {
        db.ensure_open()?;
        scope.sort();
        scope.dedup();
        let native = db.engine().transaction(&scope, mode)?;
        let id = db.next_tx_id();
        debug!(tx_id = id, ?mode, scope = ?scope, "transaction opened");
        Ok(Arc::new(Self {
            id,
            db_id: db.id(),
            scope,
            mode,
            closed: db.closed_flag(),
            phase: Mutex::new(TxPhase::Active(native)),
        }))
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn scope(&self) -> &[String] {
        &self.scope
    }

    pub(crate) fn mode(&self) -> TxMode {
        self.mode
    }

    pub(crate) fn covers<S: AsRef<str>>(&self, stores: &[S]) -> bool {
        stores
            .iter()
            .all(|store| self.scope.iter().any(|s| s == store.as_ref()))
    }

    pub(crate) fn is_active(&self) -> bool {
        matches!(*self.phase.lock(), TxPhase::Active(_))
    }

    /// The failure that aborted the transaction, if it was aborted.
    pub(crate) fn failure(&self) -> Option<OrdkvError> {
        match &*self.phase.lock() {
            TxPhase::Aborted(err) => Some(err.clone()),
            TxPhase::Active(_) | TxPhase::Committed => None,
        }
    }

    /// Runs `f` against the live engine transaction. An error from `f`
    /// aborts the transaction before it is returned.
    pub(crate) fn with_active<R>(
        &self,
        f: impl FnOnce(&mut dyn EngineTransaction) -> Result<R, OrdkvError>,
    ) -> Result<R, OrdkvError> {
        let mut phase = self.phase.lock();
        let TxPhase::Active(native) = &mut *phase else {
            return Err(OrdkvError::TransactionInactive);
        };
        let result = if self.closed.load(Ordering::Acquire) {
            Err(OrdkvError::StoreClosed)
        } else {
            f(native.as_mut())
        };
        if let Err(err) = &result {
            self.abort_locked(&mut phase, err.clone());
        }
        result
    }

    /// Commits, or reports the failure that already aborted the transaction.
    pub(crate) fn commit(&self) -> Result<(), OrdkvError> {
        let mut phase = self.phase.lock();
        match std::mem::replace(&mut *phase, TxPhase::Committed) {
            TxPhase::Active(native) => match native.commit() {
                Ok(()) => {
                    debug!(tx_id = self.id, "transaction committed");
                    Ok(())
                }
                Err(native_err) => {
                    let err = OrdkvError::from(native_err);
                    warn!(tx_id = self.id, error = %err, "transaction commit failed");
                    *phase = TxPhase::Aborted(err.clone());
                    Err(err)
                }
            },
            TxPhase::Aborted(err) => {
                *phase = TxPhase::Aborted(err.clone());
                Err(err)
            }
            TxPhase::Committed => Err(OrdkvError::TransactionInactive),
        }
    }

    /// Aborts if still active. No-op once settled.
    pub(crate) fn abort(&self, reason: OrdkvError) {
        let mut phase = self.phase.lock();
        self.abort_locked(&mut phase, reason);
    }

    fn abort_locked(&self, phase: &mut TxPhase, reason: OrdkvError) {
        if !matches!(phase, TxPhase::Active(_)) {
            return;
        }
        if let TxPhase::Active(native) = std::mem::replace(phase, TxPhase::Aborted(reason.clone())) {
            native.abort();
            warn!(tx_id = self.id, error = %reason, "transaction aborted");
        }
    }
}

/// Aborts the transaction if the owning batch future is dropped before it
/// settles.
pub(crate) struct SettleGuard {
    tx: Option<Arc<TxShared>>,
}

impl SettleGuard {
    pub(crate) fn new(tx: Arc<TxShared>) -> Self {
        Self { tx: Some(tx) }
    }

    pub(crate) fn disarm(mut self) {
        self.tx = None;
    }
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            tx.abort(OrdkvError::TransactionAbort {
                tx_id: tx.id(),
                reason: "batch dropped before it settled".into(),
            });
        }
    }
}

tokio::task_local! {
    /// Batch transactions whose callbacks the running task is executing,
    /// innermost last. At most one per database.
    static ENCLOSING: Vec<Arc<TxShared>>;
}

/// The batch transaction of database `db_id` whose callback is running on
/// this task, if any. Unrelated tasks never see it.
pub(crate) fn enclosing(db_id: u64) -> Option<Arc<TxShared>> {
    ENCLOSING
        .try_with(|stack| stack.iter().rev().find(|tx| tx.db_id == db_id).cloned())
        .ok()
        .flatten()
}

/// Runs `work` with `tx` as the current transaction of its database. The
/// binding ends when `work` completes or is dropped.
pub(crate) async fn with_current<F: Future>(tx: &Arc<TxShared>, work: F) -> F::Output {
    let mut stack = ENCLOSING.try_with(|stack| stack.clone()).unwrap_or_default();
    stack.retain(|held| held.db_id != tx.db_id);
    stack.push(Arc::clone(tx));
    ENCLOSING.scope(stack, work).await
}

/// Capability handle to a batch's transaction, valid until the batch
/// settles. Requests through a handle kept past that point fail with
/// [`OrdkvError::TransactionInactive`].
#[derive(Clone)]
pub struct TxScope {
    db: Database,
    tx: Arc<TxShared>,
}

impl TxScope {
    pub(crate) fn new(db: Database, tx: Arc<TxShared>) -> Self {
        Self { db, tx }
    }

    pub fn id(&self) -> u64 {
        self.tx.id()
    }

    pub fn scope(&self) -> &[String] {
        self.tx.scope()
    }

    pub fn is_active(&self) -> bool {
        self.tx.is_active()
    }

    pub fn store(&self, name: impl Into<String>) -> TxStore {
        TxStore {
            db: self.db.clone(),
            tx: Arc::clone(&self.tx),
            name: name.into(),
        }
    }

    /// Aborts the whole batch. The batch rejects with `TransactionAbort`.
    pub fn abort(&self) {
        self.tx.abort(OrdkvError::TransactionAbort {
            tx_id: self.tx.id(),
            reason: "aborted by caller".into(),
        });
    }
}

/// One store inside a [`TxScope`].
#[derive(Clone)]
pub struct TxStore {
    db: Database,
    tx: Arc<TxShared>,
    name: String,
}

impl TxStore {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn query(&self) -> Query<Fresh, Values> {
        Query::new(
            QueryTarget::scoped(self.db.clone(), Arc::clone(&self.tx)),
            &self.name,
            None,
        )
    }

    pub fn query_index(&self, index: impl Into<String>) -> Query<Fresh, Values> {
        Query::new(
            QueryTarget::scoped(self.db.clone(), Arc::clone(&self.tx)),
            &self.name,
            Some(index.into()),
        )
    }

    pub async fn add(&self, value: impl Into<Value>) -> Result<Value, OrdkvError> {
        let value = value.into();
        self.tx
            .with_active(|native| Ok(native.add(&self.name, value, None)?))
    }

    pub async fn add_at(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<Value, OrdkvError> {
        let (key, value) = (key.into(), value.into());
        self.tx
            .with_active(|native| write_at(native, &self.name, value, key, WriteKind::Add))
    }

    pub async fn put(&self, value: impl Into<Value>) -> Result<Value, OrdkvError> {
        let value = value.into();
        self.tx
            .with_active(|native| Ok(native.put(&self.name, value, None)?))
    }

    pub async fn put_at(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<Value, OrdkvError> {
        let (key, value) = (key.into(), value.into());
        self.tx
            .with_active(|native| write_at(native, &self.name, value, key, WriteKind::Put))
    }

    pub async fn get(&self, key: impl Into<Value>) -> Result<Option<Value>, OrdkvError> {
        let key = key.into();
        self.tx.with_active(|native| Ok(native.get(&self.name, &key)?))
    }

    pub async fn delete(&self, key: impl Into<Value>) -> Result<(), OrdkvError> {
        let key = key.into();
        self.tx
            .with_active(|native| Ok(native.delete(&self.name, &key)?))
    }

    pub async fn clear(&self) -> Result<(), OrdkvError> {
        self.tx.with_active(|native| Ok(native.clear(&self.name)?))
    }

    pub async fn count(&self) -> Result<u64, OrdkvError> {
        let source = CursorSource::Store(self.name.clone());
        self.tx.with_active(|native| Ok(native.count(&source, None)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteKind {
    Add,
    Put,
}

/// Writes `value` under an explicit key. In-line stores receive the key in
/// their key-path field; out-of-line stores get it passed alongside.
pub(crate) fn write_at(
    native: &mut dyn EngineTransaction,
    store: &str,
    mut value: Value,
    key: Value,
    kind: WriteKind,
) -> Result<Value, OrdkvError> {
    let explicit = match native.key_path(store)? {
        Some(KeyPath::Field(path)) => {
            if !value.set_field(&path, key) {
                return Err(EngineError::Data(format!(
                    "cannot write key into field '{path}' of a {} record",
                    value.kind_name()
                ))
                .into());
            }
            None
        }
        Some(KeyPath::Compound(paths)) => {
            let Value::Array(parts) = key else {
                return Err(EngineError::Data(format!(
                    "store '{store}' has a compound key path; the key must be an array"
                ))
                .into());
            };
            if parts.len() != paths.len() {
                return Err(EngineError::Data(format!(
                    "compound key of store '{store}' needs {} parts",
                    paths.len()
                ))
                .into());
            }
            for (path, part) in paths.iter().zip(parts) {
                if !value.set_field(path, part) {
                    return Err(EngineError::Data(format!(
                        "cannot write key into field '{path}'"
                    ))
                    .into());
                }
            }
            None
        }
        None => Some(key),
    };
    let written = match kind {
        WriteKind::Add => native.add(store, value, explicit)?,
        WriteKind::Put => native.put(store, value, explicit)?,
    };
    Ok(written)
}
