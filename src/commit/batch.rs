//! Batch coordinator: one read-write transaction over every store a batch
//! names, shared by its declarative entries and its callbacks.

use crate::Database;
use crate::catalog::types::Value;
use crate::commit::aggregate::ResultAggregator;
use crate::commit::ops::TableOps;
use crate::commit::tx::{SettleGuard, TxScope, TxShared, with_current};
use crate::error::{OrdkvError, ResourceType};
use crate::storage::engine::TxMode;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::debug;

pub type CallbackFuture = BoxFuture<'static, Result<Value, OrdkvError>>;
type Callback = Box<dyn FnOnce(TxScope) -> CallbackFuture + Send>;

pub enum BatchEntry {
    /// Per-store operations, issued in declaration order.
    Stores(Vec<(String, TableOps)>),
    /// Runs with the batch's transaction. Its output lands in the slot.
    Callback(Callback),
}

impl BatchEntry {
    pub fn store(name: impl Into<String>, ops: impl Into<TableOps>) -> Self {
        BatchEntry::Stores(vec![(name.into(), ops.into())])
    }

    pub fn stores<I, S, O>(stores: I) -> Self
    where
        I: IntoIterator<Item = (S, O)>,
        S: Into<String>,
        O: Into<TableOps>,
    {
        BatchEntry::Stores(
            stores
                .into_iter()
                .map(|(name, ops)| (name.into(), ops.into()))
                .collect(),
        )
    }

    pub fn callback<F, Fut>(callback: F) -> Self
    where
        F: FnOnce(TxScope) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, OrdkvError>> + Send + 'static,
    {
        BatchEntry::Callback(Box::new(move |scope| -> CallbackFuture {
            Box::pin(callback(scope))
        }))
    }

    fn op_count(&self) -> usize {
        match self {
            BatchEntry::Stores(stores) => stores.iter().map(|(_, ops)| ops.len()).sum(),
            BatchEntry::Callback(_) => 0,
        }
    }
}

impl fmt::Debug for BatchEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchEntry::Stores(stores) => f.debug_tuple("Stores").field(stores).finish(),
            BatchEntry::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOptions {
    /// Stores added to the transaction scope for callbacks to use.
    pub extra_stores: Vec<String>,
    /// Issue everything without awaiting callbacks.
    pub parallel: bool,
}

impl BatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parallel() -> Self {
        Self {
            parallel: true,
            ..Self::default()
        }
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_extra_store(mut self, store: impl Into<String>) -> Self {
        self.extra_stores.push(store.into());
        self
    }
}

/// A parallel-mode callback that was still running when its batch settled.
///
/// Requests it issues from here on fail with `TransactionInactive`; work
/// that must happen after the batch belongs in a batch of its own.
pub struct PendingCallback {
    future: CallbackFuture,
}

impl PendingCallback {
    /// Drives the callback on the tokio runtime.
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<Value, OrdkvError>> {
        tokio::spawn(self.future)
    }
}

impl Future for PendingCallback {
    type Output = Result<Value, OrdkvError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.future.as_mut().poll(cx)
    }
}

impl fmt::Debug for PendingCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PendingCallback(..)")
    }
}

#[derive(Debug)]
pub enum BatchSlot {
    /// One key (or `None` for deletes and clears) per operation, per store.
    Stores(BTreeMap<String, Vec<Option<Value>>>),
    Value(Value),
    Pending(PendingCallback),
}

impl BatchSlot {
    pub fn keys(&self, store: &str) -> Option<&[Option<Value>]> {
        match self {
            BatchSlot::Stores(stores) => stores.get(store).map(Vec::as_slice),
            BatchSlot::Value(_) | BatchSlot::Pending(_) => None,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            BatchSlot::Value(value) => Some(value),
            BatchSlot::Stores(_) | BatchSlot::Pending(_) => None,
        }
    }

    pub fn into_pending(self) -> Option<PendingCallback> {
        match self {
            BatchSlot::Pending(pending) => Some(pending),
            BatchSlot::Stores(_) | BatchSlot::Value(_) => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, BatchSlot::Pending(_))
    }
}

fn batch_scope(entries: &[BatchEntry], options: &BatchOptions) -> Vec<String> {
    let mut scope: Vec<String> = entries
        .iter()
        .filter_map(|entry| match entry {
            BatchEntry::Stores(stores) => Some(stores.iter().map(|(name, _)| name.clone())),
            BatchEntry::Callback(_) => None,
        })
        .flatten()
        .chain(options.extra_stores.iter().cloned())
        .collect();
    scope.sort();
    scope.dedup();
    scope
}

pub(crate) async fn run_batch(
    db: &Database,
    entries: Vec<BatchEntry>,
    options: BatchOptions,
) -> Result<Vec<BatchSlot>, OrdkvError> {
    db.ensure_open()?;
    let scope = batch_scope(&entries, &options);
    if scope.is_empty() {
        return Err(OrdkvError::Validation(
            "batch names no stores; list the stores callbacks use in extra_stores".into(),
        ));
    }
    let operations: usize = entries.iter().map(BatchEntry::op_count).sum();
    let max_operations = db.config().max_batch_operations;
    if operations > max_operations {
        return Err(OrdkvError::Validation(format!(
            "batch has {operations} operations, limit is {max_operations}"
        )));
    }

    if let Some(current) = db.current_transaction() {
        if !current.covers(&scope) {
            return Err(OrdkvError::TransactionBusy {
                resource_type: ResourceType::Transaction,
                active_scope: current.scope().join(", "),
            });
        }
        debug!(tx_id = current.id(), "nested batch joined current transaction");
        let aggregator = drive(db, &current, entries, options.parallel).await;
        return aggregator.finish(&current, false);
    }

    let tx = TxShared::open(db, scope, TxMode::ReadWrite)?;
    let settle = SettleGuard::new(Arc::clone(&tx));
    let work = drive(db, &tx, entries, options.parallel);
    let aggregator = if db.config().reuse_current_transaction {
        with_current(&tx, work).await
    } else {
        work.await
    };
    let result = aggregator.finish(&tx, true);
    settle.disarm();
    result
}

/// Issues every entry against `tx` until the first failure.
async fn drive(
    db: &Database,
    tx: &Arc<TxShared>,
    entries: Vec<BatchEntry>,
    parallel: bool,
) -> ResultAggregator {
    let mut aggregator = ResultAggregator::new(entries.len());
    for (position, entry) in entries.into_iter().enumerate() {
        match entry {
            BatchEntry::Stores(stores) => match issue_stores(tx, stores) {
                Ok(slot) => aggregator.fill(position, slot),
                Err(err) => aggregator.fail(err),
            },
            BatchEntry::Callback(callback) => {
                let mut future = callback(TxScope::new(db.clone(), Arc::clone(tx)));
                let outcome = if parallel {
                    match futures::poll!(&mut future) {
                        Poll::Ready(outcome) => outcome.map(BatchSlot::Value),
                        Poll::Pending => {
                            debug!(tx_id = tx.id(), position, "callback left pending");
                            Ok(BatchSlot::Pending(PendingCallback { future }))
                        }
                    }
                } else {
                    future.await.map(BatchSlot::Value)
                };
                match outcome {
                    Ok(slot) => aggregator.fill(position, slot),
                    Err(err) => aggregator.fail(err),
                }
            }
        }
        if aggregator.has_failed() {
            break;
        }
    }
    aggregator
}

fn issue_stores(tx: &TxShared, stores: Vec<(String, TableOps)>) -> Result<BatchSlot, OrdkvError> {
    tx.with_active(|native| {
        let mut keys: BTreeMap<String, Vec<Option<Value>>> = BTreeMap::new();
        for (store, ops) in stores {
            let slot = keys.entry(store.clone()).or_default();
            for op in ops.into_ops() {
                slot.push(op.apply(native, &store)?);
            }
        }
        Ok(BatchSlot::Stores(keys))
    })
}

#[cfg(test)]
mod tests {
    use super::{BatchEntry, BatchOptions, batch_scope};
    use crate::catalog::types::Value;
    use crate::commit::ops::TableOp;

    #[test]
    fn scope_is_the_sorted_union_of_stores_and_extras() {
        let entries = vec![
            BatchEntry::store("b", vec![TableOp::add(Value::Integer(1))]),
            BatchEntry::callback(|_scope| async { Ok(Value::Null) }),
            BatchEntry::stores([("a", vec![TableOp::Clear]), ("b", vec![TableOp::Clear])]),
        ];
        let options = BatchOptions::new().with_extra_store("c").with_extra_store("a");
        assert_eq!(batch_scope(&entries, &options), vec!["a", "b", "c"]);
        assert_eq!(entries.iter().map(BatchEntry::op_count).sum::<usize>(), 3);
    }
}
