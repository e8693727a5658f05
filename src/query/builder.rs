//! Typestate query builder.
//!
//! Every chain call consumes the query and returns it in a narrower state,
//! so sequences the cursor runner cannot honour do not compile:
//!
//! ```compile_fail
//! # async fn demo(db: ordkv::Database) {
//! // no `count` once a limit window is set
//! let _ = db.store("people").query().all().limit(2).count();
//! # }
//! ```
//!
//! ```compile_fail
//! # async fn demo(db: ordkv::Database) {
//! // key queries cannot modify records
//! let _ = db.store("people").query().all().keys().modify(ordkv::ModifyPatch::new());
//! # }
//! ```
//!
//! Build errors (a bad range, a bad limit) are held by the query and only
//! surface from `execute()`, which then returns them without touching
//! storage.

use crate::Database;
use crate::catalog::types::Value;
use crate::commit::tx::TxShared;
use crate::error::{EvalError, OrdkvError};
use crate::query::executor::{self, QueryOutput};
use crate::query::plan::{CursorKind, FilterPredicate, LimitWindow, ModifyPatch, Order, QueryPlan};
use crate::query::range::{RangeOp, RangeSpec, translate};
use crate::storage::engine::KeyRange;
use std::marker::PhantomData;
use std::sync::Arc;

mod sealed {
    pub trait Sealed {}
}

pub trait QueryState: sealed::Sealed {}

/// Nothing chosen yet: pick a range, `all()` or a filter.
pub struct Fresh;
pub struct Ranged;
pub struct Filtered;
pub struct Descending;
pub struct Distinct;
pub struct Limited;
pub struct Mapped;
pub struct Keyed;
/// Terminal: the query rewrites records.
pub struct Modified;
/// Terminal: the query resolves to a count.
pub struct Counting;

/// Cursor output marker.
pub trait CursorOutput: sealed::Sealed {
    const KIND: CursorKind;
}

pub struct Values;
pub struct Keys;

impl CursorOutput for Values {
    const KIND: CursorKind = CursorKind::Value;
}

impl CursorOutput for Keys {
    const KIND: CursorKind = CursorKind::Key;
}

macro_rules! states {
    ($($state:ty),*) => {
        $(
            impl sealed::Sealed for $state {}
            impl QueryState for $state {}
        )*
    };
}

states!(
    Fresh, Ranged, Filtered, Descending, Distinct, Limited, Mapped, Keyed, Modified, Counting
);
impl sealed::Sealed for Values {}
impl sealed::Sealed for Keys {}

/// States accepting another filter, and the state the filter leads to.
pub trait CanFilter: QueryState {
    type Next: QueryState;
}
/// States accepting `desc()`.
pub trait CanReverse: QueryState {}
/// States accepting `distinct()`.
pub trait CanDistinct: QueryState {}
/// States accepting `limit()`.
pub trait CanLimit: QueryState {}
/// States accepting `keys()`.
pub trait CanKeys: QueryState {}
/// States accepting `count()`.
pub trait CanCount: QueryState {}
/// States accepting `modify()`.
pub trait CanModify: QueryState {}
/// States accepting `map()`.
pub trait CanMap: QueryState {}
/// States whose `execute()` collects records.
pub trait Collecting: QueryState {}

macro_rules! allow {
    ($capability:ident: $($state:ty),*) => {
        $(impl $capability for $state {})*
    };
}

impl CanFilter for Fresh {
    type Next = Filtered;
}
impl CanFilter for Ranged {
    type Next = Filtered;
}
impl CanFilter for Filtered {
    type Next = Filtered;
}
impl CanFilter for Descending {
    type Next = Descending;
}
impl CanFilter for Distinct {
    type Next = Distinct;
}
impl CanFilter for Limited {
    type Next = Limited;
}
impl CanFilter for Mapped {
    type Next = Mapped;
}
impl CanFilter for Keyed {
    type Next = Keyed;
}

allow!(CanReverse: Ranged, Filtered, Distinct, Limited, Mapped, Keyed);
allow!(CanDistinct: Ranged, Filtered, Descending, Limited, Mapped, Keyed);
allow!(CanLimit: Ranged, Filtered, Descending, Distinct, Mapped, Keyed);
allow!(CanKeys: Ranged, Filtered, Descending, Distinct, Limited, Mapped);
allow!(CanCount: Ranged, Distinct, Mapped);
allow!(CanModify: Ranged, Filtered, Descending, Distinct, Limited, Mapped);
allow!(CanMap: Ranged, Filtered, Descending, Distinct, Limited, Keyed);
allow!(Collecting: Fresh, Ranged, Filtered, Descending, Distinct, Limited, Mapped, Keyed, Modified);

/// Where a query runs: inside a batch transaction, or wherever the
/// database decides when it executes.
#[derive(Clone)]
pub(crate) struct QueryTarget {
    pub(crate) db: Database,
    pub(crate) scope: Option<Arc<TxShared>>,
}

impl QueryTarget {
    pub(crate) fn detached(db: Database) -> Self {
        Self { db, scope: None }
    }

    pub(crate) fn scoped(db: Database, tx: Arc<TxShared>) -> Self {
        Self {
            db,
            scope: Some(tx),
        }
    }
}

#[must_use = "queries do nothing until executed"]
pub struct Query<S, K = Values> {
    target: QueryTarget,
    plan: Result<QueryPlan, OrdkvError>,
    _state: PhantomData<fn() -> (S, K)>,
}

impl<S, K> Query<S, K> {
    fn into_state<S2, K2>(self) -> Query<S2, K2> {
        Query {
            target: self.target,
            plan: self.plan,
            _state: PhantomData,
        }
    }

    fn edit<S2, K2>(self, f: impl FnOnce(&mut QueryPlan) -> Result<(), OrdkvError>) -> Query<S2, K2> {
        let plan = self.plan.and_then(|mut plan| {
            f(&mut plan)?;
            Ok(plan)
        });
        Query {
            target: self.target,
            plan,
            _state: PhantomData,
        }
    }

    /// The plan built so far, or the deferred build error.
    pub fn plan(&self) -> Result<&QueryPlan, &OrdkvError> {
        self.plan.as_ref()
    }
}

impl Query<Fresh, Values> {
    pub(crate) fn new(target: QueryTarget, store: &str, index: Option<String>) -> Self {
        Self {
            target,
            plan: Ok(QueryPlan::new(store, index)),
            _state: PhantomData,
        }
    }

    fn with_range(self, range: Result<KeyRange, OrdkvError>) -> Query<Ranged, Values> {
        self.edit(|plan| {
            plan.range = Some(range?);
            Ok(())
        })
    }

    pub fn only(self, key: impl Into<Value>) -> Query<Ranged, Values> {
        self.range(RangeSpec::new().eq(key))
    }

    /// Both ends inclusive unless the matching `*_open` flag is set.
    pub fn bound(
        self,
        lower: impl Into<Value>,
        upper: impl Into<Value>,
        lower_open: bool,
        upper_open: bool,
    ) -> Query<Ranged, Values> {
        let lower_op = if lower_open { RangeOp::Gt } else { RangeOp::Gte };
        let upper_op = if upper_open { RangeOp::Lt } else { RangeOp::Lte };
        self.range(RangeSpec::new().with(lower_op, lower).with(upper_op, upper))
    }

    pub fn lower_bound(self, lower: impl Into<Value>, open: bool) -> Query<Ranged, Values> {
        let spec = if open {
            RangeSpec::new().gt(lower)
        } else {
            RangeSpec::new().gte(lower)
        };
        self.range(spec)
    }

    pub fn upper_bound(self, upper: impl Into<Value>, open: bool) -> Query<Ranged, Values> {
        let spec = if open {
            RangeSpec::new().lt(upper)
        } else {
            RangeSpec::new().lte(upper)
        };
        self.range(spec)
    }

    pub fn range(self, spec: RangeSpec) -> Query<Ranged, Values> {
        let range = translate(&spec);
        self.with_range(range)
    }

    /// Whole store or index.
    pub fn all(self) -> Query<Ranged, Values> {
        self.into_state()
    }
}

impl<S: CanFilter, K> Query<S, K> {
    /// Keeps records whose field at `path` equals `value`.
    pub fn filter(self, path: impl Into<String>, value: impl Into<Value>) -> Query<S::Next, K> {
        let predicate = FilterPredicate::Equals(path.into(), value.into());
        self.edit(|plan| {
            plan.filters.push(predicate);
            Ok(())
        })
    }

    /// Keeps records matching every `(path, value)` pair.
    pub fn filter_fields<I, P, V>(self, fields: I) -> Query<S::Next, K>
    where
        I: IntoIterator<Item = (P, V)>,
        P: Into<String>,
        V: Into<Value>,
    {
        let fields = fields
            .into_iter()
            .map(|(path, value)| (path.into(), value.into()))
            .collect();
        self.edit(|plan| {
            plan.filters.push(FilterPredicate::Fields(fields));
            Ok(())
        })
    }

    pub fn filter_fn<F>(self, predicate: F) -> Query<S::Next, K>
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.try_filter_fn(move |record: &Value| Ok(predicate(record)))
    }

    /// A predicate error rejects the query with `FilterEvaluation` and aborts
    /// its transaction.
    pub fn try_filter_fn<F>(self, predicate: F) -> Query<S::Next, K>
    where
        F: Fn(&Value) -> Result<bool, EvalError> + Send + Sync + 'static,
    {
        self.edit(|plan| {
            plan.filters.push(FilterPredicate::Predicate(Arc::new(predicate)));
            Ok(())
        })
    }
}

impl<S: CanReverse, K> Query<S, K> {
    pub fn desc(self) -> Query<Descending, K> {
        self.edit(|plan| {
            plan.order = Order::Desc;
            Ok(())
        })
    }
}

impl<S: CanDistinct, K> Query<S, K> {
    /// One record per distinct key of the walked index.
    pub fn distinct(self) -> Query<Distinct, K> {
        self.edit(|plan| {
            plan.distinct = true;
            Ok(())
        })
    }
}

impl<S: CanLimit, K> Query<S, K> {
    /// Same as `limit_window(0, count)`.
    pub fn limit(self, count: u64) -> Query<Limited, K> {
        self.limit_window(0, count)
    }

    /// Skips the first `offset` matching records and keeps at most `count`.
    pub fn limit_window(self, offset: u64, count: u64) -> Query<Limited, K> {
        self.edit(|plan| {
            plan.window = Some(LimitWindow::new(offset, count)?);
            Ok(())
        })
    }
}

impl<S: CanKeys> Query<S, Values> {
    /// Yields cursor keys instead of records: the index key on an index
    /// query, the primary key on a store query.
    pub fn keys(self) -> Query<Keyed, Keys> {
        self.edit(|plan| {
            plan.kind = CursorKind::Key;
            Ok(())
        })
    }
}

impl<S: CanCount, K> Query<S, K> {
    pub fn count(self) -> Query<Counting, K> {
        self.edit(|plan| {
            plan.kind = CursorKind::Count;
            Ok(())
        })
    }
}

impl<S: CanModify> Query<S, Values> {
    /// Applies `patch` to every matching record inside the query's
    /// transaction and yields the patched records.
    pub fn modify(self, patch: ModifyPatch) -> Query<Modified, Values> {
        self.edit(|plan| {
            plan.patch = Some(patch);
            Ok(())
        })
    }
}

impl<S: CanMap, K> Query<S, K> {
    pub fn map<F>(self, mapper: F) -> Query<Mapped, K>
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.try_map(move |value: Value| Ok(mapper(value)))
    }

    /// A mapper error rejects the query with `FilterEvaluation` and aborts
    /// its transaction.
    pub fn try_map<F>(self, mapper: F) -> Query<Mapped, K>
    where
        F: Fn(Value) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        self.edit(|plan| {
            plan.push_mapper(Arc::new(mapper));
            Ok(())
        })
    }
}

impl<S: Collecting, K: CursorOutput> Query<S, K> {
    pub async fn execute(self) -> Result<Vec<Value>, OrdkvError> {
        let mut plan = self.plan?;
        if plan.kind != CursorKind::Count {
            plan.kind = K::KIND;
        }
        match executor::execute(&self.target, plan).await? {
            QueryOutput::Records(records) => Ok(records),
            QueryOutput::Count(_) => Err(OrdkvError::Validation(
                "collecting query produced a count".into(),
            )),
        }
    }
}

impl<K> Query<Counting, K> {
    pub async fn execute(self) -> Result<u64, OrdkvError> {
        let plan = self.plan?;
        match executor::execute(&self.target, plan).await? {
            QueryOutput::Count(count) => Ok(count),
            QueryOutput::Records(records) => Ok(records.len() as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::Database;
    use crate::catalog::Catalog;
    use crate::catalog::schema::{KeyPath, StoreSchema};
    use crate::config::OrdkvConfig;
    use crate::error::OrdkvErrorCode;
    use crate::query::plan::{CursorKind, Order};
    use crate::storage::engine::KeyRange;
    use crate::storage::memory::MemoryEngine;

    fn db() -> Database {
        let catalog = Catalog::new().with_store(
            StoreSchema::new("people")
                .with_key_path(KeyPath::field("id"))
                .with_index("byAge", KeyPath::field("age")),
        );
        Database::open(MemoryEngine::new("test", 1, catalog), OrdkvConfig::default())
            .expect("open")
    }

    #[test]
    fn chain_calls_record_plan_fields() {
        let db = db();
        let query = db
            .store("people")
            .query_index("byAge")
            .bound(20, 40, false, true)
            .filter("name", "Ann")
            .desc()
            .distinct()
            .limit_window(1, 2)
            .keys();
        let plan = query.plan().expect("valid plan");
        assert_eq!(plan.index.as_deref(), Some("byAge"));
        assert_eq!(
            plan.range,
            Some(KeyRange::bound(20, 40, false, true).expect("bound"))
        );
        assert_eq!(plan.order, Order::Desc);
        assert!(plan.distinct);
        assert_eq!(plan.filters.len(), 1);
        assert_eq!(plan.kind, CursorKind::Key);
        assert_eq!(plan.window.map(|w| (w.offset, w.count)), Some((1, 2)));
    }

    #[test]
    fn build_errors_are_deferred_and_sticky() {
        let db = db();
        let query = db.store("people").query().bound(40, 20, false, false).limit(3);
        let err = query.plan().expect_err("inverted bound");
        assert_eq!(err.code(), OrdkvErrorCode::DataError);

        let query = db.store("people").query().all().limit(0).map(|v| v);
        let err = query.plan().expect_err("zero limit");
        assert_eq!(err.code(), OrdkvErrorCode::LimitArgument);
    }
}
