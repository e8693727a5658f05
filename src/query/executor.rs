use crate::catalog::types::Value;
use crate::commit::tx::TxShared;
use crate::error::OrdkvError;
use crate::query::builder::QueryTarget;
use crate::query::plan::{CursorKind, QueryPlan};
use crate::storage::engine::{CursorMode, EngineTransaction, TxMode};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    Records(Vec<Value>),
    Count(u64),
}

/// Runs `plan` in the transaction the target resolves to.
///
/// A query bound to a batch runs in that batch's transaction. A detached
/// query issued from a batch callback joins that batch's transaction when it
/// covers the store (and may write, if the plan writes); otherwise it gets a
/// transaction of its own that commits once the cursor completes.
pub(crate) async fn execute(target: &QueryTarget, plan: QueryPlan) -> Result<QueryOutput, OrdkvError> {
    let db = &target.db;
    db.ensure_open()?;
    let max_scan = db.config().max_scan_records;

    if let Some(tx) = &target.scope {
        return tx.with_active(|native| run_cursor(native, &plan, max_scan));
    }
    if let Some(tx) = db.joinable_current(std::slice::from_ref(&plan.store))
        && (!plan.writes() || tx.mode() == TxMode::ReadWrite)
    {
        debug!(tx_id = tx.id(), store = %plan.store, "query joined current transaction");
        return tx.with_active(|native| run_cursor(native, &plan, max_scan));
    }

    let mode = if plan.writes() {
        TxMode::ReadWrite
    } else {
        TxMode::ReadOnly
    };
    let tx: Arc<TxShared> = TxShared::open(db, vec![plan.store.clone()], mode)?;
    let output = tx.with_active(|native| run_cursor(native, &plan, max_scan))?;
    tx.commit()?;
    Ok(output)
}

/// Drives one cursor to completion, or to the end of the limit window.
pub(crate) fn run_cursor(
    native: &mut dyn EngineTransaction,
    plan: &QueryPlan,
    max_scan_records: Option<usize>,
) -> Result<QueryOutput, OrdkvError> {
    let source = plan.source();
    if plan.is_native_count() {
        let count = native.count(&source, plan.range.as_ref())?;
        debug!(store = %plan.store, count, "native count completed");
        return Ok(QueryOutput::Count(count));
    }

    let mode = if plan.kind == CursorKind::Key && plan.filters.is_empty() {
        CursorMode::Key
    } else {
        CursorMode::Value
    };
    let mut cursor = native.open_cursor(&source, plan.range.as_ref(), plan.direction(), mode)?;

    let mut records = Vec::new();
    let mut counted: u64 = 0;
    // Matching records seen so far, skipped ones included.
    let mut matched: u64 = 0;
    let mut scanned: usize = 0;

    while let Some(current) = cursor.current() {
        scanned += 1;
        if let Some(max) = max_scan_records
            && scanned > max
        {
            return Err(OrdkvError::ScanBoundExceeded {
                scanned,
                max_scan_records: max,
            });
        }

        if let Some(window) = plan.window {
            if matched >= window.end() {
                break;
            }
            if plan.filters.is_empty() && matched < window.offset {
                let jump = window.offset - matched;
                matched = window.offset;
                cursor.advance(jump)?;
                continue;
            }
        }

        let is_match = match &current.value {
            Some(value) => {
                let mut all = true;
                for filter in &plan.filters {
                    if !filter.matches(value)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            None => true,
        };
        if !is_match {
            cursor.advance(1)?;
            continue;
        }
        matched += 1;
        if plan.window.is_some_and(|window| matched <= window.offset) {
            cursor.advance(1)?;
            continue;
        }

        match plan.kind {
            CursorKind::Count => counted += 1,
            CursorKind::Key => records.push(plan.map_output(current.key)?),
            CursorKind::Value => {
                let mut value = current.value.unwrap_or(Value::Null);
                if let Some(patch) = &plan.patch {
                    value = patch.apply(&value)?;
                    cursor.update(value.clone())?;
                }
                records.push(plan.map_output(value)?);
            }
        }
        cursor.advance(1)?;
    }

    debug!(
        store = %plan.store,
        index = ?plan.index,
        scanned,
        matched,
        "cursor completed"
    );
    Ok(match plan.kind {
        CursorKind::Count => QueryOutput::Count(counted),
        CursorKind::Key | CursorKind::Value => QueryOutput::Records(records),
    })
}

#[cfg(test)]
mod tests {
    use super::{QueryOutput, run_cursor};
    use crate::catalog::Catalog;
    use crate::catalog::schema::{KeyPath, StoreSchema};
    use crate::catalog::types::Value;
    use crate::error::OrdkvError;
    use crate::query::plan::{CursorKind, FilterPredicate, LimitWindow, QueryPlan};
    use crate::storage::engine::{StorageEngine, TxMode};
    use crate::storage::memory::MemoryEngine;
    use serde_json::json;

    fn engine_with(ids: &[i64]) -> MemoryEngine {
        let engine = MemoryEngine::new(
            "runner",
            1,
            Catalog::new().with_store(StoreSchema::new("items").with_key_path(KeyPath::field("id"))),
        );
        let mut tx = engine
            .transaction(&["items".to_string()], TxMode::ReadWrite)
            .expect("tx");
        for id in ids {
            tx.put("items", Value::from(json!({"id": id, "odd": id % 2 == 1})), None)
                .expect("put");
        }
        tx.commit().expect("commit");
        engine
    }

    fn run(engine: &MemoryEngine, plan: &QueryPlan, max: Option<usize>) -> Result<QueryOutput, OrdkvError> {
        let mut tx = engine
            .transaction(&["items".to_string()], TxMode::ReadOnly)
            .expect("tx");
        run_cursor(tx.as_mut(), plan, max)
    }

    fn ids(output: QueryOutput) -> Vec<i64> {
        match output {
            QueryOutput::Records(records) => records
                .iter()
                .map(|r| r.get_field("id").and_then(Value::as_i64).unwrap_or(r.as_i64().unwrap_or(-1)))
                .collect(),
            QueryOutput::Count(_) => panic!("expected records"),
        }
    }

    #[test]
    fn window_without_filters_jumps_to_offset() {
        let engine = engine_with(&[1, 2, 3, 4, 5]);
        let mut plan = QueryPlan::new("items", None);
        plan.window = Some(LimitWindow::new(2, 2).expect("window"));
        assert_eq!(ids(run(&engine, &plan, None).expect("run")), vec![3, 4]);
    }

    #[test]
    fn window_with_filters_skips_matching_records_only() {
        let engine = engine_with(&[1, 2, 3, 4, 5, 6, 7]);
        let mut plan = QueryPlan::new("items", None);
        plan.filters.push(FilterPredicate::Equals("odd".into(), Value::Boolean(true)));
        plan.window = Some(LimitWindow::new(1, 2).expect("window"));
        assert_eq!(ids(run(&engine, &plan, None).expect("run")), vec![3, 5]);
    }

    #[test]
    fn filtered_counts_iterate_and_native_counts_do_not() {
        let engine = engine_with(&[1, 2, 3, 4]);
        let mut plan = QueryPlan::new("items", None);
        plan.kind = CursorKind::Count;
        assert_eq!(run(&engine, &plan, Some(1)).expect("native"), QueryOutput::Count(4));

        plan.filters.push(FilterPredicate::Equals("odd".into(), Value::Boolean(false)));
        assert_eq!(run(&engine, &plan, None).expect("iterated"), QueryOutput::Count(2));
    }

    #[test]
    fn scan_bound_stops_long_walks() {
        let engine = engine_with(&[1, 2, 3, 4]);
        let plan = QueryPlan::new("items", None);
        let err = run(&engine, &plan, Some(3)).expect_err("bounded");
        assert!(matches!(err, OrdkvError::ScanBoundExceeded { scanned: 4, max_scan_records: 3 }));
    }
}
