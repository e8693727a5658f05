use ordkv::catalog::Catalog;
use ordkv::catalog::schema::{KeyPath, StoreSchema};
use ordkv::error::{EvalError, OrdkvErrorCode};
use ordkv::{Database, MemoryEngine, ModifyPatch, OrdkvConfig, TableOps, Value};
use serde_json::json;

fn catalog() -> Catalog {
    Catalog::new().with_store(
        StoreSchema::new("players")
            .with_key_path(KeyPath::field("id"))
            .with_index("team", KeyPath::field("team"))
            .with_index("score", KeyPath::field("score")),
    )
}

async fn players_with(config: OrdkvConfig) -> Database {
    let db = Database::open(MemoryEngine::new("modifiers", 1, catalog()), config).expect("open db");
    let ops = TableOps::from_json(&json!([{
        "put": [
            {"id": 1, "team": "red", "score": 10},
            {"id": 2, "team": "blue", "score": 20},
            {"id": 3, "team": "red", "score": 30},
            {"id": 4, "team": "blue", "score": 40},
            {"id": 5, "team": "green", "score": 50}
        ]
    }]))
    .expect("ops");
    db.table_batch("players", ops, Default::default())
        .await
        .expect("seed players");
    db
}

async fn players() -> Database {
    players_with(OrdkvConfig::default()).await
}

fn ids(records: &[Value]) -> Vec<i64> {
    records
        .iter()
        .map(|r| r.get_field("id").and_then(Value::as_i64).expect("id"))
        .collect()
}

#[tokio::test]
async fn limit_window_skips_then_collects() {
    let db = players().await;
    let store = db.store("players");

    let second = store.query().all().limit_window(1, 1).execute().await.expect("window");
    assert_eq!(ids(&second), vec![2]);

    let first_two = store.query().all().limit(2).execute().await.expect("limit");
    let same = store.query().all().limit_window(0, 2).execute().await.expect("window");
    assert_eq!(ids(&first_two), vec![1, 2]);
    assert_eq!(first_two, same);

    let tail = store.query().all().limit_window(3, 10).execute().await.expect("tail");
    assert_eq!(ids(&tail), vec![4, 5]);
}

#[tokio::test]
async fn limit_window_counts_only_matching_records() {
    let db = players().await;
    let reds_after_the_first = db
        .store("players")
        .query()
        .all()
        .filter("team", "red")
        .limit_window(1, 5)
        .execute()
        .await
        .expect("filtered window");
    assert_eq!(ids(&reds_after_the_first), vec![3]);
}

#[tokio::test]
async fn zero_limit_rejects_at_execute() {
    let db = players().await;
    let err = db
        .store("players")
        .query()
        .all()
        .limit(0)
        .execute()
        .await
        .expect_err("zero limit");
    assert_eq!(err.code(), OrdkvErrorCode::LimitArgument);
}

#[tokio::test]
async fn distinct_yields_one_record_per_index_key() {
    let db = players().await;
    let store = db.store("players");

    let ascending = store.query_index("team").all().distinct().execute().await.expect("asc");
    assert_eq!(ids(&ascending), vec![2, 5, 1]);

    // Descending key order; each duplicate key resolves to the record a
    // reverse scan meets first, the highest primary key.
    let descending = store
        .query_index("team")
        .all()
        .distinct()
        .desc()
        .execute()
        .await
        .expect("desc");
    assert_eq!(ids(&descending), vec![3, 5, 4]);

    let reversed = store.query_index("team").all().desc().execute().await.expect("plain desc");
    let mut first_seen: Vec<(Value, i64)> = Vec::new();
    for record in &reversed {
        let team = record.get_field("team").cloned().expect("team");
        if !first_seen.iter().any(|(seen, _)| *seen == team) {
            first_seen.push((team, ids(std::slice::from_ref(record))[0]));
        }
    }
    assert_eq!(
        first_seen.into_iter().map(|(_, id)| id).collect::<Vec<_>>(),
        ids(&descending)
    );

    let teams = store
        .query_index("team")
        .all()
        .distinct()
        .count()
        .execute()
        .await
        .expect("distinct count");
    assert_eq!(teams, 3);
}

#[tokio::test]
async fn modify_rewrites_only_matching_records() {
    let db = players().await;
    let store = db.store("players");
    let before = store.query().all().execute().await.expect("before");

    let patched = store
        .query()
        .all()
        .filter("team", "red")
        .modify(
            ModifyPatch::new()
                .set("score", 0)
                .compute("previous", |record| {
                    record.get_field("score").cloned().unwrap_or(Value::Null)
                }),
        )
        .execute()
        .await
        .expect("modify");
    assert_eq!(
        patched,
        vec![
            Value::from(json!({"id": 1, "team": "red", "score": 0, "previous": 10})),
            Value::from(json!({"id": 3, "team": "red", "score": 0, "previous": 30})),
        ]
    );

    let after = store.query().all().execute().await.expect("after");
    for (old, new) in before.iter().zip(&after) {
        if old.get_field("team") == Some(&Value::from("red")) {
            assert_eq!(new.get_field("score"), Some(&Value::Integer(0)));
        } else {
            assert_eq!(old, new);
        }
    }

    let zeroes = store.query_index("score").only(0).count().execute().await.expect("count");
    assert_eq!(zeroes, 2);
}

#[tokio::test]
async fn keys_yield_cursor_keys_in_cursor_order() {
    let db = players().await;
    let keys = db
        .store("players")
        .query_index("score")
        .range(ordkv::RangeSpec::new().gte(20))
        .desc()
        .keys()
        .execute()
        .await
        .expect("keys");
    assert_eq!(
        keys,
        vec![Value::Integer(50), Value::Integer(40), Value::Integer(30), Value::Integer(20)]
    );

    let teams = db
        .store("players")
        .query_index("team")
        .all()
        .distinct()
        .keys()
        .execute()
        .await
        .expect("distinct index keys");
    assert_eq!(teams, vec![Value::from("blue"), Value::from("green"), Value::from("red")]);

    let filtered = db
        .store("players")
        .query()
        .all()
        .keys()
        .filter("team", "blue")
        .execute()
        .await
        .expect("filtered keys");
    assert_eq!(filtered, vec![Value::Integer(2), Value::Integer(4)]);
}

#[tokio::test]
async fn filters_and_mappers_compose() {
    let db = players().await;
    let scores = db
        .store("players")
        .query()
        .filter_fields([("team", "blue")])
        .filter_fn(|record| {
            record
                .get_field("score")
                .and_then(Value::as_i64)
                .is_some_and(|score| score > 25)
        })
        .map(|record| {
            let score = record.get_field("score").and_then(Value::as_i64).unwrap_or(0);
            Value::Integer(score * 2)
        })
        .execute()
        .await
        .expect("mapped");
    assert_eq!(scores, vec![Value::Integer(80)]);
}

#[tokio::test]
async fn failing_predicate_rejects_with_filter_evaluation() {
    let db = players().await;
    let err = db
        .store("players")
        .query()
        .try_filter_fn(|record| {
            record
                .get_field("missing")
                .map(|_| true)
                .ok_or_else(|| EvalError::new("record has no 'missing' field"))
        })
        .execute()
        .await
        .expect_err("predicate error");
    assert_eq!(err.code(), OrdkvErrorCode::FilterEvaluation);
    assert!(err.to_string().contains("no 'missing' field"));
}

#[tokio::test]
async fn failing_patch_leaves_records_untouched() {
    let db = players().await;
    let err = db
        .store("players")
        .query()
        .all()
        .modify(ModifyPatch::new().set("score", 99).try_compute("bonus", |record| {
            match record.get_field("team").and_then(Value::as_str) {
                Some("green") => Err(EvalError::new("green has no bonus")),
                _ => Ok(Value::Integer(1)),
            }
        }))
        .execute()
        .await
        .expect_err("patch error");
    assert_eq!(err.code(), OrdkvErrorCode::FilterEvaluation);

    let rewritten = db
        .store("players")
        .query_index("score")
        .only(99)
        .count()
        .execute()
        .await
        .expect("count");
    assert_eq!(rewritten, 0);
}

#[tokio::test]
async fn scan_bound_rejects_long_walks() {
    let db = players_with(OrdkvConfig::bounded(3)).await;
    let err = db
        .store("players")
        .query()
        .all()
        .filter("team", "green")
        .execute()
        .await
        .expect_err("bounded");
    assert_eq!(err.code(), OrdkvErrorCode::ScanBoundExceeded);

    let limited = db
        .store("players")
        .query()
        .all()
        .limit(2)
        .execute()
        .await
        .expect("within bound");
    assert_eq!(ids(&limited), vec![1, 2]);
}
