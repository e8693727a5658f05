use criterion::{Criterion, black_box, criterion_group, criterion_main};
use ordkv::catalog::Catalog;
use ordkv::catalog::schema::{KeyPath, StoreSchema};
use ordkv::{BatchEntry, BatchOptions, Database, MemoryEngine, OrdkvConfig, RangeSpec, TableOp};
use serde_json::json;
use tokio::runtime::Runtime;

const STORE: &str = "users";
const SEEDED_RECORDS: i64 = 10_000;
const BATCH_RECORDS: i64 = 64;

async fn setup_db(seed_records: i64) -> Database {
    let catalog = Catalog::new().with_store(
        StoreSchema::new(STORE)
            .with_key_path(KeyPath::field("id"))
            .with_index("age", KeyPath::field("age")),
    );
    let db = Database::open(MemoryEngine::new("bench", 1, catalog), OrdkvConfig::default())
        .expect("open");
    let ops = (1..=seed_records)
        .map(|id| TableOp::put(json!({"id": id, "name": "bench-user", "age": 18 + id % 60})))
        .collect::<Vec<_>>();
    db.table_batch(STORE, ops, BatchOptions::new())
        .await
        .expect("seed");
    db
}

fn bench_cursor_scans(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let db = rt.block_on(setup_db(SEEDED_RECORDS));

    c.bench_function("index_range_scan_limit_100", |b| {
        b.iter(|| {
            rt.block_on(async {
                let records = db
                    .store(STORE)
                    .query_index("age")
                    .range(RangeSpec::new().gte(black_box(30)).lt(40))
                    .limit(100)
                    .execute()
                    .await
                    .expect("scan");
                black_box(records.len());
            });
        })
    });

    c.bench_function("filtered_full_scan", |b| {
        b.iter(|| {
            rt.block_on(async {
                let records = db
                    .store(STORE)
                    .query()
                    .all()
                    .filter("age", black_box(42))
                    .execute()
                    .await
                    .expect("scan");
                black_box(records.len());
            });
        })
    });

    c.bench_function("native_range_count", |b| {
        b.iter(|| {
            rt.block_on(async {
                let count = db
                    .store(STORE)
                    .query_index("age")
                    .range(RangeSpec::new().gte(20).lte(black_box(50)))
                    .count()
                    .execute()
                    .await
                    .expect("count");
                black_box(count);
            });
        })
    });
}

fn bench_batch_writes(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let db = rt.block_on(setup_db(0));

    let mut next_base = 1_i64;
    c.bench_function("put_64_records_in_one_batch", |b| {
        b.iter(|| {
            rt.block_on(async {
                let base = black_box(next_base);
                next_base += BATCH_RECORDS;
                let ops = (base..base + BATCH_RECORDS)
                    .map(|id| TableOp::put(json!({"id": id, "name": "bench-user", "age": 25})))
                    .collect::<Vec<_>>();
                db.batch(vec![BatchEntry::store(STORE, ops)], BatchOptions::new())
                    .await
                    .expect("batch");
            });
        })
    });

    let mut next_id = 1_i64;
    c.bench_function("put_64_records_as_64_batches", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = db.store(STORE);
                for _ in 0..BATCH_RECORDS {
                    let id = black_box(next_id);
                    next_id += 1;
                    store
                        .put(json!({"id": id, "name": "bench-user", "age": 25}))
                        .await
                        .expect("put");
                }
            });
        })
    });
}

criterion_group!(benches, bench_cursor_scans, bench_batch_writes);
criterion_main!(benches);
