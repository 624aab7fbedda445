//! Throughput of the bisection diff against the in-memory test double, at a
//! few row-count scales, for identical tables (the worst case for the
//! checksum-pruning path: every segment must be hashed, none ever leafs) and
//! for tables with a small fraction of changed rows (forces bisection all
//! the way to a handful of leaves).

use std::collections::HashMap;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use tablediff::testutil::{MemoryDatabase, MemoryDialect, MemoryTable};
use tablediff::{ColumnType, ColumnValue, DifferConfig, HashBisectDiffer, KeyValue, Row, TablePath, TableSegment};

fn rows(n: i64, val: &str) -> Vec<Row> {
    (0..n).map(|i| vec![ColumnValue::Key(KeyValue::Int(i)), ColumnValue::Text(val.to_string())]).collect()
}

fn build_segment(db: &Arc<MemoryDatabase>, table: &str, data: Vec<Row>) -> TableSegment {
    let columns = vec!["id".to_string(), "val".to_string()];
    let mut types = HashMap::new();
    types.insert("id".to_string(), ColumnType::Numeric { precision: 0 });
    types.insert("val".to_string(), ColumnType::String);
    db.insert_table(&TablePath::new(vec![table.to_string()]), MemoryTable::new(columns, types, data));

    TableSegment::new(
        Arc::clone(db),
        TablePath::new(vec![table.to_string()]),
        vec!["id".to_string()],
        None,
        vec!["val".to_string()],
        HashMap::new(),
        None,
        true,
    )
    .unwrap()
}

fn bench_identical(c: &mut Criterion) {
    let mut group = c.benchmark_group("identical_tables");
    for &n in &[1_000i64, 10_000, 100_000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let db = Arc::new(MemoryDatabase::new(MemoryDialect));
                let seg_a = build_segment(&db, "a", rows(n, "same"));
                let seg_b = build_segment(&db, "b", rows(n, "same"));
                let differ = HashBisectDiffer::new(DifferConfig::default()).unwrap();
                let mut stream = differ.diff(seg_a, seg_b).unwrap();
                let count = stream.by_ref().count();
                assert_eq!(count, 0);
            });
        });
    }
    group.finish();
}

fn bench_sparse_changes(c: &mut Criterion) {
    let mut group = c.benchmark_group("one_percent_changed");
    for &n in &[1_000i64, 10_000, 100_000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let db = Arc::new(MemoryDatabase::new(MemoryDialect));
                let a = rows(n, "same");
                let mut b_rows = a.clone();
                let changed = (n / 100).max(1);
                for i in 0..changed {
                    let idx = (i * 97 % n) as usize;
                    b_rows[idx] = vec![ColumnValue::Key(KeyValue::Int(idx as i64)), ColumnValue::Text("changed".to_string())];
                }
                let seg_a = build_segment(&db, "a", a);
                let seg_b = build_segment(&db, "b", b_rows);
                let differ = HashBisectDiffer::new(DifferConfig::default()).unwrap();
                let mut stream = differ.diff(seg_a, seg_b).unwrap();
                let _count = stream.by_ref().count();
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_identical, bench_sparse_changes);
criterion_main!(benches);
