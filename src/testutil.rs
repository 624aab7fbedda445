//! In-memory `Database`/`Dialect` test double.
//!
//! Not a dialect adapter in the sense excluded by the crate's scope — it
//! exists purely so the diff engine's own logic can be exercised against
//! real trait implementations instead of mocks of its own behavior. Built
//! behind the `test-support` feature so both this crate's unit tests and
//! its `tests/` integration tests can share one implementation rather than
//! maintaining two.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use md5::{Digest, Md5};

use crate::error::TableDiffError;
use crate::keyvalue::{ColumnType, ColumnValue, KeyValue, Row, Schema, TablePath, Vector};
use crate::segment::{Database, Dialect, MinMaxAggregator, QueryOutcome, RawSchema, ResultShape, SegmentQuery};

/// A single in-memory table: a fixed column order, per-column types, and a
/// row store in that column order.
pub struct MemoryTable {
    pub columns: Vec<String>,
    pub column_types: HashMap<String, ColumnType>,
    pub rows: Vec<Row>,
}

impl MemoryTable {
    pub fn new(columns: Vec<String>, column_types: HashMap<String, ColumnType>, rows: Vec<Row>) -> Self {
        for row in &rows {
            assert_eq!(row.len(), columns.len(), "row arity must match column list");
        }
        Self {
            columns,
            column_types,
            rows,
        }
    }

    fn col_index(&self, name: &str) -> usize {
        self.columns
            .iter()
            .position(|c| c == name)
            .unwrap_or_else(|| panic!("column '{name}' not present in memory table"))
    }
}

/// An in-memory `Database`: a name-keyed map of [`MemoryTable`]s.
pub struct MemoryDatabase {
    dialect: MemoryDialect,
    tables: Mutex<HashMap<String, MemoryTable>>,
}

impl MemoryDatabase {
    pub fn new(dialect: MemoryDialect) -> Self {
        Self {
            dialect,
            tables: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert_table(&self, path: &TablePath, table: MemoryTable) {
        self.tables.lock().unwrap().insert(path.to_string(), table);
    }

    fn key_value_at(row: &Row, idx: usize) -> KeyValue {
        match &row[idx] {
            ColumnValue::Key(k) => k.clone(),
            other => panic!("expected key value in column, found {other:?}"),
        }
    }

    fn row_in_bounds(&self, table: &MemoryTable, query: &SegmentQuery, row: &Row) -> bool {
        if let (Some(min_key), Some(max_key)) = (&query.min_key, &query.max_key) {
            for (i, col) in query.key_columns.iter().enumerate() {
                let idx = table.col_index(col);
                let v = Self::key_value_at(row, idx);
                if v < min_key.as_slice()[i] || v >= max_key.as_slice()[i] {
                    return false;
                }
            }
        }
        if let Some(update_col) = &query.update_column {
            let idx = table.col_index(update_col);
            if let ColumnValue::Key(v) = &row[idx] {
                if let Some(lo) = &query.min_update {
                    if v < lo {
                        return false;
                    }
                }
                if let Some(hi) = &query.max_update {
                    if v >= hi {
                        return false;
                    }
                }
            }
        }
        true
    }

    fn project(&self, table: &MemoryTable, query: &SegmentQuery, row: &Row) -> Row {
        query
            .relevant_columns
            .iter()
            .map(|c| row[table.col_index(c)].clone())
            .collect()
    }
}

impl Database for MemoryDatabase {
    fn query_table_schema(&self, path: &TablePath) -> Result<RawSchema, TableDiffError> {
        let tables = self.tables.lock().unwrap();
        let table = tables
            .get(&path.to_string())
            .ok_or_else(|| TableDiffError::Adapter(format!("no such table: {path}")))?;
        Ok(table.column_types.clone())
    }

    fn process_query_table_schema(
        &self,
        path: &TablePath,
        raw: &RawSchema,
        refine: bool,
        _refine_where: Option<&str>,
    ) -> Result<(Schema, Option<Vec<Row>>), TableDiffError> {
        let tables = self.tables.lock().unwrap();
        let table = tables
            .get(&path.to_string())
            .ok_or_else(|| TableDiffError::Adapter(format!("no such table: {path}")))?;
        let samples = if refine { Some(table.rows.clone()) } else { None };
        Ok((raw.clone(), samples))
    }

    fn query(&self, query: &SegmentQuery) -> Result<QueryOutcome, TableDiffError> {
        let tables = self.tables.lock().unwrap();
        let table = tables
            .get(&query.table_path.to_string())
            .ok_or_else(|| TableDiffError::Adapter(format!("no such table: {}", query.table_path)))?;

        let matching: Vec<&Row> = table
            .rows
            .iter()
            .filter(|row| self.row_in_bounds(table, query, row))
            .collect();

        match query.shape {
            ResultShape::Count => Ok(QueryOutcome::Count(matching.len() as u64)),
            ResultShape::Rows => Ok(QueryOutcome::Rows(
                matching.into_iter().map(|row| self.project(table, query, row)).collect(),
            )),
            ResultShape::CountAndChecksum => {
                if matching.is_empty() {
                    return Ok(QueryOutcome::CountAndChecksum(0, None));
                }
                let mut checksum: u128 = 0;
                for row in &matching {
                    let projected = self.project(table, query, row);
                    let mut normalized = String::new();
                    for (i, v) in projected.iter().enumerate() {
                        let col = &query.relevant_columns[i];
                        let col_type = table.column_types.get(col).cloned().unwrap_or(ColumnType::Unsupported);
                        normalized.push_str(&self.dialect.normalize_value(v, &col_type));
                        normalized.push('\u{1e}');
                    }
                    checksum ^= self.dialect.render_md5(&ColumnValue::Text(normalized));
                }
                Ok(QueryOutcome::CountAndChecksum(matching.len() as u64, Some(checksum)))
            }
            ResultShape::KeyRange => {
                if matching.is_empty() {
                    return Ok(QueryOutcome::KeyRange(None));
                }
                let mut mins: Vec<KeyValue> = Vec::new();
                let mut maxs: Vec<KeyValue> = Vec::new();
                for (i, col) in query.key_columns.iter().enumerate() {
                    let idx = table.col_index(col);
                    let mut values = matching.iter().map(|row| Self::key_value_at(row, idx));
                    let first = values.next().expect("checked non-empty above");
                    let (mut mn, mut mx) = (first.clone(), first);
                    for v in values {
                        if v < mn {
                            mn = v.clone();
                        }
                        if v > mx {
                            mx = v.clone();
                        }
                    }
                    mins.push(mn);
                    maxs.push(mx);
                    let _ = i;
                }
                Ok(QueryOutcome::KeyRange(Some((Vector::new(mins), Vector::new(maxs)))))
            }
        }
    }
}

/// A trivial dialect: MD5 over the `Display` rendering of each value,
/// case-sensitive identifier quoting via backticks, native min/max.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryDialect;

impl Dialect for MemoryDialect {
    fn render_md5(&self, value: &ColumnValue) -> u128 {
        let mut hasher = Md5::new();
        hasher.update(value.to_string().as_bytes());
        let digest = hasher.finalize();
        u128::from_be_bytes(digest.into())
    }

    fn normalize_value(&self, value: &ColumnValue, _column_type: &ColumnType) -> String {
        match value {
            ColumnValue::Null => "\u{0}NULL\u{0}".to_string(),
            other => other.to_string(),
        }
    }

    fn quote_ident(&self, ident: &str, case_sensitive: bool) -> String {
        if case_sensitive {
            format!("\"{ident}\"")
        } else {
            ident.to_lowercase()
        }
    }

    fn min_max_aggregator(&self) -> MinMaxAggregator {
        MinMaxAggregator::Native
    }

    fn successor_of(&self, value: &KeyValue) -> Result<KeyValue, crate::error::SchemaError> {
        value.successor("<memory-dialect>")
    }
}

/// A `Database` decorator that fails queries of one shape once a call
/// budget is exhausted, for exercising worker-exception propagation
/// (`PriorityYielder`'s exception latch) without a real flaky adapter.
pub struct FaultInjectingDatabase {
    inner: Arc<dyn Database>,
    fail_shape: ResultShape,
    calls_before_failure: usize,
    calls_seen: AtomicUsize,
}

impl FaultInjectingDatabase {
    pub fn new(inner: Arc<dyn Database>, fail_shape: ResultShape, calls_before_failure: usize) -> Self {
        Self {
            inner,
            fail_shape,
            calls_before_failure,
            calls_seen: AtomicUsize::new(0),
        }
    }
}

impl Database for FaultInjectingDatabase {
    fn query_table_schema(&self, path: &TablePath) -> Result<RawSchema, TableDiffError> {
        self.inner.query_table_schema(path)
    }

    fn process_query_table_schema(
        &self,
        path: &TablePath,
        raw: &RawSchema,
        refine: bool,
        refine_where: Option<&str>,
    ) -> Result<(Schema, Option<Vec<Row>>), TableDiffError> {
        self.inner.process_query_table_schema(path, raw, refine, refine_where)
    }

    fn query(&self, query: &SegmentQuery) -> Result<QueryOutcome, TableDiffError> {
        if query.shape == self.fail_shape {
            let seen = self.calls_seen.fetch_add(1, Ordering::SeqCst);
            if seen >= self.calls_before_failure {
                return Err(TableDiffError::Adapter(format!(
                    "injected failure on {:?} query against {}",
                    self.fail_shape, query.table_path
                )));
            }
        }
        self.inner.query(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_order_independent() {
        let dialect = MemoryDialect;
        let db = MemoryDatabase::new(dialect);
        let columns = vec!["id".to_string(), "val".to_string()];
        let mut types = HashMap::new();
        types.insert("id".to_string(), ColumnType::Numeric { precision: 0 });
        types.insert("val".to_string(), ColumnType::String);

        let rows_a = vec![
            vec![ColumnValue::Key(KeyValue::Int(1)), ColumnValue::Text("x".into())],
            vec![ColumnValue::Key(KeyValue::Int(2)), ColumnValue::Text("y".into())],
        ];
        let rows_b = vec![rows_a[1].clone(), rows_a[0].clone()];

        let path = TablePath::new(vec!["a".into()]);
        db.insert_table(&path, MemoryTable::new(columns.clone(), types.clone(), rows_a));

        let query = SegmentQuery {
            table_path: path.clone(),
            key_columns: vec!["id".into()],
            relevant_columns: columns.clone(),
            transform_columns: HashMap::new(),
            min_key: None,
            max_key: None,
            min_update: None,
            max_update: None,
            update_column: None,
            where_clause: None,
            case_sensitive: true,
            shape: ResultShape::CountAndChecksum,
        };
        let QueryOutcome::CountAndChecksum(count_a, checksum_a) = db.query(&query).unwrap() else {
            panic!("wrong shape");
        };

        let path_b = TablePath::new(vec!["b".into()]);
        db.insert_table(&path_b, MemoryTable::new(columns, types, rows_b));
        let mut query_b = query.clone();
        query_b.table_path = path_b;
        let QueryOutcome::CountAndChecksum(count_b, checksum_b) = db.query(&query_b).unwrap() else {
            panic!("wrong shape");
        };

        assert_eq!(count_a, count_b);
        assert_eq!(checksum_a, checksum_b);
    }
}
