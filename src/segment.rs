//! An immutable descriptor of a rectangular slab of a table, and the
//! external capabilities ([`Database`], [`Dialect`]) it is defined against.
//!
//! `TableSegment` never touches the network itself; every public operation
//! is a single round-trip through the `Database` it was built with. The
//! segment only knows how to *shape* that round-trip (`SegmentQuery`) — the
//! SQL dialect adapter that would render and execute it is explicitly out
//! of scope for this crate (see the crate-level docs), so `Database` and
//! `Dialect` here are capability traits with no concrete implementation
//! shipped, exercised in tests by an in-memory stand-in.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{SchemaError, TableDiffError};
use crate::keyspace::{mesh, split_compound};
use crate::keyvalue::{ColumnType, ColumnValue, KeyValue, Row, Schema, TablePath, Vector};

/// Recommended maximum duration, in milliseconds, for a single
/// `count_and_checksum` round-trip before an advisory is logged.
pub const RECOMMENDED_CHECKSUM_DURATION_MS: u64 = 20_000;

/// The unrendered schema as reported directly by the database, prior to
/// refinement against the segment's relevant columns.
pub type RawSchema = HashMap<String, ColumnType>;

/// Which shape of result a `SegmentQuery` expects back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    Count,
    CountAndChecksum,
    Rows,
    KeyRange,
}

/// The result of executing a `SegmentQuery`, tagged by the shape that was
/// requested.
#[derive(Debug, Clone)]
pub enum QueryOutcome {
    Count(u64),
    CountAndChecksum(u64, Option<u128>),
    Rows(Vec<Row>),
    /// `None` is the "empty table" sentinel: at least one key column's
    /// min/max came back null. Returned, not raised, so the caller can
    /// consume a stream of these as an iterator (phase 3 of the differ).
    KeyRange(Option<(Vector, Vector)>),
}

/// A dialect-agnostic description of the query a [`TableSegment`] wants to
/// run. Stands in for the SQL AST a real adapter would render; this crate
/// ships no renderer (§1 scope).
#[derive(Debug, Clone)]
pub struct SegmentQuery {
    pub table_path: TablePath,
    pub key_columns: Vec<String>,
    pub relevant_columns: Vec<String>,
    pub transform_columns: HashMap<String, String>,
    pub min_key: Option<Vector>,
    pub max_key: Option<Vector>,
    pub min_update: Option<KeyValue>,
    pub max_update: Option<KeyValue>,
    pub update_column: Option<String>,
    pub where_clause: Option<String>,
    pub case_sensitive: bool,
    pub shape: ResultShape,
}

/// Minimum/maximum aggregation strategy a dialect must provide, respecting
/// the key type's ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinMaxAggregator {
    Native,
    CastThenAggregate,
}

/// The database capability the core consumes, one instance per side.
pub trait Database: Send + Sync {
    fn query_table_schema(&self, path: &TablePath) -> Result<RawSchema, TableDiffError>;

    fn process_query_table_schema(
        &self,
        path: &TablePath,
        raw: &RawSchema,
        refine: bool,
        refine_where: Option<&str>,
    ) -> Result<(Schema, Option<Vec<Row>>), TableDiffError>;

    fn query(&self, query: &SegmentQuery) -> Result<QueryOutcome, TableDiffError>;
}

/// The dialect capability record: everything an adapter must supply for the
/// core to hash, normalize, and bound keys uniformly. Replaces the mixin
/// class composition of the original implementation with a single value.
pub trait Dialect: Send + Sync {
    fn render_md5(&self, value: &ColumnValue) -> u128;
    fn normalize_value(&self, value: &ColumnValue, column_type: &ColumnType) -> String;
    fn quote_ident(&self, ident: &str, case_sensitive: bool) -> String;
    fn min_max_aggregator(&self) -> MinMaxAggregator;
    fn successor_of(&self, value: &KeyValue) -> Result<KeyValue, SchemaError>;
}

/// An immutable descriptor of a rectangular slab of one table.
#[derive(Clone)]
pub struct TableSegment {
    database: Arc<dyn Database>,
    table_path: TablePath,
    key_columns: Vec<String>,
    update_column: Option<String>,
    extra_columns: Vec<String>,
    transform_columns: HashMap<String, String>,
    min_key: Option<Vector>,
    max_key: Option<Vector>,
    min_update: Option<KeyValue>,
    max_update: Option<KeyValue>,
    where_clause: Option<String>,
    case_sensitive: bool,
    schema: Option<Arc<Schema>>,
}

impl fmt::Debug for TableSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableSegment")
            .field("table_path", &self.table_path)
            .field("key_columns", &self.key_columns)
            .field("min_key", &self.min_key)
            .field("max_key", &self.max_key)
            .finish()
    }
}

impl TableSegment {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        database: Arc<dyn Database>,
        table_path: TablePath,
        key_columns: Vec<String>,
        update_column: Option<String>,
        extra_columns: Vec<String>,
        transform_columns: HashMap<String, String>,
        where_clause: Option<String>,
        case_sensitive: bool,
    ) -> Result<Self, TableDiffError> {
        if update_column.is_none() {
            // nothing to validate against min/max_update yet; they default to None.
        }
        Ok(Self {
            database,
            table_path,
            key_columns,
            update_column,
            extra_columns,
            transform_columns,
            min_key: None,
            max_key: None,
            min_update: None,
            max_update: None,
            where_clause,
            case_sensitive,
            schema: None,
        })
    }

    /// Relevant columns = key columns, then update column (if not already
    /// present), then extra columns, duplicates removed preserving first
    /// occurrence.
    pub fn relevant_columns(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for c in self
            .key_columns
            .iter()
            .chain(self.update_column.iter())
            .chain(self.extra_columns.iter())
        {
            if seen.insert(c.clone()) {
                out.push(c.clone());
            }
        }
        out
    }

    pub fn table_path(&self) -> &TablePath {
        &self.table_path
    }

    pub fn key_columns(&self) -> &[String] {
        &self.key_columns
    }

    pub fn min_key(&self) -> Option<&Vector> {
        self.min_key.as_ref()
    }

    pub fn max_key(&self) -> Option<&Vector> {
        self.max_key.as_ref()
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_deref()
    }

    pub fn is_bounded(&self) -> bool {
        self.min_key.is_some() && self.max_key.is_some()
    }

    fn make_query(&self, shape: ResultShape) -> SegmentQuery {
        SegmentQuery {
            table_path: self.table_path.clone(),
            key_columns: self.key_columns.clone(),
            relevant_columns: self.relevant_columns(),
            transform_columns: self.transform_columns.clone(),
            min_key: self.min_key.clone(),
            max_key: self.max_key.clone(),
            min_update: self.min_update.clone(),
            max_update: self.max_update.clone(),
            update_column: self.update_column.clone(),
            where_clause: self.where_clause.clone(),
            case_sensitive: self.case_sensitive,
            shape,
        }
    }

    /// Queries the table schema from the database and returns a
    /// schema-bound segment, or `Segment::Empty` if the segment has zero
    /// rows and `allow_empty` permits that.
    pub fn with_schema(&self, refine: bool, allow_empty: bool) -> Result<Segment, TableDiffError> {
        if self.schema.is_some() {
            return Ok(Segment::Table(self.clone()));
        }

        let raw = self.database.query_table_schema(&self.table_path)?;
        let refine_where = self.where_clause.as_deref();
        let (schema, samples) = self
            .database
            .process_query_table_schema(&self.table_path, &raw, refine, refine_where)?;

        let is_empty = matches!(&samples, Some(rows) if rows.is_empty());
        if is_empty && !allow_empty {
            return Err(TableDiffError::EmptyTable {
                table: self.table_path.clone(),
            });
        }

        let mut bound = self.clone();
        bound.schema = Some(Arc::new(schema));

        if is_empty {
            Ok(Segment::Empty(EmptyTableSegment { inner: bound }))
        } else {
            Ok(Segment::Table(bound))
        }
    }

    /// Query the database for the min/max of each key column under this
    /// segment's filter. Returns `None` (not an error) when any column
    /// comes back null, so callers can consume a stream of these as an
    /// iterator (see `HashBisectDiffer` phase 3).
    pub fn query_key_range(&self) -> Result<Option<(Vector, Vector)>, TableDiffError> {
        let query = self.make_query(ResultShape::KeyRange);
        match self.database.query(&query)? {
            QueryOutcome::KeyRange(range) => Ok(range),
            other => unreachable!("database returned wrong shape for key-range query: {other:?}"),
        }
    }

    pub fn count(&self) -> Result<u64, TableDiffError> {
        let query = self.make_query(ResultShape::Count);
        match self.database.query(&query)? {
            QueryOutcome::Count(n) => Ok(n),
            other => unreachable!("database returned wrong shape for count query: {other:?}"),
        }
    }

    pub fn count_and_checksum(&self) -> Result<(u64, Option<u128>), TableDiffError> {
        let query = self.make_query(ResultShape::CountAndChecksum);
        match self.database.query(&query)? {
            QueryOutcome::CountAndChecksum(count, checksum) => Ok((count, checksum)),
            other => unreachable!("database returned wrong shape for checksum query: {other:?}"),
        }
    }

    pub fn get_values(&self) -> Result<Vec<Row>, TableDiffError> {
        let query = self.make_query(ResultShape::Rows);
        match self.database.query(&query)? {
            QueryOutcome::Rows(rows) => Ok(rows),
            other => unreachable!("database returned wrong shape for rows query: {other:?}"),
        }
    }

    /// Suggests evenly-spaced checkpoints to split by, including the
    /// segment's own bounds. Takes the N-th root of `count` to approximate
    /// the appropriate box size per axis.
    pub fn choose_checkpoints(&self, count: usize) -> Vec<Vec<KeyValue>> {
        let (min_key, max_key) = (
            self.min_key.as_ref().expect("choose_checkpoints requires a bounded segment"),
            self.max_key.as_ref().expect("choose_checkpoints requires a bounded segment"),
        );
        let n_dims = self.key_columns.len().max(1);
        let per_axis = (count as f64).powf(1.0 / n_dims as f64).floor().max(1.0) as usize;
        split_compound(min_key, max_key, per_axis)
    }

    /// Splits this segment into a list of narrower segments, one per mesh
    /// box formed by `checkpoints`.
    pub fn segment_by_checkpoints(&self, checkpoints: &[Vec<KeyValue>]) -> Vec<TableSegment> {
        mesh(checkpoints)
            .into_iter()
            .map(|(lo, hi)| self.new_key_bounds(lo, hi))
            .collect()
    }

    /// Narrows this segment to `[min_key, max_key)`. The new bounds must
    /// lie within any existing bounds.
    pub fn new_key_bounds(&self, min_key: Vector, max_key: Vector) -> TableSegment {
        if let Some(existing_min) = &self.min_key {
            assert!(existing_min.componentwise_le(&min_key));
        }
        if let Some(existing_max) = &self.max_key {
            assert!(max_key.componentwise_le(existing_max));
        }
        let mut next = self.clone();
        next.min_key = Some(min_key);
        next.max_key = Some(max_key);
        next
    }

    pub fn approximate_size(&self) -> u128 {
        let min_key = self.min_key.as_ref().expect("approximate_size requires a bounded segment");
        let max_key = self.max_key.as_ref().expect("approximate_size requires a bounded segment");
        min_key.approximate_volume(max_key)
    }

    /// Re-stamps the schema, used by column reconciliation (phase 2 of
    /// `HashBisectDiffer`) to lower both sides to a shared precision.
    pub(crate) fn with_bound_schema(&self, schema: Schema) -> TableSegment {
        let mut next = self.clone();
        next.schema = Some(Arc::new(schema));
        next
    }
}

/// A segment known to have zero rows. Short-circuits the differ: it
/// answers `count = 0`, returns no rows, and refuses range queries.
#[derive(Debug, Clone)]
pub struct EmptyTableSegment {
    inner: TableSegment,
}

impl EmptyTableSegment {
    pub fn table_path(&self) -> &TablePath {
        &self.inner.table_path
    }

    pub fn key_columns(&self) -> &[String] {
        &self.inner.key_columns
    }

    pub fn relevant_columns(&self) -> Vec<String> {
        self.inner.relevant_columns()
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.inner.schema()
    }

    pub fn is_bounded(&self) -> bool {
        true
    }

    pub fn approximate_size(&self) -> u128 {
        0
    }

    pub fn count(&self) -> Result<u64, TableDiffError> {
        Ok(0)
    }

    pub fn count_and_checksum(&self) -> Result<(u64, Option<u128>), TableDiffError> {
        Ok((0, None))
    }

    pub fn get_values(&self) -> Result<Vec<Row>, TableDiffError> {
        Ok(Vec::new())
    }

    pub fn query_key_range(&self) -> Result<Option<(Vector, Vector)>, TableDiffError> {
        Ok(None)
    }

    pub fn segment_by_checkpoints(&self, checkpoints: &[Vec<KeyValue>]) -> Vec<EmptyTableSegment> {
        mesh(checkpoints)
            .into_iter()
            .map(|_| self.clone())
            .collect()
    }

    pub fn new_key_bounds(&self, _min_key: Vector, _max_key: Vector) -> EmptyTableSegment {
        self.clone()
    }
}

/// Either a schema-bound segment or one known to be empty. Mirrors the
/// source's `EmptyTableSegment` tag wrapping a `TableSegment`.
#[derive(Debug, Clone)]
pub enum Segment {
    Table(TableSegment),
    Empty(EmptyTableSegment),
}

impl Segment {
    pub fn is_empty_segment(&self) -> bool {
        matches!(self, Segment::Empty(_))
    }

    pub fn table_path(&self) -> &TablePath {
        match self {
            Segment::Table(t) => t.table_path(),
            Segment::Empty(e) => e.table_path(),
        }
    }

    pub fn key_columns(&self) -> &[String] {
        match self {
            Segment::Table(t) => t.key_columns(),
            Segment::Empty(e) => e.key_columns(),
        }
    }

    pub fn relevant_columns(&self) -> Vec<String> {
        match self {
            Segment::Table(t) => t.relevant_columns(),
            Segment::Empty(e) => e.relevant_columns(),
        }
    }

    pub fn schema(&self) -> Option<&Schema> {
        match self {
            Segment::Table(t) => t.schema(),
            Segment::Empty(e) => e.schema(),
        }
    }

    pub fn is_bounded(&self) -> bool {
        match self {
            Segment::Table(t) => t.is_bounded(),
            Segment::Empty(e) => e.is_bounded(),
        }
    }

    pub fn approximate_size(&self) -> u128 {
        match self {
            Segment::Table(t) => t.approximate_size(),
            Segment::Empty(e) => e.approximate_size(),
        }
    }

    pub fn count(&self) -> Result<u64, TableDiffError> {
        match self {
            Segment::Table(t) => t.count(),
            Segment::Empty(e) => e.count(),
        }
    }

    pub fn count_and_checksum(&self) -> Result<(u64, Option<u128>), TableDiffError> {
        match self {
            Segment::Table(t) => t.count_and_checksum(),
            Segment::Empty(e) => e.count_and_checksum(),
        }
    }

    pub fn get_values(&self) -> Result<Vec<Row>, TableDiffError> {
        match self {
            Segment::Table(t) => t.get_values(),
            Segment::Empty(e) => e.get_values(),
        }
    }

    pub fn query_key_range(&self) -> Result<Option<(Vector, Vector)>, TableDiffError> {
        match self {
            Segment::Table(t) => t.query_key_range(),
            Segment::Empty(e) => e.query_key_range(),
        }
    }

    pub fn choose_checkpoints(&self, count: usize) -> Vec<Vec<KeyValue>> {
        match self {
            Segment::Table(t) => t.choose_checkpoints(count),
            Segment::Empty(e) => e.inner.choose_checkpoints(count),
        }
    }

    pub fn segment_by_checkpoints(&self, checkpoints: &[Vec<KeyValue>]) -> Vec<Segment> {
        match self {
            Segment::Table(t) => t
                .segment_by_checkpoints(checkpoints)
                .into_iter()
                .map(Segment::Table)
                .collect(),
            Segment::Empty(e) => e
                .segment_by_checkpoints(checkpoints)
                .into_iter()
                .map(Segment::Empty)
                .collect(),
        }
    }

    pub fn new_key_bounds(&self, min_key: Vector, max_key: Vector) -> Segment {
        match self {
            Segment::Table(t) => Segment::Table(t.new_key_bounds(min_key, max_key)),
            Segment::Empty(e) => Segment::Empty(e.new_key_bounds(min_key, max_key)),
        }
    }

    pub(crate) fn with_bound_schema(&self, schema: Schema) -> Segment {
        match self {
            Segment::Table(t) => Segment::Table(t.with_bound_schema(schema)),
            Segment::Empty(e) => Segment::Empty(EmptyTableSegment {
                inner: e.inner.with_bound_schema(schema),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyvalue::ColumnValue;
    use crate::testutil::{MemoryDatabase, MemoryDialect};
    use std::sync::Arc;

    fn segment(db: Arc<MemoryDatabase>) -> TableSegment {
        TableSegment::new(
            db,
            TablePath::new(vec!["t".into()]),
            vec!["id".into()],
            None,
            vec!["val".into()],
            HashMap::new(),
            None,
            true,
        )
        .unwrap()
    }

    #[test]
    fn relevant_columns_dedupes_preserving_order() {
        let db = Arc::new(MemoryDatabase::new(MemoryDialect));
        let mut seg = segment(db);
        seg.update_column = Some("id".to_string()); // duplicate of key column
        assert_eq!(seg.relevant_columns(), vec!["id".to_string(), "val".to_string()]);
    }

    #[test]
    fn unbounded_segment_has_no_approximate_size() {
        let db = Arc::new(MemoryDatabase::new(MemoryDialect));
        let seg = segment(db);
        assert!(!seg.is_bounded());
    }

    #[test]
    fn new_key_bounds_narrows_and_bounds() {
        let db = Arc::new(MemoryDatabase::new(MemoryDialect));
        let seg = segment(db).new_key_bounds(
            Vector::new(vec![KeyValue::Int(0)]),
            Vector::new(vec![KeyValue::Int(100)]),
        );
        assert!(seg.is_bounded());
        assert_eq!(seg.approximate_size(), 100);

        let narrower = seg.new_key_bounds(Vector::new(vec![KeyValue::Int(10)]), Vector::new(vec![KeyValue::Int(20)]));
        assert_eq!(narrower.approximate_size(), 10);
    }

    #[test]
    #[should_panic]
    fn new_key_bounds_rejects_widening() {
        let db = Arc::new(MemoryDatabase::new(MemoryDialect));
        let seg = segment(db).new_key_bounds(
            Vector::new(vec![KeyValue::Int(10)]),
            Vector::new(vec![KeyValue::Int(20)]),
        );
        seg.new_key_bounds(Vector::new(vec![KeyValue::Int(0)]), Vector::new(vec![KeyValue::Int(20)]));
    }

    #[test]
    fn empty_table_segment_short_circuits() {
        let db = Arc::new(MemoryDatabase::new(MemoryDialect));
        let seg = segment(db);
        let empty = EmptyTableSegment { inner: seg };
        assert_eq!(empty.count().unwrap(), 0);
        assert_eq!(empty.count_and_checksum().unwrap(), (0, None));
        assert!(empty.get_values().unwrap().is_empty());
        assert!(empty.query_key_range().unwrap().is_none());
        let _ = ColumnValue::Null; // used to avoid unused import in some configs
    }
}
