//! Key values, compound (vector) keys, and the row/column types built on
//! top of them.
//!
//! A key column's values must expose a total order and an *add-one*
//! successor so ranges can be closed on the low end and open on the high
//! end uniformly across integer, UUID, string, and date/timestamp keys.
//! [`KeyValue`] is the tagged variant that carries this uniformly; there is
//! deliberately no floating-point member, since floats have no well-defined
//! successor — a float key column is rejected at schema-binding time with
//! `SchemaError::UnsupportedKeyType` before this type ever sees it.

use std::collections::HashMap;
use std::fmt;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use uuid::Uuid;

use crate::error::SchemaError;

/// Dotted path identifying a table, e.g. `schema.table` or just `table`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TablePath(Vec<String>);

impl TablePath {
    pub fn new(parts: Vec<String>) -> Self {
        assert!(!parts.is_empty(), "table path must have at least one part");
        Self(parts)
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for TablePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// A single key column's value, tagged by the logical key type it belongs
/// to. Every variant exposes a total order and a [`KeyValue::successor`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyValue {
    Int(i64),
    Uuid(Uuid),
    Str(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl PartialOrd for KeyValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyValue {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use KeyValue::*;
        match (self, other) {
            (Int(a), Int(b)) => a.cmp(b),
            (Uuid(a), Uuid(b)) => a.cmp(b),
            (Str(a), Str(b)) => a.cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            (Timestamp(a), Timestamp(b)) => a.cmp(b),
            _ => panic!("compared KeyValue variants of different key types: {self:?} vs {other:?}"),
        }
    }
}

impl KeyValue {
    /// The name of this variant's logical key type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            KeyValue::Int(_) => "Int",
            KeyValue::Uuid(_) => "Uuid",
            KeyValue::Str(_) => "Str",
            KeyValue::Date(_) => "Date",
            KeyValue::Timestamp(_) => "Timestamp",
        }
    }

    /// The next value after this one in the key's total order, used to turn
    /// an inclusive maximum into an exclusive upper bound.
    pub fn successor(&self, column: &str) -> Result<KeyValue, SchemaError> {
        match self {
            KeyValue::Int(n) => n
                .checked_add(1)
                .map(KeyValue::Int)
                .ok_or_else(|| SchemaError::UnsupportedKeyType {
                    column: column.to_string(),
                    type_name: "Int (overflow at i64::MAX)".to_string(),
                }),
            KeyValue::Uuid(u) => {
                let next = u.as_u128().checked_add(1).ok_or_else(|| SchemaError::UnsupportedKeyType {
                    column: column.to_string(),
                    type_name: "Uuid (overflow at u128::MAX)".to_string(),
                })?;
                Ok(KeyValue::Uuid(Uuid::from_u128(next)))
            }
            KeyValue::Str(s) => {
                let mut chars: Vec<char> = s.chars().collect();
                match chars.pop() {
                    None => Ok(KeyValue::Str("\u{0}".to_string())),
                    Some(last) => {
                        let next = char::from_u32(last as u32 + 1).ok_or_else(|| SchemaError::UnsupportedKeyType {
                            column: column.to_string(),
                            type_name: "Str (last character at U+10FFFF)".to_string(),
                        })?;
                        chars.push(next);
                        Ok(KeyValue::Str(chars.into_iter().collect()))
                    }
                }
            }
            KeyValue::Date(d) => Ok(KeyValue::Date(*d + Duration::days(1))),
            KeyValue::Timestamp(t) => Ok(KeyValue::Timestamp(*t + Duration::milliseconds(1))),
        }
    }

    /// Approximate scalar distance between two values of the same key type,
    /// used only to estimate segment volume (`TableSegment::approximate_size`)
    /// and to pick the "larger" side to bisect. Saturates rather than
    /// panics on overflow; never used as an exact count.
    pub fn distance(&self, other: &KeyValue) -> u128 {
        use KeyValue::*;
        match (self, other) {
            (Int(a), Int(b)) => (*b as i128 - *a as i128).unsigned_abs(),
            (Uuid(a), Uuid(b)) => a.as_u128().abs_diff(b.as_u128()),
            (Str(a), Str(b)) => {
                let an: u128 = str_rank(a);
                let bn: u128 = str_rank(b);
                an.abs_diff(bn)
            }
            (Date(a), Date(b)) => (*b - *a).num_days().unsigned_abs() as u128,
            (Timestamp(a), Timestamp(b)) => (*b - *a).num_milliseconds().unsigned_abs() as u128,
            _ => panic!("distance between KeyValue variants of different key types"),
        }
    }
}

/// A crude order-preserving numeric rank for short strings, good enough to
/// estimate relative distance between two string keys (not for equality).
fn str_rank(s: &str) -> u128 {
    let mut rank: u128 = 0;
    for c in s.chars().take(16) {
        rank = rank.saturating_mul(0x11_0000).saturating_add(c as u128);
    }
    rank
}

/// A composite key: an ordered tuple of [`KeyValue`]s, one per key column.
///
/// Comparison is *componentwise*: `p1 < p2` iff every component of `p1` is
/// strictly less than the corresponding component of `p2`. This is weaker
/// than lexicographic order — two vectors can be incomparable — so
/// [`Vector`] does not implement [`Ord`]; callers that need a full order
/// (e.g. to sort per-axis checkpoints) work one [`KeyValue`] axis at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Vector(pub Vec<KeyValue>);

impl Vector {
    pub fn new(values: Vec<KeyValue>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[KeyValue] {
        &self.0
    }

    /// `self < other`, componentwise: every axis strictly less.
    pub fn componentwise_lt(&self, other: &Vector) -> bool {
        assert_eq!(self.len(), other.len(), "vector dimensionality mismatch");
        self.0.iter().zip(&other.0).all(|(a, b)| a < b)
    }

    /// `self <= other`, componentwise: every axis less-or-equal.
    pub fn componentwise_le(&self, other: &Vector) -> bool {
        assert_eq!(self.len(), other.len(), "vector dimensionality mismatch");
        self.0.iter().zip(&other.0).all(|(a, b)| a <= b)
    }

    /// Componentwise successor, used to translate an inclusive maximum key
    /// into an exclusive upper bound.
    pub fn successor(&self, key_columns: &[String]) -> Result<Vector, SchemaError> {
        assert_eq!(self.len(), key_columns.len());
        let values = self
            .0
            .iter()
            .zip(key_columns)
            .map(|(v, col)| v.successor(col))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Vector(values))
    }

    /// Product of per-axis distances, an approximation of the slab's
    /// cardinality. Only meaningful when `self` is the lower bound and
    /// `other` the (exclusive) upper bound of a bounded segment.
    pub fn approximate_volume(&self, upper: &Vector) -> u128 {
        assert_eq!(self.len(), upper.len());
        self.0
            .iter()
            .zip(&upper.0)
            .map(|(lo, hi)| lo.distance(hi).max(1))
            .fold(1u128, |acc, d| acc.saturating_mul(d))
    }
}

/// Per-column type classification used during schema reconciliation
/// (`HashBisectDiffer` phase 2). Carries a partial order on precision for
/// `Precision`/`Numeric` columns.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnType {
    Precision { precision: u8, rounds: bool },
    Numeric { precision: u8 },
    Boolean,
    Uuid,
    String,
    Unsupported,
}

impl ColumnType {
    pub fn precision(&self) -> Option<u8> {
        match self {
            ColumnType::Precision { precision, .. } => Some(*precision),
            ColumnType::Numeric { precision } => Some(*precision),
            _ => None,
        }
    }

    pub fn family_name(&self) -> &'static str {
        match self {
            ColumnType::Precision { .. } => "Precision",
            ColumnType::Numeric { .. } => "Numeric",
            ColumnType::Boolean => "Boolean",
            ColumnType::Uuid => "Uuid",
            ColumnType::String => "String",
            ColumnType::Unsupported => "Unsupported",
        }
    }
}

/// A single column value, as downloaded from a `Database`. `Null` and
/// `Text` (for `Unsupported`-typed columns, normalized as the identity
/// function) extend the otherwise-`KeyValue`-shaped domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnValue {
    Key(KeyValue),
    Bool(bool),
    Text(String),
    Null,
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnValue::Key(KeyValue::Int(n)) => write!(f, "{n}"),
            ColumnValue::Key(KeyValue::Uuid(u)) => write!(f, "{u}"),
            ColumnValue::Key(KeyValue::Str(s)) => write!(f, "{s}"),
            ColumnValue::Key(KeyValue::Date(d)) => write!(f, "{d}"),
            ColumnValue::Key(KeyValue::Timestamp(t)) => write!(f, "{t}"),
            ColumnValue::Bool(b) => write!(f, "{b}"),
            ColumnValue::Text(s) => write!(f, "{s}"),
            ColumnValue::Null => write!(f, "NULL"),
        }
    }
}

/// A downloaded/comparable row, in relevant-column order.
pub type Row = Vec<ColumnValue>;

/// A schema binding columns to their reconciled type classification.
pub type Schema = HashMap<String, ColumnType>;

/// Sign of a diff event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sign {
    /// Present in table A, absent from table B.
    Minus,
    /// Present in table B, absent from table A.
    Plus,
}

impl fmt::Display for Sign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sign::Minus => write!(f, "-"),
            Sign::Plus => write!(f, "+"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_successor() {
        assert_eq!(KeyValue::Int(5).successor("id").unwrap(), KeyValue::Int(6));
        assert!(KeyValue::Int(i64::MAX).successor("id").is_err());
    }

    #[test]
    fn str_successor_increments_last_char() {
        assert_eq!(
            KeyValue::Str("ab".to_string()).successor("k").unwrap(),
            KeyValue::Str("ac".to_string())
        );
        assert_eq!(
            KeyValue::Str(String::new()).successor("k").unwrap(),
            KeyValue::Str("\u{0}".to_string())
        );
    }

    #[test]
    fn uuid_successor() {
        let u = Uuid::from_u128(10);
        assert_eq!(
            KeyValue::Uuid(u).successor("id").unwrap(),
            KeyValue::Uuid(Uuid::from_u128(11))
        );
        assert!(KeyValue::Uuid(Uuid::from_u128(u128::MAX)).successor("id").is_err());
    }

    #[test]
    fn date_successor_is_one_day() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let next = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_eq!(KeyValue::Date(d).successor("d").unwrap(), KeyValue::Date(next));
    }

    #[test]
    fn componentwise_order_can_be_incomparable() {
        let p1 = Vector::new(vec![KeyValue::Int(0), KeyValue::Int(10)]);
        let p2 = Vector::new(vec![KeyValue::Int(5), KeyValue::Int(5)]);
        assert!(!p1.componentwise_lt(&p2));
        assert!(!p2.componentwise_lt(&p1));
    }

    #[test]
    fn componentwise_order_strict_on_every_axis() {
        let p1 = Vector::new(vec![KeyValue::Int(0), KeyValue::Int(0)]);
        let p2 = Vector::new(vec![KeyValue::Int(1), KeyValue::Int(1)]);
        assert!(p1.componentwise_lt(&p2));
        assert!(p1.componentwise_le(&p2));
    }

    #[test]
    fn approximate_volume_is_product_of_distances() {
        let lo = Vector::new(vec![KeyValue::Int(0), KeyValue::Int(0)]);
        let hi = Vector::new(vec![KeyValue::Int(10), KeyValue::Int(4)]);
        assert_eq!(lo.approximate_volume(&hi), 40);
    }

    #[test]
    fn table_path_display() {
        let p = TablePath::new(vec!["public".to_string(), "orders".to_string()]);
        assert_eq!(p.to_string(), "public.orders");
    }
}
