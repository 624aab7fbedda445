//! Error types for tablediff.
//!
//! All errors that can occur while diffing two tables are represented by
//! [`TableDiffError`]. Schema and configuration problems surface from
//! [`crate::differ::HashBisectDiffer::diff`] before any rows are yielded;
//! everything else becomes a worker exception that propagates through the
//! merged result stream (see [`crate::yielder::PriorityYielder`]).
//!
//! # Error Classification
//!
//! - **Configuration** — bad bisection parameters, inverted bounds. Caught
//!   before a single query is issued.
//! - **Schema** — missing columns, incompatible type families, a key column
//!   with no successor. Caught during schema binding and reconciliation.
//! - **EmptyTable** — a side has zero rows and empty tables are not allowed.
//!   Raised lazily, through the key-range query, so a non-empty first side
//!   can still be diffed even when the second side is empty.
//! - **KeyParse** — the adapter returned a value that does not fit the
//!   declared key type.
//! - **Adapter** — a query failed. Non-retryable at this layer; it latches
//!   into the yielder and re-raises at the consumer's next pull.

use std::fmt;

use crate::keyvalue::TablePath;

/// Primary error type for the diff engine.
///
/// Cloneable so a latched exception in [`crate::yielder::PriorityYielder`]
/// can be re-raised on every subsequent pull after the first, not just
/// consumed once.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TableDiffError {
    /// Invalid bisection parameters, incompatible update-column settings,
    /// or inverted bounds.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Schema-level incompatibility between the two sides.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A side has zero rows under its filter and `allow_empty_tables` is
    /// false.
    #[error("table is empty: {table}")]
    EmptyTable { table: TablePath },

    /// A value returned by the adapter does not convert to the declared
    /// key type.
    #[error("could not parse key column '{column}': {reason}")]
    KeyParse { column: String, reason: String },

    /// A query against a `Database` capability failed.
    #[error("adapter error: {0}")]
    Adapter(String),
}

impl TableDiffError {
    /// Whether this error kind can legitimately occur after other diffs
    /// have already been yielded on the same stream.
    ///
    /// Only [`TableDiffError::Adapter`] can: configuration and schema
    /// errors are always resolved before the first row is produced.
    pub fn is_recoverable_mid_stream(&self) -> bool {
        matches!(self, TableDiffError::Adapter(_))
    }

    /// Classify the error for logging/monitoring.
    pub fn kind(&self) -> TableDiffErrorKind {
        match self {
            TableDiffError::Configuration(_) => TableDiffErrorKind::Configuration,
            TableDiffError::Schema(_) => TableDiffErrorKind::Schema,
            TableDiffError::EmptyTable { .. } => TableDiffErrorKind::EmptyTable,
            TableDiffError::KeyParse { .. } => TableDiffErrorKind::KeyParse,
            TableDiffError::Adapter(_) => TableDiffErrorKind::Adapter,
        }
    }
}

/// Schema-level incompatibilities detected during column reconciliation
/// (phase 2 of [`crate::differ::HashBisectDiffer`]).
#[derive(Debug, Clone, thiserror::Error)]
pub enum SchemaError {
    #[error("column '{0}' not found in schema")]
    MissingColumn(String),

    #[error("incompatible types for column '{column}': {left} <-> {right}")]
    IncompatibleTypes {
        column: String,
        left: String,
        right: String,
    },

    #[error("column '{column}' of type {type_name} has no successor and cannot be used as a key")]
    UnsupportedKeyType { column: String, type_name: String },
}

/// Coarse classification of [`TableDiffError`] for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableDiffErrorKind {
    Configuration,
    Schema,
    EmptyTable,
    KeyParse,
    Adapter,
}

impl fmt::Display for TableDiffErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableDiffErrorKind::Configuration => write!(f, "CONFIGURATION"),
            TableDiffErrorKind::Schema => write!(f, "SCHEMA"),
            TableDiffErrorKind::EmptyTable => write!(f, "EMPTY_TABLE"),
            TableDiffErrorKind::KeyParse => write!(f, "KEY_PARSE"),
            TableDiffErrorKind::Adapter => write!(f, "ADAPTER"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(name: &str) -> TablePath {
        TablePath::new(vec![name.to_string()])
    }

    #[test]
    fn classification() {
        assert_eq!(
            TableDiffError::Configuration("x".into()).kind(),
            TableDiffErrorKind::Configuration
        );
        assert_eq!(
            TableDiffError::Schema(SchemaError::MissingColumn("c".into())).kind(),
            TableDiffErrorKind::Schema
        );
        assert_eq!(
            TableDiffError::EmptyTable { table: path("t") }.kind(),
            TableDiffErrorKind::EmptyTable
        );
        assert_eq!(
            TableDiffError::KeyParse {
                column: "id".into(),
                reason: "not an int".into()
            }
            .kind(),
            TableDiffErrorKind::KeyParse
        );
        assert_eq!(
            TableDiffError::Adapter("timeout".into()).kind(),
            TableDiffErrorKind::Adapter
        );
    }

    #[test]
    fn only_adapter_errors_are_mid_stream_recoverable() {
        assert!(TableDiffError::Adapter("x".into()).is_recoverable_mid_stream());
        assert!(!TableDiffError::Configuration("x".into()).is_recoverable_mid_stream());
        assert!(!TableDiffError::EmptyTable { table: path("t") }.is_recoverable_mid_stream());
        assert!(!TableDiffError::KeyParse {
            column: "id".into(),
            reason: "x".into()
        }
        .is_recoverable_mid_stream());
    }

    #[test]
    fn schema_error_messages_are_descriptive() {
        let err = SchemaError::IncompatibleTypes {
            column: "amount".into(),
            left: "Numeric".into(),
            right: "String".into(),
        };
        assert!(err.to_string().contains("amount"));
        assert!(err.to_string().contains("Numeric"));
    }

    #[test]
    fn kind_display() {
        assert_eq!(TableDiffErrorKind::Adapter.to_string(), "ADAPTER");
        assert_eq!(TableDiffErrorKind::EmptyTable.to_string(), "EMPTY_TABLE");
    }
}
