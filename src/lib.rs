//! tablediff — hash-bisection table diffing.
//!
//! Compares two same-shaped tables by recursively partitioning their
//! compound key space into segments, comparing each segment by row count
//! and an order-independent checksum, and only downloading rows where a
//! mismatch survives down to a small enough segment. Produces a stream of
//! `(sign, row)` pairs plus summary statistics, without ever materializing
//! either table in full unless the tables are already smaller than the
//! bisection threshold.
//!
//! # Theoretical Basis
//!
//! - **Bisection diffing**: segment-tree style recursive range partitioning
//!   with count+checksum pruning, as used by `erezsh/reladiff` (formerly
//!   `data-diff`) and similar cross-database diff tools.
//! - Duplicate-aware leaf comparison is a multiset (`Counter`-style)
//!   difference, not a plain set difference, so rows repeated a different
//!   number of times on either side are still reported.
//!
//! # Scope
//!
//! This crate is the diff engine only: partitioning, scheduling, checksum
//! pruning, and leaf comparison. It does not ship a SQL dialect adapter —
//! [`segment::Database`] and [`segment::Dialect`] are capability traits a
//! caller implements against their own database client. See
//! [`testutil`] for the in-memory implementation this crate's own tests run
//! against.

#![deny(unsafe_op_in_unsafe_fn)]

pub mod config;
pub mod differ;
pub mod error;
pub mod infotree;
pub mod keyspace;
pub mod keyvalue;
pub mod segment;
#[cfg(any(test, feature = "test-support"))]
pub mod testutil;
pub mod yielder;

pub use config::DifferConfig;
pub use differ::{DiffResultWrapper, DiffStats, HashBisectDiffer};
pub use error::{SchemaError, TableDiffError, TableDiffErrorKind};
pub use keyvalue::{ColumnType, ColumnValue, KeyValue, Row, Sign, TablePath, Vector};
pub use segment::{Database, Dialect, Segment, TableSegment};
