//! Configuration for the hash-bisection diff engine.
//!
//! `tablediff` is a library, not a program: there is no config file loader
//! and no environment-variable registry here (loading configuration from
//! the outside world is the caller's job). [`DifferConfig`] is a plain
//! value the caller builds and validates before constructing a
//! [`crate::differ::HashBisectDiffer`].

use crate::error::TableDiffError;

/// Bisection parameters controlling how `HashBisectDiffer` partitions and
/// compares a pair of tables.
#[derive(Debug, Clone, PartialEq)]
pub struct DifferConfig {
    /// Number of child segments produced per split. Must be at least 2 and
    /// strictly less than `bisection_threshold`.
    pub bisection_factor: u32,

    /// Row count under which a segment is downloaded and compared locally
    /// instead of being split further.
    pub bisection_threshold: u64,

    /// Enable/disable threaded diffing. When `false`, all work runs
    /// sequentially on the calling thread via a single-worker pool.
    pub threaded: bool,

    /// Maximum size of the worker pool. `None` lets the pool size itself to
    /// the number of available cores.
    pub max_threadpool_size: Option<usize>,

    /// Skip sorting the leaf diff output by key. Faster, but entries with
    /// the same key and different column values may not appear adjacent in
    /// the output.
    pub skip_sort_results: bool,

    /// Support duplicate rows (multiset semantics) in the leaf comparison.
    /// When `false`, leaf comparison is a plain set difference.
    pub duplicate_rows_support: bool,

    /// Allow a side to have zero rows under its filter instead of failing
    /// with `TableDiffError::EmptyTable`.
    pub allow_empty_tables: bool,

    /// Skip checksumming and go straight to downloading + comparing rows
    /// once a segment is below `bisection_threshold`. Useful for isolating
    /// network/download cost when benchmarking; produces the same final
    /// diff, just without the checksum short-circuit.
    pub benchmark: bool,
}

impl Default for DifferConfig {
    fn default() -> Self {
        Self {
            bisection_factor: 32,
            bisection_threshold: 1024 * 16,
            threaded: true,
            max_threadpool_size: Some(1),
            skip_sort_results: false,
            duplicate_rows_support: true,
            allow_empty_tables: false,
            benchmark: false,
        }
    }
}

impl DifferConfig {
    /// Validate the bisection parameters.
    ///
    /// Mirrors the one check the original engine performs at construction
    /// time: the factor must leave room for at least one split before the
    /// threshold is hit.
    pub fn validate(&self) -> Result<(), TableDiffError> {
        if self.bisection_factor < 2 {
            return Err(TableDiffError::Configuration(
                "bisection_factor must be at least 2".to_string(),
            ));
        }
        if u64::from(self.bisection_factor) >= self.bisection_threshold {
            return Err(TableDiffError::Configuration(format!(
                "bisection_factor ({}) must be strictly less than bisection_threshold ({})",
                self.bisection_factor, self.bisection_threshold
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = DifferConfig::default();
        assert_eq!(cfg.bisection_factor, 32);
        assert_eq!(cfg.bisection_threshold, 16384);
        assert!(cfg.threaded);
        assert_eq!(cfg.max_threadpool_size, Some(1));
        assert!(!cfg.skip_sort_results);
        assert!(cfg.duplicate_rows_support);
        assert!(!cfg.allow_empty_tables);
        assert!(!cfg.benchmark);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_factor_below_two() {
        let cfg = DifferConfig {
            bisection_factor: 1,
            ..DifferConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_factor_not_below_threshold() {
        let cfg = DifferConfig {
            bisection_factor: 100,
            bisection_threshold: 100,
            ..DifferConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg2 = DifferConfig {
            bisection_factor: 101,
            bisection_threshold: 100,
            ..DifferConfig::default()
        };
        assert!(cfg2.validate().is_err());
    }

    #[test]
    fn accepts_factor_just_below_threshold() {
        let cfg = DifferConfig {
            bisection_factor: 99,
            bisection_threshold: 100,
            ..DifferConfig::default()
        };
        assert!(cfg.validate().is_ok());
    }
}
