//! Row source interfaces.
//!
//! Ownership model:
//! - `RowSource` is the read contract of the relational store holding the
//!   observations. Schema creation, derived columns, and the composite key
//!   column are built upstream and only read here.
//! - Sources are borrowed per operation; the count cache and the batch driver
//!   never own them, so callers can rebuild a source between runs (and must
//!   clear the count cache when they do).

use crate::config::SourceLayout;
use crate::data::{CountEntry, Record};
use crate::errors::ExtractError;
use crate::filter::{Filter, validate_identifier};
use crate::types::ColumnName;

/// Built-in source implementations.
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::{InMemorySource, InMemoryTable};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteSource;

/// Read contract of a relational observation store.
///
/// For a fixed dataset state, every method must be deterministic. Group and row
/// ordering must agree: `fetch_rows` returns rows ordered by the key column
/// (then the time column) in exactly the key order `grouped_counts` reports.
pub trait RowSource: Send + Sync {
    /// Stable source identifier used in logs and errors.
    fn id(&self) -> &str;

    /// Names of the key and time columns.
    fn layout(&self) -> &SourceLayout;

    /// Column names of `table`, in schema order.
    fn columns(&self, table: &str) -> Result<Vec<ColumnName>, ExtractError>;

    /// `(key, row count)` per key under `filter`, ordered by key.
    ///
    /// `limit`/`offset` apply to the group list, not to rows.
    fn grouped_counts(
        &self,
        table: &str,
        filter: &Filter,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<CountEntry>, ExtractError>;

    /// Number of distinct keys under `filter`.
    fn distinct_key_count(&self, table: &str, filter: &Filter) -> Result<u64, ExtractError>;

    /// Number of rows under `filter`.
    fn row_count(&self, table: &str, filter: &Filter) -> Result<u64, ExtractError>;

    /// `features` of the rows under `filter`, ordered by key then time.
    ///
    /// Each record carries the key it was stored under. Rows with a NULL key
    /// are excluded here and from every count. `row_offset`/`row_limit` apply
    /// to the flat row list.
    fn fetch_rows(
        &self,
        table: &str,
        filter: &Filter,
        features: &[ColumnName],
        row_offset: usize,
        row_limit: usize,
    ) -> Result<Vec<Record>, ExtractError>;
}

/// Check `table`, `filter`, and `features` against the source schema.
///
/// Runs before any count or fetch query so configuration mistakes never reach
/// the cache.
pub fn validate_request(
    source: &dyn RowSource,
    table: &str,
    filter: &Filter,
    features: &[ColumnName],
) -> Result<(), ExtractError> {
    validate_identifier(table)?;
    let columns = source.columns(table)?;
    if columns.is_empty() {
        return Err(ExtractError::Configuration(format!(
            "table '{table}' does not exist in source '{}'",
            source.id()
        )));
    }
    let layout = source.layout();
    for required in [&layout.key_column, &layout.time_column] {
        if !columns.contains(required) {
            return Err(ExtractError::Configuration(format!(
                "table '{table}' is missing required column '{required}'"
            )));
        }
    }
    for feature in features {
        validate_identifier(feature)?;
        if !columns.contains(feature) {
            return Err(ExtractError::Configuration(format!(
                "unknown feature '{feature}' for table '{table}'"
            )));
        }
    }
    filter.validate(&columns)
}
