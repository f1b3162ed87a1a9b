//! Key-window pagination over a flat, key-ordered row list.
//!
//! The cached count list turns a key-index window into an absolute row range,
//! so one ordered range read replaces one query per key.

use std::ops::Range;

use tracing::debug;

use crate::data::{CountEntry, Record};
use crate::errors::ExtractError;
use crate::filter::Filter;
use crate::source::RowSource;
use crate::types::ColumnName;

/// Cumulative row offsets: `offsets[i]` is the number of rows before key `i`.
///
/// The result has `counts.len() + 1` elements; the last is the total row count.
pub fn row_offsets(counts: &[CountEntry]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(counts.len() + 1);
    let mut cumulative = 0usize;
    offsets.push(cumulative);
    for entry in counts {
        cumulative += entry.rows as usize;
        offsets.push(cumulative);
    }
    offsets
}

/// Key and row ranges covered by one key window.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyWindowPlan {
    /// Key indices, clamped to the available counts.
    pub keys: Range<usize>,
    /// Absolute rows in the flat ordered result set.
    pub rows: Range<usize>,
}

impl KeyWindowPlan {
    /// Plan `[key_offset, key_offset + key_limit)` against `counts`.
    ///
    /// A window running past the end of `counts` is clamped; one starting past
    /// the end is empty.
    pub fn new(counts: &[CountEntry], key_offset: usize, key_limit: usize) -> Self {
        let offsets = row_offsets(counts);
        let start = key_offset.min(counts.len());
        let end = key_offset.saturating_add(key_limit).min(counts.len());
        Self {
            keys: start..end,
            rows: offsets[start]..offsets[end],
        }
    }

    /// Rows covered by the planned keys.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// True when the plan covers no keys.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Rows fetched for one key window.
#[derive(Clone, Debug)]
pub struct KeyWindow {
    /// Rows of every key in `key_range`, ordered by key then time.
    pub rows: Vec<Record>,
    /// Absolute position of `rows` in the flat ordered result set.
    pub row_range: Range<usize>,
    /// Key indices covered, clamped to the count list.
    pub key_range: Range<usize>,
}

impl KeyWindow {
    fn from_plan(plan: KeyWindowPlan, rows: Vec<Record>) -> Self {
        Self {
            rows,
            row_range: plan.rows,
            key_range: plan.keys,
        }
    }
}

/// Fetch every row of the keys in `[key_offset, key_offset + key_limit)` with a
/// single ordered range read.
///
/// `counts` must be the ordered count list of `filter` covering at least the
/// requested window. A row count disagreeing with the plan means the counts are
/// stale and fails with `StaleCounts`.
pub fn fetch_key_window(
    source: &dyn RowSource,
    table: &str,
    filter: &Filter,
    features: &[ColumnName],
    counts: &[CountEntry],
    key_offset: usize,
    key_limit: usize,
) -> Result<KeyWindow, ExtractError> {
    let plan = KeyWindowPlan::new(counts, key_offset, key_limit);
    if plan.is_empty() {
        return Ok(KeyWindow::from_plan(plan, Vec::new()));
    }
    debug!(
        "[keyed_windows:paginator] keys {:?} -> rows {:?} table={}",
        plan.keys, plan.rows, table
    );
    let rows = source.fetch_rows(table, filter, features, plan.rows.start, plan.row_count())?;
    if rows.len() != plan.row_count() {
        return Err(ExtractError::StaleCounts {
            expected: plan.row_count(),
            actual: rows.len(),
        });
    }
    Ok(KeyWindow::from_plan(plan, rows))
}
