//! Slice a flat key-window fetch back into per-key groups.

use crate::data::{CountEntry, KeyGroups, Record};
use crate::errors::ExtractError;
use crate::paginator::KeyWindowPlan;

/// Split `rows` into per-key groups using the same offset arithmetic the fetch
/// was planned with.
///
/// `rows` must be the rows returned for `[key_offset, key_offset + key_limit)`
/// of `counts`. Groups come back in key order; keys with zero rows are omitted.
/// Too few or too many rows fail with `StaleCounts`; a row whose key differs
/// from the key its slot was planned for fails with `KeyMismatch`; a group
/// whose time values decrease (or are NaN) fails with `UnorderedGroup`.
pub fn reconstruct(
    rows: Vec<Record>,
    counts: &[CountEntry],
    key_offset: usize,
    key_limit: usize,
) -> Result<KeyGroups, ExtractError> {
    let plan = KeyWindowPlan::new(counts, key_offset, key_limit);
    if rows.len() != plan.row_count() {
        return Err(ExtractError::StaleCounts {
            expected: plan.row_count(),
            actual: rows.len(),
        });
    }

    let mut groups = KeyGroups::with_capacity(plan.keys.len());
    let mut remaining = rows.into_iter();
    let mut position = 0;
    for entry in &counts[plan.keys.clone()] {
        let group: Vec<Record> = remaining.by_ref().take(entry.rows as usize).collect();
        if group.is_empty() {
            continue;
        }
        check_keys(&entry.key, &group, position)?;
        check_time_order(&entry.key, &group)?;
        position += group.len();
        groups.entry(entry.key.clone()).or_default().extend(group);
    }
    Ok(groups)
}

fn check_keys(expected: &str, group: &[Record], start: usize) -> Result<(), ExtractError> {
    match group.iter().position(|record| record.key != expected) {
        Some(offset) => Err(ExtractError::KeyMismatch {
            expected: expected.to_string(),
            found: group[offset].key.clone(),
            position: start + offset,
        }),
        None => Ok(()),
    }
}

fn check_time_order(key: &str, group: &[Record]) -> Result<(), ExtractError> {
    let position = group
        .iter()
        .position(|record| record.time.is_nan())
        .or_else(|| {
            group
                .windows(2)
                .position(|pair| pair[1].time < pair[0].time)
                .map(|position| position + 1)
        });
    match position {
        Some(position) => Err(ExtractError::UnorderedGroup {
            key: key.to_string(),
            position,
        }),
        None => Ok(()),
    }
}
