//! Aligned sliding-window generation over per-key groups.
//!
//! Every configuration of a sweep drops the same number of leading rows
//! relative to its own `H + T`, so window `i` of each configuration labels the
//! same absolute row of a group and the last label is always the last row.

use std::ops::Range;

use ndarray::{Array2, Array3};
use tracing::debug;

use crate::config::WindowConfig;
use crate::data::{KeyGroups, Record, WindowTensors};
use crate::errors::ExtractError;

/// Rows of a `len`-row group kept for `(history, horizon)` inside a sweep whose
/// largest values are `(max_history, max_horizon)`.
///
/// The first `(max_history + max_horizon) - (history + horizon)` rows are
/// dropped; the tail is kept.
///
/// # Example
/// ```
/// use keyed_windows::window::aligned_range;
///
/// assert_eq!(aligned_range(10, 2, 1, 3, 2), 2..10);
/// assert_eq!(aligned_range(10, 3, 2, 3, 2), 0..10);
/// assert_eq!(aligned_range(1, 1, 1, 3, 2), 1..1);
/// ```
pub fn aligned_range(
    len: usize,
    history: usize,
    horizon: usize,
    max_history: usize,
    max_horizon: usize,
) -> Range<usize> {
    let lead = (max_history + max_horizon).saturating_sub(history + horizon);
    lead.min(len)..len
}

/// Windows produced by `trimmed_len` rows: `max(0, trimmed_len - H - T + 1)`.
pub fn window_count(trimmed_len: usize, history: usize, horizon: usize) -> usize {
    (trimmed_len + 1).saturating_sub(history + horizon)
}

/// Generate `(input, label)` windows for every group, in group order then window
/// order.
///
/// Input `i` holds trimmed rows `[i, i + H)`; label `i` is trimmed row
/// `i + H + T - 1`, restricted to `label_indices` when configured. Groups
/// shorter than `H + T` contribute nothing.
pub fn windows(groups: &KeyGroups, config: &WindowConfig) -> Result<WindowTensors, ExtractError> {
    let feature_count = groups
        .values()
        .find_map(|group| group.first())
        .map(|record| record.values.len())
        .unwrap_or(0);
    config.validate(feature_count)?;
    let label_count = config.label_count(feature_count);
    let (history, horizon) = config.key();

    let mut inputs: Vec<f64> = Vec::new();
    let mut labels: Vec<f64> = Vec::new();
    let mut produced = 0usize;
    for (key, group) in groups {
        if group.len() < history + horizon {
            debug!(
                "[keyed_windows:window] skipping key '{}' ({} rows < H+T={})",
                key,
                group.len(),
                history + horizon
            );
            continue;
        }
        if let Some(record) = group.iter().find(|record| record.values.len() != feature_count) {
            return Err(ExtractError::Tensor(format!(
                "key '{key}' has a record with {} values, expected {feature_count}",
                record.values.len()
            )));
        }
        let range = aligned_range(
            group.len(),
            history,
            horizon,
            config.max_history,
            config.max_horizon,
        );
        let trimmed = &group[range];
        let count = window_count(trimmed.len(), history, horizon);
        for start in 0..count {
            for record in &trimmed[start..start + history] {
                inputs.extend_from_slice(&record.values);
            }
            push_label(&mut labels, &trimmed[start + history + horizon - 1], config);
        }
        produced += count;
    }

    let inputs = Array3::from_shape_vec((produced, history, feature_count), inputs)
        .map_err(|err| ExtractError::Tensor(format!("input tensor assembly failed: {err}")))?;
    let labels = Array2::from_shape_vec((produced, label_count), labels)
        .map_err(|err| ExtractError::Tensor(format!("label tensor assembly failed: {err}")))?;
    Ok(WindowTensors { inputs, labels })
}

fn push_label(labels: &mut Vec<f64>, record: &Record, config: &WindowConfig) {
    match &config.label_indices {
        Some(indices) => labels.extend(indices.iter().map(|idx| record.values[*idx])),
        None => labels.extend_from_slice(&record.values),
    }
}
