use indexmap::IndexMap;
use ndarray::{Array2, Array3, Axis, concatenate};
use serde::{Deserialize, Serialize};

use crate::errors::ExtractError;

pub use crate::types::Key;

/// One observation of one entity at one point in time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Key the row was stored under.
    pub key: Key,
    /// Value of the time ordering column.
    pub time: f64,
    /// Feature values in the caller's `features` order.
    pub values: Vec<f64>,
}

impl Record {
    /// Build a record from its key, time value and feature vector.
    pub fn new(key: impl Into<Key>, time: f64, values: Vec<f64>) -> Self {
        Self {
            key: key.into(),
            time,
            values,
        }
    }
}

/// Number of rows stored for one key under a filter.
#[derive(
    Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, bitcode::Encode, bitcode::Decode,
)]
pub struct CountEntry {
    /// Composite identity.
    pub key: Key,
    /// Rows stored for `key`.
    pub rows: u64,
}

impl CountEntry {
    /// Entry recording `rows` rows for `key`.
    pub fn new(key: impl Into<Key>, rows: u64) -> Self {
        Self {
            key: key.into(),
            rows,
        }
    }
}

/// Time-ordered rows per key, in key order.
pub type KeyGroups = IndexMap<Key, Vec<Record>>;

/// Input and label tensors produced for one `(history, horizon)` configuration.
///
/// `inputs` has shape `(windows, history, feature_count)` and `labels` has shape
/// `(windows, label_count)`. Zero windows is a valid result.
#[derive(Clone, Debug, PartialEq)]
pub struct WindowTensors {
    /// Input windows, `(windows, history, feature_count)`.
    pub inputs: Array3<f64>,
    /// Label rows, `(windows, label_count)`.
    pub labels: Array2<f64>,
}

impl WindowTensors {
    /// Empty tensors with the given trailing dimensions.
    pub fn empty(history: usize, feature_count: usize, label_count: usize) -> Self {
        Self {
            inputs: Array3::zeros((0, history, feature_count)),
            labels: Array2::zeros((0, label_count)),
        }
    }

    /// Number of windows held.
    pub fn len(&self) -> usize {
        self.inputs.len_of(Axis(0))
    }

    /// True when no windows are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rows per input window.
    pub fn history(&self) -> usize {
        self.inputs.len_of(Axis(1))
    }

    /// Input features per row.
    pub fn feature_count(&self) -> usize {
        self.inputs.len_of(Axis(2))
    }

    /// Label values per window.
    pub fn label_count(&self) -> usize {
        self.labels.len_of(Axis(1))
    }

    /// Append `other` after the windows already held.
    pub fn append(&mut self, other: &WindowTensors) -> Result<(), ExtractError> {
        if other.is_empty() {
            return Ok(());
        }
        if self.is_empty() {
            *self = other.clone();
            return Ok(());
        }
        self.inputs = concatenate(Axis(0), &[self.inputs.view(), other.inputs.view()])
            .map_err(|err| ExtractError::Tensor(format!("input concatenation failed: {err}")))?;
        self.labels = concatenate(Axis(0), &[self.labels.view(), other.labels.view()])
            .map_err(|err| ExtractError::Tensor(format!("label concatenation failed: {err}")))?;
        Ok(())
    }

    /// Copy of these tensors keeping only the input feature columns in `indices`.
    ///
    /// Labels are left untouched.
    pub fn select_input_features(&self, indices: &[usize]) -> Result<WindowTensors, ExtractError> {
        let feature_count = self.feature_count();
        if let Some(bad) = indices.iter().find(|idx| **idx >= feature_count) {
            return Err(ExtractError::Configuration(format!(
                "feature index {bad} out of range for {feature_count} input features"
            )));
        }
        Ok(WindowTensors {
            inputs: self.inputs.select(Axis(2), indices),
            labels: self.labels.clone(),
        })
    }
}
