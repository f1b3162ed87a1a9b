use crate::constants::driver::DEFAULT_KEY_BATCH_SIZE;
use crate::constants::source::{DEFAULT_KEY_COLUMN, DEFAULT_TIME_COLUMN};
use crate::constants::split::{DEFAULT_SPLIT_SEED, DEFAULT_TEST_FRACTION};
use crate::errors::ExtractError;
use crate::types::{ColumnName, ConfigKey};

/// Names of the pre-built columns every observation table carries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceLayout {
    /// Indexed composite key column (e.g. game x team x entity).
    pub key_column: ColumnName,
    /// Column that orders rows in time within a key.
    pub time_column: ColumnName,
}

impl Default for SourceLayout {
    fn default() -> Self {
        Self {
            key_column: DEFAULT_KEY_COLUMN.to_string(),
            time_column: DEFAULT_TIME_COLUMN.to_string(),
        }
    }
}

/// Window geometry for one `(history, horizon)` configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowConfig {
    /// Rows per input window (`H`).
    pub history: usize,
    /// Steps between the last input row and the label row (`T`).
    pub horizon: usize,
    /// Largest history evaluated in the sweep; equals `history` standalone.
    pub max_history: usize,
    /// Largest horizon evaluated in the sweep; equals `horizon` standalone.
    pub max_horizon: usize,
    /// Feature positions copied into labels; `None` copies every feature.
    pub label_indices: Option<Vec<usize>>,
}

impl WindowConfig {
    /// Standalone configuration (`max_*` equal to `history`/`horizon`).
    pub fn new(history: usize, horizon: usize) -> Self {
        Self {
            history,
            horizon,
            max_history: history,
            max_horizon: horizon,
            label_indices: None,
        }
    }

    /// Attach the sweep-wide maxima used for alignment.
    pub fn with_sweep_max(mut self, max_history: usize, max_horizon: usize) -> Self {
        self.max_history = max_history;
        self.max_horizon = max_horizon;
        self
    }

    /// Restrict labels to the features at `indices`.
    pub fn with_label_indices(mut self, indices: Vec<usize>) -> Self {
        self.label_indices = Some(indices);
        self
    }

    /// `(history, horizon)` identity of this configuration.
    pub fn key(&self) -> ConfigKey {
        (self.history, self.horizon)
    }

    /// Width of each label row for records carrying `feature_count` values.
    pub fn label_count(&self, feature_count: usize) -> usize {
        self.label_indices
            .as_ref()
            .map(Vec::len)
            .unwrap_or(feature_count)
    }

    /// Validate the geometry against records carrying `feature_count` values.
    pub fn validate(&self, feature_count: usize) -> Result<(), ExtractError> {
        if self.history == 0 || self.horizon == 0 {
            return Err(ExtractError::Configuration(format!(
                "history and horizon must be positive (got H={}, T={})",
                self.history, self.horizon
            )));
        }
        if self.max_history < self.history || self.max_horizon < self.horizon {
            return Err(ExtractError::Configuration(format!(
                "sweep maxima (H={}, T={}) must not be smaller than the configuration (H={}, T={})",
                self.max_history, self.max_horizon, self.history, self.horizon
            )));
        }
        if let Some(indices) = &self.label_indices {
            if indices.is_empty() {
                return Err(ExtractError::Configuration(
                    "label_indices must not be empty".into(),
                ));
            }
            if let Some(bad) = indices.iter().find(|idx| **idx >= feature_count) {
                return Err(ExtractError::Configuration(format!(
                    "label index {bad} out of range for {feature_count} features"
                )));
            }
        }
        Ok(())
    }
}

/// Top-level sweep configuration consumed by `BatchDriver::run`.
#[derive(Clone, Debug)]
pub struct SweepConfig {
    /// History lengths evaluated in the sweep.
    pub history_values: Vec<usize>,
    /// Horizons evaluated in the sweep.
    pub horizon_values: Vec<usize>,
    /// Keys fetched per batch.
    pub key_batch_size: usize,
    /// Keys to consume; `None` uses the distinct key count of the filter.
    pub total_keys: Option<usize>,
    /// Columns fetched for every row, in tensor feature order.
    pub features: Vec<ColumnName>,
    /// Features copied into labels; `None` copies every feature.
    pub label_features: Option<Vec<ColumnName>>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            history_values: vec![1],
            horizon_values: vec![1],
            key_batch_size: DEFAULT_KEY_BATCH_SIZE,
            total_keys: None,
            features: Vec::new(),
            label_features: None,
        }
    }
}

impl SweepConfig {
    /// Largest history and horizon of the sweep.
    pub fn sweep_max(&self) -> (usize, usize) {
        (
            self.history_values.iter().copied().max().unwrap_or(0),
            self.horizon_values.iter().copied().max().unwrap_or(0),
        )
    }

    /// Every distinct `(history, horizon)` pair, history-major.
    pub fn config_keys(&self) -> Vec<ConfigKey> {
        let mut keys = Vec::with_capacity(self.history_values.len() * self.horizon_values.len());
        for &history in &self.history_values {
            for &horizon in &self.horizon_values {
                if !keys.contains(&(history, horizon)) {
                    keys.push((history, horizon));
                }
            }
        }
        keys
    }

    /// Resolve feature names to their positions in `features`.
    pub fn feature_indices<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<usize>, ExtractError> {
        names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                self.features
                    .iter()
                    .position(|feature| feature == name)
                    .ok_or_else(|| {
                        ExtractError::Configuration(format!(
                            "feature '{name}' is not part of the selected features"
                        ))
                    })
            })
            .collect()
    }

    /// Window configurations for every pair, sharing the sweep maxima.
    pub fn window_configs(&self) -> Result<Vec<WindowConfig>, ExtractError> {
        self.validate()?;
        let (max_history, max_horizon) = self.sweep_max();
        let label_indices = match &self.label_features {
            Some(names) => Some(self.feature_indices(names)?),
            None => None,
        };
        self.config_keys()
            .into_iter()
            .map(|(history, horizon)| {
                let mut config =
                    WindowConfig::new(history, horizon).with_sweep_max(max_history, max_horizon);
                config.label_indices = label_indices.clone();
                config.validate(self.features.len())?;
                Ok(config)
            })
            .collect()
    }

    /// Validate shape-level settings; column names are checked against the source separately.
    pub fn validate(&self) -> Result<(), ExtractError> {
        if self.history_values.is_empty() || self.horizon_values.is_empty() {
            return Err(ExtractError::Configuration(
                "history_values and horizon_values must not be empty".into(),
            ));
        }
        if self.key_batch_size == 0 {
            return Err(ExtractError::Configuration(
                "key_batch_size must be greater than zero".into(),
            ));
        }
        if self.features.is_empty() {
            return Err(ExtractError::Configuration(
                "at least one feature must be selected".into(),
            ));
        }
        Ok(())
    }
}

/// Controls the shuffled train/test split of window tensors.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SplitConfig {
    /// Fraction of windows assigned to the test partition, in `(0, 1)`.
    pub test_fraction: f64,
    /// Seed for the deterministic shuffle.
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            test_fraction: DEFAULT_TEST_FRACTION,
            seed: DEFAULT_SPLIT_SEED,
        }
    }
}

impl SplitConfig {
    /// Check that `test_fraction` lies strictly between 0 and 1.
    pub fn validate(self) -> Result<Self, ExtractError> {
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return Err(ExtractError::Configuration(format!(
                "test_fraction must lie strictly between 0 and 1 (got {})",
                self.test_fraction
            )));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sweep() -> SweepConfig {
        SweepConfig {
            history_values: vec![2, 3],
            horizon_values: vec![1, 2],
            key_batch_size: 2,
            total_keys: None,
            features: vec!["pos_x".into(), "pos_z".into(), "hp".into()],
            label_features: Some(vec!["pos_z".into(), "pos_x".into()]),
        }
    }

    #[test]
    fn window_configs_share_sweep_maxima() {
        let configs = sweep().window_configs().unwrap();
        let keys: Vec<ConfigKey> = configs.iter().map(WindowConfig::key).collect();
        assert_eq!(keys, vec![(2, 1), (2, 2), (3, 1), (3, 2)]);
        assert!(
            configs
                .iter()
                .all(|config| config.max_history == 3 && config.max_horizon == 2)
        );
        assert_eq!(configs[0].label_indices, Some(vec![1, 0]));
        assert_eq!(configs[0].label_count(3), 2);
    }

    #[test]
    fn repeated_values_yield_one_configuration() {
        let mut config = sweep();
        config.history_values = vec![2, 2];
        config.horizon_values = vec![1];
        assert_eq!(config.config_keys(), vec![(2, 1)]);
    }

    #[test]
    fn unknown_label_feature_is_a_configuration_error() {
        let mut config = sweep();
        config.label_features = Some(vec!["mana".into()]);
        let err = config.window_configs().unwrap_err();
        assert!(matches!(err, ExtractError::Configuration(msg) if msg.contains("'mana'")));
    }

    #[test]
    fn zero_history_or_batch_size_is_rejected() {
        let mut config = sweep();
        config.history_values = vec![0, 2];
        assert!(matches!(
            config.window_configs(),
            Err(ExtractError::Configuration(msg)) if msg.contains("positive")
        ));

        let mut config = sweep();
        config.key_batch_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ExtractError::Configuration(msg)) if msg.contains("key_batch_size")
        ));

        let mut config = sweep();
        config.horizon_values.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn window_config_rejects_out_of_range_label_indices() {
        let config = WindowConfig::new(2, 1).with_label_indices(vec![0, 4]);
        let err = config.validate(3).unwrap_err();
        assert!(matches!(err, ExtractError::Configuration(msg) if msg.contains("label index 4")));

        let shrunk = WindowConfig::new(3, 1).with_sweep_max(2, 1);
        assert!(shrunk.validate(3).is_err());
    }

    #[test]
    fn split_config_requires_open_unit_interval() {
        assert!(SplitConfig::default().validate().is_ok());
        for fraction in [0.0, 1.0, -0.5, f64::NAN] {
            let config = SplitConfig {
                test_fraction: fraction,
                seed: 1,
            };
            assert!(config.validate().is_err(), "fraction {fraction} accepted");
        }
    }
}
