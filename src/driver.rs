//! Batch driver: walks the key space and accumulates windows per configuration.

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::cache::CountCache;
use crate::config::SweepConfig;
use crate::data::WindowTensors;
use crate::errors::ExtractError;
use crate::filter::Filter;
use crate::paginator::fetch_key_window;
use crate::reconstruct::reconstruct;
use crate::source::{RowSource, validate_request};
use crate::types::ConfigKey;
use crate::window::windows;

/// Window tensors per `(history, horizon)`, in sweep order.
///
/// Every configuration of the sweep has an entry, empty when no group was long
/// enough to produce a window.
pub type SweepResult = IndexMap<ConfigKey, WindowTensors>;

/// Drives count lookup, key-window fetch, reconstruction, and windowing over the
/// whole key space of one filtered table.
///
/// The source and cache are borrowed for the driver's lifetime; one batch of
/// groups is alive at a time.
pub struct BatchDriver<'a> {
    source: &'a dyn RowSource,
    cache: &'a CountCache,
}

impl<'a> BatchDriver<'a> {
    /// Driver reading from `source` with counts served by `cache`.
    pub fn new(source: &'a dyn RowSource, cache: &'a CountCache) -> Self {
        Self { source, cache }
    }

    /// Run `sweep` against `table` restricted by `filter`.
    ///
    /// Configuration and schema problems fail before any count or fetch query.
    pub fn run(
        &self,
        table: &str,
        filter: &Filter,
        sweep: &SweepConfig,
    ) -> Result<SweepResult, ExtractError> {
        let configs = sweep.window_configs()?;
        validate_request(self.source, table, filter, &sweep.features)?;

        let feature_count = sweep.features.len();
        let mut results: SweepResult = configs
            .iter()
            .map(|config| {
                (
                    config.key(),
                    WindowTensors::empty(
                        config.history,
                        feature_count,
                        config.label_count(feature_count),
                    ),
                )
            })
            .collect();

        let total_keys = match sweep.total_keys {
            Some(total) => total,
            None => self
                .cache
                .get_unique_key_count(self.source, table, filter)? as usize,
        };
        let (max_history, max_horizon) = sweep.sweep_max();
        info!(
            "[keyed_windows:driver] table={} filter='{}' keys={} batch={} configs={} max_h={} max_t={}",
            table,
            filter,
            total_keys,
            sweep.key_batch_size,
            configs.len(),
            max_history,
            max_horizon
        );

        let mut key_offset = 0usize;
        let mut batch = 0usize;
        while key_offset < total_keys {
            let key_limit = sweep.key_batch_size.min(total_keys - key_offset);
            let counts = self.cache.get_counts(
                self.source,
                table,
                filter,
                Some(key_offset + key_limit),
                Some(0),
            )?;
            let fetched = fetch_key_window(
                self.source,
                table,
                filter,
                &sweep.features,
                &counts,
                key_offset,
                key_limit,
            )?;
            let row_count = fetched.rows.len();
            let groups = reconstruct(fetched.rows, &counts, key_offset, key_limit)?;
            if groups.is_empty() {
                info!(
                    "[keyed_windows:driver] batch {} at key offset {} has no groups; stopping",
                    batch, key_offset
                );
                break;
            }

            let mut produced = 0usize;
            for config in &configs {
                let tensors = windows(&groups, config)?;
                debug!(
                    "[keyed_windows:driver] batch {} config {:?}: {} windows",
                    batch,
                    config.key(),
                    tensors.len()
                );
                produced += tensors.len();
                if let Some(acc) = results.get_mut(&config.key()) {
                    acc.append(&tensors)?;
                }
            }
            info!(
                "[keyed_windows:driver] batch {} keys {}..{} rows={} groups={} windows={}",
                batch,
                key_offset,
                key_offset + key_limit,
                row_count,
                groups.len(),
                produced
            );

            key_offset += key_limit;
            batch += 1;
        }
        Ok(results)
    }
}
