#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Per-filter group-count cache with a durable store.
pub mod cache;
/// Sweep, window, split, and source layout configuration.
pub mod config;
/// Centralized constants used across the cache, sources, and driver.
pub mod constants;
/// Records, count entries, key groups, and window tensors.
pub mod data;
/// Batch driver walking the key space of a filtered table.
pub mod driver;
/// Reusable demo runners shared by downstream crates.
#[cfg(feature = "sqlite")]
pub mod example_apps;
/// Structured row filters rendered to SQL.
pub mod filter;
/// Key-window pagination over key-ordered rows.
pub mod paginator;
/// Per-key group reconstruction from a flat fetch.
pub mod reconstruct;
/// Row source traits and built-in sources.
pub mod source;
/// Deterministic train/test split of window tensors.
pub mod split;
/// Shared type aliases.
pub mod types;
/// Aligned sliding-window generation.
pub mod window;

mod errors;

pub use cache::{CountCache, CountStore, FileCountStore, MemoryCountStore};
pub use config::{SourceLayout, SplitConfig, SweepConfig, WindowConfig};
pub use data::{CountEntry, KeyGroups, Record, WindowTensors};
pub use driver::{BatchDriver, SweepResult};
pub use errors::ExtractError;
pub use filter::{CmpOp, Filter, Value};
pub use paginator::{KeyWindow, fetch_key_window};
pub use reconstruct::reconstruct;
#[cfg(feature = "sqlite")]
pub use source::SqliteSource;
pub use source::{InMemorySource, InMemoryTable, RowSource};
pub use split::{TrainTestSplit, train_test_split};
pub use types::{ColumnName, ConfigKey, FilterText, Key, SourceId, TableName};
pub use window::{aligned_range, window_count, windows};
