use std::io;

use thiserror::Error;

use crate::types::{Key, SourceId};

/// Error type for configuration, cache, source, and windowing failures.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Invalid sweep, window, split, filter, or schema request. Raised before any I/O.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// A durable count entry could not be decoded.
    #[error("count cache entry is corrupt: {0}")]
    CacheCorruption(String),
    /// The durable count store failed or its lock was poisoned.
    #[error("count cache store failure: {0}")]
    CacheStore(String),
    /// The source returned a different number of rows than the cached counts planned.
    #[error(
        "cached counts are stale: expected {expected} rows for the key window, source returned {actual}"
    )]
    StaleCounts {
        /// Rows the cached counts planned for.
        expected: usize,
        /// Rows actually returned.
        actual: usize,
    },
    /// A fetched row belongs to a different key than the cached counts place it under.
    #[error(
        "cached counts are stale: row {position} of the key window belongs to '{found}', expected '{expected}'"
    )]
    KeyMismatch {
        /// Key the cached counts assign to the row.
        expected: Key,
        /// Key the source returned for the row.
        found: Key,
        /// Row position within the fetched key window.
        position: usize,
    },
    /// Time values decrease inside one key's rows.
    #[error("rows for key '{key}' are not in time order at position {position}")]
    UnorderedGroup {
        /// Key whose rows are out of order.
        key: Key,
        /// Index within the group of the first offending row.
        position: usize,
    },
    /// The row source failed to answer a query.
    #[error("row source '{source_id}' failed: {reason}")]
    Source {
        /// Identifier of the failing source.
        source_id: SourceId,
        /// Underlying failure message.
        reason: String,
    },
    /// Window tensors could not be shaped or concatenated.
    #[error("tensor assembly failed: {0}")]
    Tensor(String),
    /// Filesystem failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}
