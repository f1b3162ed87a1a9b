/// Constants used by the count cache and its durable store encoding.
pub mod cache {
    /// Key used for durable store global metadata.
    pub const META_KEY: &[u8] = b"__meta__";
    /// Key prefix for per-query count-list records.
    pub const COUNTS_PREFIX: &[u8] = b"counts:";
    /// Key prefix for per-filter distinct key count records.
    pub const KEY_COUNT_PREFIX: &[u8] = b"key_count:";
    /// Key prefix for per-table index records listing every entry key of a table.
    pub const TABLE_INDEX_PREFIX: &[u8] = b"table_index:";
    /// Separator between key components (table, filter, limit, offset).
    pub const KEY_SEPARATOR: u8 = 0x1F;
    /// Tombstone marker byte for invalidated records.
    pub const RECORD_TOMBSTONE: u8 = b'-';
    /// Version tag for persisted count-list records.
    pub const COUNTS_RECORD_VERSION: u8 = 1;
    /// Version tag for persisted distinct key count records.
    pub const KEY_COUNT_RECORD_VERSION: u8 = 1;
    /// Version tag for persisted table index records.
    pub const TABLE_INDEX_RECORD_VERSION: u8 = 1;
    /// Prefix marker for bitcode-encoded payloads.
    pub const BITCODE_PREFIX: u8 = b'B';
    /// Version tag for store metadata compatibility checks.
    pub const STORE_VERSION: u8 = 1;

    /// Default directory for persisted count-cache files.
    pub const DEFAULT_STORE_DIR: &str = ".keyed_windows";
    /// Default filename for persisted count-cache files.
    pub const DEFAULT_STORE_FILENAME: &str = "count_cache.bin";
}

/// Constants describing the relational source layout.
pub mod source {
    /// Default name of the pre-built composite key column.
    pub const DEFAULT_KEY_COLUMN: &str = "compound_key";
    /// Default name of the time ordering column.
    pub const DEFAULT_TIME_COLUMN: &str = "time";
    /// Filter text rendered for an empty filter.
    pub const MATCH_ALL_FILTER: &str = "1=1";
    /// Source id reported by the in-memory source.
    pub const MEMORY_SOURCE_ID: &str = "memory";
}

/// Constants used by the batch driver.
pub mod driver {
    /// Keys fetched per batch when the caller does not override it.
    pub const DEFAULT_KEY_BATCH_SIZE: usize = 20;
}

/// Constants used by the train/test split helper.
pub mod split {
    /// Fraction of windows assigned to the test partition by default.
    pub const DEFAULT_TEST_FRACTION: f64 = 0.2;
    /// Seed used when the caller does not provide one.
    pub const DEFAULT_SPLIT_SEED: u64 = 42;
}
