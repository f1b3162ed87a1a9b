//! Per-filter row-count cache.
//!
//! `CountCache` answers "how many rows does each key have under this filter"
//! from memory, then from a durable `CountStore`, and only then by running the
//! grouped-count query against the source. The ordered count list is the sole
//! basis of key-window offset arithmetic, so a cached list is reused verbatim
//! until `clear_cache` is called for its table.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tracing::{debug, info};

use crate::data::CountEntry;
use crate::errors::ExtractError;
use crate::filter::Filter;
use crate::source::RowSource;
use crate::types::{FilterText, TableName};

/// Durable store implementations.
pub mod store;

pub use store::{CountStore, FileCountStore, MemoryCountStore};

/// Literal identity of one grouped-count query.
///
/// Different `limit`/`offset` pairs are distinct entries even when one range
/// contains the other.
#[derive(Clone, Debug, PartialEq, Eq, Hash, bitcode::Encode, bitcode::Decode)]
pub struct CountQuery {
    /// Table counted.
    pub table: TableName,
    /// Rendered filter text.
    pub filter: FilterText,
    /// Maximum number of keys returned.
    pub limit: Option<usize>,
    /// Keys skipped before the first returned one.
    pub offset: Option<usize>,
}

impl CountQuery {
    /// Identity of the count query for `table` under `filter` with the given range.
    pub fn new(table: &str, filter: &Filter, limit: Option<usize>, offset: Option<usize>) -> Self {
        Self {
            table: table.to_string(),
            filter: filter.render(),
            limit,
            offset,
        }
    }
}

/// Two-layer cache of grouped row counts.
///
/// Reads are served from the memory layer under a shared lock. Every mutation
/// (write-through recompute, refresh, clear) runs under one writer lock, and the
/// durable write always completes before the memory layer is updated.
pub struct CountCache {
    store: Arc<dyn CountStore>,
    counts: RwLock<HashMap<CountQuery, Arc<Vec<CountEntry>>>>,
    key_counts: RwLock<HashMap<(TableName, FilterText), u64>>,
    writer: Mutex<()>,
}

impl fmt::Debug for CountCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cached = self.counts.read().map(|guard| guard.len()).unwrap_or(0);
        f.debug_struct("CountCache")
            .field("cached_queries", &cached)
            .finish()
    }
}

impl CountCache {
    /// Cache backed by `store`.
    pub fn new(store: Arc<dyn CountStore>) -> Self {
        Self {
            store,
            counts: RwLock::new(HashMap::new()),
            key_counts: RwLock::new(HashMap::new()),
            writer: Mutex::new(()),
        }
    }

    /// Cache whose durable layer lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCountStore::new()))
    }

    /// Ordered `(key, rows)` entries for `filter`, with `limit`/`offset` applied
    /// to the key list.
    ///
    /// A corrupt durable entry fails with `CacheCorruption`; use
    /// `refresh_counts` to recompute over it.
    pub fn get_counts(
        &self,
        source: &dyn RowSource,
        table: &str,
        filter: &Filter,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Arc<Vec<CountEntry>>, ExtractError> {
        let query = CountQuery::new(table, filter, limit, offset);
        if let Some(hit) = self.memory_counts(&query)? {
            debug!(
                "[keyed_windows:cache] memory hit for counts table={} filter='{}'",
                query.table, query.filter
            );
            return Ok(hit);
        }

        let _writer = self.writer()?;
        if let Some(hit) = self.memory_counts(&query)? {
            return Ok(hit);
        }
        if let Some(entries) = self.store.load_counts(&query)? {
            info!(
                "[keyed_windows:cache] using durable cache for counts table={} filter='{}' keys={}",
                query.table,
                query.filter,
                entries.len()
            );
            return self.promote_counts(query, entries);
        }
        self.recompute_counts(source, filter, query)
    }

    /// Recompute the entry for this exact query, replacing both cache layers.
    pub fn refresh_counts(
        &self,
        source: &dyn RowSource,
        table: &str,
        filter: &Filter,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Arc<Vec<CountEntry>>, ExtractError> {
        let query = CountQuery::new(table, filter, limit, offset);
        let _writer = self.writer()?;
        self.store.remove_counts(&query)?;
        self.counts
            .write()
            .map_err(|_| ExtractError::CacheStore("counts lock poisoned".into()))?
            .remove(&query);
        self.recompute_counts(source, filter, query)
    }

    /// Number of distinct keys under `filter`.
    pub fn get_unique_key_count(
        &self,
        source: &dyn RowSource,
        table: &str,
        filter: &Filter,
    ) -> Result<u64, ExtractError> {
        let id = (table.to_string(), filter.render());
        if let Some(hit) = self.memory_key_count(&id)? {
            return Ok(hit);
        }

        let _writer = self.writer()?;
        if let Some(hit) = self.memory_key_count(&id)? {
            return Ok(hit);
        }
        let keys = match self.store.load_key_count(&id.0, &id.1)? {
            Some(keys) => {
                info!(
                    "[keyed_windows:cache] using durable cache for key count table={} filter='{}'",
                    id.0, id.1
                );
                keys
            }
            None => {
                info!(
                    "[keyed_windows:cache] counting keys table={} filter='{}'",
                    id.0, id.1
                );
                let keys = source.distinct_key_count(table, filter)?;
                self.store.store_key_count(&id.0, &id.1, keys)?;
                keys
            }
        };
        self.key_counts
            .write()
            .map_err(|_| ExtractError::CacheStore("key count lock poisoned".into()))?
            .insert(id, keys);
        Ok(keys)
    }

    /// Drop every cached entry of `table` from both layers.
    ///
    /// Must be called whenever the filtered view of `table` is rebuilt; cached
    /// counts are never revalidated on their own.
    pub fn clear_cache(&self, table: &str) -> Result<(), ExtractError> {
        let _writer = self.writer()?;
        let dropped = self.store.clear_table(table)?;
        self.counts
            .write()
            .map_err(|_| ExtractError::CacheStore("counts lock poisoned".into()))?
            .retain(|query, _| query.table != table);
        self.key_counts
            .write()
            .map_err(|_| ExtractError::CacheStore("key count lock poisoned".into()))?
            .retain(|(owner, _), _| owner != table);
        info!("[keyed_windows:cache] cleared table={table} durable_records={dropped}");
        Ok(())
    }

    /// Number of count queries held in the memory layer.
    pub fn cached_queries(&self) -> usize {
        self.counts.read().map(|guard| guard.len()).unwrap_or(0)
    }

    fn writer(&self) -> Result<MutexGuard<'_, ()>, ExtractError> {
        self.writer
            .lock()
            .map_err(|_| ExtractError::CacheStore("cache writer lock poisoned".into()))
    }

    fn memory_counts(
        &self,
        query: &CountQuery,
    ) -> Result<Option<Arc<Vec<CountEntry>>>, ExtractError> {
        Ok(self
            .counts
            .read()
            .map_err(|_| ExtractError::CacheStore("counts lock poisoned".into()))?
            .get(query)
            .cloned())
    }

    fn memory_key_count(&self, id: &(TableName, FilterText)) -> Result<Option<u64>, ExtractError> {
        Ok(self
            .key_counts
            .read()
            .map_err(|_| ExtractError::CacheStore("key count lock poisoned".into()))?
            .get(id)
            .copied())
    }

    /// Run the grouped count and write it through both layers. Caller holds the writer lock.
    fn recompute_counts(
        &self,
        source: &dyn RowSource,
        filter: &Filter,
        query: CountQuery,
    ) -> Result<Arc<Vec<CountEntry>>, ExtractError> {
        info!(
            "[keyed_windows:cache] counting rows table={} filter='{}' limit={:?} offset={:?}",
            query.table, query.filter, query.limit, query.offset
        );
        let entries = source.grouped_counts(&query.table, filter, query.limit, query.offset)?;
        self.store.store_counts(&query, &entries)?;
        self.promote_counts(query, entries)
    }

    fn promote_counts(
        &self,
        query: CountQuery,
        entries: Vec<CountEntry>,
    ) -> Result<Arc<Vec<CountEntry>>, ExtractError> {
        let entries = Arc::new(entries);
        self.counts
            .write()
            .map_err(|_| ExtractError::CacheStore("counts lock poisoned".into()))?
            .insert(query, entries.clone());
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceLayout;
    use crate::data::Record;
    use crate::filter::{CmpOp, Value};
    use crate::source::{InMemorySource, InMemoryTable};
    use crate::types::ColumnName;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// Wraps a source and counts grouped-count queries reaching it.
    struct CountingSource {
        inner: InMemorySource,
        grouped: AtomicUsize,
        distinct: AtomicUsize,
    }

    impl CountingSource {
        fn new(inner: InMemorySource) -> Self {
            Self {
                inner,
                grouped: AtomicUsize::new(0),
                distinct: AtomicUsize::new(0),
            }
        }

        fn grouped_calls(&self) -> usize {
            self.grouped.load(Ordering::SeqCst)
        }
    }

    impl RowSource for CountingSource {
        fn id(&self) -> &str {
            self.inner.id()
        }

        fn layout(&self) -> &SourceLayout {
            self.inner.layout()
        }

        fn columns(&self, table: &str) -> Result<Vec<ColumnName>, ExtractError> {
            self.inner.columns(table)
        }

        fn grouped_counts(
            &self,
            table: &str,
            filter: &Filter,
            limit: Option<usize>,
            offset: Option<usize>,
        ) -> Result<Vec<CountEntry>, ExtractError> {
            self.grouped.fetch_add(1, Ordering::SeqCst);
            self.inner.grouped_counts(table, filter, limit, offset)
        }

        fn distinct_key_count(&self, table: &str, filter: &Filter) -> Result<u64, ExtractError> {
            self.distinct.fetch_add(1, Ordering::SeqCst);
            self.inner.distinct_key_count(table, filter)
        }

        fn row_count(&self, table: &str, filter: &Filter) -> Result<u64, ExtractError> {
            self.inner.row_count(table, filter)
        }

        fn fetch_rows(
            &self,
            table: &str,
            filter: &Filter,
            features: &[ColumnName],
            row_offset: usize,
            row_limit: usize,
        ) -> Result<Vec<Record>, ExtractError> {
            self.inner
                .fetch_rows(table, filter, features, row_offset, row_limit)
        }
    }

    /// Durable store whose count records always fail to decode.
    struct CorruptStore;

    impl CountStore for CorruptStore {
        fn load_counts(&self, _: &CountQuery) -> Result<Option<Vec<CountEntry>>, ExtractError> {
            Err(ExtractError::CacheCorruption("bitcode payload missing expected prefix".into()))
        }
        fn store_counts(&self, _: &CountQuery, _: &[CountEntry]) -> Result<(), ExtractError> {
            Ok(())
        }
        fn remove_counts(&self, _: &CountQuery) -> Result<(), ExtractError> {
            Ok(())
        }
        fn load_key_count(&self, _: &str, _: &str) -> Result<Option<u64>, ExtractError> {
            Ok(None)
        }
        fn store_key_count(&self, _: &str, _: &str, _: u64) -> Result<(), ExtractError> {
            Ok(())
        }
        fn clear_table(&self, _: &str) -> Result<usize, ExtractError> {
            Ok(0)
        }
    }

    fn source() -> CountingSource {
        let mut rows = Vec::new();
        for (key, len) in [("a", 5), ("b", 3), ("c", 4)] {
            for t in 0..len {
                rows.push(vec![Value::from(key), Value::Integer(t), Value::Real(t as f64)]);
            }
        }
        CountingSource::new(InMemorySource::new().with_table(
            "champs",
            InMemoryTable::new(["compound_key", "time", "pos_x"], rows),
        ))
    }

    #[test]
    fn repeated_lookups_hit_memory() {
        let source = source();
        let cache = CountCache::in_memory();
        let first = cache
            .get_counts(&source, "champs", &Filter::all(), None, None)
            .unwrap();
        let second = cache
            .get_counts(&source, "champs", &Filter::all(), None, None)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(
            *first,
            vec![
                CountEntry::new("a", 5),
                CountEntry::new("b", 3),
                CountEntry::new("c", 4)
            ]
        );
        assert_eq!(source.grouped_calls(), 1);
        assert_eq!(cache.cached_queries(), 1);
    }

    #[test]
    fn limit_and_offset_are_distinct_entries() {
        let source = source();
        let cache = CountCache::in_memory();
        let head = cache
            .get_counts(&source, "champs", &Filter::all(), Some(2), Some(0))
            .unwrap();
        let tail = cache
            .get_counts(&source, "champs", &Filter::all(), Some(2), Some(1))
            .unwrap();
        assert_eq!(head.len(), 2);
        assert_eq!(tail[0].key, "b");
        assert_eq!(source.grouped_calls(), 2);
        assert_eq!(cache.cached_queries(), 2);
    }

    #[test]
    fn durable_layer_survives_a_new_cache() {
        let dir = tempdir().unwrap();
        let source = source();
        let filter = Filter::all().and("time", CmpOp::Gt, 0i64);
        let expected = {
            let store = Arc::new(FileCountStore::open(dir.path()).unwrap());
            let cache = CountCache::new(store);
            cache
                .get_counts(&source, "champs", &filter, None, None)
                .unwrap()
        };

        let store = Arc::new(FileCountStore::open(dir.path()).unwrap());
        let cache = CountCache::new(store);
        let reloaded = cache
            .get_counts(&source, "champs", &filter, None, None)
            .unwrap();
        assert_eq!(reloaded, expected);
        assert_eq!(source.grouped_calls(), 1);
    }

    #[test]
    fn clear_cache_forces_identical_recompute() {
        let source = source();
        let cache = CountCache::in_memory();
        let before = cache
            .get_counts(&source, "champs", &Filter::all(), None, None)
            .unwrap();
        cache.clear_cache("champs").unwrap();
        assert_eq!(cache.cached_queries(), 0);
        let after = cache
            .get_counts(&source, "champs", &Filter::all(), None, None)
            .unwrap();
        assert_eq!(before, after);
        assert_eq!(source.grouped_calls(), 2);
    }

    #[test]
    fn corrupt_durable_entry_fails_loudly_until_refreshed() {
        let source = source();
        let cache = CountCache::new(Arc::new(CorruptStore));
        let err = cache
            .get_counts(&source, "champs", &Filter::all(), None, None)
            .unwrap_err();
        assert!(matches!(err, ExtractError::CacheCorruption(_)));
        assert_eq!(source.grouped_calls(), 0);

        let refreshed = cache
            .refresh_counts(&source, "champs", &Filter::all(), None, None)
            .unwrap();
        assert_eq!(refreshed.len(), 3);
        let served = cache
            .get_counts(&source, "champs", &Filter::all(), None, None)
            .unwrap();
        assert_eq!(served, refreshed);
    }

    #[test]
    fn unique_key_count_is_cached_per_filter() {
        let source = source();
        let cache = CountCache::in_memory();
        assert_eq!(
            cache
                .get_unique_key_count(&source, "champs", &Filter::all())
                .unwrap(),
            3
        );
        assert_eq!(
            cache
                .get_unique_key_count(&source, "champs", &Filter::all())
                .unwrap(),
            3
        );
        let late = Filter::all().and("time", CmpOp::Ge, 4i64);
        assert_eq!(
            cache.get_unique_key_count(&source, "champs", &late).unwrap(),
            1
        );
        assert_eq!(source.distinct.load(Ordering::SeqCst), 2);

        cache.clear_cache("champs").unwrap();
        cache
            .get_unique_key_count(&source, "champs", &Filter::all())
            .unwrap();
        assert_eq!(source.distinct.load(Ordering::SeqCst), 3);
    }
}
