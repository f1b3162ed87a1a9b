use simd_r_drive::storage_engine::DataStore;
use simd_r_drive::storage_engine::traits::{DataStoreReader, DataStoreWriter};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use crate::cache::CountQuery;
use crate::constants::cache::{
    BITCODE_PREFIX, COUNTS_PREFIX, COUNTS_RECORD_VERSION, DEFAULT_STORE_DIR,
    DEFAULT_STORE_FILENAME, KEY_COUNT_PREFIX, KEY_COUNT_RECORD_VERSION, KEY_SEPARATOR, META_KEY,
    RECORD_TOMBSTONE, STORE_VERSION, TABLE_INDEX_PREFIX, TABLE_INDEX_RECORD_VERSION,
};
use crate::data::CountEntry;
use crate::errors::ExtractError;
use crate::types::{FilterText, TableName};

/// Durable layer of the count cache.
///
/// Writes are idempotent upserts; `clear_table` invalidates every entry written
/// for a table. Implementations must make each single write all-or-nothing.
pub trait CountStore: Send + Sync {
    /// Load the count list persisted for `query`, if any.
    fn load_counts(&self, query: &CountQuery) -> Result<Option<Vec<CountEntry>>, ExtractError>;
    /// Persist the count list for `query`, replacing any previous value.
    fn store_counts(&self, query: &CountQuery, entries: &[CountEntry]) -> Result<(), ExtractError>;
    /// Drop the count list persisted for `query`.
    fn remove_counts(&self, query: &CountQuery) -> Result<(), ExtractError>;
    /// Load the distinct key count persisted for `(table, filter)`, if any.
    fn load_key_count(&self, table: &str, filter: &str) -> Result<Option<u64>, ExtractError>;
    /// Persist the distinct key count for `(table, filter)`.
    fn store_key_count(&self, table: &str, filter: &str, keys: u64) -> Result<(), ExtractError>;
    /// Invalidate every record of `table`; returns how many records were dropped.
    fn clear_table(&self, table: &str) -> Result<usize, ExtractError>;
}

/// In-memory count store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryCountStore {
    counts: RwLock<HashMap<CountQuery, Vec<CountEntry>>>,
    key_counts: RwLock<HashMap<(TableName, FilterText), u64>>,
}

impl MemoryCountStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CountStore for MemoryCountStore {
    fn load_counts(&self, query: &CountQuery) -> Result<Option<Vec<CountEntry>>, ExtractError> {
        Ok(self
            .counts
            .read()
            .map_err(|_| ExtractError::CacheStore("counts lock poisoned".into()))?
            .get(query)
            .cloned())
    }

    fn store_counts(&self, query: &CountQuery, entries: &[CountEntry]) -> Result<(), ExtractError> {
        self.counts
            .write()
            .map_err(|_| ExtractError::CacheStore("counts lock poisoned".into()))?
            .insert(query.clone(), entries.to_vec());
        Ok(())
    }

    fn remove_counts(&self, query: &CountQuery) -> Result<(), ExtractError> {
        self.counts
            .write()
            .map_err(|_| ExtractError::CacheStore("counts lock poisoned".into()))?
            .remove(query);
        Ok(())
    }

    fn load_key_count(&self, table: &str, filter: &str) -> Result<Option<u64>, ExtractError> {
        Ok(self
            .key_counts
            .read()
            .map_err(|_| ExtractError::CacheStore("key count lock poisoned".into()))?
            .get(&(table.to_string(), filter.to_string()))
            .copied())
    }

    fn store_key_count(&self, table: &str, filter: &str, keys: u64) -> Result<(), ExtractError> {
        self.key_counts
            .write()
            .map_err(|_| ExtractError::CacheStore("key count lock poisoned".into()))?
            .insert((table.to_string(), filter.to_string()), keys);
        Ok(())
    }

    fn clear_table(&self, table: &str) -> Result<usize, ExtractError> {
        let mut counts = self
            .counts
            .write()
            .map_err(|_| ExtractError::CacheStore("counts lock poisoned".into()))?;
        let mut key_counts = self
            .key_counts
            .write()
            .map_err(|_| ExtractError::CacheStore("key count lock poisoned".into()))?;
        let before = counts.len() + key_counts.len();
        counts.retain(|query, _| query.table != table);
        key_counts.retain(|(owner, _), _| owner != table);
        Ok(before - counts.len() - key_counts.len())
    }
}

#[derive(Clone, Copy, Debug, bitcode::Encode, bitcode::Decode)]
/// Versioned metadata header stored in file-backed count stores.
struct StoreMeta {
    version: u8,
}

/// Persisted count list; carries its own query so a record can be checked
/// against the key it was read from.
#[derive(Clone, Debug, bitcode::Encode, bitcode::Decode)]
struct PersistedCounts {
    query: CountQuery,
    entries: Vec<CountEntry>,
}

#[derive(Clone, Debug, bitcode::Encode, bitcode::Decode)]
struct PersistedKeyCount {
    table: TableName,
    filter: FilterText,
    keys: u64,
}

/// Durable keys of every record written for one table.
#[derive(Clone, Debug, Default, bitcode::Encode, bitcode::Decode)]
struct PersistedTableIndex {
    keys: Vec<Vec<u8>>,
}

/// File-backed count store.
///
/// Records are `[version][bitcode prefix][bitcode payload]`; invalidated
/// records are overwritten with a tombstone byte. A per-table index lists the
/// record keys of each table and is written before the record it lists.
pub struct FileCountStore {
    store: DataStore,
    path: PathBuf,
    index_lock: Mutex<()>,
}

impl fmt::Debug for FileCountStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileCountStore")
            .field("path", &self.path)
            .finish()
    }
}

impl FileCountStore {
    /// Open (or create) a file-backed count store at `path`.
    ///
    /// A directory path resolves to the default filename inside it.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, ExtractError> {
        let path = coerce_store_path(path.into());
        ensure_parent_dir(&path)?;
        let store = DataStore::open(path.as_path()).map_err(map_store_err)?;
        let store = Self {
            store,
            path,
            index_lock: Mutex::new(()),
        };
        store.verify_metadata()?;
        Ok(store)
    }

    /// Default count-store file path under the crate's default store directory.
    pub fn default_path() -> PathBuf {
        Self::default_path_in_dir(DEFAULT_STORE_DIR)
    }

    /// Default count-store file path inside a custom directory.
    pub fn default_path_in_dir<P: AsRef<Path>>(dir: P) -> PathBuf {
        dir.as_ref().join(DEFAULT_STORE_FILENAME)
    }

    /// Backing file of this store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn verify_metadata(&self) -> Result<(), ExtractError> {
        match read_bytes(&self.store, META_KEY)? {
            Some(bytes) => {
                let meta = decode_store_meta(&bytes)?;
                if meta.version != STORE_VERSION {
                    return Err(ExtractError::CacheStore(format!(
                        "count store version mismatch (expected {}, found {})",
                        STORE_VERSION, meta.version
                    )));
                }
            }
            None => {
                let payload = encode_store_meta(&StoreMeta {
                    version: STORE_VERSION,
                });
                write_bytes(&self.store, META_KEY, &payload)?;
            }
        }
        Ok(())
    }

    fn read_table_index(&self, table: &str) -> Result<PersistedTableIndex, ExtractError> {
        match read_bytes(&self.store, &table_index_key(table))? {
            Some(bytes) => decode_table_index(&bytes),
            None => Ok(PersistedTableIndex::default()),
        }
    }

    /// Add `key` to the table index before the record itself is written.
    fn register_key(&self, table: &str, key: &[u8]) -> Result<(), ExtractError> {
        let _guard = self
            .index_lock
            .lock()
            .map_err(|_| ExtractError::CacheStore("table index lock poisoned".into()))?;
        let mut index = self.read_table_index(table)?;
        if index.keys.iter().any(|existing| existing == key) {
            return Ok(());
        }
        index.keys.push(key.to_vec());
        write_bytes(&self.store, &table_index_key(table), &encode_table_index(&index))
    }
}

impl CountStore for FileCountStore {
    fn load_counts(&self, query: &CountQuery) -> Result<Option<Vec<CountEntry>>, ExtractError> {
        match read_bytes(&self.store, &counts_key(query))? {
            Some(bytes) => decode_counts(&bytes, query),
            None => Ok(None),
        }
    }

    fn store_counts(&self, query: &CountQuery, entries: &[CountEntry]) -> Result<(), ExtractError> {
        let key = counts_key(query);
        self.register_key(&query.table, &key)?;
        let payload = encode_counts(&PersistedCounts {
            query: query.clone(),
            entries: entries.to_vec(),
        });
        write_bytes(&self.store, &key, &payload)
    }

    fn remove_counts(&self, query: &CountQuery) -> Result<(), ExtractError> {
        write_bytes(&self.store, &counts_key(query), &[RECORD_TOMBSTONE])
    }

    fn load_key_count(&self, table: &str, filter: &str) -> Result<Option<u64>, ExtractError> {
        match read_bytes(&self.store, &key_count_key(table, filter))? {
            Some(bytes) => decode_key_count(&bytes, table, filter),
            None => Ok(None),
        }
    }

    fn store_key_count(&self, table: &str, filter: &str, keys: u64) -> Result<(), ExtractError> {
        let key = key_count_key(table, filter);
        self.register_key(table, &key)?;
        let payload = encode_key_count(&PersistedKeyCount {
            table: table.to_string(),
            filter: filter.to_string(),
            keys,
        });
        write_bytes(&self.store, &key, &payload)
    }

    fn clear_table(&self, table: &str) -> Result<usize, ExtractError> {
        let _guard = self
            .index_lock
            .lock()
            .map_err(|_| ExtractError::CacheStore("table index lock poisoned".into()))?;
        let index = self.read_table_index(table)?;
        for key in &index.keys {
            write_bytes(&self.store, key, &[RECORD_TOMBSTONE])?;
        }
        write_bytes(&self.store, &table_index_key(table), &[RECORD_TOMBSTONE])?;
        Ok(index.keys.len())
    }
}

fn counts_key(query: &CountQuery) -> Vec<u8> {
    let mut key = Vec::with_capacity(COUNTS_PREFIX.len() + query.table.len() + query.filter.len() + 24);
    key.extend_from_slice(COUNTS_PREFIX);
    key.extend_from_slice(query.table.as_bytes());
    key.push(KEY_SEPARATOR);
    key.extend_from_slice(query.filter.as_bytes());
    key.push(KEY_SEPARATOR);
    key.extend_from_slice(optional_bound(query.limit).as_bytes());
    key.push(KEY_SEPARATOR);
    key.extend_from_slice(optional_bound(query.offset).as_bytes());
    key
}

fn key_count_key(table: &str, filter: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(KEY_COUNT_PREFIX.len() + table.len() + filter.len() + 1);
    key.extend_from_slice(KEY_COUNT_PREFIX);
    key.extend_from_slice(table.as_bytes());
    key.push(KEY_SEPARATOR);
    key.extend_from_slice(filter.as_bytes());
    key
}

fn table_index_key(table: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(TABLE_INDEX_PREFIX.len() + table.len());
    key.extend_from_slice(TABLE_INDEX_PREFIX);
    key.extend_from_slice(table.as_bytes());
    key
}

fn optional_bound(bound: Option<usize>) -> String {
    bound.map_or_else(|| "-".to_string(), |value| value.to_string())
}

fn encode_store_meta(meta: &StoreMeta) -> Vec<u8> {
    encode_bitcode_payload(&bitcode::encode(meta))
}

fn decode_store_meta(bytes: &[u8]) -> Result<StoreMeta, ExtractError> {
    let raw = decode_bitcode_payload(bytes)?;
    bitcode::decode(&raw).map_err(|err| {
        ExtractError::CacheCorruption(format!("failed to decode count store metadata: {err}"))
    })
}

fn encode_versioned(version: u8, payload: &[u8]) -> Vec<u8> {
    let payload = encode_bitcode_payload(payload);
    let mut buf = Vec::with_capacity(1 + payload.len());
    buf.push(version);
    buf.extend_from_slice(&payload);
    buf
}

/// Strip the version byte; `Ok(None)` for tombstones.
fn versioned_body<'a>(
    bytes: &'a [u8],
    version: u8,
    kind: &str,
) -> Result<Option<&'a [u8]>, ExtractError> {
    match bytes.first() {
        None => Err(ExtractError::CacheCorruption(format!("empty {kind} record"))),
        Some(&RECORD_TOMBSTONE) => Ok(None),
        Some(&found) if found != version => Err(ExtractError::CacheCorruption(format!(
            "{kind} record version mismatch (expected {version}, found {found})"
        ))),
        Some(_) => Ok(Some(&bytes[1..])),
    }
}

fn encode_counts(record: &PersistedCounts) -> Vec<u8> {
    encode_versioned(COUNTS_RECORD_VERSION, &bitcode::encode(record))
}

fn decode_counts(
    bytes: &[u8],
    query: &CountQuery,
) -> Result<Option<Vec<CountEntry>>, ExtractError> {
    let Some(body) = versioned_body(bytes, COUNTS_RECORD_VERSION, "counts")? else {
        return Ok(None);
    };
    let raw = decode_bitcode_payload(body)?;
    let record: PersistedCounts = bitcode::decode(&raw)
        .map_err(|err| ExtractError::CacheCorruption(format!("corrupt counts record: {err}")))?;
    if &record.query != query {
        return Err(ExtractError::CacheCorruption(format!(
            "counts record belongs to {:?}, not {:?}",
            record.query, query
        )));
    }
    if let Some(empty) = record.entries.iter().find(|entry| entry.rows == 0) {
        return Err(ExtractError::CacheCorruption(format!(
            "counts record lists key '{}' with zero rows",
            empty.key
        )));
    }
    Ok(Some(record.entries))
}

fn encode_key_count(record: &PersistedKeyCount) -> Vec<u8> {
    encode_versioned(KEY_COUNT_RECORD_VERSION, &bitcode::encode(record))
}

fn decode_key_count(bytes: &[u8], table: &str, filter: &str) -> Result<Option<u64>, ExtractError> {
    let Some(body) = versioned_body(bytes, KEY_COUNT_RECORD_VERSION, "key count")? else {
        return Ok(None);
    };
    let raw = decode_bitcode_payload(body)?;
    let record: PersistedKeyCount = bitcode::decode(&raw).map_err(|err| {
        ExtractError::CacheCorruption(format!("corrupt key count record: {err}"))
    })?;
    if record.table != table || record.filter != filter {
        return Err(ExtractError::CacheCorruption(format!(
            "key count record belongs to table '{}' filter '{}'",
            record.table, record.filter
        )));
    }
    Ok(Some(record.keys))
}

fn encode_table_index(index: &PersistedTableIndex) -> Vec<u8> {
    encode_versioned(TABLE_INDEX_RECORD_VERSION, &bitcode::encode(index))
}

fn decode_table_index(bytes: &[u8]) -> Result<PersistedTableIndex, ExtractError> {
    let Some(body) = versioned_body(bytes, TABLE_INDEX_RECORD_VERSION, "table index")? else {
        return Ok(PersistedTableIndex::default());
    };
    let raw = decode_bitcode_payload(body)?;
    bitcode::decode(&raw)
        .map_err(|err| ExtractError::CacheCorruption(format!("corrupt table index record: {err}")))
}

fn encode_bitcode_payload(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + bytes.len());
    out.push(BITCODE_PREFIX);
    out.extend_from_slice(bytes);
    out
}

fn decode_bitcode_payload(bytes: &[u8]) -> Result<Vec<u8>, ExtractError> {
    if bytes.first().copied() != Some(BITCODE_PREFIX) {
        return Err(ExtractError::CacheCorruption(
            "bitcode payload missing expected prefix".into(),
        ));
    }
    Ok(bytes[1..].to_vec())
}

fn read_bytes(store: &DataStore, key: &[u8]) -> Result<Option<Vec<u8>>, ExtractError> {
    store
        .read(key)
        .map_err(map_store_err)?
        .map(|entry| Ok(entry.as_ref().to_vec()))
        .transpose()
}

fn write_bytes(store: &DataStore, key: &[u8], payload: &[u8]) -> Result<(), ExtractError> {
    store.write(key, payload).map_err(map_store_err)?;
    Ok(())
}

fn coerce_store_path(path: PathBuf) -> PathBuf {
    if path.is_dir() {
        return path.join(DEFAULT_STORE_FILENAME);
    }
    path
}

fn ensure_parent_dir(path: &Path) -> Result<(), ExtractError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn map_store_err(err: io::Error) -> ExtractError {
    ExtractError::CacheStore(err.to_string())
}
