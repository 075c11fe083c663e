//! RocksDB access layer of the posts store.
//!
//! The store reads mostly by exact key (does this post, attachment or answer
//! exist) and walks fixed-width id prefixes in order (attachments of a post,
//! answers of a poll, posts of a section). Every column family therefore gets
//! a block based table with a bloom filter for the point lookups and a shared
//! LRU block cache for the scans.
//!
//! Values use a strict bincode codec. Multi-record changes are staged in a
//! [`WriteSet`] and land as one `WriteBatch`.

use crate::error::{PostsError, Result};
use bincode::Options;
use rocksdb::{
    BlockBasedOptions, BoundColumnFamily, Cache, ColumnFamilyDescriptor, DBWithThreadMode,
    MultiThreaded, WriteBatch,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace, warn};

// =============================================================================
// RocksDB Configuration
// =============================================================================

/// Tuning knobs of the posts database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDbConfig {
    pub max_open_files: i32,
    pub keep_log_file_num: usize,
    /// Maximum WAL size in bytes.
    pub max_wal_size: u64,
    /// Memtable size in bytes, per column family.
    pub write_buffer_size: usize,
    pub max_write_buffer_number: i32,
    /// LRU block cache shared by every column family, in bytes.
    pub block_cache_size: usize,
    /// Bloom filter density. Zero disables the filter.
    pub bloom_filter_bits_per_key: u32,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            max_open_files: 128,
            keep_log_file_num: 2,
            max_wal_size: 32 * 1024 * 1024,      // 32MB
            write_buffer_size: 16 * 1024 * 1024, // 16MB
            max_write_buffer_number: 2,
            block_cache_size: 64 * 1024 * 1024, // 64MB
            bloom_filter_bits_per_key: 10,
        }
    }
}

impl RocksDbConfig {
    /// Derives the profile used by migrations and genesis imports.
    ///
    /// These rewrite whole prefixes in large batches and hardly read, so
    /// memtables grow and the cache shrinks. File and filter settings are kept.
    pub fn for_bulk_load(&self) -> Self {
        Self {
            max_wal_size: self.max_wal_size.max(256 * 1024 * 1024), // 256MB
            write_buffer_size: self.write_buffer_size.max(128 * 1024 * 1024), // 128MB
            max_write_buffer_number: self.max_write_buffer_number.max(4),
            block_cache_size: self.block_cache_size.min(8 * 1024 * 1024), // 8MB
            ..self.clone()
        }
    }

    /// Database wide options.
    pub fn build_options(&self) -> rocksdb::Options {
        let mut opts = rocksdb::Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_max_open_files(self.max_open_files);
        opts.set_keep_log_file_num(self.keep_log_file_num);
        opts.set_max_total_wal_size(self.max_wal_size);
        opts.increase_parallelism(num_cpus::get() as i32);
        opts
    }

    /// Options of one column family, reading through `cache`.
    pub fn build_cf_options(&self, cache: &Cache) -> rocksdb::Options {
        let mut block_opts = BlockBasedOptions::default();
        block_opts.set_block_cache(cache);
        block_opts.set_cache_index_and_filter_blocks(true);
        if self.bloom_filter_bits_per_key > 0 {
            block_opts.set_bloom_filter(self.bloom_filter_bits_per_key as f64, false);
        }

        let mut opts = rocksdb::Options::default();
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(self.write_buffer_size);
        opts.set_max_write_buffer_number(self.max_write_buffer_number);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }
}

// =============================================================================
// Value Encoding
// =============================================================================

/// Fixed-width little-endian bincode that rejects trailing bytes.
///
/// Rejecting trailing bytes matters for schema evolution: a record written
/// with an older struct shape never decodes as the newer one, and vice versa.
fn codec() -> impl Options {
    bincode::DefaultOptions::new().with_fixint_encoding()
}

/// Encodes a value into its persisted byte form.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    codec()
        .serialize(value)
        .map_err(|e| PostsError::serialization(format!("Failed to serialize: {}", e)))
}

/// Decodes a value from its persisted byte form.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    codec()
        .deserialize(bytes)
        .map_err(|e| PostsError::serialization(format!("Failed to deserialize: {}", e)))
}

// =============================================================================
// Key Generation Utilities
// =============================================================================

/// Concatenates a prefix and fixed-width key parts into a single key.
///
/// Parts are appended without separators; variable-length parts must only
/// ever appear last so that prefix iteration stays unambiguous.
pub fn composite_key(prefix: &[u8], parts: &[&[u8]]) -> Vec<u8> {
    let len = prefix.len() + parts.iter().map(|p| p.len()).sum::<usize>();
    let mut key = Vec::with_capacity(len);
    key.extend_from_slice(prefix);
    for part in parts {
        key.extend_from_slice(part);
    }
    key
}

/// Returns the smallest key greater than every key starting with `prefix`.
///
/// Returns `None` when no such key exists (empty or all-`0xff` prefix).
pub fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut upper = prefix.to_vec();
    while let Some(last) = upper.pop() {
        if last < u8::MAX {
            upper.push(last + 1);
            return Some(upper);
        }
    }
    None
}

/// Returns the smallest key strictly greater than `key`.
///
/// Used to resume a forward cursor right after the last visited key.
pub fn successor_key(key: &[u8]) -> Vec<u8> {
    let mut next = Vec::with_capacity(key.len() + 1);
    next.extend_from_slice(key);
    next.push(0);
    next
}

// =============================================================================
// Write Sets
// =============================================================================

/// A set of pending writes committed atomically with [`RocksDbHandle::commit`].
///
/// Writes are keyed by column family and key, so later writes to the same key
/// replace earlier ones. Pending values can be read back before commit, which
/// lets a multi-step operation observe its own staged state.
#[derive(Debug, Default)]
pub struct WriteSet {
    ops: BTreeMap<(&'static str, Vec<u8>), Option<Vec<u8>>>,
}

impl WriteSet {
    /// Creates an empty write set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages a serializable value at the given key.
    pub fn put<T: Serialize>(
        &mut self,
        cf_name: &'static str,
        key: Vec<u8>,
        value: &T,
    ) -> Result<()> {
        let bytes = encode(value)?;
        self.ops.insert((cf_name, key), Some(bytes));
        Ok(())
    }

    /// Stages raw bytes at the given key.
    pub fn put_raw(&mut self, cf_name: &'static str, key: Vec<u8>, value: Vec<u8>) {
        self.ops.insert((cf_name, key), Some(value));
    }

    /// Stages the deletion of the given key.
    pub fn delete(&mut self, cf_name: &'static str, key: Vec<u8>) {
        self.ops.insert((cf_name, key), None);
    }

    /// Returns the staged state of a key.
    ///
    /// `None` means the key is untouched by this write set, `Some(None)` means
    /// it is staged for deletion.
    pub fn pending(&self, cf_name: &'static str, key: &[u8]) -> Option<Option<&[u8]>> {
        self.ops
            .get(&(cf_name, key.to_vec()))
            .map(|value| value.as_deref())
    }

    /// Staged operations on keys starting with `prefix`, in key order.
    pub fn pending_with_prefix<'a>(
        &'a self,
        cf_name: &'static str,
        prefix: &'a [u8],
    ) -> impl Iterator<Item = (&'a [u8], Option<&'a [u8]>)> + 'a {
        self.ops
            .range((cf_name, prefix.to_vec())..)
            .take_while(move |((cf, key), _)| *cf == cf_name && key.starts_with(prefix))
            .map(|((_, key), value)| (key.as_slice(), value.as_deref()))
    }

    /// Number of staged operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

// =============================================================================
// Database Handle Wrapper
// =============================================================================

/// Open posts database.
pub struct RocksDbHandle {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
}

impl RocksDbHandle {
    /// Opens the database with the given column families, creating what is missing.
    pub fn open(
        db_path: impl AsRef<Path>,
        config: &RocksDbConfig,
        column_families: &[&str],
    ) -> Result<Self> {
        let opts = config.build_options();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        let cf_opts = config.build_cf_options(&cache);

        let cf_descriptors: Vec<_> = column_families
            .iter()
            .map(|cf| ColumnFamilyDescriptor::new(*cf, cf_opts.clone()))
            .collect();

        let db = DBWithThreadMode::<MultiThreaded>::open_cf_descriptors(
            &opts,
            db_path.as_ref(),
            cf_descriptors,
        )
        .map_err(|e| PostsError::storage(format!("Failed to open RocksDB: {}", e)))?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Gets a column family handle.
    pub fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| PostsError::storage(format!("Column family '{}' not found", name)))
    }

    /// Stores a serializable value at the given key.
    pub fn put<T: Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let bytes = encode(value)?;
        self.put_raw(cf_name, key, &bytes)
    }

    /// Stores raw bytes at the given key.
    pub fn put_raw(&self, cf_name: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let cf = self.cf(cf_name)?;

        trace!(
            cf = cf_name,
            key_len = key.len(),
            value_bytes = value.len(),
            "db_put_raw: storing raw bytes"
        );

        self.db
            .put_cf(&cf, key, value)
            .map_err(|e| PostsError::storage(format!("Failed to write: {}", e)))?;
        Ok(())
    }

    /// Loads and deserializes a value from the given key.
    pub fn get<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        match self.get_raw(cf_name, key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Loads raw bytes from the given key.
    pub fn get_raw(&self, cf_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.cf(cf_name)?;

        match self.db.get_cf(&cf, key) {
            Ok(Some(bytes)) => {
                trace!(
                    cf = cf_name,
                    key_len = key.len(),
                    value_bytes = bytes.len(),
                    "db_get_raw: found record"
                );
                Ok(Some(bytes))
            }
            Ok(None) => {
                trace!(
                    cf = cf_name,
                    key_len = key.len(),
                    "db_get_raw: key not found"
                );
                Ok(None)
            }
            Err(e) => Err(PostsError::storage(format!("Failed to read: {}", e))),
        }
    }

    /// Loads raw bytes, looking at the staged writes of `ws` first.
    pub fn get_raw_staged(
        &self,
        ws: &WriteSet,
        cf_name: &'static str,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        match ws.pending(cf_name, key) {
            Some(staged) => Ok(staged.map(|bytes| bytes.to_vec())),
            None => self.get_raw(cf_name, key),
        }
    }

    /// Checks if a key exists.
    pub fn exists(&self, cf_name: &str, key: &[u8]) -> Result<bool> {
        let cf = self.cf(cf_name)?;
        let exists = self
            .db
            .get_pinned_cf(&cf, key)
            .map(|v| v.is_some())
            .map_err(|e| PostsError::storage(format!("Failed to check key: {}", e)))?;

        trace!(
            cf = cf_name,
            key_len = key.len(),
            exists = exists,
            "db_exists: checked key existence"
        );

        Ok(exists)
    }

    /// Applies every staged write of `ws` as a single atomic batch.
    pub fn commit(&self, ws: WriteSet) -> Result<()> {
        if ws.is_empty() {
            return Ok(());
        }

        let mut batch = WriteBatch::default();
        let count = ws.len();
        for ((cf_name, key), value) in ws.ops {
            let cf = self.cf(cf_name)?;
            match value {
                Some(bytes) => batch.put_cf(&cf, key, bytes),
                None => batch.delete_cf(&cf, key),
            }
        }

        self.db
            .write(batch)
            .map_err(|e| PostsError::storage(format!("Failed to commit batch: {}", e)))?;

        debug!(operations = count, "db_commit: applied write set");
        Ok(())
    }

    /// Iterates over all entries with the given prefix, in key order.
    ///
    /// The callback receives (key, value) pairs and should return true to continue
    /// or false to stop iteration.
    pub fn prefix_iterate<F>(&self, cf_name: &str, prefix: &[u8], callback: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        self.seek_iterate(cf_name, prefix, prefix, callback)
    }

    /// Iterates over entries starting from a seek position, filtering by a prefix.
    ///
    /// - `seek_key`: The key to seek to (start iteration from this position)
    /// - `filter_prefix`: Only process keys that start with this prefix
    ///
    /// The callback receives (key, value) pairs and should return true to continue
    /// or false to stop iteration.
    pub fn seek_iterate<F>(
        &self,
        cf_name: &str,
        seek_key: &[u8],
        filter_prefix: &[u8],
        mut callback: F,
    ) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        let cf = self.cf(cf_name)?;
        let mut iter = self.db.raw_iterator_cf(&cf);
        iter.seek(seek_key);

        let mut count: usize = 0;
        while iter.valid() {
            if let (Some(key), Some(value)) = (iter.key(), iter.value()) {
                // Stop if we've moved past the filter prefix
                if !key.starts_with(filter_prefix) {
                    break;
                }
                count += 1;
                if !callback(key, value) {
                    break;
                }
                iter.next();
            } else {
                break;
            }
        }

        if let Err(e) = iter.status() {
            warn!("Iterator error: {}", e);
            return Err(PostsError::storage(format!("Iteration failed: {}", e)));
        }

        debug!(
            cf = cf_name,
            seek_key_len = seek_key.len(),
            filter_prefix_len = filter_prefix.len(),
            records_iterated = count,
            "db_seek_iterate: completed seek iteration"
        );

        Ok(())
    }

    /// Collects every (key, value) pair with the given prefix.
    pub fn prefix_entries(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut entries = Vec::new();
        self.prefix_iterate(cf_name, prefix, |key, value| {
            entries.push((key.to_vec(), value.to_vec()));
            true
        })?;
        Ok(entries)
    }

    /// Collects every (key, value) pair with the given prefix as it will look
    /// once `ws` is committed.
    pub fn prefix_entries_staged(
        &self,
        ws: &WriteSet,
        cf_name: &'static str,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.prefix_entries(cf_name, prefix)?.into_iter().collect();
        for (key, value) in ws.pending_with_prefix(cf_name, prefix) {
            match value {
                Some(bytes) => {
                    merged.insert(key.to_vec(), bytes.to_vec());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    /// Returns the greatest key starting with `prefix` once `ws` is committed.
    ///
    /// Committed keys that `ws` deletes are skipped.
    pub fn last_key_with_prefix_staged(
        &self,
        ws: &WriteSet,
        cf_name: &'static str,
        prefix: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        let cf = self.cf(cf_name)?;
        let mut iter = self.db.raw_iterator_cf(&cf);

        match prefix_upper_bound(prefix) {
            Some(upper) => {
                iter.seek_for_prev(&upper);
                if iter.valid() && iter.key() == Some(upper.as_slice()) {
                    iter.prev();
                }
            }
            None => iter.seek_to_last(),
        }

        let mut committed = None;
        let mut skipped: usize = 0;
        while let Some(key) = iter.key().filter(|key| key.starts_with(prefix)) {
            if matches!(ws.pending(cf_name, key), Some(None)) {
                skipped += 1;
                iter.prev();
                continue;
            }
            committed = Some(key.to_vec());
            break;
        }

        if let Err(e) = iter.status() {
            warn!("Iterator error: {}", e);
            return Err(PostsError::storage(format!("Iteration failed: {}", e)));
        }

        trace!(
            cf = cf_name,
            prefix_len = prefix.len(),
            deleted_skipped = skipped,
            "db_last_key: resolved last committed key"
        );

        let staged = ws
            .pending_with_prefix(cf_name, prefix)
            .filter(|(_, value)| value.is_some())
            .map(|(key, _)| key.to_vec())
            .last();
        Ok(committed.into_iter().chain(staged).max())
    }

    /// Collects every key with the given prefix.
    pub fn prefix_keys(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        let mut keys = Vec::new();
        self.prefix_iterate(cf_name, prefix, |key, _| {
            keys.push(key.to_vec());
            true
        })?;
        Ok(keys)
    }

    /// Returns true if the column family holds no keys at all.
    pub fn is_empty(&self, cf_name: &str) -> Result<bool> {
        let mut empty = true;
        self.prefix_iterate(cf_name, &[], |_, _| {
            empty = false;
            false
        })?;
        Ok(empty)
    }
}

impl std::fmt::Debug for RocksDbHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksDbHandle")
            .field("db", &"RocksDB")
            .finish()
    }
}
