//! RocksDB wrapper for the explorer index
//!
//! This module provides a RocksDB wrapper with:
//! - One column family per logical relation
//! - Bloom filters for fast point lookups
//! - LZ4 compression
//! - A shared block cache across column families
//! - Write-ahead logging with fsync for durability
//! - Atomic batch writes

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    Direction, IteratorMode, MultiThreaded, Options, ReadOptions, SliceTransform, WriteBatch,
    WriteOptions,
};
use tracing::{debug, error, info};

use crate::error::{Error, Result};

/// Column family holding element rows, partitioned by kind tag
pub const CF_ELEMENTS: &str = "elements";
/// Column family mirroring unspent S/F elements by owning address
pub const CF_UNSPENT: &str = "unspent";
/// Column family holding confirmed transactions by ID
pub const CF_TRANSACTIONS: &str = "transactions";
/// Column family mapping addresses to the transactions touching them
pub const CF_ADDR_TXNS: &str = "addr_txns";
/// Column family holding per-block aggregated statistics
pub const CF_CHAIN_STATS: &str = "chain_stats";
/// Column family holding singletons (the tip marker)
pub const CF_META: &str = "meta";

/// All column family names
pub const COLUMN_FAMILIES: &[&str] = &[
    CF_ELEMENTS,
    CF_UNSPENT,
    CF_TRANSACTIONS,
    CF_ADDR_TXNS,
    CF_CHAIN_STATS,
    CF_META,
];

/// Length of a hex-encoded address, the shared prefix of the keys in the
/// address-partitioned column families.
const ADDRESS_PREFIX_LEN: usize = 64;

/// RocksDB database wrapper
pub struct Database {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    path: PathBuf,
    /// Block cache shared across column families. Held so it outlives the
    /// column family options that reference it.
    _cache: Cache,
    /// Write options with fsync enabled
    write_options: WriteOptions,
}

impl Database {
    /// Open or create the database at `path`.
    ///
    /// # Errors
    /// Returns error if:
    /// - Directory cannot be created
    /// - Database cannot be opened
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening RocksDB at: {}", path.display());

        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| {
                Error::Storage(format!("failed to create database directory: {}", e))
            })?;
        }

        // 128MB block cache shared across all column families
        let cache = Cache::new_lru_cache(128 * 1024 * 1024);

        let cf_descriptors = Self::column_family_descriptors(&cache);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.increase_parallelism(num_cpus::get() as i32);
        db_opts.set_max_background_jobs(num_cpus::get().min(4) as i32);
        db_opts.set_atomic_flush(true);
        db_opts.set_max_open_files(1000);
        db_opts.set_bytes_per_sync(1024 * 1024);

        let db =
            DBWithThreadMode::<MultiThreaded>::open_cf_descriptors(&db_opts, path, cf_descriptors)
                .map_err(|e| {
                    error!("Failed to open RocksDB: {}", e);
                    Error::Storage(format!("failed to open database: {}", e))
                })?;

        info!(
            "RocksDB opened with {} column families",
            COLUMN_FAMILIES.len()
        );

        // fsync on every committed batch; the WAL stays enabled
        let mut write_options = WriteOptions::default();
        write_options.set_sync(true);
        write_options.disable_wal(false);

        Ok(Self {
            db: Arc::new(db),
            path: path.to_path_buf(),
            _cache: cache,
            write_options,
        })
    }

    /// Column family descriptors with the shared cache, bloom filters and
    /// LZ4 compression; the address-partitioned families get a fixed-length
    /// prefix extractor for per-address scans.
    fn column_family_descriptors(cache: &Cache) -> Vec<ColumnFamilyDescriptor> {
        let mut descriptors = Vec::new();

        for cf_name in COLUMN_FAMILIES {
            let mut cf_opts = Options::default();

            let mut block_opts = BlockBasedOptions::default();
            block_opts.set_block_cache(cache);
            block_opts.set_bloom_filter(10.0, false);
            block_opts.set_block_size(16 * 1024);
            block_opts.set_cache_index_and_filter_blocks(true);
            block_opts.set_pin_l0_filter_and_index_blocks_in_cache(true);
            cf_opts.set_block_based_table_factory(&block_opts);

            cf_opts.set_compression_type(DBCompressionType::Lz4);
            cf_opts.set_level_compaction_dynamic_level_bytes(true);
            cf_opts.set_compaction_style(rocksdb::DBCompactionStyle::Level);
            cf_opts.set_write_buffer_size(64 * 1024 * 1024);

            if *cf_name == CF_UNSPENT || *cf_name == CF_ADDR_TXNS {
                // keys lead with the hex address; prefix bloom speeds up
                // per-address range scans
                cf_opts.set_prefix_extractor(SliceTransform::create_fixed_prefix(
                    ADDRESS_PREFIX_LEN,
                ));
                cf_opts.set_memtable_prefix_bloom_ratio(0.1);
            }

            descriptors.push(ColumnFamilyDescriptor::new(*cf_name, cf_opts));
        }

        descriptors
    }

    /// Get a column family handle
    ///
    /// # Panics
    /// Panics if the column family doesn't exist (cannot happen for the
    /// families this module creates)
    fn cf_handle(&self, name: &str) -> Arc<rocksdb::BoundColumnFamily<'_>> {
        self.db
            .cf_handle(name)
            .unwrap_or_else(|| panic!("column family '{}' not found", name))
    }

    /// Get a value from the specified column family
    ///
    /// # Returns
    /// - `Ok(Some(value))` if the key exists
    /// - `Ok(None)` if the key doesn't exist
    /// - `Err` on I/O error
    pub fn get(&self, cf_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.cf_handle(cf_name);
        self.db.get_cf(&cf, key).map_err(|e| {
            error!("Failed to get key from {}: {}", cf_name, e);
            Self::map_rocksdb_error(e)
        })
    }

    /// Check if a key exists in the specified column family
    pub fn exists(&self, cf_name: &str, key: &[u8]) -> Result<bool> {
        let cf = self.cf_handle(cf_name);
        self.db
            .get_pinned_cf(&cf, key)
            .map(|opt| opt.is_some())
            .map_err(|e| {
                error!("Failed to check key existence in {}: {}", cf_name, e);
                Self::map_rocksdb_error(e)
            })
    }

    /// Add a put operation to a write batch
    pub fn batch_put(&self, batch: &mut WriteBatch, cf_name: &str, key: &[u8], value: &[u8]) {
        let cf = self.cf_handle(cf_name);
        batch.put_cf(&cf, key, value);
    }

    /// Add a delete operation to a write batch
    pub fn batch_delete(&self, batch: &mut WriteBatch, cf_name: &str, key: &[u8]) {
        let cf = self.cf_handle(cf_name);
        batch.delete_cf(&cf, key);
    }

    /// Write a batch atomically with fsync.
    ///
    /// Either every operation in the batch is visible afterwards, or none
    /// is — including across a crash.
    pub fn write_batch(&self, batch: WriteBatch) -> Result<()> {
        debug!("Writing batch with {} operations", batch.len());

        self.db.write_opt(batch, &self.write_options).map_err(|e| {
            error!("Failed to write batch: {}", e);
            Self::map_rocksdb_error(e)
        })?;

        debug!("Batch written");
        Ok(())
    }

    /// Collect all `(key, value)` pairs whose key starts with `prefix`, in
    /// ascending key order.
    pub fn scan_prefix(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let cf = self.cf_handle(cf_name);

        // total-order seek keeps the scan correct regardless of the
        // configured prefix extractor length
        let mut read_opts = ReadOptions::default();
        read_opts.set_total_order_seek(true);

        let iter = self.db.iterator_cf_opt(
            &cf,
            read_opts,
            IteratorMode::From(prefix, Direction::Forward),
        );

        let mut rows = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(|e| {
                error!("Iterator failed in {}: {}", cf_name, e);
                Self::map_rocksdb_error(e)
            })?;
            if !key.starts_with(prefix) {
                break;
            }
            rows.push((key.into_vec(), value.into_vec()));
        }
        Ok(rows)
    }

    /// Flush all memtables to disk. Useful before shutdown.
    pub fn flush(&self) -> Result<()> {
        debug!("Flushing all column families");

        for cf_name in COLUMN_FAMILIES {
            let cf = self.cf_handle(cf_name);
            self.db.flush_cf(&cf).map_err(|e| {
                error!("Failed to flush column family {}: {}", cf_name, e);
                Self::map_rocksdb_error(e)
            })?;
        }
        Ok(())
    }

    /// Filesystem path the database was opened at
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Map a RocksDB error into the crate error type
    fn map_rocksdb_error(e: rocksdb::Error) -> Error {
        Error::Storage(e.into_string())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .finish()
    }
}
