//! Storage utilities and abstractions.
//!
//! This module provides the storage infrastructure shared by the posts store
//! and the migration pipeline.
//!
//! ## Modules
//!
//! - `rocksdb`: tuning, database handle, iteration and staged write sets
//!
//! ## Column Families
//!
//! - `posts`: the module key space (see [`crate::posts::keys`])
//! - `params`: the legacy parameter store, read by the first migration step
//! - `meta`: the schema version

pub mod rocksdb;

pub use rocksdb::{
    composite_key, decode, encode, prefix_upper_bound, successor_key, RocksDbConfig,
    RocksDbHandle, WriteSet,
};

use crate::error::Result;
use std::path::Path;
use tracing::info;

/// Column family holding the module key space.
pub const CF_POSTS: &str = "posts";
/// Column family holding the legacy parameter store.
pub const CF_PARAMS: &str = "params";
/// Column family holding store metadata.
pub const CF_META: &str = "meta";

/// Every column family of the posts database.
pub const COLUMN_FAMILIES: &[&str] = &[CF_POSTS, CF_PARAMS, CF_META];

/// Database subdirectory inside the data directory.
pub const DB_DIR: &str = "posts_db";

/// Opens the posts database under `data_dir`.
pub fn open_database(data_dir: impl AsRef<Path>, config: &RocksDbConfig) -> Result<RocksDbHandle> {
    std::fs::create_dir_all(data_dir.as_ref())?;
    let db_path = data_dir.as_ref().join(DB_DIR);
    let db = RocksDbHandle::open(&db_path, config, COLUMN_FAMILIES)?;
    info!("Opened posts RocksDB at {:?}", db_path);
    Ok(db)
}
