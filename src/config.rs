//! Runtime configuration.
//!
//! Loaded from a TOML file; every field has a default so a partial (or
//! missing) file is fine.

use crate::error::{PostsError, Result};
use crate::migrations::DEFAULT_BATCH_SIZE;
use crate::storage::RocksDbConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default data directory, relative to the working directory.
pub const DEFAULT_DATA_DIR: &str = "posts_data";

/// Default tracing filter of the maintenance binary.
pub const DEFAULT_LOG_FILTER: &str = "subspace_posts=info";

/// Configuration of the posts store and its tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostsConfig {
    /// Directory holding the RocksDB database.
    pub data_dir: PathBuf,
    pub storage: RocksDbConfig,
    /// Records rewritten per batch by migrations.
    pub migration_batch_size: usize,
    /// Tracing filter used when `RUST_LOG` is not set.
    pub log_filter: String,
}

impl Default for PostsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            storage: RocksDbConfig::default(),
            migration_batch_size: DEFAULT_BATCH_SIZE,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl PostsConfig {
    /// Parses a configuration from TOML.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: PostsConfig =
            toml::from_str(contents).map_err(|e| PostsError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the configuration file at `path`, or the defaults if it does not exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => {
                let contents = std::fs::read_to_string(path)?;
                Self::from_toml(&contents)
            }
            Some(path) => Err(PostsError::config(format!(
                "config file {} not found",
                path.display()
            ))),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.migration_batch_size == 0 {
            return Err(PostsError::config("migration_batch_size must be greater than zero"));
        }
        if self.storage.max_open_files == 0 {
            return Err(PostsError::config("storage.max_open_files cannot be zero"));
        }
        if self.storage.bloom_filter_bits_per_key > 64 {
            return Err(PostsError::config(
                "storage.bloom_filter_bits_per_key cannot exceed 64",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config = PostsConfig::from_toml(
            r#"
            data_dir = "/var/lib/posts"

            [storage]
            max_open_files = 512
            bloom_filter_bits_per_key = 16
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/var/lib/posts"));
        assert_eq!(config.storage.max_open_files, 512);
        assert_eq!(config.storage.bloom_filter_bits_per_key, 16);
        assert_eq!(
            config.storage.write_buffer_size,
            RocksDbConfig::default().write_buffer_size
        );
        assert_eq!(config.migration_batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.log_filter, DEFAULT_LOG_FILTER);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        assert!(PostsConfig::from_toml("migration_batch_size = 0").is_err());
    }

    #[test]
    fn test_oversized_bloom_filter_rejected() {
        assert!(PostsConfig::from_toml("[storage]\nbloom_filter_bits_per_key = 100").is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        assert!(PostsConfig::load(Some(&temp_dir.path().join("nope.toml"))).is_err());
        assert_eq!(PostsConfig::load(None).unwrap(), PostsConfig::default());
    }
}
