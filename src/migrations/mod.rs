//! Schema versioning and in-place store migrations.
//!
//! The applied schema version is stored explicitly in the `meta` column
//! family. [`Migrator`] runs the registered steps in version order, one
//! version at a time, and advances the stored version only after a step has
//! fully succeeded. Steps always overwrite whole records, so re-running a
//! step on a partially migrated store is safe.
//!
//! ## Versions
//!
//! - 1: parameters live in the legacy `params` column family
//! - 2: parameters live in the module key space
//! - 3: posts carry an explicit owner
//! - 4: posts are indexed by section

pub mod v2;
pub mod v3;
pub mod v4;

use crate::error::{PostsError, Result};
use crate::storage::{successor_key, RocksDbHandle, WriteSet, CF_META, CF_PARAMS, CF_POSTS};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Schema version written by this build.
pub const SCHEMA_VERSION: u32 = 4;

/// Version assumed for populated stores that predate version tracking.
pub const BASELINE_VERSION: u32 = 1;

/// Key of the schema version inside the `meta` column family.
pub const SCHEMA_VERSION_KEY: &[u8] = b"schema_version";

/// Default number of records rewritten per batch.
pub const DEFAULT_BATCH_SIZE: usize = 512;

/// Reads the stored schema version.
pub fn stored_schema_version(db: &RocksDbHandle) -> Result<Option<u32>> {
    match db.get_raw(CF_META, SCHEMA_VERSION_KEY)? {
        Some(bytes) => {
            let raw: [u8; 4] = bytes.as_slice().try_into().map_err(|_| {
                PostsError::storage(format!("corrupted schema version: {:02x?}", bytes))
            })?;
            Ok(Some(u32::from_be_bytes(raw)))
        }
        None => Ok(None),
    }
}

fn write_schema_version(db: &RocksDbHandle, version: u32) -> Result<()> {
    db.put_raw(CF_META, SCHEMA_VERSION_KEY, &version.to_be_bytes())
}

/// Returns true if the store holds no module data at all.
pub fn is_fresh(db: &RocksDbHandle) -> Result<bool> {
    Ok(db.is_empty(CF_POSTS)? && db.is_empty(CF_PARAMS)?)
}

/// Returns the version the store is currently at.
///
/// Populated stores without a stored version are at [`BASELINE_VERSION`].
/// Fresh stores are considered up to date.
pub fn current_version(db: &RocksDbHandle) -> Result<u32> {
    match stored_schema_version(db)? {
        Some(version) => Ok(version),
        None if is_fresh(db)? => Ok(SCHEMA_VERSION),
        None => Ok(BASELINE_VERSION),
    }
}

/// Checks that the store can be used by this build.
///
/// Fresh stores are stamped with [`SCHEMA_VERSION`]. Any other store must
/// already be at that version.
pub fn ensure_current_schema(db: &RocksDbHandle) -> Result<u32> {
    let stored = stored_schema_version(db)?;
    match stored {
        Some(SCHEMA_VERSION) => Ok(SCHEMA_VERSION),
        None if is_fresh(db)? => {
            write_schema_version(db, SCHEMA_VERSION)?;
            info!(version = SCHEMA_VERSION, "stamped fresh store with schema version");
            Ok(SCHEMA_VERSION)
        }
        found => {
            warn!(
                found = ?found,
                expected = SCHEMA_VERSION,
                "store schema does not match, run the migrations first"
            );
            Err(PostsError::SchemaMismatch {
                found,
                expected: SCHEMA_VERSION,
            })
        }
    }
}

// =============================================================================
// Steps
// =============================================================================

/// Rewrites the store from version `from` to `from + 1`.
pub type MigrationFn = fn(&MigrationContext<'_>) -> Result<usize>;

/// A single registered migration step.
#[derive(Clone, Copy)]
pub struct Migration {
    pub from: u32,
    pub description: &'static str,
    pub run: MigrationFn,
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("from", &self.from)
            .field("description", &self.description)
            .finish()
    }
}

/// Every migration step, in version order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        from: 1,
        description: "move params into the module key space",
        run: v2::migrate,
    },
    Migration {
        from: 2,
        description: "backfill post owners from authors",
        run: v3::migrate,
    },
    Migration {
        from: 3,
        description: "index posts by section",
        run: v4::migrate,
    },
];

/// What a step gets to work with.
pub struct MigrationContext<'a> {
    pub db: &'a RocksDbHandle,
    pub batch_size: usize,
}

impl MigrationContext<'_> {
    /// Rewrites every record under `prefix` in key order, `batch_size` records at a time.
    ///
    /// `rewrite` returns the new value of a record. Returns the number of
    /// rewritten records.
    pub fn rewrite_prefix<F>(
        &self,
        cf_name: &'static str,
        prefix: &[u8],
        mut rewrite: F,
    ) -> Result<usize>
    where
        F: FnMut(&[u8], &[u8]) -> Result<Vec<u8>>,
    {
        self.process_prefix(cf_name, prefix, |key, value, ws| {
            ws.put_raw(cf_name, key.to_vec(), rewrite(key, value)?);
            Ok(())
        })
    }

    /// Visits every record under `prefix` in key order, `batch_size` records at a time.
    ///
    /// `stage` may stage any write for a record. Each chunk is committed as
    /// one batch and the cursor only moves forward, so an interrupted run can
    /// simply be restarted. Returns the number of visited records.
    pub fn process_prefix<F>(
        &self,
        cf_name: &'static str,
        prefix: &[u8],
        mut stage: F,
    ) -> Result<usize>
    where
        F: FnMut(&[u8], &[u8], &mut WriteSet) -> Result<()>,
    {
        let batch_size = self.batch_size.max(1);
        let mut cursor = prefix.to_vec();
        let mut total = 0;

        loop {
            let mut chunk: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(batch_size);
            self.db.seek_iterate(cf_name, &cursor, prefix, |key, value| {
                chunk.push((key.to_vec(), value.to_vec()));
                chunk.len() < batch_size
            })?;

            let last_key = match chunk.last() {
                Some((key, _)) => key.clone(),
                None => break,
            };

            let mut ws = WriteSet::new();
            for (key, value) in &chunk {
                stage(key, value, &mut ws)?;
            }
            self.db.commit(ws)?;

            total += chunk.len();
            debug!(cf = cf_name, processed = total, "migration chunk committed");

            if chunk.len() < batch_size {
                break;
            }
            cursor = successor_key(&last_key);
        }

        Ok(total)
    }
}

// =============================================================================
// Runner
// =============================================================================

/// Outcome of a migration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub from_version: u32,
    pub to_version: u32,
    /// (source version, rewritten records) for every applied step.
    pub steps: Vec<(u32, usize)>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Brings a store up to [`SCHEMA_VERSION`].
///
/// Must run in a maintenance window, with no store open on the same database.
pub struct Migrator<'a> {
    db: &'a RocksDbHandle,
    batch_size: usize,
    migrations: &'a [Migration],
}

impl<'a> Migrator<'a> {
    pub fn new(db: &'a RocksDbHandle) -> Self {
        Self {
            db,
            batch_size: DEFAULT_BATCH_SIZE,
            migrations: MIGRATIONS,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Uses a custom list of steps.
    pub fn with_migrations(mut self, migrations: &'a [Migration]) -> Self {
        self.migrations = migrations;
        self
    }

    /// Source versions of the steps still to run.
    pub fn pending(&self) -> Result<Vec<u32>> {
        let current = current_version(self.db)?;
        Ok((current..SCHEMA_VERSION).collect())
    }

    /// Runs every pending step in order, stopping at the first failure.
    pub fn run(&self) -> Result<MigrationReport> {
        let from_version = current_version(self.db)?;
        if from_version > SCHEMA_VERSION {
            return Err(PostsError::SchemaMismatch {
                found: Some(from_version),
                expected: SCHEMA_VERSION,
            });
        }

        let context = MigrationContext {
            db: self.db,
            batch_size: self.batch_size,
        };

        let mut version = from_version;
        let mut steps = Vec::new();
        while version < SCHEMA_VERSION {
            let step = self
                .migrations
                .iter()
                .find(|m| m.from == version)
                .ok_or_else(|| {
                    PostsError::migration(version, "no migration registered for this version")
                })?;

            info!(
                from = version,
                to = version + 1,
                description = step.description,
                "running migration"
            );
            let start = Instant::now();
            let rewritten = (step.run)(&context).map_err(|e| match e {
                PostsError::MigrationFailure { .. } => e,
                other => PostsError::migration(version, other),
            })?;

            write_schema_version(self.db, version + 1)?;
            info!(
                from = version,
                to = version + 1,
                rewritten = rewritten,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "migration complete"
            );

            steps.push((version, rewritten));
            version += 1;
        }

        if stored_schema_version(self.db)?.is_none() {
            write_schema_version(self.db, SCHEMA_VERSION)?;
        }

        Ok(MigrationReport {
            from_version,
            to_version: version,
            steps,
        })
    }
}
