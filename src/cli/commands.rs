//! Command implementations for the posts maintenance tool.

use crate::{
    config::PostsConfig,
    migrations::{self, Migrator, MIGRATIONS, SCHEMA_VERSION},
    posts::{ContentStore, GenesisState},
    storage::open_database,
    Result,
};
use std::path::Path;
use tracing::{info, warn};

/// Opens the store, failing if it still needs a migration.
fn open_store(config: &PostsConfig) -> Result<ContentStore> {
    ContentStore::open(&config.data_dir, &config.storage)
}

/// Execute status command
pub fn status(config: &PostsConfig) -> Result<()> {
    let db = open_database(&config.data_dir, &config.storage)?;
    let stored = migrations::stored_schema_version(&db)?;
    let current = migrations::current_version(&db)?;
    let pending = Migrator::new(&db).pending()?;

    info!(
        data_dir = %config.data_dir.display(),
        stored_version = ?stored,
        current_version = current,
        expected_version = SCHEMA_VERSION,
        pending_migrations = pending.len(),
        "Schema status"
    );

    if !pending.is_empty() {
        warn!("Store must be migrated before use, run `subspace-posts migrate`");
        return Ok(());
    }

    let store = ContentStore::from_handle(db)?;
    let params = store.params()?;
    info!(
        posts = store.all_posts()?.len(),
        attachments = store.all_attachments()?.len(),
        user_answers = store.all_user_answers()?.len(),
        active_polls = store.active_polls()?.len(),
        transfer_requests = store.all_transfer_requests()?.len(),
        max_text_length = params.max_text_length,
        "Store contents"
    );
    Ok(())
}

/// Execute migrate command
pub fn migrate(config: &PostsConfig, dry_run: bool) -> Result<()> {
    let db = open_database(&config.data_dir, &config.storage.for_bulk_load())?;
    let migrator = Migrator::new(&db).with_batch_size(config.migration_batch_size);
    let pending = migrator.pending()?;

    if pending.is_empty() {
        info!(version = migrations::current_version(&db)?, "✅ Store is up to date");
        return Ok(());
    }

    if dry_run {
        for step in MIGRATIONS.iter().filter(|m| pending.contains(&m.from)) {
            info!(
                from = step.from,
                to = step.from + 1,
                description = step.description,
                "Pending migration"
            );
        }
        return Ok(());
    }

    let report = migrator.run()?;
    info!(
        from = report.from_version,
        to = report.to_version,
        steps = report.steps.len(),
        "✅ Migrated store successfully"
    );
    Ok(())
}

/// Execute export-genesis command
pub fn export_genesis(config: &PostsConfig, file: &Path) -> Result<()> {
    let store = open_store(config)?;
    let state = store.export_genesis()?;
    state.save(file)?;

    info!(
        file = %file.display(),
        posts = state.posts.len(),
        attachments = state.attachments.len(),
        "✅ Exported genesis"
    );
    Ok(())
}

/// Execute import-genesis command
pub fn import_genesis(config: &PostsConfig, file: &Path) -> Result<()> {
    let state = GenesisState::load(file)?;
    let store = ContentStore::open(&config.data_dir, &config.storage.for_bulk_load())?;
    store.import_genesis(&state)?;

    info!(file = %file.display(), "✅ Imported genesis");
    Ok(())
}

/// Execute validate-genesis command
pub fn validate_genesis(file: &Path) -> Result<()> {
    let state = GenesisState::load(file)?;
    state.validate(&crate::posts::global_registry())?;

    info!(
        file = %file.display(),
        posts = state.posts.len(),
        attachments = state.attachments.len(),
        user_answers = state.user_answers.len(),
        "✅ Genesis is valid"
    );
    Ok(())
}

/// Execute end-expired-polls command
pub fn end_expired_polls(config: &PostsConfig, block_time: u64) -> Result<()> {
    let store = open_store(config)?;
    let ended = store.end_expired_polls(block_time)?;

    for poll in &ended {
        info!(
            subspace_id = poll.subspace_id,
            post_id = poll.post_id,
            poll_id = poll.poll_id,
            end_date = poll.end_date,
            "Ended poll"
        );
    }
    info!(ended = ended.len(), block_time = block_time, "✅ Processed expired polls");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posts::{Address, Post, ReplySetting};
    use tempfile::TempDir;

    fn config(temp_dir: &TempDir) -> PostsConfig {
        PostsConfig {
            data_dir: temp_dir.path().join("data"),
            ..PostsConfig::default()
        }
    }

    #[test]
    fn test_export_then_import_into_new_store() {
        let source_dir = TempDir::new().unwrap();
        let target_dir = TempDir::new().unwrap();
        let source = config(&source_dir);
        let target = config(&target_dir);

        {
            let store = open_store(&source).unwrap();
            let author = Address::encode("cosmos", &[1; 20]).unwrap();
            let post = Post {
                subspace_id: 1,
                section_id: 0,
                id: 0,
                external_id: None,
                text: "Hello".to_string(),
                entities: None,
                tags: vec![],
                author: author.clone(),
                conversation_id: 0,
                referenced_posts: vec![],
                reply_settings: ReplySetting::Everyone,
                creation_date: 1_000,
                last_edited_date: None,
                owner: author,
            };
            store.create_post(post, vec![]).unwrap();
        }

        let file = source_dir.path().join("genesis.json");
        export_genesis(&source, &file).unwrap();
        validate_genesis(&file).unwrap();
        import_genesis(&target, &file).unwrap();

        let store = open_store(&target).unwrap();
        assert!(store.has_post(1, 1).unwrap());
        assert_eq!(store.get_next_post_id(1).unwrap(), Some(2));

        // A second import into a populated store is refused.
        drop(store);
        assert!(import_genesis(&target, &file).is_err());
    }

    #[test]
    fn test_migrate_fresh_store_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(&temp_dir);
        migrate(&config, true).unwrap();
        migrate(&config, false).unwrap();
        status(&config).unwrap();
    }
}
