//! Version 3 to 4: posts are indexed by section.
//!
//! Every stored post gets its `section | post` index entry. Entries carry no
//! value, so writing one twice is harmless and the step can be resumed.

use super::MigrationContext;
use crate::error::{PostsError, Result};
use crate::posts::keys;
use crate::posts::post::Post;
use crate::storage::{decode, CF_POSTS};
use tracing::info;

pub fn migrate(context: &MigrationContext<'_>) -> Result<usize> {
    let indexed = context.process_prefix(CF_POSTS, &[keys::POST_PREFIX], |key, value, ws| {
        let post: Post = decode(value).map_err(|e| {
            PostsError::migration(3, format!("undecodable post at key {:02x?}: {}", key, e))
        })?;
        ws.put_raw(
            CF_POSTS,
            keys::section_post_key(post.subspace_id, post.section_id, post.id),
            Vec::new(),
        );
        Ok(())
    })?;

    info!(posts = indexed, "indexed posts by section");
    Ok(indexed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posts::types::{Address, ReplySetting};
    use crate::storage::{encode, open_database, RocksDbConfig, RocksDbHandle};
    use tempfile::TempDir;

    fn post(subspace_id: u64, section_id: u32, id: u64) -> Post {
        Post {
            subspace_id,
            section_id,
            id,
            external_id: None,
            text: "Indexed".to_string(),
            entities: None,
            tags: vec![],
            author: Address::new("cosmos1author"),
            conversation_id: 0,
            referenced_posts: vec![],
            reply_settings: ReplySetting::Everyone,
            creation_date: 1_000,
            last_edited_date: None,
            owner: Address::new("cosmos1author"),
        }
    }

    fn store_posts(db: &RocksDbHandle, posts: &[Post]) {
        for post in posts {
            let bytes = encode(post).unwrap();
            db.put_raw(CF_POSTS, &keys::post_key(post.subspace_id, post.id), &bytes)
                .unwrap();
        }
    }

    #[test]
    fn test_every_post_is_indexed() {
        let temp_dir = TempDir::new().unwrap();
        let db = open_database(temp_dir.path(), &RocksDbConfig::default()).unwrap();
        store_posts(&db, &[post(1, 0, 1), post(1, 5, 2), post(1, 5, 3), post(2, 5, 1)]);

        let context = MigrationContext {
            db: &db,
            batch_size: 2,
        };
        assert_eq!(migrate(&context).unwrap(), 4);
        // Resuming is harmless
        assert_eq!(migrate(&context).unwrap(), 4);

        let section = db
            .prefix_keys(CF_POSTS, &keys::section_posts_prefix(1, 5))
            .unwrap();
        assert_eq!(
            section,
            vec![keys::section_post_key(1, 5, 2), keys::section_post_key(1, 5, 3)]
        );
        assert!(db.exists(CF_POSTS, &keys::section_post_key(1, 0, 1)).unwrap());
        assert!(db.exists(CF_POSTS, &keys::section_post_key(2, 5, 1)).unwrap());
    }

    #[test]
    fn test_undecodable_post_fails_the_step() {
        let temp_dir = TempDir::new().unwrap();
        let db = open_database(temp_dir.path(), &RocksDbConfig::default()).unwrap();
        db.put_raw(CF_POSTS, &keys::post_key(1, 1), &[1, 2, 3]).unwrap();

        let context = MigrationContext {
            db: &db,
            batch_size: 16,
        };
        assert!(matches!(
            migrate(&context),
            Err(PostsError::MigrationFailure { from: 3, .. })
        ));
    }
}
