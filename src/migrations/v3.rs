//! Version 2 to 3: posts gain an explicit owner.
//!
//! Every post still stored in the version 2 shape is rewritten with
//! `owner = author`. Posts already in the current shape are rewritten
//! unchanged, which makes the step safe to resume.

use super::MigrationContext;
use crate::error::{PostsError, Result};
use crate::posts::keys;
use crate::posts::post::{Entities, Post, PostReference};
use crate::posts::types::{Address, ReplySetting};
use crate::storage::{decode, encode, CF_POSTS};
use serde::{Deserialize, Serialize};
use tracing::info;

/// A post as stored by schema version 2.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyPost {
    pub subspace_id: u64,
    pub section_id: u32,
    pub id: u64,
    pub external_id: Option<String>,
    pub text: String,
    pub entities: Option<Entities>,
    pub tags: Vec<String>,
    pub author: Address,
    pub conversation_id: u64,
    pub referenced_posts: Vec<PostReference>,
    pub reply_settings: ReplySetting,
    pub creation_date: u64,
    pub last_edited_date: Option<u64>,
}

impl From<LegacyPost> for Post {
    fn from(legacy: LegacyPost) -> Self {
        Post {
            subspace_id: legacy.subspace_id,
            section_id: legacy.section_id,
            id: legacy.id,
            external_id: legacy.external_id,
            text: legacy.text,
            entities: legacy.entities,
            tags: legacy.tags,
            owner: legacy.author.clone(),
            author: legacy.author,
            conversation_id: legacy.conversation_id,
            referenced_posts: legacy.referenced_posts,
            reply_settings: legacy.reply_settings,
            creation_date: legacy.creation_date,
            last_edited_date: legacy.last_edited_date,
        }
    }
}

/// Decodes a stored post of either shape into the current one.
///
/// The codec rejects trailing bytes, so a record decodes as exactly one of
/// the two shapes.
pub fn upgrade_post(bytes: &[u8]) -> Result<(Post, bool)> {
    if let Ok(post) = decode::<Post>(bytes) {
        return Ok((post, false));
    }
    let legacy = decode::<LegacyPost>(bytes)?;
    Ok((legacy.into(), true))
}

pub fn migrate(context: &MigrationContext<'_>) -> Result<usize> {
    let mut backfilled = 0usize;

    let rewritten = context.rewrite_prefix(CF_POSTS, &[keys::POST_PREFIX], |key, value| {
        let (post, upgraded) = upgrade_post(value).map_err(|e| {
            PostsError::migration(2, format!("undecodable post at key {:02x?}: {}", key, e))
        })?;
        if upgraded {
            backfilled += 1;
        }
        encode(&post)
    })?;

    info!(
        posts = rewritten,
        backfilled = backfilled,
        "backfilled post owners"
    );
    Ok(rewritten)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legacy() -> LegacyPost {
        LegacyPost {
            subspace_id: 1,
            section_id: 0,
            id: 7,
            external_id: Some("ext".to_string()),
            text: "Legacy".to_string(),
            entities: None,
            tags: vec!["old".to_string()],
            author: Address::new("cosmos1author"),
            conversation_id: 0,
            referenced_posts: vec![],
            reply_settings: ReplySetting::Everyone,
            creation_date: 1_000,
            last_edited_date: None,
        }
    }

    #[test]
    fn test_legacy_post_gets_owner() {
        let bytes = encode(&legacy()).unwrap();
        let (post, upgraded) = upgrade_post(&bytes).unwrap();
        assert!(upgraded);
        assert_eq!(post.owner, post.author);
        assert_eq!(post.tags, vec!["old".to_string()]);
        assert_eq!(post.external_id.as_deref(), Some("ext"));
    }

    #[test]
    fn test_current_post_is_untouched() {
        let mut post: Post = legacy().into();
        post.owner = Address::new("cosmos1owner");
        let bytes = encode(&post).unwrap();

        let (decoded, upgraded) = upgrade_post(&bytes).unwrap();
        assert!(!upgraded);
        assert_eq!(decoded, post);
        assert_eq!(encode(&decoded).unwrap(), bytes);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(upgrade_post(&[1, 2, 3]).is_err());
    }
}
