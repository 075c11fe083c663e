//! Cross-entity invariant predicates.
//!
//! These checks are shared by the incremental write path of the store and by
//! genesis validation, so both enforce exactly the same rules.

use crate::error::{PostsError, Result};
use crate::posts::answer::UserAnswer;
use crate::posts::attachment::Poll;
use crate::posts::types::{EntityKey, EntityKind};
use std::collections::HashSet;
use std::hash::Hash;

/// Returns true if an id is covered by the watermark of its scope.
///
/// A watermark is the next id to hand out, so every existing id must be
/// strictly lower.
pub fn watermark_covers(watermark: u64, id: u64) -> bool {
    id < watermark
}

/// Fails unless `id` has already been handed out by the allocator.
pub fn ensure_id_below_watermark(
    entity: EntityKind,
    key: EntityKey,
    field: &'static str,
    id: u64,
    watermark: u64,
) -> Result<()> {
    if !watermark_covers(watermark, id) {
        return Err(PostsError::invalid(
            entity,
            key,
            field,
            format!("id {} has not been allocated yet (next id is {})", id, watermark),
        ));
    }
    Ok(())
}

/// Fails unless `watermark` is non-zero and above the highest existing id.
pub fn ensure_watermark_above(
    entity: EntityKind,
    key: EntityKey,
    field: &'static str,
    watermark: u64,
    max_id: Option<u64>,
) -> Result<()> {
    if watermark == 0 {
        return Err(PostsError::invalid(entity, key, field, "watermark cannot be zero"));
    }
    if let Some(max_id) = max_id {
        if !watermark_covers(watermark, max_id) {
            return Err(PostsError::invalid(
                entity,
                key,
                field,
                format!(
                    "watermark {} must be greater than the highest existing id {}",
                    watermark, max_id
                ),
            ));
        }
    }
    Ok(())
}

/// Records `id` as seen, failing if it was seen before.
pub fn ensure_unique<K: Eq + Hash>(
    seen: &mut HashSet<K>,
    id: K,
    entity: EntityKind,
    key: impl FnOnce() -> EntityKey,
) -> Result<()> {
    if !seen.insert(id) {
        return Err(PostsError::duplicate(entity, key()));
    }
    Ok(())
}

/// Checks that an answer fits the poll it is given to.
///
/// The poll must allow multiple answers for more than one index to be
/// selected, and every index must refer to a provided answer. This is the
/// single place where a poll definition and an answer are checked together.
pub fn check_user_answer_against_poll(poll: &Poll, answer: &UserAnswer) -> Result<()> {
    if answer.answers_indexes.len() > 1 && !poll.allows_multiple_answers {
        return Err(PostsError::invalid(
            EntityKind::UserAnswer,
            answer.key(),
            "answers_indexes",
            "only one answer is allowed on this poll",
        ));
    }

    let max_index = poll.max_answer_index();
    if let Some(index) = answer
        .answers_indexes
        .iter()
        .find(|index| max_index.map_or(true, |max| **index > max))
    {
        return Err(PostsError::invalid(
            EntityKind::UserAnswer,
            answer.key(),
            "answers_indexes",
            format!("invalid answer index: {}", index),
        ));
    }

    Ok(())
}
