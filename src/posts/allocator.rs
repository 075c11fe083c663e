//! Per-scope monotonic identifier allocation.
//!
//! Post ids are allocated per subspace and attachment ids per post. Each
//! scope keeps a persisted watermark holding the next id to hand out. An
//! allocation reads the watermark (1 when absent), stages `watermark + 1` in
//! the caller's write set and returns the old value, so the new watermark
//! commits atomically with the record that consumes the id.
//!
//! Callers must serialize allocations; the store does so with its writer lock.

use crate::error::{PostsError, Result};
use crate::posts::keys;
use crate::posts::types::{EntityKey, EntityKind};
use crate::storage::{RocksDbHandle, WriteSet, CF_POSTS};

/// Watermark of a scope that never allocated anything.
pub const INITIAL_ID: u64 = 1;

fn corrupted(entity: EntityKind, key: EntityKey) -> PostsError {
    PostsError::storage(format!("corrupted {} watermark ({})", entity, key))
}

/// Reads the next post id of a subspace, if one is stored.
pub fn stored_next_post_id(
    db: &RocksDbHandle,
    ws: &WriteSet,
    subspace_id: u64,
) -> Result<Option<u64>> {
    match db.get_raw_staged(ws, CF_POSTS, &keys::next_post_id_key(subspace_id))? {
        Some(bytes) => keys::decode_post_id(&bytes)
            .map(Some)
            .ok_or_else(|| corrupted(EntityKind::SubspaceData, EntityKey::subspace(subspace_id))),
        None => Ok(None),
    }
}

/// Reads the next attachment id of a post, if one is stored.
pub fn stored_next_attachment_id(
    db: &RocksDbHandle,
    ws: &WriteSet,
    subspace_id: u64,
    post_id: u64,
) -> Result<Option<u32>> {
    let key = keys::next_attachment_id_key(subspace_id, post_id);
    match db.get_raw_staged(ws, CF_POSTS, &key)? {
        Some(bytes) => keys::decode_attachment_id(&bytes).map(Some).ok_or_else(|| {
            corrupted(EntityKind::PostData, EntityKey::post(subspace_id, post_id))
        }),
        None => Ok(None),
    }
}

/// Stages the next post id of a subspace.
pub fn set_next_post_id(ws: &mut WriteSet, subspace_id: u64, next_id: u64) {
    ws.put_raw(
        CF_POSTS,
        keys::next_post_id_key(subspace_id),
        keys::encode_post_id(next_id),
    );
}

/// Stages the next attachment id of a post.
pub fn set_next_attachment_id(
    ws: &mut WriteSet,
    subspace_id: u64,
    post_id: u64,
    next_id: u32,
) {
    ws.put_raw(
        CF_POSTS,
        keys::next_attachment_id_key(subspace_id, post_id),
        keys::encode_attachment_id(next_id),
    );
}

/// Stages the removal of the post id watermark of a subspace.
pub fn delete_next_post_id(ws: &mut WriteSet, subspace_id: u64) {
    ws.delete(CF_POSTS, keys::next_post_id_key(subspace_id));
}

/// Stages the removal of the attachment watermark of a post.
pub fn delete_next_attachment_id(ws: &mut WriteSet, subspace_id: u64, post_id: u64) {
    ws.delete(CF_POSTS, keys::next_attachment_id_key(subspace_id, post_id));
}

/// Allocates a post id inside a subspace.
pub fn allocate_post_id(db: &RocksDbHandle, ws: &mut WriteSet, subspace_id: u64) -> Result<u64> {
    let id = stored_next_post_id(db, ws, subspace_id)?.unwrap_or(INITIAL_ID);
    let next = id.checked_add(1).ok_or_else(|| {
        PostsError::invalid(
            EntityKind::SubspaceData,
            EntityKey::subspace(subspace_id),
            "next_post_id",
            "post ids exhausted",
        )
    })?;
    set_next_post_id(ws, subspace_id, next);
    Ok(id)
}

/// Allocates an attachment id inside a post.
pub fn allocate_attachment_id(
    db: &RocksDbHandle,
    ws: &mut WriteSet,
    subspace_id: u64,
    post_id: u64,
) -> Result<u32> {
    let id = stored_next_attachment_id(db, ws, subspace_id, post_id)?.unwrap_or(INITIAL_ID as u32);
    let next = id.checked_add(1).ok_or_else(|| {
        PostsError::invalid(
            EntityKind::PostData,
            EntityKey::post(subspace_id, post_id),
            "next_attachment_id",
            "attachment ids exhausted",
        )
    })?;
    set_next_attachment_id(ws, subspace_id, post_id, next);
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{open_database, RocksDbConfig};
    use tempfile::TempDir;

    fn create_test_db() -> (RocksDbHandle, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db = open_database(temp_dir.path(), &RocksDbConfig::default()).unwrap();
        (db, temp_dir)
    }

    #[test]
    fn test_post_ids_start_at_one_and_increase() {
        let (db, _temp) = create_test_db();

        for expected in 1..=3 {
            let mut ws = WriteSet::new();
            assert_eq!(allocate_post_id(&db, &mut ws, 1).unwrap(), expected);
            db.commit(ws).unwrap();
        }

        // Other subspaces are independent
        let mut ws = WriteSet::new();
        assert_eq!(allocate_post_id(&db, &mut ws, 2).unwrap(), 1);
    }

    #[test]
    fn test_allocations_within_one_write_set_see_each_other() {
        let (db, _temp) = create_test_db();
        let mut ws = WriteSet::new();
        assert_eq!(allocate_attachment_id(&db, &mut ws, 1, 1).unwrap(), 1);
        assert_eq!(allocate_attachment_id(&db, &mut ws, 1, 1).unwrap(), 2);
        assert_eq!(allocate_attachment_id(&db, &mut ws, 1, 2).unwrap(), 1);

        // Nothing is persisted until commit
        assert_eq!(stored_next_attachment_id(&db, &WriteSet::new(), 1, 1).unwrap(), None);
        db.commit(ws).unwrap();
        assert_eq!(stored_next_attachment_id(&db, &WriteSet::new(), 1, 1).unwrap(), Some(3));
    }

    #[test]
    fn test_exhausted_ids() {
        let (db, _temp) = create_test_db();
        let mut ws = WriteSet::new();
        set_next_post_id(&mut ws, 1, u64::MAX);
        assert!(allocate_post_id(&db, &mut ws, 1).is_err());

        set_next_attachment_id(&mut ws, 1, 1, u32::MAX);
        assert!(allocate_attachment_id(&db, &mut ws, 1, 1).is_err());
    }
}
