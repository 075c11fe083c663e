//! Contracts of the services the posts module depends on.
//!
//! Authorization and user relationships live outside this crate. Callers
//! plug their implementations in through these traits.

use crate::posts::types::Address;
use std::collections::HashSet;
use std::sync::RwLock;

/// Actions a user may be allowed to perform inside a subspace section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// Create posts.
    Write,
    /// Reply to existing conversations.
    Comment,
    /// Edit or delete own content.
    EditOwnContent,
    /// Edit or delete anybody's content.
    ModerateContent,
    /// Answer polls and otherwise interact with content.
    InteractWithContent,
}

/// Subspace and authorization service.
pub trait SubspacesKeeper: Send + Sync {
    fn has_subspace(&self, subspace_id: u64) -> bool;

    fn has_section(&self, subspace_id: u64, section_id: u32) -> bool;

    fn has_permission(
        &self,
        subspace_id: u64,
        section_id: u32,
        user: &Address,
        permission: Permission,
    ) -> bool;
}

/// Relationship and blocking service.
pub trait RelationshipsKeeper: Send + Sync {
    /// Returns true if `blocker` has blocked `user` inside the subspace.
    fn has_user_blocked(&self, blocker: &Address, user: &Address, subspace_id: u64) -> bool;

    /// Returns true if `user` follows `counterparty` inside the subspace.
    fn has_relationship(&self, user: &Address, counterparty: &Address, subspace_id: u64) -> bool;
}

/// Relationships service with no relationships and no blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRelationships;

impl RelationshipsKeeper for NoRelationships {
    fn has_user_blocked(&self, _: &Address, _: &Address, _: u64) -> bool {
        false
    }

    fn has_relationship(&self, _: &Address, _: &Address, _: u64) -> bool {
        false
    }
}

/// In-memory subspaces service, mostly useful for tools and tests.
///
/// Every section of a known subspace exists. Permissions are granted per
/// (subspace, user, permission) regardless of the section.
#[derive(Debug, Default)]
pub struct InMemorySubspaces {
    subspaces: RwLock<HashSet<u64>>,
    grants: RwLock<HashSet<(u64, Address, Permission)>>,
}

impl InMemorySubspaces {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_subspace(&self, subspace_id: u64) {
        if let Ok(mut subspaces) = self.subspaces.write() {
            subspaces.insert(subspace_id);
        }
    }

    pub fn grant(&self, subspace_id: u64, user: &Address, permission: Permission) {
        if let Ok(mut grants) = self.grants.write() {
            grants.insert((subspace_id, user.clone(), permission));
        }
    }

    pub fn revoke(&self, subspace_id: u64, user: &Address, permission: Permission) {
        if let Ok(mut grants) = self.grants.write() {
            grants.remove(&(subspace_id, user.clone(), permission));
        }
    }
}

impl SubspacesKeeper for InMemorySubspaces {
    fn has_subspace(&self, subspace_id: u64) -> bool {
        self.subspaces
            .read()
            .map(|s| s.contains(&subspace_id))
            .unwrap_or(false)
    }

    fn has_section(&self, subspace_id: u64, _section_id: u32) -> bool {
        self.has_subspace(subspace_id)
    }

    fn has_permission(
        &self,
        subspace_id: u64,
        _section_id: u32,
        user: &Address,
        permission: Permission,
    ) -> bool {
        self.grants
            .read()
            .map(|g| g.contains(&(subspace_id, user.clone(), permission)))
            .unwrap_or(false)
    }
}

/// In-memory relationships service, mostly useful for tools and tests.
#[derive(Debug, Default)]
pub struct InMemoryRelationships {
    blocks: RwLock<HashSet<(Address, Address, u64)>>,
    relationships: RwLock<HashSet<(Address, Address, u64)>>,
}

impl InMemoryRelationships {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(&self, blocker: &Address, user: &Address, subspace_id: u64) {
        if let Ok(mut blocks) = self.blocks.write() {
            blocks.insert((blocker.clone(), user.clone(), subspace_id));
        }
    }

    pub fn follow(&self, user: &Address, counterparty: &Address, subspace_id: u64) {
        if let Ok(mut relationships) = self.relationships.write() {
            relationships.insert((user.clone(), counterparty.clone(), subspace_id));
        }
    }
}

impl RelationshipsKeeper for InMemoryRelationships {
    fn has_user_blocked(&self, blocker: &Address, user: &Address, subspace_id: u64) -> bool {
        self.blocks
            .read()
            .map(|b| b.contains(&(blocker.clone(), user.clone(), subspace_id)))
            .unwrap_or(false)
    }

    fn has_relationship(&self, user: &Address, counterparty: &Address, subspace_id: u64) -> bool {
        self.relationships
            .read()
            .map(|r| r.contains(&(user.clone(), counterparty.clone(), subspace_id)))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_subspaces() {
        let keeper = InMemorySubspaces::new();
        let user = Address::new("cosmos1user");
        assert!(!keeper.has_subspace(1));

        keeper.add_subspace(1);
        keeper.grant(1, &user, Permission::Write);
        assert!(keeper.has_section(1, 7));
        assert!(keeper.has_permission(1, 7, &user, Permission::Write));
        assert!(!keeper.has_permission(1, 7, &user, Permission::ModerateContent));

        keeper.revoke(1, &user, Permission::Write);
        assert!(!keeper.has_permission(1, 7, &user, Permission::Write));
    }

    #[test]
    fn test_in_memory_relationships() {
        let keeper = InMemoryRelationships::new();
        let a = Address::new("cosmos1a");
        let b = Address::new("cosmos1b");

        keeper.block(&a, &b, 1);
        assert!(keeper.has_user_blocked(&a, &b, 1));
        assert!(!keeper.has_user_blocked(&b, &a, 1));
        assert!(!keeper.has_user_blocked(&a, &b, 2));

        keeper.follow(&a, &b, 1);
        assert!(keeper.has_relationship(&a, &b, 1));
        assert!(!NoRelationships.has_relationship(&a, &b, 1));
    }
}
