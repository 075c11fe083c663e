//! Genesis state: bulk export and all-or-nothing import of the posts module.
//!
//! During normal operation the allocator guarantees that ids are unique and
//! below their watermark. An imported state carries arbitrary ids, so
//! [`GenesisState::validate`] re-checks those invariants explicitly, using the
//! same predicates as the incremental write path. The first violation rejects
//! the whole import and nothing is written.

use crate::error::{PostsError, Result};
use crate::posts::answer::UserAnswer;
use crate::posts::attachment::{Attachment, Poll};
use crate::posts::content::ContentRegistry;
use crate::posts::keys;
use crate::posts::params::Params;
use crate::posts::polls::ActivePoll;
use crate::posts::post::Post;
use crate::posts::store::ContentStore;
use crate::posts::transfer::PostOwnerTransferRequest;
use crate::posts::types::{EntityKey, EntityKind};
use crate::posts::validation::{
    check_user_answer_against_poll, ensure_unique, ensure_watermark_above,
};
use crate::storage::CF_POSTS;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use tracing::info;

/// Next post id of a subspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubspaceDataEntry {
    pub subspace_id: u64,
    pub initial_post_id: u64,
}

impl SubspaceDataEntry {
    pub fn new(subspace_id: u64, initial_post_id: u64) -> Self {
        Self {
            subspace_id,
            initial_post_id,
        }
    }
}

/// Next attachment id of a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostDataEntry {
    pub subspace_id: u64,
    pub post_id: u64,
    pub initial_attachment_id: u32,
}

impl PostDataEntry {
    pub fn new(subspace_id: u64, post_id: u64, initial_attachment_id: u32) -> Self {
        Self {
            subspace_id,
            post_id,
            initial_attachment_id,
        }
    }
}

/// The whole content of the posts module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenesisState {
    pub subspaces_data: Vec<SubspaceDataEntry>,
    pub posts_data: Vec<PostDataEntry>,
    pub posts: Vec<Post>,
    pub attachments: Vec<Attachment>,
    pub active_polls: Vec<ActivePoll>,
    pub user_answers: Vec<UserAnswer>,
    pub params: Params,
    pub post_owner_transfer_requests: Vec<PostOwnerTransferRequest>,
}

impl GenesisState {
    /// Reads a genesis state from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read_to_string(path.as_ref())?;
        serde_json::from_str(&data).map_err(|e| {
            PostsError::serialization(format!(
                "invalid genesis file {}: {}",
                path.as_ref().display(),
                e
            ))
        })
    }

    /// Writes the genesis state to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| PostsError::serialization(format!("failed to encode genesis: {}", e)))?;
        fs::write(path, data)?;
        Ok(())
    }

    /// Checks every entity and every cross-entity invariant of the state.
    ///
    /// Posts need a subspace entry whose initial post id is above every post
    /// id of the subspace, and attachments need a post entry whose initial
    /// attachment id is above every attachment id of the post. Attachments,
    /// post entries and transfer requests must belong to imported posts.
    /// Answers and active polls must refer to imported polls.
    pub fn validate(&self, registry: &ContentRegistry) -> Result<()> {
        let subspaces = self.validate_subspaces_data()?;
        let posts = self.validate_posts(&subspaces)?;
        let posts_data = self.validate_posts_data(&posts)?;
        let polls = self.validate_attachments(registry, &posts, &posts_data)?;
        self.validate_active_polls(&polls)?;
        self.validate_user_answers(&polls)?;
        self.validate_transfer_requests(&posts)?;
        self.params.validate()
    }

    fn validate_subspaces_data(&self) -> Result<HashMap<u64, u64>> {
        let mut seen = HashSet::new();
        for entry in &self.subspaces_data {
            ensure_unique(&mut seen, entry.subspace_id, EntityKind::SubspaceData, || {
                EntityKey::subspace(entry.subspace_id)
            })?;
            if entry.subspace_id == 0 {
                return Err(PostsError::invalid(
                    EntityKind::SubspaceData,
                    EntityKey::subspace(entry.subspace_id),
                    "subspace_id",
                    "invalid subspace id: 0",
                ));
            }
        }

        let mut max_ids: HashMap<u64, u64> = HashMap::new();
        for post in &self.posts {
            let max = max_ids.entry(post.subspace_id).or_insert(post.id);
            *max = (*max).max(post.id);
        }

        for entry in &self.subspaces_data {
            ensure_watermark_above(
                EntityKind::SubspaceData,
                EntityKey::subspace(entry.subspace_id),
                "initial_post_id",
                entry.initial_post_id,
                max_ids.get(&entry.subspace_id).copied(),
            )?;
        }

        Ok(self
            .subspaces_data
            .iter()
            .map(|entry| (entry.subspace_id, entry.initial_post_id))
            .collect())
    }

    fn validate_posts(&self, subspaces: &HashMap<u64, u64>) -> Result<HashSet<(u64, u64)>> {
        let mut seen = HashSet::new();
        for post in &self.posts {
            ensure_unique(&mut seen, (post.subspace_id, post.id), EntityKind::Post, || {
                post.key()
            })?;
            post.validate()?;

            if !subspaces.contains_key(&post.subspace_id) {
                return Err(PostsError::invalid(
                    EntityKind::Post,
                    post.key(),
                    "subspace_id",
                    format!("initial post id not set for subspace {}", post.subspace_id),
                ));
            }
        }
        Ok(seen)
    }

    fn validate_posts_data(&self, posts: &HashSet<(u64, u64)>) -> Result<HashMap<(u64, u64), u32>> {
        let mut seen = HashSet::new();
        for entry in &self.posts_data {
            let key = EntityKey::post(entry.subspace_id, entry.post_id);
            ensure_unique(
                &mut seen,
                (entry.subspace_id, entry.post_id),
                EntityKind::PostData,
                || key.clone(),
            )?;
            if !posts.contains(&(entry.subspace_id, entry.post_id)) {
                return Err(PostsError::not_found(EntityKind::Post, key));
            }
        }

        let mut max_ids: HashMap<(u64, u64), u64> = HashMap::new();
        for attachment in &self.attachments {
            let max = max_ids
                .entry((attachment.subspace_id, attachment.post_id))
                .or_insert(attachment.id as u64);
            *max = (*max).max(attachment.id as u64);
        }

        for entry in &self.posts_data {
            ensure_watermark_above(
                EntityKind::PostData,
                EntityKey::post(entry.subspace_id, entry.post_id),
                "initial_attachment_id",
                entry.initial_attachment_id as u64,
                max_ids.get(&(entry.subspace_id, entry.post_id)).copied(),
            )?;
        }

        Ok(self
            .posts_data
            .iter()
            .map(|entry| ((entry.subspace_id, entry.post_id), entry.initial_attachment_id))
            .collect())
    }

    /// Returns the polls found among the attachments, by key.
    fn validate_attachments(
        &self,
        registry: &ContentRegistry,
        posts: &HashSet<(u64, u64)>,
        posts_data: &HashMap<(u64, u64), u32>,
    ) -> Result<HashMap<(u64, u64, u32), Poll>> {
        let mut seen = HashSet::new();
        let mut polls = HashMap::new();

        for attachment in &self.attachments {
            let id = (attachment.subspace_id, attachment.post_id, attachment.id);
            ensure_unique(&mut seen, id, EntityKind::Attachment, || attachment.key())?;
            attachment.validate(registry)?;

            let post_key = (attachment.subspace_id, attachment.post_id);
            if !posts.contains(&post_key) {
                return Err(PostsError::not_found(
                    EntityKind::Post,
                    EntityKey::post(attachment.subspace_id, attachment.post_id),
                ));
            }
            if !posts_data.contains_key(&post_key) {
                return Err(PostsError::invalid(
                    EntityKind::Attachment,
                    attachment.key(),
                    "post_id",
                    format!("initial attachment id not set for post {}", attachment.post_id),
                ));
            }

            if attachment.is_poll(registry) {
                if let Some(poll) = attachment.poll(registry)? {
                    polls.insert(id, poll);
                }
            }
        }
        Ok(polls)
    }

    fn validate_active_polls(&self, polls: &HashMap<(u64, u64, u32), Poll>) -> Result<()> {
        let mut seen = HashSet::new();
        for active in &self.active_polls {
            let id = (active.subspace_id, active.post_id, active.poll_id);
            let key = || EntityKey::attachment(active.subspace_id, active.post_id, active.poll_id);
            ensure_unique(&mut seen, id, EntityKind::ActivePoll, key)?;

            let poll = polls
                .get(&id)
                .ok_or_else(|| PostsError::not_found(EntityKind::Attachment, key()))?;
            if poll.end_date != active.end_date {
                return Err(PostsError::invalid(
                    EntityKind::ActivePoll,
                    key(),
                    "end_date",
                    format!(
                        "end date {} does not match the poll end date {}",
                        active.end_date, poll.end_date
                    ),
                ));
            }
            if poll.final_tally_results.is_some() {
                return Err(PostsError::invalid(
                    EntityKind::ActivePoll,
                    key(),
                    "poll_id",
                    "poll has already ended",
                ));
            }
        }
        Ok(())
    }

    fn validate_user_answers(&self, polls: &HashMap<(u64, u64, u32), Poll>) -> Result<()> {
        let mut seen = HashSet::new();
        for answer in &self.user_answers {
            ensure_unique(
                &mut seen,
                (answer.subspace_id, answer.post_id, answer.poll_id, answer.user.clone()),
                EntityKind::UserAnswer,
                || answer.key(),
            )?;
            answer.validate()?;

            let poll = polls
                .get(&(answer.subspace_id, answer.post_id, answer.poll_id))
                .ok_or_else(|| {
                    PostsError::not_found(
                        EntityKind::Attachment,
                        EntityKey::attachment(answer.subspace_id, answer.post_id, answer.poll_id),
                    )
                })?;
            check_user_answer_against_poll(poll, answer)?;
        }
        Ok(())
    }

    fn validate_transfer_requests(&self, posts: &HashSet<(u64, u64)>) -> Result<()> {
        let mut seen = HashSet::new();
        for request in &self.post_owner_transfer_requests {
            ensure_unique(
                &mut seen,
                (request.subspace_id, request.post_id),
                EntityKind::TransferRequest,
                || request.key(),
            )?;
            request.validate()?;

            if !posts.contains(&(request.subspace_id, request.post_id)) {
                return Err(PostsError::not_found(EntityKind::Post, request.key()));
            }
        }
        Ok(())
    }
}

impl ContentStore {
    /// Exports the whole module content, in key order.
    pub fn export_genesis(&self) -> Result<GenesisState> {
        let mut subspaces_data = Vec::new();
        let mut corrupted = None;
        self.db()
            .prefix_iterate(CF_POSTS, &[keys::NEXT_POST_ID_PREFIX], |key, value| {
                match (keys::parse_next_post_id_key(key), keys::decode_post_id(value)) {
                    (Some(subspace_id), Some(next_id)) => {
                        subspaces_data.push(SubspaceDataEntry::new(subspace_id, next_id));
                        true
                    }
                    _ => {
                        corrupted = Some(key.to_vec());
                        false
                    }
                }
            })?;

        let mut posts_data = Vec::new();
        self.db()
            .prefix_iterate(CF_POSTS, &[keys::NEXT_ATTACHMENT_ID_PREFIX], |key, value| {
                match (
                    keys::parse_next_attachment_id_key(key),
                    keys::decode_attachment_id(value),
                ) {
                    (Some((subspace_id, post_id)), Some(next_id)) => {
                        posts_data.push(PostDataEntry::new(subspace_id, post_id, next_id));
                        true
                    }
                    _ => {
                        corrupted = Some(key.to_vec());
                        false
                    }
                }
            })?;

        if let Some(key) = corrupted {
            return Err(PostsError::storage(format!(
                "corrupted watermark entry at key {:02x?}",
                key
            )));
        }

        let state = GenesisState {
            subspaces_data,
            posts_data,
            posts: self.all_posts()?,
            attachments: self.all_attachments()?,
            active_polls: self.active_polls()?,
            user_answers: self.all_user_answers()?,
            params: self.params()?,
            post_owner_transfer_requests: self.all_transfer_requests()?,
        };

        info!(
            posts = state.posts.len(),
            attachments = state.attachments.len(),
            user_answers = state.user_answers.len(),
            "exported posts genesis"
        );
        Ok(state)
    }

    /// Validates `state` and writes it into an empty store as one batch.
    pub fn import_genesis(&self, state: &GenesisState) -> Result<()> {
        state.validate(self.registry())?;

        self.transaction(|tx| {
            if !tx.db.is_empty(CF_POSTS)? {
                return Err(PostsError::invalid_request(
                    "genesis can only be imported into an empty store",
                ));
            }

            for entry in &state.subspaces_data {
                tx.ws.put_raw(
                    CF_POSTS,
                    keys::next_post_id_key(entry.subspace_id),
                    keys::encode_post_id(entry.initial_post_id),
                );
            }
            for entry in &state.posts_data {
                tx.ws.put_raw(
                    CF_POSTS,
                    keys::next_attachment_id_key(entry.subspace_id, entry.post_id),
                    keys::encode_attachment_id(entry.initial_attachment_id),
                );
            }
            for post in &state.posts {
                tx.put(keys::post_key(post.subspace_id, post.id), post)?;
                tx.ws.put_raw(
                    CF_POSTS,
                    keys::section_post_key(post.subspace_id, post.section_id, post.id),
                    Vec::new(),
                );
            }
            for attachment in &state.attachments {
                tx.put(
                    keys::attachment_key(attachment.subspace_id, attachment.post_id, attachment.id),
                    attachment,
                )?;
            }
            for active in &state.active_polls {
                tx.ws.put_raw(CF_POSTS, active.queue_key(), Vec::new());
            }
            for answer in &state.user_answers {
                tx.put(
                    keys::user_answer_key(
                        answer.subspace_id,
                        answer.post_id,
                        answer.poll_id,
                        &answer.user,
                    ),
                    answer,
                )?;
            }
            for request in &state.post_owner_transfer_requests {
                tx.put(
                    keys::transfer_request_key(request.subspace_id, request.post_id),
                    request,
                )?;
            }
            tx.put(keys::PARAMS_KEY.to_vec(), &state.params)
        })?;

        info!(
            subspaces = state.subspaces_data.len(),
            posts = state.posts.len(),
            attachments = state.attachments.len(),
            user_answers = state.user_answers.len(),
            "imported posts genesis"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posts::attachment::ProvidedAnswer;
    use crate::posts::types::{Address, ReplySetting};

    fn user(n: u8) -> Address {
        Address::encode("cosmos", &[n; 20]).unwrap()
    }

    fn post(subspace_id: u64, id: u64) -> Post {
        Post {
            subspace_id,
            section_id: 0,
            id,
            external_id: None,
            text: "Genesis post".to_string(),
            entities: None,
            tags: vec![],
            author: user(1),
            conversation_id: 0,
            referenced_posts: vec![],
            reply_settings: ReplySetting::Everyone,
            creation_date: 1_000,
            last_edited_date: None,
            owner: user(1),
        }
    }

    fn cat_dog_poll(registry: &ContentRegistry) -> Attachment {
        let poll = Poll::new(
            "Cat or dog?",
            vec![
                ProvidedAnswer::new("Cat", vec![]),
                ProvidedAnswer::new("Dog", vec![]),
            ],
            5_000,
            false,
            false,
            None,
        );
        Attachment::new(1, 1, 1, registry.pack(&poll).unwrap())
    }

    fn valid_state(registry: &ContentRegistry) -> GenesisState {
        GenesisState {
            subspaces_data: vec![SubspaceDataEntry::new(1, 2)],
            posts_data: vec![PostDataEntry::new(1, 1, 2)],
            posts: vec![post(1, 1)],
            attachments: vec![cat_dog_poll(registry)],
            active_polls: vec![ActivePoll::new(1, 1, 1, 5_000)],
            user_answers: vec![UserAnswer::new(1, 1, 1, vec![1], user(2))],
            params: Params::default(),
            post_owner_transfer_requests: vec![PostOwnerTransferRequest::new(
                1,
                1,
                user(1),
                user(2),
            )],
        }
    }

    #[test]
    fn test_valid_state_passes() {
        let registry = ContentRegistry::with_builtin_kinds();
        assert!(valid_state(&registry).validate(&registry).is_ok());
        assert!(GenesisState::default().validate(&registry).is_ok());
    }

    #[test]
    fn test_initial_post_id_must_exceed_existing_ids() {
        let registry = ContentRegistry::with_builtin_kinds();
        let mut state = valid_state(&registry);
        state.posts.push(post(1, 2));
        assert!(matches!(
            state.validate(&registry),
            Err(PostsError::InvalidArgument {
                field: "initial_post_id",
                ..
            })
        ));

        state.subspaces_data[0].initial_post_id = 3;
        assert!(state.validate(&registry).is_ok());
    }

    #[test]
    fn test_duplicate_post_rejected() {
        let registry = ContentRegistry::with_builtin_kinds();
        let mut state = valid_state(&registry);
        state.posts.push(post(1, 1));
        assert!(matches!(
            state.validate(&registry),
            Err(PostsError::DuplicateEntity {
                entity: EntityKind::Post,
                ..
            })
        ));
    }

    #[test]
    fn test_duplicate_user_answer_rejected() {
        let registry = ContentRegistry::with_builtin_kinds();
        let mut state = valid_state(&registry);
        state
            .user_answers
            .push(UserAnswer::new(1, 1, 1, vec![0], user(2)));
        assert!(matches!(
            state.validate(&registry),
            Err(PostsError::DuplicateEntity {
                entity: EntityKind::UserAnswer,
                ..
            })
        ));
    }

    #[test]
    fn test_multiple_answers_rejected_on_single_answer_poll() {
        let registry = ContentRegistry::with_builtin_kinds();
        let mut state = valid_state(&registry);
        state.user_answers = vec![UserAnswer::new(1, 1, 1, vec![0, 1], user(2))];
        assert!(state.validate(&registry).is_err());
    }

    #[test]
    fn test_attachment_needs_post_data() {
        let registry = ContentRegistry::with_builtin_kinds();
        let mut state = valid_state(&registry);
        state.posts_data.clear();
        assert!(state.validate(&registry).is_err());
    }

    #[test]
    fn test_active_poll_must_match_poll_end_date() {
        let registry = ContentRegistry::with_builtin_kinds();
        let mut state = valid_state(&registry);
        state.active_polls = vec![ActivePoll::new(1, 1, 1, 4_000)];
        assert!(state.validate(&registry).is_err());
    }

    #[test]
    fn test_json_file_round_trip() {
        let registry = ContentRegistry::with_builtin_kinds();
        let state = valid_state(&registry);
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("genesis.json");

        state.save(&path).unwrap();
        assert_eq!(GenesisState::load(&path).unwrap(), state);
    }
}
