//! Post persistence using RocksDB.
//!
//! [`ContentStore`] is the only component reading and writing posts,
//! attachments, poll answers and owner transfer requests. Every mutation runs
//! inside a [`Transaction`]: changes are validated and staged in a write set,
//! then committed as a single RocksDB write batch, so readers never observe a
//! half-applied cascade. Hooks fire only after the batch is committed.
//!
//! ## Storage Layout
//!
//! All records live in the `posts` column family, see [`crate::posts::keys`].
//!
//! ## Concurrency
//!
//! Writes are serialized by a store-wide writer lock, which also makes id
//! allocation race free. Reads go straight to RocksDB and see the last
//! committed state.

use crate::error::{PostsError, Result};
use crate::migrations;
use crate::posts::allocator;
use crate::posts::answer::UserAnswer;
use crate::posts::attachment::{Attachment, Poll};
use crate::posts::content::{global_registry, ContentEnvelope, ContentRegistry};
use crate::posts::hooks::{dispatch_all, HookEvent, PostsHooks};
use crate::posts::keepers::{NoRelationships, RelationshipsKeeper};
use crate::posts::keys;
use crate::posts::params::Params;
use crate::posts::post::Post;
use crate::posts::transfer::PostOwnerTransferRequest;
use crate::posts::types::{Address, EntityKey, EntityKind, PostReferenceType, ReplySetting};
use crate::posts::validation::{
    check_user_answer_against_poll, ensure_id_below_watermark, ensure_watermark_above,
};
use crate::storage::{decode, open_database, RocksDbConfig, RocksDbHandle, WriteSet, CF_POSTS};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Persistent store of the posts module.
pub struct ContentStore {
    db: RocksDbHandle,
    registry: Arc<ContentRegistry>,
    relationships: Arc<dyn RelationshipsKeeper>,
    hooks: Vec<Arc<dyn PostsHooks>>,
    write_lock: Mutex<()>,
}

impl ContentStore {
    /// Opens the store under `data_dir`.
    ///
    /// Fails with a schema mismatch if the database was written by an older
    /// version and has not been migrated yet.
    pub fn open(data_dir: impl AsRef<Path>, config: &RocksDbConfig) -> Result<Self> {
        let db = open_database(data_dir, config)?;
        Self::from_handle(db)
    }

    /// Wraps an already opened database.
    pub fn from_handle(db: RocksDbHandle) -> Result<Self> {
        let version = migrations::ensure_current_schema(&db)?;
        info!(schema_version = version, "posts store ready");

        Ok(Self {
            db,
            registry: global_registry(),
            relationships: Arc::new(NoRelationships),
            hooks: Vec::new(),
            write_lock: Mutex::new(()),
        })
    }

    /// Uses the given content registry instead of the process-wide one.
    pub fn with_registry(mut self, registry: Arc<ContentRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Uses the given relationships service for referential checks.
    pub fn with_relationships(mut self, relationships: Arc<dyn RelationshipsKeeper>) -> Self {
        self.relationships = relationships;
        self
    }

    /// Adds a hook notified after every committed change.
    pub fn with_hooks(mut self, hooks: Arc<dyn PostsHooks>) -> Self {
        self.hooks.push(hooks);
        self
    }

    pub fn registry(&self) -> &ContentRegistry {
        &self.registry
    }

    pub fn relationships(&self) -> &dyn RelationshipsKeeper {
        self.relationships.as_ref()
    }

    pub(crate) fn db(&self) -> &RocksDbHandle {
        &self.db
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Runs `f` against a new transaction and commits it atomically.
    ///
    /// Nothing is persisted if `f` fails. Hooks are notified after the commit,
    /// outside of the writer lock.
    pub fn transaction<T>(&self, f: impl FnOnce(&mut Transaction<'_>) -> Result<T>) -> Result<T> {
        let (value, events) = {
            let _guard = self
                .write_lock
                .lock()
                .map_err(|_| PostsError::storage("writer lock poisoned"))?;

            let mut tx = Transaction {
                db: &self.db,
                registry: &self.registry,
                relationships: self.relationships.as_ref(),
                ws: WriteSet::new(),
                events: Vec::new(),
            };
            let value = f(&mut tx)?;

            let Transaction { ws, events, .. } = tx;
            self.db.commit(ws)?;
            (value, events)
        };

        dispatch_all(&self.hooks, &events);
        Ok(value)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    fn load<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        self.db.get(CF_POSTS, key)
    }

    fn iterate_decoded<T, F>(&self, prefix: &[u8], mut callback: F) -> Result<()>
    where
        T: DeserializeOwned,
        F: FnMut(T) -> bool,
    {
        let mut error = None;
        self.db.prefix_iterate(CF_POSTS, prefix, |_, value| match decode::<T>(value) {
            Ok(item) => callback(item),
            Err(e) => {
                error = Some(e);
                false
            }
        })?;
        error.map_or(Ok(()), Err)
    }

    fn collect_decoded<T: DeserializeOwned>(&self, prefix: &[u8]) -> Result<Vec<T>> {
        let mut items = Vec::new();
        self.iterate_decoded(prefix, |item| {
            items.push(item);
            true
        })?;
        Ok(items)
    }

    /// Returns the module parameters, or the defaults if none are stored.
    pub fn params(&self) -> Result<Params> {
        Ok(self.load(keys::PARAMS_KEY)?.unwrap_or_default())
    }

    /// Returns the stored next post id of a subspace.
    pub fn get_next_post_id(&self, subspace_id: u64) -> Result<Option<u64>> {
        allocator::stored_next_post_id(&self.db, &WriteSet::new(), subspace_id)
    }

    /// Returns the stored next attachment id of a post.
    pub fn get_next_attachment_id(&self, subspace_id: u64, post_id: u64) -> Result<Option<u32>> {
        allocator::stored_next_attachment_id(&self.db, &WriteSet::new(), subspace_id, post_id)
    }

    pub fn get_post(&self, subspace_id: u64, post_id: u64) -> Result<Option<Post>> {
        self.load(&keys::post_key(subspace_id, post_id))
    }

    pub fn has_post(&self, subspace_id: u64, post_id: u64) -> Result<bool> {
        self.db.exists(CF_POSTS, &keys::post_key(subspace_id, post_id))
    }

    /// Visits the posts of a subspace in id order until `callback` returns false.
    pub fn iterate_posts_in_subspace<F>(&self, subspace_id: u64, mut callback: F) -> Result<()>
    where
        F: FnMut(&Post) -> bool,
    {
        self.iterate_decoded(&keys::subspace_posts_prefix(subspace_id), |post: Post| {
            callback(&post)
        })
    }

    /// Returns every post of a subspace, in id order.
    pub fn posts_in_subspace(&self, subspace_id: u64) -> Result<Vec<Post>> {
        self.collect_decoded(&keys::subspace_posts_prefix(subspace_id))
    }

    /// Visits the posts filed under a section in id order until `callback`
    /// returns false.
    pub fn iterate_section_posts<F>(
        &self,
        subspace_id: u64,
        section_id: u32,
        mut callback: F,
    ) -> Result<()>
    where
        F: FnMut(&Post) -> bool,
    {
        let index = self
            .db
            .prefix_keys(CF_POSTS, &keys::section_posts_prefix(subspace_id, section_id))?;
        for key in index {
            let (_, _, post_id) = keys::parse_section_post_key(&key)
                .ok_or_else(|| PostsError::storage("malformed section index key"))?;
            let post = self.get_post(subspace_id, post_id)?.ok_or_else(|| {
                PostsError::storage(format!(
                    "section index points to missing post ({})",
                    EntityKey::post(subspace_id, post_id)
                ))
            })?;
            if !callback(&post) {
                break;
            }
        }
        Ok(())
    }

    /// Returns every post filed under a section, in id order.
    pub fn section_posts(&self, subspace_id: u64, section_id: u32) -> Result<Vec<Post>> {
        let mut posts = Vec::new();
        self.iterate_section_posts(subspace_id, section_id, |post| {
            posts.push(post.clone());
            true
        })?;
        Ok(posts)
    }

    /// Returns every post of every subspace, in key order.
    pub fn all_posts(&self) -> Result<Vec<Post>> {
        self.collect_decoded(&[keys::POST_PREFIX])
    }

    pub fn get_attachment(
        &self,
        subspace_id: u64,
        post_id: u64,
        attachment_id: u32,
    ) -> Result<Option<Attachment>> {
        self.load(&keys::attachment_key(subspace_id, post_id, attachment_id))
    }

    pub fn has_attachment(
        &self,
        subspace_id: u64,
        post_id: u64,
        attachment_id: u32,
    ) -> Result<bool> {
        self.db.exists(
            CF_POSTS,
            &keys::attachment_key(subspace_id, post_id, attachment_id),
        )
    }

    /// Visits the attachments of a post in id order until `callback` returns false.
    pub fn iterate_attachments_of_post<F>(
        &self,
        subspace_id: u64,
        post_id: u64,
        mut callback: F,
    ) -> Result<()>
    where
        F: FnMut(&Attachment) -> bool,
    {
        self.iterate_decoded(
            &keys::post_attachments_prefix(subspace_id, post_id),
            |attachment: Attachment| callback(&attachment),
        )
    }

    /// Returns every attachment of a post, in id order.
    pub fn attachments_of_post(&self, subspace_id: u64, post_id: u64) -> Result<Vec<Attachment>> {
        self.collect_decoded(&keys::post_attachments_prefix(subspace_id, post_id))
    }

    /// Returns every attachment of every post, in key order.
    pub fn all_attachments(&self) -> Result<Vec<Attachment>> {
        self.collect_decoded(&[keys::ATTACHMENT_PREFIX])
    }

    /// Returns the poll with the given id, if the attachment exists and is a poll.
    pub fn get_poll(&self, subspace_id: u64, post_id: u64, poll_id: u32) -> Result<Option<Poll>> {
        match self.get_attachment(subspace_id, post_id, poll_id)? {
            Some(attachment) => poll_of(&self.registry, &attachment),
            None => Ok(None),
        }
    }

    pub fn get_user_answer(
        &self,
        subspace_id: u64,
        post_id: u64,
        poll_id: u32,
        user: &Address,
    ) -> Result<Option<UserAnswer>> {
        self.load(&keys::user_answer_key(subspace_id, post_id, poll_id, user))
    }

    pub fn has_user_answer(
        &self,
        subspace_id: u64,
        post_id: u64,
        poll_id: u32,
        user: &Address,
    ) -> Result<bool> {
        self.db.exists(
            CF_POSTS,
            &keys::user_answer_key(subspace_id, post_id, poll_id, user),
        )
    }

    /// Visits the answers given to a poll until `callback` returns false.
    pub fn iterate_poll_user_answers<F>(
        &self,
        subspace_id: u64,
        post_id: u64,
        poll_id: u32,
        mut callback: F,
    ) -> Result<()>
    where
        F: FnMut(&UserAnswer) -> bool,
    {
        self.iterate_decoded(
            &keys::poll_answers_prefix(subspace_id, post_id, poll_id),
            |answer: UserAnswer| callback(&answer),
        )
    }

    /// Returns every answer given to a poll.
    pub fn poll_user_answers(
        &self,
        subspace_id: u64,
        post_id: u64,
        poll_id: u32,
    ) -> Result<Vec<UserAnswer>> {
        self.collect_decoded(&keys::poll_answers_prefix(subspace_id, post_id, poll_id))
    }

    /// Returns every stored user answer, in key order.
    pub fn all_user_answers(&self) -> Result<Vec<UserAnswer>> {
        self.collect_decoded(&[keys::USER_ANSWER_PREFIX])
    }

    pub fn get_transfer_request(
        &self,
        subspace_id: u64,
        post_id: u64,
    ) -> Result<Option<PostOwnerTransferRequest>> {
        self.load(&keys::transfer_request_key(subspace_id, post_id))
    }

    pub fn has_transfer_request(&self, subspace_id: u64, post_id: u64) -> Result<bool> {
        self.db
            .exists(CF_POSTS, &keys::transfer_request_key(subspace_id, post_id))
    }

    /// Returns every pending owner transfer request, in key order.
    pub fn all_transfer_requests(&self) -> Result<Vec<PostOwnerTransferRequest>> {
        self.collect_decoded(&[keys::TRANSFER_REQUEST_PREFIX])
    }

    /// Returns the pending transfer requests of a subspace, in post id order,
    /// keeping only those sent to `receiver` when one is given.
    pub fn incoming_transfer_requests(
        &self,
        subspace_id: u64,
        receiver: Option<&Address>,
    ) -> Result<Vec<PostOwnerTransferRequest>> {
        if subspace_id == 0 {
            return Err(PostsError::invalid_request("invalid subspace id: 0"));
        }

        let mut requests = Vec::new();
        self.iterate_decoded(
            &keys::subspace_transfer_requests_prefix(subspace_id),
            |request: PostOwnerTransferRequest| {
                if receiver.map_or(true, |receiver| request.receiver == *receiver) {
                    requests.push(request);
                }
                true
            },
        )?;
        Ok(requests)
    }

    /// Runs the referential checks of a post against the committed state.
    pub fn validate_post(&self, post: &Post) -> Result<()> {
        let tx = Transaction {
            db: &self.db,
            registry: &self.registry,
            relationships: self.relationships.as_ref(),
            ws: WriteSet::new(),
            events: Vec::new(),
        };
        tx.validate_post(post)
    }

    // =========================================================================
    // Single-operation writes
    // =========================================================================

    pub fn set_params(&self, params: Params) -> Result<()> {
        self.transaction(|tx| tx.set_params(params))
    }

    /// Allocates the next post id of a subspace.
    pub fn next_post_id(&self, subspace_id: u64) -> Result<u64> {
        self.transaction(|tx| tx.next_post_id(subspace_id))
    }

    /// Allocates the next attachment id of a post.
    pub fn next_attachment_id(&self, subspace_id: u64, post_id: u64) -> Result<u32> {
        self.transaction(|tx| tx.next_attachment_id(subspace_id, post_id))
    }

    pub fn set_next_post_id(&self, subspace_id: u64, next_id: u64) -> Result<()> {
        self.transaction(|tx| tx.set_next_post_id(subspace_id, next_id))
    }

    pub fn set_next_attachment_id(
        &self,
        subspace_id: u64,
        post_id: u64,
        next_id: u32,
    ) -> Result<()> {
        self.transaction(|tx| tx.set_next_attachment_id(subspace_id, post_id, next_id))
    }

    /// Allocates an id for `post` and stores it with its attachments.
    ///
    /// The id carried by `post` is ignored. Returns the new post id and the
    /// ids of the attachments, in order.
    pub fn create_post(
        &self,
        post: Post,
        attachments: Vec<ContentEnvelope>,
    ) -> Result<(u64, Vec<u32>)> {
        self.transaction(|tx| tx.create_post(post, attachments))
    }

    pub fn save_post(&self, post: &Post) -> Result<()> {
        self.transaction(|tx| tx.save_post(post))
    }

    /// Deletes a post together with everything it owns.
    ///
    /// Returns false if the post did not exist.
    pub fn delete_post(&self, subspace_id: u64, post_id: u64) -> Result<bool> {
        self.transaction(|tx| tx.delete_post(subspace_id, post_id))
    }

    /// Prepares the post id watermark of a newly created subspace.
    pub fn initialize_subspace(&self, subspace_id: u64) -> Result<()> {
        self.transaction(|tx| tx.initialize_subspace(subspace_id))
    }

    /// Deletes every post of a removed subspace. Returns how many were deleted.
    pub fn delete_subspace_posts(&self, subspace_id: u64) -> Result<usize> {
        self.transaction(|tx| tx.delete_subspace_posts(subspace_id))
    }

    /// Deletes every post of a removed section. Returns how many were deleted.
    pub fn delete_section_posts(&self, subspace_id: u64, section_id: u32) -> Result<usize> {
        self.transaction(|tx| tx.delete_section_posts(subspace_id, section_id))
    }

    /// Allocates an id for `content` and attaches it to an existing post.
    pub fn add_attachment(
        &self,
        subspace_id: u64,
        post_id: u64,
        content: ContentEnvelope,
        now: u64,
    ) -> Result<u32> {
        self.transaction(|tx| tx.add_attachment(subspace_id, post_id, content, now))
    }

    pub fn save_attachment(&self, attachment: &Attachment) -> Result<()> {
        self.transaction(|tx| tx.save_attachment(attachment))
    }

    /// Deletes an attachment together with its poll answers.
    pub fn delete_attachment(
        &self,
        subspace_id: u64,
        post_id: u64,
        attachment_id: u32,
    ) -> Result<bool> {
        self.transaction(|tx| tx.delete_attachment(subspace_id, post_id, attachment_id))
    }

    pub fn save_user_answer(&self, answer: &UserAnswer) -> Result<()> {
        self.transaction(|tx| tx.save_user_answer(answer))
    }

    pub fn delete_user_answer(
        &self,
        subspace_id: u64,
        post_id: u64,
        poll_id: u32,
        user: &Address,
    ) -> Result<bool> {
        self.transaction(|tx| tx.delete_user_answer(subspace_id, post_id, poll_id, user))
    }

    pub fn save_transfer_request(&self, request: &PostOwnerTransferRequest) -> Result<()> {
        self.transaction(|tx| tx.save_transfer_request(request))
    }

    pub fn delete_transfer_request(&self, subspace_id: u64, post_id: u64) -> Result<bool> {
        self.transaction(|tx| tx.delete_transfer_request(subspace_id, post_id))
    }
}

impl std::fmt::Debug for ContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStore")
            .field("db", &self.db)
            .field("registry", &self.registry)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

/// Decodes the content of an attachment as a poll, if it is one.
pub(crate) fn poll_of(
    registry: &ContentRegistry,
    attachment: &Attachment,
) -> Result<Option<Poll>> {
    if !attachment.is_poll(registry) {
        return Ok(None);
    }
    attachment.poll(registry)
}

// =============================================================================
// Transaction
// =============================================================================

/// A set of validated changes committed atomically by [`ContentStore::transaction`].
///
/// Reads made through a transaction see its own staged changes.
pub struct Transaction<'a> {
    pub(crate) db: &'a RocksDbHandle,
    pub(crate) registry: &'a ContentRegistry,
    relationships: &'a dyn RelationshipsKeeper,
    pub(crate) ws: WriteSet,
    pub(crate) events: Vec<HookEvent>,
}

impl<'a> Transaction<'a> {
    pub(crate) fn get<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_raw_staged(&self.ws, CF_POSTS, key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn exists(&self, key: &[u8]) -> Result<bool> {
        Ok(self.db.get_raw_staged(&self.ws, CF_POSTS, key)?.is_some())
    }

    pub(crate) fn put<T: Serialize>(&mut self, key: Vec<u8>, value: &T) -> Result<()> {
        self.ws.put(CF_POSTS, key, value)
    }

    pub(crate) fn delete(&mut self, key: Vec<u8>) {
        self.ws.delete(CF_POSTS, key);
    }

    /// Decoded values under `prefix`, including staged changes.
    pub(crate) fn collect<T: DeserializeOwned>(&self, prefix: &[u8]) -> Result<Vec<T>> {
        self.db
            .prefix_entries_staged(&self.ws, CF_POSTS, prefix)?
            .iter()
            .map(|(_, value)| decode(value))
            .collect()
    }

    pub fn registry(&self) -> &ContentRegistry {
        self.registry
    }

    // -------------------------------------------------------------------------
    // Params and watermarks
    // -------------------------------------------------------------------------

    pub fn params(&self) -> Result<Params> {
        Ok(self.get(keys::PARAMS_KEY)?.unwrap_or_default())
    }

    pub fn set_params(&mut self, params: Params) -> Result<()> {
        params.validate()?;
        self.put(keys::PARAMS_KEY.to_vec(), &params)
    }

    pub fn next_post_id(&mut self, subspace_id: u64) -> Result<u64> {
        let id = allocator::allocate_post_id(self.db, &mut self.ws, subspace_id)?;
        debug!(subspace_id = subspace_id, post_id = id, "allocated post id");
        Ok(id)
    }

    pub fn next_attachment_id(&mut self, subspace_id: u64, post_id: u64) -> Result<u32> {
        let id = allocator::allocate_attachment_id(self.db, &mut self.ws, subspace_id, post_id)?;
        debug!(
            subspace_id = subspace_id,
            post_id = post_id,
            attachment_id = id,
            "allocated attachment id"
        );
        Ok(id)
    }

    /// Highest id found under `prefix` once this transaction commits, reading
    /// the trailing `width` key bytes.
    fn max_id_under(&self, prefix: &[u8], width: usize) -> Result<Option<u64>> {
        let last = self
            .db
            .last_key_with_prefix_staged(&self.ws, CF_POSTS, prefix)?;

        Ok(last.and_then(|key| {
            let tail = key.get(prefix.len()..prefix.len() + width)?;
            let mut buf = [0u8; 8];
            buf[8 - width..].copy_from_slice(tail);
            Some(u64::from_be_bytes(buf))
        }))
    }

    /// Sets the next post id of a subspace.
    ///
    /// The id must be above every post already stored in the subspace.
    pub fn set_next_post_id(&mut self, subspace_id: u64, next_id: u64) -> Result<()> {
        let max_id = self.max_id_under(&keys::subspace_posts_prefix(subspace_id), 8)?;
        ensure_watermark_above(
            EntityKind::SubspaceData,
            EntityKey::subspace(subspace_id),
            "next_post_id",
            next_id,
            max_id,
        )?;
        allocator::set_next_post_id(&mut self.ws, subspace_id, next_id);
        Ok(())
    }

    /// Sets the next attachment id of a post.
    ///
    /// The id must be above every attachment already stored in the post.
    pub fn set_next_attachment_id(
        &mut self,
        subspace_id: u64,
        post_id: u64,
        next_id: u32,
    ) -> Result<()> {
        let prefix = keys::post_attachments_prefix(subspace_id, post_id);
        let max_id = self.max_id_under(&prefix, 4)?;
        ensure_watermark_above(
            EntityKind::PostData,
            EntityKey::post(subspace_id, post_id),
            "next_attachment_id",
            next_id as u64,
            max_id,
        )?;
        allocator::set_next_attachment_id(&mut self.ws, subspace_id, post_id, next_id);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Posts
    // -------------------------------------------------------------------------

    pub fn post(&self, subspace_id: u64, post_id: u64) -> Result<Option<Post>> {
        self.get(&keys::post_key(subspace_id, post_id))
    }

    pub fn has_post(&self, subspace_id: u64, post_id: u64) -> Result<bool> {
        self.exists(&keys::post_key(subspace_id, post_id))
    }

    /// Loads a post, failing if it does not exist.
    pub fn require_post(&self, subspace_id: u64, post_id: u64) -> Result<Post> {
        self.post(subspace_id, post_id)?.ok_or_else(|| {
            PostsError::not_found(EntityKind::Post, EntityKey::post(subspace_id, post_id))
        })
    }

    /// Checks a post against the stored state and the module params.
    ///
    /// Referenced posts must exist and their owners must not have blocked the
    /// owner of this post, replies must honour the reply settings of the
    /// replied post, mentioned users must not have blocked the owner, and
    /// the text must fit the maximum length.
    pub fn validate_post(&self, post: &Post) -> Result<()> {
        let params = self.params()?;

        if post.conversation_id != 0 {
            self.validate_post_reference(post, post.conversation_id)?;
        }

        for reference in &post.referenced_posts {
            self.validate_post_reference(post, reference.post_id)?;
            if reference.reference_type == PostReferenceType::Reply {
                self.validate_post_reply(post, reference.post_id)?;
            }
        }

        for mentioned in post.mentioned_users() {
            if self
                .relationships
                .has_user_blocked(&mentioned, &post.owner, post.subspace_id)
            {
                return Err(PostsError::invalid_request(format!(
                    "user {} has blocked you",
                    mentioned
                )));
            }
        }

        if post.text.len() as u64 > params.max_text_length as u64 {
            return Err(PostsError::invalid(
                EntityKind::Post,
                post.key(),
                "text",
                "text exceed max length allowed",
            ));
        }

        post.validate()
    }

    fn validate_post_reference(&self, post: &Post, reference_id: u64) -> Result<()> {
        let referenced = self.post(post.subspace_id, reference_id)?.ok_or_else(|| {
            PostsError::invalid_request(format!("post with id {} does not exist", reference_id))
        })?;

        if self
            .relationships
            .has_user_blocked(&referenced.owner, &post.owner, post.subspace_id)
        {
            return Err(PostsError::invalid_request(format!(
                "owner of post {} has blocked you",
                reference_id
            )));
        }
        Ok(())
    }

    fn validate_post_reply(&self, post: &Post, reply_id: u64) -> Result<()> {
        let replied = self.post(post.subspace_id, reply_id)?.ok_or_else(|| {
            PostsError::invalid_request(format!("post with id {} does not exist", reply_id))
        })?;

        let follows = |from: &Address, to: &Address| {
            self.relationships
                .has_relationship(from, to, post.subspace_id)
        };

        match replied.reply_settings {
            ReplySetting::Followers if !follows(&post.owner, &replied.owner) => Err(
                PostsError::invalid_request("only followers of the owner can reply to this post"),
            ),
            ReplySetting::Mutual
                if !follows(&post.owner, &replied.owner) || !follows(&replied.owner, &post.owner) =>
            {
                Err(PostsError::invalid_request(
                    "only mutual connections of the owner can reply to this post",
                ))
            }
            ReplySetting::Mentions if !replied.is_user_mentioned(&post.owner) => Err(
                PostsError::invalid_request("only mentioned users can reply to this post"),
            ),
            _ => Ok(()),
        }
    }

    /// Stores a post whose id has already been allocated.
    pub fn save_post(&mut self, post: &Post) -> Result<()> {
        post.validate()?;

        let watermark = allocator::stored_next_post_id(self.db, &self.ws, post.subspace_id)?
            .unwrap_or(allocator::INITIAL_ID);
        ensure_id_below_watermark(EntityKind::Post, post.key(), "id", post.id, watermark)?;

        if let Some(previous) = self.post(post.subspace_id, post.id)? {
            if previous.section_id != post.section_id {
                self.delete(keys::section_post_key(
                    post.subspace_id,
                    previous.section_id,
                    post.id,
                ));
            }
        }
        self.put(keys::post_key(post.subspace_id, post.id), post)?;
        self.ws.put_raw(
            CF_POSTS,
            keys::section_post_key(post.subspace_id, post.section_id, post.id),
            Vec::new(),
        );

        if allocator::stored_next_attachment_id(self.db, &self.ws, post.subspace_id, post.id)?
            .is_none()
        {
            allocator::set_next_attachment_id(
                &mut self.ws,
                post.subspace_id,
                post.id,
                allocator::INITIAL_ID as u32,
            );
        }

        debug!(subspace_id = post.subspace_id, post_id = post.id, "post saved");
        self.events.push(HookEvent::PostSaved {
            subspace_id: post.subspace_id,
            post_id: post.id,
        });
        Ok(())
    }

    /// Allocates an id for `post`, validates it and stores it with its attachments.
    pub fn create_post(
        &mut self,
        mut post: Post,
        attachments: Vec<ContentEnvelope>,
    ) -> Result<(u64, Vec<u32>)> {
        post.id = self.next_post_id(post.subspace_id)?;
        self.validate_post(&post)?;
        self.save_post(&post)?;

        let now = post.creation_date;
        let mut attachment_ids = Vec::with_capacity(attachments.len());
        for content in attachments {
            let attachment_id = self.store_new_attachment(post.subspace_id, post.id, content, now)?;
            attachment_ids.push(attachment_id);
        }

        Ok((post.id, attachment_ids))
    }

    /// Deletes a post with its attachments, their answers, its attachment
    /// watermark, its section index entry and its pending transfer request.
    pub fn delete_post(&mut self, subspace_id: u64, post_id: u64) -> Result<bool> {
        let post = match self.post(subspace_id, post_id)? {
            Some(post) => post,
            None => return Ok(false),
        };

        self.delete(keys::post_key(subspace_id, post_id));
        self.delete(keys::section_post_key(subspace_id, post.section_id, post_id));

        let attachments: Vec<Attachment> =
            self.collect(&keys::post_attachments_prefix(subspace_id, post_id))?;
        for attachment in attachments {
            self.delete_attachment(subspace_id, post_id, attachment.id)?;
        }

        allocator::delete_next_attachment_id(&mut self.ws, subspace_id, post_id);
        self.delete_transfer_request(subspace_id, post_id)?;

        debug!(subspace_id = subspace_id, post_id = post_id, "post deleted");
        self.events.push(HookEvent::PostDeleted {
            subspace_id,
            post_id,
        });
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Subspace and section lifecycle
    // -------------------------------------------------------------------------

    /// Sets the post id watermark of a new subspace, keeping an existing one.
    pub fn initialize_subspace(&mut self, subspace_id: u64) -> Result<()> {
        if allocator::stored_next_post_id(self.db, &self.ws, subspace_id)?.is_none() {
            allocator::set_next_post_id(&mut self.ws, subspace_id, allocator::INITIAL_ID);
            debug!(subspace_id = subspace_id, "subspace initialized");
        }
        Ok(())
    }

    /// Deletes every post of a subspace and its post id watermark.
    pub fn delete_subspace_posts(&mut self, subspace_id: u64) -> Result<usize> {
        let posts: Vec<Post> = self.collect(&keys::subspace_posts_prefix(subspace_id))?;
        let mut deleted = 0;
        for post in &posts {
            if self.delete_post(subspace_id, post.id)? {
                deleted += 1;
            }
        }
        allocator::delete_next_post_id(&mut self.ws, subspace_id);

        info!(subspace_id = subspace_id, posts = deleted, "subspace posts deleted");
        Ok(deleted)
    }

    /// Deletes every post filed under a section.
    pub fn delete_section_posts(&mut self, subspace_id: u64, section_id: u32) -> Result<usize> {
        let index = self.db.prefix_entries_staged(
            &self.ws,
            CF_POSTS,
            &keys::section_posts_prefix(subspace_id, section_id),
        )?;

        let mut deleted = 0;
        for (key, _) in index {
            let (_, _, post_id) = keys::parse_section_post_key(&key)
                .ok_or_else(|| PostsError::storage("malformed section index key"))?;
            if self.delete_post(subspace_id, post_id)? {
                deleted += 1;
            }
        }

        info!(
            subspace_id = subspace_id,
            section_id = section_id,
            posts = deleted,
            "section posts deleted"
        );
        Ok(deleted)
    }

    // -------------------------------------------------------------------------
    // Attachments
    // -------------------------------------------------------------------------

    pub fn attachment(
        &self,
        subspace_id: u64,
        post_id: u64,
        attachment_id: u32,
    ) -> Result<Option<Attachment>> {
        self.get(&keys::attachment_key(subspace_id, post_id, attachment_id))
    }

    pub fn has_attachment(
        &self,
        subspace_id: u64,
        post_id: u64,
        attachment_id: u32,
    ) -> Result<bool> {
        self.exists(&keys::attachment_key(subspace_id, post_id, attachment_id))
    }

    /// Returns the poll with the given id, if the attachment exists and is a poll.
    pub fn poll(&self, subspace_id: u64, post_id: u64, poll_id: u32) -> Result<Option<Poll>> {
        match self.attachment(subspace_id, post_id, poll_id)? {
            Some(attachment) => poll_of(self.registry, &attachment),
            None => Ok(None),
        }
    }

    /// Allocates an id for `content`, stores it and marks the post as edited at `now`.
    pub fn add_attachment(
        &mut self,
        subspace_id: u64,
        post_id: u64,
        content: ContentEnvelope,
        now: u64,
    ) -> Result<u32> {
        let mut post = self.require_post(subspace_id, post_id)?;
        let attachment_id = self.store_new_attachment(subspace_id, post_id, content, now)?;

        post.last_edited_date = Some(now);
        self.validate_post(&post)?;
        self.save_post(&post)?;
        Ok(attachment_id)
    }

    /// Checks that new content is acceptable, allocates its id and stores it.
    ///
    /// A new poll cannot carry tally results and must end after `now`.
    fn store_new_attachment(
        &mut self,
        subspace_id: u64,
        post_id: u64,
        content: ContentEnvelope,
        now: u64,
    ) -> Result<u32> {
        let poll = match self.registry.kind_of::<Poll>() {
            Some(_) => self.registry.unpack_as::<Poll>(&content)?,
            None => None,
        };
        if let Some(poll) = poll {
            if poll.final_tally_results.is_some() {
                return Err(PostsError::invalid_request("poll tally results must be nil"));
            }
            if poll.end_date < now {
                return Err(PostsError::invalid_request("poll end date must be in the future"));
            }
        }

        let attachment_id = self.next_attachment_id(subspace_id, post_id)?;
        let attachment = Attachment::new(subspace_id, post_id, attachment_id, content);
        self.save_attachment(&attachment)?;
        Ok(attachment_id)
    }

    /// Stores an attachment whose id has already been allocated.
    ///
    /// Polls without final results are kept in the active poll queue.
    pub fn save_attachment(&mut self, attachment: &Attachment) -> Result<()> {
        attachment.validate(self.registry)?;

        if !self.has_post(attachment.subspace_id, attachment.post_id)? {
            return Err(PostsError::not_found(
                EntityKind::Post,
                EntityKey::post(attachment.subspace_id, attachment.post_id),
            ));
        }

        let watermark = allocator::stored_next_attachment_id(
            self.db,
            &self.ws,
            attachment.subspace_id,
            attachment.post_id,
        )?
        .unwrap_or(allocator::INITIAL_ID as u32);
        ensure_id_below_watermark(
            EntityKind::Attachment,
            attachment.key(),
            "id",
            attachment.id as u64,
            watermark as u64,
        )?;

        if let Some(previous) =
            self.attachment(attachment.subspace_id, attachment.post_id, attachment.id)?
        {
            self.dequeue_poll(&previous)?;
        }
        if let Some(poll) = poll_of(self.registry, attachment)? {
            if poll.final_tally_results.is_none() {
                self.ws.put_raw(
                    CF_POSTS,
                    keys::active_poll_queue_key(
                        poll.end_date,
                        attachment.subspace_id,
                        attachment.post_id,
                        attachment.id,
                    ),
                    Vec::new(),
                );
            }
        }

        self.put(
            keys::attachment_key(attachment.subspace_id, attachment.post_id, attachment.id),
            attachment,
        )?;

        debug!(
            subspace_id = attachment.subspace_id,
            post_id = attachment.post_id,
            attachment_id = attachment.id,
            kind = %attachment.content.kind,
            "attachment saved"
        );
        self.events.push(HookEvent::AttachmentSaved {
            subspace_id: attachment.subspace_id,
            post_id: attachment.post_id,
            attachment_id: attachment.id,
        });
        Ok(())
    }

    /// Removes a poll attachment from the active poll queue.
    pub(crate) fn dequeue_poll(&mut self, attachment: &Attachment) -> Result<()> {
        if let Some(poll) = poll_of(self.registry, attachment)? {
            self.delete(keys::active_poll_queue_key(
                poll.end_date,
                attachment.subspace_id,
                attachment.post_id,
                attachment.id,
            ));
        }
        Ok(())
    }

    /// Deletes an attachment, and its answers and queue entry if it is a poll.
    pub fn delete_attachment(
        &mut self,
        subspace_id: u64,
        post_id: u64,
        attachment_id: u32,
    ) -> Result<bool> {
        let attachment = match self.attachment(subspace_id, post_id, attachment_id)? {
            Some(attachment) => attachment,
            None => return Ok(false),
        };

        if attachment.is_poll(self.registry) {
            let answers: Vec<UserAnswer> =
                self.collect(&keys::poll_answers_prefix(subspace_id, post_id, attachment_id))?;
            for answer in answers {
                self.delete_user_answer(subspace_id, post_id, attachment_id, &answer.user)?;
            }
            self.dequeue_poll(&attachment)?;
        }

        self.delete(keys::attachment_key(subspace_id, post_id, attachment_id));

        debug!(
            subspace_id = subspace_id,
            post_id = post_id,
            attachment_id = attachment_id,
            "attachment deleted"
        );
        self.events.push(HookEvent::AttachmentDeleted {
            subspace_id,
            post_id,
            attachment_id,
        });
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // User answers
    // -------------------------------------------------------------------------

    pub fn user_answer(
        &self,
        subspace_id: u64,
        post_id: u64,
        poll_id: u32,
        user: &Address,
    ) -> Result<Option<UserAnswer>> {
        self.get(&keys::user_answer_key(subspace_id, post_id, poll_id, user))
    }

    pub fn has_user_answer(
        &self,
        subspace_id: u64,
        post_id: u64,
        poll_id: u32,
        user: &Address,
    ) -> Result<bool> {
        self.exists(&keys::user_answer_key(subspace_id, post_id, poll_id, user))
    }

    /// Stores an answer to an open poll.
    ///
    /// The answer is checked against the poll it refers to. A previous answer
    /// of the same user is replaced only if the poll allows answer edits.
    pub fn save_user_answer(&mut self, answer: &UserAnswer) -> Result<()> {
        answer.validate()?;

        if !self.has_attachment(answer.subspace_id, answer.post_id, answer.poll_id)? {
            return Err(PostsError::not_found(
                EntityKind::Attachment,
                EntityKey::attachment(answer.subspace_id, answer.post_id, answer.poll_id),
            ));
        }

        let poll = self
            .poll(answer.subspace_id, answer.post_id, answer.poll_id)?
            .ok_or_else(|| {
                PostsError::invalid(
                    EntityKind::UserAnswer,
                    answer.key(),
                    "poll_id",
                    format!("attachment {} is not a poll", answer.poll_id),
                )
            })?;

        if poll.final_tally_results.is_some() {
            return Err(PostsError::invalid_request(
                "the poll voting period has already ended",
            ));
        }

        check_user_answer_against_poll(&poll, answer)?;

        let answered =
            self.has_user_answer(answer.subspace_id, answer.post_id, answer.poll_id, &answer.user)?;
        if !poll.allows_answer_edits && answered {
            return Err(PostsError::invalid_request("you cannot edit this poll's answer"));
        }

        self.put(
            keys::user_answer_key(answer.subspace_id, answer.post_id, answer.poll_id, &answer.user),
            answer,
        )?;

        debug!(
            subspace_id = answer.subspace_id,
            post_id = answer.post_id,
            poll_id = answer.poll_id,
            user = %answer.user,
            "poll answer saved"
        );
        self.events.push(HookEvent::PollAnswerSaved {
            subspace_id: answer.subspace_id,
            post_id: answer.post_id,
            poll_id: answer.poll_id,
            user: answer.user.clone(),
        });
        Ok(())
    }

    pub fn delete_user_answer(
        &mut self,
        subspace_id: u64,
        post_id: u64,
        poll_id: u32,
        user: &Address,
    ) -> Result<bool> {
        let key = keys::user_answer_key(subspace_id, post_id, poll_id, user);
        if !self.exists(&key)? {
            return Ok(false);
        }
        self.delete(key);

        self.events.push(HookEvent::PollAnswerDeleted {
            subspace_id,
            post_id,
            poll_id,
            user: user.clone(),
        });
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Owner transfer requests
    // -------------------------------------------------------------------------

    pub fn transfer_request(
        &self,
        subspace_id: u64,
        post_id: u64,
    ) -> Result<Option<PostOwnerTransferRequest>> {
        self.get(&keys::transfer_request_key(subspace_id, post_id))
    }

    pub fn has_transfer_request(&self, subspace_id: u64, post_id: u64) -> Result<bool> {
        self.exists(&keys::transfer_request_key(subspace_id, post_id))
    }

    /// Stores the transfer request of an existing post, replacing any previous one.
    pub fn save_transfer_request(&mut self, request: &PostOwnerTransferRequest) -> Result<()> {
        request.validate()?;
        self.require_post(request.subspace_id, request.post_id)?;

        self.put(
            keys::transfer_request_key(request.subspace_id, request.post_id),
            request,
        )?;

        debug!(
            subspace_id = request.subspace_id,
            post_id = request.post_id,
            receiver = %request.receiver,
            "post owner transfer request saved"
        );
        self.events.push(HookEvent::TransferRequestSaved {
            subspace_id: request.subspace_id,
            post_id: request.post_id,
            sender: request.sender.clone(),
            receiver: request.receiver.clone(),
        });
        Ok(())
    }

    pub fn delete_transfer_request(&mut self, subspace_id: u64, post_id: u64) -> Result<bool> {
        let key = keys::transfer_request_key(subspace_id, post_id);
        if !self.exists(&key)? {
            return Ok(false);
        }
        self.delete(key);

        self.events.push(HookEvent::TransferRequestDeleted {
            subspace_id,
            post_id,
        });
        Ok(true)
    }
}
