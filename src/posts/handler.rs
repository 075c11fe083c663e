//! Message handler: authorization checks composed with store transactions.
//!
//! The handler is the in-process caller of the store. It consults the
//! subspaces service for permissions, the relationships service for blocks,
//! and applies each message as a single store transaction.

use crate::error::{PostsError, Result};
use crate::posts::answer::UserAnswer;
use crate::posts::keepers::{Permission, SubspacesKeeper};
use crate::posts::msgs::*;
use crate::posts::post::{Post, PostUpdate};
use crate::posts::store::{ContentStore, Transaction};
use crate::posts::transfer::PostOwnerTransferRequest;
use crate::posts::types::Address;
use std::sync::Arc;
use tracing::info;

/// Applies posts messages against a store.
pub struct MsgHandler {
    store: Arc<ContentStore>,
    subspaces: Arc<dyn SubspacesKeeper>,
}

impl MsgHandler {
    pub fn new(store: Arc<ContentStore>, subspaces: Arc<dyn SubspacesKeeper>) -> Self {
        Self { store, subspaces }
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    /// Validates and applies a message at the given block time.
    pub fn handle(&self, msg: PostsMsg, block_time: u64) -> Result<MsgResponse> {
        msg.validate()?;
        match msg {
            PostsMsg::CreatePost(msg) => self.create_post(msg, block_time),
            PostsMsg::EditPost(msg) => self.edit_post(msg, block_time),
            PostsMsg::DeletePost(msg) => self.delete_post(msg),
            PostsMsg::AddPostAttachment(msg) => self.add_post_attachment(msg, block_time),
            PostsMsg::RemovePostAttachment(msg) => self.remove_post_attachment(msg, block_time),
            PostsMsg::AnswerPoll(msg) => self.answer_poll(msg, block_time),
            PostsMsg::RequestPostOwnerTransfer(msg) => self.request_post_owner_transfer(msg),
            PostsMsg::CancelPostOwnerTransferRequest(msg) => self.cancel_post_owner_transfer(msg),
            PostsMsg::AcceptPostOwnerTransferRequest(msg) => {
                self.accept_post_owner_transfer(msg, block_time)
            }
            PostsMsg::RefusePostOwnerTransferRequest(msg) => self.refuse_post_owner_transfer(msg),
        }
    }

    // =========================================================================
    // Checks
    // =========================================================================

    fn ensure_subspace(&self, subspace_id: u64) -> Result<()> {
        if !self.subspaces.has_subspace(subspace_id) {
            return Err(PostsError::invalid_request(format!(
                "subspace with id {} not found",
                subspace_id
            )));
        }
        Ok(())
    }

    fn can(&self, post: &Post, user: &Address, permission: Permission) -> bool {
        self.subspaces
            .has_permission(post.subspace_id, post.section_id, user, permission)
    }

    /// Owners holding the edit permission and moderators may change a post.
    fn ensure_can_edit(&self, post: &Post, user: &Address) -> Result<()> {
        let is_moderator = self.can(post, user, Permission::ModerateContent);
        let can_edit = &post.owner == user && self.can(post, user, Permission::EditOwnContent);
        if !is_moderator && !can_edit {
            return Err(PostsError::permission_denied(
                "you cannot edit content inside this subspace",
            ));
        }
        Ok(())
    }

    fn existing_post(tx: &Transaction<'_>, subspace_id: u64, post_id: u64) -> Result<Post> {
        tx.post(subspace_id, post_id)?.ok_or_else(|| {
            PostsError::invalid_request(format!("post with id {} does not exist", post_id))
        })
    }

    // =========================================================================
    // Posts
    // =========================================================================

    fn create_post(&self, msg: MsgCreatePost, block_time: u64) -> Result<MsgResponse> {
        self.ensure_subspace(msg.subspace_id)?;
        if !self.subspaces.has_section(msg.subspace_id, msg.section_id) {
            return Err(PostsError::invalid_request(format!(
                "subspace section with id {} not found",
                msg.section_id
            )));
        }

        let can_write = self.subspaces.has_permission(
            msg.subspace_id,
            msg.section_id,
            &msg.author,
            Permission::Write,
        );
        let can_comment = msg.conversation_id != 0
            && self.subspaces.has_permission(
                msg.subspace_id,
                msg.section_id,
                &msg.author,
                Permission::Comment,
            );
        if !can_write && !can_comment {
            return Err(PostsError::permission_denied(
                "you cannot create posts nor comment inside this section",
            ));
        }

        let post = Post {
            subspace_id: msg.subspace_id,
            section_id: msg.section_id,
            id: 0,
            external_id: msg.external_id,
            text: msg.text,
            entities: msg.entities,
            tags: msg.tags,
            author: msg.author.clone(),
            conversation_id: msg.conversation_id,
            referenced_posts: msg.referenced_posts,
            reply_settings: msg.reply_settings,
            creation_date: block_time,
            last_edited_date: None,
            owner: msg.author,
        };

        let (post_id, attachment_ids) = self.store.create_post(post, msg.attachments)?;
        info!(
            subspace_id = msg.subspace_id,
            post_id = post_id,
            attachments = attachment_ids.len(),
            "created post"
        );

        Ok(MsgResponse::CreatePost {
            post_id,
            attachment_ids,
            creation_date: block_time,
        })
    }

    fn edit_post(&self, msg: MsgEditPost, block_time: u64) -> Result<MsgResponse> {
        self.ensure_subspace(msg.subspace_id)?;

        self.store.transaction(|tx| {
            let post = Self::existing_post(tx, msg.subspace_id, msg.post_id)?;
            if post.owner != msg.editor {
                return Err(PostsError::invalid_request("you are not the owner of this post"));
            }
            if !self.can(&post, &msg.editor, Permission::EditOwnContent) {
                return Err(PostsError::permission_denied(
                    "you cannot edit content inside this subspace",
                ));
            }

            let updated = post.update(PostUpdate {
                text: Some(msg.text.clone()),
                entities: msg.entities.clone(),
                tags: msg.tags.clone(),
                update_time: block_time,
            });
            tx.validate_post(&updated)?;
            tx.save_post(&updated)
        })?;

        Ok(MsgResponse::EditPost {
            edit_date: block_time,
        })
    }

    fn delete_post(&self, msg: MsgDeletePost) -> Result<MsgResponse> {
        self.ensure_subspace(msg.subspace_id)?;

        self.store.transaction(|tx| {
            let post = Self::existing_post(tx, msg.subspace_id, msg.post_id)?;
            self.ensure_can_edit(&post, &msg.signer)?;
            tx.delete_post(msg.subspace_id, msg.post_id)
        })?;

        info!(
            subspace_id = msg.subspace_id,
            post_id = msg.post_id,
            "deleted post"
        );
        Ok(MsgResponse::Empty)
    }

    // =========================================================================
    // Attachments
    // =========================================================================

    fn add_post_attachment(
        &self,
        msg: MsgAddPostAttachment,
        block_time: u64,
    ) -> Result<MsgResponse> {
        self.ensure_subspace(msg.subspace_id)?;

        let attachment_id = self.store.transaction(|tx| {
            let post = Self::existing_post(tx, msg.subspace_id, msg.post_id)?;
            if post.owner != msg.editor {
                return Err(PostsError::invalid_request("you are not the author of this post"));
            }
            if !self.can(&post, &msg.editor, Permission::EditOwnContent) {
                return Err(PostsError::permission_denied(
                    "you cannot edit content inside this subspace",
                ));
            }
            tx.add_attachment(msg.subspace_id, msg.post_id, msg.content.clone(), block_time)
        })?;

        Ok(MsgResponse::AddPostAttachment {
            attachment_id,
            edit_date: block_time,
        })
    }

    fn remove_post_attachment(
        &self,
        msg: MsgRemovePostAttachment,
        block_time: u64,
    ) -> Result<MsgResponse> {
        self.ensure_subspace(msg.subspace_id)?;

        self.store.transaction(|tx| {
            let mut post = Self::existing_post(tx, msg.subspace_id, msg.post_id)?;
            self.ensure_can_edit(&post, &msg.editor)?;

            if !tx.delete_attachment(msg.subspace_id, msg.post_id, msg.attachment_id)? {
                return Err(PostsError::invalid_request(format!(
                    "attachment with id {} not found",
                    msg.attachment_id
                )));
            }

            post.last_edited_date = Some(block_time);
            tx.validate_post(&post)?;
            tx.save_post(&post)
        })?;

        Ok(MsgResponse::RemovePostAttachment {
            edit_date: block_time,
        })
    }

    // =========================================================================
    // Polls
    // =========================================================================

    fn answer_poll(&self, msg: MsgAnswerPoll, block_time: u64) -> Result<MsgResponse> {
        self.ensure_subspace(msg.subspace_id)?;

        self.store.transaction(|tx| {
            let post = Self::existing_post(tx, msg.subspace_id, msg.post_id)?;
            if !self.can(&post, &msg.signer, Permission::InteractWithContent) {
                return Err(PostsError::permission_denied(
                    "you cannot interact with content inside this subspace",
                ));
            }

            let poll = tx
                .poll(msg.subspace_id, msg.post_id, msg.poll_id)?
                .ok_or_else(|| {
                    PostsError::invalid_request(format!(
                        "poll with id {} does not exist",
                        msg.poll_id
                    ))
                })?;
            if block_time > poll.end_date {
                return Err(PostsError::invalid_request(
                    "the poll voting period has already ended",
                ));
            }

            let mut indexes = msg.answers_indexes.clone();
            indexes.sort_unstable();
            tx.save_user_answer(&UserAnswer::new(
                msg.subspace_id,
                msg.post_id,
                msg.poll_id,
                indexes,
                msg.signer.clone(),
            ))
        })?;

        Ok(MsgResponse::Empty)
    }

    // =========================================================================
    // Owner transfers
    // =========================================================================

    fn request_post_owner_transfer(&self, msg: MsgRequestPostOwnerTransfer) -> Result<MsgResponse> {
        if self
            .store
            .relationships()
            .has_user_blocked(&msg.receiver, &msg.sender, msg.subspace_id)
        {
            return Err(PostsError::invalid_request("receiver has blocked you"));
        }

        self.store.transaction(|tx| {
            let post = Self::existing_post(tx, msg.subspace_id, msg.post_id)?;
            if post.owner != msg.sender {
                return Err(PostsError::invalid_request(
                    "you cannot transfer a post that you do not own",
                ));
            }
            if tx.has_transfer_request(msg.subspace_id, msg.post_id)? {
                return Err(PostsError::invalid_request(
                    "post owner transfer request already exists",
                ));
            }
            tx.save_transfer_request(&PostOwnerTransferRequest::new(
                msg.subspace_id,
                msg.post_id,
                msg.sender.clone(),
                msg.receiver.clone(),
            ))
        })?;

        Ok(MsgResponse::Empty)
    }

    fn pending_request(
        tx: &Transaction<'_>,
        subspace_id: u64,
        post_id: u64,
    ) -> Result<PostOwnerTransferRequest> {
        tx.transfer_request(subspace_id, post_id)?.ok_or_else(|| {
            PostsError::invalid_request("post owner transfer request does not exists")
        })
    }

    fn cancel_post_owner_transfer(
        &self,
        msg: MsgCancelPostOwnerTransferRequest,
    ) -> Result<MsgResponse> {
        self.store.transaction(|tx| {
            let request = Self::pending_request(tx, msg.subspace_id, msg.post_id)?;
            if request.sender != msg.sender {
                return Err(PostsError::invalid_request(
                    "you cannot cancel a post owner transfer request that you are not the sender",
                ));
            }
            tx.delete_transfer_request(msg.subspace_id, msg.post_id)
        })?;
        Ok(MsgResponse::Empty)
    }

    fn accept_post_owner_transfer(
        &self,
        msg: MsgAcceptPostOwnerTransferRequest,
        block_time: u64,
    ) -> Result<MsgResponse> {
        self.store.transaction(|tx| {
            let request = Self::pending_request(tx, msg.subspace_id, msg.post_id)?;
            if request.receiver != msg.receiver {
                return Err(PostsError::invalid_request(
                    "you cannot accept a post owner transfer request that you are not the receiver",
                ));
            }

            let mut post = Self::existing_post(tx, msg.subspace_id, msg.post_id)?;
            if post.owner != request.sender {
                return Err(PostsError::invalid_request(
                    "the sender of the post owner transfer request does not own the post",
                ));
            }

            post.owner = msg.receiver.clone();
            post.last_edited_date = Some(block_time);
            tx.validate_post(&post)?;
            tx.save_post(&post)?;
            tx.delete_transfer_request(msg.subspace_id, msg.post_id)
        })?;

        info!(
            subspace_id = msg.subspace_id,
            post_id = msg.post_id,
            owner = %msg.receiver,
            "transferred post ownership"
        );
        Ok(MsgResponse::Empty)
    }

    fn refuse_post_owner_transfer(
        &self,
        msg: MsgRefusePostOwnerTransferRequest,
    ) -> Result<MsgResponse> {
        self.store.transaction(|tx| {
            let request = Self::pending_request(tx, msg.subspace_id, msg.post_id)?;
            if request.receiver != msg.receiver {
                return Err(PostsError::invalid_request(
                    "you cannot refuse a post owner transfer request that you are not the receiver",
                ));
            }
            tx.delete_transfer_request(msg.subspace_id, msg.post_id)
        })?;
        Ok(MsgResponse::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posts::attachment::{Poll, ProvidedAnswer};
    use crate::posts::keepers::{InMemoryRelationships, InMemorySubspaces};
    use crate::posts::types::ReplySetting;
    use crate::storage::RocksDbConfig;
    use tempfile::TempDir;

    fn user(n: u8) -> Address {
        Address::encode("cosmos", &[n; 20]).unwrap()
    }

    struct Fixture {
        handler: MsgHandler,
        subspaces: Arc<InMemorySubspaces>,
        relationships: Arc<InMemoryRelationships>,
        _temp: TempDir,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let relationships = Arc::new(InMemoryRelationships::new());
        let store = ContentStore::open(temp.path(), &RocksDbConfig::default())
            .unwrap()
            .with_relationships(relationships.clone());

        let subspaces = Arc::new(InMemorySubspaces::new());
        subspaces.add_subspace(1);
        for n in 1..=3 {
            for permission in [
                Permission::Write,
                Permission::EditOwnContent,
                Permission::InteractWithContent,
            ] {
                subspaces.grant(1, &user(n), permission);
            }
        }

        Fixture {
            handler: MsgHandler::new(Arc::new(store), subspaces.clone()),
            subspaces,
            relationships,
            _temp: temp,
        }
    }

    fn create_msg(author: Address) -> MsgCreatePost {
        MsgCreatePost {
            subspace_id: 1,
            section_id: 0,
            external_id: None,
            text: "Hello".to_string(),
            entities: None,
            tags: vec![],
            attachments: vec![],
            author,
            conversation_id: 0,
            reply_settings: ReplySetting::Everyone,
            referenced_posts: vec![],
        }
    }

    #[test]
    fn test_create_requires_write_permission() {
        let f = fixture();
        f.subspaces.revoke(1, &user(1), Permission::Write);
        let err = f
            .handler
            .handle(PostsMsg::CreatePost(create_msg(user(1))), 1_000)
            .unwrap_err();
        assert!(matches!(err, PostsError::PermissionDenied(_)));
    }

    #[test]
    fn test_unknown_subspace_rejected() {
        let f = fixture();
        let mut msg = create_msg(user(1));
        msg.subspace_id = 9;
        assert!(f.handler.handle(PostsMsg::CreatePost(msg), 1_000).is_err());
    }

    #[test]
    fn test_edit_post_by_non_owner_rejected() {
        let f = fixture();
        f.handler
            .handle(PostsMsg::CreatePost(create_msg(user(1))), 1_000)
            .unwrap();

        let edit = MsgEditPost {
            subspace_id: 1,
            post_id: 1,
            text: "Edited".to_string(),
            entities: None,
            tags: vec![],
            editor: user(2),
        };
        assert!(f.handler.handle(PostsMsg::EditPost(edit.clone()), 2_000).is_err());

        let edit = MsgEditPost {
            editor: user(1),
            ..edit
        };
        f.handler.handle(PostsMsg::EditPost(edit), 2_000).unwrap();
        let post = f.handler.store().get_post(1, 1).unwrap().unwrap();
        assert_eq!(post.text, "Edited");
        assert_eq!(post.last_edited_date, Some(2_000));
    }

    #[test]
    fn test_answer_poll_after_end_date_rejected() {
        let f = fixture();
        let poll = Poll::new(
            "Cat or dog?",
            vec![
                ProvidedAnswer::new("Cat", vec![]),
                ProvidedAnswer::new("Dog", vec![]),
            ],
            5_000,
            false,
            true,
            None,
        );
        let mut msg = create_msg(user(1));
        msg.attachments = vec![f.handler.store().registry().pack(&poll).unwrap()];
        f.handler.handle(PostsMsg::CreatePost(msg), 1_000).unwrap();

        let answer = MsgAnswerPoll {
            subspace_id: 1,
            post_id: 1,
            poll_id: 1,
            answers_indexes: vec![1],
            signer: user(2),
        };
        f.handler
            .handle(PostsMsg::AnswerPoll(answer.clone()), 4_000)
            .unwrap();
        assert!(f.handler.handle(PostsMsg::AnswerPoll(answer), 5_001).is_err());
    }

    #[test]
    fn test_owner_transfer_flow() {
        let f = fixture();
        f.handler
            .handle(PostsMsg::CreatePost(create_msg(user(1))), 1_000)
            .unwrap();

        let request = MsgRequestPostOwnerTransfer {
            subspace_id: 1,
            post_id: 1,
            receiver: user(2),
            sender: user(1),
        };
        f.handler
            .handle(PostsMsg::RequestPostOwnerTransfer(request.clone()), 1_500)
            .unwrap();
        assert!(f
            .handler
            .handle(PostsMsg::RequestPostOwnerTransfer(request), 1_600)
            .is_err());

        f.handler
            .handle(
                PostsMsg::AcceptPostOwnerTransferRequest(MsgAcceptPostOwnerTransferRequest {
                    subspace_id: 1,
                    post_id: 1,
                    receiver: user(2),
                }),
                2_000,
            )
            .unwrap();

        let post = f.handler.store().get_post(1, 1).unwrap().unwrap();
        assert_eq!(post.owner, user(2));
        assert_eq!(post.author, user(1));
        assert!(!f.handler.store().has_transfer_request(1, 1).unwrap());
    }

    #[test]
    fn test_blocked_sender_cannot_request_transfer() {
        let f = fixture();
        f.handler
            .handle(PostsMsg::CreatePost(create_msg(user(1))), 1_000)
            .unwrap();
        f.relationships.block(&user(2), &user(1), 1);

        let request = MsgRequestPostOwnerTransfer {
            subspace_id: 1,
            post_id: 1,
            receiver: user(2),
            sender: user(1),
        };
        assert!(f
            .handler
            .handle(PostsMsg::RequestPostOwnerTransfer(request), 1_500)
            .is_err());
    }
}
