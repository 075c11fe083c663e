//! Requests accepted by the posts message handler.
//!
//! Each message carries the signer and has a stateless `validate` that runs
//! before any store access.

use crate::error::{PostsError, Result};
use crate::posts::content::ContentEnvelope;
use crate::posts::post::{Entities, PostReference};
use crate::posts::types::{Address, ReplySetting};
use serde::{Deserialize, Serialize};

fn require_id(value: u64, what: &str) -> Result<()> {
    if value == 0 {
        return Err(PostsError::invalid_request(format!("invalid {} id: 0", what)));
    }
    Ok(())
}

fn require_address(address: &Address, what: &str) -> Result<()> {
    address
        .validate()
        .map_err(|e| PostsError::invalid_request(format!("invalid {} address: {}", what, e)))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgCreatePost {
    pub subspace_id: u64,
    pub section_id: u32,
    pub external_id: Option<String>,
    pub text: String,
    pub entities: Option<Entities>,
    pub tags: Vec<String>,
    pub attachments: Vec<ContentEnvelope>,
    pub author: Address,
    pub conversation_id: u64,
    pub reply_settings: ReplySetting,
    pub referenced_posts: Vec<PostReference>,
}

impl MsgCreatePost {
    pub fn validate(&self) -> Result<()> {
        require_id(self.subspace_id, "subspace")?;
        if self.reply_settings == ReplySetting::Unspecified {
            return Err(PostsError::invalid_request("invalid reply setting"));
        }
        if let Some(envelope) = self.attachments.iter().find(|a| a.kind.is_empty()) {
            return Err(PostsError::invalid_request(format!(
                "invalid attachment content: {:?}",
                envelope
            )));
        }
        require_address(&self.author, "author")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgEditPost {
    pub subspace_id: u64,
    pub post_id: u64,
    pub text: String,
    pub entities: Option<Entities>,
    pub tags: Vec<String>,
    pub editor: Address,
}

impl MsgEditPost {
    pub fn validate(&self) -> Result<()> {
        require_id(self.subspace_id, "subspace")?;
        require_id(self.post_id, "post")?;
        require_address(&self.editor, "editor")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgDeletePost {
    pub subspace_id: u64,
    pub post_id: u64,
    pub signer: Address,
}

impl MsgDeletePost {
    pub fn validate(&self) -> Result<()> {
        require_id(self.subspace_id, "subspace")?;
        require_id(self.post_id, "post")?;
        require_address(&self.signer, "signer")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgAddPostAttachment {
    pub subspace_id: u64,
    pub post_id: u64,
    pub content: ContentEnvelope,
    pub editor: Address,
}

impl MsgAddPostAttachment {
    pub fn validate(&self) -> Result<()> {
        require_id(self.subspace_id, "subspace")?;
        require_id(self.post_id, "post")?;
        if self.content.kind.is_empty() {
            return Err(PostsError::invalid_request("invalid attachment content"));
        }
        require_address(&self.editor, "editor")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgRemovePostAttachment {
    pub subspace_id: u64,
    pub post_id: u64,
    pub attachment_id: u32,
    pub editor: Address,
}

impl MsgRemovePostAttachment {
    pub fn validate(&self) -> Result<()> {
        require_id(self.subspace_id, "subspace")?;
        require_id(self.post_id, "post")?;
        require_id(self.attachment_id as u64, "attachment")?;
        require_address(&self.editor, "editor")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgAnswerPoll {
    pub subspace_id: u64,
    pub post_id: u64,
    pub poll_id: u32,
    pub answers_indexes: Vec<u32>,
    pub signer: Address,
}

impl MsgAnswerPoll {
    pub fn validate(&self) -> Result<()> {
        require_id(self.subspace_id, "subspace")?;
        require_id(self.post_id, "post")?;
        require_id(self.poll_id as u64, "poll")?;
        if self.answers_indexes.is_empty() {
            return Err(PostsError::invalid_request("answer indexes cannot be empty"));
        }
        require_address(&self.signer, "signer")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgRequestPostOwnerTransfer {
    pub subspace_id: u64,
    pub post_id: u64,
    pub receiver: Address,
    pub sender: Address,
}

impl MsgRequestPostOwnerTransfer {
    pub fn validate(&self) -> Result<()> {
        require_id(self.subspace_id, "subspace")?;
        require_id(self.post_id, "post")?;
        require_address(&self.receiver, "receiver")?;
        require_address(&self.sender, "sender")?;
        if self.sender == self.receiver {
            return Err(PostsError::invalid_request("receiver cannot be the same as sender"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgCancelPostOwnerTransferRequest {
    pub subspace_id: u64,
    pub post_id: u64,
    pub sender: Address,
}

impl MsgCancelPostOwnerTransferRequest {
    pub fn validate(&self) -> Result<()> {
        require_id(self.subspace_id, "subspace")?;
        require_id(self.post_id, "post")?;
        require_address(&self.sender, "sender")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgAcceptPostOwnerTransferRequest {
    pub subspace_id: u64,
    pub post_id: u64,
    pub receiver: Address,
}

impl MsgAcceptPostOwnerTransferRequest {
    pub fn validate(&self) -> Result<()> {
        require_id(self.subspace_id, "subspace")?;
        require_id(self.post_id, "post")?;
        require_address(&self.receiver, "receiver")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgRefusePostOwnerTransferRequest {
    pub subspace_id: u64,
    pub post_id: u64,
    pub receiver: Address,
}

impl MsgRefusePostOwnerTransferRequest {
    pub fn validate(&self) -> Result<()> {
        require_id(self.subspace_id, "subspace")?;
        require_id(self.post_id, "post")?;
        require_address(&self.receiver, "receiver")
    }
}

/// Any message the handler accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PostsMsg {
    CreatePost(MsgCreatePost),
    EditPost(MsgEditPost),
    DeletePost(MsgDeletePost),
    AddPostAttachment(MsgAddPostAttachment),
    RemovePostAttachment(MsgRemovePostAttachment),
    AnswerPoll(MsgAnswerPoll),
    RequestPostOwnerTransfer(MsgRequestPostOwnerTransfer),
    CancelPostOwnerTransferRequest(MsgCancelPostOwnerTransferRequest),
    AcceptPostOwnerTransferRequest(MsgAcceptPostOwnerTransferRequest),
    RefusePostOwnerTransferRequest(MsgRefusePostOwnerTransferRequest),
}

impl PostsMsg {
    pub fn validate(&self) -> Result<()> {
        match self {
            PostsMsg::CreatePost(msg) => msg.validate(),
            PostsMsg::EditPost(msg) => msg.validate(),
            PostsMsg::DeletePost(msg) => msg.validate(),
            PostsMsg::AddPostAttachment(msg) => msg.validate(),
            PostsMsg::RemovePostAttachment(msg) => msg.validate(),
            PostsMsg::AnswerPoll(msg) => msg.validate(),
            PostsMsg::RequestPostOwnerTransfer(msg) => msg.validate(),
            PostsMsg::CancelPostOwnerTransferRequest(msg) => msg.validate(),
            PostsMsg::AcceptPostOwnerTransferRequest(msg) => msg.validate(),
            PostsMsg::RefusePostOwnerTransferRequest(msg) => msg.validate(),
        }
    }
}

/// Result of a handled message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MsgResponse {
    CreatePost {
        post_id: u64,
        attachment_ids: Vec<u32>,
        creation_date: u64,
    },
    EditPost {
        edit_date: u64,
    },
    AddPostAttachment {
        attachment_id: u32,
        edit_date: u64,
    },
    RemovePostAttachment {
        edit_date: u64,
    },
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(n: u8) -> Address {
        Address::encode("cosmos", &[n; 20]).unwrap()
    }

    #[test]
    fn test_transfer_to_self_rejected() {
        let msg = MsgRequestPostOwnerTransfer {
            subspace_id: 1,
            post_id: 1,
            receiver: user(1),
            sender: user(1),
        };
        assert!(msg.validate().is_err());
    }

    #[test]
    fn test_zero_ids_rejected() {
        let msg = PostsMsg::DeletePost(MsgDeletePost {
            subspace_id: 0,
            post_id: 1,
            signer: user(1),
        });
        assert!(msg.validate().is_err());

        let msg = PostsMsg::AnswerPoll(MsgAnswerPoll {
            subspace_id: 1,
            post_id: 1,
            poll_id: 0,
            answers_indexes: vec![0],
            signer: user(1),
        });
        assert!(msg.validate().is_err());
    }

    #[test]
    fn test_msg_json_is_tagged() {
        let msg = PostsMsg::RefusePostOwnerTransferRequest(MsgRefusePostOwnerTransferRequest {
            subspace_id: 1,
            post_id: 2,
            receiver: user(3),
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"refuse_post_owner_transfer_request\""));
        assert_eq!(serde_json::from_str::<PostsMsg>(&json).unwrap(), msg);
    }
}
