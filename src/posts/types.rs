//! Shared primitive types for the posts module.
//!
//! This module contains the small value types every entity relies on:
//! - `Address`: a bech32 account address
//! - `ReplySetting` / `PostReferenceType`: enumerations persisted with posts
//! - `EntityKind` / `EntityKey`: structured error context

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Address
// =============================================================================

/// A bech32 encoded account address.
///
/// Addresses are stored as given; [`Address::validate`] checks the encoding.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Wraps an address string without validating it.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Encodes raw account bytes under the given human readable part.
    pub fn encode(hrp: &str, bytes: &[u8]) -> Result<Self, String> {
        let hrp = bech32::Hrp::parse(hrp).map_err(|e| format!("invalid prefix: {}", e))?;
        bech32::encode::<bech32::Bech32>(hrp, bytes)
            .map(Self)
            .map_err(|e| format!("failed to encode address: {}", e))
    }

    /// Checks that this is a well formed bech32 address carrying some data.
    pub fn validate(&self) -> Result<(), String> {
        if self.0.trim().is_empty() {
            return Err("empty address string is not allowed".to_string());
        }
        let (_, data) =
            bech32::decode(&self.0).map_err(|e| format!("decoding bech32 failed: {}", e))?;
        if data.is_empty() {
            return Err("address carries no data".to_string());
        }
        Ok(())
    }

    /// Returns the address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the address bytes used inside store keys.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Address {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// =============================================================================
// Enumerations
// =============================================================================

/// Who is allowed to reply to a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum ReplySetting {
    /// Not set. Never valid on a stored post.
    #[default]
    Unspecified = 0,
    /// Everyone can reply.
    Everyone = 1,
    /// Only followers of the owner can reply.
    Followers = 2,
    /// Only mutual connections of the owner can reply.
    Mutual = 3,
    /// Only users mentioned in the post can reply.
    Mentions = 4,
}

impl fmt::Display for ReplySetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplySetting::Unspecified => write!(f, "Unspecified"),
            ReplySetting::Everyone => write!(f, "Everyone"),
            ReplySetting::Followers => write!(f, "Followers"),
            ReplySetting::Mutual => write!(f, "Mutual"),
            ReplySetting::Mentions => write!(f, "Mentions"),
        }
    }
}

/// The way a post refers to another post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum PostReferenceType {
    /// Not set. Never valid on a stored reference.
    #[default]
    Unspecified = 0,
    /// The post replies to the referenced post.
    Reply = 1,
    /// The post quotes the referenced post.
    Quote = 2,
    /// The post reposts the referenced post.
    Repost = 3,
}

impl fmt::Display for PostReferenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostReferenceType::Unspecified => write!(f, "Unspecified"),
            PostReferenceType::Reply => write!(f, "Reply"),
            PostReferenceType::Quote => write!(f, "Quote"),
            PostReferenceType::Repost => write!(f, "Repost"),
        }
    }
}

// =============================================================================
// Error Context
// =============================================================================

/// A field-level validation failure, before the entity context is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub reason: String,
}

impl FieldError {
    pub fn new<T: ToString>(field: &'static str, reason: T) -> Self {
        Self {
            field,
            reason: reason.to_string(),
        }
    }

    /// Reports the failure under `parent`, keeping the inner field in the reason.
    pub fn nested(self, parent: &'static str) -> Self {
        Self {
            field: parent,
            reason: format!("{}: {}", self.field, self.reason),
        }
    }

    /// Attaches the entity context.
    pub fn into_error(self, entity: EntityKind, key: EntityKey) -> crate::error::PostsError {
        crate::error::PostsError::invalid(entity, key, self.field, self.reason)
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// The kind of entity an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Post,
    Attachment,
    UserAnswer,
    TransferRequest,
    /// Next post id entry of a subspace.
    SubspaceData,
    /// Next attachment id entry of a post.
    PostData,
    ActivePoll,
    Params,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Post => write!(f, "post"),
            EntityKind::Attachment => write!(f, "attachment"),
            EntityKind::UserAnswer => write!(f, "user answer"),
            EntityKind::TransferRequest => write!(f, "post owner transfer request"),
            EntityKind::SubspaceData => write!(f, "subspace data"),
            EntityKind::PostData => write!(f, "post data"),
            EntityKind::ActivePoll => write!(f, "active poll"),
            EntityKind::Params => write!(f, "params"),
        }
    }
}

/// The composite key of the entity an error refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityKey {
    /// Module-wide entries such as params.
    Module,
    Subspace(u64),
    Post {
        subspace_id: u64,
        post_id: u64,
    },
    Attachment {
        subspace_id: u64,
        post_id: u64,
        attachment_id: u32,
    },
    UserAnswer {
        subspace_id: u64,
        post_id: u64,
        poll_id: u32,
        user: Address,
    },
}

impl EntityKey {
    pub fn subspace(subspace_id: u64) -> Self {
        Self::Subspace(subspace_id)
    }

    pub fn post(subspace_id: u64, post_id: u64) -> Self {
        Self::Post {
            subspace_id,
            post_id,
        }
    }

    pub fn attachment(subspace_id: u64, post_id: u64, attachment_id: u32) -> Self {
        Self::Attachment {
            subspace_id,
            post_id,
            attachment_id,
        }
    }

    pub fn user_answer(subspace_id: u64, post_id: u64, poll_id: u32, user: &Address) -> Self {
        Self::UserAnswer {
            subspace_id,
            post_id,
            poll_id,
            user: user.clone(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Module => write!(f, "module"),
            EntityKey::Subspace(subspace_id) => write!(f, "subspace {}", subspace_id),
            EntityKey::Post {
                subspace_id,
                post_id,
            } => write!(f, "subspace {}, post {}", subspace_id, post_id),
            EntityKey::Attachment {
                subspace_id,
                post_id,
                attachment_id,
            } => write!(
                f,
                "subspace {}, post {}, attachment {}",
                subspace_id, post_id, attachment_id
            ),
            EntityKey::UserAnswer {
                subspace_id,
                post_id,
                poll_id,
                user,
            } => write!(
                f,
                "subspace {}, post {}, poll {}, user {}",
                subspace_id, post_id, poll_id, user
            ),
        }
    }
}
