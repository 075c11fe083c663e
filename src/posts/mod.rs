//! The posts module: data model, content registry and persistent store.
//!
//! ## Modules
//!
//! - `types`: addresses, enums and error context shared by every entity
//! - `post`, `attachment`, `answer`, `transfer`, `params`: entities and their field checks
//! - `content`: the attachment content registry and envelopes
//! - `keys`: store key layout
//! - `allocator`: per-scope monotonic id allocation
//! - `validation`: cross-entity invariant predicates
//! - `store`: the RocksDB-backed content store and its transactions
//! - `polls`: poll tallying and the active poll queue
//! - `genesis`: bulk export and import
//! - `hooks`, `keepers`: contracts with dependent and depended-upon services
//! - `msgs`, `handler`: messages and their in-process handler

pub mod allocator;
pub mod answer;
pub mod attachment;
pub mod content;
pub mod genesis;
pub mod handler;
pub mod hooks;
pub mod keepers;
pub mod keys;
pub mod msgs;
pub mod params;
pub mod polls;
pub mod post;
pub mod store;
pub mod transfer;
pub mod types;
pub mod validation;

pub use answer::UserAnswer;
pub use attachment::{AnswerResult, Attachment, Media, Poll, PollTallyResults, ProvidedAnswer};
pub use content::{
    global_registry, install_global_registry, AttachmentContent, ContentCodec, ContentEnvelope,
    ContentKind, ContentRegistry,
};
pub use genesis::{GenesisState, PostDataEntry, SubspaceDataEntry};
pub use handler::MsgHandler;
pub use hooks::{HookEvent, PostsHooks};
pub use keepers::{
    InMemoryRelationships, InMemorySubspaces, NoRelationships, Permission, RelationshipsKeeper,
    SubspacesKeeper,
};
pub use msgs::{MsgResponse, PostsMsg};
pub use params::Params;
pub use polls::ActivePoll;
pub use post::{Entities, Post, PostReference, PostUpdate, TextTag, Url};
pub use store::{ContentStore, Transaction};
pub use transfer::PostOwnerTransferRequest;
pub use types::{Address, EntityKey, EntityKind, FieldError, PostReferenceType, ReplySetting};
