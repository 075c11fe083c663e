//! # Subspace Posts
//!
//! Storage, content and migration core for posts published inside
//! multi-tenant subspaces.
//!
//! ## Features
//!
//! - **Polymorphic attachments**: an extensible registry of attachment content kinds
//!   (media and polls built in) with a self-describing wire envelope
//! - **Monotonic ids**: per-subspace post ids and per-post attachment ids that never
//!   go backwards, even after deletions
//! - **Section index**: posts listed per subspace section, with subspace and
//!   section removal cascading to every post they hold
//! - **Referential validation**: cross-entity checks applied on every write and on
//!   genesis import
//! - **Versioned migrations**: an explicit schema version with in-place, resumable
//!   upgrade steps
//!
//! ## Examples
//!
//! ```rust,no_run
//! use subspace_posts::posts::ContentStore;
//! use subspace_posts::storage::RocksDbConfig;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = ContentStore::open("data", &RocksDbConfig::default())?;
//! let post_id = store.next_post_id(1)?;
//! println!("next post id in subspace 1 is {}", post_id);
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod migrations;
pub mod posts;
pub mod storage;

pub use config::PostsConfig;
pub use error::{PostsError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
