//! Error types for post storage operations.

use crate::posts::types::{EntityKey, EntityKind};
use thiserror::Error;

/// Result type alias for post storage operations.
pub type Result<T> = std::result::Result<T, PostsError>;

/// Main error type for post storage operations.
#[derive(Error, Debug)]
pub enum PostsError {
    /// A field of an entity is malformed. Always detected before anything is persisted.
    #[error("Invalid {entity} ({key}): {field}: {reason}")]
    InvalidArgument {
        entity: EntityKind,
        key: EntityKey,
        field: &'static str,
        reason: String,
    },

    /// A content kind was registered twice.
    #[error("Content kind already registered: {0}")]
    DuplicateKind(String),

    /// An envelope or value refers to a content kind the registry does not know.
    #[error("Unknown content kind: {0}")]
    UnknownKind(String),

    /// The envelope bytes do not match the codec registered for its kind.
    #[error("Failed to decode {kind} content: {reason}")]
    Decode { kind: String, reason: String },

    /// The same composite key appears more than once.
    #[error("Duplicated {entity} ({key})")]
    DuplicateEntity { entity: EntityKind, key: EntityKey },

    /// An entity required by the operation does not exist.
    #[error("{entity} not found ({key})")]
    NotFound { entity: EntityKind, key: EntityKey },

    /// The request is well formed but cannot be applied to the current state.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The caller lacks the permission required by the request.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A schema migration step failed; the schema version was not advanced.
    #[error("Migration from schema version {from} failed: {reason}")]
    MigrationFailure { from: u32, reason: String },

    /// The persisted schema version does not match the one this build expects.
    #[error("Schema version mismatch: found {found:?}, expected {expected}")]
    SchemaMismatch { found: Option<u32>, expected: u32 },

    /// Storage backend errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PostsError {
    /// Creates a new invalid argument error for the given entity field.
    pub fn invalid<T: ToString>(
        entity: EntityKind,
        key: EntityKey,
        field: &'static str,
        reason: T,
    ) -> Self {
        Self::InvalidArgument {
            entity,
            key,
            field,
            reason: reason.to_string(),
        }
    }

    /// Creates a new duplicate entity error.
    pub fn duplicate(entity: EntityKind, key: EntityKey) -> Self {
        Self::DuplicateEntity { entity, key }
    }

    /// Creates a new not found error.
    pub fn not_found(entity: EntityKind, key: EntityKey) -> Self {
        Self::NotFound { entity, key }
    }

    /// Creates a new decode error for the given content kind.
    pub fn decode<K: ToString, T: ToString>(kind: K, reason: T) -> Self {
        Self::Decode {
            kind: kind.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Creates a new migration failure for the step starting at `from`.
    pub fn migration<T: ToString>(from: u32, reason: T) -> Self {
        Self::MigrationFailure {
            from,
            reason: reason.to_string(),
        }
    }

    /// Creates a new invalid request error.
    pub fn invalid_request<T: ToString>(msg: T) -> Self {
        Self::InvalidRequest(msg.to_string())
    }

    /// Creates a new permission denied error.
    pub fn permission_denied<T: ToString>(msg: T) -> Self {
        Self::PermissionDenied(msg.to_string())
    }

    /// Creates a new storage error.
    pub fn storage<T: ToString>(msg: T) -> Self {
        Self::Storage(msg.to_string())
    }

    /// Creates a new serialization error.
    pub fn serialization<T: ToString>(msg: T) -> Self {
        Self::Serialization(msg.to_string())
    }

    /// Creates a new configuration error.
    pub fn config<T: ToString>(msg: T) -> Self {
        Self::Config(msg.to_string())
    }

    /// Returns true for errors caused by malformed input rather than by state or storage.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument { .. }
                | Self::UnknownKind(_)
                | Self::Decode { .. }
                | Self::DuplicateEntity { .. }
        )
    }
}
