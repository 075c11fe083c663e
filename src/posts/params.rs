//! Module parameters.

use crate::error::{PostsError, Result};
use crate::posts::types::{EntityKey, EntityKind};
use serde::{Deserialize, Serialize};

/// Default maximum length of a post text, in bytes.
pub const DEFAULT_MAX_TEXT_LENGTH: u32 = 500;

/// Parameters of the posts module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params {
    pub max_text_length: u32,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            max_text_length: DEFAULT_MAX_TEXT_LENGTH,
        }
    }
}

impl Params {
    pub fn new(max_text_length: u32) -> Self {
        Self { max_text_length }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_text_length == 0 {
            return Err(PostsError::invalid(
                EntityKind::Params,
                EntityKey::Module,
                "max_text_length",
                "max text length must be greater than zero",
            ));
        }
        Ok(())
    }
}
