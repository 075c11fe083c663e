//! Poll answers given by users.

use crate::error::Result;
use crate::posts::types::{Address, EntityKey, EntityKind, FieldError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The answer a user gave to a poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAnswer {
    pub subspace_id: u64,
    pub post_id: u64,
    pub poll_id: u32,
    /// Indexes of the selected provided answers.
    pub answers_indexes: Vec<u32>,
    pub user: Address,
}

impl UserAnswer {
    pub fn new(
        subspace_id: u64,
        post_id: u64,
        poll_id: u32,
        answers_indexes: Vec<u32>,
        user: Address,
    ) -> Self {
        Self {
            subspace_id,
            post_id,
            poll_id,
            answers_indexes,
            user,
        }
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::user_answer(self.subspace_id, self.post_id, self.poll_id, &self.user)
    }

    /// Checks the field-level invariants of the answer.
    ///
    /// Whether the indexes fit the poll is checked separately, see
    /// [`crate::posts::validation::check_user_answer_against_poll`].
    pub fn validate(&self) -> Result<()> {
        self.check_fields()
            .map_err(|e| e.into_error(EntityKind::UserAnswer, self.key()))
    }

    fn check_fields(&self) -> std::result::Result<(), FieldError> {
        if self.subspace_id == 0 {
            return Err(FieldError::new("subspace_id", "invalid subspace id: 0"));
        }
        if self.post_id == 0 {
            return Err(FieldError::new("post_id", "invalid post id: 0"));
        }
        if self.poll_id == 0 {
            return Err(FieldError::new("poll_id", "invalid poll id: 0"));
        }
        if self.answers_indexes.is_empty() {
            return Err(FieldError::new(
                "answers_indexes",
                "answer indexes cannot be empty",
            ));
        }

        let mut seen = HashSet::new();
        for index in &self.answers_indexes {
            if !seen.insert(*index) {
                return Err(FieldError::new(
                    "answers_indexes",
                    format!("duplicated answer index: {}", index),
                ));
            }
        }

        self.user
            .validate()
            .map_err(|e| FieldError::new("user", format!("invalid user address: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PostsError;

    fn user() -> Address {
        Address::encode("cosmos", &[3u8; 20]).unwrap()
    }

    fn field_of(answer: &UserAnswer) -> &'static str {
        match answer.validate().unwrap_err() {
            PostsError::InvalidArgument { field, .. } => field,
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_valid_answer() {
        assert!(UserAnswer::new(1, 1, 1, vec![0, 1], user()).validate().is_ok());
    }

    #[test]
    fn test_invalid_answers() {
        assert_eq!(field_of(&UserAnswer::new(0, 1, 1, vec![0], user())), "subspace_id");
        assert_eq!(field_of(&UserAnswer::new(1, 0, 1, vec![0], user())), "post_id");
        assert_eq!(field_of(&UserAnswer::new(1, 1, 0, vec![0], user())), "poll_id");
        assert_eq!(field_of(&UserAnswer::new(1, 1, 1, vec![], user())), "answers_indexes");
        assert_eq!(
            field_of(&UserAnswer::new(1, 1, 1, vec![1, 1], user())),
            "answers_indexes"
        );
        assert_eq!(
            field_of(&UserAnswer::new(1, 1, 1, vec![0], Address::new("user"))),
            "user"
        );
    }
}
