//! Attachments and the built-in attachment content kinds.
//!
//! An [`Attachment`] belongs to a post and holds its payload as a
//! [`ContentEnvelope`]. The two built-in kinds are [`Media`] and [`Poll`].

use crate::error::Result;
use crate::posts::content::{ContentEnvelope, ContentKind, ContentRegistry};
use crate::posts::types::{EntityKey, EntityKind, FieldError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// An attachment of a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub subspace_id: u64,
    pub post_id: u64,
    /// Unique within the post, assigned by the allocator.
    pub id: u32,
    pub content: ContentEnvelope,
}

impl Attachment {
    pub fn new(subspace_id: u64, post_id: u64, id: u32, content: ContentEnvelope) -> Self {
        Self {
            subspace_id,
            post_id,
            id,
            content,
        }
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::attachment(self.subspace_id, self.post_id, self.id)
    }

    /// Checks the ids and the validity of the content.
    pub fn validate(&self, registry: &ContentRegistry) -> Result<()> {
        let fail = |field: &'static str, reason: String| {
            Err(FieldError::new(field, reason).into_error(EntityKind::Attachment, self.key()))
        };

        if self.subspace_id == 0 {
            return fail("subspace_id", format!("invalid subspace id: {}", self.subspace_id));
        }
        if self.post_id == 0 {
            return fail("post_id", format!("invalid post id: {}", self.post_id));
        }
        if self.id == 0 {
            return fail("id", format!("invalid attachment id: {}", self.id));
        }

        registry
            .validate_envelope(&self.content)
            .map_err(|e| e.into_error(EntityKind::Attachment, self.key()))
    }

    /// Returns true if the content is a poll.
    pub fn is_poll(&self, registry: &ContentRegistry) -> bool {
        registry
            .kind_of::<Poll>()
            .map_or(false, |kind| self.content.is_kind(kind))
    }

    /// Decodes the content as a poll, if it is one.
    pub fn poll(&self, registry: &ContentRegistry) -> Result<Option<Poll>> {
        registry.unpack_as::<Poll>(&self.content)
    }
}

// =============================================================================
// Media
// =============================================================================

/// A media file attached to a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    pub uri: String,
    pub mime_type: String,
}

impl Media {
    pub fn new(uri: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            mime_type: mime_type.into(),
        }
    }
}

impl ContentKind for Media {
    const KIND: &'static str = "media";

    fn validate(&self, _: &ContentRegistry) -> std::result::Result<(), FieldError> {
        if self.uri.trim().is_empty() {
            return Err(FieldError::new("uri", "uri cannot be empty or blank"));
        }
        if self.mime_type.trim().is_empty() {
            return Err(FieldError::new("mime_type", "mime type cannot be empty or blank"));
        }
        Ok(())
    }
}

// =============================================================================
// Poll
// =============================================================================

/// A poll attached to a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {
    pub question: String,
    /// The index of an answer is its position in this list.
    pub provided_answers: Vec<ProvidedAnswer>,
    /// End of the voting period, in milliseconds.
    pub end_date: u64,
    pub allows_multiple_answers: bool,
    pub allows_answer_edits: bool,
    /// Set once the voting period has ended.
    pub final_tally_results: Option<PollTallyResults>,
}

impl Poll {
    pub fn new(
        question: impl Into<String>,
        provided_answers: Vec<ProvidedAnswer>,
        end_date: u64,
        allows_multiple_answers: bool,
        allows_answer_edits: bool,
        final_tally_results: Option<PollTallyResults>,
    ) -> Self {
        Self {
            question: question.into(),
            provided_answers,
            end_date,
            allows_multiple_answers,
            allows_answer_edits,
            final_tally_results,
        }
    }

    /// Highest valid answer index.
    pub fn max_answer_index(&self) -> Option<u32> {
        self.provided_answers.len().checked_sub(1).map(|i| i as u32)
    }
}

impl ContentKind for Poll {
    const KIND: &'static str = "poll";

    fn validate(&self, registry: &ContentRegistry) -> std::result::Result<(), FieldError> {
        if self.question.trim().is_empty() {
            return Err(FieldError::new(
                "question",
                format!("invalid question: {:?}", self.question),
            ));
        }

        if self.provided_answers.len() < 2 {
            return Err(FieldError::new(
                "provided_answers",
                format!(
                    "insufficient amount of provided answers: {}",
                    self.provided_answers.len()
                ),
            ));
        }

        let mut texts = HashSet::new();
        for answer in &self.provided_answers {
            answer
                .validate(registry)
                .map_err(|e| e.nested("provided_answers"))?;

            if !texts.insert(answer.text.as_str()) {
                return Err(FieldError::new(
                    "provided_answers",
                    format!("duplicated provided answer: {}", answer.text),
                ));
            }
        }

        if self.end_date == 0 {
            return Err(FieldError::new("end_date", "invalid end date: 0"));
        }

        if let Some(results) = &self.final_tally_results {
            results
                .validate(self.provided_answers.len())
                .map_err(|e| e.nested("final_tally_results"))?;
        }

        Ok(())
    }
}

/// One of the answers a poll offers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvidedAnswer {
    pub text: String,
    /// Non-poll contents illustrating the answer.
    pub attachments: Vec<ContentEnvelope>,
}

impl ProvidedAnswer {
    pub fn new(text: impl Into<String>, attachments: Vec<ContentEnvelope>) -> Self {
        Self {
            text: text.into(),
            attachments,
        }
    }

    fn validate(&self, registry: &ContentRegistry) -> std::result::Result<(), FieldError> {
        if self.text.trim().is_empty() {
            return Err(FieldError::new("text", format!("invalid text: {:?}", self.text)));
        }

        let mut seen = Vec::with_capacity(self.attachments.len());
        for envelope in &self.attachments {
            let content = registry
                .unpack(envelope)
                .map_err(|e| FieldError::new("attachments", e))?;

            if content.is::<Poll>() {
                return Err(FieldError::new(
                    "attachments",
                    "cannot have a poll as an attachment of a poll's provided answer",
                ));
            }

            if seen.iter().any(|other| other == &content) {
                return Err(FieldError::new("attachments", "duplicated attachment"));
            }

            registry
                .validate(content.as_ref())
                .map_err(|e| e.nested("attachments"))?;
            seen.push(content);
        }

        Ok(())
    }
}

/// Final results of a poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollTallyResults {
    pub results: Vec<AnswerResult>,
}

impl PollTallyResults {
    pub fn new(results: Vec<AnswerResult>) -> Self {
        Self { results }
    }

    /// Votes received by the answer at `index`, if present.
    pub fn votes_for(&self, index: u32) -> Option<u64> {
        self.results
            .iter()
            .find(|r| r.answer_index == index)
            .map(|r| r.votes)
    }

    fn validate(&self, answers_count: usize) -> std::result::Result<(), FieldError> {
        if self.results.is_empty() {
            return Err(FieldError::new("results", "empty answer results"));
        }

        let mut indexes = HashSet::new();
        for result in &self.results {
            if !indexes.insert(result.answer_index) {
                return Err(FieldError::new(
                    "results",
                    format!("duplicated result for answer {}", result.answer_index),
                ));
            }
            if result.answer_index as usize >= answers_count {
                return Err(FieldError::new(
                    "results",
                    format!("invalid answer index: {}", result.answer_index),
                ));
            }
        }

        Ok(())
    }
}

/// Votes received by a single answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerResult {
    pub answer_index: u32,
    pub votes: u64,
}

impl AnswerResult {
    pub fn new(answer_index: u32, votes: u64) -> Self {
        Self {
            answer_index,
            votes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PostsError;

    fn registry() -> ContentRegistry {
        ContentRegistry::with_builtin_kinds()
    }

    fn poll() -> Poll {
        Poll::new(
            "What animal is best?",
            vec![
                ProvidedAnswer::new("Cat", vec![]),
                ProvidedAnswer::new("Dog", vec![]),
            ],
            1_700_000_000_000,
            false,
            false,
            None,
        )
    }

    #[test]
    fn test_media_validation() {
        let r = registry();
        assert!(Media::new("https://example.com/a.png", "image/png").validate(&r).is_ok());
        assert_eq!(Media::new("", "image/png").validate(&r).unwrap_err().field, "uri");
        assert_eq!(
            Media::new("https://example.com/a.png", " ").validate(&r).unwrap_err().field,
            "mime_type"
        );
    }

    #[test]
    fn test_poll_validation() {
        let r = registry();
        assert!(poll().validate(&r).is_ok());

        let mut p = poll();
        p.question = "  ".to_string();
        assert_eq!(p.validate(&r).unwrap_err().field, "question");

        let mut p = poll();
        p.provided_answers.truncate(1);
        assert_eq!(p.validate(&r).unwrap_err().field, "provided_answers");

        let mut p = poll();
        p.provided_answers[1].text = "Cat".to_string();
        assert!(p.validate(&r).unwrap_err().reason.contains("duplicated"));

        let mut p = poll();
        p.end_date = 0;
        assert_eq!(p.validate(&r).unwrap_err().field, "end_date");
    }

    #[test]
    fn test_tally_results_validation() {
        let r = registry();

        let mut p = poll();
        p.final_tally_results = Some(PollTallyResults::new(vec![]));
        assert_eq!(p.validate(&r).unwrap_err().field, "final_tally_results");

        p.final_tally_results = Some(PollTallyResults::new(vec![
            AnswerResult::new(0, 1),
            AnswerResult::new(0, 2),
        ]));
        assert!(p.validate(&r).is_err());

        p.final_tally_results = Some(PollTallyResults::new(vec![AnswerResult::new(5, 1)]));
        assert!(p.validate(&r).is_err());

        p.final_tally_results = Some(PollTallyResults::new(vec![
            AnswerResult::new(0, 3),
            AnswerResult::new(1, 2),
        ]));
        assert!(p.validate(&r).is_ok());
        assert_eq!(p.final_tally_results.unwrap().votes_for(1), Some(2));
    }

    #[test]
    fn test_provided_answer_attachments() {
        let r = registry();
        let media = r.pack(&Media::new("https://example.com/cat.png", "image/png")).unwrap();

        let mut p = poll();
        p.provided_answers[0].attachments = vec![media.clone()];
        assert!(p.validate(&r).is_ok());

        p.provided_answers[0].attachments = vec![media.clone(), media.clone()];
        assert!(p
            .validate(&r)
            .unwrap_err()
            .reason
            .contains("duplicated attachment"));

        let nested = r.pack(&poll()).unwrap();
        p.provided_answers[0].attachments = vec![nested];
        assert!(p.validate(&r).unwrap_err().reason.contains("cannot have a poll"));

        p.provided_answers[0].attachments = vec![ContentEnvelope::new("unknown", vec![])];
        assert!(p.validate(&r).is_err());
    }

    #[test]
    fn test_attachment_validation_carries_key() {
        let r = registry();
        let content = r.pack(&Media::new("", "image/png")).unwrap();
        let attachment = Attachment::new(1, 2, 3, content);
        match attachment.validate(&r).unwrap_err() {
            PostsError::InvalidArgument { entity, key, field, .. } => {
                assert_eq!(entity, EntityKind::Attachment);
                assert_eq!(key, EntityKey::attachment(1, 2, 3));
                assert_eq!(field, "uri");
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let content = r.pack(&poll()).unwrap();
        let attachment = Attachment::new(1, 2, 0, content);
        assert!(attachment.validate(&r).is_err());
    }

    #[test]
    fn test_attachment_poll_access() {
        let r = registry();
        let attachment = Attachment::new(1, 1, 1, r.pack(&poll()).unwrap());
        assert!(attachment.is_poll(&r));
        assert_eq!(attachment.poll(&r).unwrap(), Some(poll()));

        let media = Attachment::new(1, 1, 2, r.pack(&Media::new("a", "b")).unwrap());
        assert!(!media.is_poll(&r));
        assert_eq!(media.poll(&r).unwrap(), None);
    }
}
