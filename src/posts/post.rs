//! Posts and their field-level validation.

use crate::error::Result;
use crate::posts::types::{
    Address, EntityKey, EntityKind, FieldError, PostReferenceType, ReplySetting,
};
use serde::{Deserialize, Serialize};

/// A post inside a subspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub subspace_id: u64,
    /// Section of the subspace the post lives in (0 is the root section).
    pub section_id: u32,
    pub id: u64,
    /// Identifier of the post inside an external system.
    pub external_id: Option<String>,
    pub text: String,
    pub entities: Option<Entities>,
    pub tags: Vec<String>,
    pub author: Address,
    /// Id of the root post of the conversation, 0 if none.
    pub conversation_id: u64,
    pub referenced_posts: Vec<PostReference>,
    pub reply_settings: ReplySetting,
    pub creation_date: u64,
    pub last_edited_date: Option<u64>,
    /// Current owner. Equals the author until an ownership transfer.
    pub owner: Address,
}

impl Post {
    pub fn key(&self) -> EntityKey {
        EntityKey::post(self.subspace_id, self.id)
    }

    /// Checks the field-level invariants of the post.
    ///
    /// Referenced posts and the conversation root must have a lower id than
    /// the post itself.
    pub fn validate(&self) -> Result<()> {
        self.check_fields()
            .map_err(|e| e.into_error(EntityKind::Post, self.key()))
    }

    fn check_fields(&self) -> std::result::Result<(), FieldError> {
        if self.subspace_id == 0 {
            return Err(FieldError::new(
                "subspace_id",
                format!("invalid subspace id: {}", self.subspace_id),
            ));
        }

        if self.id == 0 {
            return Err(FieldError::new("id", format!("invalid post id: {}", self.id)));
        }

        if let Some(entities) = &self.entities {
            entities.validate().map_err(|e| e.nested("entities"))?;
        }

        if let Some(tag) = self.tags.iter().find(|t| t.trim().is_empty()) {
            return Err(FieldError::new("tags", format!("invalid post tag: {:?}", tag)));
        }

        self.author
            .validate()
            .map_err(|e| FieldError::new("author", format!("invalid author address: {}", e)))?;

        if self.conversation_id >= self.id {
            return Err(FieldError::new(
                "conversation_id",
                format!("invalid conversation id: {}", self.conversation_id),
            ));
        }

        for reference in &self.referenced_posts {
            reference
                .validate()
                .map_err(|e| e.nested("referenced_posts"))?;

            if reference.post_id >= self.id {
                return Err(FieldError::new(
                    "referenced_posts",
                    format!("invalid referenced post id: {}", reference.post_id),
                ));
            }
        }

        if self.reply_settings == ReplySetting::Unspecified {
            return Err(FieldError::new(
                "reply_settings",
                format!("invalid reply setting: {}", self.reply_settings),
            ));
        }

        if self.creation_date == 0 {
            return Err(FieldError::new("creation_date", "invalid post creation date: 0"));
        }

        if let Some(edited) = self.last_edited_date {
            if edited == 0 {
                return Err(FieldError::new(
                    "last_edited_date",
                    "invalid post last edited date: 0",
                ));
            }
            if edited < self.creation_date {
                return Err(FieldError::new(
                    "last_edited_date",
                    "last edited date cannot be before the creation date",
                ));
            }
        }

        self.owner
            .validate()
            .map_err(|e| FieldError::new("owner", format!("invalid owner address: {}", e)))?;

        Ok(())
    }

    /// Users mentioned inside the post text.
    pub fn mentioned_users(&self) -> impl Iterator<Item = Address> + '_ {
        self.entities
            .iter()
            .flat_map(|e| e.mentions.iter())
            .map(|m| Address::new(m.tag.clone()))
    }

    pub fn is_user_mentioned(&self, user: &Address) -> bool {
        self.mentioned_users().any(|m| &m == user)
    }

    /// Applies an edit without validating the result.
    pub fn update(&self, update: PostUpdate) -> Post {
        Post {
            text: update.text.unwrap_or_else(|| self.text.clone()),
            entities: update.entities,
            tags: update.tags,
            last_edited_date: Some(update.update_time),
            ..self.clone()
        }
    }
}

/// The editable part of a post.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PostUpdate {
    /// `None` keeps the current text.
    pub text: Option<String>,
    /// Always replaces the current entities.
    pub entities: Option<Entities>,
    /// Always replaces the current tags.
    pub tags: Vec<String>,
    pub update_time: u64,
}

/// A reference from a post to an older post of the same subspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostReference {
    pub reference_type: PostReferenceType,
    pub post_id: u64,
    /// Position of the quote inside the text. Only used by quotes.
    pub position: u64,
}

impl PostReference {
    pub fn new(reference_type: PostReferenceType, post_id: u64, position: u64) -> Self {
        Self {
            reference_type,
            post_id,
            position,
        }
    }

    fn validate(&self) -> std::result::Result<(), FieldError> {
        if self.reference_type == PostReferenceType::Unspecified {
            return Err(FieldError::new(
                "reference_type",
                format!("invalid reference type: {}", self.reference_type),
            ));
        }
        if self.post_id == 0 {
            return Err(FieldError::new("post_id", "invalid post id: 0"));
        }
        if self.reference_type != PostReferenceType::Quote && self.position > 0 {
            return Err(FieldError::new(
                "position",
                "reference position should be set only with quotes",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Entities
// =============================================================================

/// Hashtags, mentions and urls found inside a post text.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Entities {
    pub hashtags: Vec<TextTag>,
    pub mentions: Vec<TextTag>,
    pub urls: Vec<Url>,
}

impl Entities {
    pub fn new(hashtags: Vec<TextTag>, mentions: Vec<TextTag>, urls: Vec<Url>) -> Self {
        Self {
            hashtags,
            mentions,
            urls,
        }
    }

    fn validate(&self) -> std::result::Result<(), FieldError> {
        for tag in &self.hashtags {
            tag.validate().map_err(|e| e.nested("hashtags"))?;
        }
        for tag in &self.mentions {
            tag.validate().map_err(|e| e.nested("mentions"))?;
        }
        for url in &self.urls {
            url.validate().map_err(|e| e.nested("urls"))?;
        }

        let mut segments: Vec<(u64, u64)> = self
            .hashtags
            .iter()
            .chain(self.mentions.iter())
            .map(|t| (t.start, t.end))
            .chain(self.urls.iter().map(|u| (u.start, u.end)))
            .collect();

        if segments.is_empty() {
            return Err(FieldError::new(
                "entities",
                "entities must have at least one entity inside",
            ));
        }

        segments.sort_by_key(|(start, _)| *start);
        for pair in segments.windows(2) {
            let (first, second) = (pair[0], pair[1]);
            if first.1 >= second.0 {
                return Err(FieldError::new(
                    "entities",
                    format!("entities cannot overlap: start {} end {}", first.1, second.0),
                ));
            }
        }

        Ok(())
    }
}

/// A hashtag or mention spanning `start..=end` of the text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextTag {
    pub start: u64,
    pub end: u64,
    pub tag: String,
}

impl TextTag {
    pub fn new(start: u64, end: u64, tag: impl Into<String>) -> Self {
        Self {
            start,
            end,
            tag: tag.into(),
        }
    }

    fn validate(&self) -> std::result::Result<(), FieldError> {
        if self.start > self.end {
            return Err(FieldError::new(
                "start",
                format!("invalid start and end indexes: {} {}", self.start, self.end),
            ));
        }
        if self.tag.trim().is_empty() {
            return Err(FieldError::new("tag", "tag cannot be empty or blank"));
        }
        Ok(())
    }
}

/// A url spanning `start..=end` of the text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Url {
    pub start: u64,
    pub end: u64,
    pub url: String,
    pub display_url: String,
}

impl Url {
    pub fn new(
        start: u64,
        end: u64,
        url: impl Into<String>,
        display_url: impl Into<String>,
    ) -> Self {
        Self {
            start,
            end,
            url: url.into(),
            display_url: display_url.into(),
        }
    }

    fn validate(&self) -> std::result::Result<(), FieldError> {
        if self.start > self.end {
            return Err(FieldError::new(
                "start",
                format!("invalid start and end indexes: {} {}", self.start, self.end),
            ));
        }
        if self.url.trim().is_empty() {
            return Err(FieldError::new("url", format!("invalid url value: {:?}", self.url)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PostsError;

    fn address(n: u8) -> Address {
        Address::encode("cosmos", &[n; 20]).unwrap()
    }

    fn post() -> Post {
        Post {
            subspace_id: 1,
            section_id: 0,
            id: 3,
            external_id: Some("External ID".to_string()),
            text: "This is a text".to_string(),
            entities: None,
            tags: vec!["generic".to_string()],
            author: address(1),
            conversation_id: 1,
            referenced_posts: vec![PostReference::new(PostReferenceType::Quote, 1, 0)],
            reply_settings: ReplySetting::Everyone,
            creation_date: 1_600_000_000_000,
            last_edited_date: None,
            owner: address(1),
        }
    }

    fn field_of(err: PostsError) -> &'static str {
        match err {
            PostsError::InvalidArgument { field, .. } => field,
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_valid_post() {
        assert!(post().validate().is_ok());
    }

    #[test]
    fn test_forward_references_are_rejected() {
        let mut p = post();
        p.conversation_id = 3;
        assert_eq!(field_of(p.validate().unwrap_err()), "conversation_id");

        let mut p = post();
        p.referenced_posts = vec![PostReference::new(PostReferenceType::Reply, 4, 0)];
        assert_eq!(field_of(p.validate().unwrap_err()), "referenced_posts");
    }

    #[test]
    fn test_invalid_fields() {
        let mut p = post();
        p.subspace_id = 0;
        assert_eq!(field_of(p.validate().unwrap_err()), "subspace_id");

        let mut p = post();
        p.tags = vec![" ".to_string()];
        assert_eq!(field_of(p.validate().unwrap_err()), "tags");

        let mut p = post();
        p.author = Address::new("invalid");
        assert_eq!(field_of(p.validate().unwrap_err()), "author");

        let mut p = post();
        p.owner = Address::new("");
        assert_eq!(field_of(p.validate().unwrap_err()), "owner");

        let mut p = post();
        p.reply_settings = ReplySetting::Unspecified;
        assert_eq!(field_of(p.validate().unwrap_err()), "reply_settings");

        let mut p = post();
        p.creation_date = 0;
        assert_eq!(field_of(p.validate().unwrap_err()), "creation_date");

        let mut p = post();
        p.last_edited_date = Some(p.creation_date - 1);
        assert_eq!(field_of(p.validate().unwrap_err()), "last_edited_date");
    }

    #[test]
    fn test_reference_position_only_for_quotes() {
        let mut p = post();
        p.referenced_posts = vec![PostReference::new(PostReferenceType::Reply, 1, 10)];
        assert_eq!(field_of(p.validate().unwrap_err()), "referenced_posts");

        p.referenced_posts = vec![PostReference::new(PostReferenceType::Quote, 1, 10)];
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_entities() {
        let mut p = post();
        p.entities = Some(Entities::default());
        assert_eq!(field_of(p.validate().unwrap_err()), "entities");

        p.entities = Some(Entities::new(
            vec![TextTag::new(1, 3, "tag")],
            vec![TextTag::new(3, 5, "mention")],
            vec![],
        ));
        assert!(p.validate().is_err());

        p.entities = Some(Entities::new(
            vec![TextTag::new(1, 3, "tag")],
            vec![TextTag::new(4, 6, "mention")],
            vec![Url::new(7, 9, "https://example.com", "Example")],
        ));
        assert!(p.validate().is_ok());

        p.entities = Some(Entities::new(vec![TextTag::new(5, 3, "tag")], vec![], vec![]));
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_update_keeps_identity() {
        let p = post();
        let updated = p.update(PostUpdate {
            text: None,
            entities: None,
            tags: vec![],
            update_time: p.creation_date + 10,
        });
        assert_eq!(updated.id, p.id);
        assert_eq!(updated.text, p.text);
        assert!(updated.tags.is_empty());
        assert_eq!(updated.last_edited_date, Some(p.creation_date + 10));

        let updated = p.update(PostUpdate {
            text: Some("Edited".to_string()),
            update_time: p.creation_date + 20,
            ..Default::default()
        });
        assert_eq!(updated.text, "Edited");
    }

    #[test]
    fn test_mentions() {
        let mut p = post();
        let user = address(9);
        p.entities = Some(Entities::new(
            vec![],
            vec![TextTag::new(0, 4, user.to_string())],
            vec![],
        ));
        assert!(p.is_user_mentioned(&user));
        assert!(!p.is_user_mentioned(&address(8)));
    }
}
