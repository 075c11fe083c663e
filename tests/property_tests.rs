//! Property-style tests over randomly generated inputs
//!
//! These tests check invariants that must hold for any input: content survives
//! the envelope encoding, ids never go backwards whatever the sequence of
//! creations and deletions, and malformed bytes are rejected without panics.

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use subspace_posts::posts::{
    Address, AttachmentContent, ContentEnvelope, ContentKind, ContentRegistry, ContentStore,
    FieldError, Media, Poll, Post, ProvidedAnswer, ReplySetting,
};
use subspace_posts::storage::{decode, RocksDbConfig};
use subspace_posts::PostsError;
use tempfile::TempDir;

fn random_string<R: Rng>(rng: &mut R, max_len: usize) -> String {
    let len = rng.gen_range(1..=max_len);
    (0..len).map(|_| rng.gen_range('a'..='z')).collect()
}

fn random_poll<R: Rng>(rng: &mut R) -> Poll {
    let answers = (0..rng.gen_range(2..6))
        .map(|_| ProvidedAnswer::new(random_string(rng, 20), vec![]))
        .collect();
    Poll::new(
        random_string(rng, 50),
        answers,
        rng.gen_range(1..u64::MAX / 2),
        rng.gen(),
        rng.gen(),
        None,
    )
}

/// Property: packing then unpacking yields an equal value of the same kind
#[test]
fn property_envelope_preserves_content() {
    let registry = ContentRegistry::with_builtin_kinds();
    let mut rng = StdRng::seed_from_u64(7);

    for _ in 0..100 {
        let value: Box<dyn AttachmentContent> = if rng.gen_bool(0.5) {
            Box::new(Media::new(
                format!("https://example.com/{}", random_string(&mut rng, 30)),
                "image/png",
            ))
        } else {
            Box::new(random_poll(&mut rng))
        };

        let envelope = registry.pack(value.as_ref()).unwrap();
        assert_eq!(envelope.kind, value.kind());

        let unpacked = registry.unpack(&envelope).unwrap();
        assert!(
            *unpacked == *value,
            "Roundtrip property violated for kind {}",
            envelope.kind
        );
    }
}

/// Property: random envelope bytes are rejected, never panic
#[test]
fn property_garbage_envelopes_rejected() {
    let registry = ContentRegistry::with_builtin_kinds();
    let mut rng = StdRng::seed_from_u64(11);

    for _ in 0..300 {
        let len = rng.gen_range(0..64);
        let mut bytes = vec![0u8; len];
        rng.fill(&mut bytes[..]);
        let kind = if rng.gen_bool(0.5) { "media" } else { "poll" };

        let result = std::panic::catch_unwind(|| {
            let _ = registry.unpack(&ContentEnvelope::new(kind, bytes.clone()));
            let _ = decode::<Post>(&bytes);
        });
        assert!(result.is_ok(), "Malformed input caused a panic");
    }

    assert!(matches!(
        registry.unpack(&ContentEnvelope::new("unknown", vec![])),
        Err(PostsError::UnknownKind(_))
    ));
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Location {
    latitude: i32,
    longitude: i32,
}

impl ContentKind for Location {
    const KIND: &'static str = "location";

    fn validate(&self, _registry: &ContentRegistry) -> Result<(), FieldError> {
        if !(-90_000..=90_000).contains(&self.latitude) {
            return Err(FieldError::new("latitude", "out of range"));
        }
        Ok(())
    }
}

fn post(subspace_id: u64) -> Post {
    let author = Address::encode("cosmos", &[3; 20]).unwrap();
    Post {
        subspace_id,
        section_id: 0,
        id: 0,
        external_id: None,
        text: "Where am I?".to_string(),
        entities: None,
        tags: vec![],
        author: author.clone(),
        conversation_id: 0,
        referenced_posts: vec![],
        reply_settings: ReplySetting::Everyone,
        creation_date: 1_000,
        last_edited_date: None,
        owner: author,
    }
}

/// Property: kinds registered after the fact are stored and validated like built-in ones
#[test]
fn property_registered_kinds_are_first_class() {
    let mut registry = ContentRegistry::with_builtin_kinds();
    registry.register_kind::<Location>().unwrap();
    assert!(matches!(
        registry.register_kind::<Location>(),
        Err(PostsError::DuplicateKind(_))
    ));

    let temp_dir = TempDir::new().unwrap();
    let store = ContentStore::open(temp_dir.path(), &RocksDbConfig::default())
        .unwrap()
        .with_registry(Arc::new(registry));

    let here = Location {
        latitude: 45_000,
        longitude: 9_000,
    };
    let envelope = store.registry().pack(&here).unwrap();
    let (post_id, ids) = store.create_post(post(1), vec![envelope]).unwrap();

    let stored = store.get_attachment(1, post_id, ids[0]).unwrap().unwrap();
    assert_eq!(store.registry().unpack_as::<Location>(&stored.content).unwrap(), Some(here));
    assert_eq!(store.get_poll(1, post_id, ids[0]).unwrap(), None);

    let invalid = store
        .registry()
        .pack(&Location {
            latitude: 100_000,
            longitude: 0,
        })
        .unwrap();
    assert!(store.add_attachment(1, post_id, invalid, 2_000).is_err());
}

/// Property: whatever the interleaving of creations and deletions, every new
/// id is strictly greater than all ids handed out before
#[test]
fn property_ids_strictly_increase() {
    let temp_dir = TempDir::new().unwrap();
    let store = ContentStore::open(temp_dir.path(), &RocksDbConfig::default()).unwrap();
    let media = store
        .registry()
        .pack(&Media::new("https://example.com/x.png", "image/png"))
        .unwrap();
    let mut rng = StdRng::seed_from_u64(42);

    let mut last_post_id = [0u64; 3];
    let mut live: Vec<(u64, u64, u32)> = Vec::new();

    for _ in 0..200 {
        let subspace_id = rng.gen_range(1..=3u64);
        match rng.gen_range(0..4) {
            0 | 1 => {
                let (post_id, _) = store.create_post(post(subspace_id), vec![]).unwrap();
                let slot = (subspace_id - 1) as usize;
                assert!(post_id > last_post_id[slot]);
                last_post_id[slot] = post_id;
                live.push((subspace_id, post_id, 0));
            }
            2 if !live.is_empty() => {
                let index = rng.gen_range(0..live.len());
                let (s, p, last_attachment) = live[index];
                let attachment_id = store.add_attachment(s, p, media.clone(), 5_000).unwrap();
                assert!(attachment_id > last_attachment);
                live[index].2 = attachment_id;
                if rng.gen_bool(0.5) {
                    store.delete_attachment(s, p, attachment_id).unwrap();
                }
            }
            3 if !live.is_empty() => {
                let index = rng.gen_range(0..live.len());
                let (s, p, _) = live.swap_remove(index);
                assert!(store.delete_post(s, p).unwrap());
            }
            _ => {}
        }
    }

    for (slot, last) in last_post_id.iter().enumerate() {
        let next = store.get_next_post_id(slot as u64 + 1).unwrap().unwrap_or(1);
        assert!(next > *last);
    }
}
