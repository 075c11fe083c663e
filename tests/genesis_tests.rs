//! Genesis export/import tests
//!
//! A store exported and re-imported into an empty database must reproduce
//! exactly the same state, and invalid states must be rejected as a whole.

use subspace_posts::posts::{
    Address, ContentStore, GenesisState, Media, Poll, Post, PostDataEntry,
    PostOwnerTransferRequest, ProvidedAnswer, ReplySetting, UserAnswer,
};
use subspace_posts::storage::RocksDbConfig;
use subspace_posts::PostsError;
use tempfile::TempDir;

fn create_test_store() -> (ContentStore, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let store = ContentStore::open(temp_dir.path(), &RocksDbConfig::default()).unwrap();
    (store, temp_dir)
}

fn address(n: u8) -> Address {
    Address::encode("cosmos", &[n; 20]).unwrap()
}

fn post(subspace_id: u64, text: &str) -> Post {
    Post {
        subspace_id,
        section_id: 0,
        id: 0,
        external_id: None,
        text: text.to_string(),
        entities: None,
        tags: vec!["genesis".to_string()],
        author: address(1),
        conversation_id: 0,
        referenced_posts: vec![],
        reply_settings: ReplySetting::Everyone,
        creation_date: 1_000,
        last_edited_date: None,
        owner: address(1),
    }
}

/// Fills a store with posts in two subspaces and two sections, a deleted
/// post, a running poll with answers and a pending transfer request.
fn populate(store: &ContentStore) {
    let media = store
        .registry()
        .pack(&Media::new("https://example.com/a.png", "image/png"))
        .unwrap();
    let poll = store
        .registry()
        .pack(&Poll::new(
            "Yes or no?",
            vec![ProvidedAnswer::new("Yes", vec![]), ProvidedAnswer::new("No", vec![])],
            50_000,
            false,
            true,
            None,
        ))
        .unwrap();

    let (first, _) = store.create_post(post(1, "first"), vec![media.clone()]).unwrap();
    let mut sectioned = post(1, "second");
    sectioned.section_id = 3;
    let (second, _) = store.create_post(sectioned, vec![poll]).unwrap();
    let (third, _) = store.create_post(post(1, "third"), vec![]).unwrap();
    store.create_post(post(2, "other subspace"), vec![media]).unwrap();

    store.delete_post(1, third).unwrap();
    store
        .save_user_answer(&UserAnswer::new(1, second, 1, vec![1], address(2)))
        .unwrap();
    store
        .save_transfer_request(&PostOwnerTransferRequest::new(1, first, address(1), address(4)))
        .unwrap();
}

#[test]
fn test_export_import_roundtrip() {
    let (source, _source_dir) = create_test_store();
    populate(&source);
    let exported = source.export_genesis().unwrap();

    assert_eq!(exported.posts.len(), 3);
    assert_eq!(exported.attachments.len(), 3);
    assert_eq!(exported.active_polls.len(), 1);
    assert_eq!(exported.user_answers.len(), 1);
    assert_eq!(exported.post_owner_transfer_requests.len(), 1);
    exported.validate(source.registry()).unwrap();

    let (target, target_dir) = create_test_store();
    target.import_genesis(&exported).unwrap();
    assert_eq!(target.export_genesis().unwrap(), exported);

    // The deleted post id stays burned after the import
    assert_eq!(target.next_post_id(1).unwrap(), 4);

    // Imported posts are reachable by section
    let ids = |posts: Vec<Post>| posts.iter().map(|p| p.id).collect::<Vec<_>>();
    assert_eq!(ids(target.section_posts(1, 3).unwrap()), vec![2]);
    assert_eq!(ids(target.section_posts(1, 0).unwrap()), vec![1]);
    assert_eq!(ids(target.section_posts(2, 0).unwrap()), vec![1]);

    // Through a file as well
    let file = target_dir.path().join("genesis.json");
    exported.save(&file).unwrap();
    assert_eq!(GenesisState::load(&file).unwrap(), exported);
}

#[test]
fn test_import_requires_empty_store() {
    let (source, _source_dir) = create_test_store();
    populate(&source);
    let exported = source.export_genesis().unwrap();

    assert!(matches!(
        source.import_genesis(&exported),
        Err(PostsError::InvalidRequest(_))
    ));
}

#[test]
fn test_invalid_genesis_writes_nothing() {
    let (source, _source_dir) = create_test_store();
    populate(&source);
    let mut state = source.export_genesis().unwrap();

    // Lower the attachment watermark of post 1 below its attachment id
    state.posts_data.retain(|entry| !(entry.subspace_id == 1 && entry.post_id == 1));
    state.posts_data.push(PostDataEntry::new(1, 1, 1));

    let (target, _target_dir) = create_test_store();
    assert!(target.import_genesis(&state).is_err());
    assert!(target.all_posts().unwrap().is_empty());
    assert_eq!(target.get_next_post_id(1).unwrap(), None);
}

#[test]
fn test_answer_to_missing_poll_is_rejected() {
    let (source, _source_dir) = create_test_store();
    populate(&source);
    let mut state = source.export_genesis().unwrap();
    state
        .user_answers
        .push(UserAnswer::new(1, 1, 1, vec![0], address(9)));

    assert!(state.validate(source.registry()).is_err());
}

#[test]
fn test_empty_genesis() {
    let (store, _temp) = create_test_store();
    let state = GenesisState::default();
    state.validate(store.registry()).unwrap();
    store.import_genesis(&state).unwrap();
    assert_eq!(store.export_genesis().unwrap(), state);
}
