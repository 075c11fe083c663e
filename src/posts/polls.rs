//! Poll tallying and the active poll queue.
//!
//! Polls without final results are indexed by end date under the active poll
//! queue prefix. Ending a poll counts its answers, stores the results inside
//! the poll, deletes the answers and drops the poll from the queue.

use crate::error::{PostsError, Result};
use crate::posts::answer::UserAnswer;
use crate::posts::attachment::{AnswerResult, Poll, PollTallyResults};
use crate::posts::hooks::HookEvent;
use crate::posts::keys;
use crate::posts::store::{poll_of, ContentStore, Transaction};
use crate::posts::types::{EntityKey, EntityKind};
use crate::storage::CF_POSTS;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// An entry of the active poll queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActivePoll {
    pub subspace_id: u64,
    pub post_id: u64,
    pub poll_id: u32,
    pub end_date: u64,
}

impl ActivePoll {
    pub fn new(subspace_id: u64, post_id: u64, poll_id: u32, end_date: u64) -> Self {
        Self {
            subspace_id,
            post_id,
            poll_id,
            end_date,
        }
    }

    fn from_queue_key(key: &[u8]) -> Option<Self> {
        let (end_date, subspace_id, post_id, poll_id) = keys::parse_active_poll_queue_key(key)?;
        Some(Self::new(subspace_id, post_id, poll_id, end_date))
    }

    pub fn queue_key(&self) -> Vec<u8> {
        keys::active_poll_queue_key(self.end_date, self.subspace_id, self.post_id, self.poll_id)
    }
}

/// Counts the votes of every provided answer, including those nobody picked.
pub fn count_votes(poll: &Poll, answers: &[UserAnswer]) -> PollTallyResults {
    let mut votes = vec![0u64; poll.provided_answers.len()];
    for answer in answers {
        for index in &answer.answers_indexes {
            if let Some(count) = votes.get_mut(*index as usize) {
                *count += 1;
            }
        }
    }

    PollTallyResults::new(
        votes
            .into_iter()
            .enumerate()
            .map(|(index, count)| AnswerResult::new(index as u32, count))
            .collect(),
    )
}

impl Transaction<'_> {
    /// Ends the voting period of a poll and stores its final results.
    pub fn end_poll(
        &mut self,
        subspace_id: u64,
        post_id: u64,
        poll_id: u32,
    ) -> Result<PollTallyResults> {
        let mut attachment = self.attachment(subspace_id, post_id, poll_id)?.ok_or_else(|| {
            PostsError::not_found(
                EntityKind::Attachment,
                EntityKey::attachment(subspace_id, post_id, poll_id),
            )
        })?;

        let mut poll = poll_of(self.registry, &attachment)?.ok_or_else(|| {
            PostsError::invalid_request(format!("attachment {} is not a poll", poll_id))
        })?;
        if poll.final_tally_results.is_some() {
            return Err(PostsError::invalid_request(format!(
                "poll {} has already ended",
                poll_id
            )));
        }

        let answers: Vec<UserAnswer> =
            self.collect(&keys::poll_answers_prefix(subspace_id, post_id, poll_id))?;
        let results = count_votes(&poll, &answers);

        for answer in &answers {
            self.delete_user_answer(subspace_id, post_id, poll_id, &answer.user)?;
        }

        poll.final_tally_results = Some(results.clone());
        attachment.content = self.registry.pack(&poll)?;
        self.save_attachment(&attachment)?;

        debug!(
            subspace_id = subspace_id,
            post_id = post_id,
            poll_id = poll_id,
            answers = answers.len(),
            "poll ended"
        );
        self.events.push(HookEvent::PollVotingPeriodEnded {
            subspace_id,
            post_id,
            poll_id,
        });
        Ok(results)
    }

    /// Queue entries ending at or before `block_time`, including staged changes.
    pub fn expired_polls(&self, block_time: u64) -> Result<Vec<ActivePoll>> {
        let entries = self.db.prefix_entries_staged(
            &self.ws,
            CF_POSTS,
            &[keys::ACTIVE_POLL_QUEUE_PREFIX],
        )?;

        Ok(entries
            .iter()
            .filter_map(|(key, _)| ActivePoll::from_queue_key(key))
            .take_while(|poll| poll.end_date <= block_time)
            .collect())
    }
}

impl ContentStore {
    /// Counts the answers given so far to a poll, without ending it.
    pub fn tally_poll(
        &self,
        subspace_id: u64,
        post_id: u64,
        poll_id: u32,
    ) -> Result<Option<PollTallyResults>> {
        let poll = match self.get_poll(subspace_id, post_id, poll_id)? {
            Some(poll) => poll,
            None => return Ok(None),
        };
        let answers = self.poll_user_answers(subspace_id, post_id, poll_id)?;
        Ok(Some(count_votes(&poll, &answers)))
    }

    pub fn end_poll(
        &self,
        subspace_id: u64,
        post_id: u64,
        poll_id: u32,
    ) -> Result<PollTallyResults> {
        self.transaction(|tx| tx.end_poll(subspace_id, post_id, poll_id))
    }

    /// Ends every poll whose end date is not after `block_time`.
    ///
    /// Returns the polls that were ended, in end date order.
    pub fn end_expired_polls(&self, block_time: u64) -> Result<Vec<ActivePoll>> {
        let ended = self.transaction(|tx| {
            let expired = tx.expired_polls(block_time)?;
            for poll in &expired {
                tx.end_poll(poll.subspace_id, poll.post_id, poll.poll_id)?;
            }
            Ok(expired)
        })?;

        if !ended.is_empty() {
            info!(block_time = block_time, ended = ended.len(), "ended expired polls");
        }
        Ok(ended)
    }

    /// Visits the queue entries ending at or before `end_time`, in end date order.
    pub fn iterate_active_polls_queue<F>(&self, end_time: u64, mut callback: F) -> Result<()>
    where
        F: FnMut(&ActivePoll) -> bool,
    {
        self.db()
            .prefix_iterate(CF_POSTS, &[keys::ACTIVE_POLL_QUEUE_PREFIX], |key, _| {
                match ActivePoll::from_queue_key(key) {
                    Some(poll) if poll.end_date <= end_time => callback(&poll),
                    Some(_) => false,
                    None => true,
                }
            })
    }

    /// Returns every entry of the active poll queue, in end date order.
    pub fn active_polls(&self) -> Result<Vec<ActivePoll>> {
        let mut polls = Vec::new();
        self.iterate_active_polls_queue(u64::MAX, |poll| {
            polls.push(*poll);
            true
        })?;
        Ok(polls)
    }

    pub fn is_active_poll(&self, subspace_id: u64, post_id: u64, poll_id: u32) -> Result<bool> {
        match self.get_poll(subspace_id, post_id, poll_id)? {
            Some(poll) => self.db().exists(
                CF_POSTS,
                &keys::active_poll_queue_key(poll.end_date, subspace_id, post_id, poll_id),
            ),
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posts::attachment::ProvidedAnswer;
    use crate::posts::post::Post;
    use crate::posts::types::{Address, ReplySetting};
    use crate::storage::RocksDbConfig;
    use tempfile::TempDir;

    fn user(n: u8) -> Address {
        Address::encode("cosmos", &[n; 20]).unwrap()
    }

    fn poll(end_date: u64, allows_multiple_answers: bool) -> Poll {
        Poll::new(
            "What animal is best?",
            vec![
                ProvidedAnswer::new("Cat", vec![]),
                ProvidedAnswer::new("Dog", vec![]),
                ProvidedAnswer::new("Owl", vec![]),
            ],
            end_date,
            allows_multiple_answers,
            false,
            None,
        )
    }

    fn store_with_poll(end_date: u64) -> (ContentStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = ContentStore::open(temp_dir.path(), &RocksDbConfig::default()).unwrap();
        let post = Post {
            subspace_id: 1,
            section_id: 0,
            id: 0,
            external_id: None,
            text: "Vote".to_string(),
            entities: None,
            tags: vec![],
            author: user(1),
            conversation_id: 0,
            referenced_posts: vec![],
            reply_settings: ReplySetting::Everyone,
            creation_date: 1_000,
            last_edited_date: None,
            owner: user(1),
        };
        let envelope = store.registry().pack(&poll(end_date, true)).unwrap();
        store.create_post(post, vec![envelope]).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_count_votes_includes_zero_counts() {
        let answers = vec![
            UserAnswer::new(1, 1, 1, vec![0, 1], user(1)),
            UserAnswer::new(1, 1, 1, vec![0], user(2)),
        ];
        let results = count_votes(&poll(10, true), &answers);
        assert_eq!(results.results.len(), 3);
        assert_eq!(results.votes_for(0), Some(2));
        assert_eq!(results.votes_for(1), Some(1));
        assert_eq!(results.votes_for(2), Some(0));
    }

    #[test]
    fn test_new_poll_is_queued() {
        let (store, _temp) = store_with_poll(5_000);
        assert!(store.is_active_poll(1, 1, 1).unwrap());
        assert_eq!(store.active_polls().unwrap(), vec![ActivePoll::new(1, 1, 1, 5_000)]);
    }

    #[test]
    fn test_end_expired_polls() {
        let (store, _temp) = store_with_poll(5_000);
        store
            .save_user_answer(&UserAnswer::new(1, 1, 1, vec![0, 2], user(2)))
            .unwrap();
        store
            .save_user_answer(&UserAnswer::new(1, 1, 1, vec![2], user(3)))
            .unwrap();

        assert!(store.end_expired_polls(4_999).unwrap().is_empty());

        let ended = store.end_expired_polls(5_000).unwrap();
        assert_eq!(ended.len(), 1);
        assert!(store.active_polls().unwrap().is_empty());
        assert!(store.poll_user_answers(1, 1, 1).unwrap().is_empty());

        let results = store.get_poll(1, 1, 1).unwrap().unwrap().final_tally_results.unwrap();
        assert_eq!(results.votes_for(0), Some(1));
        assert_eq!(results.votes_for(1), Some(0));
        assert_eq!(results.votes_for(2), Some(2));
    }

    #[test]
    fn test_ended_poll_rejects_answers() {
        let (store, _temp) = store_with_poll(5_000);
        store.end_poll(1, 1, 1).unwrap();

        let err = store
            .save_user_answer(&UserAnswer::new(1, 1, 1, vec![0], user(2)))
            .unwrap_err();
        assert!(matches!(err, PostsError::InvalidRequest(_)));
        assert!(store.end_poll(1, 1, 1).is_err());
    }

    #[test]
    fn test_tally_does_not_consume_answers() {
        let (store, _temp) = store_with_poll(5_000);
        store
            .save_user_answer(&UserAnswer::new(1, 1, 1, vec![1], user(2)))
            .unwrap();

        let tally = store.tally_poll(1, 1, 1).unwrap().unwrap();
        assert_eq!(tally.votes_for(1), Some(1));
        assert_eq!(store.poll_user_answers(1, 1, 1).unwrap().len(), 1);
        assert!(store.tally_poll(1, 1, 9).unwrap().is_none());
    }
}
