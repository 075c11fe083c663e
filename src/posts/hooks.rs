//! Event hooks fired after store changes are committed.
//!
//! Dependent modules implement [`PostsHooks`] to react to posts changes
//! without the store depending on them. Every method has an empty default,
//! so implementors only override what they need.

use crate::posts::types::Address;
use std::sync::Arc;

/// Callbacks invoked after a write has been committed.
pub trait PostsHooks: Send + Sync {
    fn after_post_saved(&self, _subspace_id: u64, _post_id: u64) {}

    fn after_post_deleted(&self, _subspace_id: u64, _post_id: u64) {}

    fn after_attachment_saved(&self, _subspace_id: u64, _post_id: u64, _attachment_id: u32) {}

    fn after_attachment_deleted(&self, _subspace_id: u64, _post_id: u64, _attachment_id: u32) {}

    fn after_poll_answer_saved(
        &self,
        _subspace_id: u64,
        _post_id: u64,
        _poll_id: u32,
        _user: &Address,
    ) {
    }

    fn after_poll_answer_deleted(
        &self,
        _subspace_id: u64,
        _post_id: u64,
        _poll_id: u32,
        _user: &Address,
    ) {
    }

    fn after_poll_voting_period_ended(&self, _subspace_id: u64, _post_id: u64, _poll_id: u32) {}

    fn after_post_owner_transfer_request_saved(
        &self,
        _subspace_id: u64,
        _post_id: u64,
        _sender: &Address,
        _receiver: &Address,
    ) {
    }

    fn after_post_owner_transfer_request_deleted(&self, _subspace_id: u64, _post_id: u64) {}
}

/// A change recorded while staging a write, dispatched once it commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookEvent {
    PostSaved {
        subspace_id: u64,
        post_id: u64,
    },
    PostDeleted {
        subspace_id: u64,
        post_id: u64,
    },
    AttachmentSaved {
        subspace_id: u64,
        post_id: u64,
        attachment_id: u32,
    },
    AttachmentDeleted {
        subspace_id: u64,
        post_id: u64,
        attachment_id: u32,
    },
    PollAnswerSaved {
        subspace_id: u64,
        post_id: u64,
        poll_id: u32,
        user: Address,
    },
    PollAnswerDeleted {
        subspace_id: u64,
        post_id: u64,
        poll_id: u32,
        user: Address,
    },
    PollVotingPeriodEnded {
        subspace_id: u64,
        post_id: u64,
        poll_id: u32,
    },
    TransferRequestSaved {
        subspace_id: u64,
        post_id: u64,
        sender: Address,
        receiver: Address,
    },
    TransferRequestDeleted {
        subspace_id: u64,
        post_id: u64,
    },
}

impl HookEvent {
    /// Invokes the matching callback of `hooks`.
    pub fn dispatch(&self, hooks: &dyn PostsHooks) {
        match self {
            HookEvent::PostSaved {
                subspace_id,
                post_id,
            } => hooks.after_post_saved(*subspace_id, *post_id),
            HookEvent::PostDeleted {
                subspace_id,
                post_id,
            } => hooks.after_post_deleted(*subspace_id, *post_id),
            HookEvent::AttachmentSaved {
                subspace_id,
                post_id,
                attachment_id,
            } => hooks.after_attachment_saved(*subspace_id, *post_id, *attachment_id),
            HookEvent::AttachmentDeleted {
                subspace_id,
                post_id,
                attachment_id,
            } => hooks.after_attachment_deleted(*subspace_id, *post_id, *attachment_id),
            HookEvent::PollAnswerSaved {
                subspace_id,
                post_id,
                poll_id,
                user,
            } => hooks.after_poll_answer_saved(*subspace_id, *post_id, *poll_id, user),
            HookEvent::PollAnswerDeleted {
                subspace_id,
                post_id,
                poll_id,
                user,
            } => hooks.after_poll_answer_deleted(*subspace_id, *post_id, *poll_id, user),
            HookEvent::PollVotingPeriodEnded {
                subspace_id,
                post_id,
                poll_id,
            } => hooks.after_poll_voting_period_ended(*subspace_id, *post_id, *poll_id),
            HookEvent::TransferRequestSaved {
                subspace_id,
                post_id,
                sender,
                receiver,
            } => hooks.after_post_owner_transfer_request_saved(
                *subspace_id,
                *post_id,
                sender,
                receiver,
            ),
            HookEvent::TransferRequestDeleted {
                subspace_id,
                post_id,
            } => hooks.after_post_owner_transfer_request_deleted(*subspace_id, *post_id),
        }
    }
}

/// Dispatches every event to every hook, in order.
pub fn dispatch_all(hooks: &[Arc<dyn PostsHooks>], events: &[HookEvent]) {
    for event in events {
        for hook in hooks {
            event.dispatch(hook.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Counter {
        saved: Mutex<Vec<(u64, u64)>>,
        ended: Mutex<u32>,
    }

    impl PostsHooks for Counter {
        fn after_post_saved(&self, subspace_id: u64, post_id: u64) {
            self.saved.lock().unwrap().push((subspace_id, post_id));
        }

        fn after_poll_voting_period_ended(&self, _: u64, _: u64, _: u32) {
            *self.ended.lock().unwrap() += 1;
        }
    }

    #[test]
    fn test_dispatch_reaches_every_hook() {
        let first = Arc::new(Counter::default());
        let second = Arc::new(Counter::default());
        let hooks: Vec<Arc<dyn PostsHooks>> = vec![first.clone(), second.clone()];

        dispatch_all(
            &hooks,
            &[
                HookEvent::PostSaved {
                    subspace_id: 1,
                    post_id: 2,
                },
                HookEvent::PostDeleted {
                    subspace_id: 1,
                    post_id: 2,
                },
                HookEvent::PollVotingPeriodEnded {
                    subspace_id: 1,
                    post_id: 2,
                    poll_id: 1,
                },
            ],
        );

        assert_eq!(*first.saved.lock().unwrap(), vec![(1, 2)]);
        assert_eq!(*second.saved.lock().unwrap(), vec![(1, 2)]);
        assert_eq!(*second.ended.lock().unwrap(), 1);
    }
}
