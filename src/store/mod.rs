//! The storage boundary. Every backend must reject a second vote for the
//! same (poll, voter) pair and re-check that the poll is open when a vote is
//! inserted; the engine relies on both.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{
    common::poll::PollStatus,
    db::{
        membership::GroupMembership,
        poll::{NewPoll, Poll, PollChanges},
        vote::{NewVote, Vote},
    },
    mongodb::Id,
};

mod memory;
mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

/// Shared handle on the configured store. This is managed state.
pub type Store = Arc<dyn PollStore>;

/// Which polls to list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollFilter {
    pub status: Option<PollStatus>,
    /// Only polls owned by this group.
    pub group: Option<Id>,
    /// Restrict to public polls plus polls of these groups.
    /// `None` means no visibility restriction.
    pub visible_groups: Option<Vec<Id>>,
}

#[rocket::async_trait]
pub trait PollStore: Send + Sync {
    /// Insert a poll and return it with its new ID.
    async fn insert_poll(&self, poll: NewPoll) -> Result<Poll>;

    async fn poll(&self, id: Id) -> Result<Option<Poll>>;

    /// Polls matching the filter, newest first.
    async fn polls(&self, filter: &PollFilter) -> Result<Vec<Poll>>;

    /// Atomically apply creator changes to a poll that is still open at `now`.
    ///
    /// Content changes only apply while the poll has no votes, and the end
    /// time only ever moves later. Returns `None` if a guard failed.
    async fn update_poll(
        &self,
        id: Id,
        changes: &PollChanges,
        now: DateTime<Utc>,
    ) -> Result<Option<Poll>>;

    /// Delete a poll together with all of its votes.
    /// Returns false if there was no such poll.
    async fn delete_poll(&self, id: Id) -> Result<bool>;

    /// Atomically move an active poll to `status`. Moving to `Ended` also
    /// requires the end time to have passed at `now`. Returns true iff this
    /// call performed the transition.
    async fn transition_poll(&self, id: Id, status: PollStatus, now: DateTime<Utc>)
        -> Result<bool>;

    /// IDs of active polls whose end time has passed at `now`.
    async fn expired_polls(&self, now: DateTime<Utc>) -> Result<Vec<Id>>;

    /// Insert a vote exactly once.
    ///
    /// Fails with `AlreadyVoted` if the pair already voted, `PollNotActive` if
    /// the poll is no longer open at insert time, and `PollNotFound` if it
    /// disappeared.
    async fn insert_vote(&self, vote: NewVote) -> Result<Vote>;

    async fn vote(&self, poll: Id, voter: Id) -> Result<Option<Vote>>;

    /// Number of votes per 1-based option index.
    async fn vote_counts(&self, poll: Id) -> Result<HashMap<u32, u64>>;

    async fn membership(&self, group: Id, user: Id) -> Result<Option<GroupMembership>>;

    /// Groups the user is an approved member of.
    async fn approved_groups(&self, user: Id) -> Result<Vec<Id>>;

    async fn approved_member_count(&self, group: Id) -> Result<u64>;
}
