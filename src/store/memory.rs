use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::model::{
    common::poll::PollStatus,
    db::{
        membership::GroupMembership,
        poll::{NewPoll, Poll, PollChanges},
        vote::{NewVote, Vote},
    },
    mongodb::Id,
};

use super::{PollFilter, PollStore, Store};

#[derive(Default)]
struct State {
    polls: HashMap<Id, Poll>,
    /// Keyed by (poll, voter): the map key is the uniqueness constraint.
    votes: HashMap<(Id, Id), Vote>,
    /// Keyed by (group, user).
    memberships: HashMap<(Id, Id), GroupMembership>,
}

/// An in-process store. Every operation runs under one lock, which gives it
/// the same atomicity guarantees as the MongoDB backend.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap this store as the shared `Store` handle.
    pub fn into_store(self) -> Store {
        Arc::new(self)
    }

    /// Record a group membership. Memberships are normally owned by the group
    /// service; this is how they are seeded when running in memory.
    pub fn put_membership(&self, membership: GroupMembership) {
        let key = (membership.group_id, membership.user_id);
        self.lock().memberships.insert(key, membership);
    }

    /// Overwrite a poll's end time, bypassing the "only later" rule.
    #[cfg(test)]
    pub fn force_end_time(&self, id: Id, end_time: DateTime<Utc>) {
        if let Some(poll) = self.lock().polls.get_mut(&id) {
            poll.end_time = end_time;
        }
    }

    /// Count every stored vote for a poll.
    #[cfg(test)]
    pub fn stored_votes(&self, poll: Id) -> usize {
        self.lock().votes.keys().filter(|(p, _)| *p == poll).count()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // No operation leaves the state half-updated, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[rocket::async_trait]
impl PollStore for MemoryStore {
    async fn insert_poll(&self, poll: NewPoll) -> Result<Poll> {
        let poll = Poll {
            id: Id::new(),
            poll,
        };
        self.lock().polls.insert(poll.id, poll.clone());
        Ok(poll)
    }

    async fn poll(&self, id: Id) -> Result<Option<Poll>> {
        Ok(self.lock().polls.get(&id).cloned())
    }

    async fn polls(&self, filter: &PollFilter) -> Result<Vec<Poll>> {
        let state = self.lock();
        let mut polls: Vec<Poll> = state
            .polls
            .values()
            .filter(|poll| filter.status.map_or(true, |s| poll.status == s))
            .filter(|poll| filter.group.map_or(true, |g| poll.group_id == Some(g)))
            .filter(|poll| match (&filter.visible_groups, poll.group_id) {
                (None, _) | (Some(_), None) => true,
                (Some(groups), Some(group)) => groups.contains(&group),
            })
            .cloned()
            .collect();
        polls.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(polls)
    }

    async fn update_poll(
        &self,
        id: Id,
        changes: &PollChanges,
        now: DateTime<Utc>,
    ) -> Result<Option<Poll>> {
        let mut state = self.lock();
        let has_votes = state.votes.keys().any(|(poll, _)| *poll == id);
        let poll = match state.polls.get_mut(&id) {
            Some(poll) => poll,
            None => return Ok(None),
        };
        if !poll.is_open(now)
            || (changes.touches_content() && has_votes)
            || changes.end_time.map_or(false, |end| end < poll.end_time)
        {
            return Ok(None);
        }
        changes.apply_to(poll);
        Ok(Some(poll.clone()))
    }

    async fn delete_poll(&self, id: Id) -> Result<bool> {
        let mut state = self.lock();
        if state.polls.remove(&id).is_none() {
            return Ok(false);
        }
        state.votes.retain(|(poll, _), _| *poll != id);
        Ok(true)
    }

    async fn transition_poll(
        &self,
        id: Id,
        status: PollStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.lock();
        let poll = match state.polls.get_mut(&id) {
            Some(poll) => poll,
            None => return Ok(false),
        };
        if !poll.status.can_transition_to(status) {
            return Ok(false);
        }
        if status == PollStatus::Ended && poll.end_time > now {
            return Ok(false);
        }
        poll.status = status;
        Ok(true)
    }

    async fn expired_polls(&self, now: DateTime<Utc>) -> Result<Vec<Id>> {
        Ok(self
            .lock()
            .polls
            .values()
            .filter(|poll| poll.status == PollStatus::Active && poll.end_time <= now)
            .map(|poll| poll.id)
            .collect())
    }

    async fn insert_vote(&self, vote: NewVote) -> Result<Vote> {
        let mut state = self.lock();
        let poll = state
            .polls
            .get(&vote.poll_id)
            .ok_or(Error::PollNotFound(vote.poll_id))?;
        if !poll.is_open(vote.voted_at) {
            return Err(Error::PollNotActive(vote.poll_id));
        }
        let key = (vote.poll_id, vote.voter_id);
        if state.votes.contains_key(&key) {
            return Err(Error::AlreadyVoted(vote.poll_id));
        }
        let vote = Vote {
            id: Id::new(),
            vote,
        };
        state.votes.insert(key, vote.clone());
        Ok(vote)
    }

    async fn vote(&self, poll: Id, voter: Id) -> Result<Option<Vote>> {
        Ok(self.lock().votes.get(&(poll, voter)).cloned())
    }

    async fn vote_counts(&self, poll: Id) -> Result<HashMap<u32, u64>> {
        let mut counts = HashMap::new();
        for vote in self.lock().votes.values().filter(|v| v.poll_id == poll) {
            *counts.entry(vote.option_selected).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn membership(&self, group: Id, user: Id) -> Result<Option<GroupMembership>> {
        Ok(self.lock().memberships.get(&(group, user)).cloned())
    }

    async fn approved_groups(&self, user: Id) -> Result<Vec<Id>> {
        Ok(self
            .lock()
            .memberships
            .values()
            .filter(|m| m.user_id == user && m.is_approved())
            .map(|m| m.group_id)
            .collect())
    }

    async fn approved_member_count(&self, group: Id) -> Result<u64> {
        let count = self
            .lock()
            .memberships
            .values()
            .filter(|m| m.group_id == group && m.is_approved())
            .count();
        Ok(count as u64)
    }
}
