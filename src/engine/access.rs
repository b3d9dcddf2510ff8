//! Who may vote on a poll, and who may see its results.
//!
//! Result visibility depends on the poll kind and visibility together, and
//! is defined once here by [`results_rule`]. The HTTP routes, vote
//! admission and live broadcasts all go through this module.

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::model::{
    common::poll::{PollKind, Visibility},
    db::poll::{Poll, PollCore},
    mongodb::Id,
};
use crate::store::Store;

use super::membership::MembershipGate;

/// How a poll's results are revealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultsRule {
    /// Only if the poll shows results on vote: to creators and voters
    /// immediately, and to everyone once the poll has closed.
    OnVote,
    /// Creators and voters in real time, everyone once the poll has closed.
    Participants,
    /// Nobody until the poll has closed, then only creators and voters.
    AfterClose,
}

/// The rule for a given kind of poll.
pub fn results_rule(kind: PollKind, visibility: Visibility) -> ResultsRule {
    match (kind, visibility) {
        (PollKind::Standard, _) | (PollKind::Binary, Visibility::Public) => ResultsRule::OnVote,
        (PollKind::Binary, Visibility::GroupScoped) => ResultsRule::Participants,
        (PollKind::BlindVote, _) => ResultsRule::AfterClose,
    }
}

/// A user's relationship to a poll, as far as visibility is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Viewer {
    pub is_creator: bool,
    pub has_voted: bool,
}

impl Viewer {
    /// Anyone who has voted and is not the creator. Broadcasts are redacted
    /// to what such a participant may see.
    pub const VOTER: Viewer = Viewer {
        is_creator: false,
        has_voted: true,
    };
}

/// Can `viewer` see the results of `poll` at `now`?
pub fn results_visible(poll: &PollCore, viewer: Viewer, now: DateTime<Utc>) -> bool {
    let closed = poll.has_closed(now);
    let participant = viewer.is_creator || viewer.has_voted;
    match results_rule(poll.kind, poll.visibility) {
        ResultsRule::OnVote => poll.show_results_on_vote && (closed || participant),
        ResultsRule::Participants => closed || participant,
        ResultsRule::AfterClose => closed && participant,
    }
}

/// May a live broadcast about `poll` carry its results?
///
/// Anyone may subscribe, so results that stay restricted to participants
/// after the close are never broadcast; those clients re-fetch instead.
pub fn broadcast_visible(poll: &PollCore, now: DateTime<Utc>) -> bool {
    match results_rule(poll.kind, poll.visibility) {
        ResultsRule::AfterClose => false,
        _ => results_visible(poll, Viewer::VOTER, now),
    }
}

/// Evaluates access rules that need the store: votes and memberships.
#[derive(Clone)]
pub struct AccessEvaluator {
    store: Store,
    membership: MembershipGate,
}

impl AccessEvaluator {
    pub fn new(store: Store, membership: MembershipGate) -> Self {
        Self { store, membership }
    }

    /// Fail unless `user` may vote on `poll` at `now`.
    ///
    /// The checks run in a fixed order, so the creator is always told they
    /// cannot vote, whatever state the poll is in.
    pub async fn check_vote(&self, poll: &Poll, user: Id, now: DateTime<Utc>) -> Result<()> {
        if poll.is_creator(user) {
            return Err(Error::CreatorCannotVote(poll.id));
        }
        if !poll.is_open(now) {
            return Err(Error::PollNotActive(poll.id));
        }
        if let Some(group) = poll.group_id {
            self.membership.require_approved(group, user).await?;
        }
        if self.store.vote(poll.id, user).await?.is_some() {
            return Err(Error::AlreadyVoted(poll.id));
        }
        Ok(())
    }

    pub async fn can_vote(&self, poll_id: Id, user: Id) -> Result<bool> {
        let poll = self.poll(poll_id).await?;
        match self.check_vote(&poll, user, Utc::now()).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_internal() => Err(e),
            Err(_) => Ok(false),
        }
    }

    /// Fail unless `user` may see `poll` at all. Group-scoped polls are
    /// only visible to the creator and approved members of the group.
    pub async fn check_view(&self, poll: &Poll, user: Option<Id>) -> Result<()> {
        let group = match poll.group_id {
            Some(group) => group,
            None => return Ok(()),
        };
        let allowed = match user {
            Some(user) if poll.is_creator(user) => true,
            Some(user) => self.membership.is_approved_member(group, user).await?,
            None => false,
        };
        if allowed {
            Ok(())
        } else {
            Err(Error::AccessDenied(format!(
                "poll {} is only visible to members of its group",
                poll.id
            )))
        }
    }

    /// Work out how `user` relates to `poll`. Anonymous users are neither
    /// creators nor voters.
    pub async fn viewer(&self, poll: &Poll, user: Option<Id>) -> Result<Viewer> {
        let user = match user {
            Some(user) => user,
            None => return Ok(Viewer::default()),
        };
        Ok(Viewer {
            is_creator: poll.is_creator(user),
            has_voted: self.store.vote(poll.id, user).await?.is_some(),
        })
    }

    pub async fn can_see_results(&self, poll_id: Id, user: Option<Id>) -> Result<bool> {
        let poll = self.poll(poll_id).await?;
        if let Err(e) = self.check_view(&poll, user).await {
            return if e.is_internal() { Err(e) } else { Ok(false) };
        }
        let viewer = self.viewer(&poll, user).await?;
        Ok(results_visible(&poll, viewer, Utc::now()))
    }

    async fn poll(&self, id: Id) -> Result<Poll> {
        self.store.poll(id).await?.ok_or(Error::PollNotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use crate::model::{
        common::poll::PollStatus,
        db::{membership::GroupMembership, poll::PollCore, vote::NewVote},
    };
    use crate::store::{MemoryStore, PollStore};

    use super::*;

    const NOBODY: Viewer = Viewer {
        is_creator: false,
        has_voted: false,
    };
    const CREATOR: Viewer = Viewer {
        is_creator: true,
        has_voted: false,
    };

    fn poll(kind: PollKind, visibility: Visibility) -> PollCore {
        let mut poll = PollCore::example(Id::new());
        poll.kind = kind;
        poll.visibility = visibility;
        poll
    }

    #[test]
    fn standard_polls_show_results_on_vote() {
        let now = Utc::now();
        let mut standard = poll(PollKind::Standard, Visibility::Public);
        assert!(!results_visible(&standard, NOBODY, now));
        assert!(results_visible(&standard, Viewer::VOTER, now));
        assert!(results_visible(&standard, CREATOR, now));

        let after = standard.end_time + Duration::seconds(1);
        assert!(results_visible(&standard, NOBODY, after));

        // Without the flag, nobody ever sees the results.
        standard.show_results_on_vote = false;
        for viewer in [NOBODY, CREATOR, Viewer::VOTER] {
            assert!(!results_visible(&standard, viewer, now));
            assert!(!results_visible(&standard, viewer, after));
        }
    }

    #[test]
    fn blind_votes_stay_hidden_until_close() {
        let blind = poll(PollKind::BlindVote, Visibility::GroupScoped);
        let before = Utc::now();
        let after = blind.end_time + Duration::seconds(1);
        for viewer in [NOBODY, CREATOR, Viewer::VOTER] {
            assert!(!results_visible(&blind, viewer, before));
        }
        assert!(!results_visible(&blind, NOBODY, after));
        assert!(results_visible(&blind, CREATOR, after));
        assert!(results_visible(&blind, Viewer::VOTER, after));

        // Cancelling closes the poll early, so participants see the results.
        let mut cancelled = blind.clone();
        cancelled.status = PollStatus::Cancelled;
        assert!(results_visible(&cancelled, Viewer::VOTER, before));
        assert!(results_visible(&cancelled, CREATOR, before));
        assert!(!results_visible(&cancelled, NOBODY, before));
    }

    #[test]
    fn binary_rule_depends_on_visibility() {
        let now = Utc::now();
        let mut group_binary = poll(PollKind::Binary, Visibility::GroupScoped);
        group_binary.show_results_on_vote = false;
        assert_eq!(
            results_rule(PollKind::Binary, Visibility::GroupScoped),
            ResultsRule::Participants
        );
        assert!(results_visible(&group_binary, Viewer::VOTER, now));
        assert!(!results_visible(&group_binary, NOBODY, now));

        let mut public_binary = poll(PollKind::Binary, Visibility::Public);
        public_binary.show_results_on_vote = false;
        assert_eq!(
            results_rule(PollKind::Binary, Visibility::Public),
            ResultsRule::OnVote
        );
        assert!(!results_visible(&public_binary, Viewer::VOTER, now));
    }

    #[test]
    fn broadcasts_follow_voter_visibility() {
        let now = Utc::now();
        assert!(broadcast_visible(&poll(PollKind::Standard, Visibility::Public), now));
        let blind = poll(PollKind::BlindVote, Visibility::Public);
        assert!(!broadcast_visible(&blind, now));
        // Final blind results are for participants only.
        assert!(!broadcast_visible(&blind, blind.end_time + Duration::seconds(1)));

        let mut quiet = poll(PollKind::Standard, Visibility::Public);
        quiet.show_results_on_vote = false;
        assert!(!broadcast_visible(&quiet, now));
    }

    #[rocket::async_test]
    async fn vote_checks_run_in_order() {
        let store = MemoryStore::new();
        let (creator, member, outsider, group) = (Id::new(), Id::new(), Id::new(), Id::new());
        store.put_membership(GroupMembership::approved(group, member));
        let poll = store
            .insert_poll(PollCore::group_example(creator, group, PollKind::Standard))
            .await
            .unwrap();
        let access = AccessEvaluator::new(
            store.clone().into_store(),
            MembershipGate::new(store.clone().into_store()),
        );
        let now = Utc::now();

        assert!(matches!(
            access.check_vote(&poll, creator, now).await,
            Err(Error::CreatorCannotVote(_))
        ));
        assert!(matches!(
            access.check_vote(&poll, outsider, now).await,
            Err(Error::GroupMembershipRequired(_))
        ));
        assert!(access.can_vote(poll.id, member).await.unwrap());

        store.insert_vote(NewVote::new(poll.id, member, 1)).await.unwrap();
        assert!(matches!(
            access.check_vote(&poll, member, now).await,
            Err(Error::AlreadyVoted(_))
        ));

        let after = poll.end_time + Duration::seconds(1);
        assert!(matches!(
            access.check_vote(&poll, creator, after).await,
            Err(Error::CreatorCannotVote(_))
        ));
        assert!(matches!(
            access.check_vote(&poll, outsider, after).await,
            Err(Error::PollNotActive(_))
        ));

        assert!(access.check_view(&poll, Some(member)).await.is_ok());
        assert!(access.check_view(&poll, Some(creator)).await.is_ok());
        assert!(matches!(
            access.check_view(&poll, None).await,
            Err(Error::AccessDenied(_))
        ));
        assert!(!access.can_see_results(poll.id, Some(outsider)).await.unwrap());
        assert!(access.can_see_results(poll.id, Some(member)).await.unwrap());
    }
}
