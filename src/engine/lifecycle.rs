//! The poll state machine: creation, creator edits, cancellation, deletion,
//! and the sweep that ends polls once their end time has passed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rocket::{
    fairing::{Fairing, Info, Kind},
    tokio::sync::Mutex,
    Orbit, Rocket,
};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{
    api::{live::LiveEvent, poll::PollSpec},
    common::poll::{PollKind, PollStatus},
    db::poll::{Poll, PollChanges},
    mongodb::Id,
};
use crate::periodic_task::PeriodicTask;
use crate::store::Store;

use super::{
    access::broadcast_visible,
    aggregator::Aggregator,
    fanout::{Fanout, Topic},
    membership::MembershipGate,
    Engine,
};

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Polls this sweep moved to `ended`.
    pub ended: usize,
    /// Polls that something else ended or cancelled first.
    pub skipped: usize,
    /// Polls that could not be processed; they are retried next sweep.
    pub failed: usize,
}

#[derive(Clone)]
pub struct LifecycleManager {
    store: Store,
    membership: MembershipGate,
    aggregator: Aggregator,
    fanout: Fanout,
    /// Serialises sweeps within this process.
    sweep_lock: Arc<Mutex<()>>,
}

impl LifecycleManager {
    pub fn new(
        store: Store,
        membership: MembershipGate,
        aggregator: Aggregator,
        fanout: Fanout,
    ) -> Self {
        Self {
            store,
            membership,
            aggregator,
            fanout,
            sweep_lock: Default::default(),
        }
    }

    /// Create a poll on behalf of `creator`. Group-scoped polls may only be
    /// created by approved members, and are announced to the group.
    pub async fn create(&self, creator: Id, spec: PollSpec) -> Result<Poll> {
        let new_poll = spec.into_poll(creator, Utc::now())?;
        if let Some(group) = new_poll.group_id {
            self.membership.require_approved(group, creator).await?;
        }
        let poll = self.store.insert_poll(new_poll).await?;
        info!("Created poll {} ({:?})", poll.id, poll.kind);

        if let Some(group) = poll.group_id {
            let event = LiveEvent::group_new_poll(group, poll.id, poll.question.clone());
            self.fanout.publish(Topic::Group(group), event);
        }
        Ok(poll)
    }

    /// Apply creator edits. Content is frozen once the poll has votes, and
    /// the end time only ever moves later. A poll past its end time cannot be
    /// edited, even before the sweep has marked it ended.
    pub async fn update(&self, poll_id: Id, user: Id, changes: PollChanges) -> Result<Poll> {
        let poll = self.owned_poll(poll_id, user).await?;
        let now = Utc::now();
        if poll.has_closed(now) {
            return Err(Error::PollNotActive(poll_id));
        }
        if changes.options.is_some() && poll.kind == PollKind::Binary {
            return Err(Error::InvalidPoll("binary poll options are fixed".to_string()));
        }
        if let Some(end_time) = changes.end_time {
            if end_time < poll.end_time {
                return Err(Error::InvalidPoll("end time may only move later".to_string()));
            }
        }
        if changes.touches_content() && !self.store.vote_counts(poll_id).await?.is_empty() {
            return Err(Error::Conflict(format!(
                "poll {poll_id} already has votes; only the end time can change"
            )));
        }

        match self.store.update_poll(poll_id, &changes, now).await? {
            Some(updated) => {
                info!("Updated poll {poll_id}");
                Ok(updated)
            }
            // A vote or a transition got in first.
            None => Err(Error::Conflict(format!(
                "poll {poll_id} changed while it was being updated"
            ))),
        }
    }

    /// Close a poll early. Existing votes are kept.
    pub async fn cancel(&self, poll_id: Id, user: Id) -> Result<Poll> {
        let mut poll = self.owned_poll(poll_id, user).await?;
        if !self
            .store
            .transition_poll(poll_id, PollStatus::Cancelled, Utc::now())
            .await?
        {
            return Err(Error::PollNotActive(poll_id));
        }
        poll.status = PollStatus::Cancelled;
        info!("Poll {poll_id} cancelled by its creator");

        let _order = self.fanout.ordered(poll_id).await;
        self.fanout
            .publish(Topic::Poll(poll_id), LiveEvent::poll_cancelled(poll_id));
        Ok(poll)
    }

    /// Delete a poll along with its votes.
    pub async fn delete(&self, poll_id: Id, user: Id) -> Result<()> {
        self.owned_poll(poll_id, user).await?;
        if !self.store.delete_poll(poll_id).await? {
            return Err(Error::PollNotFound(poll_id));
        }
        info!("Deleted poll {poll_id}");
        Ok(())
    }

    /// End every active poll whose end time has passed.
    pub async fn sweep(&self) -> Result<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    /// End every active poll whose end time has passed at `now`.
    ///
    /// A poll that fails is logged and skipped; the rest of the batch still
    /// runs. Only the call that wins the `active -> ended` transition
    /// announces the final results, so repeated or concurrent sweeps notify
    /// at most once per poll.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let _sweeping = self.sweep_lock.lock().await;
        let expired = self.store.expired_polls(now).await?;
        let mut report = SweepReport::default();
        for poll_id in expired {
            match self.end_poll(poll_id, now).await {
                Ok(true) => report.ended += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    error!("Failed to end poll {poll_id}: {e}");
                    report.failed += 1;
                }
            }
        }
        if report == SweepReport::default() {
            trace!("Sweep found no expired polls");
        } else {
            info!(
                "Sweep ended {} polls ({} skipped, {} failed)",
                report.ended, report.skipped, report.failed
            );
        }
        Ok(report)
    }

    /// Transition one poll and announce its final results.
    /// Returns false if another process or request got there first.
    async fn end_poll(&self, poll_id: Id, now: DateTime<Utc>) -> Result<bool> {
        if !self
            .store
            .transition_poll(poll_id, PollStatus::Ended, now)
            .await?
        {
            return Ok(false);
        }
        debug!("Poll {poll_id} ended");

        let _order = self.fanout.ordered(poll_id).await;
        let announced = self.announce_end(poll_id).await;
        if let Err(e) = announced {
            warn!("Poll {poll_id} ended but its final results were not broadcast: {e}");
        }
        Ok(true)
    }

    async fn announce_end(&self, poll_id: Id) -> Result<()> {
        let poll = self
            .store
            .poll(poll_id)
            .await?
            .ok_or(Error::PollNotFound(poll_id))?;
        let results = self.aggregator.compute_for(&poll).await?;
        let final_results = broadcast_visible(&poll, Utc::now()).then_some(results);
        self.fanout
            .publish(Topic::Poll(poll_id), LiveEvent::poll_ended(poll_id, final_results));
        Ok(())
    }

    /// Fetch a poll and check that `user` created it.
    async fn owned_poll(&self, poll_id: Id, user: Id) -> Result<Poll> {
        let poll = self
            .store
            .poll(poll_id)
            .await?
            .ok_or(Error::PollNotFound(poll_id))?;
        if !poll.is_creator(user) {
            return Err(Error::NotPollCreator(poll_id));
        }
        Ok(poll)
    }
}

/// A fairing that starts the periodic sweep at liftoff and stops it at
/// shutdown. Depends on `Config` and `Engine` being in managed state.
#[derive(Default)]
pub struct SweeperFairing {
    task: Mutex<Option<PeriodicTask>>,
}

#[rocket::async_trait]
impl Fairing for SweeperFairing {
    fn info(&self) -> Info {
        Info {
            name: "Poll Sweeper",
            kind: Kind::Liftoff | Kind::Shutdown,
        }
    }

    async fn on_liftoff(&self, rocket: &Rocket<Orbit>) {
        let (config, engine) = match (rocket.state::<Config>(), rocket.state::<Engine>()) {
            (Some(config), Some(engine)) => (config, engine),
            _ => {
                error!("Config or engine missing, poll sweeper not started");
                return;
            }
        };
        if !config.sweep_enabled() {
            info!("Poll sweeper disabled by config");
            return;
        }

        let interval = config.sweep_interval();
        let lifecycle = engine.lifecycle.clone();
        let task = PeriodicTask::start("Poll sweep", interval, move || {
            let lifecycle = lifecycle.clone();
            async move {
                if let Err(e) = lifecycle.sweep().await {
                    error!("Poll sweep failed: {e}");
                }
            }
        });
        *self.task.lock().await = Some(task);
        info!("Poll sweeper running every {}s", interval.as_secs());
    }

    async fn on_shutdown(&self, _rocket: &Rocket<Orbit>) {
        if let Some(task) = self.task.lock().await.take() {
            if !task.stop().await {
                warn!("Poll sweeper did not stop cleanly");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use crate::model::db::{membership::GroupMembership, poll::PollCore, vote::NewVote};
    use crate::store::{MemoryStore, PollStore};

    use super::*;

    fn engine(store: &MemoryStore) -> Engine {
        Engine::new(store.clone().into_store(), 16)
    }

    #[rocket::async_test]
    async fn sweep_is_idempotent() {
        let store = MemoryStore::new();
        let engine = engine(&store);
        let voter = Id::new();
        let poll = store.insert_poll(PollCore::example(Id::new())).await.unwrap();
        store.insert_vote(NewVote::new(poll.id, voter, 2)).await.unwrap();
        let mut live = engine.fanout.subscribe(Topic::Poll(poll.id));

        let after = poll.end_time + ChronoDuration::seconds(1);
        let first = engine.lifecycle.sweep_at(after).await.unwrap();
        let second = engine.lifecycle.sweep_at(after).await.unwrap();
        assert_eq!(first.ended, 1);
        assert_eq!(second, SweepReport::default());

        let stored = store.poll(poll.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PollStatus::Ended);
        match live.recv().await.unwrap() {
            LiveEvent::PollEnded { final_results, .. } => {
                assert_eq!(final_results.unwrap().total_votes, 1)
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(live.try_recv().is_err());
    }

    #[rocket::async_test]
    async fn blind_poll_end_is_announced_without_results() {
        let store = MemoryStore::new();
        let engine = engine(&store);
        let (creator, member, group) = (Id::new(), Id::new(), Id::new());
        store.put_membership(GroupMembership::approved(group, creator));
        store.put_membership(GroupMembership::approved(group, member));
        let poll = engine
            .lifecycle
            .create(creator, PollSpec::group_example(group, PollKind::BlindVote))
            .await
            .unwrap();
        engine.admission.admit(poll.id, member, 1).await.unwrap();

        let mut live = engine.fanout.subscribe(Topic::Poll(poll.id));
        let report = engine
            .lifecycle
            .sweep_at(poll.end_time + ChronoDuration::seconds(1))
            .await
            .unwrap();
        assert_eq!(report.ended, 1);
        assert_eq!(live.recv().await.unwrap(), LiveEvent::poll_ended(poll.id, None));
    }

    #[rocket::async_test]
    async fn expired_poll_cannot_be_edited_before_the_sweep() {
        let store = MemoryStore::new();
        let engine = engine(&store);
        let creator = Id::new();
        let poll = engine
            .lifecycle
            .create(creator, PollSpec::example())
            .await
            .unwrap();
        store.force_end_time(poll.id, Utc::now() - ChronoDuration::seconds(1));

        let extend = PollChanges {
            end_time: Some(Utc::now() + ChronoDuration::days(1)),
            ..Default::default()
        };
        assert!(matches!(
            engine.lifecycle.update(poll.id, creator, extend).await,
            Err(Error::PollNotActive(_))
        ));
        // Voting stays closed too.
        assert!(matches!(
            engine.admission.admit(poll.id, Id::new(), 1).await,
            Err(Error::PollNotActive(_))
        ));
    }

    #[rocket::async_test]
    async fn concurrent_sweeps_end_each_poll_once() {
        let store = MemoryStore::new();
        let engine = engine(&store);
        let past = Utc::now() - ChronoDuration::minutes(1);
        for _ in 0..5 {
            store
                .insert_poll(PollCore::example(Id::new()).ending_at(past))
                .await
                .unwrap();
        }

        let (a, b) = rocket::tokio::join!(engine.lifecycle.sweep(), engine.lifecycle.sweep());
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.ended + b.ended, 5);
        assert_eq!(a.failed + b.failed, 0);
    }

    #[rocket::async_test]
    async fn creator_operations() {
        let store = MemoryStore::new();
        let engine = engine(&store);
        let (creator, stranger) = (Id::new(), Id::new());
        let poll = engine
            .lifecycle
            .create(creator, PollSpec::example())
            .await
            .unwrap();

        assert!(matches!(
            engine.lifecycle.cancel(poll.id, stranger).await,
            Err(Error::NotPollCreator(_))
        ));

        // Content is frozen once a vote exists.
        store.insert_vote(NewVote::new(poll.id, stranger, 1)).await.unwrap();
        let reword = PollChanges {
            question: Some("Reworded?".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            engine.lifecycle.update(poll.id, creator, reword).await,
            Err(Error::Conflict(_))
        ));
        let earlier = PollChanges {
            end_time: Some(poll.end_time - ChronoDuration::minutes(1)),
            ..Default::default()
        };
        assert!(matches!(
            engine.lifecycle.update(poll.id, creator, earlier).await,
            Err(Error::InvalidPoll(_))
        ));

        let mut live = engine.fanout.subscribe(Topic::Poll(poll.id));
        let cancelled = engine.lifecycle.cancel(poll.id, creator).await.unwrap();
        assert_eq!(cancelled.status, PollStatus::Cancelled);
        assert_eq!(live.recv().await.unwrap(), LiveEvent::poll_cancelled(poll.id));
        assert!(matches!(
            engine.lifecycle.cancel(poll.id, creator).await,
            Err(Error::PollNotActive(_))
        ));
        // Cancelled polls are never swept.
        let report = engine
            .lifecycle
            .sweep_at(poll.end_time + ChronoDuration::hours(1))
            .await
            .unwrap();
        assert_eq!(report, SweepReport::default());

        engine.lifecycle.delete(poll.id, creator).await.unwrap();
        assert_eq!(store.stored_votes(poll.id), 0);
    }

    #[rocket::async_test]
    async fn group_polls_are_announced_to_members() {
        let store = MemoryStore::new();
        let engine = engine(&store);
        let (group, member, outsider) = (Id::new(), Id::new(), Id::new());
        store.put_membership(GroupMembership::approved(group, member));
        let mut live = engine.fanout.subscribe(Topic::Group(group));

        let denied = engine
            .lifecycle
            .create(outsider, PollSpec::group_example(group, PollKind::Standard))
            .await;
        assert!(matches!(denied, Err(Error::GroupMembershipRequired(_))));

        let poll = engine
            .lifecycle
            .create(member, PollSpec::group_example(group, PollKind::Standard))
            .await
            .unwrap();
        assert_eq!(
            live.recv().await.unwrap(),
            LiveEvent::group_new_poll(group, poll.id, "Which colour?")
        );
    }
}
