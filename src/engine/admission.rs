use chrono::Utc;

use crate::error::{Error, Result};
use crate::model::{
    api::live::LiveEvent,
    common::results::ResultSnapshot,
    db::vote::{NewVote, Vote},
    mongodb::Id,
};
use crate::store::Store;

use super::{
    access::{broadcast_visible, AccessEvaluator},
    aggregator::Aggregator,
    fanout::{Fanout, Topic},
};

/// The outcome of a successful vote.
#[derive(Debug, Clone, PartialEq)]
pub struct Admitted {
    pub vote: Vote,
    /// Results including this vote.
    pub results: ResultSnapshot,
    /// May the voter see `results` yet?
    pub results_visible: bool,
}

/// Admits votes: each (poll, voter) pair at most once, and only while the
/// poll is open.
#[derive(Clone)]
pub struct VoteAdmission {
    store: Store,
    access: AccessEvaluator,
    aggregator: Aggregator,
    fanout: Fanout,
}

impl VoteAdmission {
    pub fn new(store: Store, access: AccessEvaluator, aggregator: Aggregator, fanout: Fanout) -> Self {
        Self {
            store,
            access,
            aggregator,
            fanout,
        }
    }

    /// Record `voter`'s choice of `option` (1-based) on a poll, then
    /// broadcast the new results to the poll's subscribers.
    ///
    /// The eligibility checks here only give early, precise errors. The
    /// store re-checks uniqueness and the poll's state at insert time, and
    /// its answer is final.
    pub async fn admit(&self, poll_id: Id, voter: Id, option: u32) -> Result<Admitted> {
        let poll = self
            .store
            .poll(poll_id)
            .await?
            .ok_or(Error::PollNotFound(poll_id))?;
        self.access.check_vote(&poll, voter, Utc::now()).await?;
        if !poll.options.contains_index(option) {
            return Err(Error::InvalidOption {
                poll: poll_id,
                option,
            });
        }

        let vote = match self.store.insert_vote(NewVote::new(poll_id, voter, option)).await {
            Ok(vote) => vote,
            Err(err @ Error::AlreadyVoted(_)) => {
                debug!("Lost a duplicate vote race for voter {voter} on poll {poll_id}");
                return Err(err);
            }
            Err(err) => return Err(err),
        };
        info!("Admitted vote {} on poll {poll_id}", vote.id);

        // Compute inside the ordering lock, so every broadcast snapshot
        // includes at least the votes of the broadcasts before it.
        let _order = self.fanout.ordered(poll_id).await;
        let results = self.aggregator.compute_for(&poll).await?;
        let results_visible = broadcast_visible(&poll, Utc::now());
        let event = LiveEvent::vote_new(poll_id, results_visible.then(|| results.clone()));
        self.fanout.publish(Topic::Poll(poll_id), event);

        Ok(Admitted {
            vote,
            results,
            results_visible,
        })
    }
}
