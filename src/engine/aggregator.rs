use crate::error::{Error, Result};
use crate::model::{common::results::ResultSnapshot, db::poll::Poll, mongodb::Id};
use crate::store::Store;

/// Computes result snapshots from the stored votes. Nothing is cached, so
/// a snapshot is never older than the call that produced it.
#[derive(Clone)]
pub struct Aggregator {
    store: Store,
}

impl Aggregator {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn compute(&self, poll_id: Id) -> Result<ResultSnapshot> {
        let poll = self
            .store
            .poll(poll_id)
            .await?
            .ok_or(Error::PollNotFound(poll_id))?;
        self.compute_for(&poll).await
    }

    /// Compute the snapshot of an already-loaded poll. Options never change
    /// once votes exist, so a stale copy of the poll is fine.
    pub async fn compute_for(&self, poll: &Poll) -> Result<ResultSnapshot> {
        let counts = self.store.vote_counts(poll.id).await?;
        Ok(ResultSnapshot::tally(&*poll.options, &counts))
    }
}

#[cfg(test)]
mod tests {
    use crate::model::db::{poll::PollCore, vote::NewVote};
    use crate::store::{MemoryStore, PollStore};

    use super::*;

    #[rocket::async_test]
    async fn counts_follow_declaration_order() {
        let store = MemoryStore::new();
        let poll = store
            .insert_poll(PollCore::group_example(
                Id::new(),
                Id::new(),
                crate::model::common::poll::PollKind::Standard,
            ))
            .await
            .unwrap();
        for option in [3, 3, 1] {
            store
                .insert_vote(NewVote::new(poll.id, Id::new(), option))
                .await
                .unwrap();
        }
        let aggregator = Aggregator::new(store.into_store());

        let snapshot = aggregator.compute(poll.id).await.unwrap();
        assert_eq!(snapshot.total_votes, 3);
        let rows: Vec<_> = snapshot
            .per_option
            .iter()
            .map(|o| (o.text.as_str(), o.votes, o.percentage))
            .collect();
        assert_eq!(
            rows,
            [("Red", 1, 33.33), ("Green", 0, 0.0), ("Blue", 2, 66.67)]
        );

        assert!(matches!(
            aggregator.compute(Id::new()).await,
            Err(Error::PollNotFound(_))
        ));
    }
}
