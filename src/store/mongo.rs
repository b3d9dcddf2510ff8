use std::collections::HashMap;

use chrono::{DateTime, Utc};
use mongodb::{
    bson::{self, doc, Document},
    options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument},
    Client, ClientSession, Database,
};
use rocket::futures::TryStreamExt;

use crate::error::{Error, Result};
use crate::model::{
    common::{membership::MembershipStatus, poll::PollStatus},
    db::{
        membership::GroupMembership,
        poll::{NewPoll, Poll, PollChanges, PollRef},
        vote::{NewVote, OptionCount, Vote},
    },
    mongodb::{
        is_duplicate_key_error, is_transient_transaction_error, is_unknown_commit_result, Coll,
        Id,
    },
};

use super::{PollFilter, PollStore};

/// Attempts made at a whole transaction, or at committing one, before giving up.
const MAX_TRANSACTION_ATTEMPTS: usize = 3;

/// The MongoDB backend. Requires a replica set, since poll deletion runs in
/// a transaction.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    polls: Coll<Poll>,
    new_polls: Coll<NewPoll>,
    poll_refs: Coll<PollRef>,
    votes: Coll<Vote>,
    memberships: Coll<GroupMembership>,
}

impl MongoStore {
    pub fn new(client: Client, db: &Database) -> Self {
        Self {
            client,
            polls: Coll::from_db(db),
            new_polls: Coll::from_db(db),
            poll_refs: Coll::from_db(db),
            votes: Coll::from_db(db),
            memberships: Coll::from_db(db),
        }
    }

    /// One attempt at deleting a poll and its votes in a single transaction.
    async fn try_delete_poll(&self, id: Id, session: &mut ClientSession) -> Result<bool> {
        session.start_transaction(None).await?;

        let result = self
            .polls
            .delete_one_with_session(id.as_doc(), None, session)
            .await?;
        if result.deleted_count == 0 {
            session.abort_transaction().await?;
            return Ok(false);
        }
        self.votes
            .delete_many_with_session(doc! { "poll_id": id }, None, session)
            .await?;

        commit(session).await?;
        Ok(true)
    }
}

/// Commit the session's transaction. A commit whose outcome is unknown is
/// retried on its own, since rerunning the transaction could apply it twice.
async fn commit(session: &mut ClientSession) -> Result<()> {
    let mut attempt = 1;
    loop {
        match session.commit_transaction().await {
            Err(err) if is_unknown_commit_result(&err) && attempt < MAX_TRANSACTION_ATTEMPTS => {
                debug!("Transaction commit result unknown (attempt {attempt}), retrying commit");
                attempt += 1;
            }
            result => return Ok(result?),
        }
    }
}

fn filter_document(filter: &PollFilter) -> Document {
    let mut document = Document::new();
    if let Some(status) = filter.status {
        document.insert("status", status);
    }
    if let Some(group) = filter.group {
        document.insert("group_id", group);
    }
    if let Some(groups) = &filter.visible_groups {
        let groups: Vec<_> = groups.iter().copied().map(bson::Bson::from).collect();
        document.insert(
            "$or",
            vec![
                doc! { "group_id": null },
                doc! { "group_id": { "$in": groups } },
            ],
        );
    }
    document
}

#[rocket::async_trait]
impl super::PollStore for MongoStore {
    async fn insert_poll(&self, poll: NewPoll) -> Result<Poll> {
        let id: Id = self
            .new_polls
            .insert_one(&poll, None)
            .await?
            .inserted_id
            .as_object_id()
            .unwrap() // Valid because the ID comes directly from the DB
            .into();
        Ok(Poll { id, poll })
    }

    async fn poll(&self, id: Id) -> Result<Option<Poll>> {
        Ok(self.polls.find_one(id.as_doc(), None).await?)
    }

    async fn polls(&self, filter: &PollFilter) -> Result<Vec<Poll>> {
        let options = FindOptions::builder()
            .sort(doc! { "created_at": -1 })
            .build();
        let polls = self
            .polls
            .find(filter_document(filter), options)
            .await?
            .try_collect()
            .await?;
        Ok(polls)
    }

    async fn update_poll(
        &self,
        id: Id,
        changes: &PollChanges,
        now: DateTime<Utc>,
    ) -> Result<Option<Poll>> {
        let mut filter = doc! {
            "_id": id,
            "status": PollStatus::Active,
        };
        let mut end_time_guard = doc! { "$gte": bson::DateTime::from_chrono(now) };
        let mut set = Document::new();
        let mut unset = Document::new();
        // Votes live in their own collection, so a vote landing between this
        // check and the update below can still see the old content.
        if changes.touches_content()
            && self.votes.find_one(doc! { "poll_id": id }, None).await?.is_some()
        {
            return Ok(None);
        }
        if let Some(question) = &changes.question {
            set.insert("question", question);
        }
        match &changes.description {
            Some(Some(description)) => {
                set.insert("description", description);
            }
            Some(None) => {
                unset.insert("description", "");
            }
            None => {}
        }
        if let Some(options) = &changes.options {
            set.insert("options", options.encode());
        }
        if let Some(end_time) = changes.end_time {
            let end_time = bson::DateTime::from_chrono(end_time);
            end_time_guard.insert("$lte", end_time);
            set.insert("end_time", end_time);
        }
        filter.insert("end_time", end_time_guard);

        let mut update = Document::new();
        if !set.is_empty() {
            update.insert("$set", set);
        }
        if !unset.is_empty() {
            update.insert("$unset", unset);
        }
        if update.is_empty() {
            return Ok(self.polls.find_one(filter, None).await?);
        }

        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        Ok(self
            .polls
            .find_one_and_update(filter, update, options)
            .await?)
    }

    async fn delete_poll(&self, id: Id) -> Result<bool> {
        let mut attempt = 1;
        loop {
            // A fresh session per attempt; dropping one aborts its open transaction.
            let mut session = self.client.start_session(None).await?;
            match self.try_delete_poll(id, &mut session).await {
                Err(Error::Db(err))
                    if is_transient_transaction_error(&err)
                        && attempt < MAX_TRANSACTION_ATTEMPTS =>
                {
                    debug!("Deleting poll {id} conflicted (attempt {attempt}), retrying");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn transition_poll(
        &self,
        id: Id,
        status: PollStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if !PollStatus::Active.can_transition_to(status) {
            return Ok(false);
        }
        let mut filter = doc! {
            "_id": id,
            "status": PollStatus::Active,
        };
        if status == PollStatus::Ended {
            filter.insert("end_time", doc! { "$lte": bson::DateTime::from_chrono(now) });
        }
        let update = doc! { "$set": { "status": status } };
        let result = self.polls.update_one(filter, update, None).await?;
        Ok(result.modified_count == 1)
    }

    async fn expired_polls(&self, now: DateTime<Utc>) -> Result<Vec<Id>> {
        let filter = doc! {
            "status": PollStatus::Active,
            "end_time": { "$lte": bson::DateTime::from_chrono(now) },
        };
        let options = FindOptions::builder().projection(doc! { "_id": 1 }).build();
        let ids = self
            .poll_refs
            .find(filter, options)
            .await?
            .map_ok(|poll| poll.id)
            .try_collect()
            .await?;
        Ok(ids)
    }

    /// Votes never write to the poll document, so voters on the same poll
    /// do not contend with each other. The unique (poll, voter) index is the
    /// only arbiter of duplicates.
    async fn insert_vote(&self, vote: NewVote) -> Result<Vote> {
        let poll = self
            .polls
            .find_one(vote.poll_id.as_doc(), None)
            .await?
            .ok_or(Error::PollNotFound(vote.poll_id))?;
        if !poll.is_open(vote.voted_at) {
            return Err(Error::PollNotActive(vote.poll_id));
        }

        // The ID is chosen here so that a retried write can recognise itself.
        let vote = Vote {
            id: Id::new(),
            vote,
        };
        match self.votes.insert_one(&vote, None).await {
            Ok(_) => Ok(vote),
            Err(err) if is_duplicate_key_error(&err) => {
                match self.vote(vote.poll_id, vote.voter_id).await? {
                    Some(existing) if existing.id == vote.id => Ok(vote),
                    _ => Err(Error::AlreadyVoted(vote.poll_id)),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn vote(&self, poll: Id, voter: Id) -> Result<Option<Vote>> {
        let filter = doc! {
            "poll_id": poll,
            "voter_id": voter,
        };
        Ok(self.votes.find_one(filter, None).await?)
    }

    async fn vote_counts(&self, poll: Id) -> Result<HashMap<u32, u64>> {
        let pipeline = vec![
            doc! { "$match": { "poll_id": poll } },
            doc! { "$group": { "_id": "$option_selected", "count": { "$sum": 1 } } },
        ];
        let mut counts = HashMap::new();
        let mut cursor = self.votes.aggregate(pipeline, None).await?;
        while let Some(document) = cursor.try_next().await? {
            let count: OptionCount = bson::from_document(document)
                .map_err(|e| Error::Db(e.into()))?;
            counts.insert(count.option_selected, count.count);
        }
        Ok(counts)
    }

    async fn membership(&self, group: Id, user: Id) -> Result<Option<GroupMembership>> {
        let filter = doc! {
            "group_id": group,
            "user_id": user,
        };
        Ok(self.memberships.find_one(filter, None).await?)
    }

    async fn approved_groups(&self, user: Id) -> Result<Vec<Id>> {
        let filter = doc! {
            "user_id": user,
            "status": MembershipStatus::Approved,
        };
        let groups = self
            .memberships
            .find(filter, None)
            .await?
            .map_ok(|membership| membership.group_id)
            .try_collect()
            .await?;
        Ok(groups)
    }

    async fn approved_member_count(&self, group: Id) -> Result<u64> {
        let filter = doc! {
            "group_id": group,
            "status": MembershipStatus::Approved,
        };
        Ok(self.memberships.count_documents(filter, None).await?)
    }
}
