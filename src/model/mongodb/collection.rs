use std::ops::Deref;

use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};

use crate::model::db::{
    membership::GroupMembership,
    poll::{NewPoll, Poll, PollRef},
    vote::Vote,
};

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// Poll collections
const POLLS: &str = "polls";
impl MongoCollection for Poll {
    const NAME: &'static str = POLLS;
}
impl MongoCollection for NewPoll {
    const NAME: &'static str = POLLS;
}
impl MongoCollection for PollRef {
    const NAME: &'static str = POLLS;
}

// Vote collection. Vote IDs are chosen before insert, so there is no `NewVote` view.
impl MongoCollection for Vote {
    const NAME: &'static str = "votes";
}

// Membership collection, owned by the group service.
const MEMBERSHIPS: &str = "group_memberships";
impl MongoCollection for GroupMembership {
    const NAME: &'static str = MEMBERSHIPS;
}

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    // One vote per voter per poll. This is the authoritative duplicate check.
    let vote_index = IndexModel::builder()
        .keys(doc! {"poll_id": 1, "voter_id": 1})
        .options(unique.clone())
        .build();
    Coll::<Vote>::from_db(db)
        .create_index(vote_index, None)
        .await?;

    // The sweep scans active polls by end time.
    let sweep_index = IndexModel::builder()
        .keys(doc! {"status": 1, "end_time": 1})
        .build();
    Coll::<Poll>::from_db(db)
        .create_index(sweep_index, None)
        .await?;

    let group_index = IndexModel::builder()
        .keys(doc! {"group_id": 1, "created_at": -1})
        .build();
    Coll::<Poll>::from_db(db)
        .create_index(group_index, None)
        .await?;

    let membership_index = IndexModel::builder()
        .keys(doc! {"group_id": 1, "user_id": 1})
        .options(unique)
        .build();
    Coll::<GroupMembership>::from_db(db)
        .create_index(membership_index, None)
        .await?;

    Ok(())
}
