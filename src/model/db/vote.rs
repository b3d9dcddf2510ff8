use std::ops::Deref;

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// Core vote data, as stored in the database. Votes are never modified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCore {
    pub poll_id: Id,
    pub voter_id: Id,
    /// 1-based index into the poll's options.
    pub option_selected: u32,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub voted_at: DateTime<Utc>,
}

impl VoteCore {
    /// Create a vote timestamped now.
    pub fn new(poll_id: Id, voter_id: Id, option_selected: u32) -> Self {
        Self {
            poll_id,
            voter_id,
            option_selected,
            voted_at: Utc::now(),
        }
    }
}

/// A vote without an ID.
pub type NewVote = VoteCore;

/// A vote from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub vote: VoteCore,
}

impl Deref for Vote {
    type Target = VoteCore;

    fn deref(&self) -> &Self::Target {
        &self.vote
    }
}

/// Per-option vote count, as produced by the aggregation pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OptionCount {
    #[serde(rename = "_id")]
    pub option_selected: u32,
    pub count: u64,
}
