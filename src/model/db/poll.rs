use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::{
    common::{
        options::PollOptions,
        poll::{PollKind, PollStatus, Visibility},
    },
    mongodb::Id,
};

/// Core poll data, as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollCore {
    pub question: String,
    #[serde(default)]
    pub description: Option<String>,
    pub options: PollOptions,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub end_time: DateTime<Utc>,
    pub visibility: Visibility,
    /// Owning group; always present for group-scoped polls.
    #[serde(default)]
    pub group_id: Option<Id>,
    pub kind: PollKind,
    pub show_results_on_vote: bool,
    pub created_by: Id,
    pub status: PollStatus,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl PollCore {
    /// Has voting closed, either by reaching the end time or by a terminal transition?
    pub fn has_closed(&self, now: DateTime<Utc>) -> bool {
        self.status != PollStatus::Active || now > self.end_time
    }

    /// Is the poll accepting votes at `now`?
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        !self.has_closed(now)
    }

    pub fn is_creator(&self, user: Id) -> bool {
        self.created_by == user
    }
}

/// A poll without an ID.
pub type NewPoll = PollCore;

/// A poll from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poll {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub poll: PollCore,
}

impl Deref for Poll {
    type Target = PollCore;

    fn deref(&self) -> &Self::Target {
        &self.poll
    }
}

impl DerefMut for Poll {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.poll
    }
}

/// Only the ID of a poll, for cheap scans.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PollRef {
    #[serde(rename = "_id")]
    pub id: Id,
}

/// Changes a creator may request to an existing poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollChanges {
    pub question: Option<String>,
    /// `Some(None)` clears the description.
    pub description: Option<Option<String>>,
    pub options: Option<PollOptions>,
    pub end_time: Option<DateTime<Utc>>,
}

impl PollChanges {
    /// Does this change touch anything that is frozen once votes exist?
    pub fn touches_content(&self) -> bool {
        self.question.is_some() || self.description.is_some() || self.options.is_some()
    }

    pub fn is_empty(&self) -> bool {
        !self.touches_content() && self.end_time.is_none()
    }

    /// Apply the changes to a poll. Guards are checked by the caller.
    pub fn apply_to(&self, poll: &mut PollCore) {
        if let Some(question) = &self.question {
            poll.question = question.clone();
        }
        if let Some(description) = &self.description {
            poll.description = description.clone();
        }
        if let Some(options) = &self.options {
            poll.options = options.clone();
        }
        if let Some(end_time) = self.end_time {
            poll.end_time = end_time;
        }
    }
}
