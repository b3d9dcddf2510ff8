use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    api::id::ApiId, common::results::ResultSnapshot, db::vote::Vote,
};

/// A vote as submitted by a voter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub poll_id: ApiId,
    /// 1-based index into the poll's options.
    pub option_selected: u32,
}

/// Response to an admitted vote. `results` is withheld for polls that do
/// not reveal results to voters yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoteResponse {
    pub results: Option<ResultSnapshot>,
}

/// Whether the caller has voted on a poll, and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteCheck {
    pub has_voted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub option_selected: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voted_at: Option<DateTime<Utc>>,
}

impl From<Option<Vote>> for VoteCheck {
    fn from(vote: Option<Vote>) -> Self {
        match vote {
            Some(vote) => Self {
                has_voted: true,
                option_selected: Some(vote.option_selected),
                voted_at: Some(vote.voted_at),
            },
            None => Self {
                has_voted: false,
                option_selected: None,
                voted_at: None,
            },
        }
    }
}
