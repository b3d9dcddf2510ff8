//! Messages exchanged over the `/live` websocket. Every message is a JSON
//! object of the form `{"event": <name>, "data": {...}}`.

use serde::{Deserialize, Serialize};

use crate::model::{api::id::ApiId, common::results::ResultSnapshot, mongodb::Id};

/// An event pushed from the server to subscribers.
///
/// Snapshots are `None` whenever a participant would not be allowed to see
/// them yet; clients then re-fetch the poll to learn what they may see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum LiveEvent {
    #[serde(rename = "vote:new", rename_all = "camelCase")]
    VoteNew {
        poll_id: ApiId,
        results: Option<ResultSnapshot>,
    },
    #[serde(rename = "poll:ended", rename_all = "camelCase")]
    PollEnded {
        poll_id: ApiId,
        final_results: Option<ResultSnapshot>,
    },
    #[serde(rename = "poll:cancelled", rename_all = "camelCase")]
    PollCancelled { poll_id: ApiId },
    #[serde(rename = "group:new-poll", rename_all = "camelCase")]
    GroupNewPoll {
        group_id: ApiId,
        poll_id: ApiId,
        question: String,
    },
    /// Sent only to the connection whose message could not be handled.
    #[serde(rename = "error")]
    Error { message: String },
}

impl LiveEvent {
    pub fn vote_new(poll: Id, results: Option<ResultSnapshot>) -> Self {
        Self::VoteNew {
            poll_id: poll.into(),
            results,
        }
    }

    pub fn poll_ended(poll: Id, final_results: Option<ResultSnapshot>) -> Self {
        Self::PollEnded {
            poll_id: poll.into(),
            final_results,
        }
    }

    pub fn poll_cancelled(poll: Id) -> Self {
        Self::PollCancelled {
            poll_id: poll.into(),
        }
    }

    pub fn group_new_poll(group: Id, poll: Id, question: impl Into<String>) -> Self {
        Self::GroupNewPoll {
            group_id: group.into(),
            poll_id: poll.into(),
            question: question.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// A subscription request from a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "poll:join", rename_all = "camelCase")]
    PollJoin { poll_id: ApiId },
    #[serde(rename = "poll:leave", rename_all = "camelCase")]
    PollLeave { poll_id: ApiId },
    #[serde(rename = "group:join", rename_all = "camelCase")]
    GroupJoin { group_id: ApiId },
    #[serde(rename = "group:leave", rename_all = "camelCase")]
    GroupLeave { group_id: ApiId },
}

#[cfg(test)]
mod tests {
    use rocket::serde::json::{serde_json, serde_json::json};

    use super::*;

    #[test]
    fn event_envelope() {
        let poll = Id::new();
        let event = LiveEvent::poll_ended(poll, None);
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "event": "poll:ended",
                "data": { "pollId": poll.to_string(), "finalResults": null },
            })
        );
    }

    #[test]
    fn parses_client_messages() {
        let group = Id::new();
        let text = format!(r#"{{"event":"group:join","data":{{"groupId":"{group}"}}}}"#);
        let message: ClientMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(
            message,
            ClientMessage::GroupJoin {
                group_id: group.into()
            }
        );
        assert!(serde_json::from_str::<ClientMessage>(r#"{"event":"poll:join"}"#).is_err());
    }
}
