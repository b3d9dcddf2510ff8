use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    api::id::ApiId,
    common::{
        options::PollOptions,
        poll::{PollKind, PollStatus, Visibility},
        results::ResultSnapshot,
    },
    db::poll::{NewPoll, Poll, PollChanges},
    mongodb::Id,
};

/// A poll as requested by its creator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollSpec {
    pub question: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Ignored for binary polls, which always offer "Yes" and "No".
    #[serde(default)]
    pub options: Vec<String>,
    pub end_time: DateTime<Utc>,
    pub visibility: Visibility,
    #[serde(default)]
    pub group_id: Option<ApiId>,
    pub kind: PollKind,
    #[serde(default = "default_show_results_on_vote")]
    pub show_results_on_vote: bool,
}

fn default_show_results_on_vote() -> bool {
    true
}

impl PollSpec {
    /// Validate the request and turn it into a new active poll owned by `creator`.
    pub fn into_poll(self, creator: Id, now: DateTime<Utc>) -> Result<NewPoll> {
        let question = non_blank(self.question, "question")?;
        if self.end_time <= now {
            return Err(Error::InvalidPoll("end time must be in the future".to_string()));
        }
        let options = match self.kind {
            PollKind::Binary => PollOptions::binary(),
            _ => PollOptions::new(self.options).map_err(|e| Error::InvalidPoll(e.to_string()))?,
        };
        let group_id = match (self.visibility, self.group_id) {
            (Visibility::Public, None) => None,
            (Visibility::GroupScoped, Some(group)) => Some(group.into()),
            (Visibility::Public, Some(_)) => {
                return Err(Error::InvalidPoll("public polls cannot belong to a group".to_string()))
            }
            (Visibility::GroupScoped, None) => {
                return Err(Error::InvalidPoll("group-scoped polls need a groupId".to_string()))
            }
        };

        Ok(NewPoll {
            question,
            description: self.description.filter(|d| !d.trim().is_empty()),
            options,
            end_time: self.end_time,
            visibility: self.visibility,
            group_id,
            kind: self.kind,
            show_results_on_vote: self.show_results_on_vote,
            created_by: creator,
            status: PollStatus::Active,
            created_at: now,
        })
    }
}

/// Changes requested by a poll's creator. Absent fields are left alone;
/// an explicit `"description": null` clears the description.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollUpdate {
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub options: Option<Vec<String>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

/// Distinguish a field that is present but null from one that is absent.
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

impl TryFrom<PollUpdate> for PollChanges {
    type Error = Error;

    fn try_from(update: PollUpdate) -> Result<Self> {
        let question = update
            .question
            .map(|q| non_blank(q, "question"))
            .transpose()?;
        let options = update
            .options
            .map(|o| PollOptions::new(o).map_err(|e| Error::InvalidPoll(e.to_string())))
            .transpose()?;
        let changes = PollChanges {
            question,
            description: update.description,
            options,
            end_time: update.end_time,
        };
        if changes.is_empty() {
            return Err(Error::InvalidPoll("no changes requested".to_string()));
        }
        Ok(changes)
    }
}

fn non_blank(text: String, field: &str) -> Result<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidPoll(format!("{field} must not be blank")));
    }
    Ok(trimmed.to_string())
}

/// A poll as shown to one particular user.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollDescription {
    #[serde(flatten)]
    pub poll: PollSummary,
    /// Present only when the user may see results.
    pub results: Option<ResultSnapshot>,
    pub has_voted: bool,
}

impl PollDescription {
    pub fn new(poll: Poll, results: Option<ResultSnapshot>, has_voted: bool) -> Self {
        Self {
            poll: poll.into(),
            results,
            has_voted,
        }
    }
}

/// A poll in a listing, without any per-user fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollSummary {
    pub id: ApiId,
    pub question: String,
    pub description: Option<String>,
    pub options: Vec<String>,
    pub end_time: DateTime<Utc>,
    pub visibility: Visibility,
    pub group_id: Option<ApiId>,
    pub kind: PollKind,
    pub show_results_on_vote: bool,
    pub created_by: ApiId,
    pub status: PollStatus,
    pub created_at: DateTime<Utc>,
}

impl From<Poll> for PollSummary {
    fn from(poll: Poll) -> Self {
        let Poll { id, poll } = poll;
        Self {
            id: id.into(),
            question: poll.question,
            description: poll.description,
            options: poll.options.into_inner(),
            end_time: poll.end_time,
            visibility: poll.visibility,
            group_id: poll.group_id.map(ApiId::from),
            kind: poll.kind,
            show_results_on_vote: poll.show_results_on_vote,
            created_by: poll.created_by.into(),
            status: poll.status,
            created_at: poll.created_at,
        }
    }
}


#[cfg(test)]
mod tests {
    use chrono::Duration;
    use rocket::serde::json::serde_json;

    use super::*;

    #[test]
    fn creation_requests_are_validated() {
        let now = Utc::now();
        let creator = Id::new();

        let poll = PollSpec::example().into_poll(creator, now).unwrap();
        assert_eq!(poll.status, PollStatus::Active);
        assert_eq!(&*poll.options, ["A", "B"]);

        let past = PollSpec {
            end_time: now - Duration::seconds(1),
            ..PollSpec::example()
        };
        assert!(matches!(past.into_poll(creator, now), Err(Error::InvalidPoll(_))));

        let too_many = PollSpec {
            options: ["1", "2", "3", "4", "5"].map(String::from).to_vec(),
            ..PollSpec::example()
        };
        assert!(matches!(too_many.into_poll(creator, now), Err(Error::InvalidPoll(_))));

        let orphan = PollSpec {
            visibility: Visibility::GroupScoped,
            ..PollSpec::example()
        };
        assert!(matches!(orphan.into_poll(creator, now), Err(Error::InvalidPoll(_))));
    }

    #[test]
    fn binary_polls_ignore_requested_options() {
        let spec = PollSpec::group_example(Id::new(), PollKind::Binary);
        let poll = spec.into_poll(Id::new(), Utc::now()).unwrap();
        assert_eq!(&*poll.options, ["Yes", "No"]);
    }

    #[test]
    fn update_distinguishes_null_from_absent() {
        let cleared: PollUpdate = serde_json::from_str(r#"{"description": null}"#).unwrap();
        assert_eq!(cleared.description, Some(None));
        let untouched: PollUpdate = serde_json::from_str(r#"{"question": "Q?"}"#).unwrap();
        assert_eq!(untouched.description, None);

        let changes = PollChanges::try_from(cleared).unwrap();
        assert!(changes.touches_content());
        assert!(PollChanges::try_from(PollUpdate::default()).is_err());
    }
}
