use mongodb::bson::{to_bson, Bson};
use rocket::FromFormField;
use serde::{Deserialize, Serialize};

/// States in the poll lifecycle. Both `Ended` and `Cancelled` are terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, FromFormField)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    /// Open for voting until the end time.
    Active,
    /// Ended by the sweep once the end time passed.
    Ended,
    /// Closed early by the creator. Existing votes are kept.
    Cancelled,
}

impl PollStatus {
    /// Can a poll move from this state to `next`?
    pub fn can_transition_to(self, next: PollStatus) -> bool {
        matches!(
            (self, next),
            (PollStatus::Active, PollStatus::Ended) | (PollStatus::Active, PollStatus::Cancelled)
        )
    }
}

impl From<PollStatus> for Bson {
    fn from(status: PollStatus) -> Self {
        to_bson(&status).expect("Serialisation is infallible")
    }
}

/// How results are revealed, and whether the options are fixed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PollKind {
    /// Live results for participants.
    Standard,
    /// Results withheld until the poll ends.
    BlindVote,
    /// Exactly two fixed options.
    Binary,
}

impl From<PollKind> for Bson {
    fn from(kind: PollKind) -> Self {
        to_bson(&kind).expect("Serialisation is infallible")
    }
}

/// Who may see and vote on a poll.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Visibility {
    Public,
    /// Only approved members of the owning group.
    GroupScoped,
}

impl From<Visibility> for Bson {
    fn from(visibility: Visibility) -> Self {
        to_bson(&visibility).expect("Serialisation is infallible")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_active_polls_transition() {
        use PollStatus::*;
        assert!(Active.can_transition_to(Ended));
        assert!(Active.can_transition_to(Cancelled));
        for terminal in [Ended, Cancelled] {
            for next in [Active, Ended, Cancelled] {
                assert!(!terminal.can_transition_to(next));
            }
        }
        assert!(!Active.can_transition_to(Active));
    }

    #[test]
    fn wire_names() {
        assert_eq!(to_bson(&PollKind::BlindVote).unwrap(), Bson::from("blind-vote"));
        assert_eq!(to_bson(&Visibility::GroupScoped).unwrap(), Bson::from("group-scoped"));
        assert_eq!(Bson::from(PollStatus::Active), Bson::from("active"));
    }
}
