use mongodb::bson::{to_bson, Bson};
use serde::{Deserialize, Serialize};

/// A member's role within a group.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipRole {
    Member,
    Admin,
}

/// Whether a membership request has been accepted.
/// Only approved memberships grant any rights over group-scoped polls.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipStatus {
    Pending,
    Approved,
}

impl From<MembershipStatus> for Bson {
    fn from(status: MembershipStatus) -> Self {
        to_bson(&status).expect("Serialisation is infallible")
    }
}
