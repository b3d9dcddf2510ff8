use serde::{Deserialize, Serialize};

use crate::model::{
    common::membership::{MembershipRole, MembershipStatus},
    mongodb::Id,
};

/// A user's membership of a group. Owned by the group service; read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMembership {
    pub group_id: Id,
    pub user_id: Id,
    pub role: MembershipRole,
    pub status: MembershipStatus,
}

impl GroupMembership {
    pub fn is_approved(&self) -> bool {
        self.status == MembershipStatus::Approved
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl GroupMembership {
        pub fn approved(group_id: Id, user_id: Id) -> Self {
            Self {
                group_id,
                user_id,
                role: MembershipRole::Member,
                status: MembershipStatus::Approved,
            }
        }

        pub fn pending(group_id: Id, user_id: Id) -> Self {
            Self {
                status: MembershipStatus::Pending,
                ..Self::approved(group_id, user_id)
            }
        }
    }
}
