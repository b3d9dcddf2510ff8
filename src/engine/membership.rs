use crate::error::{Error, Result};
use crate::model::mongodb::Id;
use crate::store::Store;

/// Answers "is this user an approved member of that group?".
/// Pending memberships grant nothing.
#[derive(Clone)]
pub struct MembershipGate {
    store: Store,
}

impl MembershipGate {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn is_approved_member(&self, group: Id, user: Id) -> Result<bool> {
        let membership = self.store.membership(group, user).await?;
        Ok(membership.map_or(false, |m| m.is_approved()))
    }

    /// Fail with `GroupMembershipRequired` unless the user is an approved member.
    pub async fn require_approved(&self, group: Id, user: Id) -> Result<()> {
        if self.is_approved_member(group, user).await? {
            Ok(())
        } else {
            Err(Error::GroupMembershipRequired(group))
        }
    }

    pub async fn approved_groups(&self, user: Id) -> Result<Vec<Id>> {
        self.store.approved_groups(user).await
    }

    pub async fn approved_member_count(&self, group: Id) -> Result<u64> {
        self.store.approved_member_count(group).await
    }
}
