use rocket::{serde::json::Json, Route, State};

use crate::engine::Engine;
use crate::error::Result;
use crate::model::{
    api::{auth::AuthToken, group::GroupStats},
    common::poll::PollStatus,
    mongodb::Id,
};
use crate::store::{PollFilter, Store};

pub fn routes() -> Vec<Route> {
    routes![group_stats]
}

/// Voting activity across every poll of a group. Approved members only.
#[get("/groups/<group>/stats")]
async fn group_stats(
    token: AuthToken,
    group: Id,
    engine: &State<Engine>,
    store: &State<Store>,
) -> Result<Json<GroupStats>> {
    engine.membership.require_approved(group, token.user).await?;

    let filter = PollFilter {
        group: Some(group),
        ..Default::default()
    };
    let polls = store.polls(&filter).await?;
    let active_polls = polls
        .iter()
        .filter(|poll| poll.status == PollStatus::Active)
        .count() as u64;
    let mut total_votes = 0;
    for poll in &polls {
        total_votes += store.vote_counts(poll.id).await?.values().sum::<u64>();
    }
    let approved_members = engine.membership.approved_member_count(group).await?;

    Ok(Json(GroupStats::new(
        polls.len() as u64,
        active_polls,
        total_votes,
        approved_members,
    )))
}

#[cfg(test)]
mod tests {
    use rocket::{http::Status, local::asynchronous::Client, serde::json::Value};

    use crate::model::{
        api::poll::PollSpec, common::poll::PollKind, db::membership::GroupMembership,
    };
    use crate::store::MemoryStore;

    use super::*;

    #[backend_test]
    async fn stats_for_members_only(client: Client, store: MemoryStore) {
        let engine = client.rocket().state::<Engine>().unwrap();
        let (creator, member, outsider, group) = (Id::new(), Id::new(), Id::new(), Id::new());
        store.put_membership(GroupMembership::approved(group, creator));
        store.put_membership(GroupMembership::approved(group, member));

        let spec = PollSpec::group_example(group, PollKind::Standard);
        let first = engine.lifecycle.create(creator, spec.clone()).await.unwrap();
        let second = engine.lifecycle.create(creator, spec).await.unwrap();
        engine.admission.admit(first.id, member, 1).await.unwrap();
        engine.lifecycle.cancel(second.id, creator).await.unwrap();

        let response = client
            .get(uri!(group_stats(group)))
            .header(AuthToken::header_for(member))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let stats: Value = response.into_json().await.unwrap();
        assert_eq!(stats["totalPolls"], 2);
        assert_eq!(stats["activePolls"], 1);
        assert_eq!(stats["totalVotes"], 1);
        assert_eq!(stats["approvedMembers"], 2);
        assert_eq!(stats["participationRate"], 50.0);

        let response = client
            .get(uri!(group_stats(group)))
            .header(AuthToken::header_for(outsider))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["error"], "GROUP_MEMBERSHIP_REQUIRED");
    }
}
