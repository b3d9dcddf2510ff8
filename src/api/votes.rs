use rocket::{serde::json::Json, Route, State};

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::model::{
    api::{
        auth::AuthToken,
        vote::{VoteCheck, VoteRequest, VoteResponse},
    },
    mongodb::Id,
};
use crate::store::Store;

pub fn routes() -> Vec<Route> {
    routes![cast_vote, check_vote]
}

#[post("/votes", data = "<request>", format = "json")]
async fn cast_vote(
    token: AuthToken,
    request: Json<VoteRequest>,
    engine: &State<Engine>,
) -> Result<Json<VoteResponse>> {
    let admitted = engine
        .admission
        .admit(request.poll_id.into(), token.user, request.option_selected)
        .await?;
    let results = admitted.results_visible.then_some(admitted.results);
    Ok(Json(VoteResponse { results }))
}

#[get("/votes/check/<poll_id>")]
async fn check_vote(token: AuthToken, poll_id: Id, store: &State<Store>) -> Result<Json<VoteCheck>> {
    if store.poll(poll_id).await?.is_none() {
        return Err(Error::PollNotFound(poll_id));
    }
    let vote = store.vote(poll_id, token.user).await?;
    Ok(Json(vote.into()))
}
