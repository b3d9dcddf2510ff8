use chrono::Utc;
use rocket::{http::Status, serde::json::Json, Route, State};

use crate::engine::{access::results_visible, Engine};
use crate::error::{Error, Result};
use crate::model::{
    api::{
        auth::AuthToken,
        poll::{PollDescription, PollSpec, PollSummary, PollUpdate},
    },
    common::{poll::PollStatus, results::ResultSnapshot},
    db::poll::{Poll, PollChanges},
    mongodb::Id,
};
use crate::store::{PollFilter, Store};

pub fn routes() -> Vec<Route> {
    routes![
        create_poll,
        list_polls,
        get_poll,
        poll_results,
        update_poll,
        cancel_poll,
        delete_poll,
    ]
}

#[post("/polls", data = "<spec>", format = "json")]
async fn create_poll(
    token: AuthToken,
    spec: Json<PollSpec>,
    engine: &State<Engine>,
) -> Result<(Status, Json<PollSummary>)> {
    let poll = engine.lifecycle.create(token.user, spec.into_inner()).await?;
    Ok((Status::Created, Json(poll.into())))
}

/// Public polls plus the polls of every group the caller is an approved member of.
#[get("/polls?<group>&<status>")]
async fn list_polls(
    token: Option<AuthToken>,
    group: Option<Id>,
    status: Option<PollStatus>,
    engine: &State<Engine>,
    store: &State<Store>,
) -> Result<Json<Vec<PollSummary>>> {
    let visible_groups = match token {
        Some(token) => engine.membership.approved_groups(token.user).await?,
        None => Vec::new(),
    };
    let filter = PollFilter {
        status,
        group,
        visible_groups: Some(visible_groups),
    };
    let polls = store.polls(&filter).await?;
    Ok(Json(polls.into_iter().map(PollSummary::from).collect()))
}

#[get("/polls/<id>")]
async fn get_poll(
    id: Id,
    token: Option<AuthToken>,
    engine: &State<Engine>,
    store: &State<Store>,
) -> Result<Json<PollDescription>> {
    let poll = viewable_poll(id, token, engine, store).await?;
    let viewer = engine.access.viewer(&poll, token.map(|t| t.user)).await?;
    let results = if results_visible(&poll, viewer, Utc::now()) {
        Some(engine.aggregator.compute_for(&poll).await?)
    } else {
        None
    };
    Ok(Json(PollDescription::new(poll, results, viewer.has_voted)))
}

#[get("/polls/<id>/results")]
async fn poll_results(
    id: Id,
    token: Option<AuthToken>,
    engine: &State<Engine>,
    store: &State<Store>,
) -> Result<Json<ResultSnapshot>> {
    let poll = viewable_poll(id, token, engine, store).await?;
    let viewer = engine.access.viewer(&poll, token.map(|t| t.user)).await?;
    if !results_visible(&poll, viewer, Utc::now()) {
        return Err(Error::ResultsHidden(id));
    }
    Ok(Json(engine.aggregator.compute_for(&poll).await?))
}

#[put("/polls/<id>", data = "<update>", format = "json")]
async fn update_poll(
    token: AuthToken,
    id: Id,
    update: Json<PollUpdate>,
    engine: &State<Engine>,
) -> Result<Json<PollSummary>> {
    let changes = PollChanges::try_from(update.into_inner())?;
    let poll = engine.lifecycle.update(id, token.user, changes).await?;
    Ok(Json(poll.into()))
}

#[post("/polls/<id>/cancel")]
async fn cancel_poll(token: AuthToken, id: Id, engine: &State<Engine>) -> Result<Json<PollSummary>> {
    let poll = engine.lifecycle.cancel(id, token.user).await?;
    Ok(Json(poll.into()))
}

#[delete("/polls/<id>")]
async fn delete_poll(token: AuthToken, id: Id, engine: &State<Engine>) -> Result<Status> {
    engine.lifecycle.delete(id, token.user).await?;
    Ok(Status::NoContent)
}

/// Fetch a poll the caller is allowed to look at.
async fn viewable_poll(
    id: Id,
    token: Option<AuthToken>,
    engine: &Engine,
    store: &Store,
) -> Result<Poll> {
    let poll = store.poll(id).await?.ok_or(Error::PollNotFound(id))?;
    engine.access.check_view(&poll, token.map(|t| t.user)).await?;
    Ok(poll)
}
