use rocket::{Catcher, Route};

use crate::error::default_catcher;

mod groups;
mod live;
mod polls;
mod votes;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(polls::routes());
    routes.extend(votes::routes());
    routes.extend(groups::routes());
    routes.extend(live::routes());
    routes
}

pub fn catchers() -> Vec<Catcher> {
    catchers![default_catcher]
}
