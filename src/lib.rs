#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{figment::Figment, Build, Rocket};

use crate::config::{ConfigFairing, StoreFairing};
use crate::engine::{EngineFairing, SweeperFairing};
use crate::logging::LoggerFairing;
use crate::store::Store;

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod model;
pub mod periodic_task;
pub mod store;

/// Build the server from `Rocket.toml` and the environment.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .attach(ConfigFairing)
        .attach(StoreFairing)
        .attach(EngineFairing)
        .attach(SweeperFairing::default())
        .attach(LoggerFairing)
        .mount("/", api::routes())
        .register("/", api::catchers())
}

/// Build the server around an existing store instead of configuring one.
pub fn rocket_for_store(figment: Figment, store: Store) -> Rocket<Build> {
    rocket::custom(figment)
        .manage(store)
        .attach(ConfigFairing)
        .attach(EngineFairing)
        .attach(SweeperFairing::default())
        .attach(LoggerFairing)
        .mount("/", api::routes())
        .register("/", api::catchers())
}

#[cfg(test)]
pub(crate) const TEST_JWT_SECRET: &str = "test-secret";

/// Server configuration for tests: a known JWT secret and no background sweep.
#[cfg(test)]
pub(crate) fn test_figment() -> Figment {
    rocket::Config::figment()
        .merge(("jwt_secret", TEST_JWT_SECRET))
        .merge(("sweep_enabled", false))
}
