//! The vote integrity core.
//!
//! Votes flow through [`AccessEvaluator`] (may this user vote?),
//! [`VoteAdmission`] (store it exactly once), [`Aggregator`] (recount) and
//! [`Fanout`] (tell live subscribers). [`LifecycleManager`] ends expired
//! polls independently and announces them the same way.

use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};

use crate::config::Config;
use crate::store::Store;

pub mod access;
pub mod admission;
pub mod aggregator;
pub mod fanout;
pub mod lifecycle;
pub mod membership;

pub use access::AccessEvaluator;
pub use admission::VoteAdmission;
pub use aggregator::Aggregator;
pub use fanout::{Fanout, Topic};
pub use lifecycle::{LifecycleManager, SweepReport, SweeperFairing};
pub use membership::MembershipGate;

/// Every engine component, wired to one store and one fan-out.
/// This is managed state.
#[derive(Clone)]
pub struct Engine {
    pub membership: MembershipGate,
    pub access: AccessEvaluator,
    pub aggregator: Aggregator,
    pub admission: VoteAdmission,
    pub lifecycle: LifecycleManager,
    pub fanout: Fanout,
}

impl Engine {
    pub fn new(store: Store, channel_capacity: usize) -> Self {
        let fanout = Fanout::new(channel_capacity);
        let membership = MembershipGate::new(store.clone());
        let access = AccessEvaluator::new(store.clone(), membership.clone());
        let aggregator = Aggregator::new(store.clone());
        let admission = VoteAdmission::new(
            store.clone(),
            access.clone(),
            aggregator.clone(),
            fanout.clone(),
        );
        let lifecycle =
            LifecycleManager::new(store, membership.clone(), aggregator.clone(), fanout.clone());
        Self {
            membership,
            access,
            aggregator,
            admission,
            lifecycle,
            fanout,
        }
    }
}

/// A fairing that builds the `Engine` from the managed `Store` and `Config`
/// and places it into managed state. Must be attached after both.
pub struct EngineFairing;

#[rocket::async_trait]
impl Fairing for EngineFairing {
    fn info(&self) -> Info {
        Info {
            name: "Poll Engine",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let store = match rocket.state::<Store>() {
            Some(store) => store.clone(),
            None => {
                error!("Store was not available when building the engine");
                return Err(rocket);
            }
        };
        let capacity = match rocket.state::<Config>() {
            Some(config) => config.live_channel_capacity(),
            None => {
                error!("Config was not available when building the engine");
                return Err(rocket);
            }
        };

        let engine = Engine::new(store, capacity);
        info!("Poll engine ready");
        Ok(rocket.manage(engine))
    }
}
