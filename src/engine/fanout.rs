//! Best-effort delivery of live events to connected subscribers.
//!
//! Every topic (a poll or a group) has its own broadcast channel, created
//! when the first subscriber joins and dropped once nobody is listening.
//! Subscribers that fall behind or disconnect simply miss events.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rocket::tokio::sync::{broadcast, Mutex as AsyncMutex, OwnedMutexGuard};

use crate::model::{api::live::LiveEvent, mongodb::Id};

/// Something a client can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Poll(Id),
    Group(Id),
}

type OrderLocks = Arc<Mutex<HashMap<Id, Arc<AsyncMutex<()>>>>>;

#[derive(Clone)]
pub struct Fanout {
    capacity: usize,
    channels: Arc<Mutex<HashMap<Topic, broadcast::Sender<LiveEvent>>>>,
    poll_order: OrderLocks,
}

impl Fanout {
    /// `capacity` is the number of events buffered per topic before slow
    /// subscribers start missing them.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Default::default(),
            poll_order: Default::default(),
        }
    }

    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<LiveEvent> {
        lock(&self.channels)
            .entry(topic)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Send an event to everyone subscribed to `topic`, returning how many
    /// subscribers it reached. Never fails: having no subscribers is normal.
    pub fn publish(&self, topic: Topic, event: LiveEvent) -> usize {
        let mut channels = lock(&self.channels);
        let sender = match channels.get(&topic) {
            Some(sender) => sender,
            None => {
                trace!("No subscribers for {topic:?}, dropping event");
                return 0;
            }
        };
        match sender.send(event) {
            Ok(reached) => {
                trace!("Published event on {topic:?} to {reached} subscribers");
                reached
            }
            Err(_) => {
                // Every receiver has gone away.
                channels.remove(&topic);
                trace!("Last subscriber of {topic:?} left, closed channel");
                0
            }
        }
    }

    /// Hold this while computing and publishing a snapshot of `poll`, so that
    /// subscribers see snapshots in the order they were computed.
    pub async fn ordered(&self, poll: Id) -> PollOrder {
        let order = lock(&self.poll_order).entry(poll).or_default().clone();
        PollOrder {
            guard: Some(order.lock_owned().await),
            poll,
            locks: self.poll_order.clone(),
        }
    }

    #[cfg(test)]
    pub fn open_channels(&self) -> usize {
        lock(&self.channels).len()
    }
}

/// Exclusive use of one poll's snapshot order. A poll's lock only exists
/// while somebody holds or awaits it.
pub struct PollOrder {
    guard: Option<OwnedMutexGuard<()>>,
    poll: Id,
    locks: OrderLocks,
}

impl Drop for PollOrder {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = lock(&self.locks);
        // Waiters clone the lock under the map lock, so a count of one means
        // the map holds the only handle.
        if locks.get(&self.poll).map_or(false, |order| Arc::strong_count(order) == 1) {
            locks.remove(&self.poll);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rocket::async_test]
    async fn events_reach_only_their_topic() {
        let fanout = Fanout::new(8);
        let (poll, other) = (Id::new(), Id::new());
        let mut subscriber = fanout.subscribe(Topic::Poll(poll));
        let mut bystander = fanout.subscribe(Topic::Poll(other));

        assert_eq!(fanout.publish(Topic::Poll(poll), LiveEvent::poll_cancelled(poll)), 1);
        assert_eq!(subscriber.recv().await.unwrap(), LiveEvent::poll_cancelled(poll));
        assert!(bystander.try_recv().is_err());
    }

    #[test]
    fn publishing_without_subscribers_is_harmless() {
        let fanout = Fanout::new(8);
        let poll = Id::new();
        assert_eq!(fanout.publish(Topic::Poll(poll), LiveEvent::poll_cancelled(poll)), 0);

        drop(fanout.subscribe(Topic::Group(poll)));
        assert_eq!(fanout.open_channels(), 1);
        assert_eq!(fanout.publish(Topic::Group(poll), LiveEvent::poll_cancelled(poll)), 0);
        assert_eq!(fanout.open_channels(), 0);
    }

    #[rocket::async_test]
    async fn ordering_lock_is_per_poll() {
        let fanout = Fanout::new(8);
        let (a, b) = (Id::new(), Id::new());
        let held = fanout.ordered(a).await;
        // A different poll is not blocked.
        drop(fanout.ordered(b).await);
        assert!(fanout.poll_order.lock().unwrap()[&a].try_lock().is_err());
        assert!(!fanout.poll_order.lock().unwrap().contains_key(&b));
        drop(held);
        assert!(fanout.poll_order.lock().unwrap().is_empty());
    }

    #[rocket::async_test]
    async fn lock_outlives_holder_while_contended() {
        let fanout = Fanout::new(8);
        let poll = Id::new();
        let held = fanout.ordered(poll).await;

        let waiter = rocket::tokio::spawn({
            let fanout = fanout.clone();
            async move { drop(fanout.ordered(poll).await) }
        });
        while Arc::strong_count(&fanout.poll_order.lock().unwrap()[&poll]) < 3 {
            rocket::tokio::task::yield_now().await;
        }
        drop(held);
        // The waiter still needs the same lock.
        waiter.await.unwrap();
        assert!(fanout.poll_order.lock().unwrap().is_empty());

        // Ordering again after the poll went quiet starts afresh and cleans up.
        drop(fanout.ordered(poll).await);
        assert!(fanout.poll_order.lock().unwrap().is_empty());
    }
}
