use rocket::{
    futures::{SinkExt, StreamExt},
    serde::json::serde_json,
    Route, State,
};
use rocket_ws as ws;
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream},
    StreamMap,
};

use crate::engine::{Engine, Fanout, Topic};
use crate::model::api::live::{ClientMessage, LiveEvent};

pub fn routes() -> Vec<Route> {
    routes![live]
}

/// The topics one connection is subscribed to.
type Subscriptions = StreamMap<Topic, BroadcastStream<LiveEvent>>;

/// Live updates. Anyone may subscribe to any poll or group: broadcasts only
/// ever carry what a voter would be shown anyway.
#[get("/live")]
fn live(socket: ws::WebSocket, engine: &State<Engine>) -> ws::Channel<'static> {
    let fanout = engine.fanout.clone();
    socket.channel(move |mut stream| {
        Box::pin(async move {
            let mut subscriptions = Subscriptions::new();
            debug!("Live connection opened");
            loop {
                rocket::tokio::select! {
                    message = stream.next() => match message {
                        Some(Ok(ws::Message::Text(text))) => {
                            if let Some(reply) = handle_message(&fanout, &mut subscriptions, &text) {
                                stream.send(encode(&reply)).await?;
                            }
                        }
                        Some(Ok(ws::Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            debug!("Live connection failed: {err}");
                            return Err(err);
                        }
                    },
                    Some((topic, event)) = subscriptions.next(), if !subscriptions.is_empty() => {
                        match event {
                            Ok(event) => stream.send(encode(&event)).await?,
                            Err(BroadcastStreamRecvError::Lagged(missed)) => {
                                debug!("Live subscriber to {topic:?} missed {missed} events");
                            }
                        }
                    }
                }
            }
            debug!("Live connection closed");
            Ok(())
        })
    })
}

/// Apply one client message to the connection's subscriptions. Returns the
/// event to send back, if any.
fn handle_message(fanout: &Fanout, subscriptions: &mut Subscriptions, text: &str) -> Option<LiveEvent> {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(err) => return Some(LiveEvent::error(format!("Unrecognised message: {err}"))),
    };
    match message {
        ClientMessage::PollJoin { poll_id } => join(fanout, subscriptions, Topic::Poll(poll_id.into())),
        ClientMessage::GroupJoin { group_id } => join(fanout, subscriptions, Topic::Group(group_id.into())),
        ClientMessage::PollLeave { poll_id } => {
            subscriptions.remove(&Topic::Poll(poll_id.into()));
        }
        ClientMessage::GroupLeave { group_id } => {
            subscriptions.remove(&Topic::Group(group_id.into()));
        }
    }
    None
}

fn join(fanout: &Fanout, subscriptions: &mut Subscriptions, topic: Topic) {
    if !subscriptions.contains_key(&topic) {
        subscriptions.insert(topic, BroadcastStream::new(fanout.subscribe(topic)));
    }
}

fn encode(event: &LiveEvent) -> ws::Message {
    // Events contain only strings, numbers and IDs, so this cannot fail.
    let json = serde_json::to_string(event).unwrap_or_default();
    ws::Message::Text(json)
}
