//! Push channel over WebSocket.
//!
//! Every consumer gets its own broadcast receiver. A consumer that never sent a
//! command receives every `market_update`. Once it has applied a `subscribe`
//! command, `market_update` events are filtered by its watch list. `error`
//! events always pass. Client frames
//! `{"action": "subscribe"|"unsubscribe", "symbols": [...]}` edit the watch
//! list and subscribe new symbols upstream.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use super::HttpState;
use crate::domain::subscription::{ConsumerId, InstrumentSymbol, normalize_all};
use crate::infrastructure::broadcast::{ERROR_EVENT, PushEvent};

/// Client to server command.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
struct ClientCommand {
    action: ClientAction,
    #[serde(default)]
    symbols: Vec<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum ClientAction {
    Subscribe,
    Unsubscribe,
}

pub(super) async fn push_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<HttpState>>,
) -> Response {
    ws.on_upgrade(move |socket| run_consumer(socket, state))
}

async fn run_consumer(socket: WebSocket, state: Arc<HttpState>) {
    let consumer = state.consumer_joined();
    tracing::info!(consumer, "Push consumer connected");

    let (mut sink, mut stream) = socket.split();
    let mut events = BroadcastStream::new(state.hub.subscribe());
    let mut filtered = false;

    loop {
        tokio::select! {
            () = state.cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            event = events.next() => match event {
                Some(Ok(event)) => {
                    if !should_deliver(&state, consumer, filtered, &event) {
                        continue;
                    }
                    if sink.send(Message::Text(event.to_frame().into())).await.is_err() {
                        break;
                    }
                }
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    tracing::warn!(consumer, skipped, "Push consumer lagging, events skipped");
                }
                None => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let (reply, watched) = handle_command(&state, consumer, text.as_str());
                    filtered |= watched;
                    if sink.send(Message::Text(reply.into())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    state.consumer_left(consumer);
    tracing::info!(consumer, "Push consumer disconnected");
}

/// `filtered` is false until the consumer opts in with a `subscribe` command.
fn should_deliver(
    state: &HttpState,
    consumer: ConsumerId,
    filtered: bool,
    event: &PushEvent,
) -> bool {
    if !filtered || !event.is_market_update() {
        return true;
    }
    event
        .symbol
        .as_ref()
        .is_some_and(|symbol| state.connection.registry().is_watching(consumer, symbol.as_str()))
}

/// Apply one client command and build the reply frame.
///
/// The flag is true when a `subscribe` command was applied.
fn handle_command(state: &HttpState, consumer: ConsumerId, text: &str) -> (String, bool) {
    let command: ClientCommand = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(e) => return (error_frame(&format!("invalid command: {e}")), false),
    };

    let symbols = normalize_all(&command.symbols);
    if symbols.is_empty() {
        return (error_frame("no valid symbols in command"), false);
    }

    let event = match command.action {
        ClientAction::Subscribe => {
            let changes = state.connection.watch(consumer, &symbols);
            tracing::debug!(consumer, added_upstream = changes.subscribe.len(), "Consumer watching");
            "subscribed"
        }
        ClientAction::Unsubscribe => {
            state.connection.registry().unwatch(consumer, &symbols);
            "unsubscribed"
        }
    };

    let reply = json!({ "event": event, "data": { "symbols": symbols_json(&symbols) } });
    (reply.to_string(), command.action == ClientAction::Subscribe)
}

fn symbols_json(symbols: &[InstrumentSymbol]) -> Vec<&str> {
    symbols.iter().map(InstrumentSymbol::as_str).collect()
}

fn error_frame(message: &str) -> String {
    json!({ "event": ERROR_EVENT, "data": { "message": message } }).to_string()
}
