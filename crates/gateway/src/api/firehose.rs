//! WebSocket streams: the relay firehose and per-agent event feeds.

use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use sg_domain::Error;

use crate::api::error::{ApiError, ApiResult};
use crate::observability::Emitter;
use crate::relay::SubscriptionFilter;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct FirehoseQuery {
    pub token: Option<String>,
    pub collections: Option<String>,
    pub dids: Option<String>,
}

/// `GET /firehose?collections=…&dids=…&token=…`
///
/// The filter parses from the query string and lives with the socket's
/// subscription, so a reconnecting client re-presents it and gets the
/// same view.
pub async fn firehose(
    State(state): State<AppState>,
    Query(query): Query<FirehoseQuery>,
    upgrade: WebSocketUpgrade,
) -> ApiResult<impl IntoResponse> {
    if !crate::api::auth::token_matches(&state, query.token.as_deref().unwrap_or("")) {
        return Err(ApiError(Error::Unauthorized));
    }
    let filter =
        SubscriptionFilter::from_params(query.collections.as_deref(), query.dids.as_deref());
    let relay = state.relay.clone();
    Ok(upgrade.on_upgrade(move |socket| run_firehose(socket, relay, filter)))
}

async fn run_firehose(
    socket: WebSocket,
    relay: Arc<crate::relay::Relay>,
    filter: SubscriptionFilter,
) {
    let (id, mut events) = relay.subscribe(filter);
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(line) => {
                    if sink.send(WsMessage::Text(line)).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                // Subscribers only listen; anything else is ignored.
                Some(Ok(_)) => {}
            },
        }
    }
    relay.unsubscribe(id);
}

/// Forward observability envelopes that concern one agent.
pub async fn stream_agent_events(
    socket: WebSocket,
    emitter: Arc<Emitter>,
    name: String,
    did: String,
) {
    let mut events = emitter.subscribe();
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(line) => {
                    if !envelope_mentions(&line, &name, &did) {
                        continue;
                    }
                    if sink.send(WsMessage::Text(line)).await.is_err() {
                        break;
                    }
                }
                // Lagged receivers skip ahead; closed means shutdown.
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(_) => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

fn envelope_mentions(line: &str, name: &str, did: &str) -> bool {
    let Ok(envelope) = serde_json::from_str::<Value>(line) else {
        return false;
    };
    let event = &envelope["event"];
    let result = [event.get("agent"), event.get("recipient"), event.get("did"), event.get("agent_did")]
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .any(|v| v == name || v == did);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_matching_by_name_or_did() {
        let line = json!({"event": {"agent": "alice", "loop_count": 1}}).to_string();
        assert!(envelope_mentions(&line, "alice", "did:cf:x"));
        assert!(!envelope_mentions(&line, "bob", "did:cf:y"));

        let line = json!({"event": {"recipient": "did:cf:x"}}).to_string();
        assert!(envelope_mentions(&line, "alice", "did:cf:x"));
    }
}
