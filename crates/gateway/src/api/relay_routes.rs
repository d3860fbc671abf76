//! Relay surface: registration directory, key lookup, fanout, directed
//! message delivery.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use sg_crypto::PublicKeys;
use sg_domain::{Error, Issue};

use crate::api::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterBody {
    pub did: String,
    pub public_keys: PublicKeys,
    #[serde(default)]
    pub metadata: Option<Value>,
}

pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterBody>,
) -> ApiResult<Json<Value>> {
    if body.did.is_empty() {
        return Err(ApiError(Error::invalid_record(vec![Issue::new(
            "did",
            "missing did",
        )])));
    }
    state
        .relay
        .register(&body.did, body.public_keys, body.metadata)?;
    Ok(Json(json!({ "ok": true, "did": body.did })))
}

pub async fn list(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "agents": state.relay.list_registrations() }))
}

pub async fn keys(
    State(state): State<AppState>,
    Path(did): Path<String>,
) -> ApiResult<Json<Value>> {
    let registration = state
        .relay
        .public_keys(&did)
        .ok_or_else(|| ApiError(Error::NotFound(format!("agent {did}"))))?;
    Ok(Json(json!({
        "did": registration.did,
        "publicKeys": registration.public_keys,
    })))
}

pub async fn emit(
    State(state): State<AppState>,
    Json(event): Json<Value>,
) -> ApiResult<Json<Value>> {
    let delivered = state.relay.emit(&event);
    Ok(Json(json!({ "ok": true, "delivered": delivered })))
}

/// Directed delivery. Validates the record, resolves the recipient actor,
/// posts to its inbox (possibly shortening its next timer), and emits the
/// fanout event.
pub async fn message(
    State(state): State<AppState>,
    Json(mut message): Json<Value>,
) -> ApiResult<Json<Value>> {
    sg_lexicon::validate(&message)?;
    sg_lexicon::normalize(&mut message);
    if message.get("$type").and_then(Value::as_str) != Some("agent.comms.message") {
        return Err(ApiError(Error::invalid_record(vec![Issue::new(
            "$type",
            "directed delivery takes agent.comms.message",
        )])));
    }
    state.relay.deliver_message(&message).await?;
    Ok(Json(json!({ "ok": true })))
}
