//! Per-agent admin routes under `/agents/:name/`.

use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use sg_domain::config::AgentConfig;
use sg_domain::tool::ToolCall;
use sg_domain::{Error, Issue};
use sg_memory::ListParams;

use crate::api::error::{ApiError, ApiResult};
use crate::api::firehose;
use crate::state::AppState;

fn agent(state: &AppState, name: &str) -> ApiResult<crate::runtime::ActorHandle> {
    state
        .agents
        .get(name)
        .ok_or_else(|| ApiError(Error::NotFound(format!("agent {name}"))))
}

// ── Creation ───────────────────────────────────────────────────────

pub async fn create(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Option<Json<Value>>,
) -> ApiResult<Json<Value>> {
    let config = match body {
        Some(Json(Value::Null)) | None => None,
        Some(Json(mut value)) => {
            // The path owns the name; the body may omit it.
            if let Some(obj) = value.as_object_mut() {
                obj.insert("name".into(), Value::String(name.clone()));
            }
            Some(
                serde_json::from_value::<AgentConfig>(value)
                    .map_err(|e| Error::invalid_record(vec![Issue::new("", e.to_string())]))?,
            )
        }
    };

    let handle = state.agents.create(&name, config, state.deps.clone())?;
    let status = handle.loop_status().await?;
    Ok(Json(json!({
        "ok": true,
        "name": name,
        "did": handle.did,
        "loop": status,
    })))
}

// ── Config & identity ──────────────────────────────────────────────

pub async fn get_config(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<AgentConfig>> {
    Ok(Json(agent(&state, &name)?.get_config().await?))
}

pub async fn patch_config(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(patch): Json<Value>,
) -> ApiResult<Json<AgentConfig>> {
    Ok(Json(agent(&state, &name)?.patch_config(patch).await?))
}

pub async fn identity(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    Ok(Json(agent(&state, &name)?.identity().await?))
}

// ── Profile & character (public reads) ─────────────────────────────

pub async fn get_profile(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let profile = agent(&state, &name)?.profile().await?;
    profile
        .map(Json)
        .ok_or_else(|| ApiError(Error::NotFound(format!("profile for {name}"))))
}

pub async fn put_profile(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: axum::http::HeaderMap,
    Json(value): Json<Value>,
) -> ApiResult<Json<Value>> {
    crate::api::auth::require_bearer(&state, &headers)?;
    agent(&state, &name)?.put_profile(value).await?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn get_character(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let character = agent(&state, &name)?.character().await?;
    character
        .map(Json)
        .ok_or_else(|| ApiError(Error::NotFound(format!("character for {name}"))))
}

pub async fn put_character(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: axum::http::HeaderMap,
    Json(value): Json<Value>,
) -> ApiResult<Json<Value>> {
    crate::api::auth::require_bearer(&state, &headers)?;
    agent(&state, &name)?.put_character(value).await?;
    Ok(Json(json!({ "ok": true })))
}

// ── Memory ─────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct MemoryQuery {
    pub id: Option<String>,
    pub collection: Option<String>,
    pub limit: Option<usize>,
}

pub async fn memory_post(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(mut record): Json<Value>,
) -> ApiResult<Json<Value>> {
    sg_lexicon::validate(&record)?;
    sg_lexicon::normalize(&mut record);
    let id = agent(&state, &name)?.memory_store(record).await?;
    Ok(Json(json!({ "id": id })))
}

pub async fn memory_get(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<MemoryQuery>,
) -> ApiResult<Json<Value>> {
    let handle = agent(&state, &name)?;
    match query.id {
        Some(id) => {
            let record = handle
                .memory_get(id.clone())
                .await?
                .ok_or_else(|| ApiError(Error::NotFound(format!("record {id}"))))?;
            Ok(Json(json!({ "id": id, "record": record })))
        }
        None => {
            let records = handle
                .memory_list(ListParams {
                    collection: query.collection,
                    limit: query.limit,
                })
                .await?;
            Ok(Json(json!({ "records": records })))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MemoryPutBody {
    pub id: String,
    pub record: Value,
}

pub async fn memory_put(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(mut body): Json<MemoryPutBody>,
) -> ApiResult<Json<Value>> {
    sg_lexicon::validate(&body.record)?;
    sg_lexicon::normalize(&mut body.record);
    agent(&state, &name)?
        .memory_update(body.id.clone(), body.record)
        .await?;
    Ok(Json(json!({ "id": body.id, "updated": true })))
}

pub async fn memory_delete(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<MemoryQuery>,
) -> ApiResult<Json<Value>> {
    let id = query
        .id
        .ok_or_else(|| ApiError(Error::invalid_record(vec![Issue::new("id", "missing id")])))?;
    let deleted = agent(&state, &name)?.memory_delete(id).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

// ── Sharing ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareBody {
    pub id: String,
    pub recipient_did: String,
}

pub async fn share(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<ShareBody>,
) -> ApiResult<Json<Value>> {
    agent(&state, &name)?
        .share(body.id, body.recipient_did.clone())
        .await?;
    Ok(Json(json!({ "ok": true, "recipient": body.recipient_did })))
}

pub async fn shared(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<MemoryQuery>,
) -> ApiResult<Json<Value>> {
    let records = agent(&state, &name)?
        .list_shared(ListParams {
            collection: query.collection,
            limit: query.limit,
        })
        .await?;
    Ok(Json(json!({ "records": records })))
}

// ── Inbox ──────────────────────────────────────────────────────────

pub async fn inbox_post(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(mut message): Json<Value>,
) -> ApiResult<Json<Value>> {
    sg_lexicon::validate(&message)?;
    sg_lexicon::normalize(&mut message);
    let ty = message.get("$type").and_then(Value::as_str).unwrap_or("");
    if !ty.starts_with("agent.comms.") {
        return Err(ApiError(Error::invalid_record(vec![Issue::new(
            "$type",
            "inbox accepts agent.comms.* records",
        )])));
    }
    agent(&state, &name)?.inbox_post(message).await?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn inbox_get(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let messages = agent(&state, &name)?.inbox_list().await?;
    Ok(Json(json!({ "messages": messages })))
}

// ── Prompt / execute / observations / trace ────────────────────────

#[derive(Debug, Deserialize)]
pub struct PromptBody {
    pub message: String,
}

pub async fn prompt(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<PromptBody>,
) -> ApiResult<Json<Value>> {
    let response = agent(&state, &name)?.prompt(body.message).await?;
    Ok(Json(json!({ "response": response })))
}

#[derive(Debug, Deserialize)]
pub struct ExecuteBody {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

pub async fn execute(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<ExecuteBody>,
) -> ApiResult<Json<Value>> {
    let record = agent(&state, &name)?
        .execute(ToolCall {
            call_id: format!("exec-{}", uuid::Uuid::new_v4().simple()),
            tool_name: body.tool,
            arguments: if body.args.is_null() {
                json!({})
            } else {
                body.args
            },
        })
        .await?;
    Ok(Json(serde_json::to_value(record).map_err(Error::from)?))
}

pub async fn observations(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    Ok(Json(agent(&state, &name)?.observations().await?))
}

pub async fn trace(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let steps = agent(&state, &name)?.trace().await?;
    Ok(Json(json!({ "steps": steps })))
}

// ── Loop control ───────────────────────────────────────────────────

pub async fn loop_start(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let status = agent(&state, &name)?.loop_start().await?;
    Ok(Json(json!({ "loop": status })))
}

pub async fn loop_stop(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let status = agent(&state, &name)?.loop_stop().await?;
    Ok(Json(json!({ "loop": status })))
}

pub async fn loop_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let status = agent(&state, &name)?.loop_status().await?;
    Ok(Json(json!({ "loop": status })))
}

// ── Per-agent event stream ─────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

pub async fn ws(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<WsQuery>,
    upgrade: WebSocketUpgrade,
) -> ApiResult<impl IntoResponse> {
    if !crate::api::auth::token_matches(&state, query.token.as_deref().unwrap_or("")) {
        return Err(ApiError(Error::Unauthorized));
    }
    let handle = agent(&state, &name)?;
    let emitter = state.emitter.clone();
    Ok(upgrade
        .on_upgrade(move |socket| firehose::stream_agent_events(socket, emitter, name, handle.did)))
}
