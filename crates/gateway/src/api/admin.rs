use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

/// Liveness probe. Missing required bindings make this a 500 with the
/// missing list, so orchestrators refuse to route to a half-configured
/// instance.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    if state.missing_bindings.is_empty() {
        (
            StatusCode::OK,
            Json(json!({ "ok": true, "agents": state.agents.list().len() })),
        )
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "ok": false, "missing": *state.missing_bindings })),
        )
    }
}

/// Service descriptor for peers discovering this network edge.
pub async fn well_known(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "name": "swarmgate",
        "version": env!("CARGO_PKG_VERSION"),
        "agents": state.agents.list().iter().map(|a| &a.did).collect::<Vec<_>>(),
        "firehose": "/firehose",
    }))
}
