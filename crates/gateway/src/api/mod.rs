pub mod admin;
pub mod agents;
pub mod auth;
pub mod error;
pub mod firehose;
pub mod relay_routes;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes split into **public** (health, well-known, explicitly public
/// per-agent reads, the WS upgrades that carry `?token=`) and
/// **protected** (everything else, behind the `ADMIN_TOKEN` bearer
/// middleware).
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/health", get(admin::health))
        .route("/.well-known/agent-network.json", get(admin::well_known))
        .route("/agents/:name/identity", get(agents::identity))
        // Profile/character reads are public; the writes on the same path
        // check the bearer token in-handler.
        .route(
            "/agents/:name/profile",
            get(agents::get_profile).put(agents::put_profile),
        )
        .route(
            "/agents/:name/character",
            get(agents::get_character).put(agents::put_character),
        )
        // WS upgrades authenticate via ?token= inside the handler.
        .route("/firehose", get(firehose::firehose))
        .route("/agents/:name/ws", get(agents::ws));

    let protected = Router::new()
        // Relay directory & fanout
        .route("/agents", post(relay_routes::register).get(relay_routes::list))
        .route("/keys/:did", get(relay_routes::keys))
        .route("/emit", post(relay_routes::emit))
        .route("/relay/message", post(relay_routes::message))
        // Agent lifecycle
        .route("/agents/:name/create", post(agents::create))
        .route(
            "/agents/:name/config",
            get(agents::get_config).patch(agents::patch_config),
        )
        // Memory
        .route(
            "/agents/:name/memory",
            post(agents::memory_post)
                .get(agents::memory_get)
                .put(agents::memory_put)
                .delete(agents::memory_delete),
        )
        .route("/agents/:name/share", post(agents::share))
        .route("/agents/:name/shared", get(agents::shared))
        // Inbox & interaction
        .route(
            "/agents/:name/inbox",
            post(agents::inbox_post).get(agents::inbox_get),
        )
        .route("/agents/:name/prompt", post(agents::prompt))
        .route("/agents/:name/execute", post(agents::execute))
        .route("/agents/:name/observations", get(agents::observations))
        .route("/agents/:name/trace", get(agents::trace))
        // Loop control
        .route("/agents/:name/loop/start", post(agents::loop_start))
        .route("/agents/:name/loop/stop", post(agents::loop_stop))
        .route("/agents/:name/loop/status", get(agents::loop_status))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_admin_token,
        ));

    public.merge(protected)
}
