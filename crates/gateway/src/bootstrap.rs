//! Process bootstrap: tracing, config, shared services, the HTTP server.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::http::HeaderValue;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use sg_domain::config::ServerConfig;
use sg_kv::{FileKv, Kv};
use sg_llm::OpenRouterClient;

use crate::api;
use crate::observability::Emitter;
use crate::relay::Relay;
use crate::runtime::extensions::ExtensionRegistry;
use crate::runtime::RuntimeDeps;
use crate::state::{AgentDirectory, AppState, KvFactory};

pub struct BootOptions {
    pub config: Option<PathBuf>,
    pub listen: Option<String>,
    pub state_dir: Option<PathBuf>,
    pub log_json: bool,
}

pub async fn run(opts: BootOptions) -> anyhow::Result<()> {
    init_tracing(opts.log_json);

    let mut server = load_config(opts.config.as_deref())?;
    if let Some(listen) = opts.listen {
        server.listen = listen;
    }
    if let Some(dir) = opts.state_dir {
        server.state_dir = dir.to_string_lossy().into_owned();
    }
    if let Ok(origin) = std::env::var("CORS_ORIGIN") {
        if !origin.is_empty() {
            server.cors_origin = origin;
        }
    }
    if let Ok(url) = std::env::var("EVENT_SINK_URL") {
        if !url.is_empty() {
            server.event_sink_url = Some(url);
        }
    }

    // ── Required bindings ─────────────────────────────────────────
    let mut missing: Vec<String> = Vec::new();
    let admin_token = std::env::var("ADMIN_TOKEN").ok().filter(|t| !t.is_empty());
    if admin_token.is_none() {
        tracing::error!("ADMIN_TOKEN is not set; all protected routes will refuse");
        missing.push("ADMIN_TOKEN".into());
    }
    let admin_token_hash = admin_token.as_deref().map(api::auth::token_hash);
    let webhook_secret = admin_token.clone().unwrap_or_default().into_bytes();

    let api_key = std::env::var("OPENROUTER_API_KEY").unwrap_or_default();
    if api_key.is_empty() {
        tracing::warn!("OPENROUTER_API_KEY is not set; model calls will fail and back off");
    }

    // ── Shared services ───────────────────────────────────────────
    let state_dir = PathBuf::from(&server.state_dir);
    let shared_kv: Arc<dyn Kv> = Arc::new(
        FileKv::open(&state_dir, "gateway").context("opening gateway KV namespace")?,
    );
    let emitter = Emitter::new(server.event_sink_url.clone());
    let relay = Relay::new(shared_kv.clone(), emitter.clone());
    let extensions = Arc::new(ExtensionRegistry::new());
    let model = Arc::new(
        OpenRouterClient::new(
            server.model_base_url.as_str(),
            api_key,
            "anthropic/claude-sonnet-4.5",
        )
        .context("building model client")?,
    );

    let server = Arc::new(server);
    let deps = RuntimeDeps {
        model,
        relay: relay.clone(),
        emitter: emitter.clone(),
        server: server.clone(),
        extensions,
        webhook_secret,
    };

    let agents_dir = state_dir.join("agents");
    let factory: KvFactory = Box::new(move |name| {
        let kv: Arc<dyn Kv> = Arc::new(FileKv::open(&agents_dir, name)?);
        Ok(kv)
    });
    let agents = Arc::new(AgentDirectory::new(shared_kv.clone(), factory));
    agents.revive_all(&deps);

    let state = AppState {
        server: server.clone(),
        deps,
        agents,
        relay,
        emitter,
        admin_token_hash,
        missing_bindings: Arc::new(missing),
    };

    // ── HTTP ──────────────────────────────────────────────────────
    let cors = build_cors(&server.cors_origin)?;
    let app = api::router(state.clone())
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&server.listen)
        .await
        .with_context(|| format!("binding {}", server.listen))?;
    tracing::info!(listen = %server.listen, "swarmgate up");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<ServerConfig> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
        }
        None => Ok(ServerConfig::default()),
    }
}

fn build_cors(origin: &str) -> anyhow::Result<CorsLayer> {
    let layer = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any);
    Ok(if origin == "*" {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(
            origin
                .parse::<HeaderValue>()
                .context("parsing CORS_ORIGIN")?,
        )
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "shutdown signal listener failed");
    }
    tracing::info!("shutting down");
}
