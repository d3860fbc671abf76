//! The agent actor: one tokio task owning all of an agent's mutable state.
//!
//! Every mutation — HTTP routes, relay inbox deliveries, timer ticks —
//! arrives through the actor's command channel and is applied serially.
//! The cycle timer is a deadline the select loop sleeps toward; an inbox
//! write may pull the deadline closer but nothing preempts a running
//! cycle.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use sg_crypto::AgentIdentity;
use sg_domain::config::AgentConfig;
use sg_domain::tool::ToolCall;
use sg_domain::trace::TraceEvent;
use sg_domain::{Error, Result};
use sg_kv::{Kv, KvExt};
use sg_llm::{ModelClient, TranscriptStep};
use sg_memory::{ListParams, ListedRecord, MemoryStore};
use sg_tools::{CallRecord, Environment, OutcomeLog};

use crate::observability::Emitter;
use crate::relay::Relay;
use crate::runtime::backoff::BackoffState;
use crate::runtime::cycle::{self, Mode};
use crate::runtime::extensions::ExtensionRegistry;
use crate::runtime::session::Session;
use crate::runtime::toolset::GoalBook;

/// Far enough out that a disabled timer never fires.
fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400 * 365)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared runtime services
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct RuntimeDeps {
    pub model: Arc<dyn ModelClient>,
    pub relay: Arc<Relay>,
    pub emitter: Arc<Emitter>,
    pub server: Arc<sg_domain::config::ServerConfig>,
    pub extensions: Arc<ExtensionRegistry>,
    /// Key material for webhook signatures (derived from the admin token).
    pub webhook_secret: Vec<u8>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Commands
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub enum ActorCommand {
    GetConfig(oneshot::Sender<AgentConfig>),
    PatchConfig(Value, oneshot::Sender<Result<AgentConfig>>),
    GetIdentity(oneshot::Sender<Value>),
    GetProfile(oneshot::Sender<Option<Value>>),
    PutProfile(Value, oneshot::Sender<Result<()>>),
    GetCharacter(oneshot::Sender<Option<Value>>),
    PutCharacter(Value, oneshot::Sender<Result<()>>),
    MemoryStoreRecord(Value, oneshot::Sender<Result<String>>),
    MemoryGet(String, oneshot::Sender<Option<Value>>),
    MemoryList(ListParams, oneshot::Sender<Vec<ListedRecord>>),
    MemoryUpdate(String, Value, oneshot::Sender<Result<()>>),
    MemoryDelete(String, oneshot::Sender<Result<bool>>),
    Share {
        id: String,
        recipient_did: String,
        resp: oneshot::Sender<Result<()>>,
    },
    ListShared(ListParams, oneshot::Sender<Vec<ListedRecord>>),
    InboxPost(Value, oneshot::Sender<Result<()>>),
    InboxList(oneshot::Sender<Vec<Value>>),
    Prompt(String, oneshot::Sender<Result<String>>),
    Execute(ToolCall, oneshot::Sender<Result<CallRecord>>),
    GetObservations(oneshot::Sender<Value>),
    GetTrace(oneshot::Sender<Vec<TranscriptStep>>),
    LoopStart(oneshot::Sender<LoopStatus>),
    LoopStop(oneshot::Sender<LoopStatus>),
    LoopStatus(oneshot::Sender<LoopStatus>),
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopStatus {
    pub loop_running: bool,
    pub loop_count: u64,
    pub mode: String,
    pub mode_counter: u32,
    pub next_tick_in_ms: Option<u64>,
    pub backoff_streak: u32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cheap clonable address of one agent actor.
#[derive(Clone)]
pub struct ActorHandle {
    pub name: String,
    pub did: String,
    tx: mpsc::Sender<ActorCommand>,
}

impl ActorHandle {
    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ActorCommand,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(build(tx))
            .await
            .map_err(|_| Error::Upstream(format!("agent {} is gone", self.name)))?;
        rx.await
            .map_err(|_| Error::Upstream(format!("agent {} dropped the request", self.name)))
    }

    pub async fn get_config(&self) -> Result<AgentConfig> {
        self.call(ActorCommand::GetConfig).await
    }

    pub async fn patch_config(&self, patch: Value) -> Result<AgentConfig> {
        self.call(|tx| ActorCommand::PatchConfig(patch, tx)).await?
    }

    pub async fn identity(&self) -> Result<Value> {
        self.call(ActorCommand::GetIdentity).await
    }

    pub async fn profile(&self) -> Result<Option<Value>> {
        self.call(ActorCommand::GetProfile).await
    }

    pub async fn put_profile(&self, value: Value) -> Result<()> {
        self.call(|tx| ActorCommand::PutProfile(value, tx)).await?
    }

    pub async fn character(&self) -> Result<Option<Value>> {
        self.call(ActorCommand::GetCharacter).await
    }

    pub async fn put_character(&self, value: Value) -> Result<()> {
        self.call(|tx| ActorCommand::PutCharacter(value, tx)).await?
    }

    pub async fn memory_store(&self, record: Value) -> Result<String> {
        self.call(|tx| ActorCommand::MemoryStoreRecord(record, tx))
            .await?
    }

    pub async fn memory_get(&self, id: String) -> Result<Option<Value>> {
        self.call(|tx| ActorCommand::MemoryGet(id, tx)).await
    }

    pub async fn memory_list(&self, params: ListParams) -> Result<Vec<ListedRecord>> {
        self.call(|tx| ActorCommand::MemoryList(params, tx)).await
    }

    pub async fn memory_update(&self, id: String, record: Value) -> Result<()> {
        self.call(|tx| ActorCommand::MemoryUpdate(id, record, tx))
            .await?
    }

    pub async fn memory_delete(&self, id: String) -> Result<bool> {
        self.call(|tx| ActorCommand::MemoryDelete(id, tx)).await?
    }

    pub async fn share(&self, id: String, recipient_did: String) -> Result<()> {
        self.call(|resp| ActorCommand::Share {
            id,
            recipient_did,
            resp,
        })
        .await?
    }

    pub async fn list_shared(&self, params: ListParams) -> Result<Vec<ListedRecord>> {
        self.call(|tx| ActorCommand::ListShared(params, tx)).await
    }

    pub async fn inbox_post(&self, message: Value) -> Result<()> {
        self.call(|tx| ActorCommand::InboxPost(message, tx)).await?
    }

    pub async fn inbox_list(&self) -> Result<Vec<Value>> {
        self.call(ActorCommand::InboxList).await
    }

    pub async fn prompt(&self, text: String) -> Result<String> {
        self.call(|tx| ActorCommand::Prompt(text, tx)).await?
    }

    pub async fn execute(&self, call: ToolCall) -> Result<CallRecord> {
        self.call(|tx| ActorCommand::Execute(call, tx)).await?
    }

    pub async fn observations(&self) -> Result<Value> {
        self.call(ActorCommand::GetObservations).await
    }

    pub async fn trace(&self) -> Result<Vec<TranscriptStep>> {
        self.call(ActorCommand::GetTrace).await
    }

    pub async fn loop_start(&self) -> Result<LoopStatus> {
        self.call(ActorCommand::LoopStart).await
    }

    pub async fn loop_stop(&self) -> Result<LoopStatus> {
        self.call(ActorCommand::LoopStop).await
    }

    pub async fn loop_status(&self) -> Result<LoopStatus> {
        self.call(ActorCommand::LoopStatus).await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Actor state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) struct AgentActor {
    pub(crate) name: String,
    pub(crate) kv: Arc<dyn Kv>,
    pub(crate) deps: RuntimeDeps,
    pub(crate) identity: AgentIdentity,
    pub(crate) config: AgentConfig,
    pub(crate) memory: MemoryStore,
    pub(crate) session: Session,
    pub(crate) goals: GoalBook,
    pub(crate) outcomes: OutcomeLog,
    pub(crate) backoff: BackoffState,
    pub(crate) inbox: Vec<Value>,
    pub(crate) envs: Vec<Arc<dyn Environment>>,
    pub(crate) running: bool,
    pub(crate) loop_count: u64,
    pub(crate) mode: Mode,
    pub(crate) mode_counter: u32,
    pub(crate) last_observations: Value,
    pub(crate) last_reflection: Option<String>,
    pub(crate) last_trace: Vec<TranscriptStep>,
    pub(crate) extensions_reload_needed: bool,
    pub(crate) extensions_hint_shown: bool,
    pub(crate) pending_events: Vec<Value>,
    pub(crate) last_alarm_at: Option<DateTime<Utc>>,
    next_tick: Option<Instant>,
}

/// Create (or revive) the named agent and start its task.
///
/// `actor_kv` is the agent's private namespace; `shared_kv` holds the
/// records tables. A freshly created agent starts with its loop running.
pub fn spawn_agent(
    name: &str,
    deps: RuntimeDeps,
    actor_kv: Arc<dyn Kv>,
    shared_kv: Arc<dyn Kv>,
    initial_config: Option<AgentConfig>,
) -> Result<ActorHandle> {
    // Identity is created on first touch and persisted, never re-minted.
    let identity = match actor_kv.get_as::<sg_crypto::StoredIdentity>("identity") {
        Some(stored) => AgentIdentity::from_stored(&stored)?,
        None => {
            let identity = AgentIdentity::generate(&uuid::Uuid::new_v4().simple().to_string());
            actor_kv.put_as("identity", &identity.to_stored())?;
            identity
        }
    };

    let mut config = match actor_kv.get_as::<AgentConfig>("config") {
        Some(cfg) => cfg,
        None => {
            let mut cfg = initial_config.unwrap_or_else(|| AgentConfig::new(name));
            cfg.name = name.to_owned();
            if cfg.enabled_tools.is_empty() {
                cfg.enabled_tools = crate::runtime::toolset::core_tool_names();
            }
            actor_kv.put_as("config", &cfg)?;
            cfg
        }
    };
    config.name = name.to_owned();

    let memory = MemoryStore::new(
        shared_kv.clone(),
        identity.did.clone(),
        identity.encryption.clone(),
    );

    if actor_kv.get("sessionId").is_none() {
        actor_kv.put_as("sessionId", &uuid::Uuid::new_v4().to_string())?;
    }

    let running = actor_kv
        .get_as::<bool>("loopRunning")
        .unwrap_or(true);

    let envs = deps.extensions.for_agent(&config.enabled_tools);
    let goals = GoalBook::new(config.goals.clone());

    let mut actor = AgentActor {
        name: name.to_owned(),
        kv: actor_kv.clone(),
        deps: deps.clone(),
        identity: identity.clone(),
        config,
        memory,
        session: actor_kv.get_as("session").unwrap_or_default(),
        goals,
        outcomes: OutcomeLog::from_entries(
            actor_kv.get_as("actionOutcomes").unwrap_or_default(),
            sg_tools::outcome::DEFAULT_OUTCOME_CAP,
        ),
        backoff: actor_kv.get_as("errorBackoff").unwrap_or_default(),
        inbox: actor_kv.get_as("inbox").unwrap_or_default(),
        envs,
        running,
        loop_count: actor_kv.get_as("loopCount").unwrap_or(0),
        mode: actor_kv
            .get_as::<String>("alarmMode")
            .as_deref()
            .map(Mode::from_str)
            .unwrap_or_default(),
        mode_counter: actor_kv.get_as("alarmModeCounter").unwrap_or(0),
        last_observations: actor_kv.get_as("lastObservations").unwrap_or(Value::Null),
        last_reflection: actor_kv.get_as("lastReflection"),
        last_trace: Vec::new(),
        extensions_reload_needed: actor_kv.get_as("extensionsReloadNeeded").unwrap_or(false),
        extensions_hint_shown: actor_kv.get_as("extensionsHintShown").unwrap_or(false),
        pending_events: actor_kv.get_as("pendingEvents").unwrap_or_default(),
        last_alarm_at: actor_kv.get_as("lastAlarmAt"),
        next_tick: None,
    };

    // Publish to the relay directory and attach the directed-inbox sink.
    deps.relay
        .register(&identity.did, identity.public_keys(), Some(json!({"name": name})))?;
    let (inbox_tx, inbox_rx) = mpsc::channel::<Value>(64);
    deps.relay.attach_inbox(&identity.did, inbox_tx);

    let (cmd_tx, cmd_rx) = mpsc::channel::<ActorCommand>(64);

    if actor.running {
        actor.next_tick = Some(Instant::now());
        actor.kv.put_as("loopRunning", &true)?;
    }

    let handle = ActorHandle {
        name: name.to_owned(),
        did: identity.did.clone(),
        tx: cmd_tx,
    };

    tokio::spawn(actor.run(cmd_rx, inbox_rx));
    Ok(handle)
}

impl AgentActor {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<ActorCommand>,
        mut inbox_rx: mpsc::Receiver<Value>,
    ) {
        let mut inbox_open = true;
        loop {
            let deadline = self.next_tick.unwrap_or_else(far_future);
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                msg = inbox_rx.recv(), if inbox_open => match msg {
                    Some(msg) => self.deliver_inbox(msg, "relay"),
                    // A detached sink just stops directed delivery.
                    None => inbox_open = false,
                },
                _ = tokio::time::sleep_until(deadline), if self.next_tick.is_some() => {
                    self.next_tick = None;
                    self.tick().await;
                }
            }
        }
        self.deps.relay.detach_inbox(&self.identity.did);
        tracing::info!(agent = %self.name, "actor stopped");
    }

    async fn tick(&mut self) {
        if !self.running {
            self.deps.emitter.emit(
                "agent",
                &TraceEvent::CycleSkipped {
                    agent: self.name.clone(),
                    reason: "loop stopped".into(),
                },
            );
            return;
        }
        self.last_alarm_at = Some(Utc::now());
        let interval = cycle::run_cycle(self).await;
        self.next_tick = Some(Instant::now() + interval);
        self.persist();
    }

    fn deliver_inbox(&mut self, message: Value, via: &str) {
        let sender = message
            .get("sender")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        self.inbox.push(message);
        let _ = self.kv.put_as("inbox", &self.inbox);

        // Shorten a distant timer so the message is handled promptly;
        // leave near timers alone to avoid thrashing.
        let mut interrupted = false;
        if self.running {
            if let Some(tick) = self.next_tick {
                let threshold =
                    Duration::from_millis(self.deps.server.inbox_interrupt_threshold_ms);
                if tick.saturating_duration_since(Instant::now()) > threshold {
                    self.next_tick = Some(
                        Instant::now() + Duration::from_millis(self.deps.server.inbox_wake_ms),
                    );
                    interrupted = true;
                }
            }
        }

        self.deps.emitter.emit(
            "agent",
            &TraceEvent::InboxDelivered {
                recipient: self.identity.did.clone(),
                sender,
                interrupted_timer: interrupted,
            },
        );
        tracing::debug!(agent = %self.name, via, interrupted, "inbox message stored");
    }

    fn status(&self) -> LoopStatus {
        LoopStatus {
            loop_running: self.running,
            loop_count: self.loop_count,
            mode: self.mode.as_str().to_owned(),
            mode_counter: self.mode_counter,
            next_tick_in_ms: self
                .next_tick
                .map(|t| t.saturating_duration_since(Instant::now()).as_millis() as u64),
            backoff_streak: self.backoff.streak,
        }
    }

    async fn handle_command(&mut self, cmd: ActorCommand) {
        match cmd {
            ActorCommand::GetConfig(tx) => {
                let _ = tx.send(self.config.clone());
            }
            ActorCommand::PatchConfig(patch, tx) => {
                let _ = tx.send(self.patch_config(patch));
            }
            ActorCommand::GetIdentity(tx) => {
                let keys = self.identity.public_keys();
                let _ = tx.send(json!({
                    "did": self.identity.did,
                    "publicKeys": keys,
                    "createdAt": self.identity.created_at,
                    "rotatedAt": self.identity.rotated_at,
                }));
            }
            ActorCommand::GetProfile(tx) => {
                let _ = tx.send(self.kv.get("profile"));
            }
            ActorCommand::PutProfile(value, tx) => {
                let _ = tx.send(self.kv.put("profile", value));
            }
            ActorCommand::GetCharacter(tx) => {
                let _ = tx.send(self.kv.get("character"));
            }
            ActorCommand::PutCharacter(value, tx) => {
                let _ = tx.send(self.kv.put("character", value));
            }
            ActorCommand::MemoryStoreRecord(record, tx) => {
                let _ = tx.send(self.memory.store(&record));
            }
            ActorCommand::MemoryGet(id, tx) => {
                let _ = tx.send(self.memory.retrieve(&id));
            }
            ActorCommand::MemoryList(params, tx) => {
                let _ = tx.send(self.memory.list(&params));
            }
            ActorCommand::MemoryUpdate(id, record, tx) => {
                let _ = tx.send(self.memory.update(&id, &record));
            }
            ActorCommand::MemoryDelete(id, tx) => {
                let _ = tx.send(self.memory.soft_delete(&id));
            }
            ActorCommand::Share {
                id,
                recipient_did,
                resp,
            } => {
                let result = match self.deps.relay.public_keys(&recipient_did) {
                    Some(reg) => {
                        self.memory
                            .share(&id, &recipient_did, &reg.public_keys.encryption)
                    }
                    None => Err(Error::NotFound(format!("agent {recipient_did}"))),
                };
                let _ = resp.send(result);
            }
            ActorCommand::ListShared(params, tx) => {
                let _ = tx.send(self.memory.list_shared(&params));
            }
            ActorCommand::InboxPost(message, tx) => {
                self.deliver_inbox(message, "http");
                let _ = tx.send(Ok(()));
            }
            ActorCommand::InboxList(tx) => {
                let _ = tx.send(self.inbox.clone());
            }
            ActorCommand::Prompt(text, tx) => {
                let result = cycle::direct_prompt(self, &text).await;
                self.persist();
                let _ = tx.send(result);
            }
            ActorCommand::Execute(call, tx) => {
                let result = cycle::execute_single(self, call).await;
                self.persist();
                let _ = tx.send(result);
            }
            ActorCommand::GetObservations(tx) => {
                let _ = tx.send(self.last_observations.clone());
            }
            ActorCommand::GetTrace(tx) => {
                let _ = tx.send(self.last_trace.clone());
            }
            ActorCommand::LoopStart(tx) => {
                self.running = true;
                if self.next_tick.is_none() {
                    self.next_tick = Some(Instant::now());
                }
                let _ = self.kv.put_as("loopRunning", &true);
                let _ = tx.send(self.status());
            }
            ActorCommand::LoopStop(tx) => {
                self.running = false;
                self.next_tick = None;
                let _ = self.kv.put_as("loopRunning", &false);
                let _ = tx.send(self.status());
            }
            ActorCommand::LoopStatus(tx) => {
                let _ = tx.send(self.status());
            }
        }
    }

    fn patch_config(&mut self, patch: Value) -> Result<AgentConfig> {
        let Some(patch) = patch.as_object() else {
            return Err(Error::invalid_record(vec![sg_domain::Issue::new(
                "",
                "config patch must be an object",
            )]));
        };
        let mut merged = serde_json::to_value(&self.config)?;
        if let Some(target) = merged.as_object_mut() {
            for (k, v) in patch {
                if k == "name" {
                    continue; // the route owns the name
                }
                target.insert(k.clone(), v.clone());
            }
        }
        let mut config: AgentConfig = serde_json::from_value(merged)
            .map_err(|e| Error::invalid_record(vec![sg_domain::Issue::new("", e.to_string())]))?;
        config.name = self.name.clone();
        config.loop_interval_ms = config.clamped_interval_ms();

        self.config = config.clone();
        self.goals.replace(config.goals.clone());
        // Tool or extension changes take effect next cycle.
        self.extensions_reload_needed = true;
        self.kv.put_as("config", &self.config)?;
        self.kv.put_as("extensionsReloadNeeded", &true)?;
        Ok(config)
    }

    #[cfg(test)]
    pub(crate) fn next_tick(&self) -> Option<Instant> {
        self.next_tick
    }

    #[cfg(test)]
    pub(crate) fn set_next_tick(&mut self, tick: Option<Instant>) {
        self.next_tick = tick;
    }

    /// Write-through of the cycle-mutable state.
    pub(crate) fn persist(&mut self) {
        self.config.goals = self.goals.snapshot();
        let writes: [(&str, Result<()>); 12] = [
            ("config", self.kv.put_as("config", &self.config)),
            ("session", self.kv.put_as("session", &self.session)),
            ("loopRunning", self.kv.put_as("loopRunning", &self.running)),
            ("loopCount", self.kv.put_as("loopCount", &self.loop_count)),
            ("alarmMode", self.kv.put_as("alarmMode", &self.mode.as_str())),
            (
                "alarmModeCounter",
                self.kv.put_as("alarmModeCounter", &self.mode_counter),
            ),
            ("errorBackoff", self.kv.put_as("errorBackoff", &self.backoff)),
            (
                "actionOutcomes",
                self.kv.put_as("actionOutcomes", &self.outcomes.entries()),
            ),
            (
                "lastObservations",
                self.kv.put_as("lastObservations", &self.last_observations),
            ),
            (
                "lastReflection",
                self.kv.put_as("lastReflection", &self.last_reflection),
            ),
            (
                "pendingEvents",
                self.kv.put_as("pendingEvents", &self.pending_events),
            ),
            ("lastAlarmAt", self.kv.put_as("lastAlarmAt", &self.last_alarm_at)),
        ];
        for (key, result) in writes {
            if let Err(e) = result {
                tracing::warn!(agent = %self.name, key, error = %e, "state write failed");
            }
        }
        let _ = self.kv.put_as("inbox", &self.inbox);
        let _ = self
            .kv
            .put_as("extensionsReloadNeeded", &self.extensions_reload_needed);
        let _ = self
            .kv
            .put_as("extensionsHintShown", &self.extensions_hint_shown);
    }
}
