//! One tick of the agent loop: mode selection, the observe → think → act →
//! reflect pipeline, and next-interval/backoff selection.
//!
//! No error in here is fatal. Every phase catches, categorizes, and the
//! chain continues; errors only stretch the next timer.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::Instant;

use sg_domain::config::{Goal, GoalStatus, LoopMode};
use sg_domain::tool::{Message, ToolCall};
use sg_domain::trace::TraceEvent;
use sg_domain::{Error, Result};
use sg_kv::KvExt;
use sg_llm::{agentic_loop, chat_with_fallback, fallback_chain, ChatRequest, LoopConfig, ToolRunner};
use sg_tools::{
    dispatch_phase, CallRecord, DispatchConfig, DispatchContext, Environment, OutcomeLog,
    PhaseReport, ToolRegistry, TurnState,
};

use crate::runtime::actor::AgentActor;
use crate::runtime::backoff::{self, ErrorCategory};
use crate::runtime::extensions::ExtensionMetrics;
use crate::runtime::prompt::{build_system_prompt, build_user_prompt, PromptInputs};
use crate::runtime::toolset::{self, ToolDeps};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Modes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How many think cycles run before a housekeeping/reflection pair.
const THINK_CYCLES_PER_ROTATION: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Think,
    Housekeeping,
    Reflection,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Think => "think",
            Mode::Housekeeping => "housekeeping",
            Mode::Reflection => "reflection",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "housekeeping" => Mode::Housekeeping,
            "reflection" => Mode::Reflection,
            _ => Mode::Think,
        }
    }
}

/// Rotate after a cycle: think five times, then housekeeping, then
/// reflection, then back to think with the counter reset.
pub fn rotate(mode: Mode, counter: u32) -> (Mode, u32) {
    match mode {
        Mode::Think => {
            let counter = counter + 1;
            if counter >= THINK_CYCLES_PER_ROTATION {
                (Mode::Housekeeping, counter)
            } else {
                (Mode::Think, counter)
            }
        }
        Mode::Housekeeping => (Mode::Reflection, counter),
        Mode::Reflection => (Mode::Think, 0),
    }
}

/// Why observe wants the next cycle sooner than configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntervalReason {
    MyTurn,
    Waiting,
    None,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cycle entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) async fn run_cycle(actor: &mut AgentActor) -> Duration {
    let started = Instant::now();
    let mode = actor.mode;
    let mut errors: Vec<(String, String)> = Vec::new();

    actor.deps.emitter.emit(
        "agent",
        &TraceEvent::CycleStart {
            agent: actor.name.clone(),
            loop_count: actor.loop_count,
            mode: mode.as_str().into(),
        },
    );

    // Hot-reload extensions when flagged; hint once if there are none to
    // load on the very first run.
    if actor.extensions_reload_needed {
        actor.envs = actor.deps.extensions.for_agent(&actor.config.enabled_tools);
        actor.extensions_reload_needed = false;
    }
    let hint_active = if actor.loop_count == 0 && actor.envs.is_empty() && !actor.extensions_hint_shown
    {
        actor.extensions_hint_shown = true;
        true
    } else {
        false
    };

    let reason = match mode {
        Mode::Think => think_cycle(actor, hint_active, &mut errors).await,
        Mode::Housekeeping => {
            housekeeping_cycle(actor);
            IntervalReason::None
        }
        Mode::Reflection => {
            reflection_cycle(actor, &mut errors).await;
            IntervalReason::None
        }
    };

    actor.loop_count += 1;
    let (next_mode, next_counter) = rotate(mode, actor.mode_counter);
    actor.mode = next_mode;
    actor.mode_counter = next_counter;

    // ── Next interval & backoff ──────────────────────────────────
    let category = if errors.is_empty() {
        None
    } else {
        let categories: Vec<ErrorCategory> = errors
            .iter()
            .map(|(phase, message)| backoff::categorize(phase, message))
            .collect();
        backoff::select_category(&categories)
    };

    let mut interval = match category {
        Some(category) => {
            for (phase, message) in &errors {
                actor.deps.emitter.emit(
                    "agent",
                    &TraceEvent::LoopError {
                        agent: actor.name.clone(),
                        phase: phase.clone(),
                        category: backoff::categorize(phase, message).as_str().into(),
                        message: message.clone(),
                    },
                );
            }
            actor.backoff.record_failure(category)
        }
        None => {
            actor.backoff.record_success();
            Duration::from_millis(actor.config.clamped_interval_ms())
        }
    };

    match reason {
        IntervalReason::MyTurn => interval = interval.min(Duration::from_secs(15)),
        IntervalReason::Waiting => interval = interval.min(Duration::from_secs(45)),
        IntervalReason::None => {}
    }

    actor.deps.emitter.emit(
        "agent",
        &TraceEvent::CycleEnd {
            agent: actor.name.clone(),
            loop_count: actor.loop_count,
            mode: mode.as_str().into(),
            duration_ms: started.elapsed().as_millis() as u64,
            errors: errors.len(),
            error_category: category.map(|c| c.as_str().into()),
            backoff_streak: actor.backoff.streak,
            next_interval_ms: interval.as_millis() as u64,
        },
    );

    // Publish this cycle to the firehose. Queued events survive restarts
    // (pendingEvents is persisted) and drain at every cycle end.
    actor.pending_events.push(json!({
        "collection": "agent.cycle",
        "agent_did": actor.identity.did,
        "mode": mode.as_str(),
        "loopCount": actor.loop_count,
        "errors": errors.len(),
    }));
    for event in actor.pending_events.drain(..) {
        actor.deps.relay.emit(&event);
    }

    interval
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Think
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn think_cycle(
    actor: &mut AgentActor,
    hint_active: bool,
    errors: &mut Vec<(String, String)>,
) -> IntervalReason {
    // ── Observe ──────────────────────────────────────────────────
    let inbox: Vec<Value> = std::mem::take(&mut actor.inbox);
    let did = actor.identity.did.clone();

    let mut env_context: Option<(Arc<dyn Environment>, String)> = None;
    let mut reason = IntervalReason::None;
    for env in &actor.envs {
        match env.build_context(&did).await {
            Ok(Some(context)) => {
                match env.turn_state(&did).await {
                    Ok(TurnState::MyTurn) => reason = IntervalReason::MyTurn,
                    Ok(TurnState::Waiting) => reason = IntervalReason::Waiting,
                    Ok(TurnState::Idle) => {}
                    Err(e) => errors.push(("observe".into(), e.to_string())),
                }
                env_context = Some((env.clone(), context));
                break;
            }
            Ok(None) => {}
            Err(e) => errors.push(("observe".into(), e.to_string())),
        }
    }

    let observations = json!({
        "at": Utc::now().to_rfc3339(),
        "loopCount": actor.loop_count,
        "inbox": inbox,
        "environment": env_context.as_ref().map(|(env, _)| json!({
            "name": env.name(),
            "turn": match reason {
                IntervalReason::MyTurn => "my_turn",
                IntervalReason::Waiting => "waiting",
                IntervalReason::None => "idle",
            },
        })),
        "activeGoals": actor.goals.snapshot().iter().filter(|g| g.is_active()).count(),
    });
    actor.last_observations = observations.clone();

    // ── Think ────────────────────────────────────────────────────
    let registry = build_cycle_registry(actor);
    let mut runner = CycleRunner {
        registry: registry.clone(),
        enabled: actor.config.enabled_tools.clone(),
        roles: actor.config.roles.clone(),
        env: env_context.as_ref().map(|(env, _)| env.clone()),
        did: did.clone(),
        deadline: Instant::now() + Duration::from_secs(30),
        calls_used: 0,
        outcomes: std::mem::take(&mut actor.outcomes),
        reports: Vec::new(),
    };

    if actor.config.loop_mode == LoopMode::Autonomous {
        let system = build_system_prompt(&actor.config, hint_active);
        let outcomes_log = runner.outcomes.entries();
        let recent: Vec<&sg_domain::tool::ToolOutcome> = {
            let skip = outcomes_log.len().saturating_sub(5);
            outcomes_log.iter().skip(skip).collect()
        };
        let user = build_user_prompt(&PromptInputs {
            config: &actor.config,
            outcomes: &recent,
            observations: &observations,
            env_context: env_context.as_ref().map(|(_, c)| c.as_str()),
            inbox_len: inbox.len(),
            enabled_tools: &actor.config.enabled_tools,
        });

        let mut messages = vec![Message::system(system)];
        messages.extend(actor.session.messages.iter().cloned());
        messages.push(Message::user(user.clone()));

        // Operators may suppress tools from the model's view without
        // disabling them; a claiming environment's whitelist wins.
        let suppressed: Vec<String> = actor.kv.get_as("suppressedTools").unwrap_or_default();
        let whitelist = env_context
            .as_ref()
            .and_then(|(env, _)| env.phase_whitelist());
        let tools = registry.exposed_definitions(
            &actor.config.enabled_tools,
            &suppressed,
            whitelist.as_deref(),
        );
        let models = fallback_chain(&actor.config.model, actor.config.fast_model.as_deref());

        match agentic_loop(
            actor.deps.model.as_ref(),
            &models,
            messages,
            tools,
            &mut runner,
            &LoopConfig::default(),
        )
        .await
        {
            Ok(result) => {
                actor.session.append(Message::user(user));
                actor.session.append(Message::assistant(result.content));
                actor.last_trace = result.transcript;
            }
            Err(e) => errors.push(("think".into(), e.to_string())),
        }
    }

    // ── Act ──────────────────────────────────────────────────────
    // The loop above already executed the model's calls. What remains is
    // the environment's auto-play injection when the model never played
    // into the claiming environment this cycle.
    if let Some((env, _)) = &env_context {
        let played = runner
            .reports
            .iter()
            .flat_map(|r| &r.records)
            .any(|r| r.name == env.native_tool());
        if !played {
            let remaining = runner.remaining_config(true);
            if remaining.max_calls > 0 {
                let caps_roles = actor.config.roles.clone();
                let caps = move |c: &str| caps_roles.iter().any(|r| r == c);
                let ctx = DispatchContext {
                    registry: &runner.registry,
                    enabled_tools: &runner.enabled,
                    active_env: Some(env.as_ref()),
                    has_capability: &caps,
                    did: &did,
                };
                let report = dispatch_phase(&ctx, &remaining, Vec::new(), &mut runner.outcomes).await;
                for record in &report.records {
                    if !record.ok && record.name == env.native_tool() {
                        if let Some(ref error) = record.error {
                            errors.push(("act".into(), error.clone()));
                        }
                    }
                }
                runner.reports.push(report);
            }
        }
    }

    // ── Reflect (in-cycle bookkeeping) ───────────────────────────
    actor.outcomes = runner.outcomes;
    record_extension_metrics(actor, &runner.reports);
    prune_completed_goals(actor, None);
    if let Err(e) = actor.session.save(&actor.name, &actor.memory) {
        errors.push(("reflect".into(), e.to_string()));
    }

    reason
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Housekeeping & reflection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn housekeeping_cycle(actor: &mut AgentActor) {
    prune_completed_goals(actor, Some(ChronoDuration::hours(24)));
    actor.outcomes.trim_to(50);
    tracing::debug!(agent = %actor.name, "housekeeping done");
}

async fn reflection_cycle(actor: &mut AgentActor, errors: &mut Vec<(String, String)>) {
    // Fresh conversation window; archived history stays reachable.
    actor.session.branch();

    let outcomes = actor.outcomes.entries();
    let recent: Vec<String> = {
        let skip = outcomes.len().saturating_sub(10);
        outcomes
            .iter()
            .skip(skip)
            .map(|o| format!("{} {}", o.tool, if o.success { "ok" } else { "failed" }))
            .collect()
    };
    let goals = actor.goals.snapshot();

    let user = format!(
        "Reflect on your last actions:\n{}\n\nYour goals:\n{}\n\n\
Reply with a short reflection. Optionally include a JSON object \
{{\"reflection\": \"...\", \"goals\": [{{\"id\", \"description\", \"status\", \"priority\"}}]}} \
to update your goal list.",
        recent.join("\n"),
        serde_json::to_string_pretty(&goals).unwrap_or_default(),
    );

    let req = ChatRequest {
        messages: vec![
            Message::system(build_system_prompt(&actor.config, false)),
            Message::user(user.clone()),
        ],
        tools: vec![],
        temperature: None,
        max_tokens: None,
        model: None,
    };
    let models = fallback_chain(&actor.config.model, actor.config.fast_model.as_deref());

    match chat_with_fallback(actor.deps.model.as_ref(), &models, &req).await {
        Ok(resp) => {
            let (reflection, goals_update) = parse_reflection(&resp.content, &goals);
            if let Some(goals) = goals_update {
                actor.goals.replace(goals);
            }
            actor.last_reflection = Some(reflection.clone());
            actor.session.append(Message::user(user));
            actor.session.append(Message::assistant(resp.content));
        }
        Err(e) => errors.push(("reflection".into(), e.to_string())),
    }

    if let Err(e) = actor.session.save(&actor.name, &actor.memory) {
        errors.push(("reflect".into(), e.to_string()));
    }
}

/// Partial goal shape the reflection prompt asks for. Fields the model
/// omits are filled from the existing goal with the same id.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoalPatch {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    status: Option<GoalStatus>,
    #[serde(default)]
    priority: Option<u8>,
    #[serde(default)]
    progress: Option<f64>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    completed_at: Option<DateTime<Utc>>,
}

/// Split a reflection reply into its text and an optional goals update,
/// merged against the current goal list by id.
fn parse_reflection(content: &str, existing: &[Goal]) -> (String, Option<Vec<Goal>>) {
    let trimmed = content.trim();
    let json_candidate = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end_matches("```").trim())
        .unwrap_or(trimmed);

    if let Ok(value) = serde_json::from_str::<Value>(json_candidate) {
        let reflection = value
            .get("reflection")
            .and_then(Value::as_str)
            .unwrap_or(trimmed)
            .to_owned();
        let goals = match value.get("goals").cloned() {
            Some(raw) => match serde_json::from_value::<Vec<GoalPatch>>(raw) {
                Ok(patches) => Some(merge_goal_patches(patches, existing)),
                Err(e) => {
                    tracing::warn!(error = %e, "reflection goals update unparseable, keeping current goals");
                    None
                }
            },
            None => None,
        };
        return (reflection, goals);
    }
    (trimmed.to_owned(), None)
}

fn merge_goal_patches(patches: Vec<GoalPatch>, existing: &[Goal]) -> Vec<Goal> {
    patches
        .into_iter()
        .map(|patch| {
            let mut goal = patch
                .id
                .as_deref()
                .and_then(|id| existing.iter().find(|g| g.id == id))
                .cloned()
                .unwrap_or_else(|| {
                    let id = patch
                        .id
                        .clone()
                        .unwrap_or_else(|| format!("goal-{}", uuid::Uuid::new_v4().simple()));
                    Goal::new(id, patch.description.clone().unwrap_or_default())
                });

            if let Some(description) = patch.description {
                goal.description = description;
            }
            if let Some(priority) = patch.priority {
                goal.priority = priority.clamp(1, 5);
            }
            if let Some(progress) = patch.progress {
                goal.progress = progress.clamp(0.0, 1.0);
            }
            if let Some(created_at) = patch.created_at {
                goal.created_at = created_at;
            }
            if let Some(completed_at) = patch.completed_at {
                goal.completed_at = Some(completed_at);
            }
            if let Some(status) = patch.status {
                goal.status = status;
                if status == GoalStatus::Completed {
                    goal.progress = 1.0;
                    if goal.completed_at.is_none() {
                        goal.completed_at = Some(Utc::now());
                    }
                }
            }
            goal
        })
        .collect()
}

/// Move completed goals out of the active config into the durable archive.
/// `older_than` restricts pruning to stale completions (housekeeping);
/// `None` prunes anything beyond `max_completed_goals` (reflect).
fn prune_completed_goals(actor: &mut AgentActor, older_than: Option<ChronoDuration>) {
    let max_keep = actor.config.max_completed_goals;
    let now = Utc::now();
    let goals = actor.goals.snapshot();

    let mut completed: Vec<&Goal> = goals
        .iter()
        .filter(|g| g.status == GoalStatus::Completed)
        .collect();
    completed.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));

    let prune_ids: Vec<String> = completed
        .iter()
        .enumerate()
        .filter(|(i, g)| {
            let beyond_cap = *i >= max_keep;
            match older_than {
                Some(age) => {
                    beyond_cap
                        || g.completed_at
                            .map(|t| now - t > age)
                            .unwrap_or(false)
                }
                None => beyond_cap,
            }
        })
        .map(|(_, g)| g.id.clone())
        .collect();

    if prune_ids.is_empty() {
        return;
    }

    let mut archive: Vec<Goal> = actor.kv.get_as("goalsArchive").unwrap_or_default();
    let remaining: Vec<Goal> = goals
        .into_iter()
        .filter(|g| {
            if prune_ids.contains(&g.id) {
                archive.push(g.clone());
                false
            } else {
                true
            }
        })
        .collect();
    if let Err(e) = actor.kv.put_as("goalsArchive", &archive) {
        tracing::warn!(agent = %actor.name, error = %e, "goals archive write failed");
        return;
    }
    actor.goals.replace(remaining);
}

fn record_extension_metrics(actor: &mut AgentActor, reports: &[PhaseReport]) {
    for env in &actor.envs {
        let records: Vec<_> = reports
            .iter()
            .flat_map(|r| &r.records)
            .filter(|r| r.name == env.native_tool())
            .collect();
        if records.is_empty() {
            continue;
        }
        let key = format!("extensionMetrics:{}", env.name());
        let mut metrics: ExtensionMetrics = actor.kv.get_as(&key).unwrap_or_default();
        for record in records {
            metrics.record(record.ok);
        }
        if let Err(e) = actor.kv.put_as(&key, &metrics) {
            tracing::warn!(agent = %actor.name, error = %e, "extension metrics write failed");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool runner (shared budget across the agentic loop)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) fn build_cycle_registry(actor: &AgentActor) -> ToolRegistry {
    let deps = Arc::new(ToolDeps {
        agent: actor.name.clone(),
        did: actor.identity.did.clone(),
        memory: actor.memory.clone(),
        goals: actor.goals.clone(),
        relay: actor.deps.relay.clone(),
        emitter: actor.deps.emitter.clone(),
        webhook_url: actor.config.webhook_url.clone(),
        webhook_secret: actor.deps.webhook_secret.clone(),
    });
    toolset::build_registry(&deps, &actor.envs)
}

struct CycleRunner {
    registry: ToolRegistry,
    enabled: Vec<String>,
    roles: Vec<String>,
    env: Option<Arc<dyn Environment>>,
    did: String,
    deadline: Instant,
    calls_used: usize,
    outcomes: OutcomeLog,
    reports: Vec<PhaseReport>,
}

impl CycleRunner {
    fn remaining_config(&self, auto_play: bool) -> DispatchConfig {
        DispatchConfig {
            max_calls: 10usize.saturating_sub(self.calls_used),
            phase_budget: self.deadline.saturating_duration_since(Instant::now()),
            auto_play,
        }
    }
}

#[async_trait::async_trait]
impl ToolRunner for CycleRunner {
    async fn run(&mut self, calls: Vec<ToolCall>) -> Vec<Message> {
        let cfg = self.remaining_config(false);
        if cfg.max_calls == 0 || cfg.phase_budget.is_zero() {
            return calls
                .into_iter()
                .map(|c| {
                    Message::tool_result(
                        c.call_id,
                        r#"{"ok":false,"error":"tool budget exhausted this cycle"}"#,
                    )
                })
                .collect();
        }

        let roles = self.roles.clone();
        let caps = move |c: &str| roles.iter().any(|r| r == c);
        let ctx = DispatchContext {
            registry: &self.registry,
            enabled_tools: &self.enabled,
            active_env: self.env.as_deref(),
            has_capability: &caps,
            did: &self.did,
        };
        let report = dispatch_phase(&ctx, &cfg, calls, &mut self.outcomes).await;
        self.calls_used += report.records.len();

        let messages = report
            .records
            .iter()
            .map(|r| {
                let body = if r.ok {
                    json!({"ok": true, "result": r.result})
                } else {
                    json!({"ok": false, "error": r.error})
                };
                Message::tool_result(r.call_id.clone(), body.to_string())
            })
            .collect();
        self.reports.push(report);
        messages
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Direct operations (HTTP prompt / execute)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One off-cycle conversational turn against the live session.
pub(crate) async fn direct_prompt(actor: &mut AgentActor, text: &str) -> Result<String> {
    let registry = build_cycle_registry(actor);
    let mut runner = CycleRunner {
        registry: registry.clone(),
        enabled: actor.config.enabled_tools.clone(),
        roles: actor.config.roles.clone(),
        env: None,
        did: actor.identity.did.clone(),
        deadline: Instant::now() + Duration::from_secs(30),
        calls_used: 0,
        outcomes: std::mem::take(&mut actor.outcomes),
        reports: Vec::new(),
    };

    let mut messages = vec![Message::system(build_system_prompt(&actor.config, false))];
    messages.extend(actor.session.messages.iter().cloned());
    messages.push(Message::user(text.to_owned()));

    let tools = registry.exposed_definitions(&actor.config.enabled_tools, &[], None);
    let models = fallback_chain(&actor.config.model, actor.config.fast_model.as_deref());

    let result = agentic_loop(
        actor.deps.model.as_ref(),
        &models,
        messages,
        tools,
        &mut runner,
        &LoopConfig::default(),
    )
    .await;

    actor.outcomes = runner.outcomes;

    let result = result?;
    actor.session.append(Message::user(text.to_owned()));
    actor.session.append(Message::assistant(result.content.clone()));
    actor.last_trace = result.transcript;
    actor.session.save(&actor.name, &actor.memory)?;
    Ok(result.content)
}

/// External-brain dispatch of one tool call, under the same rules as a
/// cycle's act phase.
pub(crate) async fn execute_single(actor: &mut AgentActor, call: ToolCall) -> Result<CallRecord> {
    let registry = build_cycle_registry(actor);
    let roles = actor.config.roles.clone();
    let caps = move |c: &str| roles.iter().any(|r| r == c);

    let mut active_env: Option<Arc<dyn Environment>> = None;
    for env in &actor.envs {
        if env.native_tool() == call.tool_name
            || env.alias_names().contains(&call.tool_name.as_str())
        {
            active_env = Some(env.clone());
            break;
        }
    }

    let ctx = DispatchContext {
        registry: &registry,
        enabled_tools: &actor.config.enabled_tools,
        active_env: active_env.as_deref(),
        has_capability: &caps,
        did: &actor.identity.did,
    };
    let cfg = DispatchConfig {
        max_calls: 1,
        phase_budget: Duration::from_secs(30),
        auto_play: false,
    };
    let mut outcomes = std::mem::take(&mut actor.outcomes);
    let mut report = dispatch_phase(&ctx, &cfg, vec![call], &mut outcomes).await;
    actor.outcomes = outcomes;

    report
        .records
        .pop()
        .ok_or_else(|| Error::Other("dispatch produced no record".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_rotation_sequence() {
        // Start cold: think five times, then housekeeping, reflection, think.
        let mut mode = Mode::Think;
        let mut counter = 0;
        let mut executed = Vec::new();
        for _ in 0..9 {
            executed.push(mode.as_str());
            let (m, c) = rotate(mode, counter);
            mode = m;
            counter = c;
        }
        assert_eq!(
            executed,
            [
                "think",
                "think",
                "think",
                "think",
                "think",
                "housekeeping",
                "reflection",
                "think",
                "think"
            ]
        );
    }

    #[test]
    fn mode_round_trips_through_strings() {
        for mode in [Mode::Think, Mode::Housekeeping, Mode::Reflection] {
            assert_eq!(Mode::from_str(mode.as_str()), mode);
        }
        assert_eq!(Mode::from_str("garbage"), Mode::Think);
    }

    #[test]
    fn reflection_parsing_accepts_json_and_plain_text() {
        let (text, goals) = parse_reflection("I did fine today.", &[]);
        assert_eq!(text, "I did fine today.");
        assert!(goals.is_none());

        // The documented shape omits createdAt; new goals still parse.
        let (text, goals) = parse_reflection(
            r#"{"reflection": "need to focus", "goals": [
                {"id": "g1", "description": "focus", "status": "in_progress"}
            ]}"#,
            &[],
        );
        assert_eq!(text, "need to focus");
        let goals = goals.unwrap();
        assert_eq!(goals[0].id, "g1");
        assert_eq!(goals[0].status, GoalStatus::InProgress);

        let (text, _) = parse_reflection("```json\n{\"reflection\": \"fenced\"}\n```", &[]);
        assert_eq!(text, "fenced");
    }

    #[test]
    fn reflection_goal_updates_merge_against_existing_by_id() {
        let mut existing = Goal::new("g1", "map the network");
        existing.priority = 2;
        let existing = vec![existing];

        let (_, goals) = parse_reflection(
            r#"{"reflection": "halfway", "goals": [
                {"id": "g1", "progress": 0.5},
                {"description": "brand new goal"}
            ]}"#,
            &existing,
        );
        let goals = goals.unwrap();
        assert_eq!(goals.len(), 2);
        // Omitted fields come from the existing goal, not defaults.
        assert_eq!(goals[0].description, "map the network");
        assert_eq!(goals[0].priority, 2);
        assert_eq!(goals[0].progress, 0.5);
        assert_eq!(goals[0].created_at, existing[0].created_at);
        // Entries without an id mint a fresh goal.
        assert!(goals[1].id.starts_with("goal-"));
        assert_eq!(goals[1].description, "brand new goal");
    }

    #[test]
    fn reflection_completion_stamps_progress_and_timestamp() {
        let existing = vec![Goal::new("g1", "ship")];
        let (_, goals) = parse_reflection(
            r#"{"reflection": "done", "goals": [{"id": "g1", "status": "completed"}]}"#,
            &existing,
        );
        let goals = goals.unwrap();
        assert_eq!(goals[0].status, GoalStatus::Completed);
        assert_eq!(goals[0].progress, 1.0);
        assert!(goals[0].completed_at.is_some());
    }

    #[test]
    fn unparseable_goal_updates_keep_current_goals() {
        let (text, goals) = parse_reflection(
            r#"{"reflection": "confused", "goals": "not a list"}"#,
            &[],
        );
        assert_eq!(text, "confused");
        assert!(goals.is_none(), "bad goals payload is dropped, not applied");
    }
}
