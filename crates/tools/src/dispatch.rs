//! The per-cycle tool phase: alias routing, allowlist, guards, budgets.

use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use sg_domain::tool::ToolCall;
use sg_domain::trace::TraceEvent;

use crate::environment::{targets_environment, Environment};
use crate::outcome::{extract_goal_id, OutcomeLog};
use crate::registry::ToolRegistry;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config & context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Maximum tool calls executed per cycle.
    pub max_calls: usize,
    /// Wall budget for the whole tool phase; each call gets the remainder.
    pub phase_budget: Duration,
    /// Whether the claiming environment may inject auto-play calls. The
    /// cycle enables this exactly once per tick.
    pub auto_play: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_calls: 10,
            phase_budget: Duration::from_secs(30),
            auto_play: true,
        }
    }
}

pub struct DispatchContext<'a> {
    pub registry: &'a ToolRegistry,
    pub enabled_tools: &'a [String],
    /// The environment that claimed this cycle, if any.
    pub active_env: Option<&'a dyn Environment>,
    /// Role predicate consulted for capability-guarded tools.
    pub has_capability: &'a (dyn Fn(&str) -> bool + Send + Sync),
    pub did: &'a str,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, serde::Serialize)]
pub struct CallRecord {
    pub call_id: String,
    /// Name the call dispatched under, post alias routing.
    pub name: String,
    /// Original name when alias routing rewrote it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routed_from: Option<String>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PhaseReport {
    pub records: Vec<CallRecord>,
    /// More calls were requested than the per-cycle cap allows.
    pub truncated: bool,
    /// The phase budget expired before all calls ran.
    pub timed_out: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one cycle's tool phase. Tool failures never abort the phase; only
/// the wall budget cuts it short.
pub async fn dispatch_phase(
    ctx: &DispatchContext<'_>,
    cfg: &DispatchConfig,
    mut calls: Vec<ToolCall>,
    outcomes: &mut OutcomeLog,
) -> PhaseReport {
    let mut report = PhaseReport::default();

    // Auto-play: if the claiming environment saw no action from the model,
    // it may inject calls. One injected call closes the turn (append);
    // several mean setup moves first (prepend) with the closer last.
    if let Some(env) = ctx.active_env.filter(|_| cfg.auto_play) {
        if !calls.iter().any(|c| targets_environment(env, c)) {
            match env.auto_play(ctx.did).await {
                Ok(mut injected) if !injected.is_empty() => {
                    tracing::debug!(
                        env = env.name(),
                        injected = injected.len(),
                        "environment auto-play injecting calls"
                    );
                    if injected.len() == 1 {
                        calls.push(injected.remove(0));
                    } else if let Some(closer) = injected.pop() {
                        let mut combined = injected;
                        combined.append(&mut calls);
                        combined.push(closer);
                        calls = combined;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(env = env.name(), error = %e, "auto-play failed");
                }
            }
        }
    }

    if calls.len() > cfg.max_calls {
        calls.truncate(cfg.max_calls);
        report.truncated = true;
    }

    let deadline = Instant::now() + cfg.phase_budget;

    for (i, call) in calls.into_iter().enumerate() {
        let now = Instant::now();
        if now >= deadline {
            report.timed_out = true;
            break;
        }

        let call_id = if call.call_id.is_empty() {
            format!("call-{i}")
        } else {
            call.call_id.clone()
        };

        // Alias routing happens before the allowlist check: the allowlist
        // is consulted once, against the native name.
        let (name, routed_from) = match ctx.active_env {
            Some(env) if env.alias_names().contains(&call.tool_name.as_str()) => {
                (env.native_tool().to_owned(), Some(call.tool_name.clone()))
            }
            _ => (call.tool_name.clone(), None),
        };

        let started = Instant::now();
        let mut record = CallRecord {
            call_id: call_id.clone(),
            name: name.clone(),
            routed_from,
            ok: false,
            result: None,
            error: None,
            duration_ms: 0,
        };

        if !ctx.enabled_tools.iter().any(|t| t == &name) {
            record.error = Some("Tool not enabled".into());
        } else if let Some(tool) = ctx.registry.get(&name) {
            if tool
                .capability
                .as_deref()
                .map(|c| !(ctx.has_capability)(c))
                .unwrap_or(false)
            {
                record.error = Some(format!("tool not available: {name}"));
            } else {
                match tokio::time::timeout_at(deadline, tool.handler.execute(&call_id, &call.arguments))
                    .await
                {
                    Ok(Ok(value)) => {
                        record.ok = true;
                        record.result = Some(value);
                    }
                    Ok(Err(e)) => record.error = Some(e.to_string()),
                    Err(_) => {
                        record.error = Some(format!("Tool timed out: {name}"));
                        report.timed_out = true;
                    }
                }
            }
        } else {
            record.error = Some(format!("Unknown tool: {name}"));
        }

        record.duration_ms = started.elapsed().as_millis() as u64;

        let goal_id = extract_goal_id(&call.arguments, record.result.as_ref());
        outcomes.record(&name, record.ok, goal_id);

        TraceEvent::ToolDispatched {
            agent: ctx.did.to_owned(),
            tool: name,
            ok: record.ok,
            duration_ms: record.duration_ms,
        }
        .emit();

        report.records.push(record);
    }

    TraceEvent::ToolPhaseDone {
        agent: ctx.did.to_owned(),
        calls: report.records.len(),
        truncated: report.truncated,
        timed_out: report.timed_out,
    }
    .emit();

    report
}
