use async_trait::async_trait;

use sg_domain::tool::ToolCall;
use sg_domain::Result;

use crate::registry::Tool;

/// Whether the environment is waiting on this agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// The environment is blocked on this agent; the scheduler clamps the
    /// next cycle to a short interval.
    MyTurn,
    /// The environment is active but another agent holds the turn.
    Waiting,
    /// Nothing going on.
    Idle,
}

/// A pluggable environment (game, simulation, shared workspace).
///
/// Environments are compile-time registered plugins selected per agent.
/// At most one environment claims a cycle: the first whose
/// `build_context` returns `Some`.
#[async_trait]
pub trait Environment: Send + Sync {
    fn name(&self) -> &str;

    /// The tool this environment actually executes.
    fn native_tool(&self) -> &str;

    /// Well-known misnames the model uses for [`Self::native_tool`]
    /// (e.g. `game` for an environment whose native tool is `rpg`).
    fn alias_names(&self) -> &[&str] {
        &[]
    }

    /// Context block for the prompt. `Some` claims the turn for this
    /// environment; `None` leaves the cycle unclaimed.
    async fn build_context(&self, did: &str) -> Result<Option<String>>;

    /// Turn signal consulted during observe.
    async fn turn_state(&self, did: &str) -> Result<TurnState>;

    /// Calls to inject when the model took no action in this environment.
    async fn auto_play(&self, did: &str) -> Result<Vec<ToolCall>>;

    /// Tools this environment contributes to the registry (the native tool,
    /// plus any capability-guarded extras such as a game-master tool).
    fn tools(&self) -> Vec<Tool> {
        Vec::new()
    }

    /// When the environment claims a cycle it may constrain which tool
    /// definitions the model sees. A whitelist overrides suppression.
    fn phase_whitelist(&self) -> Option<Vec<String>> {
        None
    }
}

/// True when `call` targets this environment, directly or via alias.
pub fn targets_environment(env: &dyn Environment, call: &ToolCall) -> bool {
    call.tool_name == env.native_tool() || env.alias_names().contains(&call.tool_name.as_str())
}
