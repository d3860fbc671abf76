use serde::{Deserialize, Serialize};

use chrono::{DateTime, Utc};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_listen")]
    pub listen: String,
    #[serde(default = "d_state_dir")]
    pub state_dir: String,
    /// Allowed CORS origin. `*` by default; overridden by `CORS_ORIGIN`.
    #[serde(default = "d_cors")]
    pub cors_origin: String,
    /// Pending-timer distance above which an inbox write reschedules the
    /// next cycle. Heuristic, not an invariant.
    #[serde(default = "d_interrupt_threshold")]
    pub inbox_interrupt_threshold_ms: u64,
    /// How soon the shortened timer fires after an inbox interrupt.
    #[serde(default = "d_wake")]
    pub inbox_wake_ms: u64,
    /// Optional NDJSON event sink for the observability shipper.
    #[serde(default)]
    pub event_sink_url: Option<String>,
    /// Base URL of the OpenRouter-compatible model endpoint.
    #[serde(default = "d_model_base_url")]
    pub model_base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: d_listen(),
            state_dir: d_state_dir(),
            cors_origin: d_cors(),
            inbox_interrupt_threshold_ms: d_interrupt_threshold(),
            inbox_wake_ms: d_wake(),
            event_sink_url: None,
            model_base_url: d_model_base_url(),
        }
    }
}

fn d_listen() -> String {
    "127.0.0.1:8484".into()
}
fn d_state_dir() -> String {
    "./data".into()
}
fn d_cors() -> String {
    "*".into()
}
fn d_interrupt_threshold() -> u64 {
    10_000
}
fn d_wake() -> u64 {
    1_000
}
fn d_model_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The floor for `loop_interval_ms`. Loaded configs are clamped up to this.
pub const MIN_LOOP_INTERVAL_MS: u64 = 5_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    pub name: String,
    #[serde(default = "d_personality")]
    pub personality: String,
    #[serde(default)]
    pub specialty: String,
    #[serde(default = "d_model")]
    pub model: String,
    #[serde(default)]
    pub fast_model: Option<String>,
    #[serde(default = "d_loop_interval")]
    pub loop_interval_ms: u64,
    #[serde(default = "d_max_completed")]
    pub max_completed_goals: usize,
    #[serde(default)]
    pub goals: Vec<Goal>,
    #[serde(default)]
    pub enabled_tools: Vec<String>,
    /// Capability roles this actor holds; capability-guarded tools check
    /// against these regardless of the allowlist.
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub loop_mode: LoopMode,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

impl AgentConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            personality: d_personality(),
            specialty: String::new(),
            model: d_model(),
            fast_model: None,
            loop_interval_ms: d_loop_interval(),
            max_completed_goals: d_max_completed(),
            goals: Vec::new(),
            enabled_tools: Vec::new(),
            roles: Vec::new(),
            loop_mode: LoopMode::default(),
            webhook_url: None,
        }
    }

    /// Effective loop interval, never below [`MIN_LOOP_INTERVAL_MS`].
    pub fn clamped_interval_ms(&self) -> u64 {
        self.loop_interval_ms.max(MIN_LOOP_INTERVAL_MS)
    }
}

fn d_personality() -> String {
    "You are an autonomous agent.".into()
}
fn d_model() -> String {
    "anthropic/claude-sonnet-4.5".into()
}
fn d_loop_interval() -> u64 {
    30_000
}
fn d_max_completed() -> usize {
    3
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    #[default]
    Autonomous,
    /// No model call during think; act still runs so environment
    /// auto-play can progress.
    Passive,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Goals
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub priority: u8,
    #[serde(default)]
    pub status: GoalStatus,
    /// Fractional completion in [0, 1].
    #[serde(default)]
    pub progress: f64,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Goal {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            priority: 3,
            status: GoalStatus::Pending,
            progress: 0.0,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            GoalStatus::Pending | GoalStatus::InProgress | GoalStatus::Blocked
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    #[default]
    Pending,
    InProgress,
    Blocked,
    Completed,
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_clamped_to_floor() {
        let mut cfg = AgentConfig::new("alice");
        cfg.loop_interval_ms = 1_000;
        assert_eq!(cfg.clamped_interval_ms(), MIN_LOOP_INTERVAL_MS);
        cfg.loop_interval_ms = 60_000;
        assert_eq!(cfg.clamped_interval_ms(), 60_000);
    }

    #[test]
    fn agent_config_deserializes_with_defaults() {
        let cfg: AgentConfig = serde_json::from_str(r#"{"name":"alice"}"#).unwrap();
        assert_eq!(cfg.loop_mode, LoopMode::Autonomous);
        assert!(cfg.goals.is_empty());
        assert_eq!(cfg.loop_interval_ms, 30_000);
    }

    #[test]
    fn goal_status_snake_case_wire_format() {
        let goal = Goal {
            status: GoalStatus::InProgress,
            ..Goal::new("g1", "do a thing")
        };
        let json = serde_json::to_value(&goal).unwrap();
        assert_eq!(json["status"], "in_progress");
    }
}
