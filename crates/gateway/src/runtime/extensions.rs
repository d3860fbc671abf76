//! Registered-plugin extension model.
//!
//! Environments are compiled in and registered at startup; each agent
//! selects the ones whose tools appear in its `enabled_tools`. Hot reload
//! is a per-actor flag that rebuilds the selection on the next cycle.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use sg_tools::Environment;

/// Process-wide registry of available environments.
#[derive(Default)]
pub struct ExtensionRegistry {
    envs: RwLock<HashMap<String, Arc<dyn Environment>>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, env: Arc<dyn Environment>) {
        self.envs.write().insert(env.name().to_owned(), env);
    }

    pub fn len(&self) -> usize {
        self.envs.read().len()
    }

    /// Environments an agent has opted into: those whose native tool or
    /// name appears in the agent's enabled tools.
    pub fn for_agent(&self, enabled_tools: &[String]) -> Vec<Arc<dyn Environment>> {
        self.envs
            .read()
            .values()
            .filter(|env| {
                enabled_tools
                    .iter()
                    .any(|t| t == env.native_tool() || t == env.name())
            })
            .cloned()
            .collect()
    }
}

/// Per-extension usage counters, persisted at `extensionMetrics:<name>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionMetrics {
    pub invocations: u64,
    pub errors: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ExtensionMetrics {
    pub fn record(&mut self, ok: bool) {
        self.invocations += 1;
        if !ok {
            self.errors += 1;
        }
        self.last_used_at = Some(Utc::now());
    }
}

/// One-time system-prompt hint shown to agents that have no extensions
/// loaded, so the model knows the capability exists.
pub const EXTENSIBILITY_HINT: &str = "You currently have no environment extensions loaded. \
Extensions add tools for shared environments (games, simulations, workspaces); \
an operator can enable them in your config.";

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sg_domain::tool::ToolCall;
    use sg_domain::Result;
    use sg_tools::TurnState;

    struct StubEnv(&'static str, &'static str);

    #[async_trait]
    impl Environment for StubEnv {
        fn name(&self) -> &str {
            self.0
        }
        fn native_tool(&self) -> &str {
            self.1
        }
        async fn build_context(&self, _did: &str) -> Result<Option<String>> {
            Ok(None)
        }
        async fn turn_state(&self, _did: &str) -> Result<TurnState> {
            Ok(TurnState::Idle)
        }
        async fn auto_play(&self, _did: &str) -> Result<Vec<ToolCall>> {
            Ok(vec![])
        }
    }

    #[test]
    fn agents_select_by_native_tool_or_name() {
        let registry = ExtensionRegistry::new();
        registry.register(Arc::new(StubEnv("arena", "rpg")));
        registry.register(Arc::new(StubEnv("market", "trade")));

        let by_tool = registry.for_agent(&["rpg".to_string()]);
        assert_eq!(by_tool.len(), 1);
        assert_eq!(by_tool[0].name(), "arena");

        let by_name = registry.for_agent(&["market".to_string()]);
        assert_eq!(by_name.len(), 1);

        assert!(registry.for_agent(&["remember".to_string()]).is_empty());
    }

    #[test]
    fn metrics_track_errors() {
        let mut metrics = ExtensionMetrics::default();
        metrics.record(true);
        metrics.record(false);
        assert_eq!(metrics.invocations, 2);
        assert_eq!(metrics.errors, 1);
        assert!(metrics.last_used_at.is_some());
    }
}
