//! Prompt construction for the think phase.

use serde_json::Value;

use sg_domain::config::{AgentConfig, GoalStatus};
use sg_domain::tool::ToolOutcome;

use crate::runtime::extensions::EXTENSIBILITY_HINT;

/// Inputs gathered during observe, flattened into the user message.
pub struct PromptInputs<'a> {
    pub config: &'a AgentConfig,
    pub outcomes: &'a [&'a ToolOutcome],
    pub observations: &'a Value,
    pub env_context: Option<&'a str>,
    pub inbox_len: usize,
    pub enabled_tools: &'a [String],
}

pub fn build_system_prompt(config: &AgentConfig, extensibility_hint: bool) -> String {
    let mut prompt = config.personality.clone();
    if !config.specialty.is_empty() {
        prompt.push_str(&format!("\nYour specialty: {}.", config.specialty));
    }
    if extensibility_hint {
        prompt.push_str("\n\n");
        prompt.push_str(EXTENSIBILITY_HINT);
    }
    prompt
}

pub fn build_user_prompt(inputs: &PromptInputs<'_>) -> String {
    let mut sections: Vec<String> = Vec::new();

    // Goals: active first, then a bounded tail of recent completions.
    let mut active: Vec<_> = inputs
        .config
        .goals
        .iter()
        .filter(|g| g.is_active())
        .collect();
    active.sort_by_key(|g| g.priority);
    let mut completed: Vec<_> = inputs
        .config
        .goals
        .iter()
        .filter(|g| g.status == GoalStatus::Completed)
        .collect();
    completed.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
    completed.truncate(inputs.config.max_completed_goals);

    if active.is_empty() && completed.is_empty() {
        sections.push("## Goals\nYou have no goals yet. Consider setting one with update_goal.".into());
    } else {
        let mut lines = vec!["## Goals".to_owned()];
        for goal in active {
            lines.push(format!(
                "- [{}] (p{}) {} — {:.0}% done",
                match goal.status {
                    GoalStatus::Pending => "pending",
                    GoalStatus::InProgress => "in progress",
                    GoalStatus::Blocked => "blocked",
                    _ => "active",
                },
                goal.priority,
                goal.description,
                goal.progress * 100.0
            ));
        }
        for goal in completed {
            lines.push(format!("- [completed] {}", goal.description));
        }
        sections.push(lines.join("\n"));
    }

    if !inputs.outcomes.is_empty() {
        let mut lines = vec!["## Recent actions".to_owned()];
        for outcome in inputs.outcomes {
            lines.push(format!(
                "- {} {}",
                outcome.tool,
                if outcome.success { "ok" } else { "FAILED" }
            ));
        }
        sections.push(lines.join("\n"));
    }

    sections.push(format!(
        "## Observations\n```json\n{}\n```",
        serde_json::to_string_pretty(inputs.observations).unwrap_or_else(|_| "{}".into())
    ));

    if let Some(context) = inputs.env_context {
        sections.push(format!("## Environment\n{context}"));
    }

    if inputs.inbox_len > 0 {
        sections.push(format!(
            "## Inbox\nYou have {} unread message(s) — they are included in your observations. \
Respond or act on them this cycle.",
            inputs.inbox_len
        ));
    }

    sections.push(format!(
        "## Available tools\n{}",
        inputs.enabled_tools.join(", ")
    ));

    sections.push(
        "## Instructions\nWork toward your goals. Always use at least one tool this cycle. \
If you are stuck or blocked, report it with the notify tool."
            .into(),
    );

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sg_domain::config::Goal;
    use serde_json::json;

    fn outcome(tool: &str, success: bool) -> ToolOutcome {
        ToolOutcome {
            tool: tool.into(),
            success,
            timestamp: Utc::now(),
            goal_id: None,
        }
    }

    #[test]
    fn system_prompt_carries_personality_and_optional_hint() {
        let mut config = AgentConfig::new("alice");
        config.personality = "You are Alice.".into();
        assert_eq!(build_system_prompt(&config, false), "You are Alice.");
        assert!(build_system_prompt(&config, true).contains("extensions"));
    }

    #[test]
    fn user_prompt_sections() {
        let mut config = AgentConfig::new("alice");
        config.goals.push(Goal::new("g1", "map the network"));
        let mut done = Goal::new("g2", "say hello");
        done.status = GoalStatus::Completed;
        done.completed_at = Some(Utc::now());
        config.goals.push(done);

        let o1 = outcome("recall", true);
        let o2 = outcome("send_message", false);
        let outcomes = vec![&o1, &o2];
        let observations = json!({"inbox": []});
        let tools = vec!["remember".to_string(), "notify".to_string()];

        let prompt = build_user_prompt(&PromptInputs {
            config: &config,
            outcomes: &outcomes,
            observations: &observations,
            env_context: Some("Dungeon level 3, your move."),
            inbox_len: 2,
            enabled_tools: &tools,
        });

        assert!(prompt.contains("map the network"));
        assert!(prompt.contains("[completed] say hello"));
        assert!(prompt.contains("send_message FAILED"));
        assert!(prompt.contains("Dungeon level 3"));
        assert!(prompt.contains("2 unread message(s)"));
        assert!(prompt.contains("remember, notify"));
        assert!(prompt.contains("at least one tool"));
    }

    #[test]
    fn inbox_nudge_absent_when_empty() {
        let config = AgentConfig::new("alice");
        let prompt = build_user_prompt(&PromptInputs {
            config: &config,
            outcomes: &[],
            observations: &json!({}),
            env_context: None,
            inbox_len: 0,
            enabled_tools: &[],
        });
        assert!(!prompt.contains("unread"));
    }

    #[test]
    fn completed_goals_capped_by_config() {
        let mut config = AgentConfig::new("alice");
        config.max_completed_goals = 1;
        for i in 0..4 {
            let mut g = Goal::new(format!("g{i}"), format!("done {i}"));
            g.status = GoalStatus::Completed;
            g.completed_at = Some(Utc::now());
            config.goals.push(g);
        }
        let prompt = build_user_prompt(&PromptInputs {
            config: &config,
            outcomes: &[],
            observations: &json!({}),
            env_context: None,
            inbox_len: 0,
            enabled_tools: &[],
        });
        assert_eq!(prompt.matches("[completed]").count(), 1);
    }
}
