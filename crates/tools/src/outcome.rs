use std::collections::VecDeque;

use chrono::Utc;
use serde_json::Value;

use sg_domain::tool::ToolOutcome;

/// Bounded ring of recent tool outcomes, consumed by reflection and the
/// prompt builder.
#[derive(Debug, Clone)]
pub struct OutcomeLog {
    entries: VecDeque<ToolOutcome>,
    cap: usize,
}

pub const DEFAULT_OUTCOME_CAP: usize = 50;

impl Default for OutcomeLog {
    fn default() -> Self {
        Self::with_cap(DEFAULT_OUTCOME_CAP)
    }
}

impl OutcomeLog {
    pub fn with_cap(cap: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(cap),
            cap,
        }
    }

    /// Restore from persisted entries, keeping only the newest `cap`.
    pub fn from_entries(entries: Vec<ToolOutcome>, cap: usize) -> Self {
        let mut log = Self::with_cap(cap);
        let skip = entries.len().saturating_sub(cap);
        for entry in entries.into_iter().skip(skip) {
            log.entries.push_back(entry);
        }
        log
    }

    pub fn record(&mut self, tool: &str, success: bool, goal_id: Option<String>) {
        if self.entries.len() == self.cap {
            self.entries.pop_front();
        }
        self.entries.push_back(ToolOutcome {
            tool: tool.to_owned(),
            success,
            timestamp: Utc::now(),
            goal_id,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newest-last slice of the most recent `n` outcomes.
    pub fn last_n(&self, n: usize) -> Vec<&ToolOutcome> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).collect()
    }

    /// Trim in place to the newest `n` entries (housekeeping).
    pub fn trim_to(&mut self, n: usize) {
        while self.entries.len() > n {
            self.entries.pop_front();
        }
    }

    pub fn entries(&self) -> Vec<ToolOutcome> {
        self.entries.iter().cloned().collect()
    }
}

/// Pull a goal id out of tool args or a nested result payload, so goal
/// attribution survives tools that echo the goal in their output.
pub fn extract_goal_id(args: &Value, result: Option<&Value>) -> Option<String> {
    fn from(value: &Value) -> Option<String> {
        for key in ["goalId", "goal_id"] {
            if let Some(id) = value.get(key).and_then(Value::as_str) {
                return Some(id.to_owned());
            }
        }
        value.get("result").and_then(from)
    }
    from(args).or_else(|| result.and_then(from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ring_evicts_oldest_at_cap() {
        let mut log = OutcomeLog::with_cap(3);
        for i in 0..5 {
            log.record(&format!("tool{i}"), true, None);
        }
        assert_eq!(log.len(), 3);
        let names: Vec<_> = log.last_n(3).iter().map(|o| o.tool.clone()).collect();
        assert_eq!(names, ["tool2", "tool3", "tool4"]);
    }

    #[test]
    fn last_n_handles_short_log() {
        let mut log = OutcomeLog::default();
        log.record("only", false, None);
        assert_eq!(log.last_n(10).len(), 1);
    }

    #[test]
    fn goal_id_from_args_or_nested_result() {
        assert_eq!(
            extract_goal_id(&json!({"goalId": "g1"}), None),
            Some("g1".into())
        );
        assert_eq!(
            extract_goal_id(&json!({"goal_id": "g2"}), None),
            Some("g2".into())
        );
        assert_eq!(
            extract_goal_id(&json!({}), Some(&json!({"result": {"goalId": "g3"}}))),
            Some("g3".into())
        );
        assert_eq!(extract_goal_id(&json!({}), Some(&json!({"ok": true}))), None);
    }

    #[test]
    fn from_entries_respects_cap() {
        let entries: Vec<_> = (0..10)
            .map(|i| ToolOutcome {
                tool: format!("t{i}"),
                success: true,
                timestamp: Utc::now(),
                goal_id: None,
            })
            .collect();
        let log = OutcomeLog::from_entries(entries, 4);
        assert_eq!(log.len(), 4);
        assert_eq!(log.last_n(1)[0].tool, "t9");
    }
}
