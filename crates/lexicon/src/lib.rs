//! Record validation for the closed lexicon of agent record types.
//!
//! Every ingress edge (HTTP, WS, inbox, the remember tool) validates records
//! against this discriminated union before they touch the memory store or
//! another agent's inbox. Unknown `$type`s are always rejected.

use chrono::DateTime;
use serde_json::Value;

use sg_domain::{Error, Issue, Result};

/// The closed set of record types accepted at ingress.
pub const KNOWN_TYPES: &[&str] = &[
    "agent.memory.note",
    "agent.memory.decision",
    "agent.comms.message",
    "agent.comms.task",
    "agent.comms.response",
    "agent.comms.handoff",
];

const DECISION_STATUSES: &[&str] = &["proposed", "accepted", "rejected", "superseded"];
const RESPONSE_STATUSES: &[&str] = &["accepted", "completed", "failed", "rejected"];
const CONTENT_KINDS: &[&str] = &["text", "json", "ref"];

/// Validate a record against its `$type`. Returns the full issue list on
/// failure so callers can surface a 400 with every problem at once.
pub fn validate(record: &Value) -> Result<()> {
    let issues = check(record);
    if issues.is_empty() {
        Ok(())
    } else {
        Err(Error::invalid_record(issues))
    }
}

/// Apply lexicon defaults in place: `priority` (3) on messages,
/// `resultVisibility` (`"private"`) on tasks. Call after [`validate`].
pub fn normalize(record: &mut Value) {
    let Some(ty) = record.get("$type").and_then(Value::as_str).map(String::from) else {
        return;
    };
    let Some(obj) = record.as_object_mut() else {
        return;
    };
    match ty.as_str() {
        "agent.comms.message" => {
            obj.entry("priority").or_insert(Value::from(3));
        }
        "agent.comms.task" => {
            obj.entry("resultVisibility").or_insert(Value::from("private"));
        }
        _ => {}
    }
}

fn check(record: &Value) -> Vec<Issue> {
    let mut issues = Vec::new();

    let Some(obj) = record.as_object() else {
        return vec![Issue::new("", "record must be a JSON object")];
    };

    let ty = match obj.get("$type").and_then(Value::as_str) {
        Some(t) if !t.is_empty() => t,
        _ => return vec![Issue::new("$type", "missing or empty $type")],
    };

    match ty {
        "agent.memory.note" => {
            require_string(obj, "summary", &mut issues);
            require_datetime(obj, "createdAt", &mut issues);
            optional_string(obj, "text", &mut issues);
            optional_string(obj, "source", &mut issues);
            if let Some(tags) = obj.get("tags") {
                match tags.as_array() {
                    Some(arr) => {
                        for (i, tag) in arr.iter().enumerate() {
                            if !tag.is_string() {
                                issues.push(Issue::new(format!("tags.{i}"), "tag must be a string"));
                            }
                        }
                    }
                    None => issues.push(Issue::new("tags", "tags must be an array")),
                }
            }
        }
        "agent.memory.decision" => {
            require_string(obj, "decision", &mut issues);
            require_string(obj, "context", &mut issues);
            require_string(obj, "rationale", &mut issues);
            require_enum(obj, "status", DECISION_STATUSES, &mut issues);
            require_datetime(obj, "createdAt", &mut issues);
        }
        "agent.comms.message" => {
            require_string(obj, "sender", &mut issues);
            require_string(obj, "recipient", &mut issues);
            require_datetime(obj, "createdAt", &mut issues);
            check_content(obj.get("content"), &mut issues);
            if let Some(priority) = obj.get("priority") {
                match priority.as_i64() {
                    Some(p) if (1..=5).contains(&p) => {}
                    _ => issues.push(Issue::new("priority", "priority must be an integer in [1, 5]")),
                }
            }
        }
        "agent.comms.task" => {
            require_string(obj, "sender", &mut issues);
            require_string(obj, "recipient", &mut issues);
            require_string(obj, "task", &mut issues);
            require_string(obj, "replyTo", &mut issues);
            require_datetime(obj, "createdAt", &mut issues);
        }
        "agent.comms.response" => {
            require_string(obj, "sender", &mut issues);
            require_string(obj, "recipient", &mut issues);
            require_string(obj, "requestUri", &mut issues);
            require_enum(obj, "status", RESPONSE_STATUSES, &mut issues);
            require_datetime(obj, "createdAt", &mut issues);
        }
        "agent.comms.handoff" => {
            require_string(obj, "from", &mut issues);
            require_string(obj, "to", &mut issues);
            require_string(obj, "reason", &mut issues);
            require_datetime(obj, "createdAt", &mut issues);
            match obj.get("context").and_then(Value::as_array) {
                Some(entries) if !entries.is_empty() => {
                    for (i, entry) in entries.iter().enumerate() {
                        let Some(e) = entry.as_object() else {
                            issues.push(Issue::new(
                                format!("context.{i}"),
                                "context entry must be an object",
                            ));
                            continue;
                        };
                        if !e.get("recordId").map(is_nonempty_string).unwrap_or(false) {
                            issues.push(Issue::new(
                                format!("context.{i}.recordId"),
                                "missing required field",
                            ));
                        }
                        if !e.get("encryptedDek").map(is_nonempty_string).unwrap_or(false) {
                            issues.push(Issue::new(
                                format!("context.{i}.encryptedDek"),
                                "missing required field",
                            ));
                        }
                    }
                }
                _ => issues.push(Issue::new("context", "context must be a non-empty array")),
            }
        }
        other => issues.push(Issue::new("$type", format!("unknown record type: {other}"))),
    }

    issues
}

fn check_content(content: Option<&Value>, issues: &mut Vec<Issue>) {
    let Some(content) = content else {
        issues.push(Issue::new("content", "missing required field"));
        return;
    };
    let Some(obj) = content.as_object() else {
        issues.push(Issue::new("content", "content must be an object"));
        return;
    };
    match obj.get("kind").and_then(Value::as_str) {
        Some("text") => {
            if !obj.get("text").map(is_nonempty_string).unwrap_or(false) {
                issues.push(Issue::new("content.text", "text content requires text"));
            }
        }
        Some("json") => {
            if obj.get("value").is_none() {
                issues.push(Issue::new("content.value", "json content requires value"));
            }
        }
        Some("ref") => {
            if !obj.get("uri").map(is_nonempty_string).unwrap_or(false) {
                issues.push(Issue::new("content.uri", "ref content requires uri"));
            }
        }
        Some(other) => issues.push(Issue::new(
            "content.kind",
            format!("unknown content kind: {other} (expected one of {CONTENT_KINDS:?})"),
        )),
        None => issues.push(Issue::new("content.kind", "missing required field")),
    }
}

fn is_nonempty_string(v: &Value) -> bool {
    v.as_str().map(|s| !s.is_empty()).unwrap_or(false)
}

fn require_string(obj: &serde_json::Map<String, Value>, field: &str, issues: &mut Vec<Issue>) {
    if !obj.get(field).map(is_nonempty_string).unwrap_or(false) {
        issues.push(Issue::new(field, "missing required field"));
    }
}

fn optional_string(obj: &serde_json::Map<String, Value>, field: &str, issues: &mut Vec<Issue>) {
    if let Some(v) = obj.get(field) {
        if !v.is_string() {
            issues.push(Issue::new(field, "must be a string"));
        }
    }
}

fn require_enum(
    obj: &serde_json::Map<String, Value>,
    field: &str,
    allowed: &[&str],
    issues: &mut Vec<Issue>,
) {
    match obj.get(field).and_then(Value::as_str) {
        Some(v) if allowed.contains(&v) => {}
        Some(v) => issues.push(Issue::new(
            field,
            format!("invalid value {v:?} (expected one of {allowed:?})"),
        )),
        None => issues.push(Issue::new(field, "missing required field")),
    }
}

fn require_datetime(obj: &serde_json::Map<String, Value>, field: &str, issues: &mut Vec<Issue>) {
    match obj.get(field).and_then(Value::as_str) {
        Some(v) => {
            if DateTime::parse_from_rfc3339(v).is_err() {
                issues.push(Issue::new(field, "must be an RFC 3339 datetime"));
            }
        }
        None => issues.push(Issue::new(field, "missing required field")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn issues_for(record: Value) -> Vec<Issue> {
        match validate(&record) {
            Ok(()) => Vec::new(),
            Err(Error::InvalidRecord { issues }) => issues,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn valid_note_passes() {
        let record = json!({
            "$type": "agent.memory.note",
            "summary": "Hi",
            "createdAt": "2026-02-07T00:00:00.000Z",
            "tags": ["greeting"]
        });
        assert!(validate(&record).is_ok());
    }

    #[test]
    fn note_missing_summary_reports_field() {
        let record = json!({
            "$type": "agent.memory.note",
            "createdAt": "2026-02-07T00:00:00.000Z"
        });
        let issues = issues_for(record);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "summary");
    }

    #[test]
    fn unknown_type_rejected() {
        let issues = issues_for(json!({"$type": "agent.memory.unknown", "x": 1}));
        assert_eq!(issues[0].path, "$type");
    }

    #[test]
    fn decision_status_enum_enforced() {
        let record = json!({
            "$type": "agent.memory.decision",
            "decision": "use tokio",
            "context": "async runtime",
            "rationale": "ecosystem",
            "status": "maybe",
            "createdAt": "2026-02-07T00:00:00Z"
        });
        let issues = issues_for(record);
        assert!(issues.iter().any(|i| i.path == "status"));
    }

    #[test]
    fn message_content_union_on_kind() {
        let base = |content: Value| {
            json!({
                "$type": "agent.comms.message",
                "sender": "did:cf:a",
                "recipient": "did:cf:b",
                "content": content,
                "createdAt": "2026-02-07T00:00:00Z"
            })
        };
        assert!(validate(&base(json!({"kind": "text", "text": "hello"}))).is_ok());
        assert!(validate(&base(json!({"kind": "json", "value": {"a": 1}}))).is_ok());
        assert!(validate(&base(json!({"kind": "ref", "uri": "at://x"}))).is_ok());
        assert!(validate(&base(json!({"kind": "blob"}))).is_err());
        assert!(validate(&base(json!({"kind": "text"}))).is_err());
    }

    #[test]
    fn message_priority_range() {
        let mk = |priority: Value| {
            json!({
                "$type": "agent.comms.message",
                "sender": "did:cf:a",
                "recipient": "did:cf:b",
                "content": {"kind": "text", "text": "hi"},
                "priority": priority,
                "createdAt": "2026-02-07T00:00:00Z"
            })
        };
        assert!(validate(&mk(json!(1))).is_ok());
        assert!(validate(&mk(json!(5))).is_ok());
        assert!(validate(&mk(json!(0))).is_err());
        assert!(validate(&mk(json!(6))).is_err());
    }

    #[test]
    fn normalize_defaults_priority_and_visibility() {
        let mut msg = json!({
            "$type": "agent.comms.message",
            "sender": "a", "recipient": "b",
            "content": {"kind": "text", "text": "hi"},
            "createdAt": "2026-02-07T00:00:00Z"
        });
        normalize(&mut msg);
        assert_eq!(msg["priority"], 3);

        let mut task = json!({
            "$type": "agent.comms.task",
            "sender": "a", "recipient": "b", "task": "t", "replyTo": "at://x",
            "createdAt": "2026-02-07T00:00:00Z"
        });
        normalize(&mut task);
        assert_eq!(task["resultVisibility"], "private");
    }

    #[test]
    fn handoff_context_entries_checked() {
        let record = json!({
            "$type": "agent.comms.handoff",
            "from": "did:cf:a",
            "to": "did:cf:b",
            "reason": "vacation",
            "context": [{"recordId": "r1"}],
            "createdAt": "2026-02-07T00:00:00Z"
        });
        let issues = issues_for(record);
        assert!(issues.iter().any(|i| i.path == "context.0.encryptedDek"));
    }

    #[test]
    fn response_requires_request_uri() {
        let record = json!({
            "$type": "agent.comms.response",
            "sender": "a", "recipient": "b",
            "status": "completed",
            "createdAt": "2026-02-07T00:00:00Z"
        });
        let issues = issues_for(record);
        assert!(issues.iter().any(|i| i.path == "requestUri"));
    }
}
