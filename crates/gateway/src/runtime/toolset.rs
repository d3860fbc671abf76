//! Core tools every agent carries, built fresh per cycle from the actor's
//! handles plus whatever its environments contribute.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{json, Value};

use sg_domain::config::{Goal, GoalStatus};
use sg_domain::{Error, Result};
use sg_memory::{ListParams, MemoryStore};
use sg_tools::{Environment, Tool, ToolRegistry};

use crate::observability::Emitter;
use crate::relay::Relay;
use crate::webhooks;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GoalBook
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Shared view of the agent's goals. Tools mutate it mid-cycle; the cycle
/// syncs it back into config at reflect, so end-of-cycle writes win.
#[derive(Clone, Default)]
pub struct GoalBook(Arc<RwLock<Vec<Goal>>>);

impl GoalBook {
    pub fn new(goals: Vec<Goal>) -> Self {
        Self(Arc::new(RwLock::new(goals)))
    }

    pub fn snapshot(&self) -> Vec<Goal> {
        self.0.read().clone()
    }

    pub fn replace(&self, goals: Vec<Goal>) {
        *self.0.write() = goals;
    }

    /// Create or update a goal; returns its id.
    pub fn upsert(
        &self,
        goal_id: Option<&str>,
        description: Option<&str>,
        status: Option<GoalStatus>,
        progress: Option<f64>,
        priority: Option<u8>,
    ) -> String {
        let mut goals = self.0.write();
        let id = match goal_id {
            Some(id) if goals.iter().any(|g| g.id == id) => id.to_owned(),
            Some(id) => {
                goals.push(Goal::new(id, description.unwrap_or_default()));
                id.to_owned()
            }
            None => {
                let id = format!("goal-{}", uuid::Uuid::new_v4().simple());
                goals.push(Goal::new(&id, description.unwrap_or_default()));
                id
            }
        };

        if let Some(goal) = goals.iter_mut().find(|g| g.id == id) {
            if let Some(d) = description {
                goal.description = d.to_owned();
            }
            if let Some(p) = priority {
                goal.priority = p.clamp(1, 5);
            }
            if let Some(p) = progress {
                goal.progress = p.clamp(0.0, 1.0);
            }
            if let Some(s) = status {
                goal.status = s;
                if s == GoalStatus::Completed {
                    goal.completed_at = Some(Utc::now());
                    goal.progress = 1.0;
                }
            }
        }
        id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool deps & registry builder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Handles the core tools close over. All are cheap clones of the actor's
/// single-writer state or process-wide services.
pub struct ToolDeps {
    pub agent: String,
    pub did: String,
    pub memory: MemoryStore,
    pub goals: GoalBook,
    pub relay: Arc<Relay>,
    pub emitter: Arc<Emitter>,
    pub webhook_url: Option<String>,
    pub webhook_secret: Vec<u8>,
}

/// Build the full per-cycle registry: core tools plus environment tools.
pub fn build_registry(deps: &Arc<ToolDeps>, envs: &[Arc<dyn Environment>]) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(remember_tool(deps.clone()));
    registry.register(recall_tool(deps.clone()));
    registry.register(forget_tool(deps.clone()));
    registry.register(share_tool(deps.clone()));
    registry.register(send_message_tool(deps.clone()));
    registry.register(update_goal_tool(deps.clone()));
    registry.register(notify_tool(deps.clone()));

    for env in envs {
        for tool in env.tools() {
            registry.register(tool);
        }
    }
    registry
}

fn remember_tool(deps: Arc<ToolDeps>) -> Tool {
    Tool::from_fn(
        "remember",
        "Store a structured record in your encrypted memory. The record must carry a valid $type.",
        json!({
            "type": "object",
            "properties": {
                "record": { "type": "object", "description": "Lexicon record, e.g. agent.memory.note" }
            },
            "required": ["record"]
        }),
        move |_, args| {
            let deps = deps.clone();
            Box::pin(async move {
                let mut record = args
                    .get("record")
                    .cloned()
                    .ok_or_else(|| Error::Other("missing record".into()))?;
                sg_lexicon::validate(&record)?;
                sg_lexicon::normalize(&mut record);
                let id = deps.memory.store(&record)?;
                Ok(json!({ "id": id }))
            })
        },
    )
}

fn recall_tool(deps: Arc<ToolDeps>) -> Tool {
    Tool::from_fn(
        "recall",
        "List recent records from your encrypted memory, newest first. Set shared=true for records others shared with you.",
        json!({
            "type": "object",
            "properties": {
                "collection": { "type": "string", "description": "Filter by record $type" },
                "limit": { "type": "integer", "description": "Max results (default 50, cap 200)" },
                "shared": { "type": "boolean", "description": "Read the shared-with-me view" }
            }
        }),
        move |_, args| {
            let deps = deps.clone();
            Box::pin(async move {
                let params = ListParams {
                    collection: args
                        .get("collection")
                        .and_then(Value::as_str)
                        .map(String::from),
                    limit: args.get("limit").and_then(Value::as_u64).map(|l| l as usize),
                };
                let records = if args.get("shared").and_then(Value::as_bool).unwrap_or(false) {
                    deps.memory.list_shared(&params)
                } else {
                    deps.memory.list(&params)
                };
                Ok(serde_json::to_value(records)?)
            })
        },
    )
}

fn forget_tool(deps: Arc<ToolDeps>) -> Tool {
    Tool::from_fn(
        "forget",
        "Soft-delete a memory record by id. Deleted records disappear from every view.",
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string", "description": "Record id (did/collection/rkey)" }
            },
            "required": ["id"]
        }),
        move |_, args| {
            let deps = deps.clone();
            Box::pin(async move {
                let id = args
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::Other("missing id".into()))?;
                let deleted = deps.memory.soft_delete(id)?;
                Ok(json!({ "deleted": deleted }))
            })
        },
    )
}

fn share_tool(deps: Arc<ToolDeps>) -> Tool {
    Tool::from_fn(
        "share_memory",
        "Grant another agent read access to one of your records. Looks up their key in the relay directory.",
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string", "description": "Record id to share" },
                "recipientDid": { "type": "string", "description": "Recipient agent did" }
            },
            "required": ["id", "recipientDid"]
        }),
        move |_, args| {
            let deps = deps.clone();
            Box::pin(async move {
                let id = args
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::Other("missing id".into()))?;
                let recipient = args
                    .get("recipientDid")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::Other("missing recipientDid".into()))?;
                let registration = deps
                    .relay
                    .public_keys(recipient)
                    .ok_or_else(|| Error::NotFound(format!("agent {recipient}")))?;
                deps.memory
                    .share(id, recipient, &registration.public_keys.encryption)?;
                Ok(json!({ "shared": true, "recipient": recipient }))
            })
        },
    )
}

fn send_message_tool(deps: Arc<ToolDeps>) -> Tool {
    Tool::from_fn(
        "send_message",
        "Send a direct message to another agent's inbox via the relay.",
        json!({
            "type": "object",
            "properties": {
                "recipient": { "type": "string", "description": "Recipient did" },
                "text": { "type": "string", "description": "Message text" },
                "priority": { "type": "integer", "description": "1 (urgent) to 5 (idle chatter)" }
            },
            "required": ["recipient", "text"]
        }),
        move |_, args| {
            let deps = deps.clone();
            Box::pin(async move {
                let recipient = args
                    .get("recipient")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::Other("missing recipient".into()))?;
                let text = args
                    .get("text")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::Other("missing text".into()))?;

                let mut message = json!({
                    "$type": "agent.comms.message",
                    "sender": deps.did,
                    "recipient": recipient,
                    "content": { "kind": "text", "text": text },
                    "createdAt": Utc::now().to_rfc3339(),
                });
                if let Some(p) = args.get("priority").and_then(Value::as_i64) {
                    message["priority"] = json!(p);
                }
                sg_lexicon::validate(&message)?;
                sg_lexicon::normalize(&mut message);

                deps.relay.deliver_message(&message).await?;
                Ok(json!({ "delivered": true }))
            })
        },
    )
}

fn update_goal_tool(deps: Arc<ToolDeps>) -> Tool {
    Tool::from_fn(
        "update_goal",
        "Create or update one of your goals: description, status, progress, priority.",
        json!({
            "type": "object",
            "properties": {
                "goalId": { "type": "string", "description": "Existing goal id; omit to create" },
                "description": { "type": "string" },
                "status": {
                    "type": "string",
                    "enum": ["pending", "in_progress", "blocked", "completed", "cancelled"]
                },
                "progress": { "type": "number", "description": "0.0 to 1.0" },
                "priority": { "type": "integer", "description": "1 to 5" }
            }
        }),
        move |_, args| {
            let deps = deps.clone();
            Box::pin(async move {
                let status = args
                    .get("status")
                    .cloned()
                    .map(serde_json::from_value::<GoalStatus>)
                    .transpose()
                    .map_err(|e| Error::Other(format!("invalid status: {e}")))?;
                let goal_id = deps.goals.upsert(
                    args.get("goalId").and_then(Value::as_str),
                    args.get("description").and_then(Value::as_str),
                    status,
                    args.get("progress").and_then(Value::as_f64),
                    args.get("priority").and_then(Value::as_u64).map(|p| p as u8),
                );
                Ok(json!({ "goalId": goal_id }))
            })
        },
    )
}

fn notify_tool(deps: Arc<ToolDeps>) -> Tool {
    Tool::from_fn(
        "notify",
        "Report something to your operator: progress, a stuck situation, or anything needing human eyes.",
        json!({
            "type": "object",
            "properties": {
                "message": { "type": "string" },
                "level": { "type": "string", "enum": ["info", "warning", "stuck"] }
            },
            "required": ["message"]
        }),
        move |_, args| {
            let deps = deps.clone();
            Box::pin(async move {
                let message = args
                    .get("message")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::Other("missing message".into()))?;
                let level = args
                    .get("level")
                    .and_then(Value::as_str)
                    .unwrap_or("info");

                let payload = json!({
                    "kind": "agent.notify",
                    "agent": deps.agent,
                    "did": deps.did,
                    "level": level,
                    "message": message,
                    "at": Utc::now().to_rfc3339(),
                });
                deps.emitter.emit_json("agent", payload.clone());
                if let Some(ref url) = deps.webhook_url {
                    webhooks::dispatch(url.clone(), deps.webhook_secret.clone(), payload);
                }
                Ok(json!({ "ok": true }))
            })
        },
    )
}

/// Names of the always-available core tools, used to seed new agent
/// configs.
pub fn core_tool_names() -> Vec<String> {
    ["remember", "recall", "forget", "share_memory", "send_message", "update_goal", "notify"]
        .into_iter()
        .map(String::from)
        .collect()
}
