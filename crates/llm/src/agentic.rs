//! The agentic loop: call the model, execute its tool calls, feed results
//! back, repeat until the model answers without tools or a budget expires.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use sg_domain::tool::{Message, Role, ToolCall, ToolDefinition};
use sg_domain::trace::TraceEvent;
use sg_domain::{Error, Result};

use crate::chain::chat_with_fallback;
use crate::traits::{ChatRequest, ModelClient};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config & results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Wall deadline for the whole loop, model calls included.
    pub global_timeout: Duration,
    /// Non-system messages kept when trimming history before each call.
    pub max_history: usize,
    /// Hard stop on runaway tool loops.
    pub max_steps: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            global_timeout: Duration::from_secs(25),
            max_history: 12,
            max_steps: 25,
        }
    }
}

/// Per-step observability record: which model answered, how long it took,
/// and a preview of what it did.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptStep {
    pub step: usize,
    pub model: String,
    pub duration_ms: u64,
    pub tool_calls: Vec<ToolCallPreview>,
    pub content_preview: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolCallPreview {
    pub name: String,
    pub args_preview: String,
}

#[derive(Debug, Clone)]
pub struct LoopResult {
    pub content: String,
    pub steps: usize,
    /// Model that produced the final answer.
    pub model: String,
    pub transcript: Vec<TranscriptStep>,
}

/// Executes the model's tool calls and returns their result messages.
/// The actor wires this to the dispatcher so per-cycle caps apply.
#[async_trait::async_trait]
pub trait ToolRunner: Send {
    async fn run(&mut self, calls: Vec<ToolCall>) -> Vec<Message>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Drive the model until it answers without tool calls.
///
/// `models` is the fallback chain from [`crate::fallback_chain`];
/// `messages` is the full conversation so far (system first). History is
/// trimmed to `{system, …last max_history}` before every call.
pub async fn agentic_loop(
    client: &dyn ModelClient,
    models: &[String],
    mut messages: Vec<Message>,
    tools: Vec<ToolDefinition>,
    runner: &mut dyn ToolRunner,
    cfg: &LoopConfig,
) -> Result<LoopResult> {
    let deadline = Instant::now() + cfg.global_timeout;
    let mut transcript = Vec::new();

    for step in 0..cfg.max_steps {
        let trimmed = trim_history(&messages, cfg.max_history);
        let req = ChatRequest {
            messages: trimmed,
            tools: tools.clone(),
            temperature: None,
            max_tokens: None,
            model: None,
        };

        let started = Instant::now();
        let resp = tokio::time::timeout_at(deadline, chat_with_fallback(client, models, &req))
            .await
            .map_err(|_| Error::Timeout("agentic loop deadline exceeded".into()))??;
        let duration_ms = started.elapsed().as_millis() as u64;

        transcript.push(TranscriptStep {
            step,
            model: resp.model.clone(),
            duration_ms,
            tool_calls: resp
                .tool_calls
                .iter()
                .map(|c| ToolCallPreview {
                    name: c.tool_name.clone(),
                    args_preview: truncate_str(&c.arguments.to_string(), 120),
                })
                .collect(),
            content_preview: truncate_str(&resp.content, 120),
        });

        TraceEvent::ModelRequest {
            model: resp.model.clone(),
            duration_ms,
            steps: step + 1,
            fallback_index: models.iter().position(|m| m == &resp.model).unwrap_or(0),
        }
        .emit();

        if resp.tool_calls.is_empty() {
            return Ok(LoopResult {
                content: resp.content,
                steps: step + 1,
                model: resp.model,
                transcript,
            });
        }

        let mut assistant = Message::assistant(resp.content.clone());
        assistant.tool_calls = resp.tool_calls.clone();
        messages.push(assistant);

        let results = runner.run(resp.tool_calls).await;
        messages.extend(results);
    }

    Err(Error::Other(format!(
        "agentic loop exceeded {} steps without a final answer",
        cfg.max_steps
    )))
}

/// Keep the system message (when present) plus the last `max` others.
fn trim_history(messages: &[Message], max: usize) -> Vec<Message> {
    let (system, rest): (Vec<&Message>, Vec<&Message>) =
        messages.iter().partition(|m| m.role == Role::System);

    let skip = rest.len().saturating_sub(max);
    system
        .into_iter()
        .take(1)
        .chain(rest.into_iter().skip(skip))
        .cloned()
        .collect()
}

pub(crate) fn truncate_str(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_owned();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ChatResponse;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    /// Returns scripted responses in order, recording what it was sent.
    struct ScriptedClient {
        responses: Mutex<Vec<ChatResponse>>,
        seen_message_counts: Arc<Mutex<Vec<usize>>>,
    }

    #[async_trait::async_trait]
    impl ModelClient for ScriptedClient {
        async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
            self.seen_message_counts.lock().push(req.messages.len());
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                return Err(Error::Other("script exhausted".into()));
            }
            Ok(responses.remove(0))
        }
    }

    struct EchoRunner {
        executed: Vec<String>,
    }

    #[async_trait::async_trait]
    impl ToolRunner for EchoRunner {
        async fn run(&mut self, calls: Vec<ToolCall>) -> Vec<Message> {
            calls
                .into_iter()
                .map(|c| {
                    self.executed.push(c.tool_name.clone());
                    Message::tool_result(c.call_id, format!("{} done", c.tool_name))
                })
                .collect()
        }
    }

    fn final_response(content: &str) -> ChatResponse {
        ChatResponse {
            content: content.into(),
            tool_calls: vec![],
            model: "primary/model".into(),
            finish_reason: Some("stop".into()),
            usage: None,
        }
    }

    fn tool_response(tool: &str) -> ChatResponse {
        ChatResponse {
            content: String::new(),
            tool_calls: vec![ToolCall {
                call_id: "c1".into(),
                tool_name: tool.into(),
                arguments: json!({}),
            }],
            model: "primary/model".into(),
            finish_reason: Some("tool_calls".into()),
            usage: None,
        }
    }

    fn models() -> Vec<String> {
        vec!["primary/model".into()]
    }

    #[tokio::test]
    async fn executes_tools_then_returns_final() {
        let client = ScriptedClient {
            responses: Mutex::new(vec![tool_response("remember"), final_response("all set")]),
            seen_message_counts: Arc::new(Mutex::new(vec![])),
        };
        let mut runner = EchoRunner { executed: vec![] };

        let result = agentic_loop(
            &client,
            &models(),
            vec![Message::system("persona"), Message::user("go")],
            vec![],
            &mut runner,
            &LoopConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(result.content, "all set");
        assert_eq!(result.steps, 2);
        assert_eq!(runner.executed, ["remember"]);
        assert_eq!(result.transcript.len(), 2);
        assert_eq!(result.transcript[0].tool_calls[0].name, "remember");
    }

    #[tokio::test]
    async fn history_is_trimmed_to_system_plus_window() {
        let counts = Arc::new(Mutex::new(vec![]));
        let client = ScriptedClient {
            responses: Mutex::new(vec![final_response("ok")]),
            seen_message_counts: counts.clone(),
        };
        let mut runner = EchoRunner { executed: vec![] };

        let mut messages = vec![Message::system("persona")];
        for i in 0..30 {
            messages.push(Message::user(format!("msg {i}")));
        }

        agentic_loop(
            &client,
            &models(),
            messages,
            vec![],
            &mut runner,
            &LoopConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(counts.lock()[0], 1 + 12);
    }

    #[tokio::test(start_paused = true)]
    async fn global_deadline_aborts_loop() {
        struct SlowClient;
        #[async_trait::async_trait]
        impl ModelClient for SlowClient {
            async fn chat(&self, _req: &ChatRequest) -> Result<ChatResponse> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(final_response("too late"))
            }
        }

        let mut runner = EchoRunner { executed: vec![] };
        let err = agentic_loop(
            &SlowClient,
            &models(),
            vec![Message::user("hi")],
            vec![],
            &mut runner,
            &LoopConfig::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Timeout(_)));
    }

    #[test]
    fn trim_keeps_system_first() {
        let mut messages = vec![Message::user("a"), Message::system("sys")];
        for i in 0..20 {
            messages.push(Message::user(format!("{i}")));
        }
        let trimmed = trim_history(&messages, 5);
        assert_eq!(trimmed.len(), 6);
        assert_eq!(trimmed[0].role, Role::System);
        assert_eq!(trimmed[5].content, "19");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_str("short", 10), "short");
        let truncated = truncate_str("aaaaé", 5);
        assert!(truncated.ends_with('…'));
    }
}
