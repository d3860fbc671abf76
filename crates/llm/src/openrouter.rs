//! OpenRouter-compatible adapter.
//!
//! Works with OpenRouter and any other endpoint that follows the OpenAI
//! chat-completions contract.

use std::time::Duration;

use serde_json::Value;

use sg_domain::tool::{Message, Role, ToolCall, ToolDefinition};
use sg_domain::{Error, Result};

use crate::traits::{ChatRequest, ChatResponse, ModelClient, Usage};

/// Per-call HTTP timeout for model requests.
const HTTP_TIMEOUT: Duration = Duration::from_secs(20);

pub struct OpenRouterClient {
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl OpenRouterClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        default_model: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            default_model: default_model.into(),
            client,
        })
    }

    fn build_body(&self, req: &ChatRequest, model: &str) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_wire).collect();
        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
        });
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_wire).collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        body
    }
}

#[async_trait::async_trait]
impl ModelClient for OpenRouterClient {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let model = req.model.clone().unwrap_or_else(|| self.default_model.clone());
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(req, &model);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("model request timed out: {model}"))
                } else {
                    Error::Http(e.to_string())
                }
            })?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| Error::Http(format!("invalid model response body: {e}")))?;

        if !status.is_success() {
            let message = payload
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("request failed")
                .to_owned();
            return Err(Error::Model {
                model,
                message,
                status: Some(status.as_u16()),
            });
        }

        parse_response(&model, &payload)
    }
}

// ── Wire conversion ────────────────────────────────────────────────

fn msg_to_wire(msg: &Message) -> Value {
    let role = match msg.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };
    let mut out = serde_json::json!({
        "role": role,
        "content": msg.content,
    });
    if !msg.tool_calls.is_empty() {
        out["tool_calls"] = Value::Array(
            msg.tool_calls
                .iter()
                .map(|c| {
                    serde_json::json!({
                        "id": c.call_id,
                        "type": "function",
                        "function": {
                            "name": c.tool_name,
                            "arguments": c.arguments.to_string(),
                        }
                    })
                })
                .collect(),
        );
    }
    if let Some(ref id) = msg.tool_call_id {
        out["tool_call_id"] = Value::String(id.clone());
    }
    out
}

fn tool_to_wire(def: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": def.name,
            "description": def.description,
            "parameters": def.parameters,
        }
    })
}

fn parse_response(model: &str, payload: &Value) -> Result<ChatResponse> {
    let message = payload
        .pointer("/choices/0/message")
        .ok_or_else(|| Error::Http("model response missing choices".into()))?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();

    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .filter_map(|c| {
                    let name = c.pointer("/function/name")?.as_str()?.to_owned();
                    let raw_args = c.pointer("/function/arguments")?.as_str().unwrap_or("{}");
                    Some(ToolCall {
                        call_id: c
                            .get("id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_owned(),
                        tool_name: name,
                        arguments: serde_json::from_str(raw_args)
                            .unwrap_or(Value::Object(Default::default())),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let usage = payload.get("usage").map(|u| Usage {
        prompt_tokens: u.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
        completion_tokens: u
            .get("completion_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
    });

    Ok(ChatResponse {
        content,
        tool_calls,
        model: payload
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(model)
            .to_owned(),
        finish_reason: payload
            .pointer("/choices/0/finish_reason")
            .and_then(Value::as_str)
            .map(String::from),
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_tool_calls_with_string_arguments() {
        let payload = json!({
            "model": "test/model",
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "remember", "arguments": "{\"summary\":\"x\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5}
        });
        let resp = parse_response("fallback", &payload).unwrap();
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].tool_name, "remember");
        assert_eq!(resp.tool_calls[0].arguments["summary"], "x");
        assert_eq!(resp.finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(resp.usage.unwrap().prompt_tokens, 10);
    }

    #[test]
    fn wire_messages_carry_tool_results() {
        let msg = Message::tool_result("call_1", "done");
        let wire = msg_to_wire(&msg);
        assert_eq!(wire["role"], "tool");
        assert_eq!(wire["tool_call_id"], "call_1");
    }

    #[test]
    fn malformed_arguments_degrade_to_empty_object() {
        let payload = json!({
            "choices": [{
                "message": {
                    "tool_calls": [{
                        "id": "c",
                        "function": {"name": "t", "arguments": "not json"}
                    }]
                }
            }]
        });
        let resp = parse_response("m", &payload).unwrap();
        assert!(resp.tool_calls[0].arguments.as_object().unwrap().is_empty());
    }
}
