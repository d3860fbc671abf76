//! Model fallback chain.
//!
//! Fallback triggers on 5xx, 429, and network/timeout failures. Other 4xx
//! are client errors and return immediately — retrying a bad request
//! against a different model would only mask the bug.

use sg_domain::trace::TraceEvent;
use sg_domain::{Error, Result};

use crate::traits::{ChatRequest, ChatResponse, ModelClient};

/// Models tried when the configured ones fail.
const DEFAULT_FALLBACKS: &[&str] = &["google/gemini-3-flash-preview", "moonshotai/kimi-k2.5"];

/// Build the ordered, deduplicated model chain for an agent.
pub fn fallback_chain(primary: &str, fast: Option<&str>) -> Vec<String> {
    let mut chain: Vec<String> = Vec::with_capacity(4);
    let mut push = |model: &str| {
        if !model.is_empty() && !chain.iter().any(|m| m == model) {
            chain.push(model.to_owned());
        }
    };
    push(primary);
    if let Some(fast) = fast {
        push(fast);
    }
    for model in DEFAULT_FALLBACKS {
        push(model);
    }
    chain
}

/// Whether an error justifies trying the next model in the chain.
pub fn is_retriable(err: &Error) -> bool {
    match err {
        Error::Model { status, .. } => match status {
            Some(s) => *s == 429 || *s >= 500,
            // No status means the failure happened below HTTP.
            None => true,
        },
        Error::Http(_) | Error::Timeout(_) => true,
        _ => false,
    }
}

/// Try each model in order until one answers or a non-retriable error
/// surfaces. Returns the last error when the whole chain fails.
pub async fn chat_with_fallback(
    client: &dyn ModelClient,
    models: &[String],
    req: &ChatRequest,
) -> Result<ChatResponse> {
    let mut last_err = Error::Config("empty model chain".into());

    for (i, model) in models.iter().enumerate() {
        let mut attempt = req.clone();
        attempt.model = Some(model.clone());

        match client.chat(&attempt).await {
            Ok(resp) => return Ok(resp),
            Err(e) if is_retriable(&e) => {
                if let Some(next) = models.get(i + 1) {
                    TraceEvent::ModelFallback {
                        from_model: model.clone(),
                        to_model: next.clone(),
                        reason: e.to_string(),
                    }
                    .emit();
                }
                tracing::warn!(model = %model, error = %e, "model failed, trying next in chain");
                last_err = e;
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ChatResponse;
    use parking_lot::Mutex;

    struct ScriptedClient {
        // (model substring that fails, error to return)
        failures: Vec<(String, fn() -> Error)>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl ModelClient for ScriptedClient {
        async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
            let model = req.model.clone().unwrap_or_default();
            self.calls.lock().push(model.clone());
            for (failing, make_err) in &self.failures {
                if model.contains(failing.as_str()) {
                    return Err(make_err());
                }
            }
            Ok(ChatResponse {
                content: format!("answered by {model}"),
                tool_calls: vec![],
                model,
                finish_reason: Some("stop".into()),
                usage: None,
            })
        }
    }

    fn rate_limited() -> Error {
        Error::Model {
            model: "x".into(),
            message: "rate limit".into(),
            status: Some(429),
        }
    }

    fn bad_request() -> Error {
        Error::Model {
            model: "x".into(),
            message: "invalid tool schema".into(),
            status: Some(400),
        }
    }

    #[test]
    fn chain_is_ordered_and_deduplicated() {
        let chain = fallback_chain("google/gemini-3-flash-preview", Some("fast/one"));
        assert_eq!(
            chain,
            [
                "google/gemini-3-flash-preview",
                "fast/one",
                "moonshotai/kimi-k2.5"
            ]
        );

        let chain = fallback_chain("main/model", None);
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[0], "main/model");
    }

    #[tokio::test]
    async fn falls_back_on_429_then_succeeds() {
        let client = ScriptedClient {
            failures: vec![("primary".into(), rate_limited)],
            calls: Mutex::new(vec![]),
        };
        let models = fallback_chain("primary/model", None);
        let resp = chat_with_fallback(&client, &models, &ChatRequest::default())
            .await
            .unwrap();
        assert!(resp.content.contains("gemini"));
        assert_eq!(client.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn client_errors_do_not_fall_back() {
        let client = ScriptedClient {
            failures: vec![("primary".into(), bad_request)],
            calls: Mutex::new(vec![]),
        };
        let models = fallback_chain("primary/model", None);
        let err = chat_with_fallback(&client, &models, &ChatRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Model { status: Some(400), .. }));
        assert_eq!(client.calls.lock().len(), 1, "no second attempt on 4xx");
    }

    #[tokio::test]
    async fn exhausted_chain_returns_last_error() {
        let client = ScriptedClient {
            failures: vec![("".into(), rate_limited)], // everything fails
            calls: Mutex::new(vec![]),
        };
        let models = fallback_chain("primary/model", None);
        let err = chat_with_fallback(&client, &models, &ChatRequest::default())
            .await
            .unwrap_err();
        assert!(is_retriable(&err));
        assert_eq!(client.calls.lock().len(), 3);
    }

    #[test]
    fn retriable_classification() {
        assert!(is_retriable(&rate_limited()));
        assert!(is_retriable(&Error::Timeout("t".into())));
        assert!(is_retriable(&Error::Http("reset".into())));
        assert!(is_retriable(&Error::Model {
            model: "m".into(),
            message: "oops".into(),
            status: Some(503),
        }));
        assert!(!is_retriable(&bad_request()));
        assert!(!is_retriable(&Error::Config("x".into())));
    }
}
