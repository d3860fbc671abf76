use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use sg_domain::tool::ToolDefinition;
use sg_domain::Result;

/// Executable behind a tool name.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn execute(&self, call_id: &str, args: &Value) -> Result<Value>;
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;

/// Adapter so plain async closures can serve as handlers.
struct FnHandler<F>(F);

#[async_trait]
impl<F> ToolHandler for FnHandler<F>
where
    F: Fn(String, Value) -> HandlerFuture + Send + Sync,
{
    async fn execute(&self, call_id: &str, args: &Value) -> Result<Value> {
        (self.0)(call_id.to_owned(), args.clone()).await
    }
}

/// A named tool with its schema and handler capability.
#[derive(Clone)]
pub struct Tool {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: Value,
    /// When set, the actor must satisfy this capability predicate before
    /// the tool dispatches, regardless of allowlist.
    pub capability: Option<String>,
    pub handler: Arc<dyn ToolHandler>,
}

impl Tool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            capability: None,
            handler,
        }
    }

    /// Build a tool from an async closure.
    pub fn from_fn<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        f: F,
    ) -> Self
    where
        F: Fn(String, Value) -> HandlerFuture + Send + Sync + 'static,
    {
        Self::new(name, description, parameters, Arc::new(FnHandler(f)))
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capability = Some(capability.into());
        self
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

/// Insertion-ordered registry; lookup is by name, later registrations of
/// the same name replace earlier ones in place.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Tool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Tool) {
        match self.index.get(&tool.name) {
            Some(&i) => self.tools[i] = tool,
            None => {
                self.index.insert(tool.name.clone(), self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tool> {
        self.tools.iter()
    }

    /// Definitions in registration order, filtered to `enabled`, minus
    /// `suppressed`, further constrained by an optional whitelist
    /// (whitelist wins over suppression).
    pub fn exposed_definitions(
        &self,
        enabled: &[String],
        suppressed: &[String],
        whitelist: Option<&[String]>,
    ) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .filter(|t| enabled.iter().any(|e| e == &t.name))
            .filter(|t| match whitelist {
                Some(allow) => allow.iter().any(|w| w == &t.name),
                None => !suppressed.iter().any(|s| s == &t.name),
            })
            .map(Tool::definition)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop(name: &str) -> Tool {
        Tool::from_fn(name, "noop", json!({"type": "object"}), |_, _| {
            Box::pin(async { Ok(Value::Null) })
        })
    }

    #[test]
    fn registry_preserves_insertion_order() {
        let mut reg = ToolRegistry::new();
        reg.register(noop("b"));
        reg.register(noop("a"));
        reg.register(noop("c"));
        let names: Vec<_> = reg.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["b", "a", "c"]);
    }

    #[test]
    fn reregistering_replaces_in_place() {
        let mut reg = ToolRegistry::new();
        reg.register(noop("a"));
        reg.register(noop("b"));
        let mut replacement = noop("a");
        replacement.description = "updated".into();
        reg.register(replacement);
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.get("a").unwrap().description, "updated");
        assert_eq!(reg.iter().next().unwrap().name, "a");
    }

    #[test]
    fn exposed_definitions_filtering() {
        let mut reg = ToolRegistry::new();
        for name in ["remember", "recall", "notify"] {
            reg.register(noop(name));
        }
        let enabled = vec!["remember".to_string(), "recall".to_string()];

        let defs = reg.exposed_definitions(&enabled, &[], None);
        assert_eq!(defs.len(), 2);

        let suppressed = vec!["recall".to_string()];
        let defs = reg.exposed_definitions(&enabled, &suppressed, None);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "remember");

        // Whitelist wins over suppression.
        let whitelist = vec!["recall".to_string()];
        let defs = reg.exposed_definitions(&enabled, &suppressed, Some(&whitelist));
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "recall");
    }
}
