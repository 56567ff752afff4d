// Action handler abstraction
//
// Handler outcomes are a closed result variant, so the engine's
// per-action loop is a pure match instead of exception plumbing. The
// registry is populated explicitly at startup; nothing registers itself
// as an import side effect.

mod builtin;

pub use builtin::{AppendAction, DelayAction, EchoAction, HttpRequestAction, LlmCompleteAction};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use reviewflow_core::llm::LlmManager;

/// Outcome of one action handler invocation.
#[derive(Debug, Clone)]
pub enum ActionOutcome {
    /// Success; the value is merged into the execution context
    Ok(Value),

    /// Transient failure (network, rate limit, 5xx); the engine backs
    /// off and retries up to the action's retry budget
    Retry(String),

    /// Terminal failure for this action
    Fail(String),

    /// The handler observed its deadline
    Timeout,

    /// The handler observed cancellation
    Cancelled,
}

/// What a handler receives: its action config, the accumulated execution
/// context, and the cancellation token it must observe across I/O.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub config: Value,
    pub context: Value,
    pub cancel: CancellationToken,
}

impl ActionContext {
    pub fn new(config: Value, context: Value, cancel: CancellationToken) -> Self {
        Self {
            config,
            context,
            cancel,
        }
    }

    /// String from the action config
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    /// String from the accumulated context
    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(Value::as_str)
    }
}

/// A single unit of work within a workflow.
///
/// Handlers may suspend on I/O but must observe `ctx.cancel`; the engine
/// expects cooperative cancellation within five seconds of signalling.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(&self, ctx: ActionContext) -> ActionOutcome;
}

/// Name-keyed action handler registry.
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with the built-in handler set. `llm` enables the
    /// `llm_complete` action.
    pub fn with_builtins(llm: Option<Arc<LlmManager>>) -> Self {
        let mut registry = Self::new();
        registry.register("echo", Arc::new(EchoAction));
        registry.register("append", Arc::new(AppendAction));
        registry.register("delay", Arc::new(DelayAction));
        registry.register("http_request", Arc::new(HttpRequestAction::new()));
        if let Some(manager) = llm {
            registry.register("llm_complete", Arc::new(LlmCompleteAction::new(manager)));
        }
        registry
    }

    pub fn register(&mut self, action_type: &str, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(action_type.to_string(), handler);
    }

    pub fn get(&self, action_type: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(action_type).cloned()
    }

    pub fn action_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = ActionRegistry::with_builtins(None);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("append").is_some());
        assert!(registry.get("delay").is_some());
        assert!(registry.get("http_request").is_some());
        // llm_complete needs a manager
        assert!(registry.get("llm_complete").is_none());
        assert!(registry.get("unknown").is_none());
    }
}
