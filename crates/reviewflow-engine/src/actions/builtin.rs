// Built-in action handlers

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use reviewflow_core::llm::{ChatMessage, CompletionRequest, LlmManager};
use reviewflow_core::{sanitize, Error, ProviderError};

use super::{ActionContext, ActionHandler, ActionOutcome};

/// Copies a field from the trigger payload into the context.
///
/// Config: `field` (default "text") — the payload key to copy;
/// `output_key` (default the same as `field`).
pub struct EchoAction;

#[async_trait]
impl ActionHandler for EchoAction {
    async fn execute(&self, ctx: ActionContext) -> ActionOutcome {
        let field = ctx.config_str("field").unwrap_or("text").to_string();
        let output_key = ctx
            .config_str("output_key")
            .unwrap_or(field.as_str())
            .to_string();

        let value = ctx
            .context
            .pointer(&format!("/trigger/payload/{field}"))
            .cloned()
            .unwrap_or(Value::Null);

        ActionOutcome::Ok(json!({ output_key: value }))
    }
}

/// Appends a suffix to a string already in the context.
///
/// Config: `field` (default "text"), `suffix` (default "-appended").
pub struct AppendAction;

#[async_trait]
impl ActionHandler for AppendAction {
    async fn execute(&self, ctx: ActionContext) -> ActionOutcome {
        let field = ctx.config_str("field").unwrap_or("text").to_string();
        let suffix = ctx.config_str("suffix").unwrap_or("-appended");

        let Some(current) = ctx.context_str(&field) else {
            return ActionOutcome::Fail(format!("context has no string field '{field}'"));
        };

        ActionOutcome::Ok(json!({ field: format!("{current}{suffix}") }))
    }
}

/// Sleeps for a configured duration, observing cancellation.
///
/// Config: `seconds` (default 1).
pub struct DelayAction;

#[async_trait]
impl ActionHandler for DelayAction {
    async fn execute(&self, ctx: ActionContext) -> ActionOutcome {
        let seconds = ctx
            .config
            .get("seconds")
            .and_then(Value::as_f64)
            .unwrap_or(1.0)
            .max(0.0);

        tokio::select! {
            _ = ctx.cancel.cancelled() => ActionOutcome::Cancelled,
            _ = tokio::time::sleep(Duration::from_secs_f64(seconds)) => {
                ActionOutcome::Ok(json!({ "delayed_secs": seconds }))
            }
        }
    }
}

/// Outbound HTTP call to an external system.
///
/// Config: `url` (required), `method` (default POST), `body` (JSON),
/// `output_key` (default "response"). Network failures, rate limits,
/// and server errors are retriable; other non-success statuses fail.
pub struct HttpRequestAction {
    client: reqwest::Client,
}

impl HttpRequestAction {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequestAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionHandler for HttpRequestAction {
    async fn execute(&self, ctx: ActionContext) -> ActionOutcome {
        let Some(url) = ctx.config_str("url") else {
            return ActionOutcome::Fail("http_request requires a 'url' in config".to_string());
        };
        let method = ctx.config_str("method").unwrap_or("POST").to_uppercase();
        let output_key = ctx.config_str("output_key").unwrap_or("response").to_string();

        let mut request = match method.as_str() {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "PATCH" => self.client.patch(url),
            "DELETE" => self.client.delete(url),
            other => {
                return ActionOutcome::Fail(format!("unsupported HTTP method: {other}"));
            }
        };
        if let Some(body) = ctx.config.get("body") {
            request = request.json(body);
        }

        let send = async {
            let response = request.send().await?;
            let status = response.status();
            let body: Value = response.json().await.unwrap_or(Value::Null);
            Ok::<_, reqwest::Error>((status, body))
        };

        let result = tokio::select! {
            _ = ctx.cancel.cancelled() => return ActionOutcome::Cancelled,
            result = send => result,
        };

        match result {
            Err(err) => ActionOutcome::Retry(sanitize(&err.to_string())),
            Ok((status, _)) if status.is_server_error() || status.as_u16() == 429 => {
                ActionOutcome::Retry(format!("HTTP {status}"))
            }
            Ok((status, _)) if !status.is_success() => {
                ActionOutcome::Fail(format!("HTTP {status}"))
            }
            Ok((status, body)) => ActionOutcome::Ok(json!({
                output_key: { "status": status.as_u16(), "body": body }
            })),
        }
    }
}

/// Requests a completion from the LLM manager.
///
/// Config: `prompt` (required unless `prompt_key` points at a context
/// string), `system`, `provider`, `model`, `temperature`, `max_tokens`,
/// `output_key` (default "completion").
pub struct LlmCompleteAction {
    manager: Arc<LlmManager>,
}

impl LlmCompleteAction {
    pub fn new(manager: Arc<LlmManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl ActionHandler for LlmCompleteAction {
    async fn execute(&self, ctx: ActionContext) -> ActionOutcome {
        let prompt = match ctx.config_str("prompt") {
            Some(prompt) => prompt.to_string(),
            None => {
                let key = ctx.config_str("prompt_key").unwrap_or("text");
                match ctx.context_str(key) {
                    Some(value) => value.to_string(),
                    None => {
                        return ActionOutcome::Fail(
                            "llm_complete needs a 'prompt' or a context string at 'prompt_key'"
                                .to_string(),
                        )
                    }
                }
            }
        };

        let mut messages = Vec::new();
        if let Some(system) = ctx.config_str("system") {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(prompt));

        let mut request = CompletionRequest::new(messages);
        if let Some(provider) = ctx.config_str("provider") {
            request = request.with_provider(provider);
        }
        if let Some(model) = ctx.config_str("model") {
            request = request.with_model(model);
        }
        request.temperature = ctx
            .config
            .get("temperature")
            .and_then(Value::as_f64)
            .map(|t| t as f32);
        request.max_tokens = ctx
            .config
            .get("max_tokens")
            .and_then(Value::as_u64)
            .map(|t| t as u32);

        let output_key = ctx.config_str("output_key").unwrap_or("completion").to_string();

        let complete = self.manager.complete(request);
        let result = tokio::select! {
            _ = ctx.cancel.cancelled() => return ActionOutcome::Cancelled,
            result = complete => result,
        };

        match result {
            Ok(response) => ActionOutcome::Ok(json!({
                output_key: {
                    "content": response.content,
                    "model": response.model,
                    "finish_reason": response.finish_reason,
                    "usage": response.usage,
                }
            })),
            // Fallback already ran inside the manager; what's left is terminal
            Err(Error::Provider(ProviderError::Unavailable { .. })) => {
                ActionOutcome::Fail("no LLM provider available".to_string())
            }
            Err(err) => ActionOutcome::Fail(sanitize(&err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn context_with(config: Value, context: Value) -> ActionContext {
        ActionContext::new(config, context, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_echo_copies_payload_field() {
        let ctx = context_with(
            json!({}),
            json!({ "trigger": { "payload": { "text": "hi" } } }),
        );
        let outcome = EchoAction.execute(ctx).await;
        match outcome {
            ActionOutcome::Ok(value) => assert_eq!(value, json!({ "text": "hi" })),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_append_builds_on_context() {
        let ctx = context_with(json!({}), json!({ "text": "hi" }));
        let outcome = AppendAction.execute(ctx).await;
        match outcome {
            ActionOutcome::Ok(value) => {
                assert_eq!(value, json!({ "text": "hi-appended" }))
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_append_fails_without_input() {
        let ctx = context_with(json!({}), json!({}));
        assert!(matches!(
            AppendAction.execute(ctx).await,
            ActionOutcome::Fail(_)
        ));
    }

    #[tokio::test]
    async fn test_delay_observes_cancellation() {
        let cancel = CancellationToken::new();
        let ctx = ActionContext::new(json!({ "seconds": 30 }), json!({}), cancel.clone());

        let handle = tokio::spawn(async move { DelayAction.execute(ctx).await });
        cancel.cancel();
        let outcome = handle.await.unwrap();
        assert!(matches!(outcome, ActionOutcome::Cancelled));
    }

    #[tokio::test]
    async fn test_http_request_requires_url() {
        let ctx = context_with(json!({}), json!({}));
        assert!(matches!(
            HttpRequestAction::new().execute(ctx).await,
            ActionOutcome::Fail(_)
        ));
    }
}
