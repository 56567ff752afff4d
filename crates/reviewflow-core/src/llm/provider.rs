// LlmProvider trait and the OpenAI-compatible HTTP template
//
// New vendors are data plus a ChatDialect: the HTTP plumbing, error
// classification, and availability probing live once in HttpChatProvider.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::error::ProviderError;

use super::types::{ChatMessage, CompletionRequest, CompletionResponse, MessageRole};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// A configured LLM provider instance.
///
/// Implementations must be cheap to share (`Arc`) and safe to call from
/// many worker tasks at once.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    fn default_model(&self) -> Option<&str>;

    /// Whether the provider can currently serve requests (key present,
    /// client constructed). A false here sends the manager to fallback.
    fn is_available(&self) -> bool;

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError>;
}

/// Settings a factory receives after default-config merging.
#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    /// Environment variable to read the key from when `api_key` is absent
    pub api_key_env: Option<String>,
    pub default_model: Option<String>,
    pub base_url: Option<String>,
}

impl ProviderSettings {
    /// Extract settings from a merged JSON config document
    pub fn from_value(value: &Value) -> Self {
        let field = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        Self {
            api_key: field("api_key"),
            api_key_env: field("api_key_env"),
            default_model: field("default_model"),
            base_url: field("base_url"),
        }
    }

    /// Resolve the API key: explicit value wins, then the env indirection
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| {
            self.api_key_env
                .as_ref()
                .and_then(|name| std::env::var(name).ok())
                .filter(|key| !key.is_empty())
        })
    }
}

/// Messages after dialect preparation.
///
/// Some vendors (Anthropic) take the system prompt out of band; the
/// dialect hoists it here.
#[derive(Debug, Clone, Default)]
pub struct PreparedChat {
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
}

impl PreparedChat {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// The three vendor-specific interface points of the template.
pub trait ChatDialect: Send + Sync {
    /// Completion endpoint, honoring a base URL override
    fn endpoint(&self, base_url: Option<&str>) -> String;

    /// Authentication and protocol headers
    fn headers(&self, api_key: &str) -> Vec<(&'static str, String)>;

    /// Drop empty-content messages and apply vendor message shaping
    fn prepare_messages(&self, messages: &[ChatMessage]) -> PreparedChat {
        PreparedChat {
            system: None,
            messages: messages
                .iter()
                .filter(|m| !m.content.trim().is_empty())
                .cloned()
                .collect(),
        }
    }

    /// Build the request body
    fn build_request(&self, chat: &PreparedChat, request: &CompletionRequest, model: &str)
        -> Value;

    /// Extract a normalized response from the vendor body
    fn parse_response(&self, body: Value, model: &str) -> Result<CompletionResponse, ProviderError>;
}

/// OpenAI-compatible HTTP provider.
///
/// One concrete skeleton for every vendor: holds the reqwest client, the
/// resolved key, and a dialect for the vendor-specific pieces.
pub struct HttpChatProvider {
    name: String,
    client: Client,
    api_key: Option<String>,
    base_url: Option<String>,
    default_model: Option<String>,
    dialect: Arc<dyn ChatDialect>,
}

impl HttpChatProvider {
    pub fn new(
        name: impl Into<String>,
        settings: &ProviderSettings,
        dialect: Arc<dyn ChatDialect>,
    ) -> Self {
        let client = Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            name: name.into(),
            client,
            api_key: settings.resolve_api_key(),
            base_url: settings.base_url.clone(),
            default_model: settings.default_model.clone(),
            dialect,
        }
    }

    /// Map an HTTP status to the provider error taxonomy.
    ///
    /// Auth failures, rate limits, and server errors are all "unavailable"
    /// so the manager falls back; only well-formed refusals are terminal.
    fn classify_status(
        &self,
        status: reqwest::StatusCode,
        body: &Value,
    ) -> ProviderError {
        let detail = body
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("request failed");
        let message = format!("HTTP {}: {}", status.as_u16(), detail);

        if status == reqwest::StatusCode::BAD_REQUEST
            || status == reqwest::StatusCode::NOT_FOUND
            || status == reqwest::StatusCode::UNPROCESSABLE_ENTITY
        {
            ProviderError::rejected(&self.name, message)
        } else {
            ProviderError::unavailable(&self.name, message)
        }
    }
}

#[async_trait]
impl LlmProvider for HttpChatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> Option<&str> {
        self.default_model.as_deref()
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| ProviderError::unavailable(&self.name, "no API key configured"))?;

        let model = request
            .model
            .clone()
            .or_else(|| self.default_model.clone())
            .ok_or_else(|| {
                ProviderError::rejected(&self.name, "no model requested and no default model")
            })?;

        let chat = self.dialect.prepare_messages(&request.messages);
        if chat.is_empty() {
            return Err(ProviderError::rejected(
                &self.name,
                "no non-empty messages in request",
            ));
        }

        let body = self.dialect.build_request(&chat, request, &model);
        let url = self.dialect.endpoint(self.base_url.as_deref());

        let mut http = self.client.post(&url).json(&body);
        for (header, value) in self.dialect.headers(api_key) {
            http = http.header(header, value);
        }

        let response = http
            .send()
            .await
            .map_err(|e| ProviderError::unavailable(&self.name, e.to_string()))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::unavailable(&self.name, format!("bad body: {e}")))?;

        if !status.is_success() {
            return Err(self.classify_status(status, &body));
        }

        self.dialect.parse_response(body, &model)
    }
}

/// Drop messages with empty content, preserving order. Shared by dialect
/// implementations that need role filtering on top.
pub(super) fn non_empty_messages(messages: &[ChatMessage]) -> impl Iterator<Item = &ChatMessage> {
    messages.iter().filter(|m| !m.content.trim().is_empty())
}

/// Split a leading run of system messages from the rest.
pub(super) fn split_system(messages: &[ChatMessage]) -> (Option<String>, Vec<ChatMessage>) {
    let mut system_parts = Vec::new();
    let mut rest = Vec::new();

    for message in non_empty_messages(messages) {
        if message.role == MessageRole::System && rest.is_empty() {
            system_parts.push(message.content.clone());
        } else {
            rest.push(message.clone());
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    (system, rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_value() {
        let value = serde_json::json!({
            "api_key_env": "OPENAI_API_KEY",
            "default_model": "gpt-4o",
            "base_url": "https://proxy.internal/v1/chat/completions"
        });
        let settings = ProviderSettings::from_value(&value);
        assert_eq!(settings.api_key_env.as_deref(), Some("OPENAI_API_KEY"));
        assert_eq!(settings.default_model.as_deref(), Some("gpt-4o"));
        assert!(settings.api_key.is_none());
    }

    #[test]
    fn test_resolve_api_key_prefers_explicit_value() {
        let settings = ProviderSettings {
            api_key: Some("direct-key".to_string()),
            api_key_env: Some("SOME_UNSET_VAR_FOR_TEST".to_string()),
            ..Default::default()
        };
        assert_eq!(settings.resolve_api_key().as_deref(), Some("direct-key"));
    }

    #[test]
    fn test_split_system() {
        let messages = vec![
            ChatMessage::system("be terse"),
            ChatMessage::system("be kind"),
            ChatMessage::user("hello"),
            ChatMessage::system("late system message stays inline"),
        ];
        let (system, rest) = split_system(&messages);
        assert_eq!(system.as_deref(), Some("be terse\n\nbe kind"));
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].role, MessageRole::User);
    }

    #[test]
    fn test_split_system_filters_empty_content() {
        let messages = vec![ChatMessage::user("  "), ChatMessage::user("ping")];
        let (system, rest) = split_system(&messages);
        assert!(system.is_none());
        assert_eq!(rest.len(), 1);
    }
}
