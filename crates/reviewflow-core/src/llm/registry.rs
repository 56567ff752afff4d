// Provider registry
//
// A name-keyed factory map populated explicitly at process startup.
// Tests register doubles deterministically; production registers the
// built-in vendor set through `with_defaults()`. There is no global
// instance and no import-time side effect.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{json, Value};

use crate::error::ProviderError;

use super::dialects::{AnthropicDialect, OpenAiDialect};
use super::provider::{HttpChatProvider, LlmProvider, ProviderSettings};

/// Factory producing a configured provider instance from merged settings
pub type ProviderFactory =
    Arc<dyn Fn(ProviderSettings) -> Result<Arc<dyn LlmProvider>, ProviderError> + Send + Sync>;

struct RegistryEntry {
    factory: ProviderFactory,
    defaults: Value,
}

/// Name-keyed provider registry.
///
/// Keys are stored lowercase; lookups are case-insensitive. Registration
/// is idempotent with last-registration-wins.
pub struct ProviderRegistry {
    entries: RwLock<HashMap<String, RegistryEntry>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Registry pre-populated with the built-in vendor set.
    ///
    /// Each entry carries the env var holding its key and a default model;
    /// OpenAI-compatible vendors differ only in base URL.
    pub fn with_defaults() -> Self {
        let registry = Self::new();

        registry.register_openai_compatible(
            "openai",
            json!({ "api_key_env": "OPENAI_API_KEY", "default_model": "gpt-4o" }),
        );
        registry.register_openai_compatible(
            "azure_openai",
            json!({ "api_key_env": "AZURE_OPENAI_API_KEY", "default_model": "gpt-4o" }),
        );
        registry.register_openai_compatible(
            "groq",
            json!({
                "api_key_env": "GROQ_API_KEY",
                "default_model": "llama-3.1-70b-versatile",
                "base_url": "https://api.groq.com/openai/v1/chat/completions"
            }),
        );
        registry.register_openai_compatible(
            "mistral",
            json!({
                "api_key_env": "MISTRAL_API_KEY",
                "default_model": "mistral-large-latest",
                "base_url": "https://api.mistral.ai/v1/chat/completions"
            }),
        );

        registry.register(
            "anthropic",
            Arc::new(|settings: ProviderSettings| {
                Ok(Arc::new(HttpChatProvider::new(
                    "anthropic",
                    &settings,
                    Arc::new(AnthropicDialect),
                )) as Arc<dyn LlmProvider>)
            }),
            Some(json!({
                "api_key_env": "ANTHROPIC_API_KEY",
                "default_model": "claude-3-5-sonnet-latest"
            })),
        );

        registry
    }

    fn register_openai_compatible(&self, name: &'static str, defaults: Value) {
        self.register(
            name,
            Arc::new(move |settings: ProviderSettings| {
                Ok(Arc::new(HttpChatProvider::new(
                    name,
                    &settings,
                    Arc::new(OpenAiDialect::new(name)),
                )) as Arc<dyn LlmProvider>)
            }),
            Some(defaults),
        );
    }

    /// Register a provider factory. Last registration wins.
    pub fn register(&self, name: &str, factory: ProviderFactory, default_config: Option<Value>) {
        let key = name.to_lowercase();
        tracing::debug!(provider = %key, "registered LLM provider");
        self.entries.write().insert(
            key,
            RegistryEntry {
                factory,
                defaults: default_config.unwrap_or_else(|| json!({})),
            },
        );
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.entries.write().remove(&name.to_lowercase()).is_some()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.entries.read().contains_key(&name.to_lowercase())
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Default configuration registered for a provider
    pub fn default_config(&self, name: &str) -> Option<Value> {
        self.entries
            .read()
            .get(&name.to_lowercase())
            .map(|entry| entry.defaults.clone())
    }

    /// Create a configured instance, merging `default_config ⊕ config`
    /// (right wins). A failed factory yields an error, never a half-built
    /// instance.
    pub fn create(
        &self,
        name: &str,
        config: Option<&Value>,
    ) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        let key = name.to_lowercase();
        let entries = self.entries.read();
        let entry = entries
            .get(&key)
            .ok_or_else(|| ProviderError::unavailable(&key, "provider not registered"))?;

        let merged = merge_configs(&entry.defaults, config);
        let settings = ProviderSettings::from_value(&merged);
        (entry.factory)(settings)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Shallow merge of two JSON objects; keys in `overlay` win
fn merge_configs(defaults: &Value, overlay: Option<&Value>) -> Value {
    let mut merged = defaults
        .as_object()
        .cloned()
        .unwrap_or_default();
    if let Some(Value::Object(map)) = overlay {
        for (key, value) in map {
            merged.insert(key.clone(), value.clone());
        }
    }
    Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = ProviderRegistry::with_defaults();
        assert!(registry.is_registered("OpenAI"));
        assert!(registry.is_registered("anthropic"));
        assert!(!registry.is_registered("llamafarm"));
    }

    #[test]
    fn test_unregister() {
        let registry = ProviderRegistry::with_defaults();
        assert!(registry.unregister("groq"));
        assert!(!registry.unregister("groq"));
        assert!(!registry.is_registered("groq"));
    }

    #[test]
    fn test_create_unregistered_provider() {
        let registry = ProviderRegistry::new();
        let result = registry.create("nope", None);
        assert!(matches!(
            result,
            Err(ProviderError::Unavailable { .. })
        ));
    }

    #[test]
    fn test_config_merge_right_wins() {
        let registry = ProviderRegistry::with_defaults();
        let provider = registry
            .create(
                "openai",
                Some(&json!({ "api_key": "test-key", "default_model": "gpt-4o-mini" })),
            )
            .unwrap();
        assert_eq!(provider.default_model(), Some("gpt-4o-mini"));
        assert!(provider.is_available());
    }

    #[test]
    fn test_last_registration_wins() {
        let registry = ProviderRegistry::with_defaults();
        registry.register(
            "OPENAI",
            Arc::new(|settings: ProviderSettings| {
                Ok(Arc::new(HttpChatProvider::new(
                    "openai",
                    &settings,
                    Arc::new(OpenAiDialect::new("openai")),
                )) as Arc<dyn LlmProvider>)
            }),
            Some(json!({ "default_model": "gpt-replacement" })),
        );

        assert_eq!(registry.list().iter().filter(|n| *n == "openai").count(), 1);
        let defaults = registry.default_config("openai").unwrap();
        assert_eq!(defaults["default_model"], "gpt-replacement");
    }
}
