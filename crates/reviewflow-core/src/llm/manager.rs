// LLM manager with ordered fallback
//
// Selection: requested provider (or the configured default), then the
// fallback order, skipping anything already tried. No provider is ever
// attempted twice per request.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::LlmConfig;
use crate::error::{Error, ProviderError, Result};

use super::registry::ProviderRegistry;
use super::provider::LlmProvider;
use super::types::{CompletionRequest, CompletionResponse};

/// Snapshot of the manager's provider view, for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    pub available_providers: Vec<String>,
    pub default_provider: Option<String>,
    pub fallback_order: Vec<String>,
}

/// Routes completion requests to a provider, falling back in order when
/// the chosen one is unregistered or unavailable.
pub struct LlmManager {
    registry: Arc<ProviderRegistry>,
    /// Lazily created provider instances, one per name
    instances: RwLock<HashMap<String, Arc<dyn LlmProvider>>>,
    default_provider: Option<String>,
    fallback_order: Vec<String>,
    default_model: Option<String>,
    default_temperature: Option<f32>,
    default_max_tokens: Option<u32>,
}

impl LlmManager {
    pub fn new(registry: Arc<ProviderRegistry>, config: &LlmConfig) -> Self {
        Self {
            registry,
            instances: RwLock::new(HashMap::new()),
            default_provider: config.default_provider.as_ref().map(|p| p.to_lowercase()),
            fallback_order: config
                .fallback_order
                .iter()
                .map(|p| p.to_lowercase())
                .collect(),
            default_model: config.model.clone(),
            default_temperature: config.temperature,
            default_max_tokens: config.max_tokens,
        }
    }

    /// Obtain a provider instance, creating and caching it on first use.
    /// Returns None when the provider is unregistered, fails to build, or
    /// reports itself unavailable.
    fn provider(&self, name: &str) -> Option<Arc<dyn LlmProvider>> {
        let key = name.to_lowercase();
        if let Some(existing) = self.instances.read().get(&key) {
            return existing.is_available().then(|| existing.clone());
        }

        match self.registry.create(&key, None) {
            Ok(instance) => {
                self.instances.write().insert(key, instance.clone());
                instance.is_available().then_some(instance)
            }
            Err(err) => {
                warn!(provider = %key, error = %err, "provider unavailable");
                None
            }
        }
    }

    /// Candidate providers in attempt order, deduplicated
    fn candidates(&self, requested: &str) -> Vec<String> {
        let mut order = vec![requested.to_lowercase()];
        for name in &self.fallback_order {
            if !order.contains(name) {
                order.push(name.clone());
            }
        }
        order
    }

    /// Complete a chat request.
    ///
    /// Validation failures return `InvalidRequest`; exhausting every
    /// candidate returns a single `ProviderError::Unavailable`; a
    /// provider's refusal of a well-formed request is terminal and
    /// surfaces as `ProviderError::Rejected`.
    pub async fn complete(&self, mut request: CompletionRequest) -> Result<CompletionResponse> {
        request
            .messages
            .retain(|m| !m.content.trim().is_empty());
        if request.messages.is_empty() {
            return Err(Error::invalid_request(
                "missing required field 'messages' or all messages empty",
            ));
        }

        let requested = request
            .provider
            .clone()
            .or_else(|| self.default_provider.clone())
            .ok_or_else(|| {
                Error::invalid_request("no provider specified and no default provider configured")
            })?;

        if request.model.is_none() {
            request.model = self.default_model.clone();
        }
        if request.temperature.is_none() {
            request.temperature = self.default_temperature;
        }
        if request.max_tokens.is_none() {
            request.max_tokens = self.default_max_tokens;
        }

        let mut last_unavailable: Option<ProviderError> = None;

        for (attempt, name) in self.candidates(&requested).into_iter().enumerate() {
            let Some(provider) = self.provider(&name) else {
                last_unavailable = Some(ProviderError::unavailable(
                    &name,
                    "not registered or not available",
                ));
                continue;
            };

            if attempt > 0 {
                info!(
                    fallback = %name,
                    requested = %requested,
                    "using fallback provider"
                );
            }

            match provider.complete(&request).await {
                Ok(response) => return Ok(response),
                Err(err @ ProviderError::Rejected { .. }) => {
                    return Err(Error::Provider(err));
                }
                Err(err @ ProviderError::Unavailable { .. }) => {
                    warn!(provider = %name, error = %err, "provider call failed, trying fallback");
                    last_unavailable = Some(err);
                }
            }
        }

        Err(Error::Provider(last_unavailable.unwrap_or_else(|| {
            ProviderError::unavailable(&requested, "no provider available")
        })))
    }

    /// Provider names that are currently able to serve requests
    pub fn available_providers(&self) -> Vec<String> {
        self.registry
            .list()
            .into_iter()
            .filter(|name| self.provider(name).is_some())
            .collect()
    }

    pub fn provider_info(&self) -> ProviderInfo {
        ProviderInfo {
            available_providers: self.available_providers(),
            default_provider: self.default_provider.clone(),
            fallback_order: self.fallback_order.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::ChatMessage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted provider: counts calls, optionally available, optionally failing
    struct ScriptedProvider {
        name: String,
        available: bool,
        outcome: Outcome,
        calls: Arc<AtomicUsize>,
    }

    #[derive(Clone)]
    enum Outcome {
        Succeed { model: String },
        Unavailable,
        Reject,
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn default_model(&self) -> Option<&str> {
            None
        }

        fn is_available(&self) -> bool {
            self.available
        }

        async fn complete(
            &self,
            _request: &CompletionRequest,
        ) -> std::result::Result<CompletionResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.outcome {
                Outcome::Succeed { model } => Ok(CompletionResponse {
                    content: "pong".to_string(),
                    model: model.clone(),
                    finish_reason: "stop".to_string(),
                    usage: None,
                    error: None,
                }),
                Outcome::Unavailable => Err(ProviderError::unavailable(&self.name, "down")),
                Outcome::Reject => Err(ProviderError::rejected(&self.name, "bad request")),
            }
        }
    }

    fn register_scripted(
        registry: &ProviderRegistry,
        name: &'static str,
        available: bool,
        outcome: Outcome,
    ) -> Arc<AtomicUsize> {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_handle = calls.clone();
        registry.register(
            name,
            Arc::new(move |_settings| {
                Ok(Arc::new(ScriptedProvider {
                    name: name.to_string(),
                    available,
                    outcome: outcome.clone(),
                    calls: calls_handle.clone(),
                }) as Arc<dyn LlmProvider>)
            }),
            None,
        );
        calls
    }

    fn manager_with(registry: ProviderRegistry, default: &str, fallbacks: &[&str]) -> LlmManager {
        let config = LlmConfig {
            default_provider: Some(default.to_string()),
            fallback_order: fallbacks.iter().map(|s| s.to_string()).collect(),
            ..LlmConfig::default()
        };
        LlmManager::new(Arc::new(registry), &config)
    }

    fn ping() -> CompletionRequest {
        CompletionRequest::new(vec![ChatMessage::user("ping")])
    }

    #[tokio::test]
    async fn test_uses_default_provider() {
        let registry = ProviderRegistry::new();
        let calls = register_scripted(
            &registry,
            "primary",
            true,
            Outcome::Succeed {
                model: "primary-1".to_string(),
            },
        );
        let manager = manager_with(registry, "primary", &[]);

        let response = manager.complete(ping()).await.unwrap();
        assert_eq!(response.model, "primary-1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_falls_back_when_primary_unavailable() {
        let registry = ProviderRegistry::new();
        let primary_calls =
            register_scripted(&registry, "primary", true, Outcome::Unavailable);
        let fallback_calls = register_scripted(
            &registry,
            "backup",
            true,
            Outcome::Succeed {
                model: "claude-3-5-sonnet-latest".to_string(),
            },
        );
        let manager = manager_with(registry, "primary", &["backup"]);

        let response = manager.complete(ping()).await.unwrap();
        assert!(response.model.starts_with("claude-"));
        assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_attempts_each_provider_once() {
        let registry = ProviderRegistry::new();
        let a = register_scripted(&registry, "a", true, Outcome::Unavailable);
        let b = register_scripted(&registry, "b", true, Outcome::Unavailable);
        // Fallback order repeats providers; the walk must dedup
        let manager = manager_with(registry, "a", &["b", "a", "b"]);

        let err = manager.complete(ping()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Provider(ProviderError::Unavailable { .. })
        ));
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejection_does_not_fall_back() {
        let registry = ProviderRegistry::new();
        register_scripted(&registry, "primary", true, Outcome::Reject);
        let fallback_calls = register_scripted(
            &registry,
            "backup",
            true,
            Outcome::Succeed {
                model: "backup-1".to_string(),
            },
        );
        let manager = manager_with(registry, "primary", &["backup"]);

        let err = manager.complete(ping()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Provider(ProviderError::Rejected { .. })
        ));
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rejects_empty_messages() {
        let registry = ProviderRegistry::new();
        register_scripted(
            &registry,
            "primary",
            true,
            Outcome::Succeed {
                model: "m".to_string(),
            },
        );
        let manager = manager_with(registry, "primary", &[]);

        let err = manager
            .complete(CompletionRequest::new(vec![ChatMessage::user("   ")]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_unavailable_provider_skipped_without_call() {
        let registry = ProviderRegistry::new();
        let primary_calls = register_scripted(&registry, "primary", false, Outcome::Unavailable);
        let fallback_calls = register_scripted(
            &registry,
            "backup",
            true,
            Outcome::Succeed {
                model: "backup-1".to_string(),
            },
        );
        let manager = manager_with(registry, "primary", &["backup"]);

        let response = manager.complete(ping()).await.unwrap();
        assert_eq!(response.model, "backup-1");
        assert_eq!(primary_calls.load(Ordering::SeqCst), 0);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
    }
}
