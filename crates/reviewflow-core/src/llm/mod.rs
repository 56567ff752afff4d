//! LLM provider layer
//!
//! Everything an action handler needs to talk to an LLM:
//! - provider-agnostic request/response types
//! - the `LlmProvider` trait and the OpenAI-compatible HTTP template,
//!   specialized per vendor through a `ChatDialect`
//! - a name-keyed `ProviderRegistry` populated explicitly at startup
//! - the `LlmManager` that selects a provider and walks the fallback
//!   order when one is unavailable

mod dialects;
mod manager;
mod provider;
mod registry;
mod types;

pub use dialects::{AnthropicDialect, OpenAiDialect};
pub use manager::{LlmManager, ProviderInfo};
pub use provider::{ChatDialect, HttpChatProvider, LlmProvider, PreparedChat, ProviderSettings};
pub use registry::{ProviderFactory, ProviderRegistry};
pub use types::{ChatMessage, CompletionRequest, CompletionResponse, MessageRole, Usage};
