// Core domain leaves shared by every reviewflow crate:
// error taxonomy, sanitizer, environment configuration, event envelope,
// trigger predicates, and the LLM provider layer.

pub mod conditions;
pub mod config;
pub mod error;
pub mod event;
pub mod llm;
pub mod sanitize;

pub use conditions::Condition;
pub use config::{DbConfig, EnvConfig, Environment, LlmConfig, QueueConfig};
pub use error::{Error, ProviderError, Result};
pub use event::EventEnvelope;
pub use sanitize::{mask_url, sanitize};
