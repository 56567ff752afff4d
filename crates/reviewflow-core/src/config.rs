// Environment-driven configuration
//
// Every knob the binaries read from the environment lives here so the
// recognized variable set stays in one place. Binaries call
// `EnvConfig::from_env()` once at startup and pass the pieces down.

use std::str::FromStr;
use std::time::Duration;

use uuid::Uuid;

use crate::error::{Error, Result};

/// Deployment environment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
    Testing,
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "development" | "dev" | "" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            "testing" | "test" => Ok(Environment::Testing),
            other => Err(Error::config(format!("unknown environment: {other}"))),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Staging => write!(f, "staging"),
            Environment::Production => write!(f, "production"),
            Environment::Testing => write!(f, "testing"),
        }
    }
}

/// Database pool configuration
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    /// Base pool size
    pub pool_size: u32,
    /// Additional connections allowed under load
    pub max_overflow: u32,
    /// Wait time for a connection before failing
    pub pool_timeout: Duration,
    /// Maximum connection lifetime before recycling
    pub pool_recycle: Duration,
    /// Log every statement (development only)
    pub echo: bool,
    pub ssl_required: bool,
}

impl DbConfig {
    /// Total connections the pool may open (base + overflow)
    pub fn max_connections(&self) -> u32 {
        self.pool_size + self.max_overflow
    }
}

/// Queue broker configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub url: String,
    /// Namespace prefix for every broker key
    pub prefix: String,
    /// Stable worker identifier; ephemeral when not configured
    pub worker_id: String,
}

/// LLM manager configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub default_provider: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub base_url: Option<String>,
    /// Provider names tried, in order, when the requested one is unavailable
    pub fallback_order: Vec<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_provider: None,
            model: None,
            temperature: None,
            max_tokens: None,
            base_url: None,
            fallback_order: vec![
                "azure_openai".to_string(),
                "openai".to_string(),
                "anthropic".to_string(),
                "mistral".to_string(),
            ],
        }
    }
}

/// Full process configuration assembled from the environment
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub environment: Environment,
    /// Absent when DATABASE_URL is unset; callers fall back to the in-memory store
    pub database: Option<DbConfig>,
    /// When set, binaries do not open the store at startup
    pub skip_db_init: bool,
    pub queue: QueueConfig,
    pub webhook_secret: Option<String>,
    pub llm: LlmConfig,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env_var(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| Error::config(format!("invalid value for {name}: {raw}"))),
        None => Ok(default),
    }
}

fn env_truthy(name: &str) -> bool {
    matches!(
        env_var(name).as_deref().map(str::to_lowercase).as_deref(),
        Some("1") | Some("true") | Some("yes") | Some("on")
    )
}

impl EnvConfig {
    /// Read configuration from environment variables.
    ///
    /// Only malformed values are errors; absent values take defaults.
    pub fn from_env() -> Result<Self> {
        let environment: Environment = env_parse("ENVIRONMENT", Environment::Development)?;

        let database = env_var("DATABASE_URL").map(|url| -> Result<DbConfig> {
            Ok(DbConfig {
                url,
                pool_size: env_parse("DB_POOL_SIZE", 10u32)?,
                max_overflow: env_parse("DB_MAX_OVERFLOW", 20u32)?,
                pool_timeout: Duration::from_secs(env_parse("DB_POOL_TIMEOUT", 30u64)?),
                pool_recycle: Duration::from_secs(env_parse("DB_POOL_RECYCLE", 3600u64)?),
                echo: env_truthy("DB_ECHO"),
                ssl_required: env_truthy("DB_SSL_REQUIRED"),
            })
        });
        let database = database.transpose()?;

        let queue = QueueConfig {
            url: env_var("QUEUE_URL").unwrap_or_else(|| "redis://localhost:6379/0".to_string()),
            prefix: env_var("QUEUE_PREFIX").unwrap_or_else(|| "workflow_engine".to_string()),
            worker_id: env_var("WORKER_ID")
                .unwrap_or_else(|| format!("worker-{}", Uuid::now_v7())),
        };

        let mut llm = LlmConfig {
            default_provider: env_var("LLM_PROVIDER"),
            model: env_var("LLM_MODEL"),
            temperature: match env_var("LLM_TEMPERATURE") {
                Some(raw) => Some(
                    raw.parse()
                        .map_err(|_| Error::config(format!("invalid LLM_TEMPERATURE: {raw}")))?,
                ),
                None => None,
            },
            max_tokens: match env_var("LLM_MAX_TOKENS") {
                Some(raw) => Some(
                    raw.parse()
                        .map_err(|_| Error::config(format!("invalid LLM_MAX_TOKENS: {raw}")))?,
                ),
                None => None,
            },
            base_url: env_var("LLM_BASE_URL"),
            ..LlmConfig::default()
        };
        if let Some(order) = env_var("LLM_FALLBACK_ORDER") {
            llm.fallback_order = order
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
        }

        Ok(Self {
            environment,
            database,
            skip_db_init: env_truthy("SKIP_DB_INIT"),
            queue,
            webhook_secret: env_var("WEBHOOK_SECRET"),
            llm,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parsing() {
        assert_eq!(
            "production".parse::<Environment>().unwrap(),
            Environment::Production
        );
        assert_eq!(
            "TESTING".parse::<Environment>().unwrap(),
            Environment::Testing
        );
        assert!("moon".parse::<Environment>().is_err());
    }

    #[test]
    fn test_db_config_max_connections() {
        let config = DbConfig {
            url: "postgres://localhost/app".to_string(),
            pool_size: 10,
            max_overflow: 20,
            pool_timeout: Duration::from_secs(30),
            pool_recycle: Duration::from_secs(3600),
            echo: false,
            ssl_required: false,
        };
        assert_eq!(config.max_connections(), 30);
    }

    #[test]
    fn test_default_fallback_order() {
        let llm = LlmConfig::default();
        assert_eq!(
            llm.fallback_order,
            vec!["azure_openai", "openai", "anthropic", "mistral"]
        );
    }
}
