// Vendor dialects for the OpenAI-compatible template

use serde_json::{json, Value};

use crate::error::ProviderError;

use super::provider::{split_system, ChatDialect, PreparedChat};
use super::types::{CompletionRequest, CompletionResponse, Usage};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_DEFAULT_MAX_TOKENS: u32 = 1024;

/// The OpenAI chat-completions wire format. Also used, with a base URL
/// override, by Azure OpenAI, Groq, and Mistral.
pub struct OpenAiDialect {
    provider: String,
}

impl OpenAiDialect {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
        }
    }
}

impl ChatDialect for OpenAiDialect {
    fn endpoint(&self, base_url: Option<&str>) -> String {
        base_url.unwrap_or(OPENAI_API_URL).to_string()
    }

    fn headers(&self, api_key: &str) -> Vec<(&'static str, String)> {
        vec![("authorization", format!("Bearer {api_key}"))]
    }

    fn build_request(
        &self,
        chat: &PreparedChat,
        request: &CompletionRequest,
        model: &str,
    ) -> Value {
        let messages: Vec<Value> = chat
            .messages
            .iter()
            .map(|m| json!({ "role": m.role.to_string(), "content": m.content }))
            .collect();

        let mut body = json!({
            "model": model,
            "messages": messages,
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }

    fn parse_response(&self, body: Value, model: &str) -> Result<CompletionResponse, ProviderError> {
        let choice = body
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| ProviderError::rejected(&self.provider, "response has no choices"))?;

        let content = choice
            .pointer("/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let finish_reason = choice
            .get("finish_reason")
            .and_then(Value::as_str)
            .unwrap_or("stop")
            .to_string();

        let usage = body.get("usage").map(|u| Usage {
            prompt_tokens: u.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
            completion_tokens: u
                .get("completion_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32,
            total_tokens: u.get("total_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
        });

        Ok(CompletionResponse {
            content,
            model: body
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or(model)
                .to_string(),
            finish_reason,
            usage,
            error: None,
        })
    }
}

/// The Anthropic messages wire format.
///
/// The leading system prompt moves out of the message list, and usage
/// counters are normalized to the OpenAI field names.
pub struct AnthropicDialect;

impl ChatDialect for AnthropicDialect {
    fn endpoint(&self, base_url: Option<&str>) -> String {
        base_url.unwrap_or(ANTHROPIC_API_URL).to_string()
    }

    fn headers(&self, api_key: &str) -> Vec<(&'static str, String)> {
        vec![
            ("x-api-key", api_key.to_string()),
            ("anthropic-version", ANTHROPIC_VERSION.to_string()),
        ]
    }

    fn prepare_messages(&self, messages: &[super::types::ChatMessage]) -> PreparedChat {
        let (system, rest) = split_system(messages);
        PreparedChat {
            system,
            messages: rest,
        }
    }

    fn build_request(
        &self,
        chat: &PreparedChat,
        request: &CompletionRequest,
        model: &str,
    ) -> Value {
        let messages: Vec<Value> = chat
            .messages
            .iter()
            .map(|m| json!({ "role": m.role.to_string(), "content": m.content }))
            .collect();

        let mut body = json!({
            "model": model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(ANTHROPIC_DEFAULT_MAX_TOKENS),
        });
        if let Some(system) = &chat.system {
            body["system"] = json!(system);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        body
    }

    fn parse_response(&self, body: Value, model: &str) -> Result<CompletionResponse, ProviderError> {
        let content = body
            .get("content")
            .and_then(Value::as_array)
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("")
            })
            .ok_or_else(|| ProviderError::rejected("anthropic", "response has no content"))?;

        let finish_reason = body
            .get("stop_reason")
            .and_then(Value::as_str)
            .unwrap_or("end_turn")
            .to_string();

        let usage = body.get("usage").map(|u| {
            let prompt = u.get("input_tokens").and_then(Value::as_u64).unwrap_or(0) as u32;
            let completion = u.get("output_tokens").and_then(Value::as_u64).unwrap_or(0) as u32;
            Usage {
                prompt_tokens: prompt,
                completion_tokens: completion,
                total_tokens: prompt + completion,
            }
        });

        Ok(CompletionResponse {
            content,
            model: body
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or(model)
                .to_string(),
            finish_reason,
            usage,
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::ChatMessage;

    #[test]
    fn test_openai_request_shape() {
        let dialect = OpenAiDialect::new("openai");
        let chat = dialect.prepare_messages(&[
            ChatMessage::system("be terse"),
            ChatMessage::user("ping"),
        ]);
        let request = CompletionRequest {
            temperature: Some(0.2),
            max_tokens: Some(64),
            ..CompletionRequest::default()
        };
        let body = dialect.build_request(&chat, &request, "gpt-4o");

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["temperature"], 0.2);
        assert_eq!(body["max_tokens"], 64);
    }

    #[test]
    fn test_openai_response_parsing() {
        let dialect = OpenAiDialect::new("openai");
        let body = serde_json::json!({
            "model": "gpt-4o-2024-08-06",
            "choices": [{
                "message": { "role": "assistant", "content": "pong" },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4 }
        });
        let response = dialect.parse_response(body, "gpt-4o").unwrap();
        assert_eq!(response.content, "pong");
        assert_eq!(response.model, "gpt-4o-2024-08-06");
        assert_eq!(response.usage.unwrap().total_tokens, 4);
    }

    #[test]
    fn test_anthropic_hoists_system_prompt() {
        let dialect = AnthropicDialect;
        let chat = dialect.prepare_messages(&[
            ChatMessage::system("be terse"),
            ChatMessage::user("ping"),
        ]);
        assert_eq!(chat.system.as_deref(), Some("be terse"));
        assert_eq!(chat.messages.len(), 1);

        let body = dialect.build_request(
            &chat,
            &CompletionRequest::default(),
            "claude-3-5-sonnet-latest",
        );
        assert_eq!(body["system"], "be terse");
        assert_eq!(body["max_tokens"], ANTHROPIC_DEFAULT_MAX_TOKENS);
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_anthropic_usage_normalization() {
        let dialect = AnthropicDialect;
        let body = serde_json::json!({
            "model": "claude-3-5-sonnet-latest",
            "content": [{ "type": "text", "text": "pong" }],
            "stop_reason": "end_turn",
            "usage": { "input_tokens": 10, "output_tokens": 5 }
        });
        let response = dialect.parse_response(body, "claude-3-5-sonnet-latest").unwrap();
        assert_eq!(response.content, "pong");
        let usage = response.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.completion_tokens, 5);
        assert_eq!(usage.total_tokens, 15);
    }
}
