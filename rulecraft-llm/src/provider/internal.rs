//! In-house chat API provider
//!
//! Talks to the company LLM endpoint (`POST {api_url}/chat`). The endpoint
//! takes an OpenAI-style `messages` list plus sampling options and answers in
//! one of several shapes depending on which backend sits behind it:
//!
//! - `{"choices": [{"message": {"content": ...}}]}`
//! - `{"choices": [{"text": ...}]}`
//! - `{"response": ...}` (Ollama style)
//! - a plain text body (the streaming proxy concatenates chunks)

use super::*;
use crate::error::{Error, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub struct InternalChatProvider {
    client: Client,
    config: ProviderConfig,
}

impl InternalChatProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        if config.base_url.as_deref().map_or(true, str::is_empty) {
            return Err(Error::config_invalid("internal provider requires api_url")
                .with_operation("internal::new"));
        }

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs.unwrap_or(300)))
            .build()
            .map_err(|e| {
                Error::config_invalid("failed to create HTTP client")
                    .with_operation("internal::new")
                    .set_source(e)
            })?;

        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        let base = self.config.base_url.as_deref().unwrap_or_default();
        format!("{}/chat", base.trim_end_matches('/'))
    }
}

impl LlmProvider for InternalChatProvider {
    fn name(&self) -> &str {
        "internal"
    }

    fn default_model(&self) -> &str {
        self.config.default_model.as_deref().unwrap_or("llama3.1")
    }

    async fn complete(&self, request: CompletionRequest) -> std::result::Result<CompletionResponse, ProviderError> {
        let model = request.model.as_deref().unwrap_or(self.default_model()).to_string();

        let api_request = ChatRequest {
            model: model.clone(),
            messages: request.messages,
            temperature: request.temperature.or(self.config.temperature).unwrap_or(0.0),
            top_p: 0.95,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            max_tokens: request.max_tokens.or(self.config.max_tokens).unwrap_or(2000),
        };

        let mut req = self.client.post(self.endpoint()).json(&api_request);

        if let Some(api_key) = &self.config.api_key {
            if !api_key.is_empty() {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }
        }

        for (key, value) in &self.config.headers {
            req = req.header(key, value);
        }

        let response = req.send().await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let retry_after = retry_after_header(response.headers());
        let body = response.text().await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(status_error(status, body, retry_after));
        }

        parse_chat_body(&body, &model)
    }
}

/// Interpret whatever the chat endpoint sent back
fn parse_chat_body(body: &str, model: &str) -> std::result::Result<CompletionResponse, ProviderError> {
    let Ok(resp) = serde_json::from_str::<ChatResponse>(body) else {
        // Non-JSON means the streaming proxy answered with plain text
        let content = (!body.trim().is_empty()).then(|| body.to_string());
        return Ok(CompletionResponse {
            model: model.to_string(),
            content,
            finish_reason: FinishReason::Stop,
            usage: Usage::default(),
        });
    };

    let (content, finish_reason) = match resp.choices.into_iter().next() {
        Some(choice) => {
            let content = choice.message.and_then(|m| m.content).or(choice.text);
            (content, FinishReason::parse(choice.finish_reason.as_deref().or(Some("stop"))))
        }
        None => (resp.response, FinishReason::Stop),
    };

    let usage = resp.usage.map(|u| Usage {
        prompt_tokens: u.prompt_tokens,
        completion_tokens: u.completion_tokens,
        total_tokens: u.total_tokens,
    }).unwrap_or_default();

    Ok(CompletionResponse {
        model: resp.model.unwrap_or_else(|| model.to_string()),
        content,
        finish_reason,
        usage,
    })
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    top_p: f32,
    frequency_penalty: f32,
    presence_penalty: f32,
    max_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    response: Option<String>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatChoiceMessage>,
    text: Option<String>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: usize,
    #[serde(default)]
    completion_tokens: usize,
    #[serde(default)]
    total_tokens: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_message_content() {
        let body = r#"{"model": "llama3.1", "choices": [{"message": {"content": "Rule 1"}, "finish_reason": "length"}],
                       "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}}"#;
        let resp = parse_chat_body(body, "fallback").unwrap();
        assert_eq!(resp.content.as_deref(), Some("Rule 1"));
        assert_eq!(resp.finish_reason, FinishReason::Length);
        assert_eq!(resp.usage.total_tokens, 5);
        assert_eq!(resp.model, "llama3.1");
    }

    #[test]
    fn test_parse_choice_text() {
        let body = r#"{"choices": [{"text": "Rule 2"}]}"#;
        let resp = parse_chat_body(body, "llama3.1").unwrap();
        assert_eq!(resp.content.as_deref(), Some("Rule 2"));
        assert_eq!(resp.finish_reason, FinishReason::Stop);
        assert_eq!(resp.model, "llama3.1");
    }

    #[test]
    fn test_parse_top_level_response() {
        let resp = parse_chat_body(r#"{"response": "Rule 3"}"#, "llama3.1").unwrap();
        assert_eq!(resp.content.as_deref(), Some("Rule 3"));
        assert_eq!(resp.usage, Usage::default());
    }

    #[test]
    fn test_parse_plain_text_body() {
        let resp = parse_chat_body("Rule 1: pg_pin ... ", "llama3.1").unwrap();
        assert_eq!(resp.content.as_deref(), Some("Rule 1: pg_pin ... "));

        let resp = parse_chat_body("   ", "llama3.1").unwrap();
        assert!(resp.content.is_none());
    }

    #[test]
    fn test_endpoint_and_validation() {
        let provider = InternalChatProvider::new(ProviderConfig::internal("https://llm.example.com/", "k")).unwrap();
        assert_eq!(provider.endpoint(), "https://llm.example.com/chat");

        let err = InternalChatProvider::new(ProviderConfig::internal("", "k")).err().unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_request_body_shape() {
        let req = ChatRequest {
            model: "llama3.1".into(),
            messages: vec![ChatMessage::user("hi")],
            temperature: 0.0,
            top_p: 0.95,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            max_tokens: 2000,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["messages"][0], serde_json::json!({"role": "user", "content": "hi"}));
        assert_eq!(json["max_tokens"], 2000);
    }
}
