//! Chat completions over the OpenAI wire format.
//!
//! OpenAI, DeepSeek and self-hosted servers (vLLM, llama.cpp, Ollama) all
//! accept the same `POST .../chat/completions` body, so one adapter covers
//! them. Only [`LlmResponse`] leaves this module.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::llm::{LlmResponse, LlmUsage, ProviderError};

#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    http: Client,
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    api_key: Option<String>,
}

impl OpenAiCompatibleProvider {
    /// `endpoint` is the full completions URL. A present `api_key` goes out
    /// as a bearer token; keyless local servers pass `None`.
    pub fn new(
        endpoint: String,
        model: String,
        temperature: f32,
        timeout_seconds: u64,
        max_tokens: Option<u32>,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds.max(1)))
            .build()
            .map_err(|e| ProviderError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, endpoint, model, temperature, max_tokens, api_key })
    }

    /// One persona turn: optional system prompt, then the task as the user message.
    pub async fn complete(&self, content: &str, system: Option<&str>) -> Result<LlmResponse, ProviderError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(Message { role: Role::System, content: system });
        }
        messages.push(Message { role: Role::User, content });

        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.sends_temperature().then_some(self.temperature),
            max_tokens: self.max_tokens,
        };
        debug!(model = %self.model, prompt_chars = content.len(), "chat completion request");
        if tracing::enabled!(tracing::Level::TRACE) {
            trace!(body = %serde_json::to_string(&body).unwrap_or_default(), "chat completion body");
        }

        let mut req = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| ProviderError::Request(format!("{}: {e}", self.endpoint)))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let message = error_message(status, &text);
            warn!(%status, %message, "chat completion rejected");
            return Err(ProviderError::Request(message));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Request(format!("failed to parse response body: {e}")))?;
        into_response(parsed)
    }

    /// Reasoning models (the gpt-5 and o-series) reject a temperature.
    fn sends_temperature(&self) -> bool {
        let m = self.model.as_str();
        !(m.starts_with("gpt-5") || m.starts_with("o1") || m.starts_with("o3"))
    }
}

fn into_response(parsed: ChatResponse) -> Result<LlmResponse, ProviderError> {
    let text = parsed
        .choices
        .into_iter()
        .find_map(|c| c.message.content)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ProviderError::Request("empty or missing content in response".into()))?;
    let usage = parsed
        .usage
        .map(|u| LlmUsage { input_tokens: u.prompt_tokens, output_tokens: u.completion_tokens });
    Ok(LlmResponse { text, usage })
}

/// `HTTP 401 Unauthorized [code=invalid_api_key]: Incorrect API key` when the
/// body is the usual `{"error": {...}}` envelope, the raw body otherwise.
fn error_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(ErrorEnvelope { error }) => {
            let code = match error.code {
                Some(Value::String(s)) => format!(" [code={s}]"),
                Some(Value::Null) | None => String::new(),
                Some(other) => format!(" [code={other}]"),
            };
            format!("HTTP {status}{code}: {}", error.message)
        }
        Err(_) => format!("HTTP {status}: {}", body.trim()),
    }
}

// ── wire format ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
enum Role {
    System,
    User,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: Role,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    code: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(model: &str) -> OpenAiCompatibleProvider {
        OpenAiCompatibleProvider::new("http://localhost/v1".into(), model.into(), 0.9, 10, None, None)
            .unwrap()
    }

    #[test]
    fn reasoning_models_skip_temperature() {
        assert!(provider("gpt-4o-mini").sends_temperature());
        assert!(provider("deepseek-chat").sends_temperature());
        assert!(!provider("gpt-5-mini").sends_temperature());
        assert!(!provider("o3-mini").sends_temperature());
    }

    #[test]
    fn request_shape() {
        let body = ChatRequest {
            model: "m",
            messages: vec![Message { role: Role::System, content: "be Ada" }],
            temperature: None,
            max_tokens: Some(300),
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["messages"][0]["role"], "system");
        assert_eq!(v["max_tokens"], 300);
        assert!(v.get("temperature").is_none());
    }

    #[test]
    fn first_choice_with_content_wins() {
        let parsed: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"content":null}},{"message":{"content":" wen moon "}}]}"#,
        )
        .unwrap();
        let resp = into_response(parsed).unwrap();
        assert_eq!(resp.text, "wen moon");
        assert!(resp.usage.is_none());
    }

    #[test]
    fn error_messages() {
        let msg = error_message(
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"error":{"message":"Rate limit reached","code":429}}"#,
        );
        assert_eq!(msg, "HTTP 429 Too Many Requests [code=429]: Rate limit reached");
        let msg = error_message(StatusCode::BAD_GATEWAY, "  upstream down \n");
        assert_eq!(msg, "HTTP 502 Bad Gateway: upstream down");
    }
}
