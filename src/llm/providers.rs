//! Vendor completion clients.
//!
//! Each client speaks one vendor's wire format. Transport failures and
//! non-2xx statuses are retryable; a body that does not match the expected
//! shape is a parse failure and is not.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use thiserror::Error;

use super::types::{ChatMessage, CompletionRequest, MessageRole, Model, Provider, ProviderReply};
use crate::config::LlmConfig;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Parse(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProviderError::Parse(_))
    }
}

#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn provider(&self) -> Provider;

    /// Whether credentials are present. Ollama needs none.
    fn is_configured(&self) -> bool;

    async fn complete(&self, model: Model, request: &CompletionRequest) -> Result<ProviderReply, ProviderError>;
}

async fn send_json(request: RequestBuilder) -> Result<Value, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|e| ProviderError::Transport(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Status {
            status: status.as_u16(),
            body,
        });
    }
    response
        .json::<Value>()
        .await
        .map_err(|e| ProviderError::Parse(e.to_string()))
}

fn token_count(value: &Value, pointer: &str) -> u64 {
    value.pointer(pointer).and_then(Value::as_u64).unwrap_or(0)
}

fn finish_reason(value: &Value, pointer: &str) -> Option<String> {
    value.pointer(pointer).and_then(Value::as_str).map(str::to_string)
}

/// Split system prompts from the turn-taking messages.
fn split_system(messages: &[ChatMessage]) -> (Option<String>, Vec<&ChatMessage>) {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == MessageRole::System)
        .map(|m| m.content.as_str())
        .collect();
    let rest = messages.iter().filter(|m| m.role != MessageRole::System).collect();
    let system = (!system.is_empty()).then(|| system.join("\n\n"));
    (system, rest)
}

/// Concatenate `text` fields of an array of parts.
fn join_text(parts: &Value) -> Option<String> {
    let parts = parts.as_array()?;
    let texts: Vec<&str> = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    (!texts.is_empty()).then(|| texts.concat())
}

// ============================================================================
// Anthropic
// ============================================================================

pub struct ClaudeClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl ClaudeClient {
    pub fn new(http: Client, base_url: &str, api_key: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl ProviderClient for ClaudeClient {
    fn provider(&self) -> Provider {
        Provider::Claude
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn complete(&self, model: Model, request: &CompletionRequest) -> Result<ProviderReply, ProviderError> {
        let (system, turns) = split_system(&request.messages);
        let mut body = json!({
            "model": model.as_str(),
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": turns
                .iter()
                .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
                .collect::<Vec<_>>(),
        });
        if let Some(system) = system {
            body["system"] = Value::String(system);
        }

        let data = send_json(
            self.http
                .post(format!("{}/messages", self.base_url))
                .header("x-api-key", self.api_key.as_deref().unwrap_or_default())
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body),
        )
        .await?;

        let content = data
            .get("content")
            .and_then(join_text)
            .ok_or_else(|| ProviderError::Parse("missing content[].text".to_string()))?;
        Ok(ProviderReply {
            content,
            input_tokens: token_count(&data, "/usage/input_tokens"),
            output_tokens: token_count(&data, "/usage/output_tokens"),
            finish_reason: finish_reason(&data, "/stop_reason"),
        })
    }
}

// ============================================================================
// OpenAI
// ============================================================================

pub struct GptClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl GptClient {
    pub fn new(http: Client, base_url: &str, api_key: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl ProviderClient for GptClient {
    fn provider(&self) -> Provider {
        Provider::Gpt
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn complete(&self, model: Model, request: &CompletionRequest) -> Result<ProviderReply, ProviderError> {
        let body = json!({
            "model": model.as_str(),
            "messages": request.messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        let data = send_json(
            self.http
                .post(format!("{}/chat/completions", self.base_url))
                .bearer_auth(self.api_key.as_deref().unwrap_or_default())
                .json(&body),
        )
        .await?;

        let content = data
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::Parse("missing choices[0].message.content".to_string()))?;
        Ok(ProviderReply {
            content: content.to_string(),
            input_tokens: token_count(&data, "/usage/prompt_tokens"),
            output_tokens: token_count(&data, "/usage/completion_tokens"),
            finish_reason: finish_reason(&data, "/choices/0/finish_reason"),
        })
    }
}

// ============================================================================
// Google Gemini
// ============================================================================

pub struct GeminiClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl GeminiClient {
    pub fn new(http: Client, base_url: &str, api_key: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl ProviderClient for GeminiClient {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn complete(&self, model: Model, request: &CompletionRequest) -> Result<ProviderReply, ProviderError> {
        let (system, turns) = split_system(&request.messages);
        let contents: Vec<Value> = turns
            .iter()
            .map(|m| {
                let role = if m.role == MessageRole::Assistant { "model" } else { "user" };
                json!({"role": role, "parts": [{"text": m.content}]})
            })
            .collect();
        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "temperature": request.temperature,
                "maxOutputTokens": request.max_tokens,
            },
        });
        if let Some(system) = system {
            body["systemInstruction"] = json!({"parts": [{"text": system}]});
        }

        let data = send_json(
            self.http
                .post(format!("{}/models/{}:generateContent", self.base_url, model.as_str()))
                .query(&[("key", self.api_key.as_deref().unwrap_or_default())])
                .json(&body),
        )
        .await?;

        let content = data
            .pointer("/candidates/0/content/parts")
            .and_then(join_text)
            .ok_or_else(|| ProviderError::Parse("missing candidates[0].content.parts".to_string()))?;
        Ok(ProviderReply {
            content,
            input_tokens: token_count(&data, "/usageMetadata/promptTokenCount"),
            output_tokens: token_count(&data, "/usageMetadata/candidatesTokenCount"),
            finish_reason: finish_reason(&data, "/candidates/0/finishReason"),
        })
    }
}

// ============================================================================
// Ollama
// ============================================================================

pub struct OllamaClient {
    http: Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(http: Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ProviderClient for OllamaClient {
    fn provider(&self) -> Provider {
        Provider::Ollama
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn complete(&self, model: Model, request: &CompletionRequest) -> Result<ProviderReply, ProviderError> {
        let body = json!({
            "model": model.as_str(),
            "messages": request.messages,
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            },
        });

        let data = send_json(self.http.post(format!("{}/api/chat", self.base_url)).json(&body)).await?;

        let content = data
            .pointer("/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::Parse("missing message.content".to_string()))?;
        Ok(ProviderReply {
            content: content.to_string(),
            input_tokens: token_count(&data, "/prompt_eval_count"),
            output_tokens: token_count(&data, "/eval_count"),
            finish_reason: finish_reason(&data, "/done_reason"),
        })
    }
}

/// One client per provider, wired from configuration.
pub fn clients_from_config(config: &LlmConfig, http: Client) -> Vec<std::sync::Arc<dyn ProviderClient>> {
    vec![
        std::sync::Arc::new(ClaudeClient::new(
            http.clone(),
            &config.anthropic_base_url,
            config.anthropic_api_key.clone(),
        )),
        std::sync::Arc::new(GptClient::new(
            http.clone(),
            &config.openai_base_url,
            config.openai_api_key.clone(),
        )),
        std::sync::Arc::new(GeminiClient::new(
            http.clone(),
            &config.gemini_base_url,
            config.google_api_key.clone(),
        )),
        std::sync::Arc::new(OllamaClient::new(http, &config.ollama_base_url)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn request() -> CompletionRequest {
        CompletionRequest {
            messages: vec![
                ChatMessage::new(MessageRole::System, "Tu es un estimateur."),
                ChatMessage::new(MessageRole::User, "Prix du béton 30 MPa?"),
            ],
            temperature: 0.2,
            max_tokens: 256,
        }
    }

    #[tokio::test]
    async fn claude_lifts_system_prompt_and_reads_usage() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/messages")
            .match_header("x-api-key", "sk-ant-test")
            .match_header("anthropic-version", ANTHROPIC_VERSION)
            .match_body(Matcher::PartialJson(json!({
                "model": "claude-haiku-4-5-20250514",
                "system": "Tu es un estimateur.",
                "messages": [{"role": "user", "content": "Prix du béton 30 MPa?"}]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "content": [{"type": "text", "text": "Environ "}, {"type": "text", "text": "185 $/m³"}],
                    "usage": {"input_tokens": 12, "output_tokens": 6},
                    "stop_reason": "end_turn"
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = ClaudeClient::new(Client::new(), &server.url(), Some("sk-ant-test".to_string()));
        let reply = client.complete(Model::ClaudeHaiku, &request()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(reply.content, "Environ 185 $/m³");
        assert_eq!(reply.input_tokens, 12);
        assert_eq!(reply.output_tokens, 6);
        assert_eq!(reply.finish_reason.as_deref(), Some("end_turn"));
    }

    #[tokio::test]
    async fn gpt_reads_first_choice() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "choices": [{"message": {"role": "assistant", "content": "Oui"}, "finish_reason": "stop"}],
                    "usage": {"prompt_tokens": 20, "completion_tokens": 1}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = GptClient::new(Client::new(), &server.url(), Some("sk-test".to_string()));
        let reply = client.complete(Model::Gpt4oMini, &request()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(reply.content, "Oui");
        assert_eq!(reply.input_tokens, 20);
        assert_eq!(reply.output_tokens, 1);
    }

    #[tokio::test]
    async fn gemini_uses_model_path_and_system_instruction() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", Matcher::Regex(r"^/models/gemini-1\.5-flash:generateContent".to_string()))
            .match_query(Matcher::UrlEncoded("key".into(), "g-key".into()))
            .match_body(Matcher::PartialJson(json!({
                "systemInstruction": {"parts": [{"text": "Tu es un estimateur."}]},
                "contents": [{"role": "user", "parts": [{"text": "Prix du béton 30 MPa?"}]}]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "candidates": [{"content": {"parts": [{"text": "185"}]}, "finishReason": "STOP"}],
                    "usageMetadata": {"promptTokenCount": 9, "candidatesTokenCount": 2}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = GeminiClient::new(Client::new(), &server.url(), Some("g-key".to_string()));
        let reply = client.complete(Model::GeminiFlash, &request()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(reply.content, "185");
        assert_eq!(reply.output_tokens, 2);
    }

    #[tokio::test]
    async fn ollama_disables_streaming() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/chat")
            .match_body(Matcher::PartialJson(json!({"model": "mistral:latest", "stream": false})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({"message": {"role": "assistant", "content": "Local"}, "prompt_eval_count": 5, "eval_count": 3})
                    .to_string(),
            )
            .create_async()
            .await;

        let client = OllamaClient::new(Client::new(), &server.url());
        let reply = client.complete(Model::Mistral, &request()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(reply.content, "Local");
        assert_eq!(reply.input_tokens, 5);
        assert!(client.is_configured());
    }

    #[tokio::test]
    async fn http_errors_are_retryable_and_bad_bodies_are_not() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;
        let client = GptClient::new(Client::new(), &server.url(), Some("k".to_string()));
        let err = client.complete(Model::Gpt4o, &request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Status { status: 503, .. }));
        assert!(err.is_retryable());

        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices": []}"#)
            .create_async()
            .await;
        let client = GptClient::new(Client::new(), &server.url(), Some("k".to_string()));
        let err = client.complete(Model::Gpt4o, &request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Parse(_)));
        assert!(!err.is_retryable());
    }
}
