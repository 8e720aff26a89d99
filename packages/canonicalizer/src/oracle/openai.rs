//! OpenAI-compatible chat and embedding client.
//!
//! Works against api.openai.com as well as any server exposing the same
//! `/chat/completions` and `/embeddings` routes (vLLM, llama.cpp, proxies).
//!
//! # Example
//!
//! ```rust,ignore
//! use canonicalizer::oracle::OpenAiClient;
//!
//! let client = OpenAiClient::new("sk-...").with_model("gpt");
//! ```

use std::fmt;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};

use crate::error::{CanonError, OracleError, OracleResult, Result};
use crate::traits::embedder::Embedder;
use crate::traits::oracle::{Completion, CompletionRequest, Message};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-5.1-2025-11-13";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Expand the short model names accepted on the command line.
///
/// Anything that is not a known alias is passed through unchanged.
pub fn resolve_model_alias(name: &str) -> &str {
    match name {
        "gpt" => DEFAULT_MODEL,
        "qwen" => "Qwen2.5-7B-Instruct",
        "mistral" => "Mistral-7B-Instruct-v0.3",
        other => other,
    }
}

/// API key held in secure memory.
///
/// Never printed by `Debug`.
pub struct ApiKey(SecretBox<str>);

impl ApiKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretBox::new(Box::from(value.into().as_str())))
    }

    /// Only call this when building a request.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl Clone for ApiKey {
    fn clone(&self) -> Self {
        Self::new(self.expose())
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// OpenAI-compatible client implementing [`Completion`] and [`Embedder`].
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: ApiKey,
    model: String,
    embedding_model: String,
    base_url: String,
}

impl fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("api_key", &self.api_key)
            .field("model", &self.model)
            .field("embedding_model", &self.embedding_model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl OpenAiClient {
    /// Create a client for api.openai.com with the given key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: ApiKey::new(api_key),
            model: DEFAULT_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Create from `OPENAI_API_KEY` and, optionally, `OPENAI_API_BASE`.
    ///
    /// A self-hosted server set through `OPENAI_API_BASE` does not need a key.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("OPENAI_API_BASE").ok().filter(|s| !s.is_empty());
        let api_key = match (std::env::var("OPENAI_API_KEY"), &base_url) {
            (Ok(key), _) if !key.is_empty() => key,
            (_, Some(_)) => "EMPTY".to_string(),
            _ => return Err(CanonError::Config("OPENAI_API_KEY not set".into())),
        };

        let client = Self::new(api_key);
        Ok(match base_url {
            Some(url) => client.with_base_url(url),
            None => client,
        })
    }

    /// Set the chat model. Short aliases (`gpt`, `qwen`, `mistral`) are expanded.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        self.model = resolve_model_alias(&model).to_string();
        self
    }

    /// Set the embedding model (default: text-embedding-3-small).
    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    /// Set a custom base URL (self-hosted servers, proxies).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        route: &str,
        body: &B,
    ) -> OracleResult<R> {
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, route))
            .header("Authorization", format!("Bearer {}", self.api_key.expose()))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| OracleError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &error_text));
        }

        response
            .json()
            .await
            .map_err(|e| OracleError::Malformed(e.to_string()))
    }
}

/// Rate limits and server errors are worth retrying, other statuses are not.
fn status_error(status: StatusCode, body: &str) -> OracleError {
    let message = format!("{}: {}", status, body);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        OracleError::Transport(message)
    } else {
        OracleError::Api(message)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[async_trait]
impl Completion for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> OracleResult<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response: ChatResponse = self.post("chat/completions", &body).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| OracleError::Malformed("no choices in completion response".into()))
    }
}

#[async_trait]
impl Embedder for OpenAiClient {
    async fn embed(&self, text: &str) -> OracleResult<Vec<f32>> {
        let body = EmbeddingRequest {
            model: &self.embedding_model,
            input: text,
        };

        let response: EmbeddingResponse = self.post("embeddings", &body).await?;
        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| OracleError::Malformed("no embedding in response".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_aliases() {
        assert_eq!(resolve_model_alias("gpt"), "gpt-5.1-2025-11-13");
        assert_eq!(resolve_model_alias("qwen"), "Qwen2.5-7B-Instruct");
        assert_eq!(resolve_model_alias("mistral"), "Mistral-7B-Instruct-v0.3");
        assert_eq!(resolve_model_alias("gpt-4o-mini"), "gpt-4o-mini");
    }

    #[test]
    fn test_builder() {
        let client = OpenAiClient::new("sk-test")
            .with_model("qwen")
            .with_embedding_model("bge-small")
            .with_base_url("http://localhost:8000/v1/");

        assert_eq!(client.model(), "Qwen2.5-7B-Instruct");
        assert_eq!(client.embedding_model(), "bge-small");
        assert_eq!(client.base_url(), "http://localhost:8000/v1");
    }

    #[test]
    fn test_api_key_is_redacted() {
        let client = OpenAiClient::new("sk-very-secret");
        let debug = format!("{:?}", client);
        assert!(!debug.contains("sk-very-secret"));
        assert!(debug.contains("[REDACTED]"));
        assert_eq!(client.clone().api_key.expose(), "sk-very-secret");
    }

    #[test]
    fn test_status_mapping() {
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert!(status_error(StatusCode::BAD_GATEWAY, "").is_retryable());
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, "bad key"),
            OracleError::Api(_)
        ));
    }

    #[test]
    fn test_chat_request_shape() {
        let messages = vec![Message::system("sys"), Message::user("hi")];
        let body = ChatRequest {
            model: "m",
            messages: &messages,
            temperature: 0.0,
            max_tokens: None,
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert!(json.get("max_tokens").is_none());
    }
}
