//! OpenAI providers: embeddings and chat completions.
//!
//! This module is only available when the `openai` feature is enabled.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::embedding::EmbeddingProvider;
use crate::error::{ProviderError, ProviderResult, RagError, Result};
use crate::generation::GenerationProvider;
use crate::provider::http;

const PROVIDER: &str = "openai";

/// The default OpenAI API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// The default model for OpenAI embeddings.
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// The default dimensionality for `text-embedding-3-small`.
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1536;

/// The default chat model for answers.
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

/// Connection settings shared by the OpenAI providers.
#[derive(Clone)]
pub struct OpenAIClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl std::fmt::Debug for OpenAIClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIClient").field("base_url", &self.base_url).finish_non_exhaustive()
    }
}

impl OpenAIClient {
    /// Create a client with the given API key.
    ///
    /// # Errors
    ///
    /// [`RagError::Configuration`] if the key is empty.
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(RagError::Configuration("OPENAI_API_KEY must not be empty".into()));
        }
        let http =
            http::client(PROVIDER, timeout).map_err(|e| RagError::Configuration(e.to_string()))?;
        Ok(Self { http, api_key, base_url: DEFAULT_BASE_URL.to_string(), timeout })
    }

    /// Point at an OpenAI-compatible server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn post_json<Req: Serialize, Res: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &Req,
    ) -> ProviderResult<Res> {
        let response = self
            .http
            .post(format!("{}/{path}", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| http::transport_error(PROVIDER, self.timeout, e))?;
        let response = http::check_response(PROVIDER, response).await?;
        http::decode(PROVIDER, self.timeout, response).await
    }
}

// ── embeddings ─────────────────────────────────────────────────────

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// An [`EmbeddingProvider`] backed by the OpenAI `/embeddings` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAIEmbeddingProvider {
    client: OpenAIClient,
    model: String,
    model_id: String,
    dimensions: usize,
    request_dimensions: Option<usize>,
}

impl OpenAIEmbeddingProvider {
    /// Use `text-embedding-3-small` with 1536 dimensions.
    pub fn new(client: OpenAIClient) -> Self {
        Self::with_model(client, DEFAULT_EMBEDDING_MODEL, DEFAULT_EMBEDDING_DIMENSIONS)
    }

    /// Use `model`, which natively produces `dimensions`-long vectors.
    pub fn with_model(client: OpenAIClient, model: impl Into<String>, dimensions: usize) -> Self {
        let model = model.into();
        Self {
            client,
            model_id: format!("openai:{model}"),
            model,
            dimensions,
            request_dimensions: None,
        }
    }

    /// Ask the API to truncate vectors to `dims` (Matryoshka models).
    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.dimensions = dims;
        self.request_dimensions = Some(dims);
        self.model_id = format!("openai:{}@{dims}", self.model);
        self
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>> {
        self.embed_batch(&[text]).await?.into_iter().next().ok_or_else(|| {
            ProviderError::InvalidResponse {
                provider: PROVIDER.to_string(),
                message: "API returned empty response".to_string(),
            }
        })
    }

    async fn embed_batch(&self, texts: &[&str]) -> ProviderResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(
            provider = PROVIDER,
            batch_size = texts.len(),
            model = %self.model,
            "embedding batch"
        );

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts.to_vec(),
            dimensions: self.request_dimensions,
        };
        let mut response: EmbeddingResponse = self.client.post_json("embeddings", &request).await?;
        response.data.sort_by_key(|d| d.index);
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ── chat completions ───────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// A [`GenerationProvider`] backed by the OpenAI `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAIGenerationProvider {
    client: OpenAIClient,
    model: String,
    model_id: String,
    temperature: Option<f32>,
}

impl OpenAIGenerationProvider {
    /// Use [`DEFAULT_CHAT_MODEL`].
    pub fn new(client: OpenAIClient) -> Self {
        Self::with_model(client, DEFAULT_CHAT_MODEL)
    }

    /// Use `model`.
    pub fn with_model(client: OpenAIClient, model: impl Into<String>) -> Self {
        let model = model.into();
        Self { client, model_id: format!("openai:{model}"), model, temperature: None }
    }

    /// Override the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[async_trait]
impl GenerationProvider for OpenAIGenerationProvider {
    async fn generate(&self, prompt: &str) -> ProviderResult<String> {
        debug!(provider = PROVIDER, model = %self.model, prompt_len = prompt.len(), "generating");

        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage { role: "user", content: prompt }],
            temperature: self.temperature,
        };
        let response: ChatResponse = self.client.post_json("chat/completions", &request).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.is_empty())
            .ok_or_else(|| ProviderError::InvalidResponse {
                provider: PROVIDER.to_string(),
                message: "no completion returned".to_string(),
            })
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_is_rejected() {
        assert!(OpenAIClient::new("", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn truncated_dimensions_change_the_model_id() {
        let client = OpenAIClient::new("sk-test", Duration::from_secs(1)).unwrap();
        let provider = OpenAIEmbeddingProvider::new(client).with_dimensions(256);
        assert_eq!(provider.dimensions(), 256);
        assert_eq!(provider.model_id(), "openai:text-embedding-3-small@256");
    }

    #[test]
    fn embeddings_are_reordered_by_index() {
        let body = r#"{"data":[{"index":1,"embedding":[2.0]},{"index":0,"embedding":[1.0]}]}"#;
        let mut response: EmbeddingResponse = serde_json::from_str(body).unwrap();
        response.data.sort_by_key(|d| d.index);
        let vectors: Vec<Vec<f32>> = response.data.into_iter().map(|d| d.embedding).collect();
        assert_eq!(vectors, vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = OpenAIClient::new("sk-test", Duration::from_secs(1))
            .unwrap()
            .with_base_url("http://localhost:8080/v1/");
        assert_eq!(client.base_url, "http://localhost:8080/v1");
    }
}
