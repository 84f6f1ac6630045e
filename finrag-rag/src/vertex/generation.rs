use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{PROVIDER, VertexClient};
use crate::error::{ProviderError, ProviderResult};
use crate::generation::GenerationProvider;

/// The default Gemini model for answers.
pub const DEFAULT_GENERATION_MODEL: &str = "gemini-1.5-flash";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GenerateContentResponse {
    fn into_text(self) -> ProviderResult<String> {
        let invalid = |message: String| ProviderError::InvalidResponse {
            provider: PROVIDER.to_string(),
            message,
        };

        let Some(candidate) = self.candidates.into_iter().next() else {
            let reason = self
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .unwrap_or_else(|| "no candidates".to_string());
            return Err(invalid(format!("no answer generated: {reason}")));
        };

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        if text.is_empty() {
            let reason = candidate.finish_reason.unwrap_or_else(|| "empty content".to_string());
            return Err(invalid(format!("no answer generated: {reason}")));
        }
        Ok(text)
    }
}

/// A [`GenerationProvider`] calling a Gemini model on Vertex AI.
#[derive(Debug, Clone)]
pub struct VertexGenerationProvider {
    client: VertexClient,
    model: String,
    model_id: String,
    temperature: Option<f32>,
}

impl VertexGenerationProvider {
    /// Use [`DEFAULT_GENERATION_MODEL`].
    pub fn new(client: VertexClient) -> Self {
        Self::with_model(client, DEFAULT_GENERATION_MODEL)
    }

    /// Use `model`, e.g. `gemini-1.0-pro`.
    pub fn with_model(client: VertexClient, model: impl Into<String>) -> Self {
        let model = model.into();
        Self { client, model_id: format!("vertex:{model}"), model, temperature: None }
    }

    /// Override the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[async_trait]
impl GenerationProvider for VertexGenerationProvider {
    async fn generate(&self, prompt: &str) -> ProviderResult<String> {
        debug!(provider = PROVIDER, model = %self.model, prompt_len = prompt.len(), "generating");

        let url = self.client.model_url(&self.model, "generateContent")?;
        let request = GenerateContentRequest {
            contents: vec![Content { role: "user", parts: vec![RequestPart { text: prompt }] }],
            generation_config: self.temperature.map(|temperature| GenerationConfig { temperature }),
        };
        let response: GenerateContentResponse = self.client.post_json(url, &request).await?;
        response
            .into_text()
            .inspect_err(|e| warn!(model = %self.model, error = %e, "empty generation"))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
