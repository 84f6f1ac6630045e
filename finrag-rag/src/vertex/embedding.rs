use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{PROVIDER, VertexClient};
use crate::embedding::EmbeddingProvider;
use crate::error::{ProviderError, ProviderResult};

/// The default Vertex AI text embedding model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "textembedding-gecko@001";

/// Output dimension of the `textembedding-gecko` family.
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 768;

#[derive(Serialize)]
struct PredictRequest<'a> {
    instances: Vec<Instance<'a>>,
}

#[derive(Serialize)]
struct Instance<'a> {
    content: &'a str,
}

#[derive(Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Deserialize)]
struct Prediction {
    embeddings: Embeddings,
}

#[derive(Deserialize)]
struct Embeddings {
    values: Vec<f32>,
}

/// An [`EmbeddingProvider`] calling a Vertex AI text embedding model.
///
/// Texts in one batch go out as the `instances` of a single `:predict` call.
#[derive(Debug, Clone)]
pub struct VertexEmbeddingProvider {
    client: VertexClient,
    model: String,
    model_id: String,
    dimensions: usize,
}

impl VertexEmbeddingProvider {
    /// Use `textembedding-gecko@001` with 768 dimensions.
    pub fn new(client: VertexClient) -> Self {
        Self::with_model(client, DEFAULT_EMBEDDING_MODEL, DEFAULT_EMBEDDING_DIMENSIONS)
    }

    /// Use `model`, which must produce `dimensions`-long vectors.
    pub fn with_model(client: VertexClient, model: impl Into<String>, dimensions: usize) -> Self {
        let model = model.into();
        Self { client, model_id: format!("vertex:{model}"), model, dimensions }
    }
}

#[async_trait]
impl EmbeddingProvider for VertexEmbeddingProvider {
    async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>> {
        self.embed_batch(&[text]).await?.into_iter().next().ok_or_else(|| {
            ProviderError::InvalidResponse {
                provider: PROVIDER.to_string(),
                message: "no embedding returned".to_string(),
            }
        })
    }

    async fn embed_batch(&self, texts: &[&str]) -> ProviderResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(
            provider = PROVIDER,
            model = %self.model,
            batch_size = texts.len(),
            "embedding batch"
        );

        let url = self.client.model_url(&self.model, "predict")?;
        let request = PredictRequest {
            instances: texts.iter().map(|&content| Instance { content }).collect(),
        };
        let response: PredictResponse = self.client.post_json(url, &request).await?;
        Ok(response.predictions.into_iter().map(|p| p.embeddings.values).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_wraps_each_text_as_an_instance() {
        let request = PredictRequest {
            instances: vec![Instance { content: "a" }, Instance { content: "b" }],
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({"instances": [{"content": "a"}, {"content": "b"}]})
        );
    }

    #[test]
    fn response_values_are_extracted_in_order() {
        let body = r#"{"predictions":[
            {"embeddings":{"statistics":{"token_count":3,"truncated":false},"values":[0.1,0.2]}},
            {"embeddings":{"values":[0.3,0.4]}}
        ]}"#;
        let response: PredictResponse = serde_json::from_str(body).unwrap();
        let vectors: Vec<Vec<f32>> =
            response.predictions.into_iter().map(|p| p.embeddings.values).collect();
        assert_eq!(vectors, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
    }
}
