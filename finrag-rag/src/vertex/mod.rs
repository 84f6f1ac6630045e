//! Google Cloud Vertex AI providers.
//!
//! All three share one [`VertexClient`]:
//!
//! - [`VertexEmbeddingProvider`]: text embeddings via `:predict`
//! - [`VertexGenerationProvider`]: Gemini answers via `:generateContent`
//! - [`VertexRagRetriever`]: managed RAG corpus retrieval via `:retrieveContexts`
//!
//! This module is only available when the `vertex` feature is enabled.

mod auth;
mod corpus;
mod embedding;
mod generation;

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

pub use auth::{ServiceAccountKey, VertexCredentials};
pub use corpus::VertexRagRetriever;
pub use embedding::{DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_EMBEDDING_MODEL, VertexEmbeddingProvider};
pub use generation::{DEFAULT_GENERATION_MODEL, VertexGenerationProvider};

use crate::error::{ProviderError, ProviderResult, RagError, Result};
use crate::provider::http;
use auth::TokenSource;

/// Provider name used in errors and logs.
pub(crate) const PROVIDER: &str = "vertex";

/// Default region when none is configured.
pub const DEFAULT_REGION: &str = "us-central1";

/// Authenticated access to one project and region of Vertex AI.
#[derive(Clone)]
pub struct VertexClient {
    http: reqwest::Client,
    tokens: TokenSource,
    project_id: String,
    region: String,
    v1: Url,
    v1beta1: Url,
    timeout: Duration,
}

impl std::fmt::Debug for VertexClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VertexClient")
            .field("project_id", &self.project_id)
            .field("region", &self.region)
            .field("v1", &self.v1.as_str())
            .finish_non_exhaustive()
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw)
        .map_err(|e| RagError::Configuration(format!("invalid Vertex AI URL '{raw}': {e}")))
}

impl VertexClient {
    /// Create a client for `project_id` in `region`.
    ///
    /// # Errors
    ///
    /// [`RagError::Configuration`] for an empty project or region.
    pub fn new(
        project_id: impl Into<String>,
        region: impl Into<String>,
        credentials: VertexCredentials,
        timeout: Duration,
    ) -> Result<Self> {
        let project_id = project_id.into();
        let region = region.into();
        if project_id.trim().is_empty() {
            return Err(RagError::Configuration("PROJECT_ID must not be empty".into()));
        }
        if region.trim().is_empty() {
            return Err(RagError::Configuration("REGION must not be empty".into()));
        }

        let http = http::client(PROVIDER, timeout)
            .map_err(|e| RagError::Configuration(e.to_string()))?;
        let v1 = parse_url(&format!("https://{region}-aiplatform.googleapis.com/v1/"))?;
        let v1beta1 = parse_url(&format!("https://{region}-aiplatform.googleapis.com/v1beta1/"))?;

        Ok(Self {
            http,
            tokens: TokenSource::new(credentials),
            project_id,
            region,
            v1,
            v1beta1,
            timeout,
        })
    }

    /// Send every request to `base` instead of the regional endpoint. `base`
    /// must end with `/`; both API versions are resolved beneath it.
    pub fn with_base_url(mut self, base: &str) -> Result<Self> {
        let base = parse_url(base)?;
        self.v1 = base.join("v1/").map_err(|e| RagError::Configuration(e.to_string()))?;
        self.v1beta1 = base.join("v1beta1/").map_err(|e| RagError::Configuration(e.to_string()))?;
        Ok(self)
    }

    /// The Google Cloud project.
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// The Vertex AI region.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// `projects/{project}/locations/{region}`.
    pub fn location_path(&self) -> String {
        format!("projects/{}/locations/{}", self.project_id, self.region)
    }

    /// Resource path of a Google publisher model.
    pub fn model_path(&self, model: &str) -> String {
        format!("{}/publishers/google/models/{model}", self.location_path())
    }

    pub(crate) fn model_url(&self, model: &str, method: &str) -> ProviderResult<Url> {
        self.join(&self.v1, &format!("{}:{method}", self.model_path(model)))
    }

    pub(crate) fn location_url(&self, method: &str) -> ProviderResult<Url> {
        self.join(&self.v1beta1, &format!("{}:{method}", self.location_path()))
    }

    fn join(&self, base: &Url, suffix: &str) -> ProviderResult<Url> {
        base.join(suffix).map_err(|e| ProviderError::InvalidResponse {
            provider: PROVIDER.to_string(),
            message: format!("cannot build URL for '{suffix}': {e}"),
        })
    }

    pub(crate) async fn post_json<Req, Res>(&self, url: Url, body: &Req) -> ProviderResult<Res>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let token = self.tokens.access_token(&self.http, PROVIDER).await?;
        debug!(url = %url, "vertex request");
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| http::transport_error(PROVIDER, self.timeout, e))?;
        let response = http::check_response(PROVIDER, response).await?;
        http::decode(PROVIDER, self.timeout, response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> VertexClient {
        VertexClient::new(
            "fin-demo",
            "europe-west4",
            VertexCredentials::AccessToken("t".into()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn model_urls_follow_the_publisher_layout() {
        let url = client().model_url("textembedding-gecko@001", "predict").unwrap();
        assert_eq!(
            url.as_str(),
            "https://europe-west4-aiplatform.googleapis.com/v1/projects/fin-demo/locations/europe-west4/publishers/google/models/textembedding-gecko@001:predict"
        );
    }

    #[test]
    fn retrieval_uses_the_beta_location_endpoint() {
        let url = client().location_url("retrieveContexts").unwrap();
        assert_eq!(
            url.as_str(),
            "https://europe-west4-aiplatform.googleapis.com/v1beta1/projects/fin-demo/locations/europe-west4:retrieveContexts"
        );
    }

    #[test]
    fn base_url_override() {
        let client = client().with_base_url("http://127.0.0.1:9000/").unwrap();
        let url = client.model_url("gemini-1.5-flash", "generateContent").unwrap();
        assert!(url.as_str().starts_with("http://127.0.0.1:9000/v1/projects/fin-demo/"));
    }

    #[test]
    fn empty_project_is_rejected() {
        let err = VertexClient::new(
            " ",
            DEFAULT_REGION,
            VertexCredentials::AccessToken("t".into()),
            Duration::from_secs(5),
        )
        .unwrap_err();
        assert!(matches!(err, RagError::Configuration(_)));
    }
}
