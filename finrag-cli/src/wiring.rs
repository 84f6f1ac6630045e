//! Turns [`Settings`] into a ready-to-use [`RagOrchestrator`].

use std::sync::Arc;

use finrag_rag::openai::{self, OpenAIClient, OpenAIEmbeddingProvider, OpenAIGenerationProvider};
use finrag_rag::vertex::{
    self, VertexClient, VertexCredentials, VertexEmbeddingProvider, VertexGenerationProvider,
    VertexRagRetriever,
};
use finrag_rag::{
    EmbeddingProvider, GenerationProvider, RagError, RagOrchestrator, Result, RetrievalBackend,
};
use tracing::info;

use crate::settings::{BackendKind, ProviderKind, Settings, VertexSettings};

fn vertex_client(settings: &Settings) -> Result<VertexClient> {
    let Some(VertexSettings { project_id, region, credentials_file, access_token }) =
        &settings.vertex
    else {
        return Err(RagError::Configuration("PROJECT_ID is required for Vertex AI".to_string()));
    };
    let credentials = match (credentials_file, access_token) {
        (Some(path), _) => VertexCredentials::from_service_account_file(path)?,
        (None, Some(token)) => VertexCredentials::AccessToken(token.clone()),
        (None, None) => {
            return Err(RagError::Configuration(
                "set GOOGLE_APPLICATION_CREDENTIALS or GOOGLE_ACCESS_TOKEN for Vertex AI"
                    .to_string(),
            ));
        }
    };
    VertexClient::new(project_id, region, credentials, settings.rag.provider_timeout)
}

fn openai_client(settings: &Settings) -> Result<OpenAIClient> {
    let key = settings.openai_api_key.clone().ok_or_else(|| {
        RagError::Configuration("OPENAI_API_KEY is required for the openai provider".to_string())
    })?;
    OpenAIClient::new(key, settings.rag.provider_timeout)
}

type Providers = (Arc<dyn EmbeddingProvider>, Arc<dyn GenerationProvider>);

fn providers(settings: &Settings) -> Result<Providers> {
    match settings.provider {
        ProviderKind::Vertex => {
            let client = vertex_client(settings)?;
            let embedding = VertexEmbeddingProvider::with_model(
                client.clone(),
                settings.embedding_model.as_deref().unwrap_or(vertex::DEFAULT_EMBEDDING_MODEL),
                settings.embedding_dimensions.unwrap_or(vertex::DEFAULT_EMBEDDING_DIMENSIONS),
            );
            let generation = VertexGenerationProvider::with_model(
                client,
                settings.generation_model.as_deref().unwrap_or(vertex::DEFAULT_GENERATION_MODEL),
            );
            Ok((Arc::new(embedding), Arc::new(generation)))
        }
        ProviderKind::OpenAI => {
            let client = openai_client(settings)?;
            let model =
                settings.embedding_model.as_deref().unwrap_or(openai::DEFAULT_EMBEDDING_MODEL);
            let mut embedding = OpenAIEmbeddingProvider::with_model(
                client.clone(),
                model,
                openai::DEFAULT_EMBEDDING_DIMENSIONS,
            );
            if let Some(dims) = settings.embedding_dimensions {
                embedding = embedding.with_dimensions(dims);
            }
            let generation = OpenAIGenerationProvider::with_model(
                client,
                settings.generation_model.as_deref().unwrap_or(openai::DEFAULT_CHAT_MODEL),
            );
            Ok((Arc::new(embedding), Arc::new(generation)))
        }
    }
}

fn backend(settings: &Settings) -> Result<RetrievalBackend> {
    match settings.backend {
        BackendKind::Local => {
            Ok(RetrievalBackend::LocalIndex { location: settings.index_dir.clone() })
        }
        BackendKind::VertexRag => {
            let corpus = settings.rag_corpus.clone().ok_or_else(|| {
                RagError::Configuration("RAG_CORPUS is required for the vertex-rag backend".into())
            })?;
            let retriever = VertexRagRetriever::new(
                vertex_client(settings)?,
                corpus,
                settings.rag.provider_timeout,
            )?;
            Ok(RetrievalBackend::Managed(Arc::new(retriever)))
        }
    }
}

/// Build the orchestrator described by `settings`.
///
/// # Errors
///
/// [`RagError::Configuration`] if a client cannot be constructed, for
/// example when the service-account key file is unreadable.
pub fn build_orchestrator(settings: &Settings) -> Result<RagOrchestrator> {
    let (embedding, generation) = providers(settings)?;
    let backend = backend(settings)?;
    info!(
        embedding_model = embedding.model_id(),
        generation_model = generation.model_id(),
        backend = ?backend,
        "orchestrator configured"
    );

    RagOrchestrator::builder()
        .config(settings.rag.clone())
        .embedding_provider(embedding)
        .generation_provider(generation)
        .backend(backend)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> Settings {
        let pairs: Vec<(String, String)> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Settings::from_lookup(move |key| {
            pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
        })
        .unwrap()
    }

    #[test]
    fn openai_with_local_index() {
        let s = settings(&[
            ("FINRAG_PROVIDER", "openai"),
            ("OPENAI_API_KEY", "sk-test"),
            ("INDEX_DIR", "/tmp/finrag-index"),
        ]);
        let orchestrator = build_orchestrator(&s).unwrap();
        assert!(matches!(
            orchestrator.backend(),
            RetrievalBackend::LocalIndex { location } if location.ends_with("finrag-index")
        ));
    }

    #[test]
    fn vertex_with_managed_corpus() {
        let s = settings(&[
            ("PROJECT_ID", "fin-demo"),
            ("GOOGLE_ACCESS_TOKEN", "ya29.test"),
            ("FINRAG_BACKEND", "vertex-rag"),
            ("RAG_CORPUS", "4611686018427387904"),
        ]);
        let orchestrator = build_orchestrator(&s).unwrap();
        assert!(matches!(orchestrator.backend(), RetrievalBackend::Managed(_)));
    }

    #[test]
    fn unreadable_key_file_is_a_configuration_error() {
        let s = settings(&[
            ("PROJECT_ID", "fin-demo"),
            ("GOOGLE_APPLICATION_CREDENTIALS", "/nonexistent/key.json"),
        ]);
        assert!(matches!(build_orchestrator(&s), Err(RagError::Configuration(_))));
    }
}
