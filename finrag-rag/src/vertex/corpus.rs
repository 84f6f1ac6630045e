use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{PROVIDER, VertexClient};
use crate::document::{Chunk, SOURCE_KEY, SearchResult};
use crate::error::{RagError, Result};
use crate::provider::with_timeout;
use crate::retriever::Retriever;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RetrieveContextsRequest<'a> {
    vertex_rag_store: VertexRagStore<'a>,
    query: RagQuery<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VertexRagStore<'a> {
    rag_resources: Vec<RagResource<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RagResource<'a> {
    rag_corpus: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RagQuery<'a> {
    text: &'a str,
    similarity_top_k: usize,
}

#[derive(Deserialize, Default)]
struct RetrieveContextsResponse {
    #[serde(default)]
    contexts: RagContexts,
}

#[derive(Deserialize, Default)]
struct RagContexts {
    #[serde(default)]
    contexts: Vec<RagContext>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RagContext {
    #[serde(default)]
    source_uri: String,
    #[serde(default)]
    text: String,
    score: Option<f32>,
    distance: Option<f64>,
}

impl RagContext {
    /// Higher is better. Corpora report either a similarity score or a
    /// cosine distance.
    fn relevance(&self) -> f32 {
        match (self.score, self.distance) {
            (Some(score), _) => score,
            (None, Some(distance)) => (1.0 - distance) as f32,
            (None, None) => 0.0,
        }
    }
}

fn into_results(response: RetrieveContextsResponse, top_k: usize) -> Vec<SearchResult> {
    let mut results: Vec<SearchResult> = response
        .contexts
        .contexts
        .into_iter()
        .enumerate()
        .map(|(i, context)| {
            let score = context.relevance();
            let mut metadata = BTreeMap::new();
            if !context.source_uri.is_empty() {
                metadata.insert(SOURCE_KEY.to_string(), context.source_uri.clone());
            }
            SearchResult {
                chunk: Chunk {
                    id: format!("context-{i}"),
                    text: context.text,
                    metadata,
                    document_id: context.source_uri,
                },
                score,
            }
        })
        .collect();
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    results.truncate(top_k);
    results
}

/// A [`Retriever`] over a Vertex AI RAG corpus.
///
/// The corpus is provisioned and populated outside this process; there is no
/// local index to build or load.
#[derive(Debug, Clone)]
pub struct VertexRagRetriever {
    client: VertexClient,
    corpus: String,
    timeout: std::time::Duration,
}

impl VertexRagRetriever {
    /// Retrieve from `corpus`, either a full resource name
    /// (`projects/../locations/../ragCorpora/..`) or a bare corpus id.
    pub fn new(
        client: VertexClient,
        corpus: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        let corpus = corpus.into();
        if corpus.trim().is_empty() {
            return Err(RagError::Configuration("RAG_CORPUS must not be empty".into()));
        }
        let corpus = if corpus.starts_with("projects/") {
            corpus
        } else {
            format!("{}/ragCorpora/{corpus}", client.location_path())
        };
        Ok(Self { client, corpus, timeout })
    }

    /// Full resource name of the corpus.
    pub fn corpus(&self) -> &str {
        &self.corpus
    }
}

#[async_trait]
impl Retriever for VertexRagRetriever {
    async fn retrieve(&self, question: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        let url = self.client.location_url("retrieveContexts").map_err(RagError::Retrieval)?;
        let request = RetrieveContextsRequest {
            vertex_rag_store: VertexRagStore {
                rag_resources: vec![RagResource { rag_corpus: &self.corpus }],
            },
            query: RagQuery { text: question, similarity_top_k: top_k },
        };

        let response: RetrieveContextsResponse =
            with_timeout(PROVIDER, self.timeout, self.client.post_json(url, &request))
                .await
                .map_err(RagError::Retrieval)?;
        let results = into_results(response, top_k);
        debug!(corpus = %self.corpus, result_count = results.len(), "retrieved corpus contexts");
        Ok(results)
    }

    fn backend(&self) -> &'static str {
        "vertex-rag"
    }
}
