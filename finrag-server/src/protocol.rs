//! Request and response bodies.

use finrag_rag::{Answer, OrchestratorState, SearchResult};
use serde::{Deserialize, Serialize};

/// Body of `POST /query`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub question: String,
}

/// Where a piece of context came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub chunk_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    pub score: f32,
}

impl From<&SearchResult> for SourceRef {
    fn from(result: &SearchResult) -> Self {
        Self {
            chunk_id: result.chunk.id.clone(),
            source: result.chunk.source().map(str::to_string),
            page: result.chunk.page(),
            score: result.score,
        }
    }
}

/// Successful `POST /query` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<SourceRef>,
}

impl From<Answer> for QueryResponse {
    fn from(answer: Answer) -> Self {
        Self {
            sources: answer.context.iter().map(SourceRef::from).collect(),
            answer: answer.text,
        }
    }
}

/// Error body for every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
    #[serde(default)]
    pub retryable: bool,
}

/// `GET /ready` and `POST /admin/reload` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadinessBody {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl From<&OrchestratorState> for ReadinessBody {
    fn from(state: &OrchestratorState) -> Self {
        match state {
            OrchestratorState::Ready => Self { status: "ready".into(), detail: None },
            OrchestratorState::Uninitialized => Self {
                status: "uninitialized".into(),
                detail: Some("RAG components not initialized. Please run indexing first.".into()),
            },
            OrchestratorState::Degraded { detail } => {
                Self { status: "degraded".into(), detail: Some(detail.clone()) }
            }
        }
    }
}
