//! Error types for the `finrag-rag` crate.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// A failure reported by an external embedding, generation, or retrieval service.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    /// The service could not be reached or answered with a server-side error.
    #[error("{provider} unavailable: {message}")]
    Unavailable {
        /// The provider that failed.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The call did not complete within the configured timeout.
    #[error("{provider} timed out after {timeout:?}")]
    Timeout {
        /// The provider that timed out.
        provider: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The service refused the request (4xx). Retrying the same request will not help.
    #[error("{provider} rejected the request ({status}): {message}")]
    Rejected {
        /// The provider that rejected the request.
        provider: String,
        /// The HTTP status code returned.
        status: u16,
        /// The error detail returned by the service.
        message: String,
    },

    /// The service answered successfully but the payload could not be used.
    #[error("{provider} returned an invalid response: {message}")]
    InvalidResponse {
        /// The provider that produced the response.
        provider: String,
        /// What was wrong with the response.
        message: String,
    },
}

impl ProviderError {
    /// Classify an HTTP error status. Throttling and server errors are transient;
    /// everything else is a permanent rejection.
    pub fn from_status(
        provider: impl Into<String>,
        status: u16,
        message: impl Into<String>,
    ) -> Self {
        let provider = provider.into();
        let message = message.into();
        if status == 429 || status >= 500 {
            Self::Unavailable { provider, message: format!("HTTP {status}: {message}") }
        } else {
            Self::Rejected { provider, status, message }
        }
    }

    /// Whether the caller may reasonably retry the same call later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }

    /// The name of the provider that produced this error.
    pub fn provider(&self) -> &str {
        match self {
            Self::Unavailable { provider, .. }
            | Self::Timeout { provider, .. }
            | Self::Rejected { provider, .. }
            | Self::InvalidResponse { provider, .. } => provider,
        }
    }
}

/// Errors that can occur in RAG operations.
#[derive(Debug, Error)]
pub enum RagError {
    /// A required setting is missing or settings are inconsistent.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A source file or directory could not be read.
    #[error("Ingestion error ({}): {message}", path.display())]
    Ingestion {
        /// The file or directory that failed.
        path: PathBuf,
        /// A description of the failure.
        message: String,
    },

    /// No persisted index exists at the configured location.
    #[error("index not found at {}; run indexing first", location.display())]
    IndexNotFound {
        /// The index location that was probed.
        location: PathBuf,
    },

    /// A persisted index exists but cannot be trusted.
    #[error("index at {} is corrupt: {message}", location.display())]
    IndexCorrupt {
        /// The index location.
        location: PathBuf,
        /// What failed validation.
        message: String,
    },

    /// Another indexing run holds the lock for this location.
    #[error("index at {} is being rebuilt by another process", location.display())]
    IndexBusy {
        /// The contested index location.
        location: PathBuf,
    },

    /// A vector did not have the dimension the index expects.
    #[error("embedding dimension mismatch ({context}): expected {expected}, got {actual}")]
    EmbeddingDimensionMismatch {
        /// The dimension the index expects.
        expected: usize,
        /// The dimension that was produced.
        actual: usize,
        /// Which vector was wrong.
        context: String,
    },

    /// The query-time embedding model differs from the one the index was built with.
    #[error(
        "embedding model mismatch: index was built with '{index_model}', provider uses '{provider_model}'"
    )]
    EmbeddingModelMismatch {
        /// The model recorded in the index manifest.
        index_model: String,
        /// The model of the configured provider.
        provider_model: String,
    },

    /// The embedding provider failed.
    #[error("Embedding failed ({context}): {source}")]
    Embedding {
        /// The stage and input that were being embedded.
        context: String,
        /// The underlying provider failure.
        source: ProviderError,
    },

    /// The generation provider failed.
    #[error("Generation failed: {0}")]
    GenerationFailed(#[source] ProviderError),

    /// A managed retrieval backend failed.
    #[error("Retrieval failed: {0}")]
    Retrieval(#[source] ProviderError),

    /// A query arrived before the orchestrator reached the ready state.
    #[error("service not ready: {reason}")]
    NotReady {
        /// Why the orchestrator is not ready.
        reason: String,
    },

    /// A filesystem operation failed.
    #[error("I/O error ({context}): {source}")]
    Io {
        /// The operation that failed.
        context: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A value could not be serialized.
    #[error("Serialization error ({context}): {source}")]
    Serialization {
        /// The value being serialized.
        context: String,
        /// The underlying serde error.
        source: serde_json::Error,
    },
}

impl RagError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { context: context.into(), source }
    }

    /// The provider failure behind this error, if any.
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            Self::Embedding { source, .. } => Some(source),
            Self::GenerationFailed(source) | Self::Retrieval(source) => Some(source),
            _ => None,
        }
    }

    /// Whether the failed operation may succeed if the caller retries it.
    pub fn is_retryable(&self) -> bool {
        self.provider_error().is_some_and(ProviderError::is_retryable)
    }
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;

/// Result type returned by provider implementations.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(ProviderError::from_status("vertex", 503, "busy").is_retryable());
        assert!(ProviderError::from_status("vertex", 429, "quota").is_retryable());

        let rejected = ProviderError::from_status("vertex", 403, "permission denied");
        assert!(!rejected.is_retryable());
        assert!(matches!(rejected, ProviderError::Rejected { status: 403, .. }));
    }

    #[test]
    fn retryable_only_for_transient_provider_failures() {
        let timeout = RagError::GenerationFailed(ProviderError::Timeout {
            provider: "vertex".into(),
            timeout: Duration::from_secs(5),
        });
        assert!(timeout.is_retryable());
        assert_eq!(timeout.provider_error().map(ProviderError::provider), Some("vertex"));

        let not_ready = RagError::NotReady { reason: "index missing".into() };
        assert!(!not_ready.is_retryable());
        assert!(not_ready.provider_error().is_none());
    }
}
