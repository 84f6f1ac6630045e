//! Mapping pipeline errors onto HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use finrag_rag::RagError;
use tracing::{error, warn};

use crate::protocol::ErrorBody;

/// An error returned from a handler.
#[derive(Debug)]
pub enum ApiError {
    /// The request itself was unusable.
    BadRequest(String),
    /// The pipeline failed.
    Rag(RagError),
}

impl From<RagError> for ApiError {
    fn from(error: RagError) -> Self {
        Self::Rag(error)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Rag(RagError::NotReady { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Rag(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            Self::BadRequest(detail) => ErrorBody { detail, retryable: false },
            Self::Rag(RagError::NotReady { reason }) => {
                warn!(reason = %reason, "query rejected: not ready");
                ErrorBody { detail: reason, retryable: false }
            }
            Self::Rag(e) => {
                let retryable = e.is_retryable();
                error!(error = %e, retryable, "query failed");
                ErrorBody { detail: format!("Error processing query: {e}"), retryable }
            }
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use finrag_rag::ProviderError;

    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(ApiError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::from(RagError::NotReady { reason: "no index".into() }).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        let timeout = RagError::GenerationFailed(ProviderError::Timeout {
            provider: "vertex".into(),
            timeout: Duration::from_secs(60),
        });
        assert_eq!(ApiError::from(timeout).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
