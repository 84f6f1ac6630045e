//! Shared plumbing for calls to external providers: timeouts and HTTP error mapping.

use std::future::Future;
use std::time::Duration;

use crate::error::{ProviderError, ProviderResult};

/// Run a provider call under `timeout`, mapping expiry to [`ProviderError::Timeout`].
///
/// The inner future is dropped on expiry, which releases any connection it holds.
pub async fn with_timeout<T, F>(provider: &str, timeout: Duration, call: F) -> ProviderResult<T>
where
    F: Future<Output = ProviderResult<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(provider, ?timeout, "provider call timed out");
            Err(ProviderError::Timeout { provider: provider.to_string(), timeout })
        }
    }
}

#[cfg(any(feature = "vertex", feature = "openai"))]
pub(crate) mod http {
    use std::time::Duration;

    use serde::Deserialize;

    use crate::error::{ProviderError, ProviderResult};

    #[derive(Deserialize)]
    struct ErrorEnvelope {
        error: ErrorDetail,
    }

    #[derive(Deserialize)]
    struct ErrorDetail {
        message: String,
    }

    /// Build the HTTP client used by a provider.
    pub(crate) fn client(provider: &str, timeout: Duration) -> ProviderResult<reqwest::Client> {
        reqwest::Client::builder().timeout(timeout).build().map_err(|e| {
            ProviderError::InvalidResponse {
                provider: provider.to_string(),
                message: format!("failed to build HTTP client: {e}"),
            }
        })
    }

    /// Map a transport-level `reqwest` failure.
    pub(crate) fn transport_error(
        provider: &str,
        timeout: Duration,
        error: reqwest::Error,
    ) -> ProviderError {
        if error.is_timeout() {
            ProviderError::Timeout { provider: provider.to_string(), timeout }
        } else {
            ProviderError::Unavailable {
                provider: provider.to_string(),
                message: format!("request failed: {error}"),
            }
        }
    }

    /// Pass successful responses through; classify everything else by status code.
    pub(crate) async fn check_response(
        provider: &str,
        response: reqwest::Response,
    ) -> ProviderResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let detail =
            serde_json::from_str::<ErrorEnvelope>(&body).map(|e| e.error.message).unwrap_or(body);

        tracing::error!(provider, %status, "provider returned an error status");
        Err(ProviderError::from_status(provider, status.as_u16(), detail))
    }

    /// Decode a JSON body, mapping failures to [`ProviderError::InvalidResponse`].
    pub(crate) async fn decode<T: serde::de::DeserializeOwned>(
        provider: &str,
        timeout: Duration,
        response: reqwest::Response,
    ) -> ProviderResult<T> {
        let bytes = response.bytes().await.map_err(|e| transport_error(provider, timeout, e))?;
        serde_json::from_slice(&bytes).map_err(|e| ProviderError::InvalidResponse {
            provider: provider.to_string(),
            message: format!("failed to parse response: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn slow_call_becomes_a_retryable_timeout() {
        let result: ProviderResult<()> = with_timeout("slow", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        let err = result.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn fast_call_passes_through() {
        let result = with_timeout("fast", Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
