//! Answer generation from retrieved context.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::document::{Answer, SearchResult};
use crate::error::{ProviderResult, RagError, Result};
use crate::provider::with_timeout;

/// A provider that completes a prompt with a generative model.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Produce the model's completion for `prompt`.
    async fn generate(&self, prompt: &str) -> ProviderResult<String>;

    /// Identifier of the generative model, e.g. `vertex:gemini-1.5-flash`.
    fn model_id(&self) -> &str;
}

/// Instruction template. `{context}` and `{question}` are substituted.
pub const PROMPT_TEMPLATE: &str = "You are a financial assistant. Use the following pieces of \
context to answer the question at the end. If you don't know the answer, just say that you \
don't know, don't try to make up an answer. Keep the answer as concise as possible.

{context}

Question: {question}
Helpful Answer:";

/// Separator between context chunks in the prompt.
pub const CONTEXT_SEPARATOR: &str = "\n\n";

/// Builds a grounded prompt and hands it to a [`GenerationProvider`].
#[derive(Clone)]
pub struct AnswerGenerator {
    provider: Arc<dyn GenerationProvider>,
    timeout: Duration,
}

impl AnswerGenerator {
    /// Create a generator calling `provider` under `timeout`.
    pub fn new(provider: Arc<dyn GenerationProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// The generation provider.
    pub fn provider(&self) -> &Arc<dyn GenerationProvider> {
        &self.provider
    }

    /// Render the prompt for `question` with `context` in the given order.
    pub fn build_prompt(question: &str, context: &[SearchResult]) -> String {
        let joined = context
            .iter()
            .map(|r| r.chunk.text.as_str())
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR);
        // Substitute each slot once so placeholders inside chunk text survive.
        let (head, tail) = PROMPT_TEMPLATE.split_once("{context}").unwrap_or((PROMPT_TEMPLATE, ""));
        format!("{head}{joined}{}", tail.replace("{question}", question))
    }

    /// Answer `question` from `context`.
    ///
    /// # Errors
    ///
    /// [`RagError::GenerationFailed`] carrying the provider failure. Nothing is
    /// retried here.
    pub async fn generate(&self, question: &str, context: Vec<SearchResult>) -> Result<Answer> {
        let prompt = Self::build_prompt(question, &context);
        let model = self.provider.model_id();
        debug!(
            model,
            context_chunks = context.len(),
            prompt_chars = prompt.len(),
            "generating answer"
        );

        let text = with_timeout(model, self.timeout, self.provider.generate(&prompt))
            .await
            .map_err(|e| {
                error!(model, error = %e, retryable = e.is_retryable(), "generation failed");
                RagError::GenerationFailed(e)
            })?;

        Ok(Answer { text: text.trim().to_string(), context })
    }
}
