//! Deterministic in-process providers for tests and offline runs.
//!
//! Neither provider touches the network, so a whole index-then-query cycle can
//! run with no credentials.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;
use crate::error::{ProviderError, ProviderResult};
use crate::generation::GenerationProvider;

/// Hash-based embeddings: equal texts always map to equal unit vectors.
pub struct MockEmbeddingProvider {
    dimensions: usize,
    model_id: String,
    overrides: HashMap<String, Vec<f32>>,
    failure: Option<ProviderError>,
    calls: AtomicUsize,
}

impl MockEmbeddingProvider {
    /// A provider producing `dimensions`-long vectors under model id `mock:hash-<dimensions>`.
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            model_id: format!("mock:hash-{dimensions}"),
            overrides: HashMap::new(),
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Report a different model id.
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    /// Return `vector` verbatim whenever `text` is embedded.
    pub fn with_vector(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.overrides.insert(text.into(), vector);
        self
    }

    /// Fail every call with `error`.
    pub fn failing(mut self, error: ProviderError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Number of `embed` calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hash_vector(&self, text: &str) -> Vec<f32> {
        let hash =
            text.bytes().fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(b)));
        let mut emb: Vec<f32> =
            (0..self.dimensions).map(|i| (hash.wrapping_add(i as u64) as f32).sin()).collect();
        let norm: f32 = emb.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            emb.iter_mut().for_each(|x| *x /= norm);
        }
        emb
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        Ok(self.overrides.get(text).cloned().unwrap_or_else(|| self.hash_vector(text)))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Records every prompt and replies with a fixed answer or error.
pub struct MockGenerationProvider {
    reply: ProviderResult<String>,
    prompts: Mutex<Vec<String>>,
}

impl MockGenerationProvider {
    /// Reply `answer` to every prompt.
    pub fn answering(answer: impl Into<String>) -> Self {
        Self { reply: Ok(answer.into()), prompts: Mutex::new(Vec::new()) }
    }

    /// Fail every prompt with `error`.
    pub fn failing(error: ProviderError) -> Self {
        Self { reply: Err(error), prompts: Mutex::new(Vec::new()) }
    }

    /// Prompts received so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl GenerationProvider for MockGenerationProvider {
    async fn generate(&self, prompt: &str) -> ProviderResult<String> {
        self.prompts.lock().unwrap_or_else(|p| p.into_inner()).push(prompt.to_string());
        self.reply.clone()
    }

    fn model_id(&self) -> &str {
        "mock:echo"
    }
}
