//! Process settings read from the environment (and `.env`).

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use finrag_rag::{RagConfig, RagError, Result};

/// Which vendor computes embeddings and answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Vertex,
    OpenAI,
}

impl FromStr for ProviderKind {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vertex" | "vertexai" | "google" => Ok(Self::Vertex),
            "openai" => Ok(Self::OpenAI),
            other => Err(RagError::Configuration(format!(
                "FINRAG_PROVIDER must be 'vertex' or 'openai', got '{other}'"
            ))),
        }
    }
}

/// Where query-time context comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// The index built by `finrag index`.
    Local,
    /// A Vertex AI RAG corpus.
    VertexRag,
}

impl FromStr for BackendKind {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "vertex-rag" | "vertex_rag" => Ok(Self::VertexRag),
            other => Err(RagError::Configuration(format!(
                "FINRAG_BACKEND must be 'local' or 'vertex-rag', got '{other}'"
            ))),
        }
    }
}

/// Google Cloud settings.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexSettings {
    pub project_id: String,
    pub region: String,
    pub credentials_file: Option<PathBuf>,
    pub access_token: Option<String>,
}

#[derive(Clone, PartialEq)]
pub struct Settings {
    pub provider: ProviderKind,
    pub backend: BackendKind,
    pub vertex: Option<VertexSettings>,
    pub openai_api_key: Option<String>,
    pub embedding_model: Option<String>,
    pub embedding_dimensions: Option<usize>,
    pub generation_model: Option<String>,
    pub rag_corpus: Option<String>,
    pub data_dir: PathBuf,
    pub index_dir: PathBuf,
    pub rag: RagConfig,
    pub host: String,
    pub port: u16,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("provider", &self.provider)
            .field("backend", &self.backend)
            .field("vertex", &self.vertex.as_ref().map(|v| (&v.project_id, &v.region)))
            .field("embedding_model", &self.embedding_model)
            .field("generation_model", &self.generation_model)
            .field("data_dir", &self.data_dir)
            .field("index_dir", &self.index_dir)
            .field("rag", &self.rag)
            .finish_non_exhaustive()
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| RagError::Configuration(format!("{key}='{raw}' is invalid: {e}"))),
    }
}

impl Settings {
    /// Read settings through `lookup`, which returns `None` for unset or empty keys.
    ///
    /// # Errors
    ///
    /// [`RagError::Configuration`] for unparseable values or a missing
    /// required setting.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let provider = parsed(&lookup, "FINRAG_PROVIDER")?.unwrap_or(ProviderKind::Vertex);
        let backend = parsed(&lookup, "FINRAG_BACKEND")?.unwrap_or(BackendKind::Local);

        let mut rag = RagConfig::builder();
        if let Some(v) = parsed(&lookup, "CHUNK_SIZE")? {
            rag = rag.chunk_size(v);
        }
        if let Some(v) = parsed(&lookup, "CHUNK_OVERLAP")? {
            rag = rag.chunk_overlap(v);
        }
        if let Some(v) = parsed(&lookup, "TOP_K")? {
            rag = rag.top_k(v);
        }
        if let Some(v) = parsed(&lookup, "SIMILARITY_THRESHOLD")? {
            rag = rag.similarity_threshold(v);
        }
        if let Some(v) = parsed(&lookup, "EMBED_BATCH_SIZE")? {
            rag = rag.embed_batch_size(v);
        }
        if let Some(secs) = parsed::<u64>(&lookup, "PROVIDER_TIMEOUT_SECS")? {
            rag = rag.provider_timeout(Duration::from_secs(secs));
        }
        let rag = rag.build()?;

        let needs_vertex = provider == ProviderKind::Vertex || backend == BackendKind::VertexRag;
        let vertex = match lookup("PROJECT_ID") {
            Some(project_id) => Some(VertexSettings {
                project_id,
                region: lookup("REGION").unwrap_or_else(|| "us-central1".to_string()),
                credentials_file: lookup("GOOGLE_APPLICATION_CREDENTIALS").map(PathBuf::from),
                access_token: lookup("GOOGLE_ACCESS_TOKEN"),
            }),
            None if needs_vertex => {
                return Err(RagError::Configuration(
                    "PROJECT_ID is required for Vertex AI".to_string(),
                ));
            }
            None => None,
        };
        if let Some(v) = &vertex {
            if needs_vertex && v.credentials_file.is_none() && v.access_token.is_none() {
                return Err(RagError::Configuration(
                    "set GOOGLE_APPLICATION_CREDENTIALS or GOOGLE_ACCESS_TOKEN for Vertex AI"
                        .to_string(),
                ));
            }
        }

        let openai_api_key = lookup("OPENAI_API_KEY");
        if provider == ProviderKind::OpenAI && openai_api_key.is_none() {
            return Err(RagError::Configuration(
                "OPENAI_API_KEY is required for the openai provider".to_string(),
            ));
        }

        let rag_corpus = lookup("RAG_CORPUS");
        if backend == BackendKind::VertexRag && rag_corpus.is_none() {
            return Err(RagError::Configuration(
                "RAG_CORPUS is required for the vertex-rag backend".to_string(),
            ));
        }

        Ok(Self {
            provider,
            backend,
            vertex,
            openai_api_key,
            embedding_model: lookup("EMBEDDING_MODEL"),
            embedding_dimensions: parsed(&lookup, "EMBEDDING_DIMENSIONS")?,
            generation_model: lookup("GENERATION_MODEL"),
            rag_corpus,
            data_dir: lookup("DATA_DIR").map_or_else(|| PathBuf::from("data"), PathBuf::from),
            index_dir: lookup("INDEX_DIR").map_or_else(|| PathBuf::from("index"), PathBuf::from),
            rag,
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parsed(&lookup, "PORT")?.unwrap_or(8000),
        })
    }

    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Settings::from_lookup(move |key| map.get(key).cloned())
    }

    #[test]
    fn vertex_defaults() {
        let s = settings(&[("PROJECT_ID", "fin-demo"), ("GOOGLE_ACCESS_TOKEN", "ya29.x")]).unwrap();
        assert_eq!(s.provider, ProviderKind::Vertex);
        assert_eq!(s.backend, BackendKind::Local);
        assert_eq!(s.vertex.as_ref().map(|v| v.region.as_str()), Some("us-central1"));
        assert_eq!(s.rag, RagConfig::default());
        assert_eq!(s.data_dir, PathBuf::from("data"));
        assert_eq!(s.index_dir, PathBuf::from("index"));
        assert_eq!((s.host.as_str(), s.port), ("0.0.0.0", 8000));
    }

    #[test]
    fn vertex_without_project_is_rejected() {
        let err = settings(&[("GOOGLE_ACCESS_TOKEN", "ya29.x")]).unwrap_err();
        assert!(err.to_string().contains("PROJECT_ID"));
    }

    #[test]
    fn vertex_without_credentials_is_rejected() {
        let err = settings(&[("PROJECT_ID", "fin-demo")]).unwrap_err();
        assert!(err.to_string().contains("GOOGLE_APPLICATION_CREDENTIALS"));
    }

    #[test]
    fn openai_needs_only_its_key() {
        let s = settings(&[("FINRAG_PROVIDER", "OpenAI"), ("OPENAI_API_KEY", "sk-test")]).unwrap();
        assert_eq!(s.provider, ProviderKind::OpenAI);
        assert!(s.vertex.is_none());

        assert!(settings(&[("FINRAG_PROVIDER", "openai")]).is_err());
    }

    #[test]
    fn corpus_backend_requires_a_corpus() {
        let base =
            [("PROJECT_ID", "p"), ("GOOGLE_ACCESS_TOKEN", "t"), ("FINRAG_BACKEND", "vertex-rag")];
        assert!(settings(&base).is_err());

        let mut with_corpus = base.to_vec();
        with_corpus.push(("RAG_CORPUS", "123"));
        assert_eq!(settings(&with_corpus).unwrap().backend, BackendKind::VertexRag);
    }

    #[test]
    fn chunking_overrides_are_validated() {
        let base = [("FINRAG_PROVIDER", "openai"), ("OPENAI_API_KEY", "k")];

        let mut ok = base.to_vec();
        ok.extend([("CHUNK_SIZE", "500"), ("CHUNK_OVERLAP", "50"), ("TOP_K", "6")]);
        let s = settings(&ok).unwrap();
        assert_eq!((s.rag.chunk_size, s.rag.chunk_overlap, s.rag.top_k), (500, 50, 6));

        let mut bad = base.to_vec();
        bad.extend([("CHUNK_SIZE", "100"), ("CHUNK_OVERLAP", "100")]);
        assert!(matches!(settings(&bad), Err(RagError::Configuration(_))));

        let mut garbage = base.to_vec();
        garbage.push(("PORT", "eighty"));
        assert!(settings(&garbage).unwrap_err().to_string().contains("PORT"));
    }

    #[test]
    fn empty_values_count_as_unset() {
        let s = settings(&[
            ("FINRAG_PROVIDER", "openai"),
            ("OPENAI_API_KEY", "k"),
            ("DATA_DIR", ""),
            ("SIMILARITY_THRESHOLD", " "),
        ])
        .unwrap();
        assert_eq!(s.data_dir, PathBuf::from("data"));
        assert_eq!(s.rag.similarity_threshold, None);
    }
}
