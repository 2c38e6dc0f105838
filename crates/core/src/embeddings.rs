use crate::error::{Result, RetrievalError};
use crate::traits::EmbeddingBackend;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::debug;
use url::Url;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 384;
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "all-minilm";

/// Batch front-end over an [`EmbeddingBackend`] that enforces a consistent output shape.
#[derive(Clone)]
pub struct Embedder {
    backend: Arc<dyn EmbeddingBackend>,
}

impl Embedder {
    pub fn new(backend: Arc<dyn EmbeddingBackend>) -> Self {
        Self { backend }
    }

    pub fn model_id(&self) -> &str {
        self.backend.model_id()
    }

    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let vectors = self.backend.embed_batch(texts).await?;

        if vectors.len() != texts.len() {
            return Err(RetrievalError::unavailable(
                self.model_id(),
                format!("returned {} vectors for {} inputs", vectors.len(), texts.len()),
            ));
        }

        let dimensions = vectors[0].len();
        if let Some(odd) = vectors.iter().find(|vector| vector.len() != dimensions) {
            return Err(RetrievalError::DimensionMismatch {
                expected: dimensions,
                actual: odd.len(),
            });
        }

        debug!(
            model = self.model_id(),
            count = vectors.len(),
            dimensions,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "embedded batch"
        );
        Ok(vectors)
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| RetrievalError::unavailable(self.model_id(), "empty embedding response"))
    }
}

/// Offline embedder that hashes character trigrams into buckets.
#[derive(Debug, Clone)]
pub struct HashingBackend {
    dimensions: usize,
    model_id: String,
}

impl HashingBackend {
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self {
            dimensions,
            model_id: format!("hashing-trigram-{dimensions}"),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let mut hash = 1469598103934665603u64;
            for ch in window {
                let mut buffer = [0u8; 4];
                for byte in ch.encode_utf8(&mut buffer).bytes() {
                    hash ^= byte as u64;
                    hash = hash.wrapping_mul(1099511628211);
                }
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

impl Default for HashingBackend {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIMENSIONS)
    }
}

#[async_trait]
impl EmbeddingBackend for HashingBackend {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}

/// Embeddings served by an Ollama instance (`POST /api/embed`).
pub struct OllamaBackend {
    client: Client,
    endpoint: Url,
    model: String,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaBackend {
    pub fn new(base_url: &str, model: impl Into<String>) -> Result<Self> {
        let endpoint = Url::parse(base_url)?.join("api/embed")?;
        Ok(Self {
            client: Client::new(),
            endpoint,
            model: model.into(),
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaBackend {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&json!({ "model": self.model, "input": texts }))
            .send()
            .await
            .map_err(|error| RetrievalError::unavailable("ollama", error))?;

        if !response.status().is_success() {
            return Err(RetrievalError::unavailable(
                "ollama",
                format!("{} returned {}", self.endpoint, response.status()),
            ));
        }

        let parsed: OllamaEmbedResponse = response
            .json()
            .await
            .map_err(|error| RetrievalError::unavailable("ollama", error))?;
        Ok(parsed.embeddings)
    }
}

type BackendFactory = dyn Fn() -> Result<Arc<dyn EmbeddingBackend>> + Send + Sync;

/// Builds the wrapped backend on the first embedding call and shares it afterwards.
///
/// Model loading can be slow (downloads, ONNX session setup), so the factory runs
/// on the blocking pool.
pub struct LazyBackend {
    model_id: String,
    factory: Arc<BackendFactory>,
    backend: OnceCell<Arc<dyn EmbeddingBackend>>,
}

impl LazyBackend {
    pub fn new<F>(model_id: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn EmbeddingBackend>> + Send + Sync + 'static,
    {
        Self {
            model_id: model_id.into(),
            factory: Arc::new(factory),
            backend: OnceCell::new(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.backend.initialized()
    }

    async fn backend(&self) -> Result<&Arc<dyn EmbeddingBackend>> {
        let factory = Arc::clone(&self.factory);
        let model_id = self.model_id.clone();
        self.backend
            .get_or_try_init(|| async move {
                tokio::task::spawn_blocking(move || (*factory)())
                    .await
                    .map_err(|error| RetrievalError::unavailable(&model_id, error))?
            })
            .await
    }
}

#[async_trait]
impl EmbeddingBackend for LazyBackend {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.backend().await?.embed_batch(texts).await
    }
}

#[cfg(feature = "local-embeddings")]
pub use local::FastembedBackend;

#[cfg(feature = "local-embeddings")]
mod local {
    use super::*;
    use std::sync::Mutex;

    pub const MODEL_ID: &str = "all-minilm-l6-v2";

    /// Local all-MiniLM-L6-v2 (384 dimensions) through fastembed.
    pub struct FastembedBackend {
        model: Arc<Mutex<fastembed::TextEmbedding>>,
    }

    impl FastembedBackend {
        pub fn try_new() -> Result<Self> {
            let model = fastembed::TextEmbedding::try_new(fastembed::InitOptions::new(
                fastembed::EmbeddingModel::AllMiniLML6V2,
            ))
            .map_err(|error| RetrievalError::unavailable("fastembed", error))?;

            Ok(Self {
                model: Arc::new(Mutex::new(model)),
            })
        }
    }

    #[async_trait]
    impl EmbeddingBackend for FastembedBackend {
        fn model_id(&self) -> &str {
            MODEL_ID
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let model = Arc::clone(&self.model);
            let texts = texts.to_vec();

            tokio::task::spawn_blocking(move || {
                let mut model = model
                    .lock()
                    .map_err(|error| RetrievalError::unavailable("fastembed", error))?;
                model
                    .embed(texts, None)
                    .map_err(|error| RetrievalError::unavailable("fastembed", error))
            })
            .await
            .map_err(|error| RetrievalError::unavailable("fastembed", error))?
        }
    }
}
