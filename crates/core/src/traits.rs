use crate::RetrievalError;
use async_trait::async_trait;

/// Text to fixed-length vector. One backend instance means one model identity.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    fn model_id(&self) -> &str;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError>;
}

#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    fn model_id(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String, RetrievalError>;
}

/// Gate applied to a question before any answer is generated.
pub trait QuestionPolicy: Send + Sync {
    fn permits(&self, question: &str, has_context: bool) -> bool;
}
