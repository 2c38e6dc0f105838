pub mod answer;
pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod index;
pub mod ingest;
pub mod models;
pub mod policy;
pub mod retriever;
pub mod store;
pub mod traits;

pub use answer::{
    build_prompt, Answer, AnswerComposer, GeminiBackend, GroundingContext, DEFAULT_GEMINI_MODEL,
    DEFAULT_TEMPERATURE, NOT_ENOUGH_INFORMATION,
};
pub use chunking::{
    build_chunks, chunk_words, normalize_batch, normalize_whitespace, BatchText, ChunkingConfig,
    DEFAULT_OVERLAP, DEFAULT_WINDOW,
};
pub use embeddings::{
    Embedder, HashingBackend, LazyBackend, OllamaBackend, DEFAULT_EMBEDDING_DIMENSIONS,
    DEFAULT_OLLAMA_MODEL, DEFAULT_OLLAMA_URL,
};
#[cfg(feature = "local-embeddings")]
pub use embeddings::FastembedBackend;
pub use error::{IngestError, Result, RetrievalError};
pub use extractor::{load_document, DocumentFormat};
pub use index::{FlatIndex, Neighbor};
pub use ingest::{discover_documents, load_folder_best_effort, Indexer, LoadReport, SkippedFile};
pub use models::{
    Chunk, Document, RetrievalOptions, RetrievalResult, SourceSpan, DEFAULT_TOP_K,
};
pub use policy::{AllowAll, KeywordPolicy};
pub use retriever::Retriever;
pub use store::{IndexSnapshot, SharedIndex};
pub use traits::{EmbeddingBackend, GenerativeBackend, QuestionPolicy};
