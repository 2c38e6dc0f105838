use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("docx parse error: {0}")]
    Docx(String),

    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("backend {backend} unavailable: {details}")]
    BackendUnavailable { backend: String, details: String },

    #[error("index corrupted: {0}")]
    IndexCorrupted(String),

    #[error("generation failed: {0}")]
    GenerationError(String),

    #[error("index was built with model {indexed}, but {configured} is configured")]
    IncompatibleModel { indexed: String, configured: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

impl RetrievalError {
    pub(crate) fn unavailable(backend: &str, details: impl ToString) -> Self {
        Self::BackendUnavailable {
            backend: backend.to_string(),
            details: details.to_string(),
        }
    }
}

pub type Result<T, E = RetrievalError> = std::result::Result<T, E>;
