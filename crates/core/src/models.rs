use serde::{Deserialize, Serialize};

pub const DEFAULT_TOP_K: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Document {
    pub source_id: String,
    pub text: String,
}

impl Document {
    pub fn new(source_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            text: text.into(),
        }
    }
}

/// Word range `[start, end)` of one document inside the normalized batch text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceSpan {
    pub source_id: String,
    pub word_start: usize,
    pub word_end: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub chunk_id: String,
    pub position: usize,
    pub word_start: usize,
    pub word_end: usize,
    pub sources: Vec<String>,
    pub text: String,
}

impl Chunk {
    pub fn word_count(&self) -> usize {
        self.word_end - self.word_start
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RetrievalResult {
    pub rank: usize,
    pub position: usize,
    pub distance: f32,
    pub text: String,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalOptions {
    pub top_k: usize,
    /// Hits farther than this squared distance are dropped.
    pub max_distance: Option<f32>,
}

impl RetrievalOptions {
    pub fn top_k(top_k: usize) -> Self {
        Self {
            top_k,
            ..Self::default()
        }
    }

    pub fn with_max_distance(mut self, max_distance: f32) -> Self {
        self.max_distance = Some(max_distance);
        self
    }
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            max_distance: None,
        }
    }
}
