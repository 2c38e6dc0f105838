use crate::error::{Result, RetrievalError};
use crate::models::{Chunk, Document, SourceSpan};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const DEFAULT_WINDOW: usize = 500;
pub const DEFAULT_OVERLAP: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub window: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    pub fn new(window: usize, overlap: usize) -> Result<Self> {
        let config = Self { window, overlap };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.window == 0 {
            return Err(RetrievalError::InvalidConfiguration(
                "chunk window must be at least one word".to_string(),
            ));
        }
        if self.overlap >= self.window {
            return Err(RetrievalError::InvalidConfiguration(format!(
                "chunk overlap {} must be smaller than window {}",
                self.overlap, self.window
            )));
        }
        Ok(())
    }

    /// Words the window start advances by between chunks.
    pub fn stride(&self) -> usize {
        self.window - self.overlap
    }
}

/// Normalized text of a whole ingestion batch, with each document's word span.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchText {
    pub text: String,
    pub spans: Vec<SourceSpan>,
}

impl BatchText {
    pub fn word_count(&self) -> usize {
        self.spans.last().map_or(0, |span| span.word_end)
    }
}

/// Collapses every whitespace run to one space and strips control characters.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace()
        .map(|word| word.replace(|ch: char| ch.is_control(), ""))
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn normalize_batch(documents: &[Document]) -> BatchText {
    let mut batch = BatchText::default();
    let mut cursor = 0;

    for document in documents {
        let normalized = normalize_whitespace(&document.text);
        if normalized.is_empty() {
            continue;
        }

        let words = normalized.split(' ').count();
        if !batch.text.is_empty() {
            batch.text.push(' ');
        }
        batch.text.push_str(&normalized);
        batch.spans.push(SourceSpan {
            source_id: document.source_id.clone(),
            word_start: cursor,
            word_end: cursor + words,
        });
        cursor += words;
    }

    batch
}

/// Word ranges `[start, end)` covered by each chunk over `word_count` words.
///
/// A window starting inside the previous window's overlap tail would hold only
/// words already emitted, so the walk stops after the first window that reaches
/// the end of the text.
fn word_windows(
    word_count: usize,
    config: ChunkingConfig,
) -> impl Iterator<Item = (usize, usize)> {
    (0..word_count)
        .step_by(config.stride())
        .take_while(move |&start| start == 0 || start + config.overlap < word_count)
        .map(move |start| (start, (start + config.window).min(word_count)))
}

pub fn chunk_words(text: &str, config: ChunkingConfig) -> Result<Vec<String>> {
    config.validate()?;
    let words = text.split_whitespace().collect::<Vec<_>>();

    Ok(word_windows(words.len(), config)
        .map(|(start, end)| words[start..end].join(" "))
        .collect())
}

pub fn build_chunks(batch: &BatchText, config: ChunkingConfig) -> Result<Vec<Chunk>> {
    config.validate()?;
    let words = batch.text.split_whitespace().collect::<Vec<_>>();

    let chunks = word_windows(words.len(), config)
        .enumerate()
        .map(|(position, (start, end))| {
            let text = words[start..end].join(" ");
            Chunk {
                chunk_id: make_chunk_id(position, &text),
                position,
                word_start: start,
                word_end: end,
                sources: sources_in_range(&batch.spans, start, end),
                text,
            }
        })
        .collect();

    Ok(chunks)
}

fn sources_in_range(spans: &[SourceSpan], start: usize, end: usize) -> Vec<String> {
    spans
        .iter()
        .filter(|span| span.word_start < end && span.word_end > start)
        .map(|span| span.source_id.clone())
        .collect()
}

fn make_chunk_id(position: usize, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update((position as u64).to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
