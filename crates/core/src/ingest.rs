use crate::chunking::{build_chunks, normalize_batch, ChunkingConfig};
use crate::embeddings::Embedder;
use crate::error::Result;
use crate::extractor::{load_document, DocumentFormat};
use crate::index::FlatIndex;
use crate::models::Document;
use crate::store::{IndexSnapshot, SharedIndex};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use walkdir::WalkDir;

pub fn discover_documents(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        if DocumentFormat::from_path(entry.path()).is_some() {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

#[derive(Debug)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub documents: Vec<Document>,
    pub skipped_files: Vec<SkippedFile>,
}

/// Loads every supported file under `folder`, recording the ones that fail.
///
/// A missing or empty folder is not an error: it produces an empty report, which
/// indexes to an empty snapshot.
pub fn load_folder_best_effort(folder: &Path) -> LoadReport {
    let mut report = LoadReport::default();

    if !folder.is_dir() {
        warn!(folder = %folder.display(), "input folder is missing");
        return report;
    }

    for path in discover_documents(folder) {
        match load_document(&path) {
            Ok(document) => report.documents.push(document),
            Err(error) => report.skipped_files.push(SkippedFile {
                path,
                reason: error.to_string(),
            }),
        }
    }

    report
}

/// Runs normalize, chunk, embed and index over one ingestion batch.
#[derive(Clone)]
pub struct Indexer {
    embedder: Embedder,
    chunking: ChunkingConfig,
}

impl Indexer {
    pub fn new(embedder: Embedder, chunking: ChunkingConfig) -> Result<Self> {
        chunking.validate()?;
        Ok(Self { embedder, chunking })
    }

    pub async fn build(&self, documents: &[Document]) -> Result<IndexSnapshot> {
        let started = Instant::now();
        let batch = normalize_batch(documents);
        let chunks = build_chunks(&batch, self.chunking)?;

        let texts = chunks
            .iter()
            .map(|chunk| chunk.text.clone())
            .collect::<Vec<_>>();
        let vectors = self.embedder.embed(&texts).await?;
        let index = FlatIndex::build(&vectors)?;
        let dimensions = index.dimensions();

        let snapshot = IndexSnapshot::new(index, chunks, self.embedder.model_id(), Utc::now())?;

        info!(
            documents = documents.len(),
            words = batch.word_count(),
            chunk_count = snapshot.len(),
            dimensions,
            model = self.embedder.model_id(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "built index snapshot"
        );
        Ok(snapshot)
    }

    /// Builds a fresh snapshot and publishes it only once the whole batch succeeded.
    pub async fn rebuild(
        &self,
        shared: &SharedIndex,
        documents: &[Document],
    ) -> Result<Arc<IndexSnapshot>> {
        let snapshot = Arc::new(self.build(documents).await?);
        shared.publish_arc(Arc::clone(&snapshot));
        Ok(snapshot)
    }
}
