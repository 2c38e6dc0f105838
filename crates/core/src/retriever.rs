use crate::embeddings::Embedder;
use crate::error::{Result, RetrievalError};
use crate::index::Neighbor;
use crate::models::{RetrievalOptions, RetrievalResult};
use crate::store::{IndexSnapshot, SharedIndex};
use std::sync::Arc;
use tracing::debug;

/// Answers similarity queries against whatever snapshot is published when the
/// query starts.
#[derive(Clone)]
pub struct Retriever {
    embedder: Embedder,
    index: Arc<SharedIndex>,
}

impl Retriever {
    pub fn new(embedder: Embedder, index: Arc<SharedIndex>) -> Self {
        Self { embedder, index }
    }

    pub fn shared_index(&self) -> &Arc<SharedIndex> {
        &self.index
    }

    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievalResult>> {
        self.retrieve_with(query, RetrievalOptions::top_k(top_k))
            .await
    }

    pub async fn retrieve_with(
        &self,
        query: &str,
        options: RetrievalOptions,
    ) -> Result<Vec<RetrievalResult>> {
        let snapshot = self.index.snapshot();
        if snapshot.is_empty() || options.top_k == 0 {
            debug!(
                chunk_count = snapshot.len(),
                top_k = options.top_k,
                "nothing to retrieve"
            );
            return Ok(Vec::new());
        }

        snapshot.ensure_model(self.embedder.model_id())?;
        let query_vector = self.embedder.embed_query(query).await?;
        let neighbors = snapshot.index().search(&query_vector, options.top_k)?;
        let results = resolve_neighbors(&snapshot, neighbors, options.max_distance)?;

        debug!(
            top_k = options.top_k,
            returned = results.len(),
            nearest = results.first().map(|result| result.distance),
            "retrieved chunks"
        );
        Ok(results)
    }
}

fn resolve_neighbors(
    snapshot: &IndexSnapshot,
    neighbors: Vec<Neighbor>,
    max_distance: Option<f32>,
) -> Result<Vec<RetrievalResult>> {
    neighbors
        .into_iter()
        .filter(|neighbor| max_distance.map_or(true, |max| neighbor.distance <= max))
        .enumerate()
        .map(|(rank, neighbor)| {
            let chunk = snapshot.chunk(neighbor.position).ok_or_else(|| {
                RetrievalError::IndexCorrupted(format!(
                    "row {} has no metadata ({} chunks stored)",
                    neighbor.position,
                    snapshot.len()
                ))
            })?;

            Ok(RetrievalResult {
                rank: rank + 1,
                position: neighbor.position,
                distance: neighbor.distance,
                text: chunk.text.clone(),
                sources: chunk.sources.clone(),
            })
        })
        .collect()
}
