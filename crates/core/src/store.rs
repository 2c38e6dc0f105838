use crate::error::{Result, RetrievalError};
use crate::index::FlatIndex;
use crate::models::Chunk;
use arc_swap::ArcSwap;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A vector index together with the chunk metadata for each of its rows.
///
/// Row `i` of the index always corresponds to `chunks[i]`; construction fails
/// otherwise, so a snapshot in hand is always consistent.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    index: FlatIndex,
    chunks: Vec<Chunk>,
    model_id: String,
    built_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedSnapshot {
    format_version: u32,
    model_id: String,
    built_at: DateTime<Utc>,
    checksum: String,
    index: String,
    chunks: Vec<Chunk>,
}

impl IndexSnapshot {
    pub fn new(
        index: FlatIndex,
        chunks: Vec<Chunk>,
        model_id: impl Into<String>,
        built_at: DateTime<Utc>,
    ) -> Result<Self> {
        if index.len() != chunks.len() {
            return Err(RetrievalError::IndexCorrupted(format!(
                "index has {} rows but metadata has {} chunks",
                index.len(),
                chunks.len()
            )));
        }
        if let Some(chunk) = chunks
            .iter()
            .enumerate()
            .find_map(|(row, chunk)| (chunk.position != row).then_some(chunk))
        {
            return Err(RetrievalError::IndexCorrupted(format!(
                "chunk {} is stored out of position",
                chunk.position
            )));
        }

        Ok(Self {
            index,
            chunks,
            model_id: model_id.into(),
            built_at,
        })
    }

    pub fn empty(model_id: impl Into<String>) -> Self {
        Self {
            index: FlatIndex::default(),
            chunks: Vec::new(),
            model_id: model_id.into(),
            built_at: Utc::now(),
        }
    }

    pub fn index(&self) -> &FlatIndex {
        &self.index
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn chunk(&self, position: usize) -> Option<&Chunk> {
        self.chunks.get(position)
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn ensure_model(&self, model_id: &str) -> Result<()> {
        if self.model_id != model_id {
            return Err(RetrievalError::IncompatibleModel {
                indexed: self.model_id.clone(),
                configured: model_id.to_string(),
            });
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let index_bytes = self.index.to_bytes();
        let persisted = PersistedSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            model_id: self.model_id.clone(),
            built_at: self.built_at,
            checksum: checksum(&index_bytes, &self.chunks)?,
            index: STANDARD.encode(&index_bytes),
            chunks: self.chunks.clone(),
        };
        Ok(serde_json::to_vec(&persisted)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let persisted: PersistedSnapshot = serde_json::from_slice(bytes)
            .map_err(|error| RetrievalError::IndexCorrupted(format!("unreadable snapshot: {error}")))?;

        if persisted.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(RetrievalError::IndexCorrupted(format!(
                "unsupported snapshot format version {}",
                persisted.format_version
            )));
        }

        let index_bytes = STANDARD
            .decode(persisted.index.as_bytes())
            .map_err(|error| RetrievalError::IndexCorrupted(format!("bad index encoding: {error}")))?;

        if checksum(&index_bytes, &persisted.chunks)? != persisted.checksum {
            return Err(RetrievalError::IndexCorrupted(
                "checksum does not match index and metadata".to_string(),
            ));
        }

        let index = FlatIndex::from_bytes(&index_bytes)?;
        Self::new(index, persisted.chunks, persisted.model_id, persisted.built_at)
    }

    /// Writes the snapshot next to `path` and renames it into place.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let staging = path.with_extension(format!("tmp-{}", Uuid::new_v4()));
        fs::write(&staging, self.to_bytes()?)?;
        if let Err(error) = fs::rename(&staging, path) {
            let _ = fs::remove_file(&staging);
            return Err(error.into());
        }

        info!(
            path = %path.display(),
            chunk_count = self.len(),
            model = %self.model_id,
            "saved index snapshot"
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let snapshot = Self::from_bytes(&bytes)?;
        info!(
            path = %path.display(),
            chunk_count = snapshot.len(),
            dimensions = snapshot.index.dimensions(),
            model = %snapshot.model_id,
            "loaded index snapshot"
        );
        Ok(snapshot)
    }
}

/// Covers the index blob and every chunk field, so edits to provenance are
/// caught as well as edits to text.
fn checksum(index_bytes: &[u8], chunks: &[Chunk]) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update((index_bytes.len() as u64).to_le_bytes());
    hasher.update(index_bytes);
    hasher.update(serde_json::to_vec(chunks)?);
    Ok(format!("{:x}", hasher.finalize()))
}

/// The currently published snapshot. Readers take an `Arc` and keep a consistent
/// view for as long as they hold it; publishing swaps the pointer in one step.
pub struct SharedIndex {
    current: ArcSwap<IndexSnapshot>,
}

impl SharedIndex {
    pub fn new(snapshot: IndexSnapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(snapshot),
        }
    }

    pub fn empty(model_id: impl Into<String>) -> Self {
        Self::new(IndexSnapshot::empty(model_id))
    }

    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.current.load_full()
    }

    /// Replaces the published snapshot and returns the previous one.
    pub fn publish(&self, snapshot: IndexSnapshot) -> Arc<IndexSnapshot> {
        self.publish_arc(Arc::new(snapshot))
    }

    pub fn publish_arc(&self, snapshot: Arc<IndexSnapshot>) -> Arc<IndexSnapshot> {
        self.current.swap(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::tempdir;

    fn chunk(position: usize, text: &str) -> Chunk {
        Chunk {
            chunk_id: format!("chunk-{position}"),
            position,
            word_start: position,
            word_end: position + 1,
            sources: vec!["notes.txt".to_string()],
            text: text.to_string(),
        }
    }

    fn snapshot(rows: usize) -> IndexSnapshot {
        let vectors = (0..rows).map(|row| vec![row as f32, 1.0]).collect::<Vec<_>>();
        let chunks = (0..rows).map(|row| chunk(row, &format!("text {row}"))).collect();
        IndexSnapshot::new(FlatIndex::build(&vectors).unwrap(), chunks, "test-model", Utc::now())
            .unwrap()
    }

    #[test]
    fn row_and_metadata_counts_must_agree() {
        let index = FlatIndex::build(&[vec![1.0], vec![2.0]]).unwrap();
        let result = IndexSnapshot::new(index, vec![chunk(0, "only one")], "m", Utc::now());
        assert!(matches!(result, Err(RetrievalError::IndexCorrupted(_))));
    }

    #[test]
    fn chunks_must_be_in_row_order() {
        let index = FlatIndex::build(&[vec![1.0], vec![2.0]]).unwrap();
        let result = IndexSnapshot::new(index, vec![chunk(1, "b"), chunk(0, "a")], "m", Utc::now());
        assert!(matches!(result, Err(RetrievalError::IndexCorrupted(_))));
    }

    #[test]
    fn bytes_round_trip_preserves_search() {
        let original = snapshot(5);
        let restored = IndexSnapshot::from_bytes(&original.to_bytes().unwrap()).unwrap();

        assert_eq!(restored.chunks(), original.chunks());
        assert_eq!(restored.model_id(), "test-model");
        assert_eq!(restored.built_at(), original.built_at());
        assert_eq!(
            restored.index().search(&[2.2, 1.0], 3).unwrap(),
            original.index().search(&[2.2, 1.0], 3).unwrap()
        );
    }

    #[test]
    fn tampered_metadata_fails_checksum() {
        let original = snapshot(3);
        let mut persisted: PersistedSnapshot =
            serde_json::from_slice(&original.to_bytes().unwrap()).unwrap();
        persisted.chunks[1].text = "swapped text".to_string();
        let bytes = serde_json::to_vec(&persisted).unwrap();

        let result = IndexSnapshot::from_bytes(&bytes);
        assert!(matches!(result, Err(RetrievalError::IndexCorrupted(_))));
    }

    #[test]
    fn tampered_provenance_fails_checksum() {
        let original = snapshot(3);
        let edits: [fn(&mut Chunk); 3] = [
            |chunk| chunk.sources = vec!["forged.txt".to_string()],
            |chunk| chunk.chunk_id = "forged".to_string(),
            |chunk| chunk.word_end += 1,
        ];

        for edit in edits {
            let mut persisted: PersistedSnapshot =
                serde_json::from_slice(&original.to_bytes().unwrap()).unwrap();
            edit(&mut persisted.chunks[2]);
            let bytes = serde_json::to_vec(&persisted).unwrap();

            let result = IndexSnapshot::from_bytes(&bytes);
            assert!(matches!(result, Err(RetrievalError::IndexCorrupted(_))));
        }
    }

    #[test]
    fn garbage_is_reported_as_corruption() {
        let result = IndexSnapshot::from_bytes(b"{not json");
        assert!(matches!(result, Err(RetrievalError::IndexCorrupted(_))));
    }

    #[test]
    fn save_and_load_from_disk() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("nested").join("index.json");
        let original = snapshot(4);

        original.save(&path)?;
        let loaded = IndexSnapshot::load(&path)?;
        assert_eq!(loaded.len(), 4);
        assert_eq!(loaded.chunk(3).map(|chunk| chunk.text.as_str()), Some("text 3"));

        let leftovers = fs::read_dir(path.parent().unwrap())?.count();
        assert_eq!(leftovers, 1);
        Ok(())
    }

    #[test]
    fn model_identity_is_enforced() {
        let snapshot = snapshot(1);
        assert!(snapshot.ensure_model("test-model").is_ok());
        assert!(matches!(
            snapshot.ensure_model("other-model"),
            Err(RetrievalError::IncompatibleModel { .. })
        ));
    }

    #[test]
    fn readers_never_observe_a_torn_snapshot() {
        let shared = Arc::new(SharedIndex::empty("test-model"));

        let readers = (0..4)
            .map(|_| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let current = shared.snapshot();
                        assert_eq!(current.index().len(), current.chunks().len());
                    }
                })
            })
            .collect::<Vec<_>>();

        for rows in 1..50 {
            shared.publish(snapshot(rows));
        }

        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(shared.snapshot().len(), 49);
    }
}
