//! VectorStore adapter: `(block_id -> embedding, metadata)` with top-k
//! cosine-similarity query, plus the in-memory fallback spec.md §4.3
//! requires to always be available.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::block::VectorMetadata;
use crate::error::MemoryResult;

/// One hit from a [`VectorStore::query`] call.
#[derive(Debug, Clone)]
pub struct VectorQueryHit {
    pub block_id: String,
    pub cosine_similarity: f32,
    pub metadata: VectorMetadata,
}

/// Contract every vector backend (external service or in-memory fallback)
/// satisfies identically, per spec.md §4.3.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Replaces any existing entry for `block_id` (at most one per block).
    async fn upsert(&self, block_id: &str, embedding: Vec<f32>, metadata: VectorMetadata) -> MemoryResult<()>;

    async fn delete(&self, block_id: &str) -> MemoryResult<()>;

    /// Top-`k` nearest neighbours by cosine similarity, optionally filtered
    /// to a set of candidate block ids.
    async fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filter: Option<&[String]>,
    ) -> MemoryResult<Vec<VectorQueryHit>>;

    /// Clears the entire collection (used for catalogue-wide reindex).
    async fn reset(&self) -> MemoryResult<()>;

    async fn len(&self) -> MemoryResult<usize>;
}

/// Cosine similarity in `[-1, 1]`. Returns `0.0` for mismatched lengths,
/// empty vectors, or zero-magnitude vectors — lifted from the teacher's
/// `memory.rs::cosine_similarity`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        0.0
    } else {
        (dot / (mag_a * mag_b)).clamp(-1.0, 1.0)
    }
}

struct Entry {
    embedding: Vec<f32>,
    metadata: VectorMetadata,
}

/// Brute-force O(n*d) cosine scan — the same bound the teacher's own doc
/// comments describe for its flat-file vector index.
#[derive(Default)]
pub struct InMemoryVectorStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, block_id: &str, embedding: Vec<f32>, metadata: VectorMetadata) -> MemoryResult<()> {
        let mut entries = self.entries.write().expect("vector store lock poisoned");
        entries.insert(block_id.to_string(), Entry { embedding, metadata });
        Ok(())
    }

    async fn delete(&self, block_id: &str) -> MemoryResult<()> {
        let mut entries = self.entries.write().expect("vector store lock poisoned");
        entries.remove(block_id);
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filter: Option<&[String]>,
    ) -> MemoryResult<Vec<VectorQueryHit>> {
        let entries = self.entries.read().expect("vector store lock poisoned");
        let mut hits: Vec<VectorQueryHit> = entries
            .iter()
            .filter(|entry| {
                let id: &String = entry.0;
                filter.map(|ids| ids.iter().any(|f| f == id)).unwrap_or(true)
            })
            .map(|(id, entry)| VectorQueryHit {
                block_id: id.clone(),
                cosine_similarity: cosine_similarity(embedding, &entry.embedding),
                metadata: entry.metadata.clone(),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.cosine_similarity
                .partial_cmp(&a.cosine_similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.block_id.cmp(&b.block_id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn reset(&self) -> MemoryResult<()> {
        let mut entries = self.entries.write().expect("vector store lock poisoned");
        entries.clear();
        Ok(())
    }

    async fn len(&self) -> MemoryResult<usize> {
        Ok(self.entries.read().expect("vector store lock poisoned").len())
    }
}
