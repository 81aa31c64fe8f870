//! Embedder adapter: an opaque `text -> unit vector` function. Failure is
//! terminal for `encode`/`retrieve` (spec.md §4.9, §7) — there is no
//! in-memory fallback, unlike GraphStore/VectorStore.

use async_trait::async_trait;

use crate::error::{MemoryError, MemoryResult};

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Produce a unit-norm vector of `dim()` dimensions for `text`.
    async fn embed(&self, text: &str) -> MemoryResult<Vec<f32>>;

    fn dim(&self) -> usize;
}

/// A deterministic, dependency-free embedder for local development and
/// tests: hashes the text into a fixed-dimension vector via a simple
/// bag-of-characters projection, then normalises to unit length. Not a
/// production embedding model — the real provider is external per
/// spec.md §1 and is selected via `Config.backend` in a real deployment.
pub struct DeterministicEmbedder {
    dim: usize,
}

impl DeterministicEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

#[async_trait]
impl Embedder for DeterministicEmbedder {
    async fn embed(&self, text: &str) -> MemoryResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(MemoryError::invalid("encode", "cannot embed empty text"));
        }
        let mut v = vec![0.0_f32; self.dim];
        for (i, byte) in text.bytes().enumerate() {
            let slot = (i + byte as usize) % self.dim;
            v[slot] += ((byte as f32) - 128.0) / 128.0;
        }
        let magnitude: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for x in &mut v {
                *x /= magnitude;
            }
        }
        Ok(v)
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embed_is_deterministic() {
        let e = DeterministicEmbedder::new(32);
        let a = e.embed("hello world").await.unwrap();
        let b = e.embed("hello world").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn embed_produces_unit_vector() {
        let e = DeterministicEmbedder::new(32);
        let v = e.embed("some text here").await.unwrap();
        let magnitude: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-4, "embedding must be unit-norm, got {magnitude}");
    }

    #[tokio::test]
    async fn embed_rejects_empty_text() {
        let e = DeterministicEmbedder::new(32);
        let err = e.embed("   ").await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Invalid);
    }

    #[tokio::test]
    async fn different_text_produces_different_vectors() {
        let e = DeterministicEmbedder::new(32);
        let a = e.embed("alpha").await.unwrap();
        let b = e.embed("beta gamma delta").await.unwrap();
        assert_ne!(a, b);
    }
}
