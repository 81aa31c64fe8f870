//! GraphStore adapter: a small capability for persisting typed directed
//! relationships between block ids, plus the in-memory fallback spec.md
//! §4.2 requires to always be available.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::block::Relationship;
use crate::error::MemoryResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighbourDirection {
    Out,
    In,
    Both,
}

/// Contract every graph backend (external service or in-memory fallback)
/// satisfies identically, per spec.md §4.2.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Idempotent on `(source_id, target_id, kind)`.
    async fn upsert(&self, relationship: Relationship) -> MemoryResult<()>;

    async fn neighbours(
        &self,
        id: &str,
        direction: NeighbourDirection,
        kinds: Option<&[String]>,
    ) -> MemoryResult<Vec<Relationship>>;

    async fn remove(&self, source_id: &str, target_id: &str, kind: &str) -> MemoryResult<()>;
}

/// Deterministic, behaviourally-identical in-memory fallback. Selected by
/// `MemoryCore` when an external graph backend is unreachable, logging a
/// degraded-mode warning (spec.md §4.2).
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    edges: RwLock<HashMap<(String, String, String), Relationship>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn upsert(&self, relationship: Relationship) -> MemoryResult<()> {
        let mut edges = self.edges.write().expect("graph store lock poisoned");
        edges.insert(relationship.key(), relationship);
        Ok(())
    }

    async fn neighbours(
        &self,
        id: &str,
        direction: NeighbourDirection,
        kinds: Option<&[String]>,
    ) -> MemoryResult<Vec<Relationship>> {
        let edges = self.edges.read().expect("graph store lock poisoned");
        let mut out: Vec<Relationship> = edges
            .values()
            .filter(|r| match direction {
                NeighbourDirection::Out => r.source_id == id,
                NeighbourDirection::In => r.target_id == id,
                NeighbourDirection::Both => r.source_id == id || r.target_id == id,
            })
            .filter(|r| kinds.map(|ks| ks.iter().any(|k| k == &r.kind)).unwrap_or(true))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(out)
    }

    async fn remove(&self, source_id: &str, target_id: &str, kind: &str) -> MemoryResult<()> {
        let mut edges = self.edges.write().expect("graph store lock poisoned");
        edges.remove(&(source_id.to_string(), target_id.to_string(), kind.to_string()));
        Ok(())
    }
}
