//! Lifecycle manager: archives stale or rarely-used blocks, and reverses
//! that decision on demand (spec.md §4.8).

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::block::{KnowledgeBlock, VectorMetadata};
use crate::config::DecayConfig;
use crate::embedder::Embedder;
use crate::error::MemoryResult;
use crate::store::block_store::BlockStore;
use crate::store::vector_store::VectorStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecayPolicy {
    Time,
    Usage,
    Both,
}

pub struct DecayManager {
    block_store: Arc<BlockStore>,
    vector_store: Arc<dyn VectorStore>,
    config: DecayConfig,
}

impl DecayManager {
    pub fn new(block_store: Arc<BlockStore>, vector_store: Arc<dyn VectorStore>, config: DecayConfig) -> Self {
        Self { block_store, vector_store, config }
    }

    /// Sweeps every non-archived block, archiving those that match
    /// `policy`. Returns the ids archived in this cycle, in scan order.
    pub async fn run_decay_cycle(&self, policy: DecayPolicy) -> MemoryResult<Vec<String>> {
        let ids = self.block_store.list()?;
        let mut blocks = Vec::with_capacity(ids.len());
        for id in &ids {
            blocks.push(self.block_store.read(id)?);
        }

        let total_accesses: u64 = blocks.iter().map(|b| b.access_count).sum();
        let now = Utc::now();

        let mut archived = Vec::new();
        for block in &blocks {
            if self.should_archive(block, total_accesses, now, policy) {
                self.vector_store.delete(&block.id).await?;
                self.block_store.move_to_archive(&block.id)?;
                info!(id = %block.id, ?policy, "block archived by decay cycle");
                archived.push(block.id.clone());
            }
        }
        Ok(archived)
    }

    fn should_archive(&self, block: &KnowledgeBlock, total_accesses: u64, now: DateTime<Utc>, policy: DecayPolicy) -> bool {
        let age_threshold = Duration::days(self.config.time_threshold_days);
        let time_stale = now.signed_duration_since(block.last_access) >= age_threshold;

        let usage_share = if total_accesses == 0 {
            0.0
        } else {
            block.access_count as f64 / total_accesses as f64
        };
        let usage_stale = usage_share < self.config.usage_threshold;

        match policy {
            DecayPolicy::Time => time_stale,
            DecayPolicy::Usage => usage_stale,
            DecayPolicy::Both => time_stale || usage_stale,
        }
    }

    /// Restores an archived block and re-encodes it so it is retrievable
    /// again: the inverse of the archival half of `run_decay_cycle`.
    pub async fn restore(&self, id: &str, embedder: &dyn Embedder) -> MemoryResult<()> {
        self.block_store.restore_from_archive(id)?;
        let block = self.block_store.read(id)?;
        let embedding = embedder.embed(&format!("{} {}", block.title, block.body)).await?;
        self.vector_store.upsert(id, embedding, VectorMetadata::from_block(&block)).await?;
        info!(id = %id, "block restored from archive and re-encoded");
        Ok(())
    }
}
