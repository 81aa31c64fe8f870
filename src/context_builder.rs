//! Materialises a token-budgeted context block from retrieval results
//! (spec.md §4.5): greedy accumulation of ranked blocks followed by
//! compression of whatever didn't fit as-is.

use std::sync::Arc;

use crate::compressor::Compressor;
use crate::config::CompressionConfig;
use crate::error::MemoryResult;
use crate::reasoner::Reasoner;
use crate::retriever::{RetrieveOptions, Retriever};
use crate::store::block_store::BlockStore;
use crate::token_counter::TokenCounter;

pub struct ContextBuilder {
    retriever: Arc<Retriever>,
    block_store: Arc<BlockStore>,
    token_counter: Arc<dyn TokenCounter>,
    compression_config: CompressionConfig,
}

impl ContextBuilder {
    pub fn new(
        retriever: Arc<Retriever>,
        block_store: Arc<BlockStore>,
        token_counter: Arc<dyn TokenCounter>,
        compression_config: CompressionConfig,
    ) -> Self {
        Self {
            retriever,
            block_store,
            token_counter,
            compression_config,
        }
    }

    /// Returns a single string that fits within `max_tokens`, or `""` when
    /// retrieval yields nothing relevant. `reasoner` is optional: absence
    /// downgrades compression to deterministic truncation.
    pub async fn materialize_context(
        &self,
        query: &str,
        max_tokens: usize,
        retrieve_options: &RetrieveOptions,
        reasoner: Option<&dyn Reasoner>,
    ) -> MemoryResult<String> {
        if max_tokens == 0 {
            return Ok(String::new());
        }

        let hits = self.retriever.retrieve(query, retrieve_options).await?;
        if hits.is_empty() {
            return Ok(String::new());
        }

        let mut sections = Vec::with_capacity(hits.len());
        let mut section_total = 0usize;
        for hit in &hits {
            let block = match self.block_store.read(&hit.block_id) {
                Ok(b) => b,
                Err(_) => continue, // vanished between retrieval and materialization
            };
            let header = format!("### {} ({})\n", block.title, block.id);
            let section = format!("{header}{}", block.body);
            let section_cost = self.token_counter.count(&section);

            if !sections.is_empty() && section_total + section_cost > max_tokens {
                break; // no room left for this block's header+body
            }
            section_total += section_cost;
            sections.push(section);
        }

        if sections.is_empty() {
            return Ok(String::new());
        }

        let joined = sections.join("\n\n");
        if self.token_counter.count(&joined) <= max_tokens {
            return Ok(joined);
        }

        let compressor = Compressor::new(reasoner, self.token_counter.as_ref(), &self.compression_config);
        compressor.compress(&sections, max_tokens).await
    }
}
