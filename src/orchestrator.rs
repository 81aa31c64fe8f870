//! `MemoryCore`: the orchestrator wiring BlockStore, GraphStore, VectorStore
//! and the retrieval/context/reflection/decay components into the single
//! entry point the CLI and MCP surfaces call into (spec.md §5).

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::warn;

use crate::block::{InformationType, KnowledgeBlock, Relationship, RelationshipOrigin};
use crate::compressor::Compressor;
use crate::config::{BackendSelector, Config};
use crate::context_builder::ContextBuilder;
use crate::decay::{DecayManager, DecayPolicy};
use crate::embedder::Embedder;
use crate::error::{MemoryError, MemoryResult};
use crate::id::IdGenerator;
use crate::reasoner::Reasoner;
use crate::reflector::Reflector;
use crate::retriever::{RetrieveOptions, RetrievedBlock, Retriever};
use crate::store::block_store::BlockStore;
use crate::store::graph_store::{GraphStore, InMemoryGraphStore};
use crate::store::vector_store::{InMemoryVectorStore, VectorStore};
use crate::token_counter::TokenCounter;

pub struct MemoryCore {
    config: Config,
    block_store: Arc<BlockStore>,
    graph_store: Arc<dyn GraphStore>,
    vector_store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    token_counter: Arc<dyn TokenCounter>,
    reasoner: Option<Arc<dyn Reasoner>>,
    retriever: Arc<Retriever>,
    context_builder: ContextBuilder,
    reflector: Reflector,
    decay_manager: DecayManager,
    id_generator: IdGenerator,
    write_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl MemoryCore {
    pub fn new(
        config: Config,
        embedder: Arc<dyn Embedder>,
        token_counter: Arc<dyn TokenCounter>,
        reasoner: Option<Arc<dyn Reasoner>>,
    ) -> MemoryResult<Self> {
        let block_store = Arc::new(BlockStore::new(&config)?);
        let graph_store = build_graph_store(&config);
        let vector_store = build_vector_store(&config);

        let id_generator = IdGenerator::new();
        let existing_ids = block_store.list()?;
        id_generator.seed_from_existing(existing_ids.iter().map(|s| s.as_str()));

        let retriever = Arc::new(Retriever::new(
            embedder.clone(),
            vector_store.clone(),
            block_store.clone(),
            config.retrieval.clone(),
        ));
        let context_builder = ContextBuilder::new(
            retriever.clone(),
            block_store.clone(),
            token_counter.clone(),
            config.compression.clone(),
        );
        let reflector = Reflector::new(retriever.clone(), graph_store.clone(), block_store.clone(), reasoner.clone());
        let decay_manager = DecayManager::new(block_store.clone(), vector_store.clone(), config.decay.clone());

        Ok(Self {
            config,
            block_store,
            graph_store,
            vector_store,
            embedder,
            token_counter,
            reasoner,
            retriever,
            context_builder,
            reflector,
            decay_manager,
            id_generator,
            write_locks: DashMap::new(),
        })
    }

    async fn lock_for(&self, id: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = self
            .write_locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Creates and persists a new block, assigning a fresh id.
    pub fn record(
        &self,
        title: impl Into<String>,
        body: impl Into<String>,
        tags: BTreeSet<String>,
        information_type: InformationType,
    ) -> MemoryResult<KnowledgeBlock> {
        let id = self.id_generator.next_id();
        let mut block = KnowledgeBlock::new(id, title, body);
        block.tags = tags;
        block.information_type = information_type;
        self.block_store.write(&mut block)?;
        Ok(block)
    }

    /// Embeds a block's title+body and upserts it into the vector index.
    /// Fails terminally (`EmbeddingUnavailable`) rather than degrading.
    pub async fn encode(&self, id: &str) -> MemoryResult<()> {
        let _guard = self.lock_for(id).await;
        if self.block_store.is_archived(id) {
            return Err(MemoryError::invalid("encode", "cannot encode an archived block").with_id(id));
        }
        let block = self.block_store.read(id)?;
        let embedding = self
            .embedder
            .embed(&format!("{} {}", block.title, block.body))
            .await
            .map_err(|e| MemoryError::embedding_unavailable("encode", e.message).with_id(id))?;
        self.vector_store
            .upsert(id, embedding, crate::block::VectorMetadata::from_block(&block))
            .await
    }

    /// Creates an explicit relationship between two existing blocks.
    pub async fn link(
        &self,
        source_id: &str,
        target_id: &str,
        kind: impl Into<String>,
        weight: Option<f32>,
    ) -> MemoryResult<Relationship> {
        if source_id == target_id {
            return Err(MemoryError::invalid("link", "source and target must differ").with_id(source_id));
        }
        self.block_store.read(source_id)?;
        self.block_store.read(target_id)?;

        let relationship = Relationship::new(source_id, target_id, kind, weight, RelationshipOrigin::Explicit);
        self.graph_store.upsert(relationship.clone()).await?;
        Ok(relationship)
    }

    pub async fn retrieve(&self, query: &str, options: &RetrieveOptions) -> MemoryResult<Vec<RetrievedBlock>> {
        self.retriever.retrieve(query, options).await
    }

    pub async fn reflect(&self, seed_id: &str) -> MemoryResult<Vec<Relationship>> {
        self.reflector.reflect(seed_id).await
    }

    pub async fn compress(&self, sections: &[String], max_tokens: usize) -> MemoryResult<String> {
        let compressor = Compressor::new(self.reasoner.as_deref(), self.token_counter.as_ref(), &self.config.compression);
        compressor.compress(sections, max_tokens).await
    }

    pub async fn decay(&self, policy: DecayPolicy) -> MemoryResult<Vec<String>> {
        self.decay_manager.run_decay_cycle(policy).await
    }

    /// Restores a previously archived block and re-encodes it.
    pub async fn restore(&self, id: &str) -> MemoryResult<()> {
        let _guard = self.lock_for(id).await;
        self.decay_manager.restore(id, self.embedder.as_ref()).await
    }

    pub async fn materialize_context(&self, query: &str, max_tokens: usize, options: &RetrieveOptions) -> MemoryResult<String> {
        self.context_builder
            .materialize_context(query, max_tokens, options, self.reasoner.as_deref())
            .await
    }

    pub fn list_blocks(&self) -> MemoryResult<Vec<String>> {
        self.block_store.list()
    }

    /// Rebuilds the vector index from scratch over every non-archived
    /// block, in `list()` order. Returns the number of blocks encoded.
    pub async fn reindex_all(&self) -> MemoryResult<usize> {
        self.vector_store.reset().await?;
        let ids = self.block_store.list()?;
        let mut count = 0;
        for id in &ids {
            self.encode(id).await?;
            count += 1;
        }
        Ok(count)
    }

    pub async fn reset_vectors(&self) -> MemoryResult<()> {
        self.vector_store.reset().await
    }
}

fn build_graph_store(config: &Config) -> Arc<dyn GraphStore> {
    match &config.backend.graph {
        BackendSelector::InMemory => Arc::new(InMemoryGraphStore::new()),
        BackendSelector::External { endpoint } => {
            warn!(endpoint = %endpoint, "external graph backend not available in this build, falling back to in-memory");
            Arc::new(InMemoryGraphStore::new())
        }
    }
}

fn build_vector_store(config: &Config) -> Arc<dyn VectorStore> {
    match &config.backend.vector {
        BackendSelector::InMemory => Arc::new(InMemoryVectorStore::new()),
        BackendSelector::External { endpoint } => {
            warn!(endpoint = %endpoint, "external vector backend not available in this build, falling back to in-memory");
            Arc::new(InMemoryVectorStore::new())
        }
    }
}
