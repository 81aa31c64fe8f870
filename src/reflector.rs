//! Reflection loop: proposes new relationships for a seed block by asking
//! a reasoning model to look at retrieval- and graph-neighbour candidates
//! (spec.md §4.7). A no-op whenever no reasoner is configured.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use tracing::warn;

use crate::block::{KnowledgeBlock, Relationship, RelationshipOrigin};
use crate::error::MemoryResult;
use crate::reasoner::Reasoner;
use crate::retriever::{RetrieveOptions, Retriever};
use crate::store::block_store::BlockStore;
use crate::store::graph_store::{GraphStore, NeighbourDirection};

const MAX_RETRIEVAL_CANDIDATES: usize = 5;
const MAX_GRAPH_NEIGHBOURS: usize = 5;
const BODY_PREFIX_LEN: usize = 500;

#[derive(Debug, Deserialize)]
struct ProposedEdge {
    target_id: String,
    kind: String,
    #[serde(default)]
    weight: Option<f32>,
}

struct Candidate {
    id: String,
    title: String,
    body_prefix: String,
}

pub struct Reflector {
    retriever: Arc<Retriever>,
    graph_store: Arc<dyn GraphStore>,
    block_store: Arc<BlockStore>,
    reasoner: Option<Arc<dyn Reasoner>>,
}

impl Reflector {
    pub fn new(
        retriever: Arc<Retriever>,
        graph_store: Arc<dyn GraphStore>,
        block_store: Arc<BlockStore>,
        reasoner: Option<Arc<dyn Reasoner>>,
    ) -> Self {
        Self {
            retriever,
            graph_store,
            block_store,
            reasoner,
        }
    }

    /// Proposes and persists new `origin=reflection` relationships from
    /// `seed_id`. Returns the accepted relationships (empty when no-op).
    pub async fn reflect(&self, seed_id: &str) -> MemoryResult<Vec<Relationship>> {
        if self.block_store.is_archived(seed_id) {
            return Ok(Vec::new());
        }
        let seed = self.block_store.read(seed_id)?;

        let reasoner = match &self.reasoner {
            Some(r) => r.clone(),
            None => return Ok(Vec::new()),
        };

        let candidates = self.gather_candidates(seed_id, &seed).await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let prompt = render_prompt(&seed, &candidates);
        let response = match reasoner.complete(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!(id = %seed_id, error = %e, "reflection reasoner unavailable, no writes");
                return Ok(Vec::new());
            }
        };

        let proposed: Vec<ProposedEdge> = match serde_json::from_str(&response) {
            Ok(edges) => edges,
            Err(e) => {
                warn!(id = %seed_id, error = %e, "reflection response was not valid JSON, no writes");
                return Ok(Vec::new());
            }
        };

        let candidate_ids: HashSet<&str> = candidates.iter().map(|c| c.id.as_str()).collect();
        let mut seen = HashSet::new();
        let mut accepted = Vec::new();

        for edge in proposed {
            if edge.target_id == seed_id {
                continue; // self-loop
            }
            if !candidate_ids.contains(edge.target_id.as_str()) {
                continue; // outside the candidate set the reasoner was shown
            }
            if !seen.insert((edge.target_id.clone(), edge.kind.clone())) {
                continue; // duplicate proposal
            }
            let relationship = Relationship::new(seed_id, edge.target_id, edge.kind, edge.weight, RelationshipOrigin::Reflection);
            self.graph_store.upsert(relationship.clone()).await?;
            accepted.push(relationship);
        }

        Ok(accepted)
    }

    async fn gather_candidates(&self, seed_id: &str, seed: &KnowledgeBlock) -> MemoryResult<Vec<Candidate>> {
        let mut ids_seen = HashSet::new();
        let mut candidates = Vec::new();

        let query = format!("{} {}", seed.title, seed.body);
        let retrieval_hits = self
            .retriever
            .retrieve(&query, &RetrieveOptions { top_k: MAX_RETRIEVAL_CANDIDATES + 1, ..Default::default() })
            .await?;
        for hit in retrieval_hits {
            if hit.block_id == seed_id || ids_seen.len() >= MAX_RETRIEVAL_CANDIDATES {
                continue;
            }
            if let Some(candidate) = self.load_candidate(&hit.block_id) {
                ids_seen.insert(candidate.id.clone());
                candidates.push(candidate);
            }
        }

        let neighbours = self.graph_store.neighbours(seed_id, NeighbourDirection::Both, None).await?;
        let mut graph_added = 0;
        for edge in neighbours {
            if graph_added >= MAX_GRAPH_NEIGHBOURS {
                break;
            }
            let other_id = if edge.source_id == seed_id { edge.target_id } else { edge.source_id };
            if ids_seen.contains(&other_id) {
                continue;
            }
            if let Some(candidate) = self.load_candidate(&other_id) {
                ids_seen.insert(candidate.id.clone());
                candidates.push(candidate);
                graph_added += 1;
            }
        }

        Ok(candidates)
    }

    fn load_candidate(&self, id: &str) -> Option<Candidate> {
        let block = self.block_store.read(id).ok()?;
        if block.archived {
            return None;
        }
        let body_prefix: String = block.body.chars().take(BODY_PREFIX_LEN).collect();
        Some(Candidate { id: block.id, title: block.title, body_prefix })
    }
}

fn render_prompt(seed: &KnowledgeBlock, candidates: &[Candidate]) -> String {
    let seed_body_prefix: String = seed.body.chars().take(BODY_PREFIX_LEN).collect();
    let mut prompt = format!(
        "Seed block {} - \"{}\":\n{}\n\nCandidate blocks:\n",
        seed.id, seed.title, seed_body_prefix
    );
    for candidate in candidates {
        prompt.push_str(&format!("- {} - \"{}\": {}\n", candidate.id, candidate.title, candidate.body_prefix));
    }
    prompt.push_str(
        "\nReturn a JSON array of relationships as {\"target_id\": ..., \"kind\": ..., \"weight\": <0..1 optional>}. \
         Only propose relationships to the candidate blocks listed above.",
    );
    prompt
}
