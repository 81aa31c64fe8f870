//! End-to-end scenarios exercising `MemoryCore` as a single black box:
//! ingest and rank, exclusion filtering, RRF re-ranking, context budgets,
//! decay/restore, and reflection persistence against a scripted reasoner.

use std::collections::BTreeSet;
use std::sync::Arc;

use memory_core::block::InformationType;
use memory_core::config::Config;
use memory_core::decay::DecayPolicy;
use memory_core::embedder::{DeterministicEmbedder, Embedder};
use memory_core::error::ErrorKind;
use memory_core::orchestrator::MemoryCore;
use memory_core::reasoner::{Reasoner, ScriptedReasoner};
use memory_core::retriever::{RetrievalMode, RetrieveOptions};
use memory_core::token_counter::{HeuristicTokenCounter, TokenCounter};

fn core_in(dir: &std::path::Path, reasoner: Option<Arc<dyn Reasoner>>) -> MemoryCore {
    let mut config = Config::default();
    config.block_dir = dir.to_path_buf();
    let embedder: Arc<dyn Embedder> = Arc::new(DeterministicEmbedder::new(64));
    let token_counter = Arc::new(HeuristicTokenCounter::new());
    MemoryCore::new(config, embedder, token_counter, reasoner).unwrap()
}

#[tokio::test]
async fn ingest_and_retrieve_ranks_relevant_block_first() {
    let dir = tempfile::tempdir().unwrap();
    let core = core_in(dir.path(), None);

    let nmn = core
        .record("NMN boosts NAD", "NMN is a precursor that raises cellular NAD levels", BTreeSet::new(), InformationType::Static)
        .unwrap();
    core.encode(&nmn.id).await.unwrap();

    let macrame = core
        .record("Macrame patterns", "Knotting techniques for wall hangings", BTreeSet::new(), InformationType::Static)
        .unwrap();
    core.encode(&macrame.id).await.unwrap();

    let hits = core.retrieve("what raises NAD levels", &RetrieveOptions { top_k: 2, ..Default::default() }).await.unwrap();
    assert_eq!(hits[0].block_id, nmn.id);
    assert!(hits.iter().all(|h| h.block_id != macrame.id));
}

#[tokio::test]
async fn exclude_terms_drop_matching_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let core = core_in(dir.path(), None);

    let keep = core.record("Project notes", "general project notes without the flagged word", BTreeSet::new(), InformationType::Static).unwrap();
    core.encode(&keep.id).await.unwrap();

    let drop = core.record("Project notes draft", "general project notes with deprecated content inside", BTreeSet::new(), InformationType::Static).unwrap();
    core.encode(&drop.id).await.unwrap();

    let hits = core
        .retrieve(
            "project notes",
            &RetrieveOptions { top_k: 5, exclude: vec!["deprecated".to_string()], ..Default::default() },
        )
        .await
        .unwrap();
    assert!(hits.iter().all(|h| h.block_id != drop.id));
    assert!(hits.iter().any(|h| h.block_id == keep.id));
}

#[tokio::test]
async fn rrf_mode_can_reverse_dense_only_ranking() {
    let dir = tempfile::tempdir().unwrap();
    let core = core_in(dir.path(), None);

    // A: strong dense signal, weak keyword signal.
    let a = core.record("unrelated heading", "text with no overlap to the query terms at all", BTreeSet::new(), InformationType::Static).unwrap();
    core.encode(&a.id).await.unwrap();

    // B: weaker dense signal, strong keyword signal (query term in title and body).
    let b = core.record("widgets guide", "a complete widgets guide covering widgets setup", BTreeSet::new(), InformationType::Static).unwrap();
    core.encode(&b.id).await.unwrap();

    let dense = core.retrieve("widgets", &RetrieveOptions { top_k: 2, mode: RetrievalMode::Dense, ..Default::default() }).await.unwrap();
    let rrf = core.retrieve("widgets", &RetrieveOptions { top_k: 2, mode: RetrievalMode::Rrf, ..Default::default() }).await.unwrap();

    // B must rank at or above its dense position once sparse rank is fused in.
    let b_rank_dense = dense.iter().position(|h| h.block_id == b.id);
    let b_rank_rrf = rrf.iter().position(|h| h.block_id == b.id);
    assert!(b_rank_rrf.is_some());
    if let (Some(d), Some(r)) = (b_rank_dense, b_rank_rrf) {
        assert!(r <= d, "RRF must not rank the keyword-strong block worse than dense-only");
    }
}

#[tokio::test]
async fn materialized_context_respects_token_budget() {
    let dir = tempfile::tempdir().unwrap();
    let core = core_in(dir.path(), None);

    for i in 0..8 {
        let block = core
            .record(format!("Topic {i}"), "word ".repeat(150), BTreeSet::new(), InformationType::Static)
            .unwrap();
        core.encode(&block.id).await.unwrap();
    }

    let counter = HeuristicTokenCounter::new();
    let ctx = core
        .materialize_context("topic", 500, &RetrieveOptions { top_k: 8, ..Default::default() })
        .await
        .unwrap();
    assert!(counter.count(&ctx) <= 500);
    assert!(!ctx.is_empty());
}

#[tokio::test]
async fn decay_archives_stale_block_and_restore_reverses_it() {
    let dir = tempfile::tempdir().unwrap();
    let core = core_in(dir.path(), None);

    let block = core.record("Old note", "a note nobody has touched in a long time", BTreeSet::new(), InformationType::Static).unwrap();
    core.encode(&block.id).await.unwrap();

    // Force staleness directly through the on-disk frontmatter, the way a
    // long-idle block would look after genuinely aging out. Rewrite only the
    // `last_access:` line so the otherwise-identical `created:` line (same
    // timestamp at creation time) is left untouched.
    let path = dir.path().join(format!("{}.md", block.id));
    let stale_timestamp = (block.last_access - chrono::Duration::days(400)).to_rfc3339();
    let text = std::fs::read_to_string(&path).unwrap();
    let text: String = text
        .lines()
        .map(|line| {
            if let Some(value) = line.strip_prefix("last_access:") {
                let quote = value.trim().chars().next().filter(|c| *c == '\'' || *c == '"');
                match quote {
                    Some(q) => format!("last_access: {q}{stale_timestamp}{q}"),
                    None => format!("last_access: {stale_timestamp}"),
                }
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    std::fs::write(&path, text).unwrap();

    let archived = core.decay(DecayPolicy::Time).await.unwrap();
    assert_eq!(archived, vec![block.id.clone()]);
    assert!(core.list_blocks().unwrap().is_empty());

    core.restore(&block.id).await.unwrap();
    assert_eq!(core.list_blocks().unwrap(), vec![block.id.clone()]);

    let hits = core.retrieve("old note", &RetrieveOptions { top_k: 1, ..Default::default() }).await.unwrap();
    assert_eq!(hits[0].block_id, block.id, "restored block must be retrievable again");
}

#[tokio::test]
async fn reflection_persists_accepted_triples_and_rejects_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let reasoner: Arc<dyn Reasoner> = Arc::new(
        ScriptedReasoner::new("[]").when_prompt_contains(
            "NAD overview",
            r#"[{"target_id": "nmn", "kind": "related_to", "weight": 0.9}, {"target_id": "ghost-id", "kind": "related_to"}]"#,
        ),
    );
    let core = core_in(dir.path(), Some(reasoner));

    let seed = core.record("NAD overview", "NAD is a coenzyme central to cellular energy metabolism", BTreeSet::new(), InformationType::Static).unwrap();
    core.encode(&seed.id).await.unwrap();
    let nmn = core.record("NMN supplementation", "NMN is a precursor that raises NAD levels in cells", BTreeSet::new(), InformationType::Static).unwrap();
    core.encode(&nmn.id).await.unwrap();

    let accepted = core.reflect(&seed.id).await.unwrap();
    assert_eq!(accepted.len(), 1, "the ghost-id proposal must be dropped as outside the candidate set");
    assert_eq!(accepted[0].target_id, nmn.id);
    assert_eq!(accepted[0].origin, memory_core::block::RelationshipOrigin::Reflection);
}

#[tokio::test]
async fn linking_nonexistent_block_fails_with_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let core = core_in(dir.path(), None);
    let a = core.record("a", "body", BTreeSet::new(), InformationType::Static).unwrap();
    let err = core.link(&a.id, "does-not-exist", "related_to", None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn reindex_all_makes_every_block_retrievable() {
    let dir = tempfile::tempdir().unwrap();
    let core = core_in(dir.path(), None);
    for i in 0..3 {
        core.record(format!("Block {i}"), format!("body content {i}"), BTreeSet::new(), InformationType::Static).unwrap();
    }
    let count = core.reindex_all().await.unwrap();
    assert_eq!(count, 3);

    let hits = core.retrieve("body content", &RetrieveOptions { top_k: 3, ..Default::default() }).await.unwrap();
    assert_eq!(hits.len(), 3);
}
