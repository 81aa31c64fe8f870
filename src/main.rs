use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use memory_core::block::InformationType;
use memory_core::config::{BackendSelector, Config};
use memory_core::orchestrator::MemoryCore;
use memory_core::decay::DecayPolicy;
use memory_core::embedder::{DeterministicEmbedder, Embedder};
use memory_core::mcp::run_mcp;
use memory_core::reasoner::Reasoner;
use memory_core::retriever::{RetrievalMode, RetrieveOptions};
use memory_core::token_counter::HeuristicTokenCounter;

#[derive(Debug, Parser)]
#[command(name = "memory-core")]
#[command(version)]
#[command(about = "Hybrid knowledge memory core: blocks, graph, and vector index behind one retrieval engine")]
struct Cli {
    /// Path to a TOML config file; falls back to built-in defaults when absent.
    #[arg(long, global = true, default_value = "memory.toml")]
    config: PathBuf,

    /// Overrides `block_dir` from the config file.
    #[arg(long, global = true)]
    block_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create and persist a new knowledge block.
    Record {
        title: String,
        body: String,
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
        #[arg(long, default_value = "static")]
        information_type: String,
    },
    /// Embed a block and upsert it into the vector index.
    Encode { id: String },
    /// Create an explicit relationship between two blocks.
    Link {
        source_id: String,
        target_id: String,
        kind: String,
        #[arg(long)]
        weight: Option<f32>,
    },
    /// Hybrid dense + sparse retrieval over knowledge blocks.
    Retrieve {
        query: String,
        #[arg(long, default_value_t = 5)]
        top_k: usize,
        #[arg(long, value_delimiter = ',')]
        boost: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        exclude: Vec<String>,
        #[arg(long, default_value = "dense")]
        mode: String,
    },
    /// Propose new relationships for a seed block via the reasoning model.
    Reflect { seed_id: String },
    /// Run a decay cycle archiving stale or rarely-used blocks.
    Decay {
        #[arg(long, default_value = "time")]
        policy: String,
    },
    /// Restore a block previously archived by a decay cycle.
    Restore { id: String },
    /// Retrieve and compress a token-budgeted context block for a query.
    Context {
        query: String,
        #[arg(long, default_value_t = 2000)]
        max_tokens: usize,
        #[arg(long, default_value_t = 5)]
        top_k: usize,
    },
    /// List the ids of every non-archived block.
    ListBlocks,
    /// Rebuild the vector index from scratch over every non-archived block.
    ReindexAll,
    /// Clear the vector index without touching persisted blocks.
    ResetVectors,
    /// Start the MCP stdio server.
    Mcp,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let mut config = Config::load(&cli.config).context("loading config")?;
    if let Some(block_dir) = cli.block_dir {
        config.block_dir = block_dir;
    }

    let embedder = build_embedder(&config)?;
    let reasoner = build_reasoner(&config);
    let token_counter = Arc::new(HeuristicTokenCounter::new());
    let core = MemoryCore::new(config, embedder, token_counter, reasoner)?;

    match cli.command {
        Command::Record { title, body, tags, information_type } => {
            let tags: BTreeSet<String> = tags.into_iter().collect();
            let information_type = parse_information_type(&information_type);
            let block = core.record(title, body, tags, information_type)?;
            println!("{}", serde_json::to_string_pretty(&block)?);
        }
        Command::Encode { id } => {
            core.encode(&id).await?;
            println!("encoded {id}");
        }
        Command::Link { source_id, target_id, kind, weight } => {
            let relationship = core.link(&source_id, &target_id, kind, weight).await?;
            println!("{}", serde_json::to_string_pretty(&relationship)?);
        }
        Command::Retrieve { query, top_k, boost, exclude, mode } => {
            let mode = if mode == "rrf" { RetrievalMode::Rrf } else { RetrievalMode::Dense };
            let hits = core.retrieve(&query, &RetrieveOptions { top_k, boost, exclude, mode }).await?;
            for hit in hits {
                println!("{:.4}\t{}\t{}", hit.score, hit.block_id, hit.reason);
            }
        }
        Command::Reflect { seed_id } => {
            let accepted = core.reflect(&seed_id).await?;
            println!("{}", serde_json::to_string_pretty(&accepted)?);
        }
        Command::Decay { policy } => {
            let policy = parse_decay_policy(&policy);
            let archived = core.decay(policy).await?;
            for id in archived {
                println!("{id}");
            }
        }
        Command::Restore { id } => {
            core.restore(&id).await?;
            println!("restored {id}");
        }
        Command::Context { query, max_tokens, top_k } => {
            let text = core.materialize_context(&query, max_tokens, &RetrieveOptions { top_k, ..Default::default() }).await?;
            print!("{text}");
        }
        Command::ListBlocks => {
            for id in core.list_blocks()? {
                println!("{id}");
            }
        }
        Command::ReindexAll => {
            let count = core.reindex_all().await?;
            println!("reindexed {count} blocks");
        }
        Command::ResetVectors => {
            core.reset_vectors().await?;
            println!("vector index cleared");
        }
        Command::Mcp => {
            run_mcp(&core).await?;
        }
    }

    Ok(())
}

/// `backend.embedder` has no in-build external client, so selecting
/// `external` fails fast at startup rather than degrading silently.
fn build_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    match &config.backend.embedder {
        BackendSelector::InMemory => Ok(Arc::new(DeterministicEmbedder::new(config.embedding_dim))),
        BackendSelector::External { endpoint } => {
            bail!("backend.embedder is set to an external provider ({endpoint}) but no external embedding client is wired into this build");
        }
    }
}

/// `backend.reasoner` selecting `external` degrades to no reasoner
/// (reflection/compression fall back to their documented no-reasoner
/// behavior) since no external reasoning client is wired into this build.
fn build_reasoner(config: &Config) -> Option<Arc<dyn Reasoner>> {
    match &config.backend.reasoner {
        BackendSelector::InMemory => None,
        BackendSelector::External { endpoint } => {
            warn!(endpoint = %endpoint, "external reasoner backend not available in this build, running without a reasoner");
            None
        }
    }
}

fn parse_information_type(s: &str) -> InformationType {
    match s {
        "semi-static" => InformationType::SemiStatic,
        "dynamic" => InformationType::Dynamic,
        "ephemeral" => InformationType::Ephemeral,
        _ => InformationType::Static,
    }
}

fn parse_decay_policy(s: &str) -> DecayPolicy {
    match s {
        "usage" => DecayPolicy::Usage,
        "both" => DecayPolicy::Both,
        _ => DecayPolicy::Time,
    }
}
