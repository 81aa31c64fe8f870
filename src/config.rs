//! Process-wide configuration, initialised once at `MemoryCore` construction.
//!
//! Loaded from an optional TOML file the same way the teacher's
//! `context_slicer::config::load_config` layers a file over built-in
//! defaults: every field is `serde(default)`, so a missing file — or a file
//! missing some keys — still produces a fully valid `Config`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub block_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub embedding_dim: usize,
    pub retrieval: RetrievalConfig,
    pub decay: DecayConfig,
    pub compression: CompressionConfig,
    pub backend: BackendConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_dir: PathBuf::from("./blocks"),
            archive_dir: PathBuf::from("archive"),
            embedding_dim: 512,
            retrieval: RetrievalConfig::default(),
            decay: DecayConfig::default(),
            compression: CompressionConfig::default(),
            backend: BackendConfig::default(),
        }
    }
}

impl Config {
    /// Load a TOML config file, falling back to built-in defaults for any
    /// key the file omits. A missing file is not an error: it simply
    /// produces `Config::default()`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
        let cfg: Self = toml::from_str(&text)
            .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))?;
        Ok(cfg)
    }

    /// Absolute archive directory, resolved relative to `block_dir`.
    pub fn archive_path(&self) -> PathBuf {
        self.block_dir.join(&self.archive_dir)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_top_k: usize,
    pub sparse: SparseBoostConfig,
    pub rrf_k: u32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: 5,
            sparse: SparseBoostConfig::default(),
            rrf_k: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SparseBoostConfig {
    pub title_boost: f32,
    pub body_boost: f32,
    pub tag_boost: f32,
    pub user_boost: f32,
}

impl Default for SparseBoostConfig {
    fn default() -> Self {
        Self {
            title_boost: 0.20,
            body_boost: 0.10,
            tag_boost: 0.10,
            user_boost: 0.15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    pub time_threshold_days: i64,
    pub usage_threshold: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            time_threshold_days: 180,
            usage_threshold: 0.01,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Implementation-defined but stable: a simple `[.!?]\s+` boundary,
    /// matching spec.md §4.6/§6's "implementation-defined but stable"
    /// contract.
    pub sentence_boundary_regex: String,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            sentence_boundary_regex: r"[.!?]\s+".to_string(),
        }
    }
}

/// Provider selectors: missing external backend falls back to in-memory for
/// vector/graph, is a no-op (no reasoner configured) for the reasoner, and
/// is a terminal error for the embedder (see spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BackendConfig {
    pub vector: BackendSelector,
    pub graph: BackendSelector,
    pub embedder: BackendSelector,
    pub reasoner: BackendSelector,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendSelector {
    /// The built-in local implementation: `InMemoryGraphStore`/
    /// `InMemoryVectorStore` for vector/graph, `DeterministicEmbedder` for
    /// the embedder, and "no reasoner configured" for the reasoner.
    InMemory,
    /// Placeholder for a real adapter's connection string; no concrete
    /// third-party vector/graph/embedding/reasoning client is implemented
    /// here (out of scope per spec.md §1).
    External { endpoint: String },
}

impl Default for BackendSelector {
    fn default() -> Self {
        BackendSelector::InMemory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_constants() {
        let cfg = Config::default();
        assert_eq!(cfg.retrieval.default_top_k, 5);
        assert_eq!(cfg.retrieval.sparse.title_boost, 0.20);
        assert_eq!(cfg.retrieval.sparse.body_boost, 0.10);
        assert_eq!(cfg.retrieval.sparse.tag_boost, 0.10);
        assert_eq!(cfg.retrieval.sparse.user_boost, 0.15);
        assert_eq!(cfg.retrieval.rrf_k, 60);
        assert_eq!(cfg.decay.time_threshold_days, 180);
        assert_eq!(cfg.decay.usage_threshold, 0.01);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = Config::load(Path::new("/nonexistent/path/memory.toml")).unwrap();
        assert_eq!(cfg.embedding_dim, 512);
    }

    #[test]
    fn partial_file_fills_in_remaining_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.toml");
        std::fs::write(&path, "embedding_dim = 256\n").unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.embedding_dim, 256);
        assert_eq!(cfg.retrieval.default_top_k, 5, "unset sections keep defaults");
    }

    #[test]
    fn backend_selectors_parse_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.toml");
        std::fs::write(
            &path,
            r#"
            [backend.embedder]
            kind = "external"
            endpoint = "https://embeddings.example.com"

            [backend.reasoner]
            kind = "external"
            endpoint = "https://reasoner.example.com"
            "#,
        )
        .unwrap();
        let cfg = Config::load(&path).unwrap();
        assert!(matches!(cfg.backend.vector, BackendSelector::InMemory), "unset selectors keep defaults");
        assert!(matches!(cfg.backend.graph, BackendSelector::InMemory));
        match cfg.backend.embedder {
            BackendSelector::External { endpoint } => assert_eq!(endpoint, "https://embeddings.example.com"),
            BackendSelector::InMemory => panic!("expected external embedder selector"),
        }
        match cfg.backend.reasoner {
            BackendSelector::External { endpoint } => assert_eq!(endpoint, "https://reasoner.example.com"),
            BackendSelector::InMemory => panic!("expected external reasoner selector"),
        }
    }

    #[test]
    fn archive_path_is_relative_to_block_dir() {
        let mut cfg = Config::default();
        cfg.block_dir = PathBuf::from("/data/blocks");
        cfg.archive_dir = PathBuf::from("archive");
        assert_eq!(cfg.archive_path(), PathBuf::from("/data/blocks/archive"));
    }
}
