//! The atomic unit of memory: [`KnowledgeBlock`], plus [`Relationship`] and
//! [`VectorEntry`], the graph- and vector-layer projections of a block.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Descriptive metadata only — spec.md's open question resolves this as
/// never gating ingest; every type is accepted and stored identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum InformationType {
    #[default]
    Static,
    SemiStatic,
    Dynamic,
    Ephemeral,
}

/// A persistent unit of knowledge, addressed by a stable id.
///
/// Invariants (enforced by [`crate::store::BlockStore`], not by this struct
/// alone): `id` never changes after creation; `content_hash` matches the
/// persisted body+frontmatter on every successful read; `last_access >=
/// created_at`; archived blocks have no [`VectorEntry`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBlock {
    pub id: String,
    pub title: String,
    pub body: String,
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub content_hash: String,
    pub access_count: u64,
    pub last_access: DateTime<Utc>,
    pub information_type: InformationType,
    pub archived: bool,
    /// Unknown frontmatter keys, preserved verbatim through read/write.
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl KnowledgeBlock {
    /// Build a fresh, unsaved block. `content_hash` is computed immediately
    /// so a block is always internally consistent, even before its first
    /// `BlockStore::write`.
    pub fn new(id: impl Into<String>, title: impl Into<String>, body: impl Into<String>) -> Self {
        let now = Utc::now();
        let mut block = Self {
            id: id.into(),
            title: title.into(),
            body: body.into(),
            tags: BTreeSet::new(),
            created_at: now,
            updated_at: now,
            content_hash: String::new(),
            access_count: 0,
            last_access: now,
            information_type: InformationType::default(),
            archived: false,
            extra: BTreeMap::new(),
        };
        block.content_hash = block.compute_content_hash();
        block
    }

    /// SHA-256 over the body plus a canonical (stably ordered) encoding of
    /// the frontmatter fields that define "content" — title, tags and
    /// information_type. `extra`, access metadata and timestamps are
    /// excluded so that access-metadata writeback never perturbs the hash.
    pub fn compute_content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.title.as_bytes());
        hasher.update(b"\0");
        hasher.update(self.body.as_bytes());
        hasher.update(b"\0");
        for tag in &self.tags {
            hasher.update(tag.as_bytes());
            hasher.update(b",");
        }
        hasher.update(b"\0");
        hasher.update(format!("{:?}", self.information_type).as_bytes());
        let digest = hasher.finalize();
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Whether the stored `content_hash` still matches the current
    /// title/body/tags/information_type. `BlockStore::read` fails with
    /// `Corruption` when this returns `false`.
    pub fn hash_is_consistent(&self) -> bool {
        self.content_hash == self.compute_content_hash()
    }

    /// Record a successful read/retrieval: bump `access_count`, set
    /// `last_access`. Never moves `last_access` backward and never puts it
    /// ahead of "now".
    pub fn touch_access(&mut self) {
        self.access_count += 1;
        self.last_access = Utc::now();
    }
}

/// Provenance of a [`Relationship`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipOrigin {
    Explicit,
    Autolink,
    Reflection,
}

/// A directed, typed edge between two blocks.
///
/// `(source_id, target_id, kind)` identifies a relationship; `GraphStore`
/// upsert is idempotent on that triple. Self-loops are rejected by
/// `MemoryCore::link` and `Reflector`, never by this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub source_id: String,
    pub target_id: String,
    pub kind: String,
    pub weight: Option<f32>,
    pub origin: RelationshipOrigin,
}

impl Relationship {
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        kind: impl Into<String>,
        weight: Option<f32>,
        origin: RelationshipOrigin,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            kind: kind.into(),
            weight,
            origin,
        }
    }

    /// Identity key for idempotent upsert / deduplication.
    pub fn key(&self) -> (String, String, String) {
        (self.source_id.clone(), self.target_id.clone(), self.kind.clone())
    }
}

/// Sparse-signal metadata projected from a block into its [`VectorEntry`],
/// so retrieval scoring never needs to round-trip through `BlockStore`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub title: String,
    pub tags: BTreeSet<String>,
    pub information_type: InformationType,
    pub content_hash: String,
}

impl VectorMetadata {
    pub fn from_block(block: &KnowledgeBlock) -> Self {
        Self {
            title: block.title.clone(),
            tags: block.tags.clone(),
            information_type: block.information_type,
            content_hash: block.content_hash.clone(),
        }
    }
}

/// One embedding entry per non-archived, encoded block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorEntry {
    pub block_id: String,
    pub embedding: Vec<f32>,
    pub metadata: VectorMetadata,
}
