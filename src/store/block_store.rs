//! BlockStore: the authoritative persistent store of knowledge blocks as
//! frontmatter+body files under a root directory.
//!
//! Directory listing follows the teacher's `scanner.rs` idiom (walk, sort by
//! path for determinism); writes are atomic write-then-rename.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::block::KnowledgeBlock;
use crate::config::Config;
use crate::error::{MemoryError, MemoryResult};
use crate::frontmatter::{parse_block_file, render_block_file};

pub struct BlockStore {
    root: PathBuf,
    archive_dir_name: PathBuf,
}

impl BlockStore {
    pub fn new(config: &Config) -> MemoryResult<Self> {
        std::fs::create_dir_all(&config.block_dir).map_err(|e| {
            MemoryError::internal("open", format!("cannot create block_dir: {e}"))
        })?;
        std::fs::create_dir_all(config.archive_path()).map_err(|e| {
            MemoryError::internal("open", format!("cannot create archive_dir: {e}"))
        })?;
        Ok(Self {
            root: config.block_dir.clone(),
            archive_dir_name: config.archive_dir.clone(),
        })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.md"))
    }

    fn archive_path_for(&self, id: &str) -> PathBuf {
        self.root.join(&self.archive_dir_name).join(format!("{id}.md"))
    }

    /// Atomic write-then-rename: recomputes `content_hash`, sets
    /// `updated_at`, persists to `<id>.md`.
    pub fn write(&self, block: &mut KnowledgeBlock) -> MemoryResult<()> {
        block.content_hash = block.compute_content_hash();
        block.updated_at = chrono::Utc::now();
        self.write_raw(&self.path_for(&block.id), block)?;
        info!(id = %block.id, "block written");
        Ok(())
    }

    fn write_raw(&self, path: &Path, block: &KnowledgeBlock) -> MemoryResult<()> {
        let text = render_block_file(block);
        let tmp_path = path.with_extension("md.tmp");
        std::fs::write(&tmp_path, &text).map_err(|e| {
            MemoryError::internal("write", format!("writing {}: {e}", tmp_path.display())).with_id(block.id.clone())
        })?;
        std::fs::rename(&tmp_path, path).map_err(|e| {
            MemoryError::internal("write", format!("renaming into place: {e}")).with_id(block.id.clone())
        })?;
        Ok(())
    }

    /// Parses frontmatter; fails with `Corruption` on any parse or hash
    /// mismatch, `NotFound` if the file doesn't exist.
    pub fn read(&self, id: &str) -> MemoryResult<KnowledgeBlock> {
        self.read_path(&self.path_for(id), id)
    }

    fn read_path(&self, path: &Path, id: &str) -> MemoryResult<KnowledgeBlock> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MemoryError::not_found("read", id)
            } else {
                MemoryError::internal("read", format!("reading {}: {e}", path.display())).with_id(id)
            }
        })?;
        parse_block_file(id, &text)
    }

    /// Non-archived ids, in deterministic id order.
    pub fn list(&self) -> MemoryResult<Vec<String>> {
        let mut ids = Vec::new();
        let entries = std::fs::read_dir(&self.root)
            .map_err(|e| MemoryError::internal("list", format!("reading block_dir: {e}")))?;
        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            let path = entry.path();
            if path.is_dir() {
                continue; // skips archive/
            }
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Checks whether a block file exists (archived or not) without fully
    /// parsing it.
    pub fn exists(&self, id: &str) -> bool {
        self.path_for(id).exists() || self.archive_path_for(id).exists()
    }

    /// True when `id` is only present in `archive/`, not in the live
    /// directory. `read()` already returns `NotFound` for an archived id
    /// (the live file is gone), so callers that need to distinguish
    /// "archived" from "never existed" must check this first.
    pub fn is_archived(&self, id: &str) -> bool {
        !self.path_for(id).exists() && self.archive_path_for(id).exists()
    }

    /// Moves `<id>.md` into `archive/`, marking `archived = true`.
    pub fn move_to_archive(&self, id: &str) -> MemoryResult<()> {
        let mut block = self.read(id)?;
        block.archived = true;
        let text = render_block_file(&block);
        let archive_path = self.archive_path_for(id);
        let tmp_path = archive_path.with_extension("md.tmp");
        std::fs::write(&tmp_path, &text)
            .map_err(|e| MemoryError::internal("archive", format!("{e}")).with_id(id))?;
        std::fs::rename(&tmp_path, &archive_path)
            .map_err(|e| MemoryError::internal("archive", format!("{e}")).with_id(id))?;
        std::fs::remove_file(self.path_for(id))
            .map_err(|e| MemoryError::internal("archive", format!("{e}")).with_id(id))?;
        warn!(id = %id, "block archived");
        Ok(())
    }

    /// Reverses `move_to_archive`: clears `archived`, moves the file back.
    pub fn restore_from_archive(&self, id: &str) -> MemoryResult<()> {
        let archive_path = self.archive_path_for(id);
        let mut block = self.read_path(&archive_path, id)?;
        block.archived = false;
        let live_path = self.path_for(id);
        let tmp_path = live_path.with_extension("md.tmp");
        let text = render_block_file(&block);
        std::fs::write(&tmp_path, &text)
            .map_err(|e| MemoryError::internal("restore", format!("{e}")).with_id(id))?;
        std::fs::rename(&tmp_path, &live_path)
            .map_err(|e| MemoryError::internal("restore", format!("{e}")).with_id(id))?;
        std::fs::remove_file(&archive_path)
            .map_err(|e| MemoryError::internal("restore", format!("{e}")).with_id(id))?;
        info!(id = %id, "block restored from archive");
        Ok(())
    }

    /// Increments `access_count`, sets `last_access`, persists frontmatter
    /// only — body is re-rendered unchanged. Fails `NotFound` if missing.
    pub fn record_access(&self, id: &str) -> MemoryResult<()> {
        let mut block = self.read(id)?;
        block.touch_access();
        self.write_raw(&self.path_for(id), &block)
    }
}
