//! Reasoner adapter: an opaque `prompt -> text` function backing the
//! Reflector's relationship proposals and the Compressor's map-reduce
//! summarisation. Absence is a valid operating mode (spec.md §4.6, §4.7) —
//! unlike the Embedder, there is no "terminal error" path here.

use async_trait::async_trait;

use crate::error::MemoryResult;

#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn complete(&self, prompt: &str) -> MemoryResult<String>;
}

/// A scripted reasoner for tests: returns canned responses keyed by a
/// substring match against the prompt, falling back to a default. Mirrors
/// the "mock reasoner" scenario spec.md §8 describes for reflection tests.
pub struct ScriptedReasoner {
    responses: Vec<(String, String)>,
    default: String,
}

impl ScriptedReasoner {
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            responses: Vec::new(),
            default: default.into(),
        }
    }

    pub fn when_prompt_contains(mut self, needle: impl Into<String>, response: impl Into<String>) -> Self {
        self.responses.push((needle.into(), response.into()));
        self
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn complete(&self, prompt: &str) -> MemoryResult<String> {
        for (needle, response) in &self.responses {
            if prompt.contains(needle.as_str()) {
                return Ok(response.clone());
            }
        }
        Ok(self.default.clone())
    }
}

/// A reasoner that always fails, for exercising failure-downgrade paths
/// (Reflector → zero writes, Compressor → truncation fallback).
pub struct FailingReasoner;

#[async_trait]
impl Reasoner for FailingReasoner {
    async fn complete(&self, _prompt: &str) -> MemoryResult<String> {
        Err(crate::error::MemoryError::unavailable("reason", "reasoning model unreachable"))
    }
}
