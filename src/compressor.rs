//! Token-budgeted compression: map-reduce over a reasoner when available,
//! deterministic truncation-at-sentence-boundary when it isn't (spec.md
//! §4.6). Output always fits the requested budget.

use regex::Regex;

use crate::config::CompressionConfig;
use crate::error::MemoryResult;
use crate::reasoner::Reasoner;
use crate::token_counter::TokenCounter;

pub struct Compressor<'a> {
    reasoner: Option<&'a dyn Reasoner>,
    token_counter: &'a dyn TokenCounter,
    config: &'a CompressionConfig,
}

impl<'a> Compressor<'a> {
    pub fn new(reasoner: Option<&'a dyn Reasoner>, token_counter: &'a dyn TokenCounter, config: &'a CompressionConfig) -> Self {
        Self { reasoner, token_counter, config }
    }

    /// Compress `sections` (one per contributing block, in retrieval order)
    /// to fit within `max_tokens`. Short-circuits if the naive join already
    /// fits.
    pub async fn compress(&self, sections: &[String], max_tokens: usize) -> MemoryResult<String> {
        if sections.is_empty() || max_tokens == 0 {
            return Ok(String::new());
        }

        let joined = sections.join("\n\n");
        if self.token_counter.count(&joined) <= max_tokens {
            return Ok(joined);
        }

        match self.reasoner {
            Some(reasoner) => self.map_reduce(reasoner, sections, max_tokens).await,
            None => Ok(self.truncate_to_budget(&joined, max_tokens)),
        }
    }

    async fn map_reduce(&self, reasoner: &dyn Reasoner, sections: &[String], max_tokens: usize) -> MemoryResult<String> {
        let per_block_budget = std::cmp::max(1, max_tokens / (sections.len() + 1));

        let mut summaries = Vec::with_capacity(sections.len());
        for section in sections {
            let prompt = format!(
                "Summarise the following note in at most {per_block_budget} tokens, preserving concrete facts:\n\n{section}"
            );
            match reasoner.complete(&prompt).await {
                Ok(summary) => summaries.push(self.truncate_to_budget(&summary, per_block_budget)),
                Err(_) => summaries.push(self.truncate_to_budget(section, per_block_budget)),
            }
        }

        let combined = summaries.join("\n\n");
        if self.token_counter.count(&combined) <= max_tokens {
            return Ok(combined);
        }

        let reduce_prompt = format!(
            "Combine the following summaries into a single summary of at most {max_tokens} tokens:\n\n{combined}"
        );
        let reduced = match reasoner.complete(&reduce_prompt).await {
            Ok(text) => text,
            Err(_) => combined,
        };
        Ok(self.truncate_to_budget(&reduced, max_tokens))
    }

    /// Cuts `text` at the last sentence boundary that keeps it within
    /// `max_tokens`, falling back to a hard character cut if no boundary
    /// is found early enough. Never returns text exceeding the budget.
    fn truncate_to_budget(&self, text: &str, max_tokens: usize) -> String {
        if self.token_counter.count(text) <= max_tokens {
            return text.to_string();
        }

        let boundary_re = Regex::new(&self.config.sentence_boundary_regex).unwrap_or_else(|_| Regex::new(r"[.!?]\s+").unwrap());
        let mut best: Option<String> = None;
        let mut last_end = 0;
        for m in boundary_re.find_iter(text) {
            let candidate = &text[..m.start() + 1];
            if self.token_counter.count(candidate) <= max_tokens {
                best = Some(candidate.to_string());
                last_end = m.end();
            } else {
                break;
            }
        }
        let _ = last_end;
        if let Some(candidate) = best {
            return candidate;
        }

        // No sentence boundary fits: hard character cut, shrinking until it
        // fits the token budget (handles multi-byte boundaries safely).
        let mut end = text.len();
        loop {
            let slice = floor_char_boundary(text, end);
            let candidate = &text[..slice];
            if self.token_counter.count(candidate) <= max_tokens || slice == 0 {
                return candidate.to_string();
            }
            end = slice.saturating_sub(1).max(0);
            if end == 0 {
                return String::new();
            }
        }
    }
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoner::{FailingReasoner, ScriptedReasoner};
    use crate::token_counter::HeuristicTokenCounter;

    #[tokio::test]
    async fn fits_as_is_short_circuits() {
        let counter = HeuristicTokenCounter::new();
        let cfg = CompressionConfig::default();
        let compressor = Compressor::new(None, &counter, &cfg);
        let out = compressor.compress(&["short text".to_string()], 100).await.unwrap();
        assert_eq!(out, "short text");
    }

    #[tokio::test]
    async fn no_reasoner_falls_back_to_truncation() {
        let counter = HeuristicTokenCounter::new();
        let cfg = CompressionConfig::default();
        let compressor = Compressor::new(None, &counter, &cfg);
        let long_text = "First sentence here. Second sentence here. Third sentence here. Fourth sentence here.".to_string();
        let out = compressor.compress(&[long_text], 10).await.unwrap();
        assert!(counter.count(&out) <= 10, "truncated output must respect the budget");
        assert!(!out.is_empty());
    }

    #[tokio::test]
    async fn reasoner_summary_still_bounded_by_budget() {
        let counter = HeuristicTokenCounter::new();
        let cfg = CompressionConfig::default();
        let reasoner = ScriptedReasoner::new(&"x ".repeat(500));
        let compressor = Compressor::new(Some(&reasoner), &counter, &cfg);
        let long_text = "word ".repeat(200);
        let out = compressor.compress(&[long_text], 20).await.unwrap();
        assert!(counter.count(&out) <= 20, "reasoner output must still be bounded");
    }

    #[tokio::test]
    async fn failing_reasoner_downgrades_to_truncation() {
        let counter = HeuristicTokenCounter::new();
        let cfg = CompressionConfig::default();
        let reasoner = FailingReasoner;
        let compressor = Compressor::new(Some(&reasoner), &counter, &cfg);
        let long_text = "One sentence. Two sentence. Three sentence. Four sentence.".to_string();
        let out = compressor.compress(&[long_text], 10).await.unwrap();
        assert!(counter.count(&out) <= 10);
        assert!(!out.is_empty(), "must still produce output despite reasoner failure");
    }

    #[tokio::test]
    async fn empty_sections_produce_empty_output() {
        let counter = HeuristicTokenCounter::new();
        let cfg = CompressionConfig::default();
        let compressor = Compressor::new(None, &counter, &cfg);
        assert_eq!(compressor.compress(&[], 100).await.unwrap(), "");
    }
}
