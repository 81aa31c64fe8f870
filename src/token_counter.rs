//! TokenCounter adapter: estimates token count for a text the same way the
//! downstream model would. Always non-suspending and infallible per
//! spec.md §5 — unlike Embedder/Reasoner, there is no backend-selection
//! story for this adapter (spec.md §4.9).

pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// Heuristic counter: ~4 characters per token, the same ratio the
/// teacher's `slicer.rs::estimate_tokens_from_bytes` uses for its XML
/// context budget, generalised from a byte count to a per-call estimate.
pub struct HeuristicTokenCounter {
    chars_per_token: usize,
}

impl HeuristicTokenCounter {
    pub fn new() -> Self {
        Self { chars_per_token: 4 }
    }
}

impl Default for HeuristicTokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCounter for HeuristicTokenCounter {
    fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        ((text.chars().count() as f64) / (self.chars_per_token as f64)).ceil() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_counts_zero() {
        assert_eq!(HeuristicTokenCounter::new().count(""), 0);
    }

    #[test]
    fn four_chars_round_to_one_token() {
        assert_eq!(HeuristicTokenCounter::new().count("abcd"), 1);
    }

    #[test]
    fn partial_token_rounds_up() {
        assert_eq!(HeuristicTokenCounter::new().count("abcde"), 2);
    }

    #[test]
    fn longer_text_scales_linearly() {
        let counter = HeuristicTokenCounter::new();
        let short = counter.count(&"a".repeat(40));
        let long = counter.count(&"a".repeat(400));
        assert_eq!(long, short * 10);
    }
}
