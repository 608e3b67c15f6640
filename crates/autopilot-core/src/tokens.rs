//! Token counting for the embedding model.
//!
//! Uses the model's BPE encoding when tiktoken knows it; otherwise estimates
//! one token per four characters. Callers only rely on the count growing with
//! the text, never on it matching what the embedding API enforces.

use std::sync::Arc;

use tiktoken_rs::CoreBPE;

/// Embedding model assumed when none is configured.
pub const DEFAULT_TOKENIZER_MODEL: &str = "text-embedding-ada-002";

/// Counts tokens for one embedding model. Cheap to clone.
#[derive(Clone)]
pub struct TokenCounter {
    bpe: Option<Arc<CoreBPE>>,
}

impl TokenCounter {
    /// Load the encoding for `model`, falling back to `cl100k_base` and then to
    /// the character heuristic.
    pub fn for_model(model: &str) -> Self {
        let bpe = tiktoken_rs::get_bpe_from_model(model)
            .or_else(|_| tiktoken_rs::cl100k_base())
            .map_err(|e| {
                tracing::warn!("tokenizer unavailable for {model}, estimating by length: {e}");
            })
            .ok();
        Self {
            bpe: bpe.map(Arc::new),
        }
    }

    /// Counter that always uses the `chars / 4` estimate.
    pub fn heuristic() -> Self {
        Self { bpe: None }
    }

    /// True when counts come from a real BPE encoding.
    pub fn is_exact(&self) -> bool {
        self.bpe.is_some()
    }

    /// Number of tokens in `text`: 0 for empty text, at least 1 otherwise.
    pub fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        match &self.bpe {
            Some(bpe) => bpe.encode_with_special_tokens(text).len().max(1),
            None => estimate(text),
        }
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::for_model(DEFAULT_TOKENIZER_MODEL)
    }
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter")
            .field("exact", &self.is_exact())
            .finish()
    }
}

fn estimate(text: &str) -> usize {
    (text.chars().count() / 4).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_is_a_quarter_of_chars() {
        let c = TokenCounter::heuristic();
        assert_eq!(c.count(""), 0);
        assert_eq!(c.count("a"), 1);
        assert_eq!(c.count("abcdefgh"), 2);
        assert_eq!(c.count(&"x".repeat(1200)), 300);
    }

    #[test]
    fn heuristic_counts_chars_not_bytes() {
        let c = TokenCounter::heuristic();
        assert_eq!(c.count("ééééééééé"), 2);
    }

    #[test]
    fn bpe_counts_are_deterministic_and_positive() {
        let c = TokenCounter::for_model(DEFAULT_TOKENIZER_MODEL);
        let text = "def add(a, b):\n    return a + b\n";
        assert_eq!(c.count(text), c.count(text));
        assert!(c.count(text) >= 1);
        assert!(c.count(" ") >= 1);
    }

    #[test]
    fn unknown_model_still_counts() {
        let c = TokenCounter::for_model("no-such-model");
        assert!(c.count("hello world") >= 1);
    }
}
