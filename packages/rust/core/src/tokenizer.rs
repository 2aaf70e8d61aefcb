//! Token counting used for segment boundary decisions.

/// Deterministic token counter: identical input always yields the same count.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// Counts whitespace-separated words.
#[derive(Debug, Default, Clone, Copy)]
pub struct WordTokenizer;

impl TokenCounter for WordTokenizer {
    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

/// Approximates subword tokenizers at four characters per token.
#[derive(Debug, Default, Clone, Copy)]
pub struct CharEstimateTokenizer;

impl TokenCounter for CharEstimateTokenizer {
    fn count(&self, text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_counts() {
        assert_eq!(WordTokenizer.count(""), 0);
        assert_eq!(WordTokenizer.count("  one\ttwo \n three "), 3);
    }

    #[test]
    fn char_estimate_rounds_up() {
        assert_eq!(CharEstimateTokenizer.count(""), 0);
        assert_eq!(CharEstimateTokenizer.count("abcd"), 1);
        assert_eq!(CharEstimateTokenizer.count("abcde"), 2);
        // Counts characters, not bytes.
        assert_eq!(CharEstimateTokenizer.count("ééééé"), 2);
    }
}
