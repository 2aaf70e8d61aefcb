//! Pairwise similarity between topic descriptors.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use docmap_shared::TopicDescriptor;

/// A failed comparison. The pair is treated as not similar.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct SimilarityError {
    pub message: String,
}

impl SimilarityError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Scores two descriptors in `[0, 1]`; higher means more alike.
///
/// Implementations are shared across threads during pair scoring.
pub trait Similarity: Send + Sync {
    fn score(&self, a: &TopicDescriptor, b: &TopicDescriptor) -> Result<f64, SimilarityError>;
}

/// Word-overlap similarity over name and description.
///
/// Per field: `0.6 * jaccard + 0.4 * overlap_coefficient` of the lowercased
/// word sets. The descriptor score weights name 0.6 and description 0.4.
/// A field with no words on either side scores 0. Symmetric.
#[derive(Debug, Default, Clone, Copy)]
pub struct LexicalSimilarity;

static WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").expect("valid regex"));

const NAME_WEIGHT: f64 = 0.6;
const DESCRIPTION_WEIGHT: f64 = 0.4;
const JACCARD_WEIGHT: f64 = 0.6;
const OVERLAP_WEIGHT: f64 = 0.4;

impl Similarity for LexicalSimilarity {
    fn score(&self, a: &TopicDescriptor, b: &TopicDescriptor) -> Result<f64, SimilarityError> {
        Ok(NAME_WEIGHT * text_similarity(&a.name, &b.name)
            + DESCRIPTION_WEIGHT * text_similarity(&a.description, &b.description))
    }
}

/// Word-set similarity of two texts in `[0, 1]`.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    let left = word_set(a);
    let right = word_set(b);
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }

    let shared = left.intersection(&right).count() as f64;
    let union = left.union(&right).count() as f64;
    let smaller = left.len().min(right.len()) as f64;

    JACCARD_WEIGHT * (shared / union) + OVERLAP_WEIGHT * (shared / smaller)
}

fn word_set(text: &str) -> BTreeSet<String> {
    let lowered = text.to_lowercase();
    WORD_RE
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}
