//! Segmentation, topic inference and consolidation for docmap.
//!
//! This crate turns crawled pages into a canonical module/submodule list:
//! cleaned pages are cut into token-bounded segments, each segment is
//! handed to an [`inference::Inference`] backend, and the resulting topic
//! descriptors are merged by [`consolidate::consolidate`]. The
//! [`pipeline::run_session`] entry point drives the whole flow.

pub mod consolidate;
pub mod inference;
pub mod output;
pub mod pipeline;
pub mod segmenter;
pub mod similarity;
pub mod tokenizer;

pub use consolidate::{
    Consolidation, ConsolidationDiagnostics, Reconcile, ReconcileError, ReconcileFailure,
    RepresentativeReconciler, SimilarityFailure, consolidate,
};
pub use inference::{Inference, InferenceError, LlmInference};
pub use output::{modules_to_json, shape_modules};
pub use pipeline::{
    Collaborators, Diagnostics, InferenceFailure, PageFailure, PageSummary, ProgressReporter,
    SessionReport, SilentProgress, run_session,
};
pub use segmenter::{SegmentationError, segment};
pub use similarity::{LexicalSimilarity, Similarity, SimilarityError, text_similarity};
pub use tokenizer::{CharEstimateTokenizer, TokenCounter, WordTokenizer};
