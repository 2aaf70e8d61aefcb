//! End-to-end session: seeds → crawl → clean → segment → infer → consolidate → modules.

use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use url::Url;

use docmap_cleaner::{Cleaner, HtmlCleaner};
use docmap_crawler::{CrawlProgress, CrawlSummary, Crawler};
use docmap_shared::{
    ModuleEntry, PageOutcome, PageRecord, Result, Segment, SegmentRef, SessionConfig, SessionId,
    TopicDescriptor,
};

use crate::consolidate::{self, ConsolidationDiagnostics, Reconcile, RepresentativeReconciler};
use crate::inference::Inference;
use crate::output::shape_modules;
use crate::segmenter;
use crate::similarity::{LexicalSimilarity, Similarity};
use crate::tokenizer::{CharEstimateTokenizer, TokenCounter};

/// The pluggable parts of a session.
///
/// Without an inference backend the session stops after segmentation and
/// reports no modules.
pub struct Collaborators<'a> {
    pub cleaner: &'a dyn Cleaner,
    pub tokenizer: &'a dyn TokenCounter,
    pub inference: Option<&'a dyn Inference>,
    pub similarity: &'a dyn Similarity,
    pub reconciler: &'a dyn Reconcile,
}

impl<'a> Collaborators<'a> {
    /// Built-in cleaner, tokenizer, similarity and reconciler around `inference`.
    pub fn with_inference(inference: Option<&'a dyn Inference>) -> Self {
        Self {
            cleaner: &HtmlCleaner,
            tokenizer: &CharEstimateTokenizer,
            inference,
            similarity: &LexicalSimilarity,
            reconciler: &RepresentativeReconciler,
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// A page or segment that failed at some stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageFailure {
    pub url: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceFailure {
    pub segment: SegmentRef,
    pub message: String,
}

/// Every per-item failure of a session, plus the counts needed to tell a
/// partial result from a complete one.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    pub pages_fetched: usize,
    pub pages_failed: usize,
    pub fetch_failures: Vec<PageFailure>,
    pub clean_failures: Vec<PageFailure>,
    pub segmentation_failures: Vec<PageFailure>,
    pub segments: usize,
    pub oversized_segments: usize,
    pub inference_failures: Vec<InferenceFailure>,
    /// Segments never sent to inference because the session was cancelled.
    pub segments_not_inferred: usize,
    /// Segments re-asked with the relaxed prompt after the main pass found nothing.
    pub relaxed_attempts: usize,
    pub descriptors_inferred: usize,
    pub consolidation: ConsolidationDiagnostics,
    pub cancelled: bool,
}

impl Diagnostics {
    /// Number of recorded per-item failures across all stages.
    pub fn failure_count(&self) -> usize {
        self.fetch_failures.len()
            + self.clean_failures.len()
            + self.segmentation_failures.len()
            + self.inference_failures.len()
            + self.consolidation.similarity_failures.len()
            + self.consolidation.reconcile_failures.len()
    }
}

/// Per-page line of the report.
#[derive(Debug, Clone, Serialize)]
pub struct PageSummary {
    pub url: String,
    pub depth: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub segments: usize,
}

/// Result of one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: SessionId,
    pub seeds: Vec<String>,
    pub modules: Vec<ModuleEntry>,
    pub pages: Vec<PageSummary>,
    pub crawl: CrawlSummary,
    pub diagnostics: Diagnostics,
    pub elapsed_ms: u64,
}

/// Progress callback for reporting session status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each crawled page, successful or not.
    fn page_fetched(&self, url: &str, current: usize, budget: usize);
    /// Called after each segment has been through inference.
    fn segment_inferred(&self, current: usize, total: usize);
    /// Called when the session completes.
    fn done(&self, report: &SessionReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn page_fetched(&self, _url: &str, _current: usize, _budget: usize) {}
    fn segment_inferred(&self, _current: usize, _total: usize) {}
    fn done(&self, _report: &SessionReport) {}
}

/// Adapts a `ProgressReporter` to the crawler's `CrawlProgress`.
struct SessionCrawlProgress<'a> {
    inner: &'a dyn ProgressReporter,
}

impl CrawlProgress for SessionCrawlProgress<'_> {
    fn page_done(&self, page: &PageRecord, completed: usize, budget: usize) {
        self.inner.page_fetched(page.url().as_str(), completed, budget);
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Run one session.
///
/// Fails only on invalid configuration or unusable seeds, before any
/// request is made. Every later failure is recorded in the report's
/// diagnostics. Cancelling stops the crawl and any remaining inference; the
/// report then covers what was gathered so far.
#[instrument(skip_all, fields(seeds = seeds.len()))]
pub async fn run_session(
    seeds: &[Url],
    config: &SessionConfig,
    collaborators: &Collaborators<'_>,
    cancel: CancellationToken,
    progress: &dyn ProgressReporter,
) -> Result<SessionReport> {
    let started = Instant::now();
    let session_id = SessionId::new();
    let crawler = Crawler::new(config.clone())?;

    info!(%session_id, "starting session");

    // --- Phase 1: Crawl ---
    progress.phase("Crawling");
    let crawl_progress = SessionCrawlProgress { inner: progress };
    let crawl = crawler
        .crawl(seeds, cancel.clone(), &crawl_progress)
        .await?;

    let mut diagnostics = Diagnostics {
        pages_fetched: crawl.summary.pages_fetched,
        pages_failed: crawl.summary.pages_failed,
        cancelled: crawl.summary.cancelled,
        ..Default::default()
    };

    // --- Phase 2: Clean + segment ---
    progress.phase("Segmenting");
    let (segments, pages) = segment_pages(&crawl.pages, config, collaborators, &mut diagnostics);

    // --- Phase 3: Inference ---
    let descriptors = match collaborators.inference {
        Some(inference) => {
            progress.phase("Inferring topics");
            infer_segments(inference, &segments, &cancel, progress, &mut diagnostics).await
        }
        None => Vec::new(),
    };
    diagnostics.cancelled |= cancel.is_cancelled();

    // --- Phase 4: Consolidate ---
    let modules = if descriptors.is_empty() {
        Vec::new()
    } else {
        progress.phase("Consolidating");
        let consolidation = consolidate::consolidate(
            descriptors,
            collaborators.similarity,
            config.similarity_threshold,
            collaborators.reconciler,
        );
        diagnostics.consolidation = consolidation.diagnostics;
        shape_modules(&consolidation.descriptors)
    };

    let report = SessionReport {
        session_id,
        seeds: seeds.iter().map(Url::to_string).collect(),
        modules,
        pages,
        crawl: crawl.summary,
        diagnostics,
        elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    };

    progress.done(&report);

    info!(
        session_id = %report.session_id,
        modules = report.modules.len(),
        failures = report.diagnostics.failure_count(),
        cancelled = report.diagnostics.cancelled,
        elapsed_ms = report.elapsed_ms,
        "session complete"
    );

    Ok(report)
}

/// Clean and segment fetched pages in frontier order, numbering segments
/// across the whole session.
fn segment_pages(
    records: &[PageRecord],
    config: &SessionConfig,
    collaborators: &Collaborators<'_>,
    diagnostics: &mut Diagnostics,
) -> (Vec<(SegmentRef, Segment)>, Vec<PageSummary>) {
    let mut segments: Vec<(SegmentRef, Segment)> = Vec::new();
    let mut pages: Vec<PageSummary> = Vec::with_capacity(records.len());

    for record in records {
        let url = record.url().to_string();
        let mut summary = PageSummary {
            url: url.clone(),
            depth: record.record.depth,
            title: None,
            status: None,
            error: None,
            segments: 0,
        };

        let body = match &record.outcome {
            PageOutcome::Fetched(body) => body,
            PageOutcome::Failed(err) => {
                summary.error = Some(err.to_string());
                diagnostics.fetch_failures.push(PageFailure {
                    url,
                    message: err.to_string(),
                });
                pages.push(summary);
                continue;
            }
        };
        summary.status = Some(body.status);

        let tree = match collaborators.cleaner.clean(&body.body, &url) {
            Ok(tree) => tree,
            Err(e) => {
                warn!(%url, error = %e, "cleaning failed, skipping page");
                summary.error = Some(e.to_string());
                diagnostics.clean_failures.push(PageFailure {
                    url,
                    message: e.to_string(),
                });
                pages.push(summary);
                continue;
            }
        };
        summary.title = tree.title.clone();

        match segmenter::segment(&tree, config.max_tokens_per_segment, collaborators.tokenizer) {
            Ok(page_segments) => {
                summary.segments = page_segments.len();
                for segment in page_segments {
                    if segment.oversized {
                        diagnostics.oversized_segments += 1;
                    }
                    let source = SegmentRef {
                        ordinal: segments.len(),
                        url: url.clone(),
                        index: segment.index,
                    };
                    segments.push((source, segment));
                }
            }
            Err(e) => {
                warn!(%url, error = %e, "segmentation failed, skipping page");
                summary.error = Some(e.to_string());
                diagnostics.segmentation_failures.push(PageFailure {
                    url,
                    message: e.to_string(),
                });
            }
        }
        pages.push(summary);
    }

    diagnostics.segments = segments.len();
    info!(
        pages = pages.len(),
        segments = segments.len(),
        "segmentation complete"
    );
    (segments, pages)
}

/// Segments the relaxed pass may try.
const RELAXED_SEGMENTS: usize = 3;
/// Segments with less text than this are skipped by the relaxed pass.
const RELAXED_MIN_CHARS: usize = 50;

/// Infer descriptors segment by segment, in segment order.
///
/// If no segment yields anything, the first few substantial segments are
/// re-asked with a relaxed prompt until one of them does.
async fn infer_segments(
    inference: &dyn Inference,
    segments: &[(SegmentRef, Segment)],
    cancel: &CancellationToken,
    progress: &dyn ProgressReporter,
    diagnostics: &mut Diagnostics,
) -> Vec<TopicDescriptor> {
    let mut descriptors = Vec::new();
    let total = segments.len();

    for (done, (source, segment)) in segments.iter().enumerate() {
        if cancel.is_cancelled() {
            diagnostics.segments_not_inferred = total - done;
            info!(remaining = total - done, "cancelled, skipping remaining inference");
            break;
        }

        match inference.infer(segment, source).await {
            Ok(found) => descriptors.extend(found),
            Err(e) => {
                warn!(url = %source.url, index = source.index, error = %e, "inference failed");
                diagnostics.inference_failures.push(InferenceFailure {
                    segment: source.clone(),
                    message: e.to_string(),
                });
            }
        }
        progress.segment_inferred(done + 1, total);
    }

    if descriptors.is_empty() {
        descriptors = relaxed_pass(inference, segments, cancel, diagnostics).await;
    }

    diagnostics.descriptors_inferred = descriptors.len();
    descriptors
}

async fn relaxed_pass(
    inference: &dyn Inference,
    segments: &[(SegmentRef, Segment)],
    cancel: &CancellationToken,
    diagnostics: &mut Diagnostics,
) -> Vec<TopicDescriptor> {
    let candidates = segments
        .iter()
        .take(RELAXED_SEGMENTS)
        .filter(|(_, segment)| segment.text.trim().chars().count() >= RELAXED_MIN_CHARS);

    for (source, segment) in candidates {
        if cancel.is_cancelled() {
            break;
        }
        diagnostics.relaxed_attempts += 1;
        match inference.infer_relaxed(segment, source).await {
            Ok(found) if !found.is_empty() => {
                info!(url = %source.url, found = found.len(), "relaxed inference found topics");
                return found;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(url = %source.url, index = source.index, error = %e, "relaxed inference failed");
            }
        }
    }
    Vec::new()
}
