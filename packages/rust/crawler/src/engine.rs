//! Crawl orchestration: drives the frontier and fetcher to completion.
//!
//! The crawler moves through `Idle → Running → Draining → Done`. While
//! running it keeps up to `concurrent_fetches` fetch tasks in flight and
//! never dispatches more than `max_pages` fetches in total. Each finished
//! task has already offered its links to the shared frontier, so discovery
//! and dispatch interleave without a separate coordinator.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use docmap_shared::{PageOutcome, PageRecord, Result, SessionConfig, UrlRecord};

use crate::fetcher::Fetcher;
use crate::frontier::{Frontier, Scope};

// ---------------------------------------------------------------------------
// State and summary
// ---------------------------------------------------------------------------

/// Lifecycle of one crawl session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlState {
    Idle,
    Running,
    /// No new dispatches; in-flight fetches are finishing.
    Draining,
    Done,
}

/// Counters describing a finished crawl.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlSummary {
    /// Pages fetched successfully.
    pub pages_fetched: usize,
    /// Pages whose fetch failed (recorded, not retried further).
    pub pages_failed: usize,
    /// Failed pages keyed by fetch error kind.
    pub errors_by_kind: BTreeMap<String, usize>,
    /// Links dropped because they fell outside the seed hosts or path patterns.
    pub scope_rejected: usize,
    /// Links dropped because they were beyond `max_depth`.
    pub depth_rejected: usize,
    /// Offers of URLs that had already been accepted.
    pub duplicates: usize,
    /// Fetches started; never exceeds `max_pages`.
    pub dispatched: usize,
    pub cancelled: bool,
    /// In-flight fetches abandoned when the cancellation grace period ran out.
    pub aborted: usize,
    pub duration_ms: u64,
    pub final_state: CrawlState,
}

/// Everything a crawl produced.
#[derive(Debug, Clone)]
pub struct CrawlOutput {
    /// One record per dispatched fetch that completed, in frontier order.
    pub pages: Vec<PageRecord>,
    pub summary: CrawlSummary,
}

/// Per-page callback for progress display.
pub trait CrawlProgress: Send + Sync {
    fn page_done(&self, page: &PageRecord, completed: usize, budget: usize);
}

/// Ignores every callback.
pub struct SilentCrawl;

impl CrawlProgress for SilentCrawl {
    fn page_done(&self, _page: &PageRecord, _completed: usize, _budget: usize) {}
}

// ---------------------------------------------------------------------------
// Crawler
// ---------------------------------------------------------------------------

pub struct Crawler {
    config: SessionConfig,
    fetcher: Arc<Fetcher>,
}

impl Crawler {
    /// Validate `config` and build the HTTP client. No network activity.
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let fetcher = Arc::new(Fetcher::new(&config)?);
        Ok(Self { config, fetcher })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Crawl from `seeds` until the page budget or the frontier is exhausted,
    /// or `cancel` fires. Partial results are returned on cancellation.
    #[instrument(skip_all, fields(seeds = seeds.len(), max_pages = self.config.max_pages))]
    pub async fn crawl(
        &self,
        seeds: &[Url],
        cancel: CancellationToken,
        progress: &dyn CrawlProgress,
    ) -> Result<CrawlOutput> {
        let started = Instant::now();
        let mut state = CrawlState::Idle;

        let scope = Scope::new(seeds, &self.config)?;
        let frontier = Arc::new(Frontier::new(scope, self.config.max_depth));
        for seed in seeds {
            frontier.offer(seed, 0, None).await;
        }

        info!(
            max_depth = self.config.max_depth,
            concurrency = self.config.concurrent_fetches,
            min_interval_ms = self.config.min_request_interval.as_millis() as u64,
            "starting crawl"
        );
        transition(&mut state, CrawlState::Running);

        let budget = self.config.max_pages;
        let mut tasks: JoinSet<PageRecord> = JoinSet::new();
        let mut pages: Vec<PageRecord> = Vec::new();
        let mut dispatched = 0usize;
        let mut cancelled = false;

        loop {
            if cancel.is_cancelled() {
                cancelled = true;
                if state == CrawlState::Running {
                    transition(&mut state, CrawlState::Draining);
                }
                break;
            }

            if state == CrawlState::Running {
                while tasks.len() < self.config.concurrent_fetches && dispatched < budget {
                    let Some(record) = frontier.next().await else {
                        break;
                    };
                    dispatched += 1;
                    debug!(url = %record.url, depth = record.depth, dispatched, "dispatching fetch");
                    tasks.spawn(fetch_task(self.fetcher.clone(), frontier.clone(), record));
                }

                let exhausted = tasks.is_empty() && frontier.pending().await == 0;
                if dispatched >= budget || exhausted {
                    transition(&mut state, CrawlState::Draining);
                }
            }

            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => continue,
                joined = tasks.join_next() => {
                    if let Some(joined) = joined {
                        collect(joined, &mut pages, progress, budget);
                    }
                }
            }
        }

        let mut aborted = 0;
        if cancelled && !tasks.is_empty() {
            info!(
                in_flight = tasks.len(),
                grace_ms = self.config.cancel_grace_period.as_millis() as u64,
                "cancelled, waiting for in-flight fetches"
            );
            let deadline = tokio::time::Instant::now() + self.config.cancel_grace_period;
            loop {
                match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                    Ok(Some(joined)) => collect(joined, &mut pages, progress, budget),
                    Ok(None) => break,
                    Err(_) => {
                        aborted = tasks.len();
                        tasks.abort_all();
                        warn!(aborted, "grace period elapsed, aborting in-flight fetches");
                        break;
                    }
                }
            }
        }

        transition(&mut state, CrawlState::Done);
        pages.sort_by_key(|p| p.record.sequence);

        let stats = frontier.stats().await;
        let mut summary = CrawlSummary {
            pages_fetched: 0,
            pages_failed: 0,
            errors_by_kind: BTreeMap::new(),
            scope_rejected: stats.out_of_scope,
            depth_rejected: stats.too_deep,
            duplicates: stats.duplicates,
            dispatched,
            cancelled,
            aborted,
            duration_ms: elapsed_ms(started.elapsed()),
            final_state: state,
        };
        for page in &pages {
            match &page.outcome {
                PageOutcome::Fetched(body) => {
                    summary.pages_fetched += 1;
                    summary.scope_rejected += body.out_of_scope_links;
                }
                PageOutcome::Failed(err) => {
                    summary.pages_failed += 1;
                    *summary.errors_by_kind.entry(err.kind().to_string()).or_default() += 1;
                }
            }
        }

        info!(
            pages_fetched = summary.pages_fetched,
            pages_failed = summary.pages_failed,
            scope_rejected = summary.scope_rejected,
            cancelled,
            duration_ms = summary.duration_ms,
            "crawl complete"
        );

        Ok(CrawlOutput { pages, summary })
    }
}

/// Fetch one URL and feed its links back into the frontier before reporting.
async fn fetch_task(fetcher: Arc<Fetcher>, frontier: Arc<Frontier>, record: UrlRecord) -> PageRecord {
    let outcome = match fetcher.fetch(&record.url, frontier.scope()).await {
        Ok(body) => {
            for link in &body.links {
                frontier.offer(link, record.depth + 1, Some(&record.url)).await;
            }
            PageOutcome::Fetched(body)
        }
        Err(err) => {
            warn!(url = %record.url, error = %err, "fetch failed");
            PageOutcome::Failed(err)
        }
    };

    PageRecord {
        record,
        fetched_at: Utc::now(),
        outcome,
    }
}

fn collect(
    joined: std::result::Result<PageRecord, tokio::task::JoinError>,
    pages: &mut Vec<PageRecord>,
    progress: &dyn CrawlProgress,
    budget: usize,
) {
    match joined {
        Ok(page) => {
            pages.push(page);
            if let Some(page) = pages.last() {
                progress.page_done(page, pages.len(), budget);
            }
        }
        Err(e) => warn!(error = %e, "fetch task did not complete"),
    }
}

fn transition(state: &mut CrawlState, next: CrawlState) {
    debug!(from = ?*state, to = ?next, "crawl state");
    *state = next;
}

fn elapsed_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
