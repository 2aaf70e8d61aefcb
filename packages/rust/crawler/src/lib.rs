//! Link-following crawler for documentation sites.
//!
//! This crate provides:
//! - [`frontier`]: URL normalization, host scope, and the dedup queue
//! - [`fetcher`]: throttled, size-capped HTTP retrieval with link extraction
//! - [`engine`]: the crawl state machine with page budget and cancellation

pub mod engine;
pub mod fetcher;
pub mod frontier;
pub mod throttle;

pub use engine::{CrawlOutput, CrawlProgress, CrawlState, CrawlSummary, Crawler, SilentCrawl};
pub use fetcher::Fetcher;
pub use frontier::{Frontier, FrontierStats, Offer, Scope, normalize_url};
pub use throttle::{Throttle, ThrottlePermit};
