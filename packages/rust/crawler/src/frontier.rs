//! Crawl frontier: pending queue, seen-set, and scope rules.
//!
//! Every accepted URL is marked seen in the same critical section that
//! enqueues it, so a link discovered by two concurrent fetches is queued once.

use std::collections::{BTreeSet, HashSet, VecDeque};

use regex::Regex;
use tokio::sync::Mutex;
use tracing::trace;
use url::Url;

use docmap_shared::{DocmapError, Result, SessionConfig, UrlRecord, glob_to_regex};

// ---------------------------------------------------------------------------
// URL normalization
// ---------------------------------------------------------------------------

/// Normalize a URL into its dedup key form.
///
/// Keeps scheme, host, port and path; drops fragment and query; removes a
/// trailing slash except on the root path. Returns `None` for non-HTTP(S)
/// URLs and URLs without a host.
pub fn normalize_url(url: &Url) -> Option<Url> {
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }

    let mut normalized = url.clone();
    normalized.set_fragment(None);
    normalized.set_query(None);

    let path = normalized.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        normalized.set_path(path.trim_end_matches('/'));
        if normalized.path().is_empty() {
            normalized.set_path("/");
        }
    }

    Some(normalized)
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// Host-based crawl boundary derived from the seed set.
///
/// A URL is in scope iff its (scheme, host, port) matches a seed exactly.
/// Subdomains are not expanded. Optional path globs can narrow it further.
#[derive(Debug)]
pub struct Scope {
    origins: BTreeSet<(String, String, u16)>,
    include_patterns: Vec<Regex>,
    exclude_patterns: Vec<Regex>,
}

impl Scope {
    /// Build the scope from seed URLs and the session's path patterns.
    pub fn new(seeds: &[Url], config: &SessionConfig) -> Result<Self> {
        let origins: BTreeSet<_> = seeds.iter().filter_map(origin_of).collect();
        if origins.is_empty() {
            return Err(DocmapError::config("no crawlable http(s) seed URLs"));
        }

        Ok(Self {
            origins,
            include_patterns: compile_patterns(&config.include_patterns)?,
            exclude_patterns: compile_patterns(&config.exclude_patterns)?,
        })
    }

    /// Whether `url` may be fetched in this crawl.
    pub fn contains(&self, url: &Url) -> bool {
        let Some(origin) = origin_of(url) else {
            return false;
        };
        if !self.origins.contains(&origin) {
            return false;
        }

        let path = url.path();
        if self.exclude_patterns.iter().any(|p| p.is_match(path)) {
            return false;
        }
        if !self.include_patterns.is_empty() {
            return self.include_patterns.iter().any(|p| p.is_match(path));
        }
        true
    }
}

fn origin_of(url: &Url) -> Option<(String, String, u16)> {
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    Some((
        url.scheme().to_string(),
        url.host_str()?.to_string(),
        url.port_or_known_default()?,
    ))
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            glob_to_regex(p).ok_or_else(|| DocmapError::config(format!("invalid path pattern '{p}'")))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Frontier
// ---------------------------------------------------------------------------

/// What happened to an offered URL. Rejections are not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Queued with this acceptance sequence number.
    Accepted(u64),
    Duplicate,
    TooDeep,
    OutOfScope,
    /// Not an http(s) URL with a host.
    Unsupported,
}

/// Counters over every offer made to the frontier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrontierStats {
    pub accepted: usize,
    pub duplicates: usize,
    pub too_deep: usize,
    pub out_of_scope: usize,
    pub unsupported: usize,
}

#[derive(Default)]
struct FrontierState {
    seen: HashSet<String>,
    queue: VecDeque<UrlRecord>,
    next_sequence: u64,
    stats: FrontierStats,
}

/// FIFO (breadth-first) queue of URLs to fetch plus the set of URLs ever accepted.
pub struct Frontier {
    scope: Scope,
    max_depth: u32,
    state: Mutex<FrontierState>,
}

impl Frontier {
    pub fn new(scope: Scope, max_depth: u32) -> Self {
        Self {
            scope,
            max_depth,
            state: Mutex::new(FrontierState::default()),
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Offer a URL for fetching. A no-op unless the URL is new, in scope, and
    /// within the depth budget.
    pub async fn offer(&self, url: &Url, depth: u32, discovered_from: Option<&Url>) -> Offer {
        let Some(normalized) = normalize_url(url) else {
            self.state.lock().await.stats.unsupported += 1;
            return Offer::Unsupported;
        };

        let mut state = self.state.lock().await;

        if !self.scope.contains(&normalized) {
            state.stats.out_of_scope += 1;
            trace!(url = %normalized, "offer rejected: out of scope");
            return Offer::OutOfScope;
        }
        if depth > self.max_depth {
            state.stats.too_deep += 1;
            return Offer::TooDeep;
        }
        if !state.seen.insert(normalized.as_str().to_string()) {
            state.stats.duplicates += 1;
            return Offer::Duplicate;
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.stats.accepted += 1;
        trace!(url = %normalized, depth, sequence, "offer accepted");

        state.queue.push_back(UrlRecord {
            url: normalized,
            depth,
            discovered_from: discovered_from.cloned(),
            sequence,
        });
        Offer::Accepted(sequence)
    }

    /// Next URL to fetch in acceptance order, or `None` if nothing is pending.
    pub async fn next(&self) -> Option<UrlRecord> {
        self.state.lock().await.queue.pop_front()
    }

    /// Number of accepted URLs not yet handed out.
    pub async fn pending(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn stats(&self) -> FrontierStats {
        self.state.lock().await.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn frontier_for(seed: &str, max_depth: u32) -> Frontier {
        let scope = Scope::new(&[url(seed)], &SessionConfig::default()).unwrap();
        Frontier::new(scope, max_depth)
    }

    #[test]
    fn normalize_strips_fragment_query_and_trailing_slash() {
        let n = normalize_url(&url("https://Docs.Example.com/guide/intro/?x=1#section")).unwrap();
        assert_eq!(n.as_str(), "https://docs.example.com/guide/intro");

        let root = normalize_url(&url("https://docs.example.com/#top")).unwrap();
        assert_eq!(root.as_str(), "https://docs.example.com/");

        let port = normalize_url(&url("https://docs.example.com:443/a")).unwrap();
        assert_eq!(port.as_str(), "https://docs.example.com/a");
    }

    #[test]
    fn normalize_rejects_non_http() {
        assert!(normalize_url(&url("mailto:team@example.com")).is_none());
        assert!(normalize_url(&url("file:///etc/passwd")).is_none());
    }

    #[test]
    fn scope_is_exact_host() {
        let scope = Scope::new(&[url("https://docs.example.com/")], &SessionConfig::default())
            .unwrap();
        assert!(scope.contains(&url("https://docs.example.com/guide")));
        assert!(!scope.contains(&url("https://api.docs.example.com/guide")));
        assert!(!scope.contains(&url("https://example.com/guide")));
        assert!(!scope.contains(&url("http://docs.example.com/guide")));
    }

    #[test]
    fn scope_applies_path_patterns() {
        let config = SessionConfig {
            exclude_patterns: vec!["/blog/**".into()],
            ..SessionConfig::default()
        };
        let scope = Scope::new(&[url("https://docs.example.com/")], &config).unwrap();
        assert!(!scope.contains(&url("https://docs.example.com/blog/post-1")));
        assert!(scope.contains(&url("https://docs.example.com/guide/intro")));
    }

    #[test]
    fn scope_requires_a_crawlable_seed() {
        let err = Scope::new(&[url("ftp://files.example.com/")], &SessionConfig::default());
        assert!(matches!(err, Err(DocmapError::Config { .. })));
    }

    #[tokio::test]
    async fn offer_dedups_normalized_urls() {
        let frontier = frontier_for("https://docs.example.com/", 3);
        assert_eq!(
            frontier.offer(&url("https://docs.example.com/a"), 0, None).await,
            Offer::Accepted(0)
        );
        assert_eq!(
            frontier.offer(&url("https://docs.example.com/a/#frag"), 1, None).await,
            Offer::Duplicate
        );
        assert_eq!(frontier.pending().await, 1);
    }

    #[tokio::test]
    async fn offer_rejects_scope_and_depth_silently() {
        let frontier = frontier_for("https://docs.example.com/", 1);
        assert_eq!(
            frontier.offer(&url("https://other.example.com/"), 0, None).await,
            Offer::OutOfScope
        );
        assert_eq!(
            frontier.offer(&url("https://docs.example.com/deep"), 2, None).await,
            Offer::TooDeep
        );
        // A too-deep rejection does not mark the URL as seen.
        assert!(matches!(
            frontier.offer(&url("https://docs.example.com/deep"), 1, None).await,
            Offer::Accepted(_)
        ));

        let stats = frontier.stats().await;
        assert_eq!(stats.out_of_scope, 1);
        assert_eq!(stats.too_deep, 1);
        assert_eq!(stats.accepted, 1);
    }

    #[tokio::test]
    async fn next_is_fifo() {
        let frontier = frontier_for("https://docs.example.com/", 3);
        let parent = url("https://docs.example.com/");
        for path in ["/a", "/b", "/c"] {
            let u = parent.join(path).unwrap();
            frontier.offer(&u, 1, Some(&parent)).await;
        }
        let order: Vec<String> = [
            frontier.next().await.unwrap(),
            frontier.next().await.unwrap(),
            frontier.next().await.unwrap(),
        ]
        .iter()
        .map(|r| r.url.path().to_string())
        .collect();
        assert_eq!(order, vec!["/a", "/b", "/c"]);
        assert!(frontier.next().await.is_none());
    }

    #[tokio::test]
    async fn concurrent_offers_enqueue_once() {
        let frontier = Arc::new(frontier_for("https://docs.example.com/", 3));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let f = frontier.clone();
            handles.push(tokio::spawn(async move {
                f.offer(&url("https://docs.example.com/shared"), 1, None).await
            }));
        }
        let mut accepted = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), Offer::Accepted(_)) {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
        assert_eq!(frontier.pending().await, 1);
        assert_eq!(frontier.stats().await.duplicates, 15);
    }
}
