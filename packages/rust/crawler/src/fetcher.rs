//! HTTP retrieval with politeness throttling, a body cap, and retries.

use std::collections::HashSet;
use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::{Client, Response};
use scraper::{Html, Selector};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use url::Url;

use docmap_shared::{DocmapError, FetchError, FetchedBody, Result, SessionConfig};

use crate::frontier::{Scope, normalize_url};
use crate::throttle::Throttle;

/// Redirect hops followed per fetch.
const MAX_REDIRECTS: usize = 5;

/// Fetches single pages. One instance is shared by every task of a crawl.
pub struct Fetcher {
    client: Client,
    throttle: Throttle,
    max_body_bytes: usize,
    max_retries: u32,
    backoff_base: Duration,
}

impl Fetcher {
    pub fn new(config: &SessionConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            // Redirects are followed by hand so every hop is checked against the scope.
            .redirect(reqwest::redirect::Policy::none())
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| DocmapError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            throttle: Throttle::new(config.concurrent_fetches, config.min_request_interval),
            max_body_bytes: config.max_body_bytes,
            max_retries: config.max_retries,
            backoff_base: config.min_request_interval,
        })
    }

    /// Fetch `url`, retrying transient failures with exponential backoff.
    ///
    /// Redirects are followed only while their targets stay inside `scope`.
    /// Outbound links in the result are normalized, deduplicated and limited
    /// to `scope`.
    pub async fn fetch(&self, url: &Url, scope: &Scope) -> std::result::Result<FetchedBody, FetchError> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(url, scope).await {
                Ok(body) => return Ok(body),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let backoff = self.backoff_base * 2u32.saturating_pow(attempt - 1);
                    warn!(%url, error = %err, attempt, ?backoff, "transient fetch failure, retrying");
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn fetch_once(&self, url: &Url, scope: &Scope) -> std::result::Result<FetchedBody, FetchError> {
        let _permit = self.throttle.acquire().await?;

        let mut current = url.clone();
        let mut hops = 0;
        let mut response = loop {
            debug!(url = %current, "fetching page");
            let response = self
                .client
                .get(current.as_str())
                .send()
                .await
                .map_err(classify)?;

            let Some(target) = redirect_target(&response, &current) else {
                break response;
            };
            if hops == MAX_REDIRECTS {
                return Err(FetchError::TooManyRedirects(MAX_REDIRECTS));
            }
            if !normalize_url(&target).is_some_and(|t| scope.contains(&t)) {
                debug!(from = %current, to = %target, "redirect leaves scope");
                return Err(FetchError::OffScopeRedirect(target.to_string()));
            }
            hops += 1;
            current = target;
        };

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if !content_type.is_empty() && !content_type.contains("html") {
            return Err(FetchError::UnsupportedContentType(content_type));
        }

        let limit = self.max_body_bytes;
        if response.content_length().is_some_and(|len| len as usize > limit) {
            return Err(FetchError::TooLarge { limit });
        }

        // Content-Length can be absent or wrong; enforce the cap while reading.
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(classify)? {
            if bytes.len() + chunk.len() > limit {
                return Err(FetchError::TooLarge { limit });
            }
            bytes.extend_from_slice(&chunk);
        }

        let body = String::from_utf8_lossy(&bytes).into_owned();
        let (links, out_of_scope_links) = extract_links(&body, &current, scope);

        Ok(FetchedBody {
            status: status.as_u16(),
            content_type,
            content_hash: compute_hash(&body),
            body,
            links,
            out_of_scope_links,
        })
    }
}

/// Where a 3xx response points, resolved against the requested URL.
fn redirect_target(response: &Response, requested: &Url) -> Option<Url> {
    if !response.status().is_redirection() {
        return None;
    }
    let location = response.headers().get(LOCATION)?.to_str().ok()?;
    requested.join(location.trim()).ok()
}

fn classify(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::ConnectionFailure(err.to_string())
    }
}

/// Extract in-scope outbound links, resolved against `base_url`, in document
/// order. Also returns how many distinct links fell outside the scope.
fn extract_links(body: &str, base_url: &Url, scope: &Scope) -> (Vec<Url>, usize) {
    let doc = Html::parse_document(body);
    let Ok(link_sel) = Selector::parse("a[href]") else {
        return (Vec::new(), 0);
    };

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    let mut out_of_scope = 0;
    for el in doc.select(&link_sel) {
        let Some(href) = el.value().attr("href").map(str::trim) else {
            continue;
        };
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
        {
            continue;
        }

        let Some(link) = base_url.join(href).ok().as_ref().and_then(normalize_url) else {
            continue;
        };
        if !seen.insert(link.as_str().to_string()) {
            continue;
        }
        if scope.contains(&link) {
            links.push(link);
        } else {
            out_of_scope += 1;
        }
    }
    (links, out_of_scope)
}

fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn test_config() -> SessionConfig {
        SessionConfig {
            min_request_interval: Duration::ZERO,
            request_timeout: Duration::from_secs(2),
            ..SessionConfig::default()
        }
    }

    fn html(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/html; charset=utf-8")
    }

    fn scope_for(server: &MockServer, config: &SessionConfig) -> Scope {
        Scope::new(&[Url::parse(&server.uri()).unwrap()], config).unwrap()
    }

    #[test]
    fn links_are_resolved_normalized_and_scoped() {
        let base = Url::parse("https://docs.example.com/guide/").unwrap();
        let scope = Scope::new(&[base.clone()], &SessionConfig::default()).unwrap();
        let body = r##"<html><body>
            <a href="intro">Intro</a>
            <a href="/api/#methods">API</a>
            <a href="/api">API again</a>
            <a href="#top">Top</a>
            <a href="mailto:team@example.com">Mail</a>
            <a href="javascript:void(0)">JS</a>
            <a href="https://elsewhere.example.com/x">External</a>
        </body></html>"##;

        let (links, out_of_scope) = extract_links(body, &base, &scope);
        let links: Vec<String> = links
            .iter()
            .map(|u| u.to_string())
            .collect();
        assert_eq!(
            links,
            vec![
                "https://docs.example.com/guide/intro",
                "https://docs.example.com/api",
            ]
        );
        assert_eq!(out_of_scope, 1);
    }

    #[test]
    fn hash_is_sha256_hex() {
        let hash = compute_hash("hello world");
        assert_eq!(hash.len(), 64);
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn fetch_returns_body_and_links() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(html(r#"<main><h1>Home</h1><a href="/next">next</a></main>"#))
            .mount(&server)
            .await;

        let config = test_config();
        let fetcher = Fetcher::new(&config).unwrap();
        let scope = scope_for(&server, &config);
        let url = Url::parse(&server.uri()).unwrap();

        let page = fetcher.fetch(&url, &scope).await.unwrap();
        assert_eq!(page.status, 200);
        assert!(page.content_type.starts_with("text/html"));
        assert!(page.body.contains("<h1>Home</h1>"));
        assert_eq!(page.links.len(), 1);
        assert_eq!(page.links[0].path(), "/next");
    }

    #[tokio::test]
    async fn http_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let config = test_config();
        let fetcher = Fetcher::new(&config).unwrap();
        let scope = scope_for(&server, &config);
        let url = Url::parse(&format!("{}/missing", server.uri())).unwrap();

        let err = fetcher.fetch(&url, &scope).await.unwrap_err();
        assert_eq!(err, FetchError::HttpStatus(404));
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(html(&"x".repeat(4096)))
            .mount(&server)
            .await;

        let config = SessionConfig {
            max_body_bytes: 1024,
            ..test_config()
        };
        let fetcher = Fetcher::new(&config).unwrap();
        let scope = scope_for(&server, &config);
        let url = Url::parse(&server.uri()).unwrap();

        let err = fetcher.fetch(&url, &scope).await.unwrap_err();
        assert_eq!(err, FetchError::TooLarge { limit: 1024 });
    }

    #[tokio::test]
    async fn non_html_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("{}", "application/json"))
            .mount(&server)
            .await;

        let config = test_config();
        let fetcher = Fetcher::new(&config).unwrap();
        let scope = scope_for(&server, &config);
        let url = Url::parse(&server.uri()).unwrap();

        let err = fetcher.fetch(&url, &scope).await.unwrap_err();
        assert_eq!(err.kind(), "unsupported_content_type");
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(html("<p>recovered</p>"))
            .expect(1)
            .mount(&server)
            .await;

        let config = test_config();
        let fetcher = Fetcher::new(&config).unwrap();
        let scope = scope_for(&server, &config);
        let url = Url::parse(&server.uri()).unwrap();

        let page = fetcher.fetch(&url, &scope).await.unwrap();
        assert!(page.body.contains("recovered"));
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let config = SessionConfig {
            max_retries: 1,
            ..test_config()
        };
        let fetcher = Fetcher::new(&config).unwrap();
        let scope = scope_for(&server, &config);
        let url = Url::parse(&server.uri()).unwrap();

        let err = fetcher.fetch(&url, &scope).await.unwrap_err();
        assert_eq!(err, FetchError::HttpStatus(500));
    }

    #[tokio::test]
    async fn in_scope_redirect_is_followed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(301).insert_header("location", "/guide/new"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/guide/new"))
            .respond_with(html(r#"<p>moved</p><a href="next">next</a>"#))
            .expect(1)
            .mount(&server)
            .await;

        let config = test_config();
        let fetcher = Fetcher::new(&config).unwrap();
        let scope = scope_for(&server, &config);
        let url = Url::parse(&format!("{}/old", server.uri())).unwrap();

        let page = fetcher.fetch(&url, &scope).await.unwrap();
        assert!(page.body.contains("moved"));
        // Relative links resolve against the page that was actually served.
        assert_eq!(page.links[0].path(), "/guide/next");
    }

    #[tokio::test]
    async fn redirect_to_another_host_is_not_followed() {
        let server = MockServer::start().await;
        let other = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(html("<p>offsite content</p>"))
            .expect(0)
            .mount(&other)
            .await;
        let target = format!("{}/offsite", other.uri());
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", target.as_str()))
            .expect(1)
            .mount(&server)
            .await;

        let config = test_config();
        let fetcher = Fetcher::new(&config).unwrap();
        let scope = scope_for(&server, &config);
        let url = Url::parse(&server.uri()).unwrap();

        let err = fetcher.fetch(&url, &scope).await.unwrap_err();
        assert_eq!(err, FetchError::OffScopeRedirect(target));
    }

    #[tokio::test]
    async fn redirect_chains_are_bounded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/loop"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/loop"))
            .expect(MAX_REDIRECTS as u64 + 1)
            .mount(&server)
            .await;

        let config = test_config();
        let fetcher = Fetcher::new(&config).unwrap();
        let scope = scope_for(&server, &config);
        let url = Url::parse(&format!("{}/loop", server.uri())).unwrap();

        let err = fetcher.fetch(&url, &scope).await.unwrap_err();
        assert_eq!(err, FetchError::TooManyRedirects(MAX_REDIRECTS));
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(html("<p>late</p>").set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let config = SessionConfig {
            request_timeout: Duration::from_millis(100),
            max_retries: 0,
            ..test_config()
        };
        let fetcher = Fetcher::new(&config).unwrap();
        let scope = scope_for(&server, &config);
        let url = Url::parse(&server.uri()).unwrap();

        let err = fetcher.fetch(&url, &scope).await.unwrap_err();
        assert_eq!(err, FetchError::Timeout);
    }
}
