//! Application configuration for docmap.
//!
//! User config lives at `~/.docmap/docmap.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DocmapError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "docmap.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".docmap";

/// User-Agent string for crawl requests.
pub const DEFAULT_USER_AGENT: &str = concat!("docmap/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Config structs (matching docmap.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Session defaults.
    #[serde(default)]
    pub session: SessionDefaults,

    /// Crawl policies.
    #[serde(default)]
    pub crawl_policies: CrawlPoliciesConfig,

    /// Inference backend settings.
    #[serde(default)]
    pub llm: LlmConfig,
}

/// `[session]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDefaults {
    /// Maximum number of fetches dispatched per session.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Maximum link depth from a seed.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Maximum concurrent in-flight requests.
    #[serde(default = "default_concurrent_fetches")]
    pub concurrent_fetches: usize,

    /// Minimum ms between any two request starts.
    #[serde(default = "default_min_request_interval_ms")]
    pub min_request_interval_ms: u64,

    /// Body size cap in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Upper token bound per segment.
    #[serde(default = "default_max_tokens_per_segment")]
    pub max_tokens_per_segment: usize,

    /// Similarity at or above which two descriptors are near-duplicates.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Retries for transient fetch failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// How long in-flight fetches may run after cancellation, in ms.
    #[serde(default = "default_cancel_grace_period_ms")]
    pub cancel_grace_period_ms: u64,

    /// User-Agent header for crawl requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            max_depth: default_max_depth(),
            concurrent_fetches: default_concurrent_fetches(),
            min_request_interval_ms: default_min_request_interval_ms(),
            max_body_bytes: default_max_body_bytes(),
            max_tokens_per_segment: default_max_tokens_per_segment(),
            similarity_threshold: default_similarity_threshold(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            cancel_grace_period_ms: default_cancel_grace_period_ms(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_max_pages() -> usize {
    50
}
fn default_max_depth() -> u32 {
    3
}
fn default_concurrent_fetches() -> usize {
    4
}
fn default_min_request_interval_ms() -> u64 {
    500
}
fn default_max_body_bytes() -> usize {
    5 * 1024 * 1024
}
fn default_max_tokens_per_segment() -> usize {
    800
}
fn default_similarity_threshold() -> f64 {
    0.7
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_max_retries() -> u32 {
    3
}
fn default_cancel_grace_period_ms() -> u64 {
    5_000
}
fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.into()
}

/// `[crawl_policies]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlPoliciesConfig {
    /// URL path include globs (if non-empty, a path must match one).
    #[serde(default)]
    pub include_patterns: Vec<String>,

    /// URL path exclude globs.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// OpenAI-compatible chat completions endpoint.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model used for topic inference.
    #[serde(default = "default_model")]
    pub model: String,

    /// Retries after a transport error, HTTP 429 or 5xx.
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,

    /// First retry delay in ms; doubles on each further attempt.
    #[serde(default = "default_llm_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// When a whole session yields no topics, re-ask for the first few
    /// segments with a less strict prompt.
    #[serde(default = "default_relaxed_fallback")]
    pub relaxed_fallback: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            model: default_model(),
            max_retries: default_llm_max_retries(),
            retry_backoff_ms: default_llm_retry_backoff_ms(),
            relaxed_fallback: default_relaxed_fallback(),
        }
    }
}

fn default_api_key_env() -> String {
    "GROQ_API_KEY".into()
}
fn default_base_url() -> String {
    "https://api.groq.com/openai/v1/chat/completions".into()
}
fn default_model() -> String {
    "llama-3.1-70b-versatile".into()
}
fn default_llm_max_retries() -> u32 {
    3
}
fn default_llm_retry_backoff_ms() -> u64 {
    1_000
}
fn default_relaxed_fallback() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Session config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime session configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub max_pages: usize,
    pub max_depth: u32,
    pub concurrent_fetches: usize,
    pub min_request_interval: Duration,
    pub max_body_bytes: usize,
    pub max_tokens_per_segment: usize,
    pub similarity_threshold: f64,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub cancel_grace_period: Duration,
    pub user_agent: String,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for SessionConfig {
    fn from(config: &AppConfig) -> Self {
        let s = &config.session;
        Self {
            max_pages: s.max_pages,
            max_depth: s.max_depth,
            concurrent_fetches: s.concurrent_fetches,
            min_request_interval: Duration::from_millis(s.min_request_interval_ms),
            max_body_bytes: s.max_body_bytes,
            max_tokens_per_segment: s.max_tokens_per_segment,
            similarity_threshold: s.similarity_threshold,
            request_timeout: Duration::from_secs(s.request_timeout_secs),
            max_retries: s.max_retries,
            cancel_grace_period: Duration::from_millis(s.cancel_grace_period_ms),
            user_agent: s.user_agent.clone(),
            include_patterns: config.crawl_policies.include_patterns.clone(),
            exclude_patterns: config.crawl_policies.exclude_patterns.clone(),
        }
    }
}

impl SessionConfig {
    /// Reject option values no session can run with.
    ///
    /// Called before any network activity.
    pub fn validate(&self) -> Result<()> {
        if self.max_pages == 0 {
            return Err(DocmapError::config("max_pages must be at least 1"));
        }
        if self.concurrent_fetches == 0 {
            return Err(DocmapError::config("concurrent_fetches must be at least 1"));
        }
        if self.max_body_bytes == 0 {
            return Err(DocmapError::config("max_body_bytes must be at least 1"));
        }
        if self.max_tokens_per_segment == 0 {
            return Err(DocmapError::config("max_tokens_per_segment must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(DocmapError::config(format!(
                "similarity_threshold must be within [0, 1], got {}",
                self.similarity_threshold
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(DocmapError::config("request_timeout must be non-zero"));
        }
        if self.user_agent.trim().is_empty() {
            return Err(DocmapError::config("user_agent must not be empty"));
        }
        for pattern in self.include_patterns.iter().chain(&self.exclude_patterns) {
            if glob_to_regex(pattern).is_none() {
                return Err(DocmapError::config(format!("invalid path pattern '{pattern}'")));
            }
        }
        Ok(())
    }
}

/// Convert a glob-like path pattern to an anchored regex.
///
/// `**` matches across segments, `*` within one segment, `?` one character.
pub fn glob_to_regex(pattern: &str) -> Option<regex::Regex> {
    let escaped = regex::escape(pattern)
        .replace(r"\*\*", ".*")
        .replace(r"\*", "[^/]*")
        .replace(r"\?", ".");
    regex::Regex::new(&format!("^{escaped}$")).ok()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.docmap/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| DocmapError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.docmap/docmap.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DocmapError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| DocmapError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| DocmapError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| DocmapError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| DocmapError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the inference API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.llm.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(DocmapError::config(format!(
            "inference API key not found. Set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("max_pages"));
        assert!(toml_str.contains("GROQ_API_KEY"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.session.max_depth, 3);
        assert_eq!(parsed.session.max_tokens_per_segment, 800);
        assert_eq!(parsed.llm.api_key_env, "GROQ_API_KEY");
        assert_eq!(parsed.llm.max_retries, 3);
        assert!(parsed.llm.relaxed_fallback);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let toml_str = r#"
[session]
max_pages = 10
similarity_threshold = 0.85

[crawl_policies]
exclude_patterns = ["/blog/**"]
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        let session = SessionConfig::from(&config);
        assert_eq!(session.max_pages, 10);
        assert_eq!(session.similarity_threshold, 0.85);
        assert_eq!(session.concurrent_fetches, 4);
        assert_eq!(session.min_request_interval, Duration::from_millis(500));
        assert_eq!(session.exclude_patterns, vec!["/blog/**".to_string()]);
    }

    #[test]
    fn session_defaults() {
        let session = SessionConfig::default();
        assert_eq!(session.max_pages, 50);
        assert_eq!(session.max_body_bytes, 5 * 1024 * 1024);
        assert_eq!(session.request_timeout, Duration::from_secs(10));
        assert!(session.validate().is_ok());
    }

    #[test]
    fn validation_rejects_bad_options() {
        let mut session = SessionConfig::default();
        session.max_pages = 0;
        assert!(session.validate().is_err());

        let mut session = SessionConfig::default();
        session.similarity_threshold = 1.5;
        let err = session.validate().unwrap_err();
        assert!(err.to_string().contains("similarity_threshold"));

        let mut session = SessionConfig::default();
        session.similarity_threshold = f64::NAN;
        assert!(session.validate().is_err());

        let mut session = SessionConfig::default();
        session.concurrent_fetches = 0;
        assert!(matches!(session.validate(), Err(DocmapError::Config { .. })));
    }

    #[test]
    fn glob_patterns() {
        let re = glob_to_regex("/blog/**").expect("valid glob");
        assert!(re.is_match("/blog/2024/post"));
        assert!(!re.is_match("/docs/intro"));

        let re = glob_to_regex("/api/*").expect("valid glob");
        assert!(re.is_match("/api/users"));
        assert!(!re.is_match("/api/users/1"));
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.llm.api_key_env = "DOCMAP_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
