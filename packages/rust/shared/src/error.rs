//! Error types for docmap.
//!
//! Library crates use [`DocmapError`] via `thiserror` for failures that end
//! an operation. Per-item failures ([`FetchError`]) are recorded and carried
//! alongside results instead of being propagated.
//! App crates (cli) wrap this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level error type for all docmap operations.
#[derive(Debug, thiserror::Error)]
pub enum DocmapError {
    /// Invalid session option or unreadable config file. Fatal at session start.
    #[error("config error: {message}")]
    Config { message: String },

    /// HTTP client could not be built.
    #[error("network error: {0}")]
    Network(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DocmapError>;

impl DocmapError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// FetchError
// ---------------------------------------------------------------------------

/// Why a single page could not be fetched.
///
/// A fetch error removes the URL from further consideration but never aborts
/// the crawl.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("connection failure: {0}")]
    ConnectionFailure(String),

    /// Body exceeded the configured byte cap.
    #[error("body exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    /// A redirect pointed outside the crawl scope; the target was not requested.
    #[error("redirect to out-of-scope URL {0}")]
    OffScopeRedirect(String),

    #[error("more than {0} redirects")]
    TooManyRedirects(usize),
}

impl FetchError {
    /// Stable short name used as the key in per-kind error counts.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::HttpStatus(_) => "http_status",
            Self::ConnectionFailure(_) => "connection_failure",
            Self::TooLarge { .. } => "too_large",
            Self::UnsupportedContentType(_) => "unsupported_content_type",
            Self::OffScopeRedirect(_) => "off_scope_redirect",
            Self::TooManyRedirects(_) => "too_many_redirects",
        }
    }

    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::ConnectionFailure(_) => true,
            Self::HttpStatus(code) => *code == 429 || (500..600).contains(code),
            Self::TooLarge { .. }
            | Self::UnsupportedContentType(_)
            | Self::OffScopeRedirect(_)
            | Self::TooManyRedirects(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = DocmapError::config("max_pages must be at least 1");
        assert_eq!(err.to_string(), "config error: max_pages must be at least 1");

        let err = DocmapError::validation("threshold out of range");
        assert!(err.to_string().contains("threshold out of range"));
    }

    #[test]
    fn fetch_error_transience() {
        assert!(FetchError::Timeout.is_transient());
        assert!(FetchError::HttpStatus(503).is_transient());
        assert!(FetchError::HttpStatus(429).is_transient());
        assert!(!FetchError::HttpStatus(404).is_transient());
        assert!(!FetchError::TooLarge { limit: 10 }.is_transient());
        assert!(!FetchError::OffScopeRedirect("https://elsewhere.example.com/".into()).is_transient());
        assert!(!FetchError::TooManyRedirects(5).is_transient());
    }

    #[test]
    fn fetch_error_kind_keys() {
        assert_eq!(FetchError::HttpStatus(500).kind(), "http_status");
        assert_eq!(
            FetchError::ConnectionFailure("refused".into()).kind(),
            "connection_failure"
        );
        assert_eq!(FetchError::TooLarge { limit: 1 }.to_string(), "body exceeds 1 bytes");
        assert_eq!(
            FetchError::OffScopeRedirect("https://elsewhere.example.com/".into()).kind(),
            "off_scope_redirect"
        );
    }
}
