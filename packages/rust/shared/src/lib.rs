//! Shared types, error model, and configuration for docmap.
//!
//! This crate is the foundation depended on by all other docmap crates.
//! It provides:
//! - [`DocmapError`]: the unified error type, plus the per-page [`FetchError`]
//! - Domain types ([`PageRecord`], [`ContentTree`], [`Segment`], [`TopicDescriptor`])
//! - Configuration ([`AppConfig`], [`SessionConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CrawlPoliciesConfig, DEFAULT_USER_AGENT, LlmConfig, SessionConfig,
    SessionDefaults, config_dir, config_file_path, glob_to_regex, init_config, load_config,
    load_config_from, validate_api_key,
};
pub use error::{DocmapError, FetchError, Result};
pub use types::{
    ContentNode, ContentTree, FetchedBody, ModuleEntry, NodeKind, PageOutcome, PageRecord,
    Segment, SegmentRef, SessionId, TopicDescriptor, UrlRecord,
};
