//! Core domain types flowing through the crawl → segment → consolidate pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::error::FetchError;

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for session identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Generate a new time-sortable session identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// UrlRecord / PageRecord
// ---------------------------------------------------------------------------

/// A URL accepted into the frontier. The normalized URL is the dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRecord {
    /// Normalized URL (scheme + host + path, no fragment or query).
    pub url: Url,
    /// Link distance from the nearest seed.
    pub depth: u32,
    /// Page the URL was discovered on; `None` for seeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovered_from: Option<Url>,
    /// Position in frontier acceptance order (0 for the first seed).
    pub sequence: u64,
}

/// Body and metadata of a successfully fetched page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedBody {
    /// HTTP status code of the final response.
    pub status: u16,
    /// `Content-Type` header value (empty if absent).
    pub content_type: String,
    /// Response body decoded as UTF-8 (lossy).
    pub body: String,
    /// Outbound links, normalized and filtered to the crawl scope.
    pub links: Vec<Url>,
    /// Number of distinct http(s) links dropped by the scope rule.
    #[serde(default)]
    pub out_of_scope_links: usize,
    /// SHA-256 hex digest of the body.
    pub content_hash: String,
}

/// Result of fetching one URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageOutcome {
    Fetched(FetchedBody),
    Failed(FetchError),
}

/// One crawled page, successful or not. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    pub record: UrlRecord,
    pub fetched_at: DateTime<Utc>,
    pub outcome: PageOutcome,
}

impl PageRecord {
    pub fn url(&self) -> &Url {
        &self.record.url
    }

    /// The fetched body, if the fetch succeeded.
    pub fn fetched(&self) -> Option<&FetchedBody> {
        match &self.outcome {
            PageOutcome::Fetched(body) => Some(body),
            PageOutcome::Failed(_) => None,
        }
    }

    /// The fetch error, if the fetch failed.
    pub fn error(&self) -> Option<&FetchError> {
        match &self.outcome {
            PageOutcome::Fetched(_) => None,
            PageOutcome::Failed(err) => Some(err),
        }
    }
}

// ---------------------------------------------------------------------------
// ContentTree
// ---------------------------------------------------------------------------

/// Structural role of a content node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    Heading { level: u8 },
    Paragraph,
    ListItem,
    Code,
}

/// A node of a cleaned page. Nodes are the atomic unit of segmentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentNode {
    #[serde(flatten)]
    pub kind: NodeKind,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ContentNode>,
}

impl ContentNode {
    pub fn new(kind: NodeKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            children: Vec::new(),
        }
    }

    pub fn heading(level: u8, text: impl Into<String>) -> Self {
        Self::new(NodeKind::Heading { level }, text)
    }

    pub fn paragraph(text: impl Into<String>) -> Self {
        Self::new(NodeKind::Paragraph, text)
    }

    pub fn list_item(text: impl Into<String>) -> Self {
        Self::new(NodeKind::ListItem, text)
    }

    pub fn code(text: impl Into<String>) -> Self {
        Self::new(NodeKind::Code, text)
    }

    /// Builder-style helper to attach children.
    pub fn with_children(mut self, children: Vec<ContentNode>) -> Self {
        self.children = children;
        self
    }

    /// Heading level, if this node is a heading.
    pub fn heading_level(&self) -> Option<u8> {
        match self.kind {
            NodeKind::Heading { level } => Some(level),
            _ => None,
        }
    }

    /// Markdown-flavoured rendering of this node's own text (children excluded).
    pub fn render(&self) -> String {
        match self.kind {
            NodeKind::Heading { level } => {
                format!("{} {}", "#".repeat(level.clamp(1, 6) as usize), self.text)
            }
            NodeKind::Paragraph => self.text.clone(),
            NodeKind::ListItem => format!("- {}", self.text),
            NodeKind::Code => format!("```\n{}\n```", self.text),
        }
    }
}

/// The cleaned content of one page: ordered top-level nodes plus metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentTree {
    pub source_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub nodes: Vec<ContentNode>,
}

impl ContentTree {
    pub fn new(source_url: impl Into<String>, nodes: Vec<ContentNode>) -> Self {
        Self {
            source_url: source_url.into(),
            title: None,
            nodes,
        }
    }

    /// Pre-order (document order) listing of every node in the tree.
    ///
    /// Uses an explicit stack so arbitrarily deep trees cannot overflow the
    /// call stack. The position of a node in this listing is its node id.
    pub fn flatten(&self) -> Vec<&ContentNode> {
        let mut out = Vec::new();
        let mut stack: Vec<&ContentNode> = self.nodes.iter().rev().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(node.children.iter().rev());
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Segment
// ---------------------------------------------------------------------------

/// A token-bounded, order-preserving slice of one page's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Position of this segment within its page.
    pub index: usize,
    pub source_url: String,
    /// Pre-order ids (see [`ContentTree::flatten`]) of the nodes in this segment.
    pub node_ids: Vec<usize>,
    /// Rendered text of the segment's nodes, joined by blank lines.
    pub text: String,
    pub token_count: usize,
    /// Ancestor heading texts active when the segment was opened.
    pub heading_path: Vec<String>,
    /// Set when the segment holds a node larger than the token bound. Such a
    /// segment contains that node plus, at most, the headings leading into it.
    pub oversized: bool,
}

/// Stable reference to a segment across the whole session.
///
/// Ordering is by `ordinal`, the segment's position in session segment order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SegmentRef {
    pub ordinal: usize,
    pub url: String,
    pub index: usize,
}

// ---------------------------------------------------------------------------
// TopicDescriptor
// ---------------------------------------------------------------------------

/// Candidate module (no parent) or submodule (parent set) inferred from segments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicDescriptor {
    pub name: String,
    pub description: String,
    /// Name of the parent module when this is a submodule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default)]
    pub sources: Vec<SegmentRef>,
}

impl TopicDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parent: None,
            sources: Vec::new(),
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_source(mut self, source: SegmentRef) -> Self {
        self.sources.push(source);
        self
    }

    /// Earliest segment this descriptor was inferred from.
    pub fn first_appearance(&self) -> Option<&SegmentRef> {
        self.sources.iter().min()
    }

    /// Total, input-order-independent ordering over descriptor content.
    pub fn content_cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| self.description.cmp(&other.description))
            .then_with(|| self.parent.cmp(&other.parent))
            .then_with(|| self.sources.cmp(&other.sources))
    }
}

// ---------------------------------------------------------------------------
// ModuleEntry (output)
// ---------------------------------------------------------------------------

/// One module of the final canonical list, in the serialized output shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleEntry {
    pub module: String,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Submodules", default)]
    pub submodules: BTreeMap<String, String>,
}
