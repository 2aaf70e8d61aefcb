//! HTML boilerplate stripping: raw page HTML → [`ContentTree`].
//!
//! The default [`HtmlCleaner`] picks the page's main content container,
//! drops site chrome (navigation, headers, footers, sidebars, scripts), and
//! emits headings, paragraphs, list items and code blocks in document order.
//! Heading levels are kept exactly as written.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};

use docmap_shared::{ContentNode, ContentTree, NodeKind, Result};

/// Turns a raw HTML body into a content tree.
///
/// Implementations must not reorder sibling content and must preserve
/// heading levels.
pub trait Cleaner: Send + Sync {
    fn clean(&self, html: &str, source_url: &str) -> Result<ContentTree>;
}

/// Tags whose whole subtree is never content.
const CHROME_TAGS: &[&str] = &[
    "script", "style", "nav", "header", "footer", "aside", "noscript", "svg", "template",
];

/// Class/id tokens that mark navigation chrome.
static CHROME_ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(^|[-_\s])(nav|navbar|navigation|menu|sidebar|header|footer)([-_\s]|$)")
        .expect("valid regex")
});

static ROOT_SELECTORS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    ["main", "article", r#"[role="main"]"#, "body"]
        .iter()
        .map(|s| Selector::parse(s).expect("valid selector"))
        .collect()
});

static TITLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("valid selector"));

static HEADING_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1, h2, h3, h4, h5, h6").expect("valid selector"));

/// Default cleaner for documentation-style HTML.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlCleaner;

impl Cleaner for HtmlCleaner {
    #[instrument(skip(self, html), fields(url = %source_url, bytes = html.len()))]
    fn clean(&self, html: &str, source_url: &str) -> Result<ContentTree> {
        let doc = Html::parse_document(html);

        let root = ROOT_SELECTORS
            .iter()
            .find_map(|sel| doc.select(sel).next())
            .unwrap_or_else(|| doc.root_element());

        let mut tree = ContentTree::new(source_url, extract_nodes(root));
        tree.title = doc
            .select(&TITLE_SEL)
            .next()
            .map(|el| collapse_whitespace(&el.text().collect::<String>()))
            .filter(|t| !t.is_empty());

        debug!(
            root = root.value().name(),
            nodes = tree.nodes.len(),
            "cleaned page"
        );
        Ok(tree)
    }
}

// ---------------------------------------------------------------------------
// Traversal
// ---------------------------------------------------------------------------

/// Work item of the explicit-stack walk. `Close` finishes the innermost open block.
enum Step<'a> {
    Open(ElementRef<'a>),
    Text(&'a str),
    Close,
}

/// A block element whose text is still being collected.
struct Frame {
    kind: NodeKind,
    text: String,
    children: Vec<ContentNode>,
}

/// Walk `root` without recursion and build the top-level content nodes.
///
/// Only list items nest: an `li` inside an open `li` becomes its child.
/// Any other element inside an open block contributes its text inline.
fn extract_nodes(root: ElementRef<'_>) -> Vec<ContentNode> {
    let mut roots: Vec<ContentNode> = Vec::new();
    let mut frames: Vec<Frame> = Vec::new();
    let mut stack: Vec<Step<'_>> = Vec::new();
    push_children(root, &mut stack);

    while let Some(step) = stack.pop() {
        match step {
            Step::Text(text) => {
                if let Some(frame) = frames.last_mut() {
                    frame.text.push_str(text);
                }
            }
            Step::Open(el) => {
                if is_chrome(el) {
                    continue;
                }
                let name = el.value().name();
                if name == "br" {
                    if let Some(frame) = frames.last_mut() {
                        frame.text.push('\n');
                    }
                    continue;
                }

                let opens = match (block_kind(name), frames.last()) {
                    (Some(kind), None) => Some(kind),
                    (Some(NodeKind::ListItem), Some(top)) if top.kind == NodeKind::ListItem => {
                        Some(NodeKind::ListItem)
                    }
                    _ => None,
                };
                if let Some(kind) = opens {
                    frames.push(Frame {
                        kind,
                        text: String::new(),
                        children: Vec::new(),
                    });
                    stack.push(Step::Close);
                }
                push_children(el, &mut stack);
            }
            Step::Close => {
                let Some(frame) = frames.pop() else {
                    continue;
                };
                let target = match frames.last_mut() {
                    Some(parent) => &mut parent.children,
                    None => &mut roots,
                };
                finish_frame(frame, target);
            }
        }
    }

    roots
}

/// Queue an element's children so they pop in document order.
fn push_children<'a>(el: ElementRef<'a>, stack: &mut Vec<Step<'a>>) {
    let children: Vec<_> = el.children().collect();
    for child in children.into_iter().rev() {
        if let Some(child_el) = ElementRef::wrap(child) {
            stack.push(Step::Open(child_el));
        } else if let Some(text) = child.value().as_text() {
            stack.push(Step::Text(&**text));
        }
    }
}

fn finish_frame(frame: Frame, target: &mut Vec<ContentNode>) {
    let text = match frame.kind {
        NodeKind::Code => frame.text.trim_matches('\n').trim_end().to_string(),
        _ => collapse_whitespace(&frame.text),
    };

    if text.is_empty() {
        // A list item holding only a nested list: lift the nested items.
        target.extend(frame.children);
        return;
    }
    target.push(ContentNode::new(frame.kind, text).with_children(frame.children));
}

fn block_kind(tag: &str) -> Option<NodeKind> {
    match tag {
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            let level = tag[1..].parse().ok()?;
            Some(NodeKind::Heading { level })
        }
        "p" | "blockquote" => Some(NodeKind::Paragraph),
        "li" => Some(NodeKind::ListItem),
        "pre" => Some(NodeKind::Code),
        _ => None,
    }
}

/// Whether an element and its subtree are site chrome.
///
/// A `header` that wraps a heading is treated as part of the content, since
/// article templates commonly put the page title there.
fn is_chrome(el: ElementRef<'_>) -> bool {
    let element = el.value();
    let name = element.name();

    if name == "header" && el.select(&HEADING_SEL).next().is_some() && !has_chrome_attr(el) {
        return false;
    }
    CHROME_TAGS.contains(&name) || has_chrome_attr(el)
}

fn has_chrome_attr(el: ElementRef<'_>) -> bool {
    let element = el.value();
    element
        .attr("class")
        .into_iter()
        .chain(element.id())
        .any(|value| CHROME_ATTR_RE.is_match(value))
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean(html: &str) -> ContentTree {
        HtmlCleaner.clean(html, "https://docs.example.com/page").unwrap()
    }

    #[test]
    fn extracts_blocks_in_document_order() {
        let tree = clean(
            r#"<html><head><title> Install  Guide </title></head><body><main>
                <h1>Installation</h1>
                <p>Install the <code>docmap</code> binary
                   with cargo.</p>
                <h2>From source</h2>
                <pre>cargo build --release
cargo install --path .</pre>
                <blockquote>Requires Rust 1.85.</blockquote>
            </main></body></html>"#,
        );

        assert_eq!(tree.title.as_deref(), Some("Install Guide"));
        assert_eq!(
            tree.nodes,
            vec![
                ContentNode::heading(1, "Installation"),
                ContentNode::paragraph("Install the docmap binary with cargo."),
                ContentNode::heading(2, "From source"),
                ContentNode::code("cargo build --release\ncargo install --path ."),
                ContentNode::paragraph("Requires Rust 1.85."),
            ]
        );
    }

    #[test]
    fn strips_chrome_tags_and_attributes() {
        let tree = clean(
            r#"<html><body>
                <nav><p>Home | Docs | Blog</p></nav>
                <div class="site-header"><p>Logo text</p></div>
                <div id="sidebar"><ul><li>Getting started</li></ul></div>
                <script>track();</script>
                <div class="content">
                    <h2 class="anchor anchorWithStickyNavbar_x1">Usage</h2>
                    <p>Run the tool.</p>
                </div>
                <footer><p>Copyright 2026</p></footer>
            </body></html>"#,
        );

        assert_eq!(
            tree.nodes,
            vec![
                ContentNode::heading(2, "Usage"),
                ContentNode::paragraph("Run the tool."),
            ]
        );
    }

    #[test]
    fn prefers_main_over_body() {
        let tree = clean(
            r#"<html><body>
                <p>Outside main.</p>
                <main><p>Inside main.</p></main>
            </body></html>"#,
        );
        assert_eq!(tree.nodes, vec![ContentNode::paragraph("Inside main.")]);
    }

    #[test]
    fn article_header_with_title_is_kept() {
        let tree = clean(
            r#"<html><body><article>
                <header><h1>Configuration</h1></header>
                <p>All options.</p>
            </article></body></html>"#,
        );
        assert_eq!(tree.nodes[0], ContentNode::heading(1, "Configuration"));
        assert_eq!(tree.nodes.len(), 2);
    }

    #[test]
    fn nested_lists_become_children() {
        let tree = clean(
            r#"<html><body><main><ul>
                <li>Crawling
                    <ul><li>Scope</li><li>Throttle</li></ul>
                </li>
                <li><p>Segmenting</p></li>
                <li><ul><li>Lifted</li></ul></li>
            </ul></main></body></html>"#,
        );

        assert_eq!(
            tree.nodes,
            vec![
                ContentNode::list_item("Crawling").with_children(vec![
                    ContentNode::list_item("Scope"),
                    ContentNode::list_item("Throttle"),
                ]),
                ContentNode::list_item("Segmenting"),
                ContentNode::list_item("Lifted"),
            ]
        );
    }

    #[test]
    fn deeply_nested_markup_does_not_overflow() {
        let depth = 5_000;
        let html = format!(
            "<html><body><main>{}<p>deep</p>{}</main></body></html>",
            "<div>".repeat(depth),
            "</div>".repeat(depth)
        );
        let tree = clean(&html);
        assert_eq!(tree.nodes, vec![ContentNode::paragraph("deep")]);
    }

    #[test]
    fn empty_page_yields_empty_tree() {
        let tree = clean("<html><body><nav>only chrome</nav></body></html>");
        assert!(tree.is_empty());
        assert!(tree.title.is_none());
    }
}
