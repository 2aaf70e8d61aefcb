//! Token-bounded segmentation of a cleaned content tree.
//!
//! Nodes are atomic: a segment boundary only ever falls between two nodes of
//! the pre-order walk. Segments of a page partition its node sequence in
//! order, so concatenating their `node_ids` yields `0..n`.

use tracing::{debug, instrument};

use docmap_shared::{ContentNode, ContentTree, Segment};

use crate::tokenizer::TokenCounter;

/// Why a content tree could not be segmented. Fatal for that page only.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SegmentationError {
    #[error("token bound must be at least 1")]
    ZeroTokenBound,

    #[error("node {node_id} has heading level {level}, expected 1-6")]
    InvalidHeadingLevel { node_id: usize, level: u8 },
}

/// Split `tree` into ordered segments of at most `max_tokens` tokens each.
///
/// A node that alone exceeds `max_tokens` is emitted as its own segment,
/// flagged `oversized`, together with any headings immediately leading into
/// it. When a segment closes because the next node does not fit, a trailing
/// run of headings moves to the next segment if it fits there, so headings
/// stay with the content they introduce.
#[instrument(skip_all, fields(url = %tree.source_url, max_tokens))]
pub fn segment(
    tree: &ContentTree,
    max_tokens: usize,
    counter: &dyn TokenCounter,
) -> Result<Vec<Segment>, SegmentationError> {
    if max_tokens == 0 {
        return Err(SegmentationError::ZeroTokenBound);
    }

    let nodes = tree.flatten();
    let counts: Vec<usize> = nodes.iter().map(|n| counter.count(&n.text)).collect();

    let mut out = Output {
        nodes: &nodes,
        source_url: &tree.source_url,
        segments: Vec::new(),
    };
    let mut path: Vec<(u8, &str)> = Vec::new();
    let mut pending = Pending::default();

    for (id, node) in nodes.iter().enumerate() {
        let heading = node.heading_level();
        if let Some(level) = heading {
            if !(1..=6).contains(&level) {
                return Err(SegmentationError::InvalidHeadingLevel { node_id: id, level });
            }
            while path.last().is_some_and(|(l, _)| *l >= level) {
                path.pop();
            }
            path.push((level, node.text.as_str()));
        }
        let is_heading = heading.is_some();
        let tokens = counts[id];

        if tokens > max_tokens {
            let mut lead = pending.split_heading_tail(&counts).unwrap_or_default();
            out.flush(std::mem::take(&mut pending), false);
            lead.push(id, tokens, is_heading, &path);
            out.flush(lead, true);
            continue;
        }

        if !pending.is_empty() && pending.tokens + tokens > max_tokens {
            let carry = match pending.heading_tail_tokens(&counts) {
                Some(tail) if tail + tokens <= max_tokens => pending.split_heading_tail(&counts),
                _ => None,
            };
            out.flush(std::mem::take(&mut pending), false);
            if let Some(carry) = carry {
                pending = carry;
            }
        }

        pending.push(id, tokens, is_heading, &path);
        if pending.tokens == max_tokens {
            out.flush(std::mem::take(&mut pending), false);
        }
    }
    out.flush(pending, false);

    debug!(
        nodes = nodes.len(),
        segments = out.segments.len(),
        oversized = out.segments.iter().filter(|s| s.oversized).count(),
        "segmented page"
    );
    Ok(out.segments)
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

/// The segment currently being filled.
#[derive(Default)]
struct Pending {
    ids: Vec<usize>,
    tokens: usize,
    heading_path: Vec<String>,
    /// Position in `ids` where the trailing run of headings starts, with the
    /// heading path active at that heading.
    heading_tail: Option<(usize, Vec<String>)>,
}

impl Pending {
    fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn push(&mut self, id: usize, tokens: usize, is_heading: bool, path: &[(u8, &str)]) {
        if self.ids.is_empty() {
            self.heading_path = snapshot(path);
        }
        if is_heading {
            if self.heading_tail.is_none() {
                self.heading_tail = Some((self.ids.len(), snapshot(path)));
            }
        } else {
            self.heading_tail = None;
        }
        self.ids.push(id);
        self.tokens += tokens;
    }

    fn heading_tail_tokens(&self, counts: &[usize]) -> Option<usize> {
        let (start, _) = self.heading_tail.as_ref()?;
        Some(self.ids[*start..].iter().map(|&id| counts[id]).sum())
    }

    /// Detach the trailing run of headings as a new pending segment.
    fn split_heading_tail(&mut self, counts: &[usize]) -> Option<Pending> {
        let (start, path) = self.heading_tail.take()?;
        let ids = self.ids.split_off(start);
        let tokens: usize = ids.iter().map(|&id| counts[id]).sum();
        self.tokens -= tokens;
        Some(Pending {
            ids,
            tokens,
            heading_path: path.clone(),
            heading_tail: Some((0, path)),
        })
    }
}

struct Output<'a> {
    nodes: &'a [&'a ContentNode],
    source_url: &'a str,
    segments: Vec<Segment>,
}

impl Output<'_> {
    fn flush(&mut self, pending: Pending, oversized: bool) {
        if pending.is_empty() {
            return;
        }
        let text = pending
            .ids
            .iter()
            .map(|&id| self.nodes[id].render())
            .collect::<Vec<_>>()
            .join("\n\n");

        self.segments.push(Segment {
            index: self.segments.len(),
            source_url: self.source_url.to_string(),
            node_ids: pending.ids,
            text,
            token_count: pending.tokens,
            heading_path: pending.heading_path,
            oversized,
        });
    }
}

fn snapshot(path: &[(u8, &str)]) -> Vec<String> {
    path.iter().map(|(_, text)| (*text).to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::WordTokenizer;

    fn words(n: usize) -> String {
        vec!["word"; n].join(" ")
    }

    fn tree(nodes: Vec<ContentNode>) -> ContentTree {
        ContentTree::new("https://docs.example.com/page", nodes)
    }

    fn ids(segments: &[Segment]) -> Vec<Vec<usize>> {
        segments.iter().map(|s| s.node_ids.clone()).collect()
    }

    #[test]
    fn packs_nodes_up_to_the_bound() {
        let t = tree(vec![
            ContentNode::paragraph(words(3)),
            ContentNode::paragraph(words(3)),
            ContentNode::paragraph(words(3)),
            ContentNode::paragraph(words(3)),
        ]);
        let segments = segment(&t, 7, &WordTokenizer).unwrap();

        assert_eq!(ids(&segments), vec![vec![0, 1], vec![2, 3]]);
        assert!(segments.iter().all(|s| s.token_count == 6 && !s.oversized));
        assert_eq!(segments[1].index, 1);
        assert_eq!(segments[0].text, format!("{}\n\n{}", words(3), words(3)));
    }

    #[test]
    fn closes_on_exact_hit() {
        let t = tree(vec![
            ContentNode::paragraph(words(3)),
            ContentNode::paragraph(words(3)),
            ContentNode::paragraph(words(1)),
        ]);
        let segments = segment(&t, 6, &WordTokenizer).unwrap();
        assert_eq!(ids(&segments), vec![vec![0, 1], vec![2]]);
        assert_eq!(segments[0].token_count, 6);
    }

    #[test]
    fn heading_with_huge_paragraph_is_one_oversized_segment() {
        let t = tree(vec![
            ContentNode::heading(1, "Introduction"),
            ContentNode::paragraph(words(2000)),
        ]);
        let segments = segment(&t, 800, &WordTokenizer).unwrap();

        assert_eq!(segments.len(), 1);
        let only = &segments[0];
        assert!(only.oversized);
        assert!(only.node_ids.contains(&1));
        assert_eq!(only.node_ids, vec![0, 1]);
        assert_eq!(only.heading_path, vec!["Introduction"]);
    }

    #[test]
    fn oversized_node_stands_alone_between_content() {
        let t = tree(vec![
            ContentNode::paragraph(words(3)),
            ContentNode::code(words(50)),
            ContentNode::paragraph(words(3)),
        ]);
        let segments = segment(&t, 10, &WordTokenizer).unwrap();

        assert_eq!(ids(&segments), vec![vec![0], vec![1], vec![2]]);
        assert_eq!(
            segments.iter().map(|s| s.oversized).collect::<Vec<_>>(),
            vec![false, true, false]
        );
        assert_eq!(segments[1].token_count, 50);
    }

    #[test]
    fn heading_path_tracks_section_nesting() {
        let t = tree(vec![
            ContentNode::heading(1, "Guide"),
            ContentNode::paragraph(words(4)),
            ContentNode::heading(2, "Install"),
            ContentNode::paragraph(words(4)),
            ContentNode::heading(2, "Configure"),
            ContentNode::paragraph(words(4)),
            ContentNode::heading(1, "Reference"),
            ContentNode::paragraph(words(4)),
        ]);
        let segments = segment(&t, 5, &WordTokenizer).unwrap();

        let paths: Vec<Vec<String>> = segments.iter().map(|s| s.heading_path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                vec!["Guide".to_string()],
                vec!["Guide".to_string(), "Install".to_string()],
                vec!["Guide".to_string(), "Configure".to_string()],
                vec!["Reference".to_string()],
            ]
        );
        assert_eq!(ids(&segments)[1], vec![2, 3]);
    }

    #[test]
    fn trailing_headings_move_to_the_next_segment() {
        let t = tree(vec![
            ContentNode::heading(1, "Guide"),
            ContentNode::paragraph(words(5)),
            ContentNode::heading(2, "Setup"),
            ContentNode::paragraph(words(5)),
        ]);
        let segments = segment(&t, 8, &WordTokenizer).unwrap();

        assert_eq!(ids(&segments), vec![vec![0, 1], vec![2, 3]]);
        assert_eq!(segments[1].heading_path, vec!["Guide", "Setup"]);
        assert!(segments.iter().all(|s| s.token_count <= 8));
    }

    #[test]
    fn nested_list_items_are_segmented_in_pre_order() {
        let t = tree(vec![
            ContentNode::list_item(words(2)).with_children(vec![
                ContentNode::list_item(words(2)),
                ContentNode::list_item(words(2)),
            ]),
            ContentNode::list_item(words(2)),
        ]);
        let segments = segment(&t, 4, &WordTokenizer).unwrap();
        assert_eq!(ids(&segments), vec![vec![0, 1], vec![2, 3]]);
        assert!(segments[0].text.starts_with("- word word\n\n- word word"));
    }

    #[test]
    fn segments_partition_the_node_sequence() {
        let sizes = [1, 7, 2, 13, 3, 3, 40, 5, 8, 1, 1, 21, 2, 9];
        let mut nodes = Vec::new();
        for (i, size) in sizes.iter().enumerate() {
            if i % 4 == 0 {
                nodes.push(ContentNode::heading((i % 3 + 1) as u8, format!("Section {i}")));
            }
            nodes.push(ContentNode::paragraph(words(*size)));
        }
        let t = tree(nodes);
        let total = t.flatten().len();

        for max in [1, 2, 5, 8, 13, 20, 100] {
            let segments = segment(&t, max, &WordTokenizer).unwrap();
            let concatenated: Vec<usize> =
                segments.iter().flat_map(|s| s.node_ids.clone()).collect();
            assert_eq!(concatenated, (0..total).collect::<Vec<_>>(), "max={max}");

            for s in &segments {
                assert!(
                    s.token_count <= max || s.oversized,
                    "segment {} has {} tokens over bound {max}",
                    s.index,
                    s.token_count
                );
            }
        }
    }

    #[test]
    fn invalid_heading_level_is_rejected() {
        let t = tree(vec![
            ContentNode::paragraph("intro"),
            ContentNode::heading(7, "Too deep"),
        ]);
        assert_eq!(
            segment(&t, 10, &WordTokenizer),
            Err(SegmentationError::InvalidHeadingLevel { node_id: 1, level: 7 })
        );
    }

    #[test]
    fn zero_bound_is_rejected_and_empty_tree_is_empty() {
        let t = tree(vec![ContentNode::paragraph("x")]);
        assert_eq!(
            segment(&t, 0, &WordTokenizer),
            Err(SegmentationError::ZeroTokenBound)
        );
        assert!(segment(&tree(vec![]), 10, &WordTokenizer).unwrap().is_empty());
    }
}
