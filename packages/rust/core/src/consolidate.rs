//! Merging of near-duplicate topic descriptors.
//!
//! Descriptors are scored pairwise, pairs at or above the threshold become
//! edges of a similarity graph, and every connected component is reconciled
//! into one canonical descriptor. The result does not depend on the order
//! the descriptors arrive in.

use std::collections::{BTreeMap, HashMap, HashSet};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, instrument, warn};

use docmap_shared::{SegmentRef, TopicDescriptor};

use crate::similarity::{Similarity, SimilarityError};

/// A cluster could not be reduced to one descriptor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ReconcileError {
    pub message: String,
}

impl ReconcileError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Produces the canonical descriptor for a cluster of similar descriptors.
///
/// `members` always holds at least two descriptors, sorted by
/// [`TopicDescriptor::content_cmp`].
pub trait Reconcile: Send + Sync {
    fn reconcile(&self, members: &[TopicDescriptor]) -> Result<TopicDescriptor, ReconcileError>;
}

/// Keeps the most descriptive member and folds the others into it.
///
/// The representative has the longest description, then the longest name,
/// then the smallest content ordering. Sources are the union of all members'
/// sources. The parent is the one most members agree on; on a tie a module
/// (no parent) wins, then the alphabetically smallest parent.
#[derive(Debug, Default, Clone, Copy)]
pub struct RepresentativeReconciler;

impl Reconcile for RepresentativeReconciler {
    fn reconcile(&self, members: &[TopicDescriptor]) -> Result<TopicDescriptor, ReconcileError> {
        let representative = members
            .iter()
            .min_by(|a, b| {
                let a_desc = a.description.chars().count();
                let b_desc = b.description.chars().count();
                b_desc
                    .cmp(&a_desc)
                    .then_with(|| b.name.chars().count().cmp(&a.name.chars().count()))
                    .then_with(|| a.content_cmp(b))
            })
            .ok_or_else(|| ReconcileError::new("cannot reconcile an empty cluster"))?;

        let mut sources: Vec<SegmentRef> = members
            .iter()
            .flat_map(|m| m.sources.iter().cloned())
            .collect();
        sources.sort();
        sources.dedup();

        Ok(TopicDescriptor {
            name: representative.name.clone(),
            description: representative.description.clone(),
            parent: majority_parent(members),
            sources,
        })
    }
}

fn majority_parent(members: &[TopicDescriptor]) -> Option<String> {
    let mut counts: BTreeMap<Option<&str>, usize> = BTreeMap::new();
    for member in members {
        *counts.entry(member.parent.as_deref()).or_default() += 1;
    }

    // BTreeMap iterates None first, then names ascending; keep the first maximum.
    let mut best: Option<(Option<&str>, usize)> = None;
    for (parent, count) in counts {
        if best.is_none_or(|(_, best_count)| count > best_count) {
            best = Some((parent, count));
        }
    }
    best.and_then(|(parent, _)| parent.map(str::to_string))
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// A pair whose comparison failed; it was treated as not similar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityFailure {
    pub left: String,
    pub right: String,
    pub message: String,
}

/// A cluster left unmerged because reconciliation failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileFailure {
    pub members: Vec<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConsolidationDiagnostics {
    pub pairs_scored: usize,
    pub clusters: usize,
    /// Clusters of two or more descriptors that were merged successfully.
    pub merged_clusters: usize,
    pub similarity_failures: Vec<SimilarityFailure>,
    pub reconcile_failures: Vec<ReconcileFailure>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Consolidation {
    /// Canonical descriptors ordered by first appearance.
    pub descriptors: Vec<TopicDescriptor>,
    pub diagnostics: ConsolidationDiagnostics,
}

// ---------------------------------------------------------------------------
// Consolidation
// ---------------------------------------------------------------------------

/// Merge descriptors whose similarity reaches `threshold`.
///
/// Clustering is the transitive closure of the pairwise relation, so a chain
/// `a ~ b ~ c` ends up in one cluster even when `a` and `c` are far apart.
/// Failed or out-of-range comparisons count as "not similar" and are
/// reported in the diagnostics. A cluster whose reconciliation fails keeps
/// its members unmerged. Parents naming a merged-away descriptor are
/// repointed to its canonical name.
#[instrument(skip_all, fields(descriptors = descriptors.len(), threshold = threshold))]
pub fn consolidate(
    descriptors: Vec<TopicDescriptor>,
    similarity: &dyn Similarity,
    threshold: f64,
    reconciler: &dyn Reconcile,
) -> Consolidation {
    let mut items = descriptors;
    items.sort_by(|a, b| a.content_cmp(b));
    let n = items.len();

    let pairs: Vec<(usize, usize)> = (0..n)
        .flat_map(|i| (i + 1..n).map(move |j| (i, j)))
        .collect();
    let scores: Vec<Result<f64, SimilarityError>> = pairs
        .par_iter()
        .map(|&(i, j)| {
            similarity
                .score(&items[i], &items[j])
                .and_then(checked_score)
        })
        .collect();

    let mut diagnostics = ConsolidationDiagnostics {
        pairs_scored: pairs.len(),
        ..Default::default()
    };

    let mut sets = DisjointSet::new(n);
    for (&(i, j), result) in pairs.iter().zip(scores) {
        match result {
            Ok(score) if score >= threshold => sets.union(i, j),
            Ok(_) => {}
            Err(err) => {
                warn!(left = %items[i].name, right = %items[j].name, error = %err, "similarity failed");
                diagnostics.similarity_failures.push(SimilarityFailure {
                    left: items[i].name.clone(),
                    right: items[j].name.clone(),
                    message: err.message,
                });
            }
        }
    }

    let clusters = sets.groups();
    diagnostics.clusters = clusters.len();

    let mut slots: Vec<Option<TopicDescriptor>> = items.into_iter().map(Some).collect();
    let mut output: Vec<TopicDescriptor> = Vec::with_capacity(clusters.len());
    let mut merged_away: Vec<(String, String)> = Vec::new();

    for cluster in clusters {
        let members: Vec<TopicDescriptor> =
            cluster.iter().filter_map(|&i| slots[i].take()).collect();
        if members.len() < 2 {
            output.extend(members);
            continue;
        }

        match reconciler.reconcile(&members) {
            Ok(canonical) => {
                for member in &members {
                    if member.name != canonical.name {
                        merged_away.push((member.name.clone(), canonical.name.clone()));
                    }
                }
                diagnostics.merged_clusters += 1;
                output.push(canonical);
            }
            Err(err) => {
                let names: Vec<String> = members.iter().map(|m| m.name.clone()).collect();
                warn!(members = ?names, error = %err, "reconciliation failed, keeping members");
                diagnostics.reconcile_failures.push(ReconcileFailure {
                    members: names,
                    message: err.message,
                });
                output.extend(members);
            }
        }
    }

    repoint_parents(&mut output, merged_away);
    output.sort_by(|a, b| {
        appearance_cmp(a.first_appearance(), b.first_appearance()).then_with(|| a.content_cmp(b))
    });

    info!(
        canonical = output.len(),
        clusters = diagnostics.clusters,
        merged = diagnostics.merged_clusters,
        failures = diagnostics.similarity_failures.len() + diagnostics.reconcile_failures.len(),
        "consolidation complete"
    );

    Consolidation {
        descriptors: output,
        diagnostics,
    }
}

fn checked_score(score: f64) -> Result<f64, SimilarityError> {
    if (0.0..=1.0).contains(&score) {
        Ok(score)
    } else {
        Err(SimilarityError::new(format!("score {score} outside [0, 1]")))
    }
}

/// Rewrite parents that name a merged-away descriptor, then drop self-parents.
///
/// A merged-away name that still belongs to some surviving descriptor is
/// left alone.
fn repoint_parents(output: &mut [TopicDescriptor], merged_away: Vec<(String, String)>) {
    let surviving: HashSet<String> = output.iter().map(|d| d.name.clone()).collect();
    let mut renames: HashMap<String, String> = HashMap::new();
    for (old, new) in merged_away {
        if !surviving.contains(&old) {
            renames.entry(old).or_insert(new);
        }
    }

    for descriptor in output.iter_mut() {
        if let Some(new) = descriptor.parent.as_ref().and_then(|p| renames.get(p)) {
            descriptor.parent = Some(new.clone());
        }
        if descriptor.parent.as_deref() == Some(descriptor.name.as_str()) {
            descriptor.parent = None;
        }
    }
}

/// Descriptors without sources sort after every sourced descriptor.
fn appearance_cmp(a: Option<&SegmentRef>, b: Option<&SegmentRef>) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Union-find whose representative is always the smallest index in the set.
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (low, high) = (ra.min(rb), ra.max(rb));
            self.parent[high] = low;
        }
    }

    /// Components ordered by their smallest member, members ascending.
    fn groups(mut self) -> Vec<Vec<usize>> {
        let mut by_root: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..self.parent.len() {
            let root = self.find(i);
            by_root.entry(root).or_default().push(i);
        }
        by_root.into_values().collect()
    }
}
