//! Shaping canonical descriptors into the module/submodule output list.

use std::collections::HashMap;

use docmap_shared::{DocmapError, ModuleEntry, Result, SegmentRef, TopicDescriptor};

struct Draft {
    entry: ModuleEntry,
    first: Option<SegmentRef>,
    described: bool,
}

/// Group descriptors into modules with their submodules.
///
/// Parentless descriptors are modules; the rest are filed under the module
/// their parent names. A parent that is not itself a module gets a module
/// with an empty description. Modules are ordered by first appearance, those
/// with no source last; ties keep input order. When names repeat, the first
/// description wins.
pub fn shape_modules(descriptors: &[TopicDescriptor]) -> Vec<ModuleEntry> {
    let mut drafts: Vec<Draft> = Vec::new();
    let mut by_name: HashMap<String, usize> = HashMap::new();

    for descriptor in descriptors {
        let module_name = descriptor.parent.as_deref().unwrap_or(&descriptor.name);
        let slot = *by_name.entry(module_name.to_string()).or_insert_with(|| {
            drafts.push(Draft {
                entry: ModuleEntry {
                    module: module_name.to_string(),
                    description: String::new(),
                    submodules: Default::default(),
                },
                first: None,
                described: false,
            });
            drafts.len() - 1
        });

        let draft = &mut drafts[slot];
        draft.first = earliest(draft.first.take(), descriptor.first_appearance());
        match descriptor.parent {
            None if !draft.described => {
                draft.entry.description = descriptor.description.clone();
                draft.described = true;
            }
            None => {}
            Some(_) => {
                draft
                    .entry
                    .submodules
                    .entry(descriptor.name.clone())
                    .or_insert_with(|| descriptor.description.clone());
            }
        }
    }

    // Stable sort keeps input order among equal appearances.
    drafts.sort_by(|a, b| match (&a.first, &b.first) {
        (Some(x), Some(y)) => x.cmp(y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    drafts.into_iter().map(|d| d.entry).collect()
}

/// Pretty JSON in the `[{"module", "Description", "Submodules"}]` shape.
pub fn modules_to_json(modules: &[ModuleEntry]) -> Result<String> {
    serde_json::to_string_pretty(modules).map_err(|e| DocmapError::validation(e.to_string()))
}

fn earliest(current: Option<SegmentRef>, candidate: Option<&SegmentRef>) -> Option<SegmentRef> {
    match (current, candidate) {
        (Some(cur), Some(cand)) if cand < &cur => Some(cand.clone()),
        (Some(cur), _) => Some(cur),
        (None, cand) => cand.cloned(),
    }
}
