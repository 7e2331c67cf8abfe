use std::collections::BTreeSet;

use crate::data::AttributionData;
use crate::model::AttributionId;
use crate::resource::{ancestors, is_directory_path, path_depth};

/// Multiset equality of the linked records by content: every record on the
/// left consumes one matching record on the right.
fn same_attribution_set(
    data: &AttributionData,
    left: &[AttributionId],
    right: &[AttributionId],
) -> bool {
    if left.len() != right.len() {
        return false;
    }
    let mut unmatched = right.iter().filter_map(|id| data.attribution(id)).collect::<Vec<_>>();
    if unmatched.len() != right.len() {
        return false;
    }
    for id in left {
        let Some(record) = data.attribution(id) else {
            return false;
        };
        let Some(position) = unmatched.iter().position(|candidate| record.same_content(candidate))
        else {
            return false;
        };
        unmatched.swap_remove(position);
    }
    unmatched.is_empty()
}

/// Whether the link list of `path` repeats the one of its closest attributed
/// ancestor (searching no further than the first breakpoint).
#[must_use]
pub fn is_redundant_with_closest_parent(
    data: &AttributionData,
    path: &str,
    breakpoints: &BTreeSet<String>,
) -> bool {
    let own = data.attribution_ids_of(path);
    if own.is_empty() {
        return false;
    }
    data.closest_parent_attribution_ids(path, breakpoints)
        .is_some_and(|(_, parent_ids)| same_attribution_set(data, parent_ids, own))
}

/// Ancestors first, so a candidate is always checked against an already
/// pruned chain above it.
fn ordered_candidates<I, S>(candidates: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut ordered = candidates
        .into_iter()
        .map(Into::into)
        .collect::<BTreeSet<String>>()
        .into_iter()
        .collect::<Vec<_>>();
    ordered.sort_by(|left, right| {
        path_depth(left).cmp(&path_depth(right)).then_with(|| left.cmp(right))
    });
    ordered
}

/// Prunes every redundant candidate in place; returns the pruned resources.
pub(crate) fn prune_redundant_resources<I, S>(
    data: &mut AttributionData,
    candidates: I,
    breakpoints: &BTreeSet<String>,
) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut pruned = Vec::new();
    for path in ordered_candidates(candidates) {
        if !is_redundant_with_closest_parent(data, &path, breakpoints) {
            continue;
        }
        for id in data.remove_resource(&path) {
            data.drop_if_orphaned(&id);
        }
        pruned.push(path);
    }
    pruned
}

/// The inference step as a pure function over a snapshot.
#[must_use]
pub fn run_inference_step(
    data: &AttributionData,
    candidates: &[String],
    breakpoints: &BTreeSet<String>,
) -> AttributionData {
    let mut next = data.clone();
    prune_redundant_resources(&mut next, candidates.iter().cloned(), breakpoints);
    next
}

/// `path`, its ancestors carrying `id`, and its descendants carrying `id`.
pub(crate) fn link_candidates(data: &AttributionData, path: &str, id: &AttributionId) -> Vec<String> {
    let mut candidates = ancestors(path)
        .filter(|ancestor| data.attribution_ids_of(ancestor).contains(id))
        .map(str::to_string)
        .collect::<Vec<_>>();
    candidates.push(path.to_string());
    if is_directory_path(path) {
        candidates.extend(
            data.resources_of(id)
                .iter()
                .filter(|resource| resource.len() > path.len() && resource.starts_with(path))
                .cloned(),
        );
    }
    candidates
}

/// `path` itself plus every attributed resource below it.
pub(crate) fn subtree_candidates(data: &AttributionData, path: &str) -> Vec<String> {
    std::iter::once(path)
        .chain(data.resources_with_attributed_children().attributed_children_of(path))
        .map(str::to_string)
        .collect()
}
