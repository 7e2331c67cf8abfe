use std::collections::{BTreeMap, BTreeSet};

use crate::data::AttributionData;
use crate::model::{
    AttributionId, Attributions, ExternalAttributionSource, PackageInfo, ResourcesToAttributions,
};
use crate::resource::{ancestors, is_directory_path, ResourceIndex};

/// Derived preference flags of a manual record.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct PreferredState {
    pub was_preferred: bool,
    pub modified_preferred: bool,
}

/// Resources under `root` whose signals a preferred attribution at `root`
/// speaks for. Descent stops below any resource with its own manual
/// attribution; that resource itself is still part of the result.
fn preference_subtree<'a>(
    root: &'a str,
    resources: &'a ResourceIndex,
    resources_to_manual: &ResourcesToAttributions,
) -> Vec<&'a str> {
    let mut subtree = vec![root];
    let mut shadowed: Option<&str> = None;
    for path in resources.descendants_of(root) {
        if shadowed.is_some_and(|prefix| path.starts_with(prefix)) {
            continue;
        }
        shadowed = None;
        subtree.push(path);
        if is_directory_path(path) && resources_to_manual.contains_key(path) {
            shadowed = Some(path);
        }
    }
    subtree
}

/// Origin ids of the relevant external signals below `root_paths`, first
/// seen first, without duplicates.
#[must_use]
pub fn calculate_preferred_over_origin_ids(
    root_paths: &[&str],
    resources: &ResourceIndex,
    resources_to_external: &ResourcesToAttributions,
    resources_to_manual: &ResourcesToAttributions,
    external_attributions: &Attributions,
    external_sources: &BTreeMap<String, ExternalAttributionSource>,
) -> Vec<String> {
    let is_relevant = |info: &PackageInfo| {
        info.source.as_ref().is_some_and(|source| {
            external_sources.get(&source.name).is_some_and(|known| known.is_relevant_for_preferred)
        })
    };

    let mut seen = BTreeSet::new();
    let mut origin_ids = Vec::new();
    for root in root_paths {
        for path in preference_subtree(root, resources, resources_to_manual) {
            let Some(external_ids) = resources_to_external.get(path) else {
                continue;
            };
            for info in external_ids.iter().filter_map(|id| external_attributions.get(id)) {
                if !is_relevant(info) {
                    continue;
                }
                for origin_id in &info.origin_ids {
                    if seen.insert(origin_id.as_str()) {
                        origin_ids.push(origin_id.clone());
                    }
                }
            }
        }
    }
    origin_ids
}

/// Recomputes `preferredOverOriginIds` for the nearest ancestor of
/// `changed_path` holding a preferred manual attribution. Farther ancestors
/// are left alone.
#[must_use]
pub fn recalculate_preferences_of_parents<F>(
    changed_path: &str,
    data: &AttributionData,
    calculate: F,
) -> AttributionData
where
    F: Fn(&str, &ResourcesToAttributions) -> Vec<String>,
{
    let mut next = data.clone();
    recalculate_preferences_of_parents_in_place(changed_path, &mut next, &calculate);
    next
}

pub(crate) fn recalculate_preferences_of_parents_in_place<F>(
    changed_path: &str,
    data: &mut AttributionData,
    calculate: &F,
) where
    F: Fn(&str, &ResourcesToAttributions) -> Vec<String>,
{
    for parent in ancestors(changed_path) {
        let preferred_ids = data
            .attribution_ids_of(parent)
            .iter()
            .filter(|id| data.attribution(id).is_some_and(|info| info.preferred))
            .cloned()
            .collect::<Vec<_>>();
        if preferred_ids.is_empty() {
            continue;
        }
        for id in &preferred_ids {
            refresh_own_preference(data, id, calculate);
        }
        return;
    }
}

/// Sets `preferredOverOriginIds` of `id` from every resource it is linked to,
/// or clears it when the record is not preferred.
pub(crate) fn refresh_own_preference<F>(data: &mut AttributionData, id: &AttributionId, calculate: &F)
where
    F: Fn(&str, &ResourcesToAttributions) -> Vec<String>,
{
    let Some(preferred) = data.attribution(id).map(|info| info.preferred) else {
        return;
    };
    let origin_ids = if preferred {
        let mut seen = BTreeSet::new();
        data.resources_of(id)
            .iter()
            .flat_map(|path| calculate(path.as_str(), data.resources_to_attributions()))
            .filter(|origin_id| seen.insert(origin_id.clone()))
            .collect()
    } else {
        Vec::new()
    };
    if let Some(info) = data.attribution_mut(id) {
        info.preferred_over_origin_ids = origin_ids;
    }
}

fn without_preference_bookkeeping(record: &PackageInfo) -> PackageInfo {
    PackageInfo {
        id: AttributionId::default(),
        pre_selected: false,
        preferred: false,
        preferred_over_origin_ids: Vec::new(),
        was_preferred: false,
        modified_preferred: false,
        origin_ids: Vec::new(),
        source: None,
        ..record.clone()
    }
}

/// Flags a manual record that stems from a formerly preferred signal, and
/// whether the reviewer has changed it since.
#[must_use]
pub fn derive_modified_preferred_state<'a, I>(record: &PackageInfo, externals: I) -> PreferredState
where
    I: IntoIterator<Item = &'a PackageInfo>,
{
    let origins = externals
        .into_iter()
        .filter(|external| external.was_preferred && record.shares_origin_with(external))
        .collect::<Vec<_>>();
    if origins.is_empty() {
        return PreferredState::default();
    }

    let stripped = without_preference_bookkeeping(record);
    let unchanged =
        origins.iter().any(|external| without_preference_bookkeeping(external) == stripped);
    PreferredState { was_preferred: true, modified_preferred: !unchanged }
}
