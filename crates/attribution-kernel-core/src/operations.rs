use std::collections::{BTreeMap, BTreeSet};

use crate::data::AttributionData;
use crate::inference::{link_candidates, prune_redundant_resources, subtree_candidates};
use crate::model::{AttributionId, ExternalAttributionSource, PackageInfo, ResourcesToAttributions};
use crate::preference::{
    calculate_preferred_over_origin_ids, derive_modified_preferred_state,
    recalculate_preferences_of_parents_in_place, refresh_own_preference,
};
use crate::resource::ResourceIndex;
use crate::KernelError;

/// Read-only inputs every operation on the manual set needs.
#[derive(Debug, Clone, Copy)]
pub struct EngineContext<'a> {
    pub resources: &'a ResourceIndex,
    pub breakpoints: &'a BTreeSet<String>,
    pub external: &'a AttributionData,
    pub external_sources: &'a BTreeMap<String, ExternalAttributionSource>,
}

impl EngineContext<'_> {
    #[must_use]
    pub fn preferred_over_origin_ids(
        &self,
        path: &str,
        resources_to_manual: &ResourcesToAttributions,
    ) -> Vec<String> {
        calculate_preferred_over_origin_ids(
            &[path],
            self.resources,
            self.external.resources_to_attributions(),
            resources_to_manual,
            self.external.attributions(),
            self.external_sources,
        )
    }

    fn ensure_known(&self, path: &str) -> Result<(), KernelError> {
        self.resources.ensure_known(path)
    }

    fn derive_flags(&self, mut record: PackageInfo) -> PackageInfo {
        let state = derive_modified_preferred_state(&record, self.external.attributions().values());
        record.was_preferred = state.was_preferred;
        record.modified_preferred = state.modified_preferred;
        record
    }

    fn recalculate_parents(&self, data: &mut AttributionData, changed_path: &str) {
        let calculate = |path: &str, manual: &ResourcesToAttributions| {
            self.preferred_over_origin_ids(path, manual)
        };
        recalculate_preferences_of_parents_in_place(changed_path, data, &calculate);
    }

    fn refresh_own(&self, data: &mut AttributionData, id: &AttributionId) {
        let calculate = |path: &str, manual: &ResourcesToAttributions| {
            self.preferred_over_origin_ids(path, manual)
        };
        refresh_own_preference(data, id, &calculate);
    }
}

fn ensure_attribution(data: &AttributionData, id: &AttributionId) -> Result<(), KernelError> {
    if data.contains_attribution(id) {
        Ok(())
    } else {
        Err(KernelError::UnknownAttributionId(id.to_string()))
    }
}

/// Stores `record` under a fresh id linked to `resource_path`.
///
/// # Errors
/// Returns [`KernelError::InvalidResource`] when `resource_path` is not part of the tree.
pub fn create_attribution(
    data: &AttributionData,
    ctx: &EngineContext<'_>,
    resource_path: &str,
    record: PackageInfo,
) -> Result<(AttributionData, AttributionId), KernelError> {
    ctx.ensure_known(resource_path)?;

    let id = AttributionId::generate();
    let mut next = data.clone();
    next.insert_attribution(ctx.derive_flags(PackageInfo { id: id.clone(), ..record }));
    next.insert_link(resource_path, &id);
    ctx.refresh_own(&mut next, &id);
    ctx.recalculate_parents(&mut next, resource_path);

    tracing::debug!(attribution_id = %id, resource = resource_path, "created attribution");
    Ok((next, id))
}

/// Replaces the record stored under `id`; links are untouched.
///
/// # Errors
/// Returns [`KernelError::UnknownAttributionId`] when `id` does not exist.
pub fn update_attribution(
    data: &AttributionData,
    ctx: &EngineContext<'_>,
    id: &AttributionId,
    record: PackageInfo,
) -> Result<AttributionData, KernelError> {
    ensure_attribution(data, id)?;

    let mut next = data.clone();
    next.insert_attribution(ctx.derive_flags(PackageInfo { id: id.clone(), ..record }));
    ctx.refresh_own(&mut next, id);
    for path in data.resources_of(id) {
        ctx.recalculate_parents(&mut next, path);
    }

    tracing::debug!(attribution_id = %id, "updated attribution");
    Ok(next)
}

/// Removes `id` everywhere, then prunes the subtrees it was linked in.
///
/// # Errors
/// Returns [`KernelError::UnknownAttributionId`] when `id` does not exist.
pub fn delete_attribution(
    data: &AttributionData,
    ctx: &EngineContext<'_>,
    id: &AttributionId,
) -> Result<AttributionData, KernelError> {
    ensure_attribution(data, id)?;

    let mut next = data.clone();
    let formerly_linked = next.remove_attribution(id);
    let candidates = formerly_linked
        .iter()
        .flat_map(|path| subtree_candidates(&next, path))
        .collect::<Vec<_>>();
    let pruned =
        prune_redundant_resources(&mut next, candidates, ctx.breakpoints);
    for path in &formerly_linked {
        ctx.recalculate_parents(&mut next, path);
    }

    tracing::debug!(
        attribution_id = %id,
        unlinked = formerly_linked.len(),
        pruned = pruned.len(),
        "deleted attribution"
    );
    Ok(next)
}

/// Links `id` to `resource_path` and prunes links made redundant by it.
/// Linking an existing pair returns the snapshot unchanged.
///
/// # Errors
/// Returns [`KernelError::InvalidResource`] for an unknown path and
/// [`KernelError::UnknownAttributionId`] for an unknown id.
pub fn link_attribution(
    data: &AttributionData,
    ctx: &EngineContext<'_>,
    resource_path: &str,
    id: &AttributionId,
) -> Result<AttributionData, KernelError> {
    ctx.ensure_known(resource_path)?;
    ensure_attribution(data, id)?;

    let mut next = data.clone();
    if !next.insert_link(resource_path, id) {
        return Ok(next);
    }
    let candidates = link_candidates(&next, resource_path, id);
    let pruned =
        prune_redundant_resources(&mut next, candidates, ctx.breakpoints);
    ctx.recalculate_parents(&mut next, resource_path);

    tracing::debug!(
        attribution_id = %id,
        resource = resource_path,
        pruned = pruned.len(),
        "linked attribution"
    );
    Ok(next)
}

/// Removes the link between `resource_path` and `id`. Unknown ids and
/// missing links are a no-op.
///
/// # Errors
/// Returns [`KernelError::InvalidResource`] when `resource_path` is not part of the tree.
pub fn unlink_attribution(
    data: &AttributionData,
    ctx: &EngineContext<'_>,
    resource_path: &str,
    id: &AttributionId,
) -> Result<AttributionData, KernelError> {
    ctx.ensure_known(resource_path)?;

    let mut next = data.clone();
    if !next.remove_link(resource_path, id) {
        return Ok(next);
    }
    let dropped = next.drop_if_orphaned(id);
    ctx.recalculate_parents(&mut next, resource_path);

    tracing::debug!(
        attribution_id = %id,
        resource = resource_path,
        dropped,
        "unlinked attribution"
    );
    Ok(next)
}

/// Moves every link of `id_to_replace` onto `id_to_replace_with` and removes
/// the replaced record.
///
/// # Errors
/// Returns [`KernelError::UnknownAttributionId`] when either id does not exist.
pub fn replace_attribution(
    data: &AttributionData,
    ctx: &EngineContext<'_>,
    id_to_replace_with: &AttributionId,
    id_to_replace: &AttributionId,
) -> Result<AttributionData, KernelError> {
    ensure_attribution(data, id_to_replace_with)?;
    ensure_attribution(data, id_to_replace)?;

    let mut next = data.clone();
    if id_to_replace_with == id_to_replace {
        return Ok(next);
    }
    for path in data.resources_of(id_to_replace) {
        next.repoint_link(path, id_to_replace, id_to_replace_with);
    }
    next.remove_attribution(id_to_replace);

    let candidates = next.resources_of(id_to_replace_with).to_vec();
    let pruned = prune_redundant_resources(&mut next, candidates.iter().cloned(), ctx.breakpoints);
    for path in &candidates {
        ctx.recalculate_parents(&mut next, path);
    }

    tracing::debug!(
        replaced = %id_to_replace,
        replaced_with = %id_to_replace_with,
        pruned = pruned.len(),
        "replaced attribution"
    );
    Ok(next)
}

fn ensure_external_ids<'a, I>(external: &AttributionData, ids: I) -> Result<(), KernelError>
where
    I: IntoIterator<Item = &'a AttributionId>,
{
    ids.into_iter().try_for_each(|id| ensure_attribution(external, id))
}

/// Marks external attributions as resolved and rebuilds the external
/// coverage index without them.
///
/// # Errors
/// Returns [`KernelError::UnknownAttributionId`] when an id is not an external attribution.
pub fn resolve_external_attributions(
    external: &AttributionData,
    resolved: &BTreeSet<AttributionId>,
    ids: &[AttributionId],
) -> Result<(AttributionData, BTreeSet<AttributionId>), KernelError> {
    ensure_external_ids(external, ids)?;

    let mut next_resolved = resolved.clone();
    next_resolved.extend(ids.iter().cloned());
    let mut next = external.clone();
    next.rebuild_coverage(Some(&next_resolved));

    tracing::debug!(count = ids.len(), total = next_resolved.len(), "resolved external attributions");
    Ok((next, next_resolved))
}

/// Inverse of [`resolve_external_attributions`].
///
/// # Errors
/// Returns [`KernelError::UnknownAttributionId`] when an id is not an external attribution.
pub fn unresolve_external_attributions(
    external: &AttributionData,
    resolved: &BTreeSet<AttributionId>,
    ids: &[AttributionId],
) -> Result<(AttributionData, BTreeSet<AttributionId>), KernelError> {
    ensure_external_ids(external, ids)?;

    let mut next_resolved = resolved.clone();
    for id in ids {
        next_resolved.remove(id);
    }
    let mut next = external.clone();
    next.rebuild_coverage(Some(&next_resolved));

    tracing::debug!(count = ids.len(), total = next_resolved.len(), "unresolved external attributions");
    Ok((next, next_resolved))
}
