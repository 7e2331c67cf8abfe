use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;

use crate::data::AttributionData;
use crate::model::{
    AttributionId, ExternalAttributionSource, FrequentLicense, OutputPayload, PackageInfo,
    ParsedFileContent,
};
use crate::operations::{self, EngineContext};
use crate::resource::ResourceIndex;
use crate::KernelError;

/// Explicit owner of one opened file's engine state.
///
/// Readers clone the `Arc` snapshots they need; every mutating method computes
/// the next snapshot first and swaps it in only when the operation succeeded.
#[derive(Debug, Clone, Default)]
pub struct AttributionState {
    resources: Arc<ResourceIndex>,
    breakpoints: Arc<BTreeSet<String>>,
    external_sources: Arc<BTreeMap<String, ExternalAttributionSource>>,
    frequent_licenses: Arc<Vec<FrequentLicense>>,
    base_urls_for_sources: Arc<BTreeMap<String, Option<String>>>,
    manual: Arc<AttributionData>,
    external: Arc<AttributionData>,
    resolved_external_attributions: Arc<BTreeSet<AttributionId>>,
}

/// Everything collaborators show for a single resource.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceView {
    pub path: String,
    pub manual_attributions: Vec<PackageInfo>,
    pub external_attributions: Vec<PackageInfo>,
    pub closest_parent: Option<String>,
    pub closest_parent_attributions: Vec<PackageInfo>,
    pub has_manual_attributed_children: bool,
    pub has_external_attributed_children: bool,
    pub is_breakpoint: bool,
    pub is_file_with_children: bool,
}

impl AttributionState {
    /// Builds both attribution sets and their indices from loader output.
    ///
    /// # Errors
    /// Returns [`KernelError::Validation`] or [`KernelError::InvalidResource`]
    /// when an attribution set does not fit the resource tree.
    pub fn from_parsed(parsed: ParsedFileContent) -> Result<Self, KernelError> {
        let resources = ResourceIndex::from_resources(&parsed.resources, parsed.files_with_children);
        for breakpoint in &parsed.attribution_breakpoints {
            if !resources.contains(breakpoint) {
                tracing::warn!(breakpoint = %breakpoint, "breakpoint is not part of the resource tree");
            }
        }

        let resolved = parsed.resolved_external_attributions;
        let external =
            AttributionData::from_input(parsed.external_attributions, &resources, Some(&resolved))?;
        let manual = AttributionData::from_input(parsed.manual_attributions, &resources, None)?;

        tracing::debug!(
            resources = resources.len(),
            manual = manual.attributions().len(),
            external = external.attributions().len(),
            resolved = resolved.len(),
            "built attribution state"
        );
        Ok(Self {
            resources: Arc::new(resources),
            breakpoints: Arc::new(parsed.attribution_breakpoints),
            external_sources: Arc::new(parsed.external_attribution_sources),
            frequent_licenses: Arc::new(parsed.frequent_licenses),
            base_urls_for_sources: Arc::new(parsed.base_urls_for_sources),
            manual: Arc::new(manual),
            external: Arc::new(external),
            resolved_external_attributions: Arc::new(resolved),
        })
    }

    #[must_use]
    pub fn resources(&self) -> &ResourceIndex {
        &self.resources
    }

    #[must_use]
    pub fn breakpoints(&self) -> &BTreeSet<String> {
        &self.breakpoints
    }

    #[must_use]
    pub fn external_sources(&self) -> &BTreeMap<String, ExternalAttributionSource> {
        &self.external_sources
    }

    #[must_use]
    pub fn frequent_licenses(&self) -> &[FrequentLicense] {
        &self.frequent_licenses
    }

    #[must_use]
    pub fn base_urls_for_sources(&self) -> &BTreeMap<String, Option<String>> {
        &self.base_urls_for_sources
    }

    #[must_use]
    pub fn manual(&self) -> &AttributionData {
        &self.manual
    }

    #[must_use]
    pub fn external(&self) -> &AttributionData {
        &self.external
    }

    /// Shared handle on the current manual snapshot.
    #[must_use]
    pub fn manual_snapshot(&self) -> Arc<AttributionData> {
        Arc::clone(&self.manual)
    }

    #[must_use]
    pub fn resolved_external_attributions(&self) -> &BTreeSet<AttributionId> {
        &self.resolved_external_attributions
    }

    #[must_use]
    pub fn context(&self) -> EngineContext<'_> {
        EngineContext {
            resources: &self.resources,
            breakpoints: &self.breakpoints,
            external: &self.external,
            external_sources: &self.external_sources,
        }
    }

    /// # Errors
    /// See [`operations::create_attribution`].
    pub fn create_attribution(
        &mut self,
        resource_path: &str,
        record: PackageInfo,
    ) -> Result<AttributionId, KernelError> {
        let (next, id) =
            operations::create_attribution(&self.manual, &self.context(), resource_path, record)?;
        self.manual = Arc::new(next);
        Ok(id)
    }

    /// # Errors
    /// See [`operations::update_attribution`].
    pub fn update_attribution(
        &mut self,
        id: &AttributionId,
        record: PackageInfo,
    ) -> Result<(), KernelError> {
        let next = operations::update_attribution(&self.manual, &self.context(), id, record)?;
        self.manual = Arc::new(next);
        Ok(())
    }

    /// # Errors
    /// See [`operations::delete_attribution`].
    pub fn delete_attribution(&mut self, id: &AttributionId) -> Result<(), KernelError> {
        let next = operations::delete_attribution(&self.manual, &self.context(), id)?;
        self.manual = Arc::new(next);
        Ok(())
    }

    /// # Errors
    /// See [`operations::link_attribution`].
    pub fn link_attribution(
        &mut self,
        resource_path: &str,
        id: &AttributionId,
    ) -> Result<(), KernelError> {
        let next = operations::link_attribution(&self.manual, &self.context(), resource_path, id)?;
        self.manual = Arc::new(next);
        Ok(())
    }

    /// # Errors
    /// See [`operations::unlink_attribution`].
    pub fn unlink_attribution(
        &mut self,
        resource_path: &str,
        id: &AttributionId,
    ) -> Result<(), KernelError> {
        let next =
            operations::unlink_attribution(&self.manual, &self.context(), resource_path, id)?;
        self.manual = Arc::new(next);
        Ok(())
    }

    /// # Errors
    /// See [`operations::replace_attribution`].
    pub fn replace_attribution(
        &mut self,
        id_to_replace_with: &AttributionId,
        id_to_replace: &AttributionId,
    ) -> Result<(), KernelError> {
        let next = operations::replace_attribution(
            &self.manual,
            &self.context(),
            id_to_replace_with,
            id_to_replace,
        )?;
        self.manual = Arc::new(next);
        Ok(())
    }

    /// # Errors
    /// See [`operations::resolve_external_attributions`].
    pub fn resolve_external_attributions(&mut self, ids: &[AttributionId]) -> Result<(), KernelError> {
        let (external, resolved) = operations::resolve_external_attributions(
            &self.external,
            &self.resolved_external_attributions,
            ids,
        )?;
        self.external = Arc::new(external);
        self.resolved_external_attributions = Arc::new(resolved);
        Ok(())
    }

    /// # Errors
    /// See [`operations::unresolve_external_attributions`].
    pub fn unresolve_external_attributions(
        &mut self,
        ids: &[AttributionId],
    ) -> Result<(), KernelError> {
        let (external, resolved) = operations::unresolve_external_attributions(
            &self.external,
            &self.resolved_external_attributions,
            ids,
        )?;
        self.external = Arc::new(external);
        self.resolved_external_attributions = Arc::new(resolved);
        Ok(())
    }

    #[must_use]
    pub fn is_breakpoint(&self, path: &str) -> bool {
        self.breakpoints.contains(path)
    }

    #[must_use]
    pub fn is_file_with_children(&self, path: &str) -> bool {
        self.resources.is_file_with_children(path)
    }

    /// Manual attributions of the nearest attributed ancestor of `path`.
    #[must_use]
    pub fn closest_parent_attributions(&self, path: &str) -> Option<(&str, Vec<&PackageInfo>)> {
        let (parent, ids) = self.manual.closest_parent_attribution_ids(path, &self.breakpoints)?;
        let records = ids.iter().filter_map(|id| self.manual.attribution(id)).collect();
        Some((parent, records))
    }

    /// # Errors
    /// Returns [`KernelError::InvalidResource`] when `path` is not part of the tree.
    pub fn resource_view(&self, path: &str) -> Result<ResourceView, KernelError> {
        self.resources.ensure_known(path)?;

        let owned = |records: Vec<&PackageInfo>| records.into_iter().cloned().collect::<Vec<_>>();
        let (closest_parent, closest_parent_attributions) = self
            .closest_parent_attributions(path)
            .map_or((None, Vec::new()), |(parent, records)| {
                (Some(parent.to_string()), owned(records))
            });
        Ok(ResourceView {
            path: path.to_string(),
            manual_attributions: owned(self.manual.attributions_of_resource(path)),
            external_attributions: owned(self.external.attributions_of_resource(path)),
            closest_parent,
            closest_parent_attributions,
            has_manual_attributed_children: self
                .manual
                .resources_with_attributed_children()
                .has_attributed_children(path),
            has_external_attributed_children: self
                .external
                .resources_with_attributed_children()
                .has_attributed_children(path),
            is_breakpoint: self.is_breakpoint(path),
            is_file_with_children: self.is_file_with_children(path),
        })
    }

    /// The part of the state the save collaborator persists.
    #[must_use]
    pub fn output_payload(&self) -> OutputPayload {
        OutputPayload {
            manual_attributions: self.manual.attributions().clone(),
            resources_to_attributions: self.manual.resources_to_attributions().clone(),
            resolved_external_attributions: (*self.resolved_external_attributions).clone(),
        }
    }

    /// # Errors
    /// Returns [`KernelError::Consistency`] naming the first broken invariant
    /// of either attribution set.
    pub fn verify_consistency(&self) -> Result<(), KernelError> {
        self.manual.verify_consistency(None).map_err(|err| labelled("manual attributions", err))?;
        self.external
            .verify_consistency(Some(self.resolved_external_attributions.as_ref()))
            .map_err(|err| labelled("external attributions", err))
    }
}

fn labelled(set: &str, err: KernelError) -> KernelError {
    match err {
        KernelError::Consistency(message) => KernelError::Consistency(format!("{set}: {message}")),
        other => other,
    }
}
