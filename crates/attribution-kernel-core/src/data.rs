use std::collections::BTreeSet;

use crate::coverage::AttributedChildren;
use crate::model::{
    AttributionId, Attributions, AttributionsToResources, InputAttributions, PackageInfo,
    ResourcesToAttributions,
};
use crate::resource::{ancestors, ResourceIndex};
use crate::KernelError;

/// One attribution set (manual or external) with its link and coverage indices.
///
/// Snapshots are only produced by the engine operations; readers get `&self`
/// and never observe a half-updated index pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributionData {
    attributions: Attributions,
    resources_to_attributions: ResourcesToAttributions,
    attributions_to_resources: AttributionsToResources,
    resources_with_attributed_children: AttributedChildren,
}

impl AttributionData {
    /// Rebuilds every index from loader input.
    ///
    /// Duplicate ids inside one link list are collapsed and empty lists are
    /// dropped. Records that no resource links to are dropped as well.
    ///
    /// # Errors
    /// Returns [`KernelError::InvalidResource`] for links on unknown paths and
    /// [`KernelError::Validation`] for records whose embedded id disagrees with
    /// their key or links naming unknown ids.
    pub fn from_input(
        input: InputAttributions,
        resources: &ResourceIndex,
        excluded: Option<&BTreeSet<AttributionId>>,
    ) -> Result<Self, KernelError> {
        let mut attributions = Attributions::new();
        for (id, mut info) in input.attributions {
            if info.id.is_empty() {
                info.id = id.clone();
            } else if info.id != id {
                return Err(KernelError::Validation(format!(
                    "attribution stored under {id} carries mismatching id {}",
                    info.id
                )));
            }
            attributions.insert(id, info);
        }

        let mut resources_to_attributions = ResourcesToAttributions::new();
        let mut attributions_to_resources = AttributionsToResources::new();
        for (path, ids) in input.resources_to_attributions {
            resources.ensure_known(&path)?;
            let mut linked = Vec::with_capacity(ids.len());
            for id in ids {
                if !attributions.contains_key(&id) {
                    return Err(KernelError::Validation(format!(
                        "resource {path} links unknown attribution {id}"
                    )));
                }
                if !linked.contains(&id) {
                    attributions_to_resources.entry(id.clone()).or_default().push(path.clone());
                    linked.push(id);
                }
            }
            if !linked.is_empty() {
                resources_to_attributions.insert(path, linked);
            }
        }

        attributions.retain(|id, _| {
            let linked = attributions_to_resources.contains_key(id);
            if !linked {
                tracing::warn!(attribution_id = %id, "dropping attribution without linked resources");
            }
            linked
        });

        let resources_with_attributed_children =
            AttributedChildren::build(&resources_to_attributions, excluded);
        Ok(Self {
            attributions,
            resources_to_attributions,
            attributions_to_resources,
            resources_with_attributed_children,
        })
    }

    #[must_use]
    pub fn attributions(&self) -> &Attributions {
        &self.attributions
    }

    #[must_use]
    pub fn resources_to_attributions(&self) -> &ResourcesToAttributions {
        &self.resources_to_attributions
    }

    #[must_use]
    pub fn attributions_to_resources(&self) -> &AttributionsToResources {
        &self.attributions_to_resources
    }

    #[must_use]
    pub fn resources_with_attributed_children(&self) -> &AttributedChildren {
        &self.resources_with_attributed_children
    }

    #[must_use]
    pub fn attribution(&self, id: &AttributionId) -> Option<&PackageInfo> {
        self.attributions.get(id)
    }

    #[must_use]
    pub fn contains_attribution(&self, id: &AttributionId) -> bool {
        self.attributions.contains_key(id)
    }

    /// Ids linked to `path`, in display order.
    #[must_use]
    pub fn attribution_ids_of(&self, path: &str) -> &[AttributionId] {
        self.resources_to_attributions.get(path).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn resources_of(&self, id: &AttributionId) -> &[String] {
        self.attributions_to_resources.get(id).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn attributions_of_resource(&self, path: &str) -> Vec<&PackageInfo> {
        self.attribution_ids_of(path).iter().filter_map(|id| self.attributions.get(id)).collect()
    }

    #[must_use]
    pub fn link_count(&self) -> usize {
        self.resources_to_attributions.values().map(Vec::len).sum()
    }

    /// Nearest ancestor of `path` carrying attributions, unless a breakpoint
    /// lies on the way up.
    #[must_use]
    pub fn closest_parent_attribution_ids<'a>(
        &'a self,
        path: &str,
        breakpoints: &BTreeSet<String>,
    ) -> Option<(&'a str, &'a [AttributionId])> {
        for parent in ancestors(path) {
            if breakpoints.contains(parent) {
                return None;
            }
            if let Some((key, ids)) = self.resources_to_attributions.get_key_value(parent) {
                return Some((key.as_str(), ids.as_slice()));
            }
        }
        None
    }

    /// Every id linked anywhere in the subtree rooted at `path`.
    #[must_use]
    pub fn contained_attribution_ids(&self, path: &str) -> BTreeSet<AttributionId> {
        std::iter::once(path)
            .chain(self.resources_with_attributed_children.attributed_children_of(path))
            .flat_map(|resource| self.attribution_ids_of(resource).iter().cloned())
            .collect()
    }

    /// Checks the link invariants and that the coverage index matches a full
    /// rebuild.
    ///
    /// # Errors
    /// Returns [`KernelError::Consistency`] describing the first violation found.
    pub fn verify_consistency(
        &self,
        excluded: Option<&BTreeSet<AttributionId>>,
    ) -> Result<(), KernelError> {
        for (path, ids) in &self.resources_to_attributions {
            if ids.is_empty() {
                return Err(KernelError::Consistency(format!("resource {path} has an empty list")));
            }
            let unique = ids.iter().collect::<BTreeSet<_>>();
            if unique.len() != ids.len() {
                return Err(KernelError::Consistency(format!(
                    "resource {path} lists an attribution twice"
                )));
            }
            for id in ids {
                if !self.attributions.contains_key(id) {
                    return Err(KernelError::Consistency(format!(
                        "resource {path} links missing attribution {id}"
                    )));
                }
                if !self.resources_of(id).iter().any(|resource| resource == path) {
                    return Err(KernelError::Consistency(format!(
                        "link {path} -> {id} has no reverse entry"
                    )));
                }
            }
        }

        for (id, paths) in &self.attributions_to_resources {
            if paths.is_empty() {
                return Err(KernelError::Consistency(format!(
                    "attribution {id} has an empty resource list"
                )));
            }
            for path in paths {
                if !self.attribution_ids_of(path).contains(id) {
                    return Err(KernelError::Consistency(format!(
                        "link {id} -> {path} has no forward entry"
                    )));
                }
            }
        }

        for (id, info) in &self.attributions {
            if !self.attributions_to_resources.contains_key(id) {
                return Err(KernelError::Consistency(format!("attribution {id} is orphaned")));
            }
            if &info.id != id {
                return Err(KernelError::Consistency(format!(
                    "attribution {id} carries id {}",
                    info.id
                )));
            }
        }

        let rebuilt = AttributedChildren::build(&self.resources_to_attributions, excluded);
        if rebuilt != self.resources_with_attributed_children {
            return Err(KernelError::Consistency(
                "attributed-children index is out of date".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn insert_attribution(&mut self, info: PackageInfo) {
        self.attributions.insert(info.id.clone(), info);
    }

    pub(crate) fn attribution_mut(&mut self, id: &AttributionId) -> Option<&mut PackageInfo> {
        self.attributions.get_mut(id)
    }

    /// Appends the link; returns `false` when it already existed.
    pub(crate) fn insert_link(&mut self, path: &str, id: &AttributionId) -> bool {
        let ids = self.resources_to_attributions.entry(path.to_string()).or_default();
        if ids.contains(id) {
            return false;
        }
        ids.push(id.clone());
        self.attributions_to_resources.entry(id.clone()).or_default().push(path.to_string());
        self.refresh_coverage(path);
        true
    }

    /// Removes the link; returns `false` when it did not exist.
    pub(crate) fn remove_link(&mut self, path: &str, id: &AttributionId) -> bool {
        let Some(ids) = self.resources_to_attributions.get_mut(path) else {
            return false;
        };
        let Some(position) = ids.iter().position(|linked| linked == id) else {
            return false;
        };
        ids.remove(position);
        if ids.is_empty() {
            self.resources_to_attributions.remove(path);
        }
        if let Some(paths) = self.attributions_to_resources.get_mut(id) {
            paths.retain(|linked| linked != path);
            if paths.is_empty() {
                self.attributions_to_resources.remove(id);
            }
        }
        self.refresh_coverage(path);
        true
    }

    /// Swaps `old` for `new` at the same position in `path`'s list, or just
    /// drops `old` when `new` is already linked there.
    pub(crate) fn repoint_link(&mut self, path: &str, old: &AttributionId, new: &AttributionId) {
        let Some(ids) = self.resources_to_attributions.get_mut(path) else {
            return;
        };
        let Some(position) = ids.iter().position(|linked| linked == old) else {
            return;
        };
        if ids.contains(new) {
            ids.remove(position);
        } else {
            ids[position] = new.clone();
            self.attributions_to_resources.entry(new.clone()).or_default().push(path.to_string());
        }
        if let Some(paths) = self.attributions_to_resources.get_mut(old) {
            paths.retain(|linked| linked != path);
            if paths.is_empty() {
                self.attributions_to_resources.remove(old);
            }
        }
        self.refresh_coverage(path);
    }

    /// Drops every link of `path`; returns the ids that were linked.
    pub(crate) fn remove_resource(&mut self, path: &str) -> Vec<AttributionId> {
        let Some(ids) = self.resources_to_attributions.remove(path) else {
            return Vec::new();
        };
        for id in &ids {
            if let Some(paths) = self.attributions_to_resources.get_mut(id) {
                paths.retain(|linked| linked != path);
                if paths.is_empty() {
                    self.attributions_to_resources.remove(id);
                }
            }
        }
        self.refresh_coverage(path);
        ids
    }

    /// Removes `id` from the store and from every resource; returns the
    /// resources it was linked to.
    pub(crate) fn remove_attribution(&mut self, id: &AttributionId) -> Vec<String> {
        self.attributions.remove(id);
        let paths = self.attributions_to_resources.remove(id).unwrap_or_default();
        for path in &paths {
            if let Some(ids) = self.resources_to_attributions.get_mut(path) {
                ids.retain(|linked| linked != id);
                if ids.is_empty() {
                    self.resources_to_attributions.remove(path);
                }
            }
            self.refresh_coverage(path);
        }
        paths
    }

    /// Removes `id` from the store when no resource links to it any more.
    pub(crate) fn drop_if_orphaned(&mut self, id: &AttributionId) -> bool {
        if self.attributions_to_resources.contains_key(id) {
            return false;
        }
        self.attributions.remove(id).is_some()
    }

    pub(crate) fn rebuild_coverage(&mut self, excluded: Option<&BTreeSet<AttributionId>>) {
        self.resources_with_attributed_children =
            AttributedChildren::build(&self.resources_to_attributions, excluded);
    }

    /// Incremental refresh never filters; data with an exclusion set is only
    /// ever changed through [`Self::rebuild_coverage`].
    fn refresh_coverage(&mut self, path: &str) {
        let ids = self.resources_to_attributions.get(path).map(Vec::as_slice);
        self.resources_with_attributed_children.refresh_path(path, ids, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::tree_from_paths;

    fn fixture_index() -> ResourceIndex {
        let resources = tree_from_paths(["/parent/child", "/parent/other/leaf", "/solo"])
            .unwrap_or_else(|err| panic!("fixture tree should build: {err}"));
        ResourceIndex::from_resources(&resources, BTreeSet::new())
    }

    fn named(name: &str) -> PackageInfo {
        PackageInfo { package_name: Some(name.to_string()), ..PackageInfo::default() }
    }

    fn input(records: &[(&str, &str)], links: &[(&str, &[&str])]) -> InputAttributions {
        InputAttributions {
            attributions: records
                .iter()
                .map(|(id, name)| (AttributionId::from(*id), named(name)))
                .collect(),
            resources_to_attributions: links
                .iter()
                .map(|(path, ids)| {
                    ((*path).to_string(), ids.iter().map(|id| AttributionId::from(*id)).collect())
                })
                .collect(),
        }
    }

    fn load(input: InputAttributions) -> AttributionData {
        AttributionData::from_input(input, &fixture_index(), None)
            .unwrap_or_else(|err| panic!("fixture data should load: {err}"))
    }

    // Test IDs: TDATA-001
    #[test]
    fn from_input_builds_both_link_directions() {
        let data = load(input(
            &[("uuid1", "React"), ("uuid2", "Vue")],
            &[("/parent/", &["uuid1", "uuid1"]), ("/parent/child", &["uuid1", "uuid2"])],
        ));

        assert_eq!(data.attribution_ids_of("/parent/"), &[AttributionId::from("uuid1")]);
        assert_eq!(data.resources_of(&AttributionId::from("uuid1")), &["/parent/", "/parent/child"]);
        assert_eq!(
            data.attribution(&AttributionId::from("uuid2")).map(|info| info.id.as_str()),
            Some("uuid2")
        );
        assert_eq!(data.link_count(), 3);
        assert!(data.verify_consistency(None).is_ok());
    }

    // Test IDs: TDATA-002
    #[test]
    fn from_input_rejects_unknown_paths_and_ids() {
        let unknown_path = AttributionData::from_input(
            input(&[("uuid1", "React")], &[("/missing", &["uuid1"])]),
            &fixture_index(),
            None,
        );
        assert_eq!(unknown_path, Err(KernelError::InvalidResource("/missing".to_string())));

        let unknown_id = AttributionData::from_input(
            input(&[("uuid1", "React")], &[("/solo", &["uuid9"])]),
            &fixture_index(),
            None,
        );
        assert!(matches!(unknown_id, Err(KernelError::Validation(_))));

        let mut mismatched = input(&[("uuid1", "React")], &[("/solo", &["uuid1"])]);
        if let Some(info) = mismatched.attributions.get_mut(&AttributionId::from("uuid1")) {
            info.id = AttributionId::from("other");
        }
        let mismatched = AttributionData::from_input(mismatched, &fixture_index(), None);
        assert!(matches!(mismatched, Err(KernelError::Validation(_))));
    }

    // Test IDs: TDATA-003
    #[test]
    fn from_input_drops_unlinked_records_and_empty_lists() {
        let data = load(input(
            &[("uuid1", "React"), ("uuid2", "unused")],
            &[("/solo", &["uuid1"]), ("/parent/", &[])],
        ));

        assert!(!data.contains_attribution(&AttributionId::from("uuid2")));
        assert!(!data.resources_to_attributions().contains_key("/parent/"));
        assert!(data.verify_consistency(None).is_ok());
    }

    // Test IDs: TDATA-004
    #[test]
    fn closest_parent_stops_at_breakpoints() {
        let data = load(input(&[("uuid1", "React")], &[("/parent/", &["uuid1"])]));

        let closest = data.closest_parent_attribution_ids("/parent/other/leaf", &BTreeSet::new());
        assert_eq!(closest.map(|(path, _)| path), Some("/parent/"));

        let breakpoints = BTreeSet::from(["/parent/other/".to_string()]);
        assert!(data.closest_parent_attribution_ids("/parent/other/leaf", &breakpoints).is_none());
        assert!(data.closest_parent_attribution_ids("/parent/", &BTreeSet::new()).is_none());
    }

    // Test IDs: TDATA-005
    #[test]
    fn contained_attribution_ids_cover_the_subtree() {
        let data = load(input(
            &[("uuid1", "React"), ("uuid2", "Vue"), ("uuid3", "Solo")],
            &[("/parent/", &["uuid1"]), ("/parent/other/leaf", &["uuid2"]), ("/solo", &["uuid3"])],
        ));

        let contained = data.contained_attribution_ids("/parent/");
        assert_eq!(
            contained,
            BTreeSet::from([AttributionId::from("uuid1"), AttributionId::from("uuid2")])
        );
        assert_eq!(data.contained_attribution_ids("/").len(), 3);
    }

    // Test IDs: TDATA-006
    #[test]
    fn verify_consistency_reports_stale_coverage() {
        let mut data = load(input(&[("uuid1", "React")], &[("/solo", &["uuid1"])]));
        data.resources_with_attributed_children = AttributedChildren::default();

        let result = data.verify_consistency(None);
        assert!(matches!(result, Err(KernelError::Consistency(ref message)) if message.contains("index")));
    }
}
