use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::model::{AttributionId, ResourcesToAttributions};
use crate::resource::ancestors;

/// Ancestor-coverage index: for every resource, the attributed resources in
/// its subtree (itself included when it is attributed directly).
///
/// Paths are interned into integer indices once so that membership updates
/// along an ancestor chain never compare strings.
#[derive(Debug, Clone, Default)]
pub struct AttributedChildren {
    paths: Vec<String>,
    paths_to_indices: HashMap<String, usize>,
    attributed_children: HashMap<usize, BTreeSet<usize>>,
}

/// Whether a link list counts as attributed once `excluded` ids are ignored.
#[must_use]
pub fn counts_as_attributed(
    ids: &[AttributionId],
    excluded: Option<&BTreeSet<AttributionId>>,
) -> bool {
    ids.iter().any(|id| !excluded.is_some_and(|excluded| excluded.contains(id)))
}

impl AttributedChildren {
    #[must_use]
    pub fn build(
        resources_to_attributions: &ResourcesToAttributions,
        excluded: Option<&BTreeSet<AttributionId>>,
    ) -> Self {
        let mut index = Self::default();
        for (path, ids) in resources_to_attributions {
            if counts_as_attributed(ids, excluded) {
                index.add_attributed_path(path);
            }
        }
        index
    }

    fn intern(&mut self, path: &str) -> usize {
        if let Some(index) = self.paths_to_indices.get(path) {
            return *index;
        }
        let index = self.paths.len();
        self.paths.push(path.to_string());
        self.paths_to_indices.insert(path.to_string(), index);
        index
    }

    #[must_use]
    pub fn index_of(&self, path: &str) -> Option<usize> {
        self.paths_to_indices.get(path).copied()
    }

    #[must_use]
    pub fn path_at(&self, index: usize) -> Option<&str> {
        self.paths.get(index).map(String::as_str)
    }

    pub fn add_attributed_path(&mut self, path: &str) {
        let child = self.intern(path);
        self.attributed_children.entry(child).or_default().insert(child);
        for parent in ancestors(path) {
            let parent_index = self.intern(parent);
            self.attributed_children.entry(parent_index).or_default().insert(child);
        }
    }

    pub fn remove_attributed_path(&mut self, path: &str) {
        let Some(child) = self.index_of(path) else {
            return;
        };
        for holder in std::iter::once(path).chain(ancestors(path)) {
            let Some(holder_index) = self.index_of(holder) else {
                continue;
            };
            if let Some(children) = self.attributed_children.get_mut(&holder_index) {
                children.remove(&child);
                if children.is_empty() {
                    self.attributed_children.remove(&holder_index);
                }
            }
        }
    }

    /// Adds or removes `path` depending on its current link list.
    pub fn refresh_path(
        &mut self,
        path: &str,
        ids: Option<&[AttributionId]>,
        excluded: Option<&BTreeSet<AttributionId>>,
    ) {
        if ids.is_some_and(|ids| counts_as_attributed(ids, excluded)) {
            self.add_attributed_path(path);
        } else {
            self.remove_attributed_path(path);
        }
    }

    fn entry_of(&self, path: &str) -> Option<(usize, &BTreeSet<usize>)> {
        let index = self.index_of(path)?;
        self.attributed_children.get(&index).map(|children| (index, children))
    }

    #[must_use]
    pub fn is_attributed(&self, path: &str) -> bool {
        self.entry_of(path).is_some_and(|(index, children)| children.contains(&index))
    }

    #[must_use]
    pub fn has_attributed_children(&self, path: &str) -> bool {
        self.entry_of(path)
            .is_some_and(|(index, children)| children.iter().any(|child| *child != index))
    }

    #[must_use]
    pub fn subtree_has_attributions(&self, path: &str) -> bool {
        self.entry_of(path).is_some()
    }

    /// Attributed strict descendants of `path`, sorted by path.
    #[must_use]
    pub fn attributed_children_of(&self, path: &str) -> Vec<&str> {
        let Some((index, children)) = self.entry_of(path) else {
            return Vec::new();
        };
        let mut paths = children
            .iter()
            .filter(|child| **child != index)
            .filter_map(|child| self.path_at(*child))
            .collect::<Vec<_>>();
        paths.sort_unstable();
        paths
    }

    /// Path-keyed view of the index, independent of index assignment order.
    #[must_use]
    pub fn to_path_sets(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.attributed_children
            .iter()
            .filter_map(|(holder, children)| {
                let holder = self.path_at(*holder)?;
                let children = children
                    .iter()
                    .filter_map(|child| self.path_at(*child).map(str::to_string))
                    .collect::<BTreeSet<_>>();
                Some((holder.to_string(), children))
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.attributed_children.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributed_children.is_empty()
    }
}

impl PartialEq for AttributedChildren {
    fn eq(&self, other: &Self) -> bool {
        self.to_path_sets() == other.to_path_sets()
    }
}
