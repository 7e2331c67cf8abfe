use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Formatter};
use std::ops::Bound;

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::KernelError;

pub const ROOT_PATH: &str = "/";

/// Nested resource tree as handed over by the loader.
///
/// In JSON form directories are objects keyed by child name and files are the
/// integer `1`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Resources(BTreeMap<String, ResourceNode>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceNode {
    File,
    Directory(Resources),
}

impl Resources {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_file(&mut self, name: impl Into<String>) {
        self.0.insert(name.into(), ResourceNode::File);
    }

    pub fn insert_directory(&mut self, name: impl Into<String>, children: Resources) {
        self.0.insert(name.into(), ResourceNode::Directory(children));
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ResourceNode> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResourceNode)> {
        self.0.iter().map(|(name, node)| (name.as_str(), node))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, ResourceNode)> for Resources {
    fn from_iter<T: IntoIterator<Item = (String, ResourceNode)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Serialize for ResourceNode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::File => serializer.serialize_u8(1),
            Self::Directory(children) => children.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ResourceNode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct NodeVisitor;

        impl<'de> Visitor<'de> for NodeVisitor {
            type Value = ResourceNode;

            fn expecting(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
                formatter.write_str("the file marker 1 or a directory object")
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                if value == 1 {
                    Ok(ResourceNode::File)
                } else {
                    Err(E::invalid_value(de::Unexpected::Unsigned(value), &self))
                }
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                if value == 1 {
                    Ok(ResourceNode::File)
                } else {
                    Err(E::invalid_value(de::Unexpected::Signed(value), &self))
                }
            }

            fn visit_map<A>(self, map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let children =
                    Resources::deserialize(de::value::MapAccessDeserializer::new(map))?;
                Ok(ResourceNode::Directory(children))
            }
        }

        deserializer.deserialize_any(NodeVisitor)
    }
}

#[must_use]
pub fn is_directory_path(path: &str) -> bool {
    path.ends_with('/')
}

/// Immediate parent directory of `path`, `None` for the root.
#[must_use]
pub fn parent_of(path: &str) -> Option<&str> {
    if path == ROOT_PATH || path.is_empty() {
        return None;
    }
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    trimmed.rfind('/').map(|index| &path[..=index])
}

/// Iterates the ancestors of `path`, nearest first, ending with the root.
#[must_use]
pub fn ancestors(path: &str) -> Ancestors<'_> {
    Ancestors { current: path }
}

#[derive(Debug, Clone)]
pub struct Ancestors<'a> {
    current: &'a str,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let parent = parent_of(self.current)?;
        self.current = parent;
        Some(parent)
    }
}

/// Every ancestor directory of `path`, nearest first, root last.
#[must_use]
pub fn parents_of(path: &str) -> Vec<String> {
    ancestors(path).map(str::to_string).collect()
}

/// Number of segments below the root; the root itself has depth 0.
#[must_use]
pub fn path_depth(path: &str) -> usize {
    ancestors(path).count()
}

/// Flattens a tree into its canonical path universe, root included.
#[must_use]
pub fn paths_of(resources: &Resources) -> BTreeSet<String> {
    let mut paths = BTreeSet::new();
    paths.insert(ROOT_PATH.to_string());
    collect_paths(resources, ROOT_PATH, &mut paths);
    paths
}

fn collect_paths(resources: &Resources, prefix: &str, paths: &mut BTreeSet<String>) {
    for (name, node) in resources.iter() {
        match node {
            ResourceNode::File => {
                paths.insert(format!("{prefix}{name}"));
            }
            ResourceNode::Directory(children) => {
                let path = format!("{prefix}{name}/");
                collect_paths(children, &path, paths);
                paths.insert(path);
            }
        }
    }
}

/// Rebuilds the nested tree from a flat path list.
///
/// # Errors
/// Returns [`KernelError::Validation`] when a path is not absolute, contains an
/// empty segment, or names a file and a directory at the same location.
pub fn tree_from_paths<I, S>(paths: I) -> Result<Resources, KernelError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut resources = Resources::new();
    for path in paths {
        insert_path(&mut resources, path.as_ref())?;
    }
    Ok(resources)
}

fn insert_path(resources: &mut Resources, path: &str) -> Result<(), KernelError> {
    let Some(relative) = path.strip_prefix('/') else {
        return Err(KernelError::Validation(format!("resource path MUST start with '/': {path}")));
    };
    if relative.is_empty() {
        return Ok(());
    }

    let is_directory = is_directory_path(relative);
    let segments = relative.strip_suffix('/').unwrap_or(relative).split('/').collect::<Vec<_>>();
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(KernelError::Validation(format!(
            "resource path MUST NOT contain empty segments: {path}"
        )));
    }
    let Some((last, parents)) = segments.split_last() else {
        return Ok(());
    };

    let conflict =
        || KernelError::Validation(format!("resource path conflicts with an existing file: {path}"));

    let mut current = resources;
    for segment in parents {
        let node = current
            .0
            .entry((*segment).to_string())
            .or_insert_with(|| ResourceNode::Directory(Resources::new()));
        current = match node {
            ResourceNode::Directory(children) => children,
            ResourceNode::File => return Err(conflict()),
        };
    }

    let existing_is_directory =
        current.0.get(*last).map(|node| matches!(node, ResourceNode::Directory(_)));
    match (existing_is_directory, is_directory) {
        (Some(existing), wanted) if existing != wanted => Err(conflict()),
        (Some(_), _) => Ok(()),
        (None, true) => {
            current.insert_directory(*last, Resources::new());
            Ok(())
        }
        (None, false) => {
            current.insert_file(*last);
            Ok(())
        }
    }
}

/// Sorted path universe of the loaded tree.
///
/// Lexicographic order keeps every subtree contiguous right after its
/// directory path, so descendant lookups are range scans.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceIndex {
    paths: BTreeSet<String>,
    files_with_children: BTreeSet<String>,
}

impl ResourceIndex {
    #[must_use]
    pub fn from_resources(resources: &Resources, files_with_children: BTreeSet<String>) -> Self {
        Self { paths: paths_of(resources), files_with_children }
    }

    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    /// # Errors
    /// Returns [`KernelError::InvalidResource`] when `path` is not part of the tree.
    pub fn ensure_known(&self, path: &str) -> Result<(), KernelError> {
        if self.contains(path) {
            Ok(())
        } else {
            Err(KernelError::InvalidResource(path.to_string()))
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    /// Strict descendants of `path` in lexicographic order.
    pub fn descendants_of<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        let is_directory = is_directory_path(path);
        self.paths
            .range::<str, _>((Bound::Excluded(path), Bound::Unbounded))
            .take_while(move |candidate| is_directory && candidate.starts_with(path))
            .map(String::as_str)
    }

    pub fn children_of<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.descendants_of(path).filter(move |candidate| parent_of(candidate) == Some(path))
    }

    #[must_use]
    pub fn is_file_with_children(&self, path: &str) -> bool {
        self.files_with_children.contains(path)
    }

    #[must_use]
    pub fn files_with_children(&self) -> &BTreeSet<String> {
        &self.files_with_children
    }

    /// Rebuilds the nested tree from the path universe.
    ///
    /// # Errors
    /// Returns [`KernelError::Validation`] when a path in the universe is
    /// malformed or collides with a file of the same name.
    pub fn to_tree(&self) -> Result<Resources, KernelError> {
        tree_from_paths(&self.paths)
    }
}
