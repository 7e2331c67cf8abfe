use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::resource::Resources;

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct AttributionId(String);

impl AttributionId {
    /// Fresh, globally unique id for a newly created attribution.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for AttributionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AttributionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for AttributionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Criticality {
    #[default]
    None,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub name: String,
    pub document_confidence: f64,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_default_criticality(value: &Criticality) -> bool {
    *value == Criticality::None
}

/// One attribution record, manual or external.
///
/// The `id` mirrors the key the record is stored under; it is the only field
/// ignored by [`PackageInfo::same_content`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PackageInfo {
    #[serde(default, skip_serializing_if = "AttributionId::is_empty")]
    pub id: AttributionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copyright: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribution_confidence: Option<u8>,
    #[serde(default, skip_serializing_if = "is_default_criticality")]
    pub criticality: Criticality,
    #[serde(default, skip_serializing_if = "is_false")]
    pub follow_up: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub exclude_from_notice: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub first_party: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub needs_review: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub pre_selected: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub preferred: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preferred_over_origin_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub was_preferred: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub modified_preferred: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub origin_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
}

impl PackageInfo {
    /// Structural equality with the `id` field ignored.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        Self { id: other.id.clone(), ..self.clone() } == *other
    }

    #[must_use]
    pub fn shares_origin_with(&self, other: &Self) -> bool {
        self.origin_ids.iter().any(|origin_id| other.origin_ids.contains(origin_id))
    }
}

/// Registered producer of external signals.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalAttributionSource {
    pub name: String,
    pub priority: i32,
    #[serde(default)]
    pub is_relevant_for_preferred: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FrequentLicense {
    pub short_name: String,
    pub full_name: String,
    #[serde(default)]
    pub default_text: String,
}

pub type Attributions = BTreeMap<AttributionId, PackageInfo>;
pub type ResourcesToAttributions = BTreeMap<String, Vec<AttributionId>>;
pub type AttributionsToResources = BTreeMap<AttributionId, Vec<String>>;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InputAttributions {
    #[serde(default)]
    pub attributions: Attributions,
    #[serde(default)]
    pub resources_to_attributions: ResourcesToAttributions,
}

/// Everything the loader hands over for one opened file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParsedFileContent {
    pub resources: Resources,
    #[serde(default)]
    pub manual_attributions: InputAttributions,
    #[serde(default)]
    pub external_attributions: InputAttributions,
    #[serde(default)]
    pub frequent_licenses: Vec<FrequentLicense>,
    #[serde(default)]
    pub resolved_external_attributions: BTreeSet<AttributionId>,
    #[serde(default)]
    pub attribution_breakpoints: BTreeSet<String>,
    #[serde(default)]
    pub files_with_children: BTreeSet<String>,
    #[serde(default)]
    pub base_urls_for_sources: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub external_attribution_sources: BTreeMap<String, ExternalAttributionSource>,
}

/// What the save collaborator persists.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutputPayload {
    pub manual_attributions: Attributions,
    pub resources_to_attributions: ResourcesToAttributions,
    pub resolved_external_attributions: BTreeSet<AttributionId>,
}
