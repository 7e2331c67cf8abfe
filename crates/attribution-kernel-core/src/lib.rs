//! Attribution engine: links attribution records to resources of a file tree,
//! keeps both link directions and the ancestor-coverage index consistent, and
//! prunes links that merely repeat what a parent directory already states.

mod coverage;
mod data;
mod inference;
mod model;
mod operations;
mod preference;
mod resource;
mod state;

pub use coverage::{counts_as_attributed, AttributedChildren};
pub use data::AttributionData;
pub use inference::{is_redundant_with_closest_parent, run_inference_step};
pub use model::{
    AttributionId, Attributions, AttributionsToResources, Criticality, ExternalAttributionSource,
    FrequentLicense, InputAttributions, OutputPayload, PackageInfo, ParsedFileContent,
    ResourcesToAttributions, Source,
};
pub use operations::{
    create_attribution, delete_attribution, link_attribution, replace_attribution,
    resolve_external_attributions, unlink_attribution, unresolve_external_attributions,
    update_attribution, EngineContext,
};
pub use preference::{
    calculate_preferred_over_origin_ids, derive_modified_preferred_state,
    recalculate_preferences_of_parents, PreferredState,
};
pub use resource::{
    ancestors, is_directory_path, parent_of, parents_of, path_depth, paths_of, tree_from_paths,
    Ancestors, ResourceIndex, ResourceNode, Resources, ROOT_PATH,
};
pub use state::{AttributionState, ResourceView};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum KernelError {
    #[error("invalid resource: {0}")]
    InvalidResource(String),
    #[error("unknown attribution id: {0}")]
    UnknownAttributionId(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("consistency error: {0}")]
    Consistency(String),
}
