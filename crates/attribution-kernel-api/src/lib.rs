use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use attribution_kernel_core::{
    AttributionId, AttributionState, OutputPayload, PackageInfo, ParsedFileContent, ResourceView,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

pub const API_CONTRACT_VERSION: &str = "api.v1";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiOptions {
    /// Run the full consistency check on both attribution sets after every command.
    pub verify_invariants: bool,
}

/// One user action against the manual attribution set, as read from a command script.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Create {
        resource_path: String,
        package_info: Box<PackageInfo>,
    },
    Update {
        attribution_id: AttributionId,
        package_info: Box<PackageInfo>,
    },
    Delete {
        attribution_id: AttributionId,
    },
    Link {
        resource_path: String,
        attribution_id: AttributionId,
    },
    Unlink {
        resource_path: String,
        attribution_id: AttributionId,
    },
    Replace {
        attribution_id_to_replace_with: AttributionId,
        attribution_id_to_replace: AttributionId,
    },
    Resolve {
        attribution_ids: Vec<AttributionId>,
    },
    Unresolve {
        attribution_ids: Vec<AttributionId>,
    },
}

impl Command {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
            Self::Link { .. } => "link",
            Self::Unlink { .. } => "unlink",
            Self::Replace { .. } => "replace",
            Self::Resolve { .. } => "resolve",
            Self::Unresolve { .. } => "unresolve",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandOutcome {
    pub command: String,
    pub created_attribution_id: Option<AttributionId>,
    pub manual_attributions: usize,
    pub links: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Summary {
    pub resources: usize,
    pub manual_attributions: usize,
    pub external_attributions: usize,
    pub links: usize,
    pub resolved_external_attributions: usize,
    pub attribution_breakpoints: usize,
    pub snapshot_id: String,
    pub has_unsaved_changes: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutputMetadata {
    pub contract_version: String,
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
}

/// Save-file layout: metadata plus the persisted part of the state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutputFile {
    pub metadata: OutputMetadata,
    #[serde(flatten)]
    pub payload: OutputPayload,
}

#[derive(Debug, Clone)]
pub struct AttributionKernelApi {
    state: AttributionState,
    options: ApiOptions,
    source_path: Option<PathBuf>,
    saved_snapshot_id: String,
}

impl AttributionKernelApi {
    /// Build the engine state from already parsed loader output.
    ///
    /// # Errors
    /// Returns an error when the attribution sets do not fit the resource tree.
    pub fn from_parsed(parsed: ParsedFileContent, options: ApiOptions) -> Result<Self> {
        let state = AttributionState::from_parsed(parsed)?;
        if options.verify_invariants {
            state.verify_consistency().context("loaded state is inconsistent")?;
        }
        let saved_snapshot_id = compute_snapshot_id(&state.output_payload())?;
        Ok(Self { state, options, source_path: None, saved_snapshot_id })
    }

    /// Read a JSON input file and build the engine state from it.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read, is not valid input JSON,
    /// or describes attributions that do not fit its resource tree.
    pub fn load_file(path: &Path, options: ApiOptions) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read input file {}", path.display()))?;
        let parsed: ParsedFileContent = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse input file {}", path.display()))?;
        let mut api = Self::from_parsed(parsed, options)
            .with_context(|| format!("failed to load attributions from {}", path.display()))?;
        api.source_path = Some(path.to_path_buf());

        tracing::info!(
            path = %path.display(),
            resources = api.state.resources().len(),
            manual = api.state.manual().attributions().len(),
            external = api.state.external().attributions().len(),
            "loaded input file"
        );
        Ok(api)
    }

    #[must_use]
    pub fn state(&self) -> &AttributionState {
        &self.state
    }

    #[must_use]
    pub fn options(&self) -> ApiOptions {
        self.options
    }

    #[must_use]
    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    /// Apply one command. A failing command leaves the current state untouched.
    ///
    /// # Errors
    /// Returns an error when the engine rejects the command, or when invariant
    /// verification is enabled and the resulting state is inconsistent.
    pub fn apply(&mut self, command: Command) -> Result<CommandOutcome> {
        let name = command.name();
        let mut next = self.state.clone();
        let created_attribution_id = apply_to_state(&mut next, command)?;
        if self.options.verify_invariants {
            next.verify_consistency()
                .with_context(|| format!("{name} left the state inconsistent"))?;
        }
        self.state = next;

        Ok(CommandOutcome {
            command: name.to_string(),
            created_attribution_id,
            manual_attributions: self.state.manual().attributions().len(),
            links: self.state.manual().link_count(),
        })
    }

    /// Apply `commands` in order. Stops at the first failing command; nothing
    /// from the script is kept in that case.
    ///
    /// # Errors
    /// Returns the first command error, tagged with its zero-based index.
    pub fn apply_script(&mut self, commands: Vec<Command>) -> Result<Vec<CommandOutcome>> {
        let mut scratch = self.clone();
        let mut outcomes = Vec::with_capacity(commands.len());
        for (index, command) in commands.into_iter().enumerate() {
            let name = command.name();
            let outcome = scratch
                .apply(command)
                .with_context(|| format!("command #{index} ({name}) failed"))?;
            outcomes.push(outcome);
        }
        *self = scratch;

        tracing::info!(commands = outcomes.len(), "applied command script");
        Ok(outcomes)
    }

    /// Counts and digest of the current state.
    ///
    /// # Errors
    /// Returns an error when the save payload cannot be serialized for hashing.
    pub fn summary(&self) -> Result<Summary> {
        let snapshot_id = compute_snapshot_id(&self.state.output_payload())?;
        Ok(Summary {
            resources: self.state.resources().len(),
            manual_attributions: self.state.manual().attributions().len(),
            external_attributions: self.state.external().attributions().len(),
            links: self.state.manual().link_count(),
            resolved_external_attributions: self.state.resolved_external_attributions().len(),
            attribution_breakpoints: self.state.breakpoints().len(),
            has_unsaved_changes: snapshot_id != self.saved_snapshot_id,
            snapshot_id,
        })
    }

    /// # Errors
    /// Returns an error when `path` is not part of the resource tree.
    pub fn resource_view(&self, path: &str) -> Result<ResourceView> {
        Ok(self.state.resource_view(path)?)
    }

    /// Runs the full consistency check on both attribution sets.
    ///
    /// # Errors
    /// Returns an error naming the first broken invariant.
    pub fn verify(&self) -> Result<()> {
        Ok(self.state.verify_consistency()?)
    }

    #[must_use]
    pub fn output_file(&self) -> OutputFile {
        OutputFile {
            metadata: OutputMetadata {
                contract_version: API_CONTRACT_VERSION.to_string(),
                generated_at: OffsetDateTime::now_utc(),
            },
            payload: self.state.output_payload(),
        }
    }

    /// Write the save payload as pretty JSON and mark the state as saved.
    ///
    /// # Errors
    /// Returns an error when serialization or the file write fails.
    pub fn save_file(&mut self, path: &Path) -> Result<OutputFile> {
        let output = self.output_file();
        let encoded =
            serde_json::to_string_pretty(&output).context("failed to serialize output file")?;
        std::fs::write(path, encoded)
            .with_context(|| format!("failed to write output file {}", path.display()))?;
        self.saved_snapshot_id = compute_snapshot_id(&output.payload)?;

        tracing::info!(
            path = %path.display(),
            manual = output.payload.manual_attributions.len(),
            "saved output file"
        );
        Ok(output)
    }
}

fn apply_to_state(state: &mut AttributionState, command: Command) -> Result<Option<AttributionId>> {
    match command {
        Command::Create { resource_path, package_info } => {
            let id = state.create_attribution(&resource_path, *package_info)?;
            return Ok(Some(id));
        }
        Command::Update { attribution_id, package_info } => {
            state.update_attribution(&attribution_id, *package_info)?;
        }
        Command::Delete { attribution_id } => state.delete_attribution(&attribution_id)?,
        Command::Link { resource_path, attribution_id } => {
            state.link_attribution(&resource_path, &attribution_id)?;
        }
        Command::Unlink { resource_path, attribution_id } => {
            state.unlink_attribution(&resource_path, &attribution_id)?;
        }
        Command::Replace { attribution_id_to_replace_with, attribution_id_to_replace } => {
            state.replace_attribution(&attribution_id_to_replace_with, &attribution_id_to_replace)?;
        }
        Command::Resolve { attribution_ids } => {
            state.resolve_external_attributions(&attribution_ids)?;
        }
        Command::Unresolve { attribution_ids } => {
            state.unresolve_external_attributions(&attribution_ids)?;
        }
    }
    Ok(None)
}

/// Stable digest of the persisted payload; identical content gives the same id
/// across runs.
fn compute_snapshot_id(payload: &OutputPayload) -> Result<String> {
    let encoded = serde_json::to_vec(payload).context("failed to serialize payload for hashing")?;
    let digest = Sha256::digest(&encoded);
    let digest_hex = hex::encode(digest);
    Ok(format!("snap_{}", &digest_hex[..16]))
}
