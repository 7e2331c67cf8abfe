use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use attribution_kernel_api::{ApiOptions, AttributionKernelApi, Command as ApiCommand};
use attribution_kernel_core::KernelError;
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "ak")]
#[command(about = "Attribution Kernel CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print counts and the snapshot digest of an input file.
    Summary(InputArgs),
    /// Load an input file and verify every index invariant.
    Check(InputArgs),
    /// Apply a JSON command script and emit the save payload.
    Apply(ApplyArgs),
    /// Show what is attributed to one resource.
    Resource(ResourceArgs),
}

#[derive(Debug, Args)]
struct InputArgs {
    #[arg(long)]
    input: PathBuf,
}

#[derive(Debug, Args)]
struct ApplyArgs {
    #[arg(long)]
    input: PathBuf,
    #[arg(long)]
    commands: PathBuf,
    #[arg(long)]
    output: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    verify: bool,
}

#[derive(Debug, Args)]
struct ResourceArgs {
    #[arg(long)]
    input: PathBuf,
    #[arg(long)]
    path: String,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Summary(args) => run_summary(&args),
        Command::Check(args) => run_check(&args),
        Command::Apply(args) => run_apply(&args),
        Command::Resource(args) => run_resource(&args),
    }
}

fn run_summary(args: &InputArgs) -> Result<()> {
    let api = AttributionKernelApi::load_file(&args.input, ApiOptions::default())?;
    let summary = api.summary()?;
    emit_json(serde_json::to_value(&summary).context("failed to serialize summary")?)
}

fn run_check(args: &InputArgs) -> Result<()> {
    let api = AttributionKernelApi::load_file(&args.input, ApiOptions::default())?;
    match api.verify() {
        Ok(()) => emit_json(serde_json::json!({
            "consistent": true,
            "input": args.input.display().to_string(),
        })),
        Err(err) => {
            let violation = err.downcast_ref::<KernelError>().map(ToString::to_string);
            emit_json(serde_json::json!({
                "consistent": false,
                "input": args.input.display().to_string(),
                "violation": violation.unwrap_or_else(|| format!("{err:#}")),
            }))?;
            Err(err.context(format!("{} failed the consistency check", args.input.display())))
        }
    }
}

fn read_commands(path: &Path) -> Result<Vec<ApiCommand>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read command script {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse command script {}", path.display()))
}

fn run_apply(args: &ApplyArgs) -> Result<()> {
    let options = ApiOptions { verify_invariants: args.verify };
    let mut api = AttributionKernelApi::load_file(&args.input, options)?;
    let commands = read_commands(&args.commands)?;
    tracing::debug!(commands = commands.len(), script = %args.commands.display(), "read command script");
    let outcomes = api.apply_script(commands)?;

    match &args.output {
        Some(output) => {
            api.save_file(output)?;
            let summary = api.summary()?;
            emit_json(serde_json::json!({
                "output": output.display().to_string(),
                "outcomes": outcomes,
                "summary": summary,
            }))
        }
        None => emit_json(serde_json::json!({
            "outcomes": outcomes,
            "output_file": api.output_file(),
        })),
    }
}

fn run_resource(args: &ResourceArgs) -> Result<()> {
    let api = AttributionKernelApi::load_file(&args.input, ApiOptions::default())?;
    let view = api.resource_view(&args.path)?;
    emit_json(serde_json::to_value(&view).context("failed to serialize resource view")?)
}
