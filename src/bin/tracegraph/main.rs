//! tracegraph CLI tool
//!
//! Command-line interface for inspecting version snapshots with tracegraph-core. A snapshot is a
//! JSON file of the shape `{"artifacts": [...], "traceLinks": [...]}`.
//!
//! ## Commands
//!
//! - `check <snapshot>`: Validate a snapshot and report hierarchy warnings
//! - `subtree <snapshot> <id>`: Print the subtree index entry of one artifact
//! - `diff <base> <target>`: Compare two snapshots

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracegraph_core::{
    config::EngineConfig,
    context::VersionContext,
    delta::diff_snapshots,
    properties::{GraphSnapshot, ProjectVersion},
};

#[derive(Parser)]
#[command(name = "tracegraph")]
#[command(author, version, about = "Inspect and compare traceability graph snapshots", long_about = None)]
struct Cli {
    /// Engine configuration file (default: built-in settings)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a snapshot and report hierarchy warnings
    Check {
        /// Path to the snapshot JSON file
        snapshot: PathBuf,
    },

    /// Print the parents, children, subtree, supertree and neighbors of an artifact
    Subtree {
        /// Path to the snapshot JSON file
        snapshot: PathBuf,

        /// Artifact id
        id: String,

        /// Only list subtree members of these artifact types
        #[arg(long, value_delimiter = ',')]
        types: Vec<String>,
    },

    /// Compare two snapshots: added, removed and modified entities
    Diff {
        /// The snapshot compared from
        base: PathBuf,

        /// The snapshot compared to
        target: PathBuf,

        /// Print the full delta as JSON
        #[arg(long)]
        json: bool,

        /// Also print the operations that turn base into target
        #[arg(long)]
        operations: bool,
    },
}

fn read_snapshot(path: &Path) -> Result<GraphSnapshot, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn load(
    path: &Path,
    config: EngineConfig,
) -> Result<VersionContext, Box<dyn std::error::Error>> {
    let snapshot = read_snapshot(path)?;
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "snapshot".to_string());
    let version = ProjectVersion::new("local", name, 0, 0, 0);
    Ok(VersionContext::load(version, snapshot, config)?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match cli.config.as_ref() {
        Some(path) => EngineConfig::from_path(path)?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Check { snapshot } => {
            let mut ctx = match load(&snapshot, config) {
                Ok(ctx) => ctx,
                Err(e) => {
                    eprintln!("Error: {}: {e}", snapshot.display());
                    std::process::exit(1);
                }
            };
            println!(
                "{}: {} artifacts, {} trace links",
                snapshot.display(),
                ctx.store().artifact_count(),
                ctx.store().trace_count()
            );
            let warnings = ctx.hierarchy_warnings();
            for warning in warnings.iter() {
                println!("warning: {warning:?}");
            }
            if warnings.is_empty() {
                println!("No hierarchy warnings");
            }
        }

        Commands::Subtree {
            snapshot,
            id,
            types,
        } => {
            let mut ctx = load(&snapshot, config)?;
            if !types.is_empty() {
                let matching = ctx.get_matching_children(&[id.as_str().into()], &types);
                println!("{}", serde_json::to_string_pretty(&matching)?);
                return Ok(());
            }
            match ctx.subtree(&id) {
                Some(item) => println!("{}", serde_json::to_string_pretty(&item)?),
                None => {
                    eprintln!("Error: no artifact '{id}' in {}", snapshot.display());
                    std::process::exit(1);
                }
            }
        }

        Commands::Diff {
            base,
            target,
            json,
            operations,
        } => {
            let delta = diff_snapshots(&read_snapshot(&base)?, &read_snapshot(&target)?);
            if json {
                println!("{}", serde_json::to_string_pretty(&delta)?);
            } else {
                println!(
                    "artifacts: {} added, {} removed, {} modified",
                    delta.artifacts.added.len(),
                    delta.artifacts.removed.len(),
                    delta.artifacts.modified.len()
                );
                println!(
                    "trace links: {} added, {} removed, {} modified",
                    delta.trace_links.added.len(),
                    delta.trace_links.removed.len(),
                    delta.trace_links.modified.len()
                );
                for missing in delta.missing_artifacts.iter() {
                    println!(
                        "warning: trace link {} references missing artifact {} ({:?})",
                        missing.trace_id, missing.artifact_id, missing.side
                    );
                }
            }
            if operations {
                println!("{}", serde_json::to_string_pretty(&delta.to_operations())?);
            }
        }
    }

    Ok(())
}
