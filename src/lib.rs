//! # tracegraph-core
//!
//! A versioned artifact graph engine: the client-side model of a collaboratively edited
//! traceability project.
//!
//! ## Overview
//!
//! A project version is a directed graph of **artifacts** (requirements, designs, hazards, ...)
//! connected by **trace links**, with a separate parent/child **hierarchy** given by each
//! artifact's `parent_ids`. tracegraph-core keeps one version in memory, answers hierarchy
//! queries quickly, applies edits as atomic commits with exact undo/redo, compares versions, and
//! merges authoritative changes pushed by other collaborators.
//!
//! ### Key Features
//!
//! - **Atomic batches**: a commit applies completely or not at all, with the offending operation
//!   identified on failure
//! - **Exact inversion**: every commit carries a revert that restores the prior state field for
//!   field, attribute order included
//! - **Subtree index**: parents, children, subtree, supertree and neighbors per artifact, cycle
//!   tolerant
//! - **Deltas**: added/removed/modified classification between any two collections, with dangling
//!   trace link detection
//! - **Last-write-wins sync**: remote changes always apply; overwritten local edits are surfaced
//!   as conflicts
//!
//! ## Architecture
//!
//! - **[`properties`]**: artifacts, trace links, identifiers, versions
//! - **[`graph`]**: the [`GraphStore`](graph::GraphStore) and the
//!   [`SubtreeIndex`](graph::SubtreeIndex)
//! - **[`commit`]**: entity operations, commits, and the undo/redo [`CommitEngine`](commit::CommitEngine)
//! - **[`delta`]**: the [`diff`](delta::diff) between two collections
//! - **[`context`]**: [`VersionContext`](context::VersionContext), the loaded version and its
//!   staleness guard
//! - **[`sync`]**: change-message reconciliation against an
//!   [`AuthoritySource`](sync::AuthoritySource)
//! - **[`event`]**: notifications for the presentation layer
//!
//! ## Quick Start
//!
//! ```rust
//! use tracegraph_core::{
//!     commit::EntityOperation,
//!     config::EngineConfig,
//!     context::VersionContext,
//!     properties::{Artifact, GraphSnapshot, ProjectVersion},
//! };
//!
//! # fn main() -> Result<(), tracegraph_core::TraceGraphError> {
//! let version = ProjectVersion::new("project", "v1", 1, 0, 0);
//! let mut ctx = VersionContext::load(version, GraphSnapshot::default(), EngineConfig::default())?;
//!
//! ctx.commit(vec![
//!     EntityOperation::CreateArtifact(Artifact::new("1", "R1", "requirement")),
//!     EntityOperation::CreateArtifact(Artifact::new("2", "D1", "design").with_parents(["1"])),
//! ])?;
//! assert_eq!(ctx.subtree("1").map(|item| item.subtree.len()), Some(1));
//!
//! ctx.undo()?;
//! assert_eq!(ctx.store().artifact_count(), 0);
//! ctx.redo()?;
//! assert_eq!(ctx.store().artifact_count(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **default**: the engine
//! - **bin**: the `tracegraph` command line tool (`diff`, `subtree`, `check`)

pub mod commit;
pub mod config;
pub mod context;
pub mod delta;
pub mod error;
pub mod event;
pub mod graph;
pub mod properties;
pub mod sync;
#[cfg(test)]
mod tests;

pub use error::*;
