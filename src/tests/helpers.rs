//! Shared test utilities for graph, commit and sync tests

use crate::{
    config::EngineConfig,
    context::VersionContext,
    graph::GraphStore,
    properties::{Artifact, GraphSnapshot, ProjectVersion, TraceLink},
};

/// Initialize logging for tests
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// A requirement-typed artifact whose name is derived from its id.
pub fn artifact(id: &str, parents: &[&str]) -> Artifact {
    typed(id, "requirement", parents)
}

pub fn typed(id: &str, artifact_type: &str, parents: &[&str]) -> Artifact {
    Artifact::new(id, format!("{id}-name"), artifact_type).with_parents(parents.iter().copied())
}

pub fn trace(id: &str, source: &str, target: &str) -> TraceLink {
    TraceLink::manual(id, source, target)
}

pub fn store_with(artifacts: Vec<Artifact>, traces: Vec<TraceLink>) -> GraphStore {
    init_logging();
    GraphStore::from_snapshot(GraphSnapshot::new(artifacts, traces))
        .expect("test snapshot should be valid")
}

/// A -> B -> C (C's parent is B, B's parent is A), with a trace C -> A.
pub fn chain_store() -> GraphStore {
    store_with(
        vec![
            artifact("A", &[]),
            artifact("B", &["A"]),
            artifact("C", &["B"]),
        ],
        vec![trace("t-ca", "C", "A")],
    )
}

pub fn version() -> ProjectVersion {
    ProjectVersion::new("project", "v1", 1, 0, 0)
}

pub fn context_with(snapshot: GraphSnapshot, config: EngineConfig) -> VersionContext {
    init_logging();
    VersionContext::load(version(), snapshot, config).expect("test snapshot should load")
}

/// The [`chain_store`] graph loaded as version `v1` with default configuration.
pub fn chain_context() -> VersionContext {
    context_with(chain_store().snapshot(), EngineConfig::default())
}
