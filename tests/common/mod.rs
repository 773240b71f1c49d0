//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use tracegraph_core::properties::{Artifact, GraphSnapshot, ProjectVersion, TraceLink};

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times; subsequent calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

#[allow(dead_code)]
pub fn version() -> ProjectVersion {
    ProjectVersion::new("safety-case", "v1", 1, 0, 0)
}

/// A small safety case:
///
/// ```text
/// REQ-1 ── DES-1 ── TST-1
///       └─ DES-2
/// HAZ-1 (root)
/// ```
///
/// with trace links DES-1 -> REQ-1, DES-2 -> REQ-1, TST-1 -> DES-1 and HAZ-1 -> REQ-1.
#[allow(dead_code)]
pub fn sample_snapshot() -> GraphSnapshot {
    GraphSnapshot::new(
        vec![
            Artifact::new("req-1", "REQ-1", "requirement").with_body("The brake shall engage."),
            Artifact::new("des-1", "DES-1", "design").with_parents(["req-1"]),
            Artifact::new("des-2", "DES-2", "design").with_parents(["req-1"]),
            Artifact::new("tst-1", "TST-1", "test").with_parents(["des-1"]),
            Artifact::new("haz-1", "HAZ-1", "hazard").with_attribute("severity", "S3"),
        ],
        vec![
            TraceLink::manual("t-1", "des-1", "req-1"),
            TraceLink::manual("t-2", "des-2", "req-1"),
            TraceLink::manual("t-3", "tst-1", "des-1"),
            TraceLink::manual("t-4", "haz-1", "req-1"),
        ],
    )
}
