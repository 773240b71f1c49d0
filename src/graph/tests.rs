//! Tests for GraphStore and SubtreeIndex functionality

use super::*;
use crate::{
    commit::EntityOperation,
    config::RebuildStrategy,
    error::{ErrorKind, TraceGraphError},
    properties::{Artifact, ArtifactId, EntityId, GraphSnapshot},
    tests::helpers::{artifact, chain_store, store_with, trace, typed},
};
use std::collections::BTreeSet;
use test_log::test;

fn ids(list: &[&str]) -> BTreeSet<ArtifactId> {
    list.iter().map(|id| ArtifactId::from(*id)).collect()
}

#[test]
fn test_subtree_of_simple_chain() {
    let store = chain_store();
    let report = rebuild(&HierarchyEdges::from_store(&store));
    assert!(report.warnings.is_empty());

    let a = &report.map["A"];
    let b = &report.map["B"];
    let c = &report.map["C"];
    assert_eq!(a.subtree, ids(&["B", "C"]));
    assert_eq!(a.children, ids(&["B"]));
    assert!(a.supertree.is_empty());
    assert_eq!(c.supertree, ids(&["A", "B"]));
    assert_eq!(c.parents, ids(&["B"]));
    assert_eq!(b.neighbors, ids(&["A", "C"]));
}

/// Multiple parents form a DAG: the shared descendant belongs to both subtrees but is only
/// counted once when querying both parents together.
#[test]
fn test_shared_descendant_is_deduplicated() {
    let store = store_with(
        vec![
            typed("A", "requirement", &[]),
            typed("B", "requirement", &[]),
            typed("C", "design", &["A", "B"]),
            typed("D", "hazard", &["C"]),
        ],
        vec![],
    );
    let mut index = SubtreeIndex::default();

    assert_eq!(index.get(&store, "A").unwrap().subtree, ids(&["C", "D"]));
    assert_eq!(index.get(&store, "B").unwrap().subtree, ids(&["C", "D"]));
    assert_eq!(index.get(&store, "D").unwrap().supertree, ids(&["A", "B", "C"]));

    let matched = index.get_matching_children(
        &store,
        &["A".into(), "B".into()],
        &["design".to_string(), "hazard".to_string()],
    );
    assert_eq!(matched, ids(&["C", "D"]));

    let hazards_only =
        index.get_matching_children(&store, &["A".into(), "B".into()], &["hazard".to_string()]);
    assert_eq!(hazards_only, ids(&["D"]));
}

#[test]
fn test_matching_children_with_no_types_is_empty() {
    let store = chain_store();
    let mut index = SubtreeIndex::default();
    let matched = index.get_matching_children(&store, &["A".into()], &[]);
    assert!(matched.is_empty(), "an empty type filter must not match everything");
}

#[test]
fn test_cycle_terminates_and_warns() {
    let store = store_with(
        vec![
            artifact("A", &["B"]),
            artifact("B", &["A"]),
            artifact("C", &["A"]),
        ],
        vec![],
    );
    let report = rebuild(&HierarchyEdges::from_store(&store));

    assert_eq!(
        report.warnings,
        vec![HierarchyWarning::CycleDetected {
            members: vec!["A".into(), "B".into()]
        }]
    );
    assert_eq!(
        report.warnings[0].as_error().map(|e| e.kind()),
        Some(ErrorKind::CycleDetected)
    );
    assert_eq!(report.map["A"].subtree, ids(&["B", "C"]));
    assert_eq!(report.map["B"].subtree, ids(&["A", "C"]));
    assert_eq!(report.map["A"].supertree, ids(&["B"]));
    assert_eq!(report.map["C"].supertree, ids(&["A", "B"]));
}

#[test]
fn test_self_parent_is_a_cycle() {
    let store = store_with(vec![artifact("A", &["A"])], vec![]);
    let report = rebuild(&HierarchyEdges::from_store(&store));
    assert_eq!(report.warnings.len(), 1);
    assert!(report.map["A"].subtree.is_empty());
    assert!(report.map["A"].parents.is_empty());
}

#[test]
fn test_unknown_parent_is_ignored_with_warning() {
    let store = store_with(vec![artifact("A", &["ghost"])], vec![]);
    let report = rebuild(&HierarchyEdges::from_store(&store));
    assert_eq!(
        report.warnings,
        vec![HierarchyWarning::UnknownParent {
            child: "A".into(),
            parent: "ghost".into()
        }]
    );
    assert!(report.map["A"].supertree.is_empty());
}

/// Eager and lazy maintenance must agree with a full rebuild after every mutation.
#[test]
fn test_eager_and_lazy_indices_agree() {
    let mut store = chain_store();
    let mut eager = SubtreeIndex::new(RebuildStrategy::Eager);
    let mut lazy = SubtreeIndex::new(RebuildStrategy::Lazy);
    eager.rebuild_from(&store);
    lazy.rebuild_from(&store);

    store
        .apply_operations(vec![
            EntityOperation::CreateArtifact(artifact("D", &["A", "C"])),
            EntityOperation::UpdateArtifact(artifact("B", &[])),
        ])
        .unwrap();
    eager.invalidate(&store);
    lazy.invalidate(&store);

    assert!(!eager.is_dirty());
    assert!(lazy.is_dirty());
    assert!(lazy.cached().is_none());
    let full = rebuild(&HierarchyEdges::from_store(&store)).map;
    assert_eq!(eager.map(&store), &full);
    assert_eq!(lazy.map(&store), &full);
    assert_eq!(full["A"].subtree, ids(&["D"]));
    assert_eq!(full["D"].supertree, ids(&["A", "B", "C"]));
}

#[test]
fn test_duplicate_name_rejects_whole_batch() {
    let mut store = GraphStore::new();
    let mut clash = artifact("2", &[]);
    clash.name = "1-name".to_string();
    let err = store
        .apply_operations(vec![
            EntityOperation::CreateArtifact(artifact("1", &[])),
            EntityOperation::CreateArtifact(clash),
        ])
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DuplicateName);
    assert_eq!(err.op_index(), Some(1));
    assert_eq!(store.artifact_count(), 0, "no part of the batch may apply");
    assert!(store.get_artifact_by_name("1-name").is_none());
}

#[test]
fn test_duplicate_trace_edge_rejected() {
    let mut store = chain_store();
    let before = store.clone();
    let err = store
        .apply_operations(vec![
            EntityOperation::CreateTraceLink(trace("t-ba", "B", "A")),
            EntityOperation::CreateTraceLink(trace("t-ca-2", "C", "A")),
        ])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateTraceEdge);
    assert_eq!(err.op_index(), Some(1));
    assert_eq!(store, before);
    assert!(store.get_trace_link("t-ba").is_none());
}

/// Uniqueness holds for the state a batch leaves behind, not between its operations.
#[test]
fn test_transient_clashes_within_batch() {
    let mut store = chain_store();
    let mut a = artifact("A", &[]);
    a.name = "B-name".to_string();
    let mut b = artifact("B", &["A"]);
    b.name = "A-name".to_string();
    store
        .apply_operations(vec![
            EntityOperation::UpdateArtifact(a),
            EntityOperation::UpdateArtifact(b),
            EntityOperation::CreateTraceLink(trace("t-ca-2", "C", "A")),
            EntityOperation::DeleteTraceLink("t-ca".into()),
        ])
        .unwrap();
    assert_eq!(store.get_artifact_by_name("A-name").unwrap().id.as_str(), "B");
    assert_eq!(store.get_artifact_by_name("B-name").unwrap().id.as_str(), "A");
    assert_eq!(
        store.trace_between(&"C".into(), &"A".into()).unwrap().id.as_str(),
        "t-ca-2"
    );

    let before = store.clone();
    let mut c = artifact("C", &["B"]);
    c.name = "A-name".to_string();
    let mut a = artifact("A", &[]).with_body("edited");
    a.name = "B-name".to_string();
    let err = store
        .apply_operations(vec![
            EntityOperation::UpdateArtifact(c),
            EntityOperation::UpdateArtifact(a),
        ])
        .unwrap_err();
    match err {
        TraceGraphError::DuplicateName {
            op_index,
            name,
            existing,
        } => {
            assert_eq!(op_index, 0);
            assert_eq!(name, "A-name");
            assert_eq!(existing, "B");
        }
        other => panic!("expected a duplicate name, got {other:?}"),
    }
    assert_eq!(store, before);
    assert_eq!(store.get_artifact_by_name("A-name").unwrap().id.as_str(), "B");
}

#[test]
fn test_self_trace_rejected() {
    let mut store = chain_store();
    let err = store
        .apply_operations(vec![EntityOperation::CreateTraceLink(trace("t", "A", "A"))])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SelfTrace);
}

#[test]
fn test_missing_ids_are_not_found() {
    let mut store = chain_store();
    for op in [
        EntityOperation::UpdateArtifact(artifact("Z", &[])),
        EntityOperation::DeleteArtifact("Z".into()),
        EntityOperation::UpdateTraceLink(trace("nope", "A", "B")),
        EntityOperation::DeleteTraceLink("nope".into()),
    ] {
        let err = store.apply_operations(vec![op]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
    assert_eq!(store.artifact_count(), 3);
}

#[test]
fn test_dangling_trace_detection() {
    let mut store = chain_store();

    let err = store
        .apply_operations(vec![EntityOperation::CreateTraceLink(trace(
            "t-x", "A", "missing",
        ))])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DanglingTraceReference);

    // Deleting C leaves t-ca pointing at nothing.
    let err = store
        .apply_operations(vec![
            EntityOperation::UpdateArtifact(artifact("B", &[]).with_body("edited")),
            EntityOperation::DeleteArtifact("C".into()),
        ])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DanglingTraceReference);
    assert_eq!(err.op_index(), Some(1));
    assert_eq!(store.get_artifact("B").unwrap().body, "");

    // The artifact and its trace may go in either order within one batch.
    let applied = store
        .apply_operations(vec![
            EntityOperation::DeleteArtifact("C".into()),
            EntityOperation::DeleteTraceLink("t-ca".into()),
        ])
        .unwrap();
    assert!(applied.hierarchy_changed);
    assert_eq!(store.artifact_count(), 2);
    assert_eq!(store.trace_count(), 0);
}

#[test]
fn test_deleted_ids_are_retired() {
    let mut store = chain_store();
    store
        .apply_operations(vec![
            EntityOperation::DeleteTraceLink("t-ca".into()),
            EntityOperation::DeleteArtifact("C".into()),
        ])
        .unwrap();
    assert!(store.is_retired(&EntityId::Artifact("C".into())));

    let err = store
        .apply_operations(vec![EntityOperation::CreateArtifact(artifact("C", &[]))])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateId);

    // The name itself is free again.
    let mut renamed = artifact("C2", &[]);
    renamed.name = "C-name".to_string();
    store
        .apply_operations(vec![EntityOperation::CreateArtifact(renamed)])
        .unwrap();
}

/// Applying the revert batch immediately after a batch restores every field, attribute order
/// included.
#[test]
fn test_revert_operations_restore_prior_state() {
    let mut store = store_with(
        vec![
            artifact("A", &[])
                .with_attribute("priority", "high")
                .with_attribute("owner", "qa"),
            artifact("B", &["A"]),
        ],
        vec![trace("t-ba", "B", "A")],
    );
    let before = store.snapshot();

    let mut reordered = store.get_artifact("A").unwrap().clone();
    reordered.attributes = [("owner", "qa"), ("priority", "high")].into_iter().collect();
    let mut relinked = store.get_trace_link("t-ba").unwrap().clone();
    relinked.source_id = "N".into();

    let applied = store
        .apply_operations(vec![
            EntityOperation::UpdateArtifact(reordered),
            EntityOperation::CreateArtifact(artifact("N", &["A"])),
            EntityOperation::UpdateTraceLink(relinked),
            EntityOperation::DeleteArtifact("B".into()),
            EntityOperation::CreateTraceLink(trace("t-an", "A", "N")),
        ])
        .unwrap();
    assert_ne!(store.snapshot(), before);

    store
        .apply_with_mode(applied.revert_operations(), store::ApplyMode::Replay)
        .unwrap();
    assert_eq!(store.snapshot(), before);
    let keys = store
        .get_artifact("A")
        .unwrap()
        .attributes
        .keys()
        .cloned()
        .collect::<Vec<_>>();
    assert_eq!(keys, vec!["priority".to_string(), "owner".to_string()]);
    assert!(store.trace_between(&"B".into(), &"A".into()).is_some());
}

#[test]
fn test_rename_frees_old_name() {
    let mut store = chain_store();
    let mut renamed = store.get_artifact("A").unwrap().clone();
    renamed.name = "Root".to_string();
    store
        .apply_operations(vec![
            EntityOperation::UpdateArtifact(renamed),
            EntityOperation::CreateArtifact({
                let mut a = artifact("A2", &[]);
                a.name = "A-name".to_string();
                a
            }),
        ])
        .unwrap();
    assert_eq!(store.get_artifact_by_name("Root").unwrap().id.as_str(), "A");
    assert_eq!(store.get_artifact_by_name("A-name").unwrap().id.as_str(), "A2");
}

#[test]
fn test_snapshot_round_trip() {
    let store = chain_store();
    let json = serde_json::to_string(&store.snapshot()).unwrap();
    let snapshot: GraphSnapshot = serde_json::from_str(&json).unwrap();
    let reloaded = GraphStore::from_snapshot(snapshot).unwrap();
    assert_eq!(reloaded, store);
    assert_eq!(reloaded.trace_links_for("A").len(), 1);
}

#[test]
fn test_empty_name_is_invalid() {
    let mut store = GraphStore::new();
    let err = store
        .apply_operations(vec![EntityOperation::CreateArtifact(Artifact::new(
            "x", "", "requirement",
        ))])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    assert!(store.is_empty());
}
