//! Tests for SyncReconciler: queueing and last-write-wins merging

use super::helpers::*;
use crate::{
    commit::EntityOperation,
    config::{EngineConfig, SyncConfig},
    context::VersionContext,
    error::ErrorKind,
    event::{ChangeMessage, Event},
    properties::{Entity, EntityId, GraphSnapshot, VersionId},
    sync::SyncReconciler,
};
use test_log::test;
use tokio::sync::mpsc::unbounded_channel;

fn message(ids: &[&str]) -> ChangeMessage {
    ChangeMessage::new("v1", ids.iter().copied())
}

#[test]
fn test_remote_update_without_local_edit() {
    let mut ctx = chain_context();
    let reconciler = SyncReconciler::default();
    let fetched = GraphSnapshot::new(vec![artifact("A", &[]).with_body("remote")], vec![]);

    let report = reconciler
        .reconcile(&mut ctx, &message(&["A"]), &fetched)
        .unwrap();
    assert!(!report.is_noop());
    assert!(report.conflicts.is_empty());
    assert_eq!(ctx.get_artifact("A").unwrap().body, "remote");
    assert_eq!(ctx.engine().remote_log().len(), 1);
    assert!(!ctx.engine().has_unsynced(), "remote state is not queued for upload");
}

/// Remote wins, the loser is reported, and the local history forgets the entity.
#[test]
fn test_conflict_with_pending_edit() {
    let (tx, mut rx) = unbounded_channel();
    let mut ctx = chain_context().with_events(tx);
    let history = ctx
        .commit(vec![EntityOperation::UpdateArtifact(
            artifact("B", &["A"]).with_body("local"),
        )])
        .unwrap();
    let remote_b = artifact("B", &["A"]).with_body("remote");

    let report = SyncReconciler::default()
        .reconcile(
            &mut ctx,
            &message(&["B"]),
            &GraphSnapshot::new(vec![remote_b.clone()], vec![]),
        )
        .unwrap();

    assert_eq!(report.conflicts.len(), 1);
    let conflict = &report.conflicts[0];
    assert_eq!(conflict.entity_id, EntityId::Artifact("B".into()));
    assert_eq!(
        conflict.local,
        Some(Entity::Artifact(artifact("B", &["A"]).with_body("local")))
    );
    assert_eq!(conflict.remote, Some(Entity::Artifact(remote_b)));
    assert_eq!(conflict.pending_commit.as_ref(), Some(&history.commit.id));
    assert_eq!(report.invalidated_commits, vec![history.commit.id.clone()]);

    assert_eq!(ctx.get_artifact("B").unwrap().body, "remote");
    assert!(!ctx.engine().can_undo());
    assert!(!ctx.engine().has_unsynced());
    assert_eq!(ctx.engine().remote_log()[0].conflicts, report.conflicts);

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(events.contains(&Event::Conflict(conflict.clone())));
}

#[test]
fn test_unrelated_pending_edits_survive() {
    let mut ctx = chain_context();
    ctx.commit(vec![EntityOperation::UpdateArtifact(
        artifact("C", &["B"]).with_body("mine"),
    )])
    .unwrap();
    let report = SyncReconciler::default()
        .reconcile(
            &mut ctx,
            &message(&["A"]),
            &GraphSnapshot::new(vec![artifact("A", &[]).with_body("theirs")], vec![]),
        )
        .unwrap();
    assert!(report.conflicts.is_empty());
    assert!(report.invalidated_commits.is_empty());
    assert!(ctx.engine().can_undo());
    assert!(ctx.engine().has_unsynced());

    ctx.undo().unwrap();
    assert_eq!(ctx.get_artifact("C").unwrap().body, "");
    assert_eq!(ctx.get_artifact("A").unwrap().body, "theirs");
}

#[test]
fn test_remote_artifact_deletion_cascades_to_trace_links() {
    let mut ctx = chain_context();
    let report = SyncReconciler::default()
        .reconcile(&mut ctx, &message(&["C"]), &GraphSnapshot::default())
        .unwrap();
    assert!(ctx.get_artifact("C").is_none());
    assert!(ctx.store().get_trace_link("t-ca").is_none());
    let ops = &report.commit.unwrap().operations;
    assert_eq!(ops.len(), 2);
    assert!(matches!(ops[0], EntityOperation::DeleteTraceLink(_)));
    assert_eq!(ctx.subtree("A").unwrap().subtree.len(), 1);
}

#[test]
fn test_remote_creation_of_linked_entities() {
    let mut ctx = chain_context();
    let fetched = GraphSnapshot::new(
        vec![artifact("D", &["A"])],
        vec![trace("t-da", "D", "A")],
    );
    let report = SyncReconciler::default()
        .reconcile(&mut ctx, &message(&["t-da", "D"]), &fetched)
        .unwrap();
    assert!(report.missing_artifacts.is_empty());
    assert_eq!(ctx.store().trace_links_for("D").len(), 1);
    assert!(ctx.subtree("A").unwrap().children.contains("D"));
}

#[test]
fn test_dangling_remote_trace_is_reported() {
    let mut ctx = chain_context();
    let before = ctx.snapshot();
    let fetched = GraphSnapshot::new(vec![], vec![trace("t-ghost", "A", "ghost")]);
    let err = SyncReconciler::default()
        .reconcile(&mut ctx, &message(&["t-ghost"]), &fetched)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DanglingTraceReference);
    assert_eq!(ctx.snapshot(), before);
}

#[test]
fn test_identical_fetch_is_noop() {
    let mut ctx = chain_context();
    let generation = ctx.generation();
    let fetched = GraphSnapshot::new(vec![artifact("A", &[])], vec![trace("t-ca", "C", "A")]);
    let report = SyncReconciler::default()
        .reconcile(&mut ctx, &message(&["A", "t-ca"]), &fetched)
        .unwrap();
    assert!(report.is_noop());
    assert_eq!(ctx.generation(), generation);
    assert!(ctx.engine().remote_log().is_empty());
}

#[test]
fn test_foreign_version_messages_are_dropped() {
    let mut reconciler = SyncReconciler::default();
    let loaded = VersionId::from("v1");
    assert!(!reconciler.enqueue(ChangeMessage::new("v2", ["A"]), &loaded));
    assert!(reconciler.is_empty());

    let mut ctx = chain_context();
    let report = reconciler
        .reconcile(
            &mut ctx,
            &ChangeMessage::new("v2", ["A"]),
            &GraphSnapshot::default(),
        )
        .unwrap();
    assert!(report.is_noop());
    assert!(ctx.get_artifact("A").is_some());
}

#[test]
fn test_queue_order_and_overflow() {
    let mut reconciler = SyncReconciler::new(SyncConfig {
        queue_capacity: 2,
        ..SyncConfig::default()
    });
    let loaded = VersionId::from("v1");
    for id in ["1", "2", "3"] {
        assert!(reconciler.enqueue(message(&[id]), &loaded));
    }
    assert_eq!(reconciler.len(), 2);
    assert!(reconciler.needs_resync());

    let next = reconciler.next_message().unwrap();
    assert_eq!(next.changed_entity_ids, vec!["2".to_string()]);
    reconciler.requeue(next.clone());
    assert_eq!(reconciler.next_message(), Some(next));

    assert!(reconciler.take_resync());
    assert!(reconciler.is_empty());
    assert!(!reconciler.take_resync());
}

#[test]
fn test_snapshot_overwrites_unsynced_creation() {
    let mut ctx = context_with(chain_store().snapshot(), EngineConfig::default());
    let authoritative = ctx.snapshot();
    let history = ctx
        .commit(vec![EntityOperation::CreateArtifact(artifact("D", &["C"]))])
        .unwrap();

    let report = SyncReconciler::default()
        .reconcile_snapshot(&mut ctx, &authoritative)
        .unwrap();
    assert_eq!(ctx.snapshot(), authoritative);
    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].remote, None);
    assert_eq!(
        report.conflicts[0].pending_commit.as_ref(),
        Some(&history.commit.id)
    );
    assert!(!ctx.engine().has_unsynced());

    let again = SyncReconciler::default()
        .reconcile_snapshot(&mut ctx, &authoritative)
        .unwrap();
    assert!(again.is_noop());
}

#[test]
fn test_reconcile_stays_on_loaded_version() {
    let mut ctx = VersionContext::load(
        version(),
        chain_store().snapshot(),
        EngineConfig::default(),
    )
    .unwrap();
    let fetched = GraphSnapshot::new(vec![artifact("B", &["A"]).with_body("x")], vec![]);
    SyncReconciler::default()
        .reconcile(&mut ctx, &message(&["B"]), &fetched)
        .unwrap();
    assert_eq!(ctx.version_id().as_str(), "v1");
    assert_eq!(ctx.engine().version_id().as_str(), "v1");
}

/// A revert that a remote change made unappliable leaves history, and older entries stay
/// reachable.
#[test]
fn test_failed_undo_drops_entry() {
    let (tx, mut rx) = unbounded_channel();
    let mut ctx = chain_context().with_events(tx);
    let create = ctx
        .commit(vec![EntityOperation::CreateArtifact(artifact("D", &[]))])
        .unwrap();
    let mut renamed = artifact("A", &[]);
    renamed.name = "M".to_string();
    let rename = ctx
        .commit(vec![EntityOperation::UpdateArtifact(renamed)])
        .unwrap();
    assert!(ctx.mark_synced(&create.commit.id));
    assert!(ctx.mark_synced(&rename.commit.id));

    let mut remote_b = artifact("B", &["A"]);
    remote_b.name = "A-name".to_string();
    let report = SyncReconciler::default()
        .reconcile(
            &mut ctx,
            &message(&["B"]),
            &GraphSnapshot::new(vec![remote_b], vec![]),
        )
        .unwrap();
    assert!(report.conflicts.is_empty());
    assert_eq!(ctx.get_artifact("B").unwrap().name, "A-name");

    let err = ctx.undo().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateName);
    assert_eq!(ctx.get_artifact("A").unwrap().name, "M");

    ctx.undo().unwrap().expect("older entry is reachable");
    assert!(ctx.get_artifact("D").is_none());
    assert!(!ctx.engine().can_undo());

    ctx.redo().unwrap().expect("the create commit is redoable");
    assert!(ctx.get_artifact("D").is_some());
    assert!(!ctx.engine().can_redo(), "the dropped rename is not redoable");

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(events.contains(&Event::HistoryDropped(vec![rename.commit.id.clone()])));
}
