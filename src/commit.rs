//! Commits, their exact inverses, and the undo/redo history of the loaded version.
//!
//! The [`CommitEngine`] owns nothing but history. Entities live in the
//! [`GraphStore`](crate::graph::GraphStore) handed to each call, and the
//! [`SubtreeIndex`](crate::graph::SubtreeIndex) is told whenever the hierarchy moved.

use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeSet, VecDeque},
    sync::Arc,
};
use time::OffsetDateTime;

use crate::{
    error::TraceGraphError,
    graph::{store::ApplyMode, AppliedResult, GraphStore, SubtreeIndex},
    properties::{Artifact, ArtifactId, CommitId, EntityId, TraceId, TraceLink, VersionId},
    sync::SyncConflict,
};

/// One entity mutation. Every consumer matches all six variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "entity", rename_all = "camelCase")]
pub enum EntityOperation {
    CreateArtifact(Artifact),
    /// Full replacement of the artifact with the same id.
    UpdateArtifact(Artifact),
    DeleteArtifact(ArtifactId),
    CreateTraceLink(TraceLink),
    /// Full replacement of the trace link with the same id.
    UpdateTraceLink(TraceLink),
    DeleteTraceLink(TraceId),
}

impl EntityOperation {
    pub fn entity_id(&self) -> EntityId {
        match self {
            EntityOperation::CreateArtifact(artifact) | EntityOperation::UpdateArtifact(artifact) => {
                EntityId::Artifact(artifact.id.clone())
            }
            EntityOperation::DeleteArtifact(id) => EntityId::Artifact(id.clone()),
            EntityOperation::CreateTraceLink(trace) | EntityOperation::UpdateTraceLink(trace) => {
                EntityId::TraceLink(trace.id.clone())
            }
            EntityOperation::DeleteTraceLink(id) => EntityId::TraceLink(id.clone()),
        }
    }
}

/// An ordered, immutable batch of operations against one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub id: CommitId,
    pub version_id: VersionId,
    /// Milliseconds since the unix epoch. Replaced by the server's value once persisted.
    pub timestamp_ms: i64,
    pub operations: Vec<EntityOperation>,
}

impl Commit {
    pub fn new(version_id: VersionId, operations: Vec<EntityOperation>) -> Commit {
        Commit {
            id: CommitId::generate(),
            version_id,
            timestamp_ms: now_ms(),
            operations,
        }
    }

    pub fn touched_ids(&self) -> BTreeSet<EntityId> {
        self.operations.iter().map(EntityOperation::entity_id).collect()
    }

    pub fn touches(&self, ids: &BTreeSet<EntityId>) -> bool {
        self.operations
            .iter()
            .any(|op| ids.contains(&op.entity_id()))
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// A commit paired with the commit that undoes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitHistory {
    pub commit: Commit,
    pub revert: Commit,
}

impl CommitHistory {
    fn from_applied(version_id: &VersionId, applied: &AppliedResult) -> CommitHistory {
        let commit = Commit::new(version_id.clone(), applied.operations.clone());
        let revert = Commit {
            id: CommitId::generate(),
            version_id: version_id.clone(),
            timestamp_ms: commit.timestamp_ms,
            operations: applied.revert_operations(),
        };
        CommitHistory { commit, revert }
    }

    pub fn touches(&self, ids: &BTreeSet<EntityId>) -> bool {
        self.commit.touches(ids)
    }
}

/// An authoritative change applied outside of the undo history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecord {
    pub commit: Commit,
    pub conflicts: Vec<SyncConflict>,
}

/// Undo/redo discipline for one loaded version.
///
/// The engine is `Clean` while the undo stack is empty and `Dirty` otherwise. Pushing a new commit
/// always clears the redo stack. Every locally applied commit (including the revert applied by
/// [`CommitEngine::undo`]) is also queued in an outbox until the persistence service
/// acknowledges it; those are the "pending local edits" sync conflicts are detected against.
#[derive(Debug, Clone)]
pub struct CommitEngine {
    version_id: VersionId,
    undo: Vec<Arc<CommitHistory>>,
    redo: Vec<Arc<CommitHistory>>,
    outbox: VecDeque<Commit>,
    /// Bounded by `max_undo_depth` like the undo stack.
    remote_log: Vec<RemoteRecord>,
    max_undo_depth: usize,
}

impl CommitEngine {
    pub fn new(version_id: VersionId, max_undo_depth: usize) -> CommitEngine {
        CommitEngine {
            version_id,
            undo: Vec::new(),
            redo: Vec::new(),
            outbox: VecDeque::new(),
            remote_log: Vec::new(),
            max_undo_depth,
        }
    }

    pub fn version_id(&self) -> &VersionId {
        &self.version_id
    }

    /// Apply `ops` as a new local commit. On error nothing changes: not the store, not history.
    pub fn commit(
        &mut self,
        store: &mut GraphStore,
        index: &mut SubtreeIndex,
        ops: Vec<EntityOperation>,
    ) -> Result<Arc<CommitHistory>, TraceGraphError> {
        let applied = store.apply_operations(ops)?;
        if applied.hierarchy_changed {
            index.invalidate(store);
        }
        let history = Arc::new(CommitHistory::from_applied(&self.version_id, &applied));
        tracing::debug!(
            "[CommitEngine] commit {} ({} ops)",
            history.commit.id,
            history.commit.operations.len()
        );
        self.undo.push(history.clone());
        if self.max_undo_depth > 0 && self.undo.len() > self.max_undo_depth {
            let dropped = self.undo.remove(0);
            tracing::debug!("[CommitEngine] undo depth exceeded, forgetting {}", dropped.commit.id);
        }
        self.redo.clear();
        self.outbox.push_back(history.commit.clone());
        Ok(history)
    }

    /// Revert the most recent commit. `Ok(None)` when there is nothing to undo.
    ///
    /// A revert that no longer applies (remote changes moved the state it was built against) is
    /// dropped from history and its error returned, so the next undo reaches older entries.
    pub fn undo(
        &mut self,
        store: &mut GraphStore,
        index: &mut SubtreeIndex,
    ) -> Result<Option<Commit>, TraceGraphError> {
        let Some(history) = self.undo.pop() else {
            return Ok(None);
        };
        match store.apply_with_mode(history.revert.operations.clone(), ApplyMode::Replay) {
            Ok(applied) => {
                if applied.hierarchy_changed {
                    index.invalidate(store);
                }
                let revert = history.revert.clone();
                self.outbox.push_back(revert.clone());
                self.redo.push(history);
                Ok(Some(revert))
            }
            Err(e) => {
                tracing::warn!(
                    "[CommitEngine] undo of {} failed, dropping it from history: {e}",
                    history.commit.id
                );
                Err(e)
            }
        }
    }

    /// Re-apply the most recently undone commit. `Ok(None)` when there is nothing to redo. A
    /// commit that no longer applies is dropped like a failed undo.
    pub fn redo(
        &mut self,
        store: &mut GraphStore,
        index: &mut SubtreeIndex,
    ) -> Result<Option<Commit>, TraceGraphError> {
        let Some(history) = self.redo.pop() else {
            return Ok(None);
        };
        match store.apply_with_mode(history.commit.operations.clone(), ApplyMode::Replay) {
            Ok(applied) => {
                if applied.hierarchy_changed {
                    index.invalidate(store);
                }
                let commit = history.commit.clone();
                self.outbox.push_back(commit.clone());
                self.undo.push(history);
                Ok(Some(commit))
            }
            Err(e) => {
                tracing::warn!(
                    "[CommitEngine] redo of {} failed, dropping it from history: {e}",
                    history.commit.id
                );
                Err(e)
            }
        }
    }

    /// Apply authoritative remote operations. The undo and redo stacks are left alone; the commit
    /// is appended to the remote history log together with any conflicts it caused.
    pub fn remote_commit(
        &mut self,
        store: &mut GraphStore,
        index: &mut SubtreeIndex,
        ops: Vec<EntityOperation>,
        conflicts: Vec<SyncConflict>,
    ) -> Result<Commit, TraceGraphError> {
        let applied = store.apply_with_mode(ops, ApplyMode::Replay)?;
        if applied.hierarchy_changed {
            index.invalidate(store);
        }
        let commit = Commit::new(self.version_id.clone(), applied.operations);
        tracing::debug!(
            "[CommitEngine] remote commit {} ({} ops, {} conflicts)",
            commit.id,
            commit.operations.len(),
            conflicts.len()
        );
        self.remote_log.push(RemoteRecord {
            commit: commit.clone(),
            conflicts,
        });
        if self.max_undo_depth > 0 && self.remote_log.len() > self.max_undo_depth {
            let excess = self.remote_log.len() - self.max_undo_depth;
            self.remote_log.drain(..excess);
        }
        Ok(commit)
    }

    /// Forget history entries whose commits touch any of `ids`.
    ///
    /// Once a remote change supersedes an entity, reverting or re-applying a local commit on it
    /// would clobber authoritative state. Returns the ids of the forgotten commits.
    pub fn invalidate_entities(&mut self, ids: &BTreeSet<EntityId>) -> Vec<CommitId> {
        let mut dropped = Vec::new();
        for stack in [&mut self.undo, &mut self.redo] {
            stack.retain(|history| {
                if history.touches(ids) {
                    dropped.push(history.commit.id.clone());
                    false
                } else {
                    true
                }
            });
        }
        if !dropped.is_empty() {
            tracing::debug!("[CommitEngine] invalidated history entries: {dropped:?}");
        }
        dropped
    }

    /// Remove pending operations on `ids` from the outbox; remote state won for those entities.
    pub fn discard_pending(&mut self, ids: &BTreeSet<EntityId>) {
        for commit in self.outbox.iter_mut() {
            commit.operations.retain(|op| !ids.contains(&op.entity_id()));
        }
        self.outbox.retain(|commit| !commit.is_empty());
    }

    /// Ids touched by local commits not yet acknowledged by the persistence service.
    pub fn pending_entity_ids(&self) -> BTreeSet<EntityId> {
        self.outbox
            .iter()
            .flat_map(|commit| commit.operations.iter().map(EntityOperation::entity_id))
            .collect()
    }

    /// The most recent unacknowledged commit touching `id`.
    pub fn pending_commit_for(&self, id: &EntityId) -> Option<&Commit> {
        self.outbox
            .iter()
            .rev()
            .find(|commit| commit.operations.iter().any(|op| op.entity_id() == *id))
    }

    pub fn unsynced(&self) -> impl Iterator<Item = &Commit> {
        self.outbox.iter()
    }

    pub fn has_unsynced(&self) -> bool {
        !self.outbox.is_empty()
    }

    /// Acknowledge the oldest pending application of `commit_id`. A redo queues the same commit
    /// again, so one id may be pending more than once. Returns false when it was not pending.
    pub fn mark_synced(&mut self, commit_id: &CommitId) -> bool {
        match self.outbox.iter().position(|commit| commit.id == *commit_id) {
            Some(index) => {
                self.outbox.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.can_undo()
    }

    pub fn undo_stack(&self) -> &[Arc<CommitHistory>] {
        &self.undo
    }

    pub fn redo_stack(&self) -> &[Arc<CommitHistory>] {
        &self.redo
    }

    pub fn remote_log(&self) -> &[RemoteRecord] {
        &self.remote_log
    }
}

pub(crate) fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
