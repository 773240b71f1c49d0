use std::collections::{BTreeSet, VecDeque};

use crate::{
    config::SyncConfig,
    context::VersionContext,
    delta::{diff, DeltaPayload, DeltaSide},
    error::TraceGraphError,
    event::{ChangeMessage, Event},
    graph::GraphStore,
    properties::{Entity, EntityId, GraphSnapshot, VersionId},
};

use super::{SyncConflict, SyncReport};

/// Queues change messages in receipt order and merges fetched authoritative values into a
/// [`VersionContext`].
///
/// Messages are never reordered, so successive updates of the same entity apply in the order
/// they were announced. When the queue overflows the oldest message is dropped and a full
/// resync is requested instead.
#[derive(Debug, Clone, Default)]
pub struct SyncReconciler {
    queue: VecDeque<ChangeMessage>,
    config: SyncConfig,
    resync: bool,
}

impl SyncReconciler {
    pub fn new(config: SyncConfig) -> SyncReconciler {
        SyncReconciler {
            queue: VecDeque::new(),
            config,
            resync: false,
        }
    }

    /// Queue `message` if it addresses the `loaded` version. Returns whether it was queued.
    pub fn enqueue(&mut self, message: ChangeMessage, loaded: &VersionId) -> bool {
        if message.version_id != *loaded {
            tracing::debug!(
                "Dropping change message for version {} (loaded: {loaded})",
                message.version_id
            );
            return false;
        }
        if self.config.queue_capacity > 0 && self.queue.len() >= self.config.queue_capacity {
            if let Some(dropped) = self.queue.pop_front() {
                tracing::warn!(
                    "Change queue full, dropping message for {} entities and scheduling a resync",
                    dropped.changed_entity_ids.len()
                );
            }
            self.resync = true;
        }
        self.queue.push_back(message);
        true
    }

    pub fn next_message(&mut self) -> Option<ChangeMessage> {
        self.queue.pop_front()
    }

    /// Put a message whose fetch failed back at the head of the queue.
    pub fn requeue(&mut self, message: ChangeMessage) {
        self.queue.push_front(message);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn needs_resync(&self) -> bool {
        self.resync
    }

    /// Request a full snapshot reconciliation before any further message.
    pub fn request_resync(&mut self) {
        self.resync = true;
    }

    /// Clear the resync request together with every queued message, which the snapshot covers.
    pub fn take_resync(&mut self) -> bool {
        if self.resync {
            self.queue.clear();
        }
        std::mem::take(&mut self.resync)
    }

    /// Apply the authoritative values fetched for `message`.
    ///
    /// Only the named ids are compared. A named id missing from `fetched` was deleted remotely;
    /// local trace links left pointing at a remotely deleted artifact are deleted with it.
    pub fn reconcile(
        &self,
        ctx: &mut VersionContext,
        message: &ChangeMessage,
        fetched: &GraphSnapshot,
    ) -> Result<SyncReport, TraceGraphError> {
        if message.version_id != *ctx.version_id() {
            tracing::debug!(
                "Ignoring change message for version {} (loaded: {})",
                message.version_id,
                ctx.version_id()
            );
            return Ok(SyncReport::default());
        }
        let named = message
            .changed_entity_ids
            .iter()
            .map(String::as_str)
            .collect::<BTreeSet<_>>();
        let store = ctx.store();
        let mut delta = diff(
            named.iter().filter_map(|id| store.get_artifact(id)),
            named.iter().filter_map(|id| store.get_trace_link(id)),
            fetched
                .artifacts
                .iter()
                .filter(|a| named.contains(a.id.as_str())),
            fetched
                .trace_links
                .iter()
                .filter(|t| named.contains(t.id.as_str())),
        );

        // The comparison only sees a slice of each side; an endpoint is missing only when it
        // is neither in the store nor fetched.
        delta.missing_artifacts.retain(|missing| {
            missing.side == DeltaSide::Target
                && store.get_artifact(missing.artifact_id.as_str()).is_none()
                && !fetched.artifacts.iter().any(|a| a.id == missing.artifact_id)
        });

        let orphaned = delta
            .artifacts
            .removed
            .keys()
            .flat_map(|id| store.trace_links_for(id.as_str()))
            .filter(|trace| !named.contains(trace.id.as_str()))
            .cloned()
            .collect::<Vec<_>>();
        for trace in orphaned {
            tracing::debug!(
                "Deleting trace link {} with its remotely deleted endpoint",
                trace.id
            );
            delta.trace_links.removed.insert(trace.id.clone(), trace);
        }

        apply_delta(ctx, delta)
    }

    /// Make the loaded version equal to an authoritative `snapshot`. Local edits the snapshot
    /// does not contain, unsynced creations included, are overwritten and reported.
    pub fn reconcile_snapshot(
        &self,
        ctx: &mut VersionContext,
        snapshot: &GraphSnapshot,
    ) -> Result<SyncReport, TraceGraphError> {
        let store = ctx.store();
        let delta = diff(
            store.list_artifacts(),
            store.list_trace_links(),
            &snapshot.artifacts,
            &snapshot.trace_links,
        );
        apply_delta(ctx, delta)
    }
}

fn apply_delta(
    ctx: &mut VersionContext,
    delta: DeltaPayload,
) -> Result<SyncReport, TraceGraphError> {
    if delta.is_empty() {
        tracing::debug!("Remote state matches local state");
        return Ok(SyncReport {
            missing_artifacts: delta.missing_artifacts,
            ..Default::default()
        });
    }

    let touched = delta.entity_ids();
    let pending = ctx.engine().pending_entity_ids();
    let conflicts = touched
        .iter()
        .filter(|id| pending.contains(*id))
        .map(|id| SyncConflict {
            entity_id: id.clone(),
            local: local_entity(ctx.store(), id),
            remote: remote_entity(&delta, id),
            pending_commit: ctx.engine().pending_commit_for(id).map(|c| c.id.clone()),
        })
        .collect::<Vec<_>>();

    let commit = ctx.remote_commit(delta.to_operations(), conflicts.clone())?;

    let overwritten = conflicts
        .iter()
        .map(|c| c.entity_id.clone())
        .collect::<BTreeSet<_>>();
    let engine = ctx.engine_mut();
    let invalidated_commits = engine.invalidate_entities(&touched);
    engine.discard_pending(&overwritten);

    if !invalidated_commits.is_empty() {
        ctx.emit(Event::HistoryDropped(invalidated_commits.clone()));
    }
    for conflict in conflicts.iter() {
        tracing::warn!(
            "Remote change to {} overwrote unsynced local edit {:?}",
            conflict.entity_id,
            conflict.pending_commit
        );
        ctx.emit(Event::Conflict(conflict.clone()));
    }

    Ok(SyncReport {
        commit: Some(commit),
        conflicts,
        invalidated_commits,
        missing_artifacts: delta.missing_artifacts,
    })
}

fn local_entity(store: &GraphStore, id: &EntityId) -> Option<Entity> {
    match id {
        EntityId::Artifact(id) => store
            .get_artifact(id.as_str())
            .cloned()
            .map(Entity::Artifact),
        EntityId::TraceLink(id) => store
            .get_trace_link(id.as_str())
            .cloned()
            .map(Entity::TraceLink),
    }
}

fn remote_entity(delta: &DeltaPayload, id: &EntityId) -> Option<Entity> {
    match id {
        EntityId::Artifact(id) => delta
            .artifacts
            .added
            .get(id)
            .or_else(|| delta.artifacts.modified.get(id).map(|entry| &entry.new))
            .cloned()
            .map(Entity::Artifact),
        EntityId::TraceLink(id) => delta
            .trace_links
            .added
            .get(id)
            .or_else(|| delta.trace_links.modified.get(id).map(|entry| &entry.new))
            .cloned()
            .map(Entity::TraceLink),
    }
}
