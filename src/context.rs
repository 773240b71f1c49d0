//! [`VersionContext`]: everything that belongs to the one loaded project version.
//!
//! The store, its subtree index and the commit history live together and are only ever mutated
//! through this object, from one thread of control. Loading another version replaces all three
//! at once.
//!
//! Long computations (a full subtree rebuild, a diff against a remote payload) may run away from
//! the context. They start with a [`ComputationTicket`] and their result is only accepted while
//! the ticket still matches: every version load bumps the `epoch`, every successful mutation
//! bumps the `generation`.

use std::{collections::BTreeSet, sync::Arc};
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    commit::{Commit, CommitEngine, CommitHistory, EntityOperation},
    config::EngineConfig,
    delta::DeltaPayload,
    error::TraceGraphError,
    event::{Event, EventOrigin, GraphEvent},
    graph::{
        GraphStore, HierarchyEdges, HierarchyReport, HierarchyWarning, SubtreeIndex, SubtreeItem,
        SubtreeMap,
    },
    properties::{Artifact, ArtifactId, CommitId, GraphSnapshot, ProjectVersion, TraceLink, VersionId},
    sync::SyncConflict,
};

/// The state a background computation started from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComputationTicket {
    pub epoch: u64,
    pub generation: u64,
}

#[derive(Debug)]
pub struct VersionContext {
    version: ProjectVersion,
    store: GraphStore,
    index: SubtreeIndex,
    engine: CommitEngine,
    config: EngineConfig,
    epoch: u64,
    generation: u64,
    tx: Option<UnboundedSender<Event>>,
}

impl VersionContext {
    /// An empty context for `version`.
    pub fn new(version: ProjectVersion, config: EngineConfig) -> VersionContext {
        let engine = CommitEngine::new(version.version_id.clone(), config.max_undo_depth);
        VersionContext {
            version,
            store: GraphStore::new(),
            index: SubtreeIndex::new(config.rebuild),
            engine,
            config,
            epoch: 0,
            generation: 0,
            tx: None,
        }
    }

    /// A context holding `snapshot` as the content of `version`.
    pub fn load(
        version: ProjectVersion,
        snapshot: GraphSnapshot,
        config: EngineConfig,
    ) -> Result<VersionContext, TraceGraphError> {
        let mut ctx = VersionContext::new(version.clone(), config);
        ctx.load_version(version, snapshot)?;
        Ok(ctx)
    }

    /// Forward graph events, conflicts and hierarchy warnings to `tx`.
    pub fn with_events(mut self, tx: UnboundedSender<Event>) -> VersionContext {
        self.tx = Some(tx);
        self
    }

    /// Replace the loaded version wholesale. History, pending edits and the index of the previous
    /// version are discarded, and every outstanding [`ComputationTicket`] goes stale. A snapshot
    /// that fails validation leaves the context untouched.
    pub fn load_version(
        &mut self,
        version: ProjectVersion,
        snapshot: GraphSnapshot,
    ) -> Result<(), TraceGraphError> {
        let store = GraphStore::from_snapshot(snapshot)?;
        if self.engine.has_unsynced() {
            tracing::warn!(
                "Discarding {} unsynced commits of version {}",
                self.engine.unsynced().count(),
                self.version.version_id
            );
        }
        tracing::info!(
            "Loaded version {} ({}): {} artifacts, {} trace links",
            version.version_id,
            version,
            store.artifact_count(),
            store.trace_count()
        );
        self.engine = CommitEngine::new(version.version_id.clone(), self.config.max_undo_depth);
        self.index = SubtreeIndex::new(self.config.rebuild);
        self.store = store;
        self.version = version;
        self.epoch += 1;
        self.generation += 1;
        self.index.invalidate(&self.store);

        self.emit(Event::Graph(GraphEvent::VersionLoaded(
            self.version.version_id.clone(),
            self.store.artifact_count(),
            self.store.trace_count(),
            EventOrigin::Remote,
        )));
        if !self.index.is_dirty() {
            let warnings = self.hierarchy_warnings();
            self.emit_warnings(warnings);
        }
        Ok(())
    }

    pub fn version(&self) -> &ProjectVersion {
        &self.version
    }

    pub fn version_id(&self) -> &VersionId {
        &self.version.version_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn engine(&self) -> &CommitEngine {
        &self.engine
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn commit(
        &mut self,
        ops: Vec<EntityOperation>,
    ) -> Result<Arc<CommitHistory>, TraceGraphError> {
        let history = self.engine.commit(&mut self.store, &mut self.index, ops)?;
        self.generation += 1;
        self.emit(Event::Graph(GraphEvent::CommitApplied(
            history.commit.clone(),
            EventOrigin::Local,
        )));
        Ok(history)
    }

    /// Revert the most recent commit. An entry whose revert fails is dropped from history and
    /// announced as [`Event::HistoryDropped`].
    pub fn undo(&mut self) -> Result<Option<Commit>, TraceGraphError> {
        let top = self.engine.undo_stack().last().map(|h| h.commit.id.clone());
        let reverted = self
            .engine
            .undo(&mut self.store, &mut self.index)
            .inspect_err(|_| self.emit(Event::HistoryDropped(top.into_iter().collect())))?;
        if let Some(revert) = reverted.as_ref() {
            self.generation += 1;
            self.emit(Event::Graph(GraphEvent::CommitReverted(
                revert.clone(),
                EventOrigin::Local,
            )));
        }
        Ok(reverted)
    }

    pub fn redo(&mut self) -> Result<Option<Commit>, TraceGraphError> {
        let top = self.engine.redo_stack().last().map(|h| h.commit.id.clone());
        let reapplied = self
            .engine
            .redo(&mut self.store, &mut self.index)
            .inspect_err(|_| self.emit(Event::HistoryDropped(top.into_iter().collect())))?;
        if let Some(commit) = reapplied.as_ref() {
            self.generation += 1;
            self.emit(Event::Graph(GraphEvent::CommitReapplied(
                commit.clone(),
                EventOrigin::Local,
            )));
        }
        Ok(reapplied)
    }

    pub fn remote_commit(
        &mut self,
        ops: Vec<EntityOperation>,
        conflicts: Vec<SyncConflict>,
    ) -> Result<Commit, TraceGraphError> {
        let commit = self
            .engine
            .remote_commit(&mut self.store, &mut self.index, ops, conflicts)?;
        self.generation += 1;
        self.emit(Event::Graph(GraphEvent::CommitApplied(
            commit.clone(),
            EventOrigin::Remote,
        )));
        Ok(commit)
    }

    /// Acknowledge a commit the persistence service stored.
    pub fn mark_synced(&mut self, commit_id: &CommitId) -> bool {
        self.engine.mark_synced(commit_id)
    }

    pub(crate) fn engine_mut(&mut self) -> &mut CommitEngine {
        &mut self.engine
    }

    pub fn get_artifact(&self, id: &str) -> Option<&Artifact> {
        self.store.get_artifact(id)
    }

    pub fn get_artifact_by_name(&self, name: &str) -> Option<&Artifact> {
        self.store.get_artifact_by_name(name)
    }

    pub fn list_artifacts(&self) -> impl Iterator<Item = &Artifact> {
        self.store.list_artifacts()
    }

    pub fn list_trace_links(&self) -> impl Iterator<Item = &TraceLink> {
        self.store.list_trace_links()
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        self.store.snapshot()
    }

    pub fn subtree(&mut self, id: &str) -> Option<SubtreeItem> {
        self.index.get(&self.store, id).cloned()
    }

    pub fn subtree_map(&mut self) -> &SubtreeMap {
        self.index.map(&self.store)
    }

    pub fn get_matching_children(
        &mut self,
        parent_ids: &[ArtifactId],
        included_types: &[String],
    ) -> BTreeSet<ArtifactId> {
        self.index
            .get_matching_children(&self.store, parent_ids, included_types)
    }

    pub fn hierarchy_warnings(&mut self) -> Vec<HierarchyWarning> {
        self.index.warnings(&self.store).to_vec()
    }

    pub fn ticket(&self) -> ComputationTicket {
        ComputationTicket {
            epoch: self.epoch,
            generation: self.generation,
        }
    }

    /// `Err(StaleComputation)` unless nothing changed since `ticket` was taken.
    pub fn check_ticket(&self, ticket: &ComputationTicket) -> Result<(), TraceGraphError> {
        if *ticket == self.ticket() {
            Ok(())
        } else {
            Err(self.stale(ticket))
        }
    }

    /// `Err(StaleComputation)` if another version was loaded since `ticket` was taken. Mutations
    /// of the same version are tolerated.
    pub fn check_epoch(&self, ticket: &ComputationTicket) -> Result<(), TraceGraphError> {
        if ticket.epoch == self.epoch {
            Ok(())
        } else {
            Err(self.stale(ticket))
        }
    }

    fn stale(&self, ticket: &ComputationTicket) -> TraceGraphError {
        TraceGraphError::StaleComputation {
            started_epoch: ticket.epoch,
            started_generation: ticket.generation,
            epoch: self.epoch,
            generation: self.generation,
        }
    }

    /// Start a subtree rebuild off the context: a ticket and a read-only copy of the hierarchy.
    pub fn begin_rebuild(&self) -> (ComputationTicket, HierarchyEdges) {
        (self.ticket(), HierarchyEdges::from_store(&self.store))
    }

    /// Install a rebuild computed from [`VersionContext::begin_rebuild`]. A stale result is
    /// dropped and the error returned for the caller to discard.
    pub fn finish_rebuild(
        &mut self,
        ticket: ComputationTicket,
        report: HierarchyReport,
    ) -> Result<(), TraceGraphError> {
        if let Err(e) = self.check_ticket(&ticket) {
            tracing::debug!("Dropping subtree rebuild: {e}");
            return Err(e);
        }
        let warnings = report.warnings.clone();
        self.index.install(report);
        self.emit_warnings(warnings);
        Ok(())
    }

    /// Start a diff of local state against some other payload.
    pub fn begin_diff(&self) -> (ComputationTicket, GraphSnapshot) {
        (self.ticket(), self.store.snapshot())
    }

    /// Accept a diff computed from [`VersionContext::begin_diff`] only while it is current.
    pub fn finish_diff(
        &self,
        ticket: ComputationTicket,
        delta: DeltaPayload,
    ) -> Result<DeltaPayload, TraceGraphError> {
        match self.check_ticket(&ticket) {
            Ok(()) => Ok(delta),
            Err(e) => {
                tracing::debug!("Dropping diff result: {e}");
                Err(e)
            }
        }
    }

    pub(crate) fn emit(&self, event: Event) {
        if let Some(tx) = self.tx.as_ref() {
            if let Err(e) = tx.send(event) {
                tracing::debug!("Event receiver dropped: {e}");
            }
        }
    }

    fn emit_warnings(&self, warnings: Vec<HierarchyWarning>) {
        for warning in warnings {
            self.emit(Event::Hierarchy(warning));
        }
    }
}
