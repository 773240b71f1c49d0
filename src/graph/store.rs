//! GraphStore: the canonical in-memory artifact and trace link set of the loaded version.
//!
//! [`GraphStore::apply_operations`] is the only mutation entry point. A batch is applied
//! operation by operation against live state; the first invalid operation rolls everything back,
//! so callers observe either the whole batch or nothing. Name and edge uniqueness and dangling
//! trace links are judged on the state the whole batch leaves behind, so a batch may swap two
//! names or two edges.

use std::collections::{btree_map::Entry as BTreeEntry, BTreeMap, BTreeSet};

use crate::{
    commit::EntityOperation,
    error::{EntityKind, TraceGraphError},
    properties::{Artifact, ArtifactId, EntityId, GraphSnapshot, TraceId, TraceLink},
};

/// How retired (deleted) ids are treated when an operation creates them again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ApplyMode {
    /// A brand-new edit. Ids retired earlier in this version's history may not be reused.
    Fresh,
    /// History replay (undo/redo) or authoritative remote state. Retired ids may be revived.
    Replay,
}

/// What an applied operation replaced, enough to build its inverse.
#[derive(Debug, Clone, PartialEq)]
pub enum PriorState {
    /// The operation created the entity with this id.
    Created(EntityId),
    /// Pre-image of an updated or deleted artifact.
    Artifact(Artifact),
    /// Pre-image of an updated or deleted trace link.
    TraceLink(TraceLink),
}

/// A successfully applied batch together with the pre-images of everything it touched.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedResult {
    pub operations: Vec<EntityOperation>,
    /// One entry per operation, same order.
    pub prior: Vec<PriorState>,
    /// True when artifact existence or any `parent_ids` changed.
    pub hierarchy_changed: bool,
}

impl AppliedResult {
    /// The batch that, applied immediately afterwards, restores the pre-batch state exactly.
    pub fn revert_operations(&self) -> Vec<EntityOperation> {
        self.operations
            .iter()
            .zip(self.prior.iter())
            .rev()
            .filter_map(|(op, prior)| match (op, prior) {
                (EntityOperation::CreateArtifact(artifact), _) => {
                    Some(EntityOperation::DeleteArtifact(artifact.id.clone()))
                }
                (EntityOperation::CreateTraceLink(trace), _) => {
                    Some(EntityOperation::DeleteTraceLink(trace.id.clone()))
                }
                (
                    EntityOperation::UpdateArtifact(_),
                    PriorState::Artifact(old),
                ) => Some(EntityOperation::UpdateArtifact(old.clone())),
                (
                    EntityOperation::DeleteArtifact(_),
                    PriorState::Artifact(old),
                ) => Some(EntityOperation::CreateArtifact(old.clone())),
                (
                    EntityOperation::UpdateTraceLink(_),
                    PriorState::TraceLink(old),
                ) => Some(EntityOperation::UpdateTraceLink(old.clone())),
                (
                    EntityOperation::DeleteTraceLink(_),
                    PriorState::TraceLink(old),
                ) => Some(EntityOperation::CreateTraceLink(old.clone())),
                (op, prior) => {
                    tracing::error!("Pre-image {prior:?} does not match operation {op:?}");
                    None
                }
            })
            .collect()
    }

    pub fn touched_ids(&self) -> BTreeSet<EntityId> {
        self.operations.iter().map(|op| op.entity_id()).collect()
    }
}

/// Rollback journal entry: how to put the store back the way it was before one operation.
#[derive(Debug)]
struct Undo {
    prior: PriorState,
    /// The operation revived a retired id.
    revived: bool,
}

#[derive(Debug, Clone, Default)]
pub struct GraphStore {
    artifacts: BTreeMap<ArtifactId, Artifact>,
    /// Ids per name. More than one id only while a batch is in flight.
    names: BTreeMap<String, BTreeSet<ArtifactId>>,
    traces: BTreeMap<TraceId, TraceLink>,
    /// Trace ids per `(source, target)`. More than one id only while a batch is in flight.
    edges: BTreeMap<(ArtifactId, ArtifactId), BTreeSet<TraceId>>,
    /// Trace ids per endpoint, maintained whether or not the endpoint artifact exists.
    links_by_artifact: BTreeMap<ArtifactId, BTreeSet<TraceId>>,
    retired: BTreeSet<EntityId>,
}

impl PartialEq for GraphStore {
    fn eq(&self, other: &Self) -> bool {
        self.artifacts == other.artifacts && self.traces == other.traces
    }
}

impl GraphStore {
    pub fn new() -> GraphStore {
        GraphStore::default()
    }

    /// Build a store holding exactly `snapshot`, validated with the same rules as any batch.
    pub fn from_snapshot(snapshot: GraphSnapshot) -> Result<GraphStore, TraceGraphError> {
        let mut store = GraphStore::new();
        let ops = snapshot
            .artifacts
            .into_iter()
            .map(EntityOperation::CreateArtifact)
            .chain(
                snapshot
                    .trace_links
                    .into_iter()
                    .map(EntityOperation::CreateTraceLink),
            )
            .collect::<Vec<_>>();
        store.apply_operations(ops)?;
        Ok(store)
    }

    pub fn get_artifact(&self, id: &str) -> Option<&Artifact> {
        self.artifacts.get(id)
    }

    pub fn get_artifact_by_name(&self, name: &str) -> Option<&Artifact> {
        self.names
            .get(name)
            .and_then(|ids| ids.first())
            .and_then(|id| self.artifacts.get(id))
    }

    pub fn get_trace_link(&self, id: &str) -> Option<&TraceLink> {
        self.traces.get(id)
    }

    pub fn trace_between(&self, source_id: &ArtifactId, target_id: &ArtifactId) -> Option<&TraceLink> {
        self.edges
            .get(&(source_id.clone(), target_id.clone()))
            .and_then(|ids| ids.first())
            .and_then(|id| self.traces.get(id))
    }

    /// Every trace link with `artifact_id` as source or target.
    pub fn trace_links_for(&self, artifact_id: &str) -> Vec<&TraceLink> {
        self.links_by_artifact
            .get(artifact_id)
            .map(|ids| ids.iter().filter_map(|id| self.traces.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn list_artifacts(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.values()
    }

    pub fn list_trace_links(&self) -> impl Iterator<Item = &TraceLink> {
        self.traces.values()
    }

    pub fn artifacts(&self) -> &BTreeMap<ArtifactId, Artifact> {
        &self.artifacts
    }

    pub fn trace_links(&self) -> &BTreeMap<TraceId, TraceLink> {
        &self.traces
    }

    pub fn artifact_count(&self) -> usize {
        self.artifacts.len()
    }

    pub fn trace_count(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty() && self.traces.is_empty()
    }

    /// True if `id` was deleted at some point in this version's history and not revived.
    pub fn is_retired(&self, id: &EntityId) -> bool {
        self.retired.contains(id)
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            artifacts: self.artifacts.values().cloned().collect(),
            trace_links: self.traces.values().cloned().collect(),
        }
    }

    /// Apply a batch of fresh edits atomically.
    ///
    /// Each operation is validated against the state left by the operations before it. Trace
    /// link endpoints are checked once the whole batch has applied, so a batch may delete an
    /// artifact and its trace links in either order.
    pub fn apply_operations(
        &mut self,
        ops: Vec<EntityOperation>,
    ) -> Result<AppliedResult, TraceGraphError> {
        self.apply_with_mode(ops, ApplyMode::Fresh)
    }

    pub(crate) fn apply_with_mode(
        &mut self,
        ops: Vec<EntityOperation>,
        mode: ApplyMode,
    ) -> Result<AppliedResult, TraceGraphError> {
        let mut journal: Vec<Undo> = Vec::with_capacity(ops.len());
        let mut last_touch: BTreeMap<EntityId, usize> = BTreeMap::new();
        let mut hierarchy_changed = false;

        for (index, op) in ops.iter().enumerate() {
            match self.apply_one(op, index, mode) {
                Ok(undo) => {
                    hierarchy_changed |= match (op, &undo.prior) {
                        (EntityOperation::CreateArtifact(_), _)
                        | (EntityOperation::DeleteArtifact(_), _) => true,
                        (EntityOperation::UpdateArtifact(new), PriorState::Artifact(old)) => {
                            new.hierarchy_differs(old)
                        }
                        _ => false,
                    };
                    last_touch.insert(op.entity_id(), index);
                    journal.push(undo);
                }
                Err(e) => {
                    tracing::debug!("Rejecting batch of {} operations: {e}", ops.len());
                    self.rollback(journal);
                    return Err(e);
                }
            }
        }

        let verdict = [
            self.check_unique(&ops, &last_touch),
            self.check_dangling(&ops, &last_touch),
        ]
        .into_iter()
        .filter_map(Result::err)
        .min_by_key(|e| e.op_index().unwrap_or_default());
        if let Some(e) = verdict {
            tracing::debug!("Rejecting batch of {} operations: {e}", ops.len());
            self.rollback(journal);
            return Err(e);
        }

        let prior = journal.into_iter().map(|undo| undo.prior).collect();
        Ok(AppliedResult {
            operations: ops,
            prior,
            hierarchy_changed,
        })
    }

    fn apply_one(
        &mut self,
        op: &EntityOperation,
        op_index: usize,
        mode: ApplyMode,
    ) -> Result<Undo, TraceGraphError> {
        check_well_formed(op, op_index)?;
        match op {
            EntityOperation::CreateArtifact(artifact) => {
                let revived = self.check_new_id(
                    EntityId::Artifact(artifact.id.clone()),
                    self.artifacts.contains_key(&artifact.id),
                    op_index,
                    mode,
                )?;
                self.insert_artifact(artifact.clone());
                Ok(Undo {
                    prior: PriorState::Created(EntityId::Artifact(artifact.id.clone())),
                    revived,
                })
            }
            EntityOperation::UpdateArtifact(artifact) => {
                if !self.artifacts.contains_key(&artifact.id) {
                    return Err(not_found(op_index, EntityKind::Artifact, artifact.id.as_str()));
                }
                let old = self.insert_artifact(artifact.clone());
                Ok(Undo {
                    prior: PriorState::Artifact(old.unwrap_or_else(|| artifact.clone())),
                    revived: false,
                })
            }
            EntityOperation::DeleteArtifact(id) => match self.remove_artifact(id) {
                Some(old) => {
                    self.retired.insert(EntityId::Artifact(id.clone()));
                    Ok(Undo {
                        prior: PriorState::Artifact(old),
                        revived: false,
                    })
                }
                None => Err(not_found(op_index, EntityKind::Artifact, id.as_str())),
            },
            EntityOperation::CreateTraceLink(trace) => {
                let revived = self.check_new_id(
                    EntityId::TraceLink(trace.id.clone()),
                    self.traces.contains_key(&trace.id),
                    op_index,
                    mode,
                )?;
                check_self_trace(trace, op_index)?;
                self.insert_trace(trace.clone());
                Ok(Undo {
                    prior: PriorState::Created(EntityId::TraceLink(trace.id.clone())),
                    revived,
                })
            }
            EntityOperation::UpdateTraceLink(trace) => {
                if !self.traces.contains_key(&trace.id) {
                    return Err(not_found(op_index, EntityKind::TraceLink, trace.id.as_str()));
                }
                check_self_trace(trace, op_index)?;
                let old = self.insert_trace(trace.clone());
                Ok(Undo {
                    prior: PriorState::TraceLink(old.unwrap_or_else(|| trace.clone())),
                    revived: false,
                })
            }
            EntityOperation::DeleteTraceLink(id) => match self.remove_trace(id) {
                Some(old) => {
                    self.retired.insert(EntityId::TraceLink(id.clone()));
                    Ok(Undo {
                        prior: PriorState::TraceLink(old),
                        revived: false,
                    })
                }
                None => Err(not_found(op_index, EntityKind::TraceLink, id.as_str())),
            },
        }
    }

    /// Returns whether the id is being revived from the retired set.
    fn check_new_id(
        &self,
        id: EntityId,
        live: bool,
        op_index: usize,
        mode: ApplyMode,
    ) -> Result<bool, TraceGraphError> {
        let retired = self.retired.contains(&id);
        if live || (retired && mode == ApplyMode::Fresh) {
            let (entity, id) = match id {
                EntityId::Artifact(id) => (EntityKind::Artifact, id.to_string()),
                EntityId::TraceLink(id) => (EntityKind::TraceLink, id.to_string()),
            };
            return Err(TraceGraphError::DuplicateId {
                op_index,
                entity,
                id,
            });
        }
        Ok(retired)
    }

    /// No two artifacts may share a name and no two trace links an edge once the batch is
    /// through. The reported operation is the latest one involved in the clash.
    fn check_unique(
        &self,
        ops: &[EntityOperation],
        last_touch: &BTreeMap<EntityId, usize>,
    ) -> Result<(), TraceGraphError> {
        let mut names = BTreeSet::<&String>::new();
        let mut edges = BTreeSet::<(ArtifactId, ArtifactId)>::new();
        for op in ops {
            match op {
                EntityOperation::CreateArtifact(a) | EntityOperation::UpdateArtifact(a) => {
                    names.extend(self.artifacts.get(&a.id).map(|a| &a.name));
                }
                EntityOperation::CreateTraceLink(t) | EntityOperation::UpdateTraceLink(t) => {
                    edges.extend(
                        self.traces
                            .get(&t.id)
                            .map(|t| (t.source_id.clone(), t.target_id.clone())),
                    );
                }
                EntityOperation::DeleteArtifact(_) | EntityOperation::DeleteTraceLink(_) => {}
            }
        }

        let mut first: Option<TraceGraphError> = None;
        for name in names {
            let Some(ids) = self.names.get(name).filter(|ids| ids.len() > 1) else {
                continue;
            };
            let ranked = ids
                .iter()
                .map(|id| (last_touch.get(&EntityId::Artifact(id.clone())).copied(), id));
            if let Some((Some(op_index), culprit)) = ranked.max_by_key(|(index, _)| *index) {
                let existing = ids.iter().find(|id| *id != culprit);
                keep_earliest(
                    &mut first,
                    TraceGraphError::DuplicateName {
                        op_index,
                        name: name.clone(),
                        existing: existing.map(ToString::to_string).unwrap_or_default(),
                    },
                );
            }
        }
        for (source_id, target_id) in edges {
            let Some(ids) = self
                .edges
                .get(&(source_id.clone(), target_id.clone()))
                .filter(|ids| ids.len() > 1)
            else {
                continue;
            };
            let ranked = ids
                .iter()
                .map(|id| (last_touch.get(&EntityId::TraceLink(id.clone())).copied(), id));
            if let Some((Some(op_index), culprit)) = ranked.max_by_key(|(index, _)| *index) {
                let existing = ids.iter().find(|id| *id != culprit);
                keep_earliest(
                    &mut first,
                    TraceGraphError::DuplicateTraceEdge {
                        op_index,
                        source_id: source_id.to_string(),
                        target_id: target_id.to_string(),
                        existing: existing.map(ToString::to_string).unwrap_or_default(),
                    },
                );
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Every trace link the batch created, updated, or orphaned must end up with both endpoints
    /// present. The reported operation is the latest one involved in the dangling reference.
    fn check_dangling(
        &self,
        ops: &[EntityOperation],
        last_touch: &BTreeMap<EntityId, usize>,
    ) -> Result<(), TraceGraphError> {
        let mut candidates = BTreeSet::<TraceId>::new();
        for op in ops {
            match op {
                EntityOperation::CreateTraceLink(trace) | EntityOperation::UpdateTraceLink(trace) => {
                    candidates.insert(trace.id.clone());
                }
                EntityOperation::DeleteArtifact(id) => {
                    if let Some(ids) = self.links_by_artifact.get(id) {
                        candidates.extend(ids.iter().cloned());
                    }
                }
                EntityOperation::CreateArtifact(_)
                | EntityOperation::UpdateArtifact(_)
                | EntityOperation::DeleteTraceLink(_) => {}
            }
        }

        let mut first: Option<TraceGraphError> = None;
        for trace in candidates.iter().filter_map(|id| self.traces.get(id)) {
            for endpoint in [&trace.source_id, &trace.target_id] {
                if self.artifacts.contains_key(endpoint) {
                    continue;
                }
                let culprit = [
                    last_touch.get(&EntityId::TraceLink(trace.id.clone())),
                    last_touch.get(&EntityId::Artifact(endpoint.clone())),
                ]
                .into_iter()
                .flatten()
                .copied()
                .max()
                .unwrap_or_default();
                keep_earliest(
                    &mut first,
                    TraceGraphError::DanglingTraceReference {
                        op_index: culprit,
                        trace_id: trace.id.to_string(),
                        artifact_id: endpoint.to_string(),
                    },
                );
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn rollback(&mut self, journal: Vec<Undo>) {
        for undo in journal.into_iter().rev() {
            match undo.prior {
                PriorState::Created(EntityId::Artifact(id)) => {
                    self.remove_artifact(&id);
                    if undo.revived {
                        self.retired.insert(EntityId::Artifact(id));
                    }
                }
                PriorState::Created(EntityId::TraceLink(id)) => {
                    self.remove_trace(&id);
                    if undo.revived {
                        self.retired.insert(EntityId::TraceLink(id));
                    }
                }
                PriorState::Artifact(old) => {
                    self.retired.remove(&EntityId::Artifact(old.id.clone()));
                    self.insert_artifact(old);
                }
                PriorState::TraceLink(old) => {
                    self.retired.remove(&EntityId::TraceLink(old.id.clone()));
                    self.insert_trace(old);
                }
            }
        }
    }

    /// Insert or replace, keeping the name index in step. Returns the replaced artifact.
    fn insert_artifact(&mut self, artifact: Artifact) -> Option<Artifact> {
        self.retired.remove(&EntityId::Artifact(artifact.id.clone()));
        let old = self.remove_artifact(&artifact.id);
        self.names
            .entry(artifact.name.clone())
            .or_default()
            .insert(artifact.id.clone());
        self.artifacts.insert(artifact.id.clone(), artifact);
        old
    }

    fn remove_artifact(&mut self, id: &ArtifactId) -> Option<Artifact> {
        let old = self.artifacts.remove(id)?;
        if let BTreeEntry::Occupied(mut entry) = self.names.entry(old.name.clone()) {
            entry.get_mut().remove(&old.id);
            if entry.get().is_empty() {
                entry.remove();
            }
        }
        Some(old)
    }

    fn insert_trace(&mut self, trace: TraceLink) -> Option<TraceLink> {
        self.retired.remove(&EntityId::TraceLink(trace.id.clone()));
        let old = self.remove_trace(&trace.id);
        self.edges
            .entry((trace.source_id.clone(), trace.target_id.clone()))
            .or_default()
            .insert(trace.id.clone());
        for endpoint in [&trace.source_id, &trace.target_id] {
            self.links_by_artifact
                .entry(endpoint.clone())
                .or_default()
                .insert(trace.id.clone());
        }
        self.traces.insert(trace.id.clone(), trace);
        old
    }

    fn remove_trace(&mut self, id: &TraceId) -> Option<TraceLink> {
        let old = self.traces.remove(id)?;
        let key = (old.source_id.clone(), old.target_id.clone());
        if let BTreeEntry::Occupied(mut entry) = self.edges.entry(key) {
            entry.get_mut().remove(&old.id);
            if entry.get().is_empty() {
                entry.remove();
            }
        }
        for endpoint in [&old.source_id, &old.target_id] {
            if let BTreeEntry::Occupied(mut entry) = self.links_by_artifact.entry(endpoint.clone())
            {
                entry.get_mut().remove(&old.id);
                if entry.get().is_empty() {
                    entry.remove();
                }
            }
        }
        Some(old)
    }
}

/// Keep whichever error names the earlier operation.
fn keep_earliest(first: &mut Option<TraceGraphError>, candidate: TraceGraphError) {
    let is_earlier = first
        .as_ref()
        .and_then(|e| e.op_index())
        .map(|index| candidate.op_index().unwrap_or_default() < index)
        .unwrap_or(true);
    if is_earlier {
        *first = Some(candidate);
    }
}

fn check_self_trace(trace: &TraceLink, op_index: usize) -> Result<(), TraceGraphError> {
    if trace.source_id == trace.target_id {
        return Err(TraceGraphError::SelfTrace {
            op_index,
            trace_id: trace.id.to_string(),
            artifact_id: trace.source_id.to_string(),
        });
    }
    Ok(())
}

fn check_well_formed(op: &EntityOperation, op_index: usize) -> Result<(), TraceGraphError> {
    let reason = match op {
        EntityOperation::CreateArtifact(a) | EntityOperation::UpdateArtifact(a) => {
            if a.id.as_str().is_empty() {
                Some("artifact id is empty")
            } else if a.name.is_empty() {
                Some("artifact name is empty")
            } else {
                None
            }
        }
        EntityOperation::CreateTraceLink(t) | EntityOperation::UpdateTraceLink(t) => {
            t.id.as_str().is_empty().then_some("trace link id is empty")
        }
        EntityOperation::DeleteArtifact(_) | EntityOperation::DeleteTraceLink(_) => None,
    };
    match reason {
        Some(reason) => Err(TraceGraphError::InvalidOperation {
            op_index,
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

fn not_found(op_index: usize, entity: EntityKind, id: &str) -> TraceGraphError {
    TraceGraphError::NotFound {
        op_index,
        entity,
        id: id.to_string(),
    }
}
