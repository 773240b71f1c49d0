use parking_lot::RwLock;
use std::{collections::BTreeMap, future::Future};

use crate::{
    commit::{now_ms, Commit, EntityOperation},
    error::TraceGraphError,
    event::ChangeMessage,
    graph::{store::ApplyMode, GraphStore},
    properties::{CommitId, GraphSnapshot, VersionId},
};

use super::AuthoritySource;

/// An in-process persistence service: one validated [`GraphStore`] per version and a log of
/// every commit it accepted.
#[derive(Debug, Default)]
pub struct MemoryAuthority {
    versions: RwLock<BTreeMap<VersionId, GraphStore>>,
    log: RwLock<Vec<Commit>>,
}

impl MemoryAuthority {
    pub fn new() -> MemoryAuthority {
        MemoryAuthority::default()
    }

    pub fn with_version<V: Into<VersionId>>(
        self,
        version_id: V,
        snapshot: GraphSnapshot,
    ) -> Result<MemoryAuthority, TraceGraphError> {
        self.set_version(version_id, snapshot)?;
        Ok(self)
    }

    pub fn set_version<V: Into<VersionId>>(
        &self,
        version_id: V,
        snapshot: GraphSnapshot,
    ) -> Result<(), TraceGraphError> {
        let store = GraphStore::from_snapshot(snapshot)?;
        self.versions.write().insert(version_id.into(), store);
        Ok(())
    }

    pub fn snapshot(&self, version_id: &VersionId) -> Option<GraphSnapshot> {
        self.versions.read().get(version_id).map(GraphStore::snapshot)
    }

    /// Commits accepted so far, in order.
    pub fn log(&self) -> Vec<Commit> {
        self.log.read().clone()
    }

    /// Apply another collaborator's edit and return the notification it would broadcast.
    pub fn apply_remote(
        &self,
        version_id: &VersionId,
        ops: Vec<EntityOperation>,
    ) -> Result<ChangeMessage, TraceGraphError> {
        let commit = Commit::new(version_id.clone(), ops);
        let message = ChangeMessage::new(
            version_id.clone(),
            commit.touched_ids().iter().map(|id| id.as_str().to_string()),
        );
        self.accept(commit, ApplyMode::Fresh)?;
        Ok(message)
    }

    fn accept(&self, commit: Commit, mode: ApplyMode) -> Result<Commit, TraceGraphError> {
        let mut versions = self.versions.write();
        let store = versions
            .get_mut(&commit.version_id)
            .ok_or_else(|| unknown_version(&commit.version_id))?;
        store.apply_with_mode(commit.operations.clone(), mode)?;
        let stored = Commit {
            id: CommitId::generate(),
            timestamp_ms: now_ms(),
            ..commit
        };
        self.log.write().push(stored.clone());
        Ok(stored)
    }
}

impl AuthoritySource for MemoryAuthority {
    fn load_version(
        &self,
        version_id: &VersionId,
    ) -> impl Future<Output = Result<GraphSnapshot, TraceGraphError>> + Send {
        let result = self
            .snapshot(version_id)
            .ok_or_else(|| unknown_version(version_id));
        async move { result }
    }

    /// Undo and redo replay retired ids, so stored commits are applied in replay mode.
    fn persist_commit(
        &self,
        commit: Commit,
    ) -> impl Future<Output = Result<Commit, TraceGraphError>> + Send {
        let result = self.accept(commit, ApplyMode::Replay);
        async move { result }
    }

    fn fetch_entities(
        &self,
        version_id: &VersionId,
        ids: &[String],
    ) -> impl Future<Output = Result<GraphSnapshot, TraceGraphError>> + Send {
        let result = match self.versions.read().get(version_id) {
            Some(store) => Ok(GraphSnapshot::new(
                ids.iter()
                    .filter_map(|id| store.get_artifact(id))
                    .cloned()
                    .collect(),
                ids.iter()
                    .filter_map(|id| store.get_trace_link(id))
                    .cloned()
                    .collect(),
            )),
            None => Err(unknown_version(version_id)),
        };
        async move { result }
    }
}

fn unknown_version(version_id: &VersionId) -> TraceGraphError {
    TraceGraphError::Persistence(format!("Unknown version {version_id}"))
}
