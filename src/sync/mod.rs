//! Sync module: reconciling authoritative remote state into the loaded version.
//!
//! # Module Organization
//!
//! - [`reconciler`]: [`SyncReconciler`], the receipt-ordered change queue and the
//!   last-write-wins merge of fetched entities
//! - [`service`]: [`SyncService`], the async driver that fetches from an [`AuthoritySource`]
//!   and persists the outbox
//! - [`memory`]: [`MemoryAuthority`], an in-process [`AuthoritySource`]
//!
//! Remote state always wins. A remote change to an entity with a pending local edit is applied
//! anyway and surfaced as a [`SyncConflict`].

pub mod memory;
pub mod reconciler;
pub mod service;

pub use memory::MemoryAuthority;
pub use reconciler::SyncReconciler;
pub use service::SyncService;

use serde::{Deserialize, Serialize};
use std::future::Future;

use crate::{
    commit::Commit,
    delta::{diff_snapshots, DeltaPayload, MissingArtifact},
    error::TraceGraphError,
    properties::{CommitId, Entity, EntityId, GraphSnapshot, VersionId},
};

/// A remote change that overwrote a pending local edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConflict {
    pub entity_id: EntityId,
    /// The local value that lost. `None` when the local edit deleted the entity.
    pub local: Option<Entity>,
    /// The authoritative value now in the store. `None` when the entity was deleted remotely.
    pub remote: Option<Entity>,
    /// The most recent unsynced local commit that touched the entity.
    pub pending_commit: Option<CommitId>,
}

/// The outcome of reconciling one change message or snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// The remote commit applied, if remote state differed from local state.
    pub commit: Option<Commit>,
    pub conflicts: Vec<SyncConflict>,
    /// Undo/redo entries forgotten because remote state superseded what they touched.
    pub invalidated_commits: Vec<CommitId>,
    /// Dangling trace link endpoints seen in the compared payloads.
    pub missing_artifacts: Vec<MissingArtifact>,
}

impl SyncReport {
    pub fn is_noop(&self) -> bool {
        self.commit.is_none()
    }
}

/// The persistence service, as seen by the engine.
pub trait AuthoritySource: Sync {
    /// The wholesale content of a version.
    fn load_version(
        &self,
        version_id: &VersionId,
    ) -> impl Future<Output = Result<GraphSnapshot, TraceGraphError>> + Send;

    /// Store a commit. The returned commit carries the server's id and timestamp.
    fn persist_commit(
        &self,
        commit: Commit,
    ) -> impl Future<Output = Result<Commit, TraceGraphError>> + Send;

    /// Current authoritative values of `ids`. Ids absent from the result were deleted.
    fn fetch_entities(
        &self,
        version_id: &VersionId,
        ids: &[String],
    ) -> impl Future<Output = Result<GraphSnapshot, TraceGraphError>> + Send;

    /// Server-side version comparison. Default implementation loads both versions and diffs
    /// them locally.
    fn get_delta(
        &self,
        source_version_id: &VersionId,
        target_version_id: &VersionId,
    ) -> impl Future<Output = Result<DeltaPayload, TraceGraphError>> + Send {
        async move {
            let base = self.load_version(source_version_id).await?;
            let target = self.load_version(target_version_id).await?;
            Ok(diff_snapshots(&base, &target))
        }
    }
}
