use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::{
    commit::Commit,
    graph::HierarchyWarning,
    properties::{CommitId, EntityId, VersionId},
    sync::SyncConflict,
};

/// Where a graph change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EventOrigin {
    /// An edit made in this client (commit, undo, redo). It is in the outbox until persisted.
    Local,

    /// Authoritative state from the persistence service: a version load, a reconciled change
    /// message, or a snapshot.
    #[default]
    Remote,
}

/// The logical shape of a notification-channel message. Transport framing is not parsed here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeMessage {
    pub version_id: VersionId,
    /// Artifact or trace link ids; the kind is resolved against local and fetched state.
    pub changed_entity_ids: Vec<String>,
}

impl ChangeMessage {
    pub fn new<V, I, S>(version_id: V, ids: I) -> Self
    where
        V: Into<VersionId>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ChangeMessage {
            version_id: version_id.into(),
            changed_entity_ids: ids.into_iter().map(Into::into).collect(),
        }
    }
}

/// A state transition of the loaded version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GraphEvent {
    /// Version id, artifact count, trace link count
    VersionLoaded(VersionId, usize, usize, EventOrigin),
    CommitApplied(Commit, EventOrigin),
    /// The revert commit applied by an undo
    CommitReverted(Commit, EventOrigin),
    /// The original commit re-applied by a redo
    CommitReapplied(Commit, EventOrigin),
}

impl GraphEvent {
    pub fn origin(&self) -> EventOrigin {
        match self {
            GraphEvent::VersionLoaded(_, _, _, origin) => *origin,
            GraphEvent::CommitApplied(_, origin) => *origin,
            GraphEvent::CommitReverted(_, origin) => *origin,
            GraphEvent::CommitReapplied(_, origin) => *origin,
        }
    }

    /// The entities whose state this event changed. Empty for a version load, which replaces
    /// everything.
    pub fn touched_ids(&self) -> Vec<EntityId> {
        match self {
            GraphEvent::VersionLoaded(..) => Vec::new(),
            GraphEvent::CommitApplied(commit, _)
            | GraphEvent::CommitReverted(commit, _)
            | GraphEvent::CommitReapplied(commit, _) => commit.touched_ids().into_iter().collect(),
        }
    }
}

impl Display for GraphEvent {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            GraphEvent::VersionLoaded(v, _, _, _) => write!(f, "VersionLoaded({v})"),
            GraphEvent::CommitApplied(c, o) => write!(f, "CommitApplied({}, {o:?})", c.id),
            GraphEvent::CommitReverted(c, o) => write!(f, "CommitReverted({}, {o:?})", c.id),
            GraphEvent::CommitReapplied(c, o) => write!(f, "CommitReapplied({}, {o:?})", c.id),
        }
    }
}

/// Everything the presentation layer is told about.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    #[default]
    Ping,
    Graph(GraphEvent),
    /// A remote change overwrote a pending local edit.
    Conflict(SyncConflict),
    Hierarchy(HierarchyWarning),
    /// Local commit id, and the commit as the persistence service stored it.
    Persisted(CommitId, Commit),
    /// A change message addressed to a version other than the loaded one.
    ChangeDropped(ChangeMessage),
    /// Undo/redo entries forgotten because they no longer apply to the current state.
    HistoryDropped(Vec<CommitId>),
}
