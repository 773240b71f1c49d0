//! The delta engine: additions, removals and modifications between two independent artifact and
//! trace link collections.
//!
//! [`diff`] never touches a [`GraphStore`](crate::graph::GraphStore). Its [`DeltaPayload`] only
//! ever holds actual differences; an entity identical on both sides appears nowhere.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    commit::EntityOperation,
    properties::{Artifact, ArtifactId, EntityId, GraphSnapshot, TraceId, TraceLink},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifiedEntry<T> {
    pub old: T,
    pub new: T,
}

/// Differences for one entity family, keyed by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "K: Serialize, T: Serialize",
    deserialize = "K: Ord + Deserialize<'de>, T: Deserialize<'de>"
))]
pub struct EntityDelta<K: Ord, T> {
    #[serde(default)]
    pub added: BTreeMap<K, T>,
    #[serde(default)]
    pub removed: BTreeMap<K, T>,
    #[serde(default)]
    pub modified: BTreeMap<K, ModifiedEntry<T>>,
}

impl<K: Ord, T> Default for EntityDelta<K, T> {
    fn default() -> Self {
        EntityDelta {
            added: BTreeMap::new(),
            removed: BTreeMap::new(),
            modified: BTreeMap::new(),
        }
    }
}

impl<K: Ord, T> EntityDelta<K, T> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.modified.len()
    }

    pub fn ids(&self) -> impl Iterator<Item = &K> {
        self.added
            .keys()
            .chain(self.removed.keys())
            .chain(self.modified.keys())
    }
}

/// Classify two keyed collections. When a side lists the same id twice the later entry wins.
fn diff_entities<K, T, B, G>(base: B, target: G) -> EntityDelta<K, T>
where
    K: Ord + Clone,
    T: Clone + PartialEq,
    B: IntoIterator<Item = (K, T)>,
    G: IntoIterator<Item = (K, T)>,
{
    let mut base = base.into_iter().collect::<BTreeMap<K, T>>();
    let mut delta = EntityDelta::default();
    for (id, new) in target {
        match base.remove(&id) {
            None => {
                delta.added.insert(id, new);
            }
            Some(old) if old != new => {
                delta.modified.insert(id, ModifiedEntry { old, new });
            }
            Some(_) => {}
        }
    }
    delta.removed = base;
    delta
}

/// Which compared collection a dangling trace link belongs to.
///
/// `Target` entries are the integrity problems the delta would carry forward. `Base` entries
/// describe the state being compared from; a base trace link may also be listed in `removed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeltaSide {
    Base,
    Target,
}

/// A trace link whose endpoint is absent from the artifacts of the same side.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingArtifact {
    pub side: DeltaSide,
    pub trace_id: TraceId,
    pub artifact_id: ArtifactId,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaPayload {
    #[serde(default)]
    pub artifacts: EntityDelta<ArtifactId, Artifact>,
    #[serde(default)]
    pub trace_links: EntityDelta<TraceId, TraceLink>,
    #[serde(default)]
    pub missing_artifacts: Vec<MissingArtifact>,
}

impl DeltaPayload {
    /// True when the two sides are identical. Missing artifacts alone do not make a payload
    /// non-empty; they describe the sides, not their difference.
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty() && self.trace_links.is_empty()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len() + self.trace_links.len()
    }

    pub fn entity_ids(&self) -> BTreeSet<EntityId> {
        self.artifacts
            .ids()
            .cloned()
            .map(EntityId::Artifact)
            .chain(self.trace_links.ids().cloned().map(EntityId::TraceLink))
            .collect()
    }

    /// The batch that turns `base` into `target`.
    ///
    /// Trace deletions come first so removed artifacts are unreferenced, and updates precede
    /// creations so a rename or re-pointed trace frees its old name or endpoint pair before a
    /// new entity claims it.
    pub fn to_operations(&self) -> Vec<EntityOperation> {
        let mut ops = Vec::with_capacity(self.len());
        ops.extend(
            self.trace_links
                .removed
                .keys()
                .cloned()
                .map(EntityOperation::DeleteTraceLink),
        );
        ops.extend(
            self.artifacts
                .removed
                .keys()
                .cloned()
                .map(EntityOperation::DeleteArtifact),
        );
        ops.extend(
            self.artifacts
                .modified
                .values()
                .map(|entry| EntityOperation::UpdateArtifact(entry.new.clone())),
        );
        ops.extend(
            self.artifacts
                .added
                .values()
                .cloned()
                .map(EntityOperation::CreateArtifact),
        );
        ops.extend(
            self.trace_links
                .modified
                .values()
                .map(|entry| EntityOperation::UpdateTraceLink(entry.new.clone())),
        );
        ops.extend(
            self.trace_links
                .added
                .values()
                .cloned()
                .map(EntityOperation::CreateTraceLink),
        );
        ops
    }
}

/// Compare two artifact/trace link collections.
pub fn diff<'a, BA, BT, TA, TT>(
    base_artifacts: BA,
    base_traces: BT,
    target_artifacts: TA,
    target_traces: TT,
) -> DeltaPayload
where
    BA: IntoIterator<Item = &'a Artifact>,
    BT: IntoIterator<Item = &'a TraceLink>,
    TA: IntoIterator<Item = &'a Artifact>,
    TT: IntoIterator<Item = &'a TraceLink>,
{
    let base_artifacts = keyed_artifacts(base_artifacts);
    let target_artifacts = keyed_artifacts(target_artifacts);
    let base_traces = keyed_traces(base_traces);
    let target_traces = keyed_traces(target_traces);

    let mut missing = Vec::new();
    for (side, artifacts, traces) in [
        (DeltaSide::Base, &base_artifacts, &base_traces),
        (DeltaSide::Target, &target_artifacts, &target_traces),
    ] {
        for trace in traces.values() {
            for endpoint in [&trace.source_id, &trace.target_id] {
                if !artifacts.contains_key(endpoint) {
                    missing.push(MissingArtifact {
                        side,
                        trace_id: trace.id.clone(),
                        artifact_id: endpoint.clone(),
                    });
                }
            }
        }
    }
    if !missing.is_empty() {
        tracing::warn!("Diff found {} dangling trace link endpoints", missing.len());
    }

    let payload = DeltaPayload {
        artifacts: diff_entities(base_artifacts, target_artifacts),
        trace_links: diff_entities(base_traces, target_traces),
        missing_artifacts: missing,
    };
    tracing::debug!(
        "Diff: artifacts +{} -{} ~{}, trace links +{} -{} ~{}",
        payload.artifacts.added.len(),
        payload.artifacts.removed.len(),
        payload.artifacts.modified.len(),
        payload.trace_links.added.len(),
        payload.trace_links.removed.len(),
        payload.trace_links.modified.len()
    );
    payload
}

pub fn diff_snapshots(base: &GraphSnapshot, target: &GraphSnapshot) -> DeltaPayload {
    diff(
        &base.artifacts,
        &base.trace_links,
        &target.artifacts,
        &target.trace_links,
    )
}

fn keyed_artifacts<'a, I>(artifacts: I) -> BTreeMap<ArtifactId, Artifact>
where
    I: IntoIterator<Item = &'a Artifact>,
{
    artifacts
        .into_iter()
        .map(|a| (a.id.clone(), a.clone()))
        .collect()
}

fn keyed_traces<'a, I>(traces: I) -> BTreeMap<TraceId, TraceLink>
where
    I: IntoIterator<Item = &'a TraceLink>,
{
    traces
        .into_iter()
        .map(|t| (t.id.clone(), t.clone()))
        .collect()
}
