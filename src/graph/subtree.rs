//! The subtree index: per-artifact parents, children, subtree, supertree and neighbors derived
//! from the `parent_ids` hierarchy edges.
//!
//! The index is a pure function of the store's hierarchy edges. [`rebuild`] computes it from a
//! read-only [`HierarchyEdges`] snapshot so it can run away from the owning context; results are
//! keyed and ordered by artifact id.

use petgraph::{algo::kosaraju_scc, graph::NodeIndex, Direction, Graph};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    config::RebuildStrategy,
    error::TraceGraphError,
    properties::{Artifact, ArtifactId},
};

use super::GraphStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtreeItem {
    /// Direct predecessors by hierarchy edge.
    pub parents: BTreeSet<ArtifactId>,
    /// Direct successors by hierarchy edge.
    pub children: BTreeSet<ArtifactId>,
    /// Transitive closure of children, the artifact itself excluded.
    pub subtree: BTreeSet<ArtifactId>,
    /// Transitive closure of parents, the artifact itself excluded.
    pub supertree: BTreeSet<ArtifactId>,
    /// `subtree` ∪ `supertree`.
    pub neighbors: BTreeSet<ArtifactId>,
}

pub type SubtreeMap = BTreeMap<ArtifactId, SubtreeItem>;

/// Non-fatal findings of a rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HierarchyWarning {
    /// The `parent_ids` of these artifacts form a loop.
    CycleDetected { members: Vec<ArtifactId> },
    /// `child` names a parent that is not in the graph. The edge is ignored.
    UnknownParent { child: ArtifactId, parent: ArtifactId },
}

impl HierarchyWarning {
    /// The warning in error form, for surfacing to the presentation layer.
    pub fn as_error(&self) -> Option<TraceGraphError> {
        match self {
            HierarchyWarning::CycleDetected { members } => Some(TraceGraphError::CycleDetected(
                members.iter().map(|id| id.to_string()).collect(),
            )),
            HierarchyWarning::UnknownParent { .. } => None,
        }
    }
}

/// Read-only copy of the hierarchy: each artifact id with its ordered parent ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HierarchyEdges {
    pub nodes: Vec<(ArtifactId, Vec<ArtifactId>)>,
}

impl HierarchyEdges {
    pub fn from_artifacts<'a, I: IntoIterator<Item = &'a Artifact>>(artifacts: I) -> Self {
        HierarchyEdges {
            nodes: artifacts
                .into_iter()
                .map(|a| (a.id.clone(), a.parent_ids.clone()))
                .collect(),
        }
    }

    pub fn from_store(store: &GraphStore) -> Self {
        HierarchyEdges::from_artifacts(store.list_artifacts())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HierarchyReport {
    pub map: SubtreeMap,
    pub warnings: Vec<HierarchyWarning>,
}

/// Compute the full subtree map.
///
/// Reachability is memoized per strongly connected component: components arrive in reverse
/// topological order, so every child component is finished before its parents and shared
/// sub-structure is only walked once. Components with more than one member (or a self parent)
/// are cycles; they are reported and their members reach each other exactly once.
pub fn rebuild(edges: &HierarchyEdges) -> HierarchyReport {
    let mut graph = Graph::<ArtifactId, ()>::new();
    let mut id_to_index = BTreeMap::<ArtifactId, NodeIndex>::new();
    let mut warnings = Vec::new();

    for (id, _) in edges.nodes.iter() {
        if !id_to_index.contains_key(id) {
            id_to_index.insert(id.clone(), graph.add_node(id.clone()));
        }
    }
    for (child, parents) in edges.nodes.iter() {
        let child_idx = id_to_index[child];
        for parent in parents {
            match id_to_index.get(parent) {
                Some(parent_idx) => {
                    graph.update_edge(*parent_idx, child_idx, ());
                }
                None => {
                    tracing::debug!("Artifact {child} names unknown parent {parent}");
                    warnings.push(HierarchyWarning::UnknownParent {
                        child: child.clone(),
                        parent: parent.clone(),
                    });
                }
            }
        }
    }

    let sccs = kosaraju_scc(&graph);
    let mut component_of = vec![0usize; graph.node_count()];
    let mut cyclic = vec![false; sccs.len()];
    for (ci, scc) in sccs.iter().enumerate() {
        for node in scc {
            component_of[node.index()] = ci;
        }
        cyclic[ci] = scc.len() > 1 || graph.contains_edge(scc[0], scc[0]);
        if cyclic[ci] {
            let mut members = scc.iter().map(|n| graph[*n].clone()).collect::<Vec<_>>();
            members.sort();
            tracing::warn!(
                "Hierarchy cycle detected through {} artifacts: {members:?}",
                members.len()
            );
            warnings.push(HierarchyWarning::CycleDetected { members });
        }
    }

    let reach = |direction: Direction, order: Vec<usize>| {
        let mut memo: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); sccs.len()];
        for ci in order {
            let mut acc = BTreeSet::new();
            if cyclic[ci] {
                acc.extend(sccs[ci].iter().map(|n| n.index()));
            }
            for node in sccs[ci].iter() {
                for next in graph.neighbors_directed(*node, direction) {
                    let cj = component_of[next.index()];
                    if cj != ci {
                        acc.insert(next.index());
                        acc.extend(memo[cj].iter().copied());
                    }
                }
            }
            memo[ci] = acc;
        }
        memo
    };
    let down = reach(Direction::Outgoing, (0..sccs.len()).collect());
    let up = reach(Direction::Incoming, (0..sccs.len()).rev().collect());

    let ids_of = |set: &BTreeSet<usize>, exclude: usize| {
        set.iter()
            .filter(|i| **i != exclude)
            .map(|i| graph[NodeIndex::new(*i)].clone())
            .collect::<BTreeSet<_>>()
    };

    let mut map = SubtreeMap::new();
    for node in graph.node_indices() {
        let i = node.index();
        let ci = component_of[i];
        let subtree = ids_of(&down[ci], i);
        let supertree = ids_of(&up[ci], i);
        let neighbors = subtree.union(&supertree).cloned().collect();
        let parents = graph
            .neighbors_directed(node, Direction::Incoming)
            .filter(|n| *n != node)
            .map(|n| graph[n].clone())
            .collect();
        let children = graph
            .neighbors_directed(node, Direction::Outgoing)
            .filter(|n| *n != node)
            .map(|n| graph[n].clone())
            .collect();
        map.insert(
            graph[node].clone(),
            SubtreeItem {
                parents,
                children,
                subtree,
                supertree,
                neighbors,
            },
        );
    }
    HierarchyReport { map, warnings }
}

/// For each of `parent_ids`, the union of that parent's subtree entries whose type is in
/// `included_types`. Shared descendants appear once. An empty `included_types` matches nothing.
pub fn get_matching_children(
    map: &SubtreeMap,
    store: &GraphStore,
    parent_ids: &[ArtifactId],
    included_types: &[String],
) -> BTreeSet<ArtifactId> {
    if included_types.is_empty() {
        return BTreeSet::new();
    }
    parent_ids
        .iter()
        .filter_map(|parent| map.get(parent))
        .flat_map(|item| item.subtree.iter())
        .filter(|id| {
            store
                .get_artifact(id.as_str())
                .map(|a| included_types.contains(&a.artifact_type))
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}

/// Cached [`SubtreeMap`] for the loaded version.
///
/// Mutations call [`SubtreeIndex::invalidate`]. Under [`RebuildStrategy::Eager`] that rebuilds
/// immediately; under [`RebuildStrategy::Lazy`] it only marks the cache dirty and the next read
/// rebuilds. Both produce the same map.
#[derive(Debug, Clone)]
pub struct SubtreeIndex {
    map: SubtreeMap,
    warnings: Vec<HierarchyWarning>,
    dirty: bool,
    strategy: RebuildStrategy,
}

impl Default for SubtreeIndex {
    fn default() -> Self {
        SubtreeIndex::new(RebuildStrategy::default())
    }
}

impl SubtreeIndex {
    pub fn new(strategy: RebuildStrategy) -> SubtreeIndex {
        SubtreeIndex {
            map: SubtreeMap::new(),
            warnings: Vec::new(),
            dirty: true,
            strategy,
        }
    }

    pub fn strategy(&self) -> RebuildStrategy {
        self.strategy
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn invalidate(&mut self, store: &GraphStore) {
        match self.strategy {
            RebuildStrategy::Eager => self.rebuild_from(store),
            RebuildStrategy::Lazy => self.dirty = true,
        }
    }

    /// Mark dirty without consulting the strategy.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn rebuild_from(&mut self, store: &GraphStore) {
        self.install(rebuild(&HierarchyEdges::from_store(store)));
    }

    pub fn install(&mut self, report: HierarchyReport) {
        self.map = report.map;
        self.warnings = report.warnings;
        self.dirty = false;
    }

    fn ensure_fresh(&mut self, store: &GraphStore) {
        if self.dirty {
            self.rebuild_from(store);
        }
    }

    /// The up-to-date map, rebuilding first if needed.
    pub fn map(&mut self, store: &GraphStore) -> &SubtreeMap {
        self.ensure_fresh(store);
        &self.map
    }

    /// The cached map, or `None` while it is invalid.
    pub fn cached(&self) -> Option<&SubtreeMap> {
        if self.dirty {
            None
        } else {
            Some(&self.map)
        }
    }

    pub fn get(&mut self, store: &GraphStore, id: &str) -> Option<&SubtreeItem> {
        self.ensure_fresh(store);
        self.map.get(id)
    }

    pub fn warnings(&mut self, store: &GraphStore) -> &[HierarchyWarning] {
        self.ensure_fresh(store);
        &self.warnings
    }

    pub fn get_matching_children(
        &mut self,
        store: &GraphStore,
        parent_ids: &[ArtifactId],
        included_types: &[String],
    ) -> BTreeSet<ArtifactId> {
        if included_types.is_empty() {
            return BTreeSet::new();
        }
        self.ensure_fresh(store);
        get_matching_children(&self.map, store, parent_ids, included_types)
    }
}
