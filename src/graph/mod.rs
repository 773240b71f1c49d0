//! Graph module: the canonical entity store of the loaded version and the hierarchy index
//! derived from it.
//!
//! # Module Organization
//!
//! - [`store`]: [`GraphStore`], the only owner of artifacts and trace links, and its atomic
//!   batch application
//! - [`subtree`]: [`SubtreeIndex`], parents/children/subtree/supertree/neighbors per artifact
//!
//! ```rust
//! use tracegraph_core::graph::{GraphStore, SubtreeIndex};
//! ```

pub mod store;
pub mod subtree;

#[cfg(test)]
mod tests;

pub use store::{AppliedResult, GraphStore, PriorState};
pub use subtree::{
    get_matching_children, rebuild, HierarchyEdges, HierarchyReport, HierarchyWarning,
    SubtreeIndex, SubtreeItem, SubtreeMap,
};
