//! Tree node contract and traversal configuration.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{error::CoreError, model::Model, name::QualifiedName, tree::NodeId};

/// Lifecycle phase of a tree node. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Built from its definition, nothing run yet.
    Constructed,
    /// `initialize` completed.
    Initialized,
    /// `start` completed.
    Started,
    /// `finalize` ran (successfully or not).
    Finalized,
}

/// What a node sees while one of its phases runs.
#[derive(Clone, Copy)]
pub struct NodeContext<'a> {
    /// The run's model.
    pub model: &'a Arc<Model>,
    /// The node's slot in the tree.
    pub id: NodeId,
    /// Human readable path, for logs and errors.
    pub path: &'a str,
}

/// A typed element of the simulation tree.
///
/// Each phase is invoked exactly once per node by [`crate::NodeTree`], in the
/// traversal order the caller picked. The default phase implementations do
/// nothing, so passive nodes (containers, declarations) only override what they
/// need.
#[async_trait]
pub trait SimulationNode: Send + Sync + 'static {
    /// Registry key of this node's type.
    fn type_name(&self) -> &QualifiedName;

    /// True if the node parsed its child elements itself. The tree does not
    /// build tree nodes for the children of such a node.
    fn owns_subtree(&self) -> bool {
        false
    }

    /// Phase 1.
    async fn initialize(&self, ctx: &NodeContext<'_>) -> Result<(), CoreError> {
        let _ = ctx;
        Ok(())
    }

    /// Phase 2.
    async fn start(&self, ctx: &NodeContext<'_>) -> Result<(), CoreError> {
        let _ = ctx;
        Ok(())
    }

    /// Phase 3.
    async fn finalize(&self, ctx: &NodeContext<'_>) -> Result<(), CoreError> {
        let _ = ctx;
        Ok(())
    }
}

/// Tree walk strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraversalStrategy {
    /// Level by level.
    #[default]
    BreadthFirst,
    /// Subtree by subtree.
    DepthFirst,
}

/// Order in which a phase visits the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Traversal {
    /// Walk strategy.
    pub strategy: TraversalStrategy,
    /// Visit a parent before its children.
    pub parents_first: bool,
}

impl Traversal {
    /// Breadth-first, parents before children.
    pub const BREADTH_FIRST: Self =
        Self { strategy: TraversalStrategy::BreadthFirst, parents_first: true };

    /// Depth-first pre-order.
    pub const DEPTH_FIRST: Self = Self { strategy: TraversalStrategy::DepthFirst, parents_first: true };

    /// Same strategy, children before parents.
    #[must_use]
    pub fn children_first(self) -> Self {
        Self { parents_first: false, ..self }
    }
}

impl Default for Traversal {
    fn default() -> Self {
        Self::BREADTH_FIRST
    }
}
