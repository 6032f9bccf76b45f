//! Arena of simulation nodes and the phase driver.
//!
//! The tree is built once from an [`Element`] definition. Every node except
//! the root gets its parent at construction and keeps it; children stay in
//! definition order. Phases walk the arena in a caller-chosen
//! [`Traversal`] and each node moves through
//! `Constructed → Initialized → Started → Finalized` exactly once.

use std::{collections::VecDeque, fmt, sync::Arc};

use tracing::{debug, info, warn};

use crate::{
    element::Element,
    error::{ConfigError, CoreError, LifecycleError},
    model::Model,
    node::{NodeContext, Phase, SimulationNode, Traversal, TraversalStrategy},
    registry::NodeRegistry,
};

/// Index of a node in its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Position in the arena.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Slot {
    node: Arc<dyn SimulationNode>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    phase: Phase,
    path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PhaseOp {
    Initialize,
    Start,
    Finalize,
}

impl PhaseOp {
    fn name(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Start => "start",
            Self::Finalize => "finalize",
        }
    }

    fn required(self) -> Phase {
        match self {
            Self::Initialize => Phase::Constructed,
            Self::Start => Phase::Initialized,
            Self::Finalize => Phase::Started,
        }
    }

    fn reached(self) -> Phase {
        match self {
            Self::Initialize => Phase::Initialized,
            Self::Start => Phase::Started,
            Self::Finalize => Phase::Finalized,
        }
    }
}

/// The node tree of one simulation.
pub struct NodeTree {
    slots: Vec<Slot>,
    /// Nodes that completed `initialize`, in completion order.
    init_order: Vec<NodeId>,
}

impl NodeTree {
    /// Build the tree for `root`. Unknown element names and malformed
    /// definitions fail here, before any phase runs.
    pub fn build(root: &Element, registry: &NodeRegistry) -> Result<Self, ConfigError> {
        let mut tree = Self { slots: Vec::new(), init_order: Vec::new() };
        tree.insert(root, None, registry)?;
        debug!(nodes = tree.slots.len(), "node tree built");
        Ok(tree)
    }

    fn insert(
        &mut self,
        element: &Element,
        parent: Option<NodeId>,
        registry: &NodeRegistry,
    ) -> Result<NodeId, ConfigError> {
        let node = registry.build_node(element)?;
        let segment = match element.attr("id") {
            Some(id) => format!("{}[{id}]", element.local_name()),
            None => element.local_name().to_string(),
        };
        let path = match parent {
            Some(p) => format!("{}/{segment}", self.slots[p.0].path),
            None => format!("/{segment}"),
        };

        let id = NodeId(self.slots.len());
        let owns_subtree = node.owns_subtree();
        self.slots.push(Slot { node, parent, children: Vec::new(), phase: Phase::Constructed, path });
        if let Some(p) = parent {
            self.slots[p.0].children.push(id);
        }

        if !owns_subtree {
            for child in element.children() {
                self.insert(child, Some(id), registry)?;
            }
        }
        Ok(id)
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Always false: a built tree has a root.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The root node.
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Node at `id`.
    pub fn node(&self, id: NodeId) -> Option<&Arc<dyn SimulationNode>> {
        self.slots.get(id.0).map(|s| &s.node)
    }

    /// Parent of `id`; `None` for the root.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.slots.get(id.0).and_then(|s| s.parent)
    }

    /// Children of `id`, in definition order.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.slots.get(id.0).map_or(&[], |s| &s.children)
    }

    /// Current phase of `id`.
    pub fn phase(&self, id: NodeId) -> Option<Phase> {
        self.slots.get(id.0).map(|s| s.phase)
    }

    /// Path of `id`, such as `/Model/Actors/Actor[A]`.
    pub fn path(&self, id: NodeId) -> Option<&str> {
        self.slots.get(id.0).map(|s| s.path.as_str())
    }

    /// Node with the given path.
    pub fn find(&self, path: &str) -> Option<NodeId> {
        self.slots.iter().position(|s| s.path == path).map(NodeId)
    }

    /// Every node, in the order `traversal` visits them.
    pub fn order(&self, traversal: Traversal) -> Vec<NodeId> {
        if self.slots.is_empty() {
            return Vec::new();
        }
        match (traversal.strategy, traversal.parents_first) {
            (TraversalStrategy::BreadthFirst, parents_first) => {
                let mut order = Vec::with_capacity(self.slots.len());
                let mut queue = VecDeque::from([self.root()]);
                while let Some(id) = queue.pop_front() {
                    order.push(id);
                    queue.extend(self.children(id).iter().copied());
                }
                if !parents_first {
                    order.reverse();
                }
                order
            },
            (TraversalStrategy::DepthFirst, parents_first) => {
                let mut order = Vec::with_capacity(self.slots.len());
                self.depth_first(self.root(), parents_first, &mut order);
                order
            },
        }
    }

    fn depth_first(&self, id: NodeId, pre_order: bool, out: &mut Vec<NodeId>) {
        if pre_order {
            out.push(id);
        }
        for &child in self.children(id) {
            self.depth_first(child, pre_order, out);
        }
        if !pre_order {
            out.push(id);
        }
    }

    /// Phase 1. Aborts at the first failing node.
    pub async fn initialize(&mut self, model: &Arc<Model>, traversal: Traversal) -> Result<(), CoreError> {
        self.run_phase(model, traversal, PhaseOp::Initialize).await
    }

    /// Phase 2. Aborts at the first failing node.
    pub async fn start(&mut self, model: &Arc<Model>, traversal: Traversal) -> Result<(), CoreError> {
        self.run_phase(model, traversal, PhaseOp::Start).await
    }

    /// Phase 3. Every node is finalized even if some fail; the first error is
    /// returned.
    pub async fn finalize(&mut self, model: &Arc<Model>, traversal: Traversal) -> Result<(), CoreError> {
        self.run_phase(model, traversal, PhaseOp::Finalize).await
    }

    /// Finalize the nodes that completed `initialize` and were not finalized
    /// yet, in reverse completion order. Used after a failed `initialize` or
    /// `start`. Errors are logged and returned, never propagated.
    pub async fn finalize_initialized(&mut self, model: &Arc<Model>) -> Vec<CoreError> {
        let mut errors = Vec::new();
        let order: Vec<NodeId> = self.init_order.iter().rev().copied().collect();
        for id in order {
            let slot = &self.slots[id.0];
            if !matches!(slot.phase, Phase::Initialized | Phase::Started) {
                continue;
            }
            let node = Arc::clone(&slot.node);
            let path = slot.path.clone();
            let ctx = NodeContext { model, id, path: &path };
            let result = node.finalize(&ctx).await;
            self.slots[id.0].phase = Phase::Finalized;
            if let Err(e) = result {
                warn!(node = %path, error = %e, "finalize failed during cleanup");
                errors.push(e);
            }
        }
        errors
    }

    async fn run_phase(
        &mut self,
        model: &Arc<Model>,
        traversal: Traversal,
        op: PhaseOp,
    ) -> Result<(), CoreError> {
        let required = op.required();
        if let Some(slot) = self.slots.iter().find(|s| s.phase != required) {
            return Err(LifecycleError::OutOfOrder {
                node: slot.path.clone(),
                requested: op.name(),
                current: slot.phase,
            }
            .into());
        }

        info!(phase = op.name(), nodes = self.slots.len(), "phase begin");
        let mut first_error = None;
        for id in self.order(traversal) {
            let node = Arc::clone(&self.slots[id.0].node);
            let path = self.slots[id.0].path.clone();
            let ctx = NodeContext { model, id, path: &path };

            debug!(node = %path, phase = op.name(), "visiting");
            let result = match op {
                PhaseOp::Initialize => node.initialize(&ctx).await,
                PhaseOp::Start => node.start(&ctx).await,
                PhaseOp::Finalize => node.finalize(&ctx).await,
            };

            match result {
                Ok(()) => {
                    self.slots[id.0].phase = op.reached();
                    if op == PhaseOp::Initialize {
                        self.init_order.push(id);
                    }
                },
                Err(e) if op == PhaseOp::Finalize => {
                    self.slots[id.0].phase = Phase::Finalized;
                    warn!(node = %path, error = %e, "finalize failed");
                    first_error.get_or_insert(e);
                },
                Err(e) => {
                    warn!(node = %path, phase = op.name(), error = %e, "phase aborted");
                    return Err(e);
                },
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(phase = op.name(), "phase complete");
                Ok(())
            },
        }
    }
}
