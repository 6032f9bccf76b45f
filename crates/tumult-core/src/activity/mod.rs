//! Activity graph interpreter.
//!
//! An [`Activity`] is a top-level [`Sequence`] whose first node is `Start`.
//! A run walks the sequence node by node: each node returns [`Flow::Next`] to
//! continue structurally or [`Flow::Jump`] to redirect execution to a
//! labelled node. A jump is handled by the innermost enclosing sequence that
//! holds the label, so a `GoTo` inside a `While` body leaves the loop. Jump
//! targets and called activities are resolved once at `start`, so a run never
//! meets an unknown name.
//!
//! Within one run nodes execute strictly in sequence. The only suspension
//! points are event waits, delays and whatever protocol nodes await; every
//! wait also watches the model's terminating flag.

mod action;
mod control;
mod trigger;

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tracing::debug;

pub use self::trigger::ForkMode;
use crate::{
    element::Element,
    error::{ActivityError, ConfigError, CoreError},
    expr::Expression,
    model::Model,
    name::QualifiedName,
    node::{NodeContext, SimulationNode},
    registry::{BuildContext, NodeRegistry},
    value::{Value, Variables},
};

/// Maximum nesting of `Call` nodes within one run.
pub const MAX_CALL_DEPTH: usize = 64;

/// What to execute after a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    /// The structural next node.
    Next,
    /// The node labelled with this id, in this or an enclosing sequence.
    Jump(String),
}

/// An executable step of an activity.
#[async_trait]
pub trait ActivityNode: Send + Sync + 'static {
    /// Registry key of this node's type.
    fn type_name(&self) -> &QualifiedName;

    /// Check references against the running model. Called once, at `start`.
    fn resolve(&self, scope: &ResolveScope<'_>) -> Result<(), ConfigError> {
        let _ = scope;
        Ok(())
    }

    /// Execute once.
    async fn execute(&self, run: &mut ActivityRun) -> Result<Flow, ActivityError>;
}

/// Lexical view used while resolving: the labels of the sequence being
/// resolved and of every sequence around it.
pub struct ResolveScope<'a> {
    model: &'a Model,
    labels: &'a HashMap<String, usize>,
    parent: Option<&'a ResolveScope<'a>>,
}

impl<'a> ResolveScope<'a> {
    /// The running model.
    pub fn model(&self) -> &'a Model {
        self.model
    }

    /// True if `label` names a node of this or an enclosing sequence.
    pub fn label_visible(&self, label: &str) -> bool {
        self.labels.contains_key(label) || self.parent.is_some_and(|p| p.label_visible(label))
    }
}

/// Ordered activity nodes with a label index.
#[derive(Default)]
pub struct Sequence {
    nodes: Vec<Box<dyn ActivityNode>>,
    labels: HashMap<String, usize>,
}

impl Sequence {
    /// Empty sequence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node, optionally labelled.
    pub fn push(&mut self, label: Option<String>, node: Box<dyn ActivityNode>) -> Result<(), ConfigError> {
        if let Some(label) = label {
            if self.labels.contains_key(&label) {
                return Err(ConfigError::Duplicate { kind: "node label", name: label });
            }
            self.labels.insert(label, self.nodes.len());
        }
        self.nodes.push(node);
        Ok(())
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if there are no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node at `position`.
    pub fn node(&self, position: usize) -> Option<&dyn ActivityNode> {
        self.nodes.get(position).map(AsRef::as_ref)
    }

    /// Position of the node labelled `label`.
    pub fn position(&self, label: &str) -> Option<usize> {
        self.labels.get(label).copied()
    }

    /// Resolve every node, nested sequences included.
    pub fn resolve(&self, model: &Model, parent: Option<&ResolveScope<'_>>) -> Result<(), ConfigError> {
        let scope = ResolveScope { model, labels: &self.labels, parent };
        self.nodes.iter().try_for_each(|node| node.resolve(&scope))
    }

    /// Execute from the first node. Returns `Flow::Jump` if a jump targets a
    /// label this sequence does not hold.
    pub async fn execute(&self, run: &mut ActivityRun) -> Result<Flow, ActivityError> {
        let mut position = 0;
        while let Some(node) = self.nodes.get(position) {
            match node.execute(run).await? {
                Flow::Next => position += 1,
                Flow::Jump(label) => match self.labels.get(&label) {
                    Some(&target) => position = target,
                    None => return Ok(Flow::Jump(label)),
                },
            }
        }
        Ok(Flow::Next)
    }
}

/// State of one activity run.
pub struct ActivityRun {
    model: Arc<Model>,
    activity: String,
    variables: Variables,
    depth: usize,
}

impl ActivityRun {
    /// A run of `activity` with the given scope.
    pub fn new(model: Arc<Model>, activity: &str, variables: Variables) -> Self {
        Self { model, activity: activity.to_string(), variables, depth: 0 }
    }

    /// The running model.
    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// Id of the activity currently executing (the callee inside a `Call`).
    pub fn activity(&self) -> &str {
        &self.activity
    }

    /// Current `Call` nesting.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Variable scope.
    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    /// Mutable variable scope.
    pub fn variables_mut(&mut self) -> &mut Variables {
        &mut self.variables
    }

    /// Consume the run, keeping its variables.
    pub fn into_variables(self) -> Variables {
        self.variables
    }

    /// Evaluate an expression in the current scope.
    pub fn eval(&self, expression: &Expression) -> Result<Value, ActivityError> {
        expression.eval(&self.variables)
    }

    /// Evaluate a condition in the current scope.
    pub fn eval_bool(&self, expression: &Expression) -> Result<bool, ActivityError> {
        expression.eval_bool(&self.variables)
    }
}

/// A named activity.
pub struct Activity {
    id: String,
    body: Sequence,
}

impl Activity {
    /// Wrap a body. The body must start with its only `Start` node.
    pub fn new(id: impl Into<String>, body: Sequence) -> Result<Self, ConfigError> {
        let id = id.into();
        let structure = |reason: &str| ConfigError::Structure {
            element: format!("Activity[{id}]"),
            reason: reason.to_string(),
        };
        if !body.node(0).is_some_and(|n| n.type_name().is_core("Start")) {
            return Err(structure("first node must be <Start>"));
        }
        if body.nodes.iter().skip(1).any(|n| n.type_name().is_core("Start")) {
            return Err(structure("more than one <Start>"));
        }
        Ok(Self { id, body })
    }

    /// Build from `<Activity id="...">`.
    pub fn from_element(element: &Element, ctx: &BuildContext<'_>) -> Result<Self, ConfigError> {
        let id = element.required_attr("id")?;
        Self::new(id, ctx.parse_sequence(element.children())?)
    }

    /// Activity id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Top-level sequence.
    pub fn body(&self) -> &Sequence {
        &self.body
    }

    /// Resolve jump targets and references.
    pub fn resolve(&self, model: &Model) -> Result<(), ConfigError> {
        self.body.resolve(model, None)
    }

    /// Execute to completion with `variables` and return the final scope.
    pub async fn run(&self, model: Arc<Model>, variables: Variables) -> Result<Variables, ActivityError> {
        let mut run = ActivityRun::new(model, &self.id, variables);
        debug!(activity = %self.id, "run begin");
        self.execute_body(&mut run).await?;
        debug!(activity = %self.id, "run complete");
        Ok(run.into_variables())
    }

    /// Execute inside an existing run, sharing its variables.
    pub async fn call(&self, run: &mut ActivityRun) -> Result<(), ActivityError> {
        if run.depth >= MAX_CALL_DEPTH {
            return Err(ActivityError::CallDepth(MAX_CALL_DEPTH));
        }
        let caller = std::mem::replace(&mut run.activity, self.id.clone());
        run.depth += 1;
        let result = self.execute_body(run).await;
        run.depth -= 1;
        run.activity = caller;
        result
    }

    async fn execute_body(&self, run: &mut ActivityRun) -> Result<(), ActivityError> {
        match self.body.execute(run).await? {
            Flow::Next => Ok(()),
            Flow::Jump(label) => Err(ActivityError::UnreachableJump(label)),
        }
    }
}

/// `<Activity id>` tree node: registers its activity at `initialize` and
/// resolves it at `start`.
struct ActivityDefinition {
    name: QualifiedName,
    activity: Arc<Activity>,
}

#[async_trait]
impl SimulationNode for ActivityDefinition {
    fn type_name(&self) -> &QualifiedName {
        &self.name
    }

    fn owns_subtree(&self) -> bool {
        true
    }

    async fn initialize(&self, ctx: &NodeContext<'_>) -> Result<(), CoreError> {
        ctx.model.register_activity(Arc::clone(&self.activity))
    }

    async fn start(&self, ctx: &NodeContext<'_>) -> Result<(), CoreError> {
        self.activity.resolve(ctx.model)?;
        Ok(())
    }
}

/// Register `<Activity>` and every core activity node.
pub(crate) fn register(registry: &mut NodeRegistry) {
    registry.insert_node(QualifiedName::core("Activity"), |element, ctx| {
        Ok(Arc::new(ActivityDefinition {
            name: element.name().clone(),
            activity: Arc::new(Activity::from_element(element, ctx)?),
        }) as Arc<dyn SimulationNode>)
    });
    control::register(registry);
    trigger::register(registry);
    action::register(registry);
}

/// Shorthand used by node constructors.
pub(crate) fn boxed<N: ActivityNode>(node: N) -> Box<dyn ActivityNode> {
    Box::new(node)
}
