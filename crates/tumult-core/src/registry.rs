//! Explicit registry of pluggable node types.
//!
//! Protocol modules call their own `register(&mut NodeRegistry)` at startup;
//! the registry maps each qualified name to a constructor. There is no runtime
//! type discovery: an element whose name was never registered is a
//! configuration error at build time.

use std::{collections::HashMap, sync::Arc};

use crate::{
    activity::{self, ActivityNode, Sequence},
    actor::{ActorType, InstanceFactory},
    declare,
    element::Element,
    error::ConfigError,
    name::QualifiedName,
    node::SimulationNode,
};

/// Builds a tree node from its element.
pub type NodeConstructor = Arc<
    dyn Fn(&Element, &BuildContext<'_>) -> Result<Arc<dyn SimulationNode>, ConfigError> + Send + Sync,
>;

/// Builds an activity node from its element.
pub type ActivityConstructor = Arc<
    dyn Fn(&Element, &BuildContext<'_>) -> Result<Box<dyn ActivityNode>, ConfigError> + Send + Sync,
>;

/// Builds the instance factory of an actor type from the actor element.
pub type FactoryConstructor =
    Arc<dyn Fn(&Element) -> Result<Arc<dyn InstanceFactory>, ConfigError> + Send + Sync>;

/// Qualified name to constructor mapping.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    nodes: HashMap<QualifiedName, NodeConstructor>,
    activities: HashMap<QualifiedName, ActivityConstructor>,
}

impl NodeRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every node type of the core namespace.
    pub fn with_core() -> Self {
        let mut registry = Self::new();
        declare::register(&mut registry);
        activity::register(&mut registry);
        registry
    }

    /// Register a tree node type.
    pub fn register_node<F>(&mut self, name: QualifiedName, constructor: F) -> Result<(), ConfigError>
    where
        F: Fn(&Element, &BuildContext<'_>) -> Result<Arc<dyn SimulationNode>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        if self.nodes.contains_key(&name) {
            return Err(ConfigError::Duplicate { kind: "node type", name: name.to_string() });
        }
        self.insert_node(name, constructor);
        Ok(())
    }

    /// Register an activity node type.
    pub fn register_activity_node<F>(
        &mut self,
        name: QualifiedName,
        constructor: F,
    ) -> Result<(), ConfigError>
    where
        F: Fn(&Element, &BuildContext<'_>) -> Result<Box<dyn ActivityNode>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        if self.activities.contains_key(&name) {
            return Err(ConfigError::Duplicate { kind: "activity node type", name: name.to_string() });
        }
        self.insert_activity_node(name, constructor);
        Ok(())
    }

    /// Register an actor type. The element's `id`, `count` and `<On>` children
    /// are handled by the core; `factory` builds the protocol-specific part.
    pub fn register_actor(
        &mut self,
        name: QualifiedName,
        factory: FactoryConstructor,
    ) -> Result<(), ConfigError> {
        self.register_node(name, move |element, _ctx| {
            let instances = factory(element)?;
            Ok(Arc::new(ActorType::from_element(element, instances)?) as Arc<dyn SimulationNode>)
        })
    }

    /// True if a tree node type is registered under `name`.
    pub fn has_node(&self, name: &QualifiedName) -> bool {
        self.nodes.contains_key(name)
    }

    /// True if an activity node type is registered under `name`.
    pub fn has_activity_node(&self, name: &QualifiedName) -> bool {
        self.activities.contains_key(name)
    }

    /// Build the tree node for `element`.
    pub fn build_node(&self, element: &Element) -> Result<Arc<dyn SimulationNode>, ConfigError> {
        let constructor = self
            .nodes
            .get(element.name())
            .ok_or_else(|| ConfigError::UnknownNodeType { name: element.name().clone() })?;
        constructor(element, &BuildContext { registry: self })
    }

    /// Build the activity node for `element`.
    pub fn build_activity_node(&self, element: &Element) -> Result<Box<dyn ActivityNode>, ConfigError> {
        let constructor = self
            .activities
            .get(element.name())
            .ok_or_else(|| ConfigError::UnknownNodeType { name: element.name().clone() })?;
        constructor(element, &BuildContext { registry: self })
    }

    pub(crate) fn insert_node<F>(&mut self, name: QualifiedName, constructor: F)
    where
        F: Fn(&Element, &BuildContext<'_>) -> Result<Arc<dyn SimulationNode>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        self.nodes.insert(name, Arc::new(constructor));
    }

    pub(crate) fn insert_activity_node<F>(&mut self, name: QualifiedName, constructor: F)
    where
        F: Fn(&Element, &BuildContext<'_>) -> Result<Box<dyn ActivityNode>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        self.activities.insert(name, Arc::new(constructor));
    }
}

/// Handed to constructors so composite nodes can build their children.
#[derive(Clone, Copy)]
pub struct BuildContext<'a> {
    registry: &'a NodeRegistry,
}

impl<'a> BuildContext<'a> {
    /// The registry being built from.
    pub fn registry(&self) -> &'a NodeRegistry {
        self.registry
    }

    /// Build one activity node.
    pub fn parse_activity_node(&self, element: &Element) -> Result<Box<dyn ActivityNode>, ConfigError> {
        self.registry.build_activity_node(element)
    }

    /// Build a sequence from consecutive activity elements. Elements carrying
    /// an `id` become jump targets.
    pub fn parse_sequence(&self, elements: &[Element]) -> Result<Sequence, ConfigError> {
        let mut sequence = Sequence::new();
        for element in elements {
            let node = self.parse_activity_node(element)?;
            sequence.push(element.attr("id").map(str::to_string), node)?;
        }
        Ok(sequence)
    }
}
