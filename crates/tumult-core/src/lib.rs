//! Tumult simulation runtime.
//!
//! Executes a population of actors running scripted activities. The runtime is
//! protocol agnostic: protocol modules plug actor types and activity nodes into
//! a [`NodeRegistry`] and the core drives their lifecycle.
//!
//! ## Architecture
//!
//! ```text
//! tumult-core
//!   ├─ NodeTree        (typed node arena, Initialize → Start → Finalize)
//!   ├─ NodeRegistry    (qualified name → constructor)
//!   ├─ Model           (run-scoped registries, counters, terminating flag)
//!   ├─ EventRegistry   (named events, handler fan-out, trigger awaitables)
//!   ├─ Population      (actor instances and their free pool)
//!   ├─ WorkerPool      (runtime-owned task pool, drained on teardown)
//!   └─ Activity        (activity graph interpreter)
//! ```
//!
//! ## Phases
//!
//! A run builds a [`NodeTree`] from an [`Element`] definition, then drives
//! every node through [`NodeTree::initialize`], [`NodeTree::start`] and
//! [`NodeTree::finalize`], each exactly once and in traversal order.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod activity;
pub mod actor;
mod declare;
mod element;
pub mod env;
mod error;
pub mod event;
pub mod expr;
mod model;
mod name;
mod node;
mod registry;
#[cfg(test)]
mod testing;
mod tree;
mod value;
mod worker;

pub use activity::{Activity, ActivityNode, ActivityRun, Flow, ForkMode, ResolveScope, Sequence};
pub use actor::{
    ActorInstance, ActorType, EventBinding, EventSource, HandlerSink, InstanceFactory,
    InstanceHandle, InstanceLifecycle, Population,
};
pub use element::Element;
pub use env::Environment;
pub use error::{ActivityError, ConfigError, CoreError, LifecycleError, ResourceError};
pub use event::{Event, EventArgs, EventHandler, EventRegistry, EventWaiter, TriggerOutcome};
pub use expr::Expression;
pub use model::{Counters, Model, ModelConfig, NamedRegistry};
pub use name::{CORE_NAMESPACE, QualifiedName};
pub use node::{NodeContext, Phase, SimulationNode, Traversal, TraversalStrategy};
pub use registry::{ActivityConstructor, BuildContext, FactoryConstructor, NodeConstructor, NodeRegistry};
pub use tree::{NodeId, NodeTree};
pub use value::{ActivityObject, Value, Variables};
pub use worker::WorkerPool;
