//! Core error types.
//!
//! Errors fall into four families with different propagation rules:
//!
//! - [`ConfigError`]: bad definitions and unresolvable references. Always
//!   fatal, raised while building the tree or during `start`.
//! - [`LifecycleError`]: phases called out of order, use after teardown.
//!   Programming errors, always fatal.
//! - [`ResourceError`]: pool exhaustion and collisions. Fatal in the scope
//!   that detects them (an actor's `start`, or one activity run).
//! - [`ActivityError`]: failures while executing an activity. Contained to the
//!   run that raised them.

use thiserror::Error;
use tumult_stats::StatsError;

use crate::{name::QualifiedName, node::Phase};

/// Definition and reference errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No constructor registered for this qualified name.
    #[error("unknown node type {name}")]
    UnknownNodeType {
        /// The unresolved name.
        name: QualifiedName,
    },

    /// A required attribute is absent.
    #[error("<{element}>: missing attribute `{attribute}`")]
    MissingAttribute {
        /// Element local name.
        element: String,
        /// Attribute name.
        attribute: String,
    },

    /// An attribute could not be parsed.
    #[error("<{element}>: invalid attribute `{attribute}`={value:?}: {reason}")]
    InvalidAttribute {
        /// Element local name.
        element: String,
        /// Attribute name.
        attribute: String,
        /// Raw attribute value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A named reference does not resolve.
    #[error("unresolved {kind} reference: {name}")]
    Unresolved {
        /// What was referenced (activity, event, node, ...).
        kind: &'static str,
        /// The reference.
        name: String,
    },

    /// Two definitions claim the same name or slot.
    #[error("duplicate {kind}: {name}")]
    Duplicate {
        /// What was duplicated.
        kind: &'static str,
        /// The duplicated name.
        name: String,
    },

    /// Children of an element violate its structural rules.
    #[error("<{element}>: {reason}")]
    Structure {
        /// Element local name.
        element: String,
        /// Which rule was violated.
        reason: String,
    },

    /// An expression failed to parse.
    #[error("bad expression {source_text:?}: {reason}")]
    Expression {
        /// Expression text.
        source_text: String,
        /// Parse failure.
        reason: String,
    },

    /// Statistics configuration was rejected.
    #[error("statistics configuration: {0}")]
    Stats(#[from] StatsError),
}

/// Phase ordering and teardown errors.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A phase was requested for a node in the wrong state.
    #[error("{node}: cannot {requested}, node is {current:?}")]
    OutOfOrder {
        /// Node path.
        node: String,
        /// Requested phase operation.
        requested: &'static str,
        /// Phase the node is in.
        current: Phase,
    },

    /// The model was used after teardown.
    #[error("model has been torn down")]
    TornDown,

    /// The worker pool no longer accepts work.
    #[error("worker pool is closed")]
    PoolClosed,

    /// A worker pool was created outside a tokio runtime.
    #[error("no async runtime available")]
    NoRuntime,
}

/// Pool and addressing errors.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// Every instance of the actor is checked out.
    #[error("no free individual left in actor {actor}")]
    PoolExhausted {
        /// Actor id.
        actor: String,
    },

    /// Pool position beyond the free count.
    #[error("actor {actor}: free position {position} out of range (free: {free})")]
    PositionOutOfRange {
        /// Actor id.
        actor: String,
        /// Requested position.
        position: usize,
        /// Free individuals at the time.
        free: usize,
    },

    /// Returned instance was not checked out exclusively.
    #[error("instance {id} is not checked out")]
    NotCheckedOut {
        /// Instance id.
        id: String,
    },

    /// Instance does not belong to this population.
    #[error("instance {id} does not belong to actor {actor}")]
    ForeignInstance {
        /// Instance id.
        id: String,
        /// Actor id.
        actor: String,
    },

    /// Two instances claim the same address.
    #[error("address collision on {address}: {first} and {second}")]
    AddressCollision {
        /// Contested address.
        address: String,
        /// First claimant.
        first: String,
        /// Second claimant.
        second: String,
    },
}

/// Failures while executing an activity.
#[derive(Debug, Error)]
pub enum ActivityError {
    /// Variable lookup failed.
    #[error("unknown variable: {0}")]
    UnknownVariable(String),

    /// Operand of the wrong type.
    #[error("type error: {0}")]
    Type(String),

    /// Arithmetic failure (division by zero, overflow).
    #[error("arithmetic error: {0}")]
    Arithmetic(String),

    /// The simulation is terminating; waits are abandoned.
    #[error("simulation terminating")]
    Terminated,

    /// A jump escaped every enclosing sequence.
    #[error("jump target {0} is not reachable")]
    UnreachableJump(String),

    /// `Call` nesting went too deep.
    #[error("call depth limit {0} exceeded")]
    CallDepth(usize),

    /// A protocol-specific node failed.
    #[error("{node} failed: {reason}")]
    Node {
        /// Node type or label.
        node: String,
        /// Failure description.
        reason: String,
    },

    /// Reference that should have been resolved at start.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Pool error while allocating or releasing.
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Model used after teardown.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// Sample rejected by a bucket.
    #[error("sample rejected: {0}")]
    Stats(#[from] StatsError),
}

/// Top-level error of the runtime.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Definition or reference error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Phase ordering error.
    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Pool or addressing error.
    #[error("resource error: {0}")]
    Resource(#[from] ResourceError),

    /// Activity execution error.
    #[error("activity error: {0}")]
    Activity(#[from] ActivityError),

    /// Failure reported by an actor instance (connect, teardown, ...).
    #[error("actor {instance}: {reason}")]
    Instance {
        /// Instance id.
        instance: String,
        /// Failure description.
        reason: String,
    },
}

impl CoreError {
    /// Returns true if this error must abort the whole simulation.
    ///
    /// Activity and instance failures are contained to the run or instance that
    /// raised them; everything else aborts the run driver.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Config(_) | Self::Lifecycle(_) | Self::Resource(_) => true,
            Self::Activity(_) | Self::Instance { .. } => false,
        }
    }
}

impl From<CoreError> for ActivityError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Config(e) => Self::Config(e),
            CoreError::Lifecycle(e) => Self::Lifecycle(e),
            CoreError::Resource(e) => Self::Resource(e),
            CoreError::Activity(e) => e,
            CoreError::Instance { instance, reason } => Self::Node { node: instance, reason },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_fatal() {
        let err: CoreError = ConfigError::Unresolved { kind: "activity", name: "x".into() }.into();
        assert!(err.is_fatal());
    }

    #[test]
    fn activity_errors_are_contained() {
        let err: CoreError = ActivityError::Terminated.into();
        assert!(!err.is_fatal());
    }

    #[test]
    fn error_display() {
        let err = ConfigError::MissingAttribute { element: "Call".into(), attribute: "activity".into() };
        assert_eq!(err.to_string(), "<Call>: missing attribute `activity`");
    }
}
