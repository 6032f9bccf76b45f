//! Event waits: `Triggered` and `Fork`.
//!
//! A `Fork` groups `Triggered` branches. Every branch subscribes before the
//! fork parks, so no trigger between subscriptions is lost. In
//! [`ForkMode::First`] the first event to fire selects the branch that runs
//! and the other waits are dropped. In [`ForkMode::All`] every branch runs
//! once, in firing order, and the fork completes after the last one.

use std::{fmt, str::FromStr, sync::Arc};

use async_trait::async_trait;
use futures::{StreamExt, future::select_all, stream::FuturesUnordered};
use tracing::debug;

use super::{ActivityNode, ActivityRun, Flow, ResolveScope, Sequence, boxed};
use crate::{
    element::Element,
    error::{ActivityError, ConfigError},
    event::{EventArgs, EventWaiter},
    model::Model,
    name::QualifiedName,
    registry::{BuildContext, NodeRegistry},
};

/// How a fork joins its branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForkMode {
    /// The first branch to fire runs; the others are abandoned.
    #[default]
    First,
    /// Every branch runs once, in firing order.
    All,
}

impl FromStr for ForkMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "first" => Ok(Self::First),
            "all" => Ok(Self::All),
            other => Err(format!("unknown fork mode `{other}` (expected `first` or `all`)")),
        }
    }
}

impl fmt::Display for ForkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::First => "first",
            Self::All => "all",
        })
    }
}

/// Wait for the next trigger, or fail once the model terminates.
async fn await_trigger(model: &Model, waiter: &mut EventWaiter) -> Result<Arc<EventArgs>, ActivityError> {
    if model.is_terminating() {
        return Err(ActivityError::Terminated);
    }
    tokio::select! {
        args = waiter.fired() => args.ok_or(ActivityError::Terminated),
        () = model.terminated() => Err(ActivityError::Terminated),
    }
}

/// `<Triggered event="...">`: park until the event fires, then run the body
/// with the event arguments bound in a nested frame.
struct Triggered {
    name: QualifiedName,
    event: String,
    body: Sequence,
}

impl Triggered {
    fn from_element(element: &Element, ctx: &BuildContext<'_>) -> Result<Self, ConfigError> {
        Ok(Self {
            name: element.name().clone(),
            event: element.required_attr("event")?.to_string(),
            body: ctx.parse_sequence(element.children())?,
        })
    }

    fn subscribe(&self, model: &Model) -> EventWaiter {
        model.events().register(&self.event).subscribe()
    }

    async fn run_body(&self, run: &mut ActivityRun, args: &EventArgs) -> Result<Flow, ActivityError> {
        debug!(activity = run.activity(), event = %self.event, "triggered");
        run.variables_mut().push_frame(args.bindings().clone());
        let flow = self.body.execute(run).await;
        run.variables_mut().pop_frame();
        flow
    }
}

#[async_trait]
impl ActivityNode for Triggered {
    fn type_name(&self) -> &QualifiedName {
        &self.name
    }

    fn resolve(&self, scope: &ResolveScope<'_>) -> Result<(), ConfigError> {
        scope.model().events().register(&self.event);
        self.body.resolve(scope.model(), Some(scope))
    }

    async fn execute(&self, run: &mut ActivityRun) -> Result<Flow, ActivityError> {
        let model = Arc::clone(run.model());
        let mut waiter = self.subscribe(&model);
        let args = await_trigger(&model, &mut waiter).await?;
        self.run_body(run, &args).await
    }
}

/// `<Fork mode="first|all">` over `<Triggered>` branches.
struct Fork {
    name: QualifiedName,
    mode: Option<ForkMode>,
    branches: Vec<Triggered>,
}

impl Fork {
    fn from_element(element: &Element, ctx: &BuildContext<'_>) -> Result<Self, ConfigError> {
        let branches = element
            .children()
            .iter()
            .map(|child| {
                if child.name().is_core("Triggered") {
                    Triggered::from_element(child, ctx)
                } else {
                    Err(element.structure(format!("unexpected child <{}>", child.local_name())))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        if branches.is_empty() {
            return Err(element.structure("needs at least one <Triggered> branch"));
        }
        Ok(Self { name: element.name().clone(), mode: element.attr_parse("mode")?, branches })
    }

    async fn first(&self, run: &mut ActivityRun, waiters: Vec<EventWaiter>) -> Result<Flow, ActivityError> {
        let model = Arc::clone(run.model());
        let waits = waiters.into_iter().enumerate().map(|(branch, mut waiter)| {
            Box::pin(async move { (branch, waiter.fired().await) })
        });

        let (branch, args) = tokio::select! {
            ((branch, args), _, _abandoned) = select_all(waits) => (branch, args),
            () = model.terminated() => return Err(ActivityError::Terminated),
        };
        let args = args.ok_or(ActivityError::Terminated)?;
        self.branches[branch].run_body(run, &args).await
    }

    async fn all(&self, run: &mut ActivityRun, waiters: Vec<EventWaiter>) -> Result<Flow, ActivityError> {
        let model = Arc::clone(run.model());
        let mut pending: FuturesUnordered<_> = waiters
            .into_iter()
            .enumerate()
            .map(|(branch, mut waiter)| async move { (branch, waiter.fired().await) })
            .collect();

        // Waiters keep observing their events while a branch body runs, so a
        // trigger during a body is picked up on the next iteration.
        loop {
            let next = tokio::select! {
                next = pending.next() => next,
                () = model.terminated() => return Err(ActivityError::Terminated),
            };
            let Some((branch, args)) = next else {
                return Ok(Flow::Next);
            };
            let args = args.ok_or(ActivityError::Terminated)?;
            if let jump @ Flow::Jump(_) = self.branches[branch].run_body(run, &args).await? {
                return Ok(jump);
            }
        }
    }
}

#[async_trait]
impl ActivityNode for Fork {
    fn type_name(&self) -> &QualifiedName {
        &self.name
    }

    fn resolve(&self, scope: &ResolveScope<'_>) -> Result<(), ConfigError> {
        self.branches.iter().try_for_each(|branch| branch.resolve(scope))
    }

    async fn execute(&self, run: &mut ActivityRun) -> Result<Flow, ActivityError> {
        let model = Arc::clone(run.model());
        if model.is_terminating() {
            return Err(ActivityError::Terminated);
        }
        let waiters: Vec<EventWaiter> = self.branches.iter().map(|b| b.subscribe(&model)).collect();
        match self.mode.unwrap_or(model.config().fork_mode) {
            ForkMode::First => self.first(run, waiters).await,
            ForkMode::All => self.all(run, waiters).await,
        }
    }
}

pub(super) fn register(registry: &mut NodeRegistry) {
    registry.insert_activity_node(QualifiedName::core("Triggered"), |element, ctx| {
        Ok(boxed(Triggered::from_element(element, ctx)?))
    });
    registry.insert_activity_node(QualifiedName::core("Fork"), |element, ctx| {
        Ok(boxed(Fork::from_element(element, ctx)?))
    });
}
