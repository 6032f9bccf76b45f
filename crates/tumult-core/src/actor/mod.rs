//! Actor types, instances and their event bindings.
//!
//! An actor type is a tree node. During `initialize` it asks its
//! protocol-specific [`InstanceFactory`] for exactly `count` instances and
//! initializes each; during `start` it starts them, checks their addresses,
//! and wires `<On>` bindings and protocol event sources into the event
//! registry; during `finalize` it finalizes them.
//!
//! Protocol modules compose an actor from small capabilities instead of a
//! base class: [`InstanceLifecycle`] for the per-instance phases,
//! [`ActorInstance`] for identity and the activity object, and optionally
//! [`EventSource`] for protocol callbacks.

mod population;

use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, OnceLock, Weak},
};

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info, warn};

pub use self::population::Population;
use crate::{
    activity::Activity,
    element::Element,
    error::{ConfigError, CoreError, LifecycleError, ResourceError},
    event::{EventArgs, EventHandler},
    model::Model,
    name::QualifiedName,
    node::{NodeContext, Phase, SimulationNode},
    value::{ActivityObject, Value},
};

/// Per-instance counterparts of the tree phases.
#[async_trait]
pub trait InstanceLifecycle: Send + Sync {
    /// Runs during the actor type's `initialize`.
    async fn initialize_instance(&self) -> Result<(), CoreError> {
        Ok(())
    }

    /// Runs during the actor type's `start` (connect, log in, ...).
    async fn start_instance(&self) -> Result<(), CoreError> {
        Ok(())
    }

    /// Runs during the actor type's `finalize`.
    async fn finalize_instance(&self) -> Result<(), CoreError> {
        Ok(())
    }
}

/// One simulated participant.
pub trait ActorInstance: InstanceLifecycle + 'static {
    /// 1-based index within the population.
    fn index(&self) -> usize;

    /// Generated identifier.
    fn id(&self) -> &str;

    /// Protocol client handed to activity nodes. Opaque to the core.
    fn activity_object(&self) -> ActivityObject;

    /// Network address claimed by this instance. Two instances of a run may
    /// not claim the same one.
    fn address(&self) -> Option<String> {
        None
    }

    /// Protocol event callbacks, if the instance raises events.
    fn event_source(&self) -> Option<&dyn EventSource> {
        None
    }
}

/// Protocol-specific instance constructor of an actor type.
pub trait InstanceFactory: Send + Sync + 'static {
    /// Create instance `index` (1-based) named `id`. Instances must not share
    /// mutable state.
    fn create_instance(&self, index: usize, id: &str) -> Result<Arc<dyn ActorInstance>, CoreError>;
}

/// Lets an instance attach protocol callbacks that raise simulation events.
pub trait EventSource: Send + Sync {
    /// Called once per instance during the actor type's `start`.
    fn register_handlers(&self, sink: HandlerSink);
}

/// A shared reference to an instance, tagged with its actor id.
#[derive(Clone)]
pub struct InstanceHandle {
    actor: Arc<str>,
    instance: Arc<dyn ActorInstance>,
}

impl InstanceHandle {
    /// Wrap an instance.
    pub fn new(actor: Arc<str>, instance: Arc<dyn ActorInstance>) -> Self {
        Self { actor, instance }
    }

    /// Actor id.
    pub fn actor(&self) -> &str {
        &self.actor
    }

    /// Instance id.
    pub fn id(&self) -> &str {
        self.instance.id()
    }

    /// 1-based index.
    pub fn index(&self) -> usize {
        self.instance.index()
    }

    /// The instance.
    pub fn instance(&self) -> &Arc<dyn ActorInstance> {
        &self.instance
    }

    /// The instance's protocol client.
    pub fn activity_object(&self) -> ActivityObject {
        self.instance.activity_object()
    }
}

impl PartialEq for InstanceHandle {
    fn eq(&self, other: &Self) -> bool {
        self.actor == other.actor && self.index() == other.index()
    }
}

impl Eq for InstanceHandle {}

impl fmt::Debug for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceHandle")
            .field("actor", &self.actor)
            .field("id", &self.id())
            .finish()
    }
}

/// Raises events on behalf of one instance.
#[derive(Clone)]
pub struct HandlerSink {
    model: Weak<Model>,
    origin: InstanceHandle,
    actor_name: String,
    event_args: String,
}

impl HandlerSink {
    /// Instance this sink raises events for.
    pub fn origin(&self) -> &InstanceHandle {
        &self.origin
    }

    /// Fire `event` with the instance bound under the actor alias and `raw`
    /// bound under the event-arguments name.
    pub fn trigger(&self, event: &str, raw: Value) -> Result<(), CoreError> {
        let model = self.model.upgrade().ok_or(LifecycleError::TornDown)?;
        model.trigger(
            event,
            Some((self.actor_name.as_str(), self.origin.clone())),
            [(self.event_args.clone(), raw)],
        )?;
        Ok(())
    }
}

/// `<On event activity actorName eventArgs>`: run `activity` whenever `event`
/// fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBinding {
    /// Event name.
    pub event: String,
    /// Activity id.
    pub activity: String,
    /// Variable bound to the instance the handler belongs to.
    pub actor_name: String,
    /// Variable bound to the raw event.
    pub event_args: String,
}

impl EventBinding {
    fn from_element(element: &Element, defaults: &ActorNames) -> Result<Self, ConfigError> {
        Ok(Self {
            event: element.required_attr("event")?.to_string(),
            activity: element.required_attr("activity")?.to_string(),
            actor_name: element.attr("actorName").unwrap_or(&defaults.actor_name).to_string(),
            event_args: element.attr("eventArgs").unwrap_or(&defaults.event_args).to_string(),
        })
    }
}

/// Variable names an actor type uses when it raises events.
#[derive(Debug, Clone)]
struct ActorNames {
    actor_name: String,
    event_args: String,
}

/// Runs the bound activity for one instance.
struct ActivityHandler {
    model: Weak<Model>,
    own: InstanceHandle,
    binding: EventBinding,
    raw_key: String,
    activity: Arc<Activity>,
}

impl EventHandler for ActivityHandler {
    fn handle(&self, args: &EventArgs) -> Result<(), CoreError> {
        // Events raised by an instance only drive that instance's bindings.
        if args.origin().is_some_and(|origin| origin != &self.own) {
            return Ok(());
        }
        let model = self.model.upgrade().ok_or(LifecycleError::TornDown)?;

        let mut frame: BTreeMap<String, Value> = args.bindings().clone();
        if let Some(raw) = args.get(&self.raw_key) {
            frame.insert(self.binding.event_args.clone(), raw.clone());
        }
        frame.insert(self.binding.actor_name.clone(), Value::Instance(self.own.clone()));

        let mut variables = model.fresh_scope();
        variables.push_frame(frame);
        debug!(instance = self.own.id(), activity = %self.binding.activity, event = args.event(), "dispatching");
        model.spawn_activity(Arc::clone(&self.activity), variables)
    }
}

/// Tree node of an actor type.
pub struct ActorType {
    name: QualifiedName,
    id: String,
    count: usize,
    names: ActorNames,
    bindings: Vec<EventBinding>,
    factory: Arc<dyn InstanceFactory>,
    population: OnceLock<Arc<Population>>,
}

impl ActorType {
    /// Read `id`, `count` (default 1), `actorName` (default `actor`),
    /// `eventArgs` (default `e`) and the `<On>` children.
    pub fn from_element(element: &Element, factory: Arc<dyn InstanceFactory>) -> Result<Self, ConfigError> {
        let names = ActorNames {
            actor_name: element.attr("actorName").unwrap_or("actor").to_string(),
            event_args: element.attr("eventArgs").unwrap_or("e").to_string(),
        };
        let bindings = element
            .children()
            .iter()
            .filter(|child| child.name().is_core("On"))
            .map(|child| EventBinding::from_element(child, &names))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: element.name().clone(),
            id: element.required_attr("id")?.to_string(),
            count: element.attr_or("count", 1)?,
            names,
            bindings,
            factory,
            population: OnceLock::new(),
        })
    }

    /// Base id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Population size.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Event bindings.
    pub fn bindings(&self) -> &[EventBinding] {
        &self.bindings
    }

    /// Identifier of instance `index`: the base id followed by the index,
    /// zero-padded to the width of `count`.
    pub fn instance_id(&self, index: usize) -> String {
        let width = self.count.to_string().len();
        format!("{}{index:0width$}", self.id)
    }

    fn population(&self, ctx: &NodeContext<'_>) -> Result<&Arc<Population>, LifecycleError> {
        self.population.get().ok_or_else(|| LifecycleError::OutOfOrder {
            node: ctx.path.to_string(),
            requested: "use population",
            current: Phase::Constructed,
        })
    }

    fn check_addresses(model: &Model) -> Result<(), ResourceError> {
        let mut claimed: BTreeMap<String, String> = BTreeMap::new();
        for population in model.actors().values() {
            for handle in population.instances() {
                let Some(address) = handle.instance().address() else { continue };
                if let Some(first) = claimed.insert(address.clone(), handle.id().to_string()) {
                    return Err(ResourceError::AddressCollision {
                        address,
                        first,
                        second: handle.id().to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    async fn create_instances(&self) -> Result<Vec<Arc<dyn ActorInstance>>, CoreError> {
        let mut instances: Vec<Arc<dyn ActorInstance>> = Vec::with_capacity(self.count);
        for index in 1..=self.count {
            let id = self.instance_id(index);
            let created = match self.factory.create_instance(index, &id) {
                Ok(instance) if instance.index() != index || instance.id() != id => Err(CoreError::Instance {
                    instance: id,
                    reason: format!(
                        "factory built {}#{} in place of #{index}",
                        instance.id(),
                        instance.index()
                    ),
                }),
                Ok(instance) => instance.initialize_instance().await.map(|()| instance),
                Err(e) => Err(e),
            };
            match created {
                Ok(instance) => instances.push(instance),
                Err(e) => {
                    for done in instances.iter().rev() {
                        if let Err(cleanup) = done.finalize_instance().await {
                            warn!(instance = done.id(), error = %cleanup, "cleanup after failed initialize");
                        }
                    }
                    return Err(e);
                },
            }
        }
        Ok(instances)
    }
}

#[async_trait]
impl SimulationNode for ActorType {
    fn type_name(&self) -> &QualifiedName {
        &self.name
    }

    fn owns_subtree(&self) -> bool {
        true
    }

    async fn initialize(&self, ctx: &NodeContext<'_>) -> Result<(), CoreError> {
        let instances = self.create_instances().await?;
        let population = Arc::new(Population::new(self.id.clone(), instances));
        self.population.set(Arc::clone(&population)).map_err(|_| LifecycleError::OutOfOrder {
            node: ctx.path.to_string(),
            requested: "initialize",
            current: Phase::Initialized,
        })?;
        ctx.model.register_population(population)?;
        info!(actor = %self.id, count = self.count, "actor initialized");
        Ok(())
    }

    async fn start(&self, ctx: &NodeContext<'_>) -> Result<(), CoreError> {
        let population = Arc::clone(self.population(ctx)?);

        let mut resolved = Vec::with_capacity(self.bindings.len());
        for binding in &self.bindings {
            let activity = ctx.model.activities().require(&binding.activity)?;
            let event = ctx.model.events().register(&binding.event);
            resolved.push((binding, activity, event));
        }

        Self::check_addresses(ctx.model)?;

        let started = join_all(population.instances().iter().map(|h| h.instance().start_instance())).await;
        for result in started {
            result?;
        }

        for handle in population.instances() {
            for (binding, activity, event) in &resolved {
                event.add_handler(Arc::new(ActivityHandler {
                    model: Arc::downgrade(ctx.model),
                    own: handle.clone(),
                    binding: (*binding).clone(),
                    raw_key: self.names.event_args.clone(),
                    activity: Arc::clone(activity),
                }));
            }
            if let Some(source) = handle.instance().event_source() {
                source.register_handlers(HandlerSink {
                    model: Arc::downgrade(ctx.model),
                    origin: handle.clone(),
                    actor_name: self.names.actor_name.clone(),
                    event_args: self.names.event_args.clone(),
                });
            }
        }

        info!(actor = %self.id, bindings = self.bindings.len(), "actor started");
        Ok(())
    }

    async fn finalize(&self, ctx: &NodeContext<'_>) -> Result<(), CoreError> {
        let Some(population) = self.population.get() else {
            return Ok(());
        };
        let mut first_error = None;
        for handle in population.instances() {
            if let Err(e) = handle.instance().finalize_instance().await {
                warn!(instance = handle.id(), error = %e, "instance finalize failed");
                first_error.get_or_insert(e);
            }
        }
        debug!(actor = %self.id, node = ctx.path, "actor finalized");
        first_error.map_or(Ok(()), Err)
    }
}
