//! Named external events.
//!
//! An [`Event`] fans a trigger out to its handlers, synchronously and in
//! registration order, then completes its trigger awaitable so every parked
//! [`EventWaiter`] resumes. A failing handler is logged and skipped; the
//! remaining handlers still run.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::{actor::InstanceHandle, error::{ConfigError, CoreError}, value::Value};

/// Arguments bound by one trigger.
#[derive(Debug, Clone)]
pub struct EventArgs {
    event: String,
    bindings: BTreeMap<String, Value>,
    origin: Option<InstanceHandle>,
}

impl EventArgs {
    /// Name of the triggered event.
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Look one argument up.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    /// All bound names, including the actor alias.
    pub fn bindings(&self) -> &BTreeMap<String, Value> {
        &self.bindings
    }

    /// Instance that raised the event, if any.
    pub fn origin(&self) -> Option<&InstanceHandle> {
        self.origin.as_ref()
    }
}

/// Callback invoked on every trigger of an event.
pub trait EventHandler: Send + Sync + 'static {
    /// Handle one trigger. Errors are logged by the dispatcher.
    fn handle(&self, args: &EventArgs) -> Result<(), CoreError>;
}

impl<F> EventHandler for F
where
    F: Fn(&EventArgs) -> Result<(), CoreError> + Send + Sync + 'static,
{
    fn handle(&self, args: &EventArgs) -> Result<(), CoreError> {
        self(args)
    }
}

/// What one trigger did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TriggerOutcome {
    /// Handlers invoked.
    pub handlers: usize,
    /// Handlers that returned an error.
    pub failures: usize,
}

/// A named event.
pub struct Event {
    name: String,
    handlers: Mutex<Vec<Arc<dyn EventHandler>>>,
    fired: watch::Sender<Option<Arc<EventArgs>>>,
    count: AtomicU64,
}

impl Event {
    fn new(name: String) -> Self {
        let (fired, _) = watch::channel(None);
        Self { name, handlers: Mutex::new(Vec::new()), fired, count: AtomicU64::new(0) }
    }

    /// Event name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a handler. Handlers run in registration order.
    pub fn add_handler(&self, handler: Arc<dyn EventHandler>) {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner).push(handler);
    }

    /// Registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Times the event fired.
    pub fn fire_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Waiters currently parked on this event.
    pub fn waiters(&self) -> usize {
        self.fired.receiver_count()
    }

    /// Park until the next trigger. Triggers that happened before the call
    /// are not observed.
    pub fn subscribe(&self) -> EventWaiter {
        EventWaiter { rx: self.fired.subscribe() }
    }

    fn fire(&self, args: EventArgs) -> TriggerOutcome {
        let args = Arc::new(args);
        // Handlers may register further handlers; never call them under the lock.
        let handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner).clone();

        let mut outcome = TriggerOutcome { handlers: handlers.len(), failures: 0 };
        for (position, handler) in handlers.iter().enumerate() {
            if let Err(e) = handler.handle(&args) {
                outcome.failures += 1;
                warn!(event = %self.name, handler = position, error = %e, "event handler failed");
            }
        }

        self.count.fetch_add(1, Ordering::Relaxed);
        self.fired.send_replace(Some(args));
        outcome
    }
}

/// Awaitable side of an event.
pub struct EventWaiter {
    rx: watch::Receiver<Option<Arc<EventArgs>>>,
}

impl EventWaiter {
    /// Resolve with the arguments of the next trigger.
    ///
    /// Returns `None` if the event was dropped, which only happens after the
    /// model is gone.
    pub async fn fired(&mut self) -> Option<Arc<EventArgs>> {
        self.rx.changed().await.ok()?;
        self.rx.borrow_and_update().clone()
    }
}

/// Name to event mapping.
#[derive(Default)]
pub struct EventRegistry {
    events: Mutex<HashMap<String, Arc<Event>>>,
}

impl EventRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the event named `name`, creating it on first use.
    pub fn register(&self, name: &str) -> Arc<Event> {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(events.entry(name.to_string()).or_insert_with(|| {
            debug!(event = name, "event registered");
            Arc::new(Event::new(name.to_string()))
        }))
    }

    /// Existing event.
    pub fn get(&self, name: &str) -> Option<Arc<Event>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).get(name).cloned()
    }

    /// Registered event names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> =
            self.events.lock().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect();
        names.sort();
        names
    }

    /// Trigger `name`.
    ///
    /// Binds `origin`'s alias to the instance and every keyed argument into a
    /// fresh scope, invokes the handlers, then releases the waiters. Binding
    /// two values to one name is a configuration error and fires nothing.
    pub fn trigger(
        &self,
        name: &str,
        origin: Option<(&str, InstanceHandle)>,
        args: impl IntoIterator<Item = (String, Value)>,
    ) -> Result<TriggerOutcome, ConfigError> {
        let mut bindings = BTreeMap::new();
        let mut instance = None;
        if let Some((alias, handle)) = origin {
            bindings.insert(alias.to_string(), Value::Instance(handle.clone()));
            instance = Some(handle);
        }
        for (key, value) in args {
            if bindings.contains_key(&key) {
                return Err(ConfigError::Duplicate { kind: "event argument", name: key });
            }
            bindings.insert(key, value);
        }

        let event = self.register(name);
        let outcome = event.fire(EventArgs { event: name.to_string(), bindings, origin: instance });
        debug!(event = name, handlers = outcome.handlers, failures = outcome.failures, "event triggered");
        Ok(outcome)
    }
}
