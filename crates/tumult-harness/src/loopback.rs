//! In-process loopback protocol.
//!
//! ```xml
//! <Model xmlns:lb="urn:tumult:loopback">
//!   <Actors>
//!     <lb:Loopback id="Peer" count="3" host="10.0.0.1" basePort="5000"
//!                  receiveEvent="Received">
//!       <On event="Received" activity="Reply"/>
//!     </lb:Loopback>
//!   </Actors>
//!   ...
//!   <lb:Send to="peer" payload="'ping'" delayMs="20"/>
//! </Model>
//! ```
//!
//! Every instance claims `host:basePort+index` and is reachable through its
//! [`LoopbackClient`]. Delivering a payload records it and raises
//! `receiveEvent` on behalf of the receiving instance.

use std::{
    sync::{
        Arc, Mutex, OnceLock, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tracing::debug;
use tumult_core::{
    ActivityError, ActivityNode, ActivityObject, ActivityRun, ActorInstance, ConfigError, CoreError,
    Element, EventSource, Expression, Flow, HandlerSink, InstanceFactory, InstanceLifecycle,
    NodeRegistry, QualifiedName, Value,
};

/// Namespace of the loopback node types.
pub const LOOPBACK_NAMESPACE: &str = "urn:tumult:loopback";

/// Add `Loopback` actors and the `Send` activity node to a registry.
pub fn register(registry: &mut NodeRegistry) -> Result<(), ConfigError> {
    registry.register_actor(
        QualifiedName::new(LOOPBACK_NAMESPACE, "Loopback"),
        Arc::new(|element: &Element| -> Result<Arc<dyn InstanceFactory>, ConfigError> {
            Ok(Arc::new(LoopbackFactory {
                host: element.attr("host").unwrap_or("127.0.0.1").to_string(),
                base_port: element.attr_or("basePort", 5000u16)?,
                receive_event: element.attr("receiveEvent").unwrap_or("Received").to_string(),
            }))
        }),
    )?;
    registry.register_activity_node(QualifiedName::new(LOOPBACK_NAMESPACE, "Send"), |element, _| {
        Ok(Box::new(SendNode {
            name: element.name().clone(),
            to: Expression::parse(element.required_attr("to")?)?,
            payload: Expression::parse(element.required_attr("payload")?)?,
            delay: element.attr_duration_ms("delayMs")?,
        }) as Box<dyn ActivityNode>)
    })
}

/// Activity object of a loopback instance.
pub struct LoopbackClient {
    id: String,
    address: String,
    receive_event: String,
    connected: AtomicBool,
    sink: OnceLock<HandlerSink>,
    received: Mutex<Vec<Value>>,
}

impl LoopbackClient {
    /// Instance id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Claimed address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// True between the instance's start and finalize.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Payloads delivered so far, oldest first.
    pub fn received(&self) -> Vec<Value> {
        self.received.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Record `payload` and raise the receive event for this instance.
    pub fn deliver(&self, payload: Value) -> Result<(), CoreError> {
        if !self.is_connected() {
            return Err(CoreError::Instance { instance: self.id.clone(), reason: "not connected".to_string() });
        }
        self.received.lock().unwrap_or_else(PoisonError::into_inner).push(payload.clone());
        debug!(instance = %self.id, "payload delivered");
        match self.sink.get() {
            Some(sink) => sink.trigger(&self.receive_event, payload),
            None => Ok(()),
        }
    }
}

struct LoopbackInstance {
    index: usize,
    client: Arc<LoopbackClient>,
}

#[async_trait]
impl InstanceLifecycle for LoopbackInstance {
    async fn start_instance(&self) -> Result<(), CoreError> {
        self.client.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn finalize_instance(&self) -> Result<(), CoreError> {
        self.client.connected.store(false, Ordering::Release);
        Ok(())
    }
}

impl ActorInstance for LoopbackInstance {
    fn index(&self) -> usize {
        self.index
    }

    fn id(&self) -> &str {
        &self.client.id
    }

    fn activity_object(&self) -> ActivityObject {
        Arc::clone(&self.client) as ActivityObject
    }

    fn address(&self) -> Option<String> {
        Some(self.client.address.clone())
    }

    fn event_source(&self) -> Option<&dyn EventSource> {
        Some(self)
    }
}

impl EventSource for LoopbackInstance {
    fn register_handlers(&self, sink: HandlerSink) {
        let _ = self.client.sink.set(sink);
    }
}

struct LoopbackFactory {
    host: String,
    base_port: u16,
    receive_event: String,
}

impl InstanceFactory for LoopbackFactory {
    fn create_instance(&self, index: usize, id: &str) -> Result<Arc<dyn ActorInstance>, CoreError> {
        let port = u16::try_from(index)
            .ok()
            .and_then(|i| self.base_port.checked_add(i))
            .ok_or_else(|| CoreError::Instance { instance: id.to_string(), reason: "port out of range".to_string() })?;
        Ok(Arc::new(LoopbackInstance {
            index,
            client: Arc::new(LoopbackClient {
                id: id.to_string(),
                address: format!("{}:{port}", self.host),
                receive_event: self.receive_event.clone(),
                connected: AtomicBool::new(false),
                sink: OnceLock::new(),
                received: Mutex::new(Vec::new()),
            }),
        }))
    }
}

/// `<lb:Send to payload delayMs>`: deliver `payload` to the instance `to`
/// evaluates to, after an optional simulated latency.
struct SendNode {
    name: QualifiedName,
    to: Expression,
    payload: Expression,
    delay: Option<Duration>,
}

#[async_trait]
impl ActivityNode for SendNode {
    fn type_name(&self) -> &QualifiedName {
        &self.name
    }

    async fn execute(&self, run: &mut ActivityRun) -> Result<Flow, ActivityError> {
        let target = run.eval(&self.to)?;
        let client = target
            .as_instance()
            .map(|handle| handle.activity_object())
            .and_then(|object| object.downcast::<LoopbackClient>().ok())
            .ok_or_else(|| ActivityError::Type(format!("`{}` is not a loopback instance", self.to)))?;
        let payload = run.eval(&self.payload)?;

        if let Some(delay) = self.delay {
            let model = run.model();
            tokio::select! {
                () = model.env().sleep(delay) => {},
                () = model.terminated() => return Err(ActivityError::Terminated),
            }
        }

        client.deliver(payload)?;
        Ok(Flow::Next)
    }
}
