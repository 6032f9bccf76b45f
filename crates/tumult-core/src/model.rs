//! Run-scoped state shared by every node.
//!
//! One [`Model`] exists per simulation run. It owns the registries that
//! nodes populate during `initialize` and consult during `start` and
//! execution, the process-wide counters, the environment and the worker pool.
//! Once torn down, every mutating operation fails with
//! [`LifecycleError::TornDown`].

use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use tokio::sync::watch;
use tracing::{debug, info};
use tumult_stats::{Bucket, BucketSnapshot, StatsSnapshot};

use crate::{
    activity::{Activity, ForkMode},
    actor::{InstanceHandle, Population},
    element::Element,
    env::Environment,
    error::{ActivityError, ConfigError, CoreError, LifecycleError},
    event::{EventRegistry, TriggerOutcome},
    value::{Value, Variables},
    worker::WorkerPool,
};

/// Settings read from the root element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    /// Default window length of buckets that do not set their own.
    pub bucket_time: Duration,
    /// Stop the run after this long, even if activities are still running.
    pub duration: Option<Duration>,
    /// Activity started once the tree is running.
    pub main: Option<String>,
    /// Mode of forks that do not set their own.
    pub fork_mode: ForkMode,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            bucket_time: Duration::from_secs(1),
            duration: None,
            main: None,
            fork_mode: ForkMode::default(),
        }
    }
}

impl ModelConfig {
    /// Read `bucketTimeMs`, `durationMs`, `main` and `forkMode`.
    pub fn from_element(element: &Element) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let bucket_time = element.attr_duration_ms("bucketTimeMs")?.unwrap_or(defaults.bucket_time);
        if bucket_time.is_zero() {
            return Err(element.invalid("bucketTimeMs", "0", "must be positive"));
        }
        Ok(Self {
            bucket_time,
            duration: element.attr_duration_ms("durationMs")?,
            main: element.attr("main").map(str::to_string),
            fork_mode: element.attr_or("forkMode", defaults.fork_mode)?,
        })
    }
}

/// Id-keyed registry of shared values.
pub struct NamedRegistry<T: ?Sized> {
    kind: &'static str,
    entries: Mutex<BTreeMap<String, Arc<T>>>,
}

impl<T: ?Sized> NamedRegistry<T> {
    /// Empty registry whose errors name `kind`.
    pub fn new(kind: &'static str) -> Self {
        Self { kind, entries: Mutex::new(BTreeMap::new()) }
    }

    /// Insert; an id can only be registered once.
    pub fn insert(&self, id: &str, value: Arc<T>) -> Result<(), ConfigError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(id) {
            return Err(ConfigError::Duplicate { kind: self.kind, name: id.to_string() });
        }
        entries.insert(id.to_string(), value);
        Ok(())
    }

    /// Look up.
    pub fn get(&self, id: &str) -> Option<Arc<T>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).get(id).cloned()
    }

    /// Look up or fail with an unresolved-reference error.
    pub fn require(&self, id: &str) -> Result<Arc<T>, ConfigError> {
        self.get(id).ok_or_else(|| ConfigError::Unresolved { kind: self.kind, name: id.to_string() })
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect()
    }

    /// Registered values, ordered by id.
    pub fn values(&self) -> Vec<Arc<T>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).values().cloned().collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// True if empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-wide named counters.
#[derive(Debug, Default)]
pub struct Counters {
    values: Mutex<BTreeMap<String, u64>>,
}

impl Counters {
    /// Add `by` to `name` and return the new value.
    pub fn add(&self, name: &str, by: u64) -> u64 {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = values.entry(name.to_string()).or_insert(0);
        *slot = slot.saturating_add(by);
        *slot
    }

    /// Current value, 0 if never incremented.
    pub fn get(&self, name: &str) -> u64 {
        self.values.lock().unwrap_or_else(PoisonError::into_inner).get(name).copied().unwrap_or(0)
    }

    /// Copy of every counter.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Root context of one run.
pub struct Model {
    config: ModelConfig,
    env: Arc<dyn Environment>,
    workers: WorkerPool,
    started_at: Instant,
    globals: Mutex<BTreeMap<String, Value>>,
    actors: NamedRegistry<Population>,
    events: EventRegistry,
    activities: NamedRegistry<Activity>,
    buckets: NamedRegistry<Bucket>,
    counters: Counters,
    terminating: watch::Sender<bool>,
    torn_down: AtomicBool,
}

impl Model {
    /// Create the model of a run.
    pub fn new(config: ModelConfig, env: Arc<dyn Environment>, workers: WorkerPool) -> Arc<Self> {
        let started_at = env.now();
        let (terminating, _) = watch::channel(false);
        Arc::new(Self {
            config,
            env,
            workers,
            started_at,
            globals: Mutex::new(BTreeMap::new()),
            actors: NamedRegistry::new("actor"),
            events: EventRegistry::new(),
            activities: NamedRegistry::new("activity"),
            buckets: NamedRegistry::new("bucket"),
            counters: Counters::default(),
            terminating,
            torn_down: AtomicBool::new(false),
        })
    }

    /// Run settings.
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Injected environment.
    pub fn env(&self) -> &Arc<dyn Environment> {
        &self.env
    }

    /// Task pool of this run.
    pub fn workers(&self) -> &WorkerPool {
        &self.workers
    }

    /// Time since the model was created, per the environment clock.
    pub fn elapsed(&self) -> Duration {
        self.env.now().saturating_duration_since(self.started_at)
    }

    /// Actor populations.
    pub fn actors(&self) -> &NamedRegistry<Population> {
        &self.actors
    }

    /// Named events.
    pub fn events(&self) -> &EventRegistry {
        &self.events
    }

    /// Named activities.
    pub fn activities(&self) -> &NamedRegistry<Activity> {
        &self.activities
    }

    /// Sample buckets.
    pub fn buckets(&self) -> &NamedRegistry<Bucket> {
        &self.buckets
    }

    /// Process-wide counters.
    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Fail if the model has been torn down.
    pub fn ensure_alive(&self) -> Result<(), LifecycleError> {
        if self.torn_down.load(Ordering::Acquire) {
            return Err(LifecycleError::TornDown);
        }
        Ok(())
    }

    /// Bind a global variable. Every activity run starts with a copy of the
    /// globals.
    pub fn set_global(&self, name: &str, value: Value) -> Result<(), LifecycleError> {
        self.ensure_alive()?;
        self.globals.lock().unwrap_or_else(PoisonError::into_inner).insert(name.to_string(), value);
        Ok(())
    }

    /// Current value of a global variable.
    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.lock().unwrap_or_else(PoisonError::into_inner).get(name).cloned()
    }

    /// Variable scope for a new activity run.
    pub fn fresh_scope(&self) -> Variables {
        Variables::from_frame(self.globals.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    /// Register a population.
    pub fn register_population(&self, population: Arc<Population>) -> Result<(), CoreError> {
        self.ensure_alive()?;
        let id = population.actor().to_string();
        Ok(self.actors.insert(&id, population)?)
    }

    /// Register an activity.
    pub fn register_activity(&self, activity: Arc<Activity>) -> Result<(), CoreError> {
        self.ensure_alive()?;
        let id = activity.id().to_string();
        Ok(self.activities.insert(&id, activity)?)
    }

    /// Register a bucket.
    pub fn register_bucket(&self, bucket: Arc<Bucket>) -> Result<(), CoreError> {
        self.ensure_alive()?;
        let id = bucket.id().to_string();
        Ok(self.buckets.insert(&id, bucket)?)
    }

    /// Push a sample, timestamped with the run's elapsed time.
    pub fn sample(&self, bucket: &str, value: f64) -> Result<(), ActivityError> {
        self.ensure_alive()?;
        let bucket = self.buckets.require(bucket)?;
        bucket.add(self.elapsed(), value)?;
        Ok(())
    }

    /// Add to a counter.
    pub fn increment(&self, counter: &str, by: u64) -> Result<u64, LifecycleError> {
        self.ensure_alive()?;
        Ok(self.counters.add(counter, by))
    }

    /// Trigger a named event. See [`EventRegistry::trigger`].
    pub fn trigger(
        &self,
        event: &str,
        origin: Option<(&str, InstanceHandle)>,
        args: impl IntoIterator<Item = (String, Value)>,
    ) -> Result<TriggerOutcome, CoreError> {
        self.ensure_alive()?;
        Ok(self.events.trigger(event, origin, args)?)
    }

    /// Run `activity` on the worker pool.
    pub fn spawn_activity(
        self: &Arc<Self>,
        activity: Arc<Activity>,
        variables: Variables,
    ) -> Result<(), CoreError> {
        self.ensure_alive()?;
        let model = Arc::clone(self);
        let name = format!("activity:{}", activity.id());
        self.workers.spawn(name, async move {
            activity.run(model, variables).await?;
            Ok(())
        })?;
        Ok(())
    }

    /// True once termination was requested.
    pub fn is_terminating(&self) -> bool {
        *self.terminating.borrow()
    }

    /// Resolve once termination is requested.
    pub async fn terminated(&self) {
        let mut rx = self.terminating.subscribe();
        // The sender lives as long as `self`, so this cannot fail while awaited.
        let _ = rx.wait_for(|terminating| *terminating).await;
    }

    /// Ask every wait and loop to stop. Idempotent.
    pub fn terminate(&self) {
        if !self.terminating.send_replace(true) {
            info!("simulation terminating");
        }
    }

    /// Mark the model unusable. Called once finalize completed.
    pub fn teardown(&self) {
        self.terminate();
        if !self.torn_down.swap(true, Ordering::AcqRel) {
            debug!("model torn down");
        }
    }

    /// True after teardown.
    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Aggregated statistics: every bucket's records and every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            buckets: self.buckets.values().iter().map(|b| BucketSnapshot::capture(b)).collect(),
            counters: self.counters.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn config_reads_root_attributes() {
        let root = Element::core("Model")
            .with_attr("bucketTimeMs", "250")
            .with_attr("durationMs", "5000")
            .with_attr("main", "Boot")
            .with_attr("forkMode", "all");
        let config = ModelConfig::from_element(&root).unwrap();

        assert_eq!(config.bucket_time, Duration::from_millis(250));
        assert_eq!(config.duration, Some(Duration::from_secs(5)));
        assert_eq!(config.main.as_deref(), Some("Boot"));
        assert_eq!(config.fork_mode, ForkMode::All);
    }

    #[test]
    fn zero_bucket_time_is_rejected() {
        let root = Element::core("Model").with_attr("bucketTimeMs", "0");
        assert!(ModelConfig::from_element(&root).is_err());
    }

    #[test]
    fn named_registry_rejects_duplicates() {
        let registry: NamedRegistry<str> = NamedRegistry::new("thing");
        registry.insert("a", Arc::from("first")).unwrap();
        assert!(matches!(
            registry.insert("a", Arc::from("second")),
            Err(ConfigError::Duplicate { kind: "thing", .. })
        ));
        assert!(matches!(registry.require("b"), Err(ConfigError::Unresolved { kind: "thing", .. })));
    }

    #[tokio::test]
    async fn torn_down_model_rejects_mutation() {
        let model = testing::model();
        model.increment("hits", 1).unwrap();
        model.teardown();

        assert!(model.is_terminating());
        assert!(matches!(model.increment("hits", 1), Err(LifecycleError::TornDown)));
        assert!(matches!(model.trigger("Go", None, Vec::new()), Err(CoreError::Lifecycle(_))));
        assert!(matches!(model.sample("rtt", 1.0), Err(ActivityError::Lifecycle(_))));
        assert_eq!(model.counters().get("hits"), 1);
    }

    #[tokio::test]
    async fn samples_land_in_buckets() {
        let model = testing::model();
        model.register_bucket(Arc::new(Bucket::new("rtt", Duration::from_secs(1)).unwrap())).unwrap();
        for v in [5.0, 7.0, 9.0] {
            model.sample("rtt", v).unwrap();
        }

        let snapshot = model.snapshot();
        let record = &snapshot.bucket("rtt").unwrap().records[0];
        assert_eq!(record.count, 3);
        assert!((record.mean - 7.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn terminated_resolves_after_terminate() {
        let model = testing::model();
        let waiter = Arc::clone(&model);
        let handle = tokio::spawn(async move { waiter.terminated().await });
        model.terminate();
        handle.await.unwrap();
    }
}
