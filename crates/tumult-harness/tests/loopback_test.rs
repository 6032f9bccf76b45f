//! Loopback actors driven through full runs on virtual time.

use std::{sync::Arc, time::Duration};

use tumult_core::{
    CoreError, Model, ModelConfig, NodeRegistry, NodeTree, ResourceError, Traversal, WorkerPool,
};
use tumult_harness::{LoopbackClient, SimEnv, loopback};
use tumult_runner::{RunReport, Runner, RunnerConfig, RunnerError, parse_definition};

async fn run(text: &str, seed: u64) -> Result<RunReport, RunnerError> {
    let root = parse_definition(text).unwrap();
    let mut runner = Runner::new(RunnerConfig::default()).with_env(Arc::new(SimEnv::with_seed(seed)));
    loopback::register(runner.registry_mut()).unwrap();
    runner.run(&root).await
}

#[tokio::test(start_paused = true)]
async fn go_runs_once_per_handler_with_the_payload() {
    let text = r#"
<Model main="Main" xmlns:lb="urn:tumult:loopback">
  <Actors>
    <lb:Loopback id="A" count="3">
      <On event="Go" activity="Handle"/>
    </lb:Loopback>
  </Actors>
  <Activities>
    <Activity id="Main">
      <Start/>
      <Raise event="Go"><Arg name="e" value="'payload'"/></Raise>
    </Activity>
    <Activity id="Handle">
      <Start/>
      <Increment counter="handled"/>
      <Conditional>
        <Try condition="e == 'payload'"><Increment counter="matched"/></Try>
      </Conditional>
    </Activity>
  </Activities>
</Model>"#;

    let report = run(text, 1).await.unwrap();

    assert_eq!(report.snapshot.counters.get("handled"), Some(&3));
    assert_eq!(report.snapshot.counters.get("matched"), Some(&3));
    assert_eq!(report.dispatched, 3);
    assert_eq!(report.failed, 0);
}

#[tokio::test(start_paused = true)]
async fn ping_is_answered_by_the_receiving_instance_only() {
    let text = r#"
<Model main="Main" bucketTimeMs="1000" xmlns:lb="urn:tumult:loopback">
  <Buckets><Bucket id="arrival"/></Buckets>
  <Actors>
    <lb:Loopback id="Peer" count="2">
      <On event="Received" activity="Echo" actorName="me" eventArgs="msg"/>
    </lb:Loopback>
  </Actors>
  <Activities>
    <Activity id="Main">
      <Start/>
      <Allocate actor="Peer" variable="target" position="1"/>
      <lb:Send to="target" payload="'ping'" delayMs="20"/>
    </Activity>
    <Activity id="Echo">
      <Start/>
      <Increment counter="received"/>
      <Sample bucket="arrival" value="1"/>
      <Conditional>
        <Try condition="msg == 'ping'">
          <lb:Send to="me" payload="'pong'" delayMs="10"/>
        </Try>
        <Otherwise><Increment counter="pongs"/></Otherwise>
      </Conditional>
    </Activity>
  </Activities>
</Model>"#;

    let report = run(text, 2).await.unwrap();

    assert_eq!(report.snapshot.counters.get("received"), Some(&2));
    assert_eq!(report.snapshot.counters.get("pongs"), Some(&1));
    assert_eq!(report.snapshot.bucket("arrival").unwrap().records[0].count, 2);
    assert!(report.elapsed >= Duration::from_millis(30));
}

#[tokio::test(start_paused = true)]
async fn shared_addresses_abort_the_run() {
    let text = r#"
<Model xmlns:lb="urn:tumult:loopback">
  <Actors>
    <lb:Loopback id="A" count="2" basePort="6000"/>
    <lb:Loopback id="B" count="2" basePort="6001"/>
  </Actors>
</Model>"#;

    let err = run(text, 3).await.unwrap_err();

    assert!(
        matches!(
            &err,
            RunnerError::Core(CoreError::Resource(ResourceError::AddressCollision { address, .. }))
                if address == "127.0.0.1:6002"
        ),
        "expected an address collision, got {err}"
    );
}

#[tokio::test(start_paused = true)]
async fn fork_first_takes_the_earliest_delivery() {
    let text = r#"
<Model main="Main" xmlns:lb="urn:tumult:loopback">
  <Actors>
    <lb:Loopback id="P" count="1">
      <On event="Kick" activity="Deliver"/>
      <On event="Kick" activity="Late"/>
    </lb:Loopback>
  </Actors>
  <Activities>
    <Activity id="Main">
      <Start/>
      <Raise event="Kick"/>
      <Fork mode="first">
        <Triggered event="Received"><Increment counter="received"/></Triggered>
        <Triggered event="Timeout"><Increment counter="timeout"/></Triggered>
      </Fork>
    </Activity>
    <Activity id="Deliver">
      <Start/>
      <lb:Send to="actor" payload="1" delayMs="5"/>
    </Activity>
    <Activity id="Late">
      <Start/>
      <Delay durationMs="50"/>
      <Raise event="Timeout"/>
      <Increment counter="late"/>
    </Activity>
  </Activities>
</Model>"#;

    let report = run(text, 4).await.unwrap();

    assert_eq!(report.snapshot.counters.get("received"), Some(&1));
    assert_eq!(report.snapshot.counters.get("timeout"), None);
    assert_eq!(report.snapshot.counters.get("late"), Some(&1));
}

struct Booted {
    model: Arc<Model>,
    tree: NodeTree,
}

async fn boot(text: &str, seed: u64) -> Booted {
    let root = parse_definition(text).unwrap();
    let mut registry = NodeRegistry::with_core();
    loopback::register(&mut registry).unwrap();

    let model = Model::new(
        ModelConfig::from_element(&root).unwrap(),
        Arc::new(SimEnv::with_seed(seed)),
        WorkerPool::new(16).unwrap(),
    );
    let mut tree = NodeTree::build(&root, &registry).unwrap();
    tree.initialize(&model, Traversal::default()).await.unwrap();
    tree.start(&model, Traversal::default()).await.unwrap();
    Booted { model, tree }
}

fn received_counts(model: &Model) -> Vec<usize> {
    let population = model.actors().require("Peer").unwrap();
    population
        .instances()
        .iter()
        .map(|handle| handle.activity_object().downcast::<LoopbackClient>().unwrap().received().len())
        .collect()
}

const SCATTER: &str = r#"
<Model xmlns:lb="urn:tumult:loopback">
  <Actors><lb:Loopback id="Peer" count="5"/></Actors>
  <Activities>
    <Activity id="Scatter">
      <Start/>
      <Set variable="i" value="0"/>
      <While condition="i &lt; 20">
        <Allocate actor="Peer" variable="p" exclusive="false"/>
        <lb:Send to="p" payload="i"/>
        <Set variable="i" value="i + 1"/>
      </While>
    </Activity>
  </Activities>
</Model>"#;

async fn scatter(seed: u64) -> Vec<usize> {
    let mut booted = boot(SCATTER, seed).await;
    let activity = booted.model.activities().require("Scatter").unwrap();
    activity.run(Arc::clone(&booted.model), booted.model.fresh_scope()).await.unwrap();

    let counts = received_counts(&booted.model);
    booted.tree.finalize(&booted.model, Traversal::default()).await.unwrap();
    booted.model.teardown();
    counts
}

#[tokio::test(start_paused = true)]
async fn random_allocation_replays_with_the_same_seed() {
    let first = scatter(42).await;
    let second = scatter(42).await;

    assert_eq!(first, second);
    assert_eq!(first.iter().sum::<usize>(), 20);
}

#[tokio::test(start_paused = true)]
async fn finalize_disconnects_every_instance() {
    let mut booted = boot(SCATTER, 7).await;
    let population = booted.model.actors().require("Peer").unwrap();
    let clients: Vec<Arc<LoopbackClient>> = population
        .instances()
        .iter()
        .map(|handle| handle.activity_object().downcast::<LoopbackClient>().unwrap())
        .collect();
    assert!(clients.iter().all(|c| c.is_connected()));
    assert_eq!(clients[4].address(), "127.0.0.1:5005");

    booted.tree.finalize(&booted.model, Traversal::default()).await.unwrap();

    assert!(clients.iter().all(|c| !c.is_connected()));
}
