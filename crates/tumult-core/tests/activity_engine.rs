//! Activity engine tests: sequencing, branching, loops, calls, jumps and
//! event waits, driven through definitions the way a run would load them.

use std::{sync::Arc, time::Duration};

use tumult_core::{
    ActivityError, ConfigError, CoreError, Element, Environment, Model, ModelConfig, NodeRegistry,
    NodeTree, Traversal, Value, Variables, WorkerPool, env::Sleep,
};

// Test environment on tokio's clock with a constant byte stream
struct TestEnv;

impl Environment for TestEnv {
    fn now(&self) -> std::time::Instant {
        tokio::time::Instant::now().into_std()
    }

    fn sleep(&self, duration: Duration) -> Sleep {
        Box::pin(tokio::time::sleep(duration))
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        buffer.fill(7);
    }
}

fn el(local: &str) -> Element {
    Element::core(local)
}

fn set(variable: &str, value: &str) -> Element {
    el("Set").with_attr("variable", variable).with_attr("value", value)
}

fn activity(id: &str, body: impl IntoIterator<Item = Element>) -> Element {
    el("Activity").with_attr("id", id).with_child(el("Start")).with_children(body)
}

fn definition(activities: impl IntoIterator<Item = Element>) -> Element {
    el("Model").with_child(el("Activities").with_children(activities))
}

async fn boot(root: &Element) -> Result<(Arc<Model>, NodeTree), CoreError> {
    let model = Model::new(ModelConfig::from_element(root)?, Arc::new(TestEnv), WorkerPool::new(8)?);
    let mut tree = NodeTree::build(root, &NodeRegistry::with_core())?;
    tree.initialize(&model, Traversal::default()).await?;
    tree.start(&model, Traversal::default()).await?;
    Ok((model, tree))
}

async fn run(model: &Arc<Model>, id: &str) -> Result<Variables, ActivityError> {
    let activity = model.activities().require(id)?;
    activity.run(Arc::clone(model), model.fresh_scope()).await
}

/// Spawn a run and wait until it parks on `event`.
async fn spawn_waiting(
    model: &Arc<Model>,
    id: &str,
    event: &str,
) -> tokio::task::JoinHandle<Result<Variables, ActivityError>> {
    let activity = model.activities().require(id).unwrap();
    let runner = Arc::clone(model);
    let handle = tokio::spawn(async move { activity.run(Arc::clone(&runner), runner.fresh_scope()).await });
    let event = model.events().register(event);
    while event.waiters() == 0 {
        tokio::task::yield_now().await;
    }
    handle
}

#[tokio::test]
async fn start_only_activity_has_no_side_effects() {
    let (model, _tree) = boot(&definition([activity("Noop", [])])).await.unwrap();

    let vars = run(&model, "Noop").await.unwrap();
    assert!(vars.flatten().is_empty());
    assert!(model.counters().snapshot().is_empty());
}

#[tokio::test]
async fn activity_must_begin_with_start() {
    let bad = el("Activity").with_attr("id", "NoStart").with_child(set("x", "1"));
    let err = NodeTree::build(&definition([bad]), &NodeRegistry::with_core()).err().unwrap();
    assert!(matches!(err, ConfigError::Structure { .. }));

    let twice = activity("Twice", [el("Start")]);
    let err = NodeTree::build(&definition([twice]), &NodeRegistry::with_core()).err().unwrap();
    assert!(matches!(err, ConfigError::Structure { .. }));
}

#[tokio::test]
async fn while_false_runs_zero_times() {
    let body = el("While")
        .with_attr("condition", "false")
        .with_child(el("Increment").with_attr("counter", "iterations"));
    let (model, _tree) = boot(&definition([activity("Loop", [body])])).await.unwrap();

    run(&model, "Loop").await.unwrap();
    assert_eq!(model.counters().get("iterations"), 0);
}

#[tokio::test]
async fn goto_breaks_out_of_an_endless_while() {
    let body = [
        set("i", "0"),
        el("While").with_attr("condition", "true").with_children([
            set("i", "i + 1"),
            el("Conditional").with_child(
                el("Try")
                    .with_attr("condition", "i >= 5")
                    .with_child(el("GoTo").with_attr("target", "done")),
            ),
        ]),
        set("after", "i * 10").with_attr("id", "done"),
    ];
    let (model, _tree) = boot(&definition([activity("Break", body)])).await.unwrap();

    let vars = run(&model, "Break").await.unwrap();
    assert_eq!(vars.get("i"), Some(&Value::Int(5)));
    assert_eq!(vars.get("after"), Some(&Value::Int(50)));
}

#[tokio::test]
async fn backward_goto_loops() {
    let body = [
        set("i", "0"),
        set("i", "i + 1").with_attr("id", "again"),
        el("Conditional").with_child(
            el("Try").with_attr("condition", "i < 3").with_child(el("GoTo").with_attr("target", "again")),
        ),
    ];
    let (model, _tree) = boot(&definition([activity("Count", body)])).await.unwrap();

    let vars = run(&model, "Count").await.unwrap();
    assert_eq!(vars.get("i"), Some(&Value::Int(3)));
}

fn chain(first: &str, second: &str) -> Element {
    el("Conditional").with_children([
        el("Try").with_attr("condition", first).with_child(set("taken", "'first'")),
        el("Try").with_attr("condition", second).with_child(set("taken", "'second'")),
        el("Otherwise").with_child(set("taken", "'otherwise'")),
    ])
}

#[tokio::test]
async fn first_matching_candidate_wins() {
    let (model, _tree) = boot(&definition([
        activity("OnlyOtherwise", [chain("false", "false")]),
        activity("FirstTry", [chain("true", "false")]),
        activity("BothTrue", [chain("true", "true")]),
    ]))
    .await
    .unwrap();

    let taken = |vars: Variables| vars.get("taken").cloned();
    assert_eq!(taken(run(&model, "OnlyOtherwise").await.unwrap()), Some(Value::from("otherwise")));
    assert_eq!(taken(run(&model, "FirstTry").await.unwrap()), Some(Value::from("first")));
    assert_eq!(taken(run(&model, "BothTrue").await.unwrap()), Some(Value::from("first")));
}

#[tokio::test]
async fn otherwise_must_be_last() {
    let bad = el("Conditional").with_children([
        el("Otherwise").with_child(set("x", "1")),
        el("Try").with_attr("condition", "true"),
    ]);
    let err = NodeTree::build(&definition([activity("Bad", [bad])]), &NodeRegistry::with_core())
        .err()
        .unwrap();
    assert!(matches!(err, ConfigError::Structure { .. }));
}

#[tokio::test]
async fn call_shares_the_callers_scope() {
    let (model, _tree) = boot(&definition([
        activity("Outer", [set("x", "1"), el("Call").with_attr("activity", "Inner"), set("y", "x + 1")]),
        activity("Inner", [set("x", "x * 10")]),
    ]))
    .await
    .unwrap();

    let vars = run(&model, "Outer").await.unwrap();
    assert_eq!(vars.get("y"), Some(&Value::Int(11)));
}

#[tokio::test]
async fn unbounded_recursion_hits_the_call_limit() {
    let (model, _tree) =
        boot(&definition([activity("Forever", [el("Call").with_attr("activity", "Forever")])])).await.unwrap();

    let err = run(&model, "Forever").await.unwrap_err();
    assert!(matches!(err, ActivityError::CallDepth(_)));
}

#[tokio::test]
async fn unresolvable_references_fail_at_start() {
    let goto = definition([activity("Jump", [el("GoTo").with_attr("target", "nowhere")])]);
    let err = boot(&goto).await.err().unwrap();
    assert!(matches!(err, CoreError::Config(ConfigError::Unresolved { kind: "node label", .. })));

    let call = definition([activity("Caller", [el("Call").with_attr("activity", "Ghost")])]);
    let err = boot(&call).await.err().unwrap();
    assert!(matches!(err, CoreError::Config(ConfigError::Unresolved { kind: "activity", .. })));
}

#[tokio::test]
async fn goto_cannot_target_a_sibling_branch() {
    let root = definition([activity("Cross", [el("Conditional").with_children([
        el("Try").with_attr("condition", "true").with_child(el("GoTo").with_attr("target", "inside")),
        el("Otherwise").with_child(set("x", "1").with_attr("id", "inside")),
    ])])]);
    let err = boot(&root).await.err().unwrap();
    assert!(matches!(err, CoreError::Config(ConfigError::Unresolved { .. })));
}

#[tokio::test]
async fn triggered_binds_event_arguments() {
    let wait = el("Triggered").with_attr("event", "Go").with_child(set("got", "e + '!'"));
    let (model, _tree) = boot(&definition([activity("Wait", [wait, set("after", "got")])])).await.unwrap();

    let handle = spawn_waiting(&model, "Wait", "Go").await;
    model.trigger("Go", None, [("e".to_string(), Value::from("payload"))]).unwrap();

    let vars = handle.await.unwrap().unwrap();
    assert_eq!(vars.get("after"), Some(&Value::from("payload!")));
    // The event frame is popped after the body.
    assert!(vars.get("e").is_none());
}

fn fork(mode: &str) -> Element {
    el("Fork").with_attr("mode", mode).with_children([
        el("Triggered").with_attr("event", "A").with_child(set("order", "order + 'a'")),
        el("Triggered").with_attr("event", "B").with_child(set("order", "order + 'b'")),
    ])
}

#[tokio::test]
async fn fork_first_runs_only_the_first_branch_to_fire() {
    let (model, _tree) = boot(&definition([activity("Race", [set("order", "''"), fork("first")])])).await.unwrap();

    let handle = spawn_waiting(&model, "Race", "A").await;
    model.trigger("B", None, Vec::new()).unwrap();
    let vars = handle.await.unwrap().unwrap();
    assert_eq!(vars.get("order"), Some(&Value::from("b")));

    // The abandoned wait no longer listens.
    assert_eq!(model.events().get("A").unwrap().waiters(), 0);
}

#[tokio::test]
async fn fork_all_runs_every_branch_in_firing_order() {
    let (model, _tree) = boot(&definition([activity("Join", [set("order", "''"), fork("all")])])).await.unwrap();

    let handle = spawn_waiting(&model, "Join", "A").await;
    model.trigger("B", None, Vec::new()).unwrap();
    model.trigger("A", None, Vec::new()).unwrap();
    let vars = handle.await.unwrap().unwrap();
    assert_eq!(vars.get("order"), Some(&Value::from("ba")));
}

#[tokio::test]
async fn model_wide_fork_mode_applies_to_forks_without_one() {
    let branches = [
        el("Triggered").with_attr("event", "A").with_child(set("order", "order + 'a'")),
        el("Triggered").with_attr("event", "B").with_child(set("order", "order + 'b'")),
    ];
    let root = definition([activity("Join", [set("order", "''"), el("Fork").with_children(branches)])])
        .with_attr("forkMode", "all");
    let (model, _tree) = boot(&root).await.unwrap();

    let handle = spawn_waiting(&model, "Join", "B").await;
    model.trigger("A", None, Vec::new()).unwrap();
    model.trigger("B", None, Vec::new()).unwrap();
    assert_eq!(handle.await.unwrap().unwrap().get("order"), Some(&Value::from("ab")));
}

#[tokio::test]
async fn terminate_releases_parked_runs() {
    let wait = el("Triggered").with_attr("event", "Never");
    let (model, _tree) = boot(&definition([activity("Park", [wait])])).await.unwrap();

    let handle = spawn_waiting(&model, "Park", "Never").await;
    model.terminate();
    assert!(matches!(handle.await.unwrap(), Err(ActivityError::Terminated)));
}

#[tokio::test]
async fn raise_passes_arguments_to_waiters() {
    let waiter = activity("Listen", [el("Triggered").with_attr("event", "Ping").with_child(set("got", "n"))]);
    let raiser = activity("Shout", [el("Raise")
        .with_attr("event", "Ping")
        .with_child(el("Arg").with_attr("name", "n").with_attr("value", "40 + 2"))]);
    let (model, _tree) = boot(&definition([waiter, raiser])).await.unwrap();

    let handle = spawn_waiting(&model, "Listen", "Ping").await;
    run(&model, "Shout").await.unwrap();
    assert_eq!(handle.await.unwrap().unwrap().get("got"), Some(&Value::Int(42)));
}

#[tokio::test]
async fn duplicate_raise_arguments_are_config_errors() {
    let raiser = activity("Shout", [el("Raise").with_attr("event", "Ping").with_children([
        el("Arg").with_attr("name", "n").with_attr("value", "1"),
        el("Arg").with_attr("name", "n").with_attr("value", "2"),
    ])]);
    let err = NodeTree::build(&definition([raiser]), &NodeRegistry::with_core()).err().unwrap();
    assert!(matches!(err, ConfigError::Duplicate { kind: "event argument", .. }));
}

#[tokio::test(start_paused = true)]
async fn samples_are_bucketed_on_the_environment_clock() {
    let root = definition([activity("Measure", [
        el("Sample").with_attr("bucket", "rtt").with_attr("value", "5"),
        el("Sample").with_attr("bucket", "rtt").with_attr("value", "7"),
        el("Sample").with_attr("bucket", "rtt").with_attr("value", "9"),
        el("Delay").with_attr("durationMs", "1500"),
        el("Sample").with_attr("bucket", "rtt").with_attr("value", "100"),
    ])])
    .with_child(el("Buckets").with_child(el("Bucket").with_attr("id", "rtt").with_attr("bucketTimeMs", "1000")));
    let (model, _tree) = boot(&root).await.unwrap();

    run(&model, "Measure").await.unwrap();
    let snapshot = model.snapshot();
    let records = &snapshot.bucket("rtt").unwrap().records;

    assert_eq!(records.len(), 2);
    assert_eq!((records[0].count, records[0].min, records[0].max), (3, 5.0, 9.0));
    assert!((records[0].mean - 7.0).abs() < f64::EPSILON);
    assert_eq!(records[1].start, Duration::from_secs(1));
    assert_eq!(records[1].count, 1);
}

#[tokio::test]
async fn sample_into_undeclared_bucket_fails_at_start() {
    let root = definition([activity("Measure", [el("Sample").with_attr("bucket", "nope").with_attr("value", "1")])]);
    let err = boot(&root).await.err().unwrap();
    assert!(matches!(err, CoreError::Config(ConfigError::Unresolved { kind: "bucket", .. })));
}

#[tokio::test]
async fn runtime_errors_abort_only_the_run() {
    let (model, _tree) = boot(&definition([
        activity("Broken", [set("x", "1 / 0"), el("Increment").with_attr("counter", "unreachable")]),
        activity("Fine", [el("Increment").with_attr("counter", "fine")]),
    ]))
    .await
    .unwrap();

    assert!(matches!(run(&model, "Broken").await, Err(ActivityError::Arithmetic(_))));
    run(&model, "Fine").await.unwrap();
    assert_eq!(model.counters().get("unreachable"), 0);
    assert_eq!(model.counters().get("fine"), 1);
}
