//! Integration tests for the flow runtime
//!
//! Graphs here are built by hand with closure behaviors so each test can
//! count invocations and control timing.

use anyhow::anyhow;
use nodeflow::{
    Connection, FlowConfig, FlowError, FlowEvent, FlowGraph, FlowProgress, FlowRuntime,
    FlowStatus, FnBehavior, Node, NodeBehavior, NodeData, NodeId, NodeOutput, RecordingObserver,
    SocketId,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Emits a fixed value and counts invocations
fn constant(counter: &Arc<AtomicUsize>, value: Value) -> Arc<dyn NodeBehavior> {
    let counter = counter.clone();
    Arc::new(FnBehavior::new("constant", move |_ctx| {
        let counter = counter.clone();
        let value = value.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(NodeOutput::Value(value))
        }
    }))
}

/// Applies `f` to the first input (null when absent) and counts invocations
fn map_first<F>(counter: &Arc<AtomicUsize>, f: F) -> Arc<dyn NodeBehavior>
where
    F: Fn(&Value) -> Value + Send + Sync + 'static,
{
    let counter = counter.clone();
    let f = Arc::new(f);
    Arc::new(FnBehavior::new("map", move |ctx| {
        let counter = counter.clone();
        let f = f.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let input = ctx.first_input().cloned().unwrap_or(Value::Null);
            Ok(NodeOutput::Value(f(&input)))
        }
    }))
}

fn failing(message: &'static str) -> Arc<dyn NodeBehavior> {
    Arc::new(FnBehavior::new("failing", move |_ctx| async move {
        Err(anyhow!(message))
    }))
}

/// Signals `started`, then blocks until `release` is notified
fn gated(started: &Arc<Notify>, release: &Arc<Notify>, value: Value) -> Arc<dyn NodeBehavior> {
    let started = started.clone();
    let release = release.clone();
    Arc::new(FnBehavior::new("gated", move |_ctx| {
        let started = started.clone();
        let release = release.clone();
        let value = value.clone();
        async move {
            started.notify_one();
            release.notified().await;
            Ok(NodeOutput::Value(value))
        }
    }))
}

fn upper(value: &Value) -> Value {
    json!(value.as_str().unwrap_or_default().to_uppercase())
}

fn link(from: u64, to: u64) -> Connection {
    Connection::new(SocketId(from), SocketId(to))
}

/// S(10) -> (20)M(21) -> (30)E
fn chain(s: &Arc<AtomicUsize>, m: &Arc<AtomicUsize>, e: &Arc<AtomicUsize>) -> FlowGraph {
    FlowGraph::new(
        vec![
            Node::new(NodeData::new(1, "S", "constant").with_output(10), constant(s, json!("hello"))),
            Node::new(
                NodeData::new(2, "M", "map").with_input(20).with_output(21),
                map_first(m, upper),
            ),
            Node::new(
                NodeData::new(3, "E", "map").with_input(30),
                map_first(e, |v| json!(format!("{}!", v.as_str().unwrap_or_default()))),
            ),
        ],
        vec![link(10, 20), link(21, 30)],
    )
    .unwrap()
}

fn counters<const N: usize>() -> [Arc<AtomicUsize>; N] {
    std::array::from_fn(|_| Arc::new(AtomicUsize::new(0)))
}

#[tokio::test]
async fn test_chain_runs_each_node_once() {
    let [s, m, e] = counters();
    let mut graph = chain(&s, &m, &e);
    let runtime = FlowRuntime::default();

    let results = runtime.execute(&mut graph).await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].node_id, NodeId(3));
    assert_eq!(results[0].title, "E");
    assert_eq!(results[0].value, Some(json!("HELLO!")));
    assert_eq!(results[0].error, None);
    assert_eq!(s.load(Ordering::SeqCst), 1);
    assert_eq!(m.load(Ordering::SeqCst), 1);
    assert_eq!(e.load(Ordering::SeqCst), 1);
    assert_eq!(runtime.status(), FlowStatus::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_diamond_shares_upstream_node() {
    let [s, a, b, t] = counters();
    let mut graph = FlowGraph::new(
        vec![
            Node::new(NodeData::new(1, "S", "constant").with_output(10), constant(&s, json!("x"))),
            Node::new(NodeData::new(2, "A", "map").with_input(20).with_output(21), map_first(&a, upper)),
            Node::new(NodeData::new(3, "B", "map").with_input(30).with_output(31), map_first(&b, |v| v.clone())),
            Node::new(
                NodeData::new(4, "T", "concat").with_input(40).with_input(41),
                {
                    let t = t.clone();
                    Arc::new(FnBehavior::new("concat", move |ctx| {
                        let t = t.clone();
                        async move {
                            t.fetch_add(1, Ordering::SeqCst);
                            let joined: String = ctx
                                .input_values()
                                .into_iter()
                                .flatten()
                                .filter_map(Value::as_str)
                                .collect();
                            Ok(NodeOutput::value(joined))
                        }
                    }))
                },
            ),
        ],
        vec![link(10, 20), link(10, 30), link(21, 40), link(31, 41)],
    )
    .unwrap();

    let results = FlowRuntime::default().execute(&mut graph).await.unwrap();

    assert_eq!(results[0].value, Some(json!("Xx")));
    assert_eq!(s.load(Ordering::SeqCst), 1);
    assert_eq!(a.load(Ordering::SeqCst), 1);
    assert_eq!(b.load(Ordering::SeqCst), 1);
    assert_eq!(t.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_multi_output_projection() {
    let [c, d] = counters();
    let producer = Arc::new(FnBehavior::new("pair", |_ctx| async {
        Ok(NodeOutput::sockets([(SocketId(10), "x"), (SocketId(11), "y")]))
    }));
    let mut graph = FlowGraph::new(
        vec![
            Node::new(
                NodeData::new(1, "P", "pair").with_output(10).with_output(11).with_output(12),
                producer,
            ),
            Node::new(NodeData::new(2, "C", "map").with_input(20), map_first(&c, |v| v.clone())),
            Node::new(NodeData::new(3, "D", "map").with_input(30), map_first(&d, |v| v.clone())),
        ],
        // socket 12 is declared but the producer never fills it
        vec![link(11, 20), link(12, 30)],
    )
    .unwrap();

    let results = FlowRuntime::default().execute(&mut graph).await.unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].value, Some(json!("y")));
    assert_eq!(results[1].value, Some(Value::Null));
    assert!(results.iter().all(|r| r.is_ok()));
}

#[tokio::test]
async fn test_failure_is_isolated_to_dependents() {
    let [y, z] = counters();
    let mut graph = FlowGraph::new(
        vec![
            Node::new(NodeData::new(1, "X", "failing").with_output(10), failing("boom")),
            Node::new(NodeData::new(2, "Y", "map").with_input(20), map_first(&y, |v| v.clone())),
            Node::new(NodeData::new(3, "Z", "constant"), constant(&z, json!(7))),
        ],
        vec![link(10, 20)],
    )
    .unwrap();
    let runtime = FlowRuntime::default();

    let results = runtime.execute(&mut graph).await.unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].node_id, NodeId(2));
    assert_eq!(results[0].error.as_deref(), Some("boom"));
    assert_eq!(results[0].value, None);
    assert_eq!(results[1].node_id, NodeId(3));
    assert_eq!(results[1].value, Some(json!(7)));
    assert_eq!(y.load(Ordering::SeqCst), 0);
    assert_eq!(runtime.status(), FlowStatus::Failed);

    // Merge-back records the failure on both the origin and its dependent
    let x = &graph.node(NodeId(1)).unwrap().data;
    assert_eq!(x.error.as_deref(), Some("boom"));
    assert_eq!(x.result, None);
    assert_eq!(graph.node(NodeId(2)).unwrap().data.error.as_deref(), Some("boom"));
    assert_eq!(graph.node(NodeId(3)).unwrap().data.result, Some(json!(7)));
}

#[tokio::test]
async fn test_results_are_merged_back() {
    let [s, m, e] = counters();
    let mut graph = chain(&s, &m, &e);
    graph.nodes().iter().for_each(|n| assert!(n.data.result.is_none()));

    FlowRuntime::default().execute(&mut graph).await.unwrap();

    let result_of = |id| graph.node(NodeId(id)).unwrap().data.result.clone();
    assert_eq!(result_of(1), Some(json!("hello")));
    assert_eq!(result_of(2), Some(json!("HELLO")));
    assert_eq!(result_of(3), Some(json!("HELLO!")));
    assert!(graph.nodes().iter().all(|n| !n.data.processing && n.data.error.is_none()));
}

#[tokio::test]
async fn test_second_execute_is_rejected_while_running() {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let mut graph = FlowGraph::new(
        vec![Node::new(NodeData::new(1, "slow", "gated"), gated(&started, &release, json!("done")))],
        vec![],
    )
    .unwrap();

    let [s, m, e] = counters();
    let mut other = chain(&s, &m, &e);

    let runtime = Arc::new(FlowRuntime::default());
    let handle = {
        let runtime = runtime.clone();
        tokio::spawn(async move { runtime.execute(&mut graph).await })
    };

    started.notified().await;
    assert!(runtime.is_running());

    let err = runtime.execute(&mut other).await.unwrap_err();
    assert!(matches!(err, FlowError::AlreadyExecuting));
    assert_eq!(err.to_string(), "flow is already executing");
    assert_eq!(s.load(Ordering::SeqCst), 0);
    assert!(runtime.is_running());

    release.notify_one();
    let results = handle.await.unwrap().unwrap();
    assert_eq!(results[0].value, Some(json!("done")));
    assert_eq!(runtime.status(), FlowStatus::Completed);

    // A finished runtime accepts the next run
    runtime.execute(&mut other).await.unwrap();
    assert_eq!(s.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_no_terminal_nodes() {
    let [a, b] = counters();
    let observer = Arc::new(RecordingObserver::new());
    let mut graph = FlowGraph::new(
        vec![
            Node::new(NodeData::new(1, "A", "map").with_input(1).with_output(2), map_first(&a, |v| v.clone())),
            Node::new(NodeData::new(2, "B", "map").with_input(3).with_output(4), map_first(&b, |v| v.clone())),
        ],
        vec![link(2, 3), link(4, 1)],
    )
    .unwrap();
    let runtime = FlowRuntime::with_observer(FlowConfig::default(), observer.clone());

    let err = runtime.execute(&mut graph).await.unwrap_err();

    assert!(matches!(err, FlowError::NoTerminalNodes));
    assert!(err.is_structural());
    assert_eq!(runtime.status(), FlowStatus::Failed);
    assert_eq!(a.load(Ordering::SeqCst) + b.load(Ordering::SeqCst), 0);
    assert_eq!(
        observer.events(),
        vec![FlowEvent::Failed {
            message: err.to_string()
        }]
    );
}

#[tokio::test]
async fn test_cycle_is_rejected_before_any_node_runs() {
    let [a, b, t] = counters();
    let mut graph = FlowGraph::new(
        vec![
            Node::new(NodeData::new(1, "A", "map").with_input(1).with_output(2), map_first(&a, |v| v.clone())),
            Node::new(
                NodeData::new(2, "B", "map").with_input(3).with_output(4).with_output(5),
                map_first(&b, |v| v.clone()),
            ),
            Node::new(NodeData::new(3, "T", "map").with_input(6), map_first(&t, |v| v.clone())),
        ],
        vec![link(2, 3), link(4, 1), link(5, 6)],
    )
    .unwrap();
    let runtime = FlowRuntime::default();

    let err = runtime.execute(&mut graph).await.unwrap_err();

    assert!(matches!(err, FlowError::CycleDetected { .. }));
    assert_eq!(runtime.status(), FlowStatus::Failed);
    let invoked = a.load(Ordering::SeqCst) + b.load(Ordering::SeqCst) + t.load(Ordering::SeqCst);
    assert_eq!(invoked, 0);
    assert!(graph.nodes().iter().all(|n| n.data.result.is_none() && n.data.error.is_none()));
}

#[tokio::test]
async fn test_progress_reaches_total() {
    let [s, m, e, i] = counters();
    let mut graph = chain(&s, &m, &e);
    // An isolated node is its own terminal and still counts
    let mut nodes = graph.nodes().to_vec();
    nodes.push(Node::new(NodeData::new(4, "I", "constant"), constant(&i, json!(1))));
    graph = FlowGraph::new(nodes, graph.connections().to_vec()).unwrap();

    let observer = Arc::new(RecordingObserver::new());
    let runtime = FlowRuntime::with_observer(FlowConfig::default(), observer.clone());
    runtime.execute(&mut graph).await.unwrap();

    let progress = observer.progress();
    assert_eq!(progress.len(), 4);
    assert!(progress.iter().all(|&(_, total)| total == 4));
    assert!(progress.windows(2).all(|w| w[0].0 < w[1].0));
    assert_eq!(progress.last(), Some(&(4, 4)));
    assert_eq!(runtime.progress(), FlowProgress { done: 4, total: 4 });
}

#[tokio::test]
async fn test_observer_sees_node_lifecycle() {
    let [s, m, e] = counters();
    let mut graph = chain(&s, &m, &e);
    let observer = Arc::new(RecordingObserver::new());
    let runtime = FlowRuntime::with_observer(FlowConfig::default(), observer.clone());

    let results = runtime.execute(&mut graph).await.unwrap();
    let events = observer.events();

    let started: Vec<NodeId> = events
        .iter()
        .filter_map(|e| match e {
            FlowEvent::NodeStarted { node_id, .. } => Some(*node_id),
            _ => None,
        })
        .collect();
    // Dependencies settle before their consumers start
    assert_eq!(started, vec![NodeId(1), NodeId(2), NodeId(3)]);

    let completed = events
        .iter()
        .filter(|e| matches!(e, FlowEvent::NodeCompleted { .. }))
        .count();
    assert_eq!(completed, 3);
    assert_eq!(events.last(), Some(&FlowEvent::Completed { results }));

    let envelopes = observer.envelopes();
    let run_id = runtime.run_id().unwrap();
    assert!(envelopes.iter().all(|env| env.run_id == run_id));
}

#[tokio::test]
async fn test_cancel_returns_to_idle_without_merging() {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let [e] = counters();
    let mut graph = FlowGraph::new(
        vec![
            Node::new(NodeData::new(1, "slow", "gated").with_output(10), gated(&started, &release, json!("late"))),
            Node::new(NodeData::new(2, "E", "map").with_input(20), map_first(&e, |v| v.clone())),
        ],
        vec![link(10, 20)],
    )
    .unwrap();

    let observer = Arc::new(RecordingObserver::new());
    let runtime = Arc::new(FlowRuntime::with_observer(FlowConfig::default(), observer.clone()));
    let handle = {
        let runtime = runtime.clone();
        tokio::spawn(async move {
            let outcome = runtime.execute(&mut graph).await;
            (outcome, graph)
        })
    };

    started.notified().await;
    assert!(runtime.cancel());

    let (outcome, graph) = handle.await.unwrap();
    assert!(matches!(outcome, Err(FlowError::Cancelled { .. })));
    assert_eq!(runtime.status(), FlowStatus::Idle);
    assert!(!runtime.cancel());
    assert!(graph.nodes().iter().all(|n| n.data.result.is_none() && n.data.error.is_none()));

    // The abandoned behavior finishes, but nobody hears about it
    release.notify_one();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(e.load(Ordering::SeqCst), 0);
    let events = observer.events();
    assert!(events.iter().all(|e| !matches!(
        e,
        FlowEvent::NodeCompleted { .. } | FlowEvent::Completed { .. } | FlowEvent::Failed { .. }
    )));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_random_dags_execute_each_node_once() {
    for seed in 0..20u64 {
        let mut rng = fastrand::Rng::with_seed(seed);
        let size = rng.usize(2..16);
        let counts: Arc<Mutex<HashMap<u64, usize>>> = Arc::default();

        let mut nodes = Vec::with_capacity(size);
        let mut connections = Vec::new();
        for id in 0..size as u64 {
            let output = id * 100 + 99;
            let mut data = NodeData::new(id, format!("n{}", id), "count").with_output(output);
            for (slot, upstream) in (0..id).filter(|_| rng.u8(..4) == 0).enumerate() {
                let input = id * 100 + slot as u64;
                data = data.with_input(input);
                connections.push(link(upstream * 100 + 99, input));
            }

            let counts = counts.clone();
            let behavior = FnBehavior::new("count", move |ctx| {
                let counts = counts.clone();
                async move {
                    *counts.lock().unwrap().entry(ctx.node.id.0).or_default() += 1;
                    let sum: u64 = ctx.input_values().into_iter().flatten().filter_map(Value::as_u64).sum();
                    Ok(NodeOutput::value(sum + 1))
                }
            });
            nodes.push(Node::new(data, Arc::new(behavior)));
        }

        let mut graph = FlowGraph::new(nodes, connections).unwrap();
        let terminals = graph.terminal_nodes();
        let runtime = FlowRuntime::default();
        let results = runtime.execute(&mut graph).await.unwrap();

        assert_eq!(results.len(), terminals.len(), "seed {}", seed);
        let counts = counts.lock().unwrap();
        assert_eq!(counts.len(), size, "seed {}", seed);
        assert!(counts.values().all(|&n| n == 1), "seed {}: {:?}", seed, counts);
        assert_eq!(runtime.progress(), FlowProgress { done: size, total: size }, "seed {}", seed);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_behavior_limit_serializes_fan_out() {
    let [s] = counters();
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut nodes = vec![Node::new(
        NodeData::new(1, "S", "constant").with_output(10),
        constant(&s, json!(1)),
    )];
    let mut connections = Vec::new();
    for id in 2..10u64 {
        let active = active.clone();
        let peak = peak.clone();
        let behavior = FnBehavior::new("tracked", move |ctx| {
            let active = active.clone();
            let peak = peak.clone();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(NodeOutput::Value(ctx.first_input().cloned().unwrap_or(Value::Null)))
            }
        });
        nodes.push(Node::new(NodeData::new(id, format!("T{}", id), "tracked").with_input(id * 10), Arc::new(behavior)));
        connections.push(link(10, id * 10));
    }
    let mut graph = FlowGraph::new(nodes, connections).unwrap();

    let config = FlowConfig {
        max_concurrent_behaviors: Some(1),
        ..Default::default()
    };
    let runtime = FlowRuntime::new(config);
    // Terminals hold no permit while they wait on their shared source
    let results = tokio::time::timeout(Duration::from_secs(5), runtime.execute(&mut graph))
        .await
        .expect("limited run should not deadlock")
        .unwrap();

    assert_eq!(results.len(), 8);
    assert!(results.iter().all(|r| r.value == Some(json!(1))));
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(s.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_disabled_cycle_check() {
    let config = FlowConfig {
        validate_acyclic: false,
        ..Default::default()
    };

    // Acyclic graphs run as usual
    let [s, m, e] = counters();
    let mut graph = chain(&s, &m, &e);
    let runtime = FlowRuntime::new(config.clone());
    let results = runtime.execute(&mut graph).await.unwrap();
    assert_eq!(results[0].value, Some(json!("HELLO!")));

    // A cycle is no longer rejected: its nodes wait on each other forever
    let [a, b, t] = counters();
    let mut cyclic = FlowGraph::new(
        vec![
            Node::new(NodeData::new(1, "A", "map").with_input(1).with_output(2), map_first(&a, |v| v.clone())),
            Node::new(
                NodeData::new(2, "B", "map").with_input(3).with_output(4).with_output(5),
                map_first(&b, |v| v.clone()),
            ),
            Node::new(NodeData::new(3, "T", "map").with_input(6), map_first(&t, |v| v.clone())),
        ],
        vec![link(2, 3), link(4, 1), link(5, 6)],
    )
    .unwrap();
    let runtime = FlowRuntime::new(config);
    let outcome =
        tokio::time::timeout(Duration::from_millis(200), runtime.execute(&mut cyclic)).await;

    assert!(outcome.is_err());
    // Dropping the stalled run returns the runtime to Idle
    assert_eq!(runtime.status(), FlowStatus::Idle);
    let invoked = a.load(Ordering::SeqCst) + b.load(Ordering::SeqCst) + t.load(Ordering::SeqCst);
    assert_eq!(invoked, 0);
}
