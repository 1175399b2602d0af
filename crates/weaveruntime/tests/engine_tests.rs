// crates/weaveruntime/tests/engine_tests.rs

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use weavecore::{
    ExecutionContext, ExecutionEvent, ExecutionResult, FlowError, Graph, GraphError, LoopState,
    Node, NodeConfig, NodeError, NodeExecutor, NodeKind, NodeMetadata, Value,
};
use weaveruntime::{Engine, EngineConfig, NodeRegistry, RunControl, RunOptions};

struct TestTrigger;

#[async_trait]
impl NodeExecutor for TestTrigger {
    fn node_type(&self) -> &str {
        "test.trigger"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(NodeKind::Trigger, "test", "Starts a run")
    }

    async fn execute(
        &self,
        _config: &NodeConfig,
        input: Value,
        _ctx: &ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        Ok(ExecutionResult::success(input))
    }
}

/// Passes input through and counts how often it ran.
#[derive(Default)]
struct Echo {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl NodeExecutor for Echo {
    fn node_type(&self) -> &str {
        "test.echo"
    }

    async fn execute(
        &self,
        config: &NodeConfig,
        input: Value,
        _ctx: &ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match config.get_str("tag") {
            Some(tag) => Ok(ExecutionResult::success(tag)),
            None => Ok(ExecutionResult::success(input)),
        }
    }
}

/// Routes to the output named in its config.
struct Router;

#[async_trait]
impl NodeExecutor for Router {
    fn node_type(&self) -> &str {
        "test.route"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(NodeKind::Branch, "test", "Fixed routing")
    }

    async fn execute(
        &self,
        config: &NodeConfig,
        input: Value,
        _ctx: &ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        let output = config.get_u64("output").unwrap_or(0) as usize;
        Ok(ExecutionResult::branch(input, output))
    }
}

/// Fails until `failures` attempts have been made, then succeeds.
struct Flaky {
    failures: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl NodeExecutor for Flaky {
    fn node_type(&self) -> &str {
        "test.flaky"
    }

    async fn execute(
        &self,
        _config: &NodeConfig,
        _input: Value,
        _ctx: &ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(NodeError::ExecutionFailed(format!("failure #{}", call + 1)))
        } else {
            Ok(ExecutionResult::success("recovered"))
        }
    }
}

/// Heartbeats every 10ms for `beatMs`, then either returns or hangs forever.
/// With `failFirst` the first attempt fails straight away.
struct Beating;

#[async_trait]
impl NodeExecutor for Beating {
    fn node_type(&self) -> &str {
        "test.beat"
    }

    async fn execute(
        &self,
        config: &NodeConfig,
        _input: Value,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        if config.get_bool("failFirst") == Some(true) && ctx.retry_count == 0 {
            return Err(NodeError::ExecutionFailed("first attempt fails".to_string()));
        }
        let beats = config.get_u64("beatMs").unwrap_or(0) / 10;
        for _ in 0..beats {
            tokio::time::sleep(Duration::from_millis(10)).await;
            ctx.heartbeat();
        }
        if config.get_bool("thenHang") == Some(true) {
            std::future::pending::<()>().await;
        }
        Ok(ExecutionResult::success(Value::from(beats)))
    }
}

struct Failing;

#[async_trait]
impl NodeExecutor for Failing {
    fn node_type(&self) -> &str {
        "test.fail"
    }

    async fn execute(
        &self,
        _config: &NodeConfig,
        _input: Value,
        _ctx: &ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        Ok(ExecutionResult::failure("boom"))
    }
}

/// Emits a new number on every pass, so a cycle through it never repeats.
struct Increment;

#[async_trait]
impl NodeExecutor for Increment {
    fn node_type(&self) -> &str {
        "test.inc"
    }

    async fn execute(
        &self,
        _config: &NodeConfig,
        input: Value,
        _ctx: &ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        Ok(ExecutionResult::success(input.to_number() + 1.0))
    }
}

/// Calls the node named by `target` through the engine's dispatcher.
struct Caller;

#[async_trait]
impl NodeExecutor for Caller {
    fn node_type(&self) -> &str {
        "test.call"
    }

    async fn execute(
        &self,
        config: &NodeConfig,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        let target = config.get_str("target").unwrap_or_default();
        match ctx.dispatch(target, input).await {
            Ok(result) => Ok(ExecutionResult::success(result.output)),
            Err(e) => Ok(ExecutionResult::success(format!("unavailable: {}", e))),
        }
    }
}

/// Counts to `iterations`, keeping its progress in the engine's loop slot.
struct CountedLoop;

#[async_trait]
impl NodeExecutor for CountedLoop {
    fn node_type(&self) -> &str {
        "test.loop"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(NodeKind::Loop, "test", "Counted loop")
    }

    async fn execute(
        &self,
        config: &NodeConfig,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        let mut slot = ctx.loop_slot()?.lock().await;
        match slot.as_mut() {
            Some(state) => state.advance(input),
            None => {
                let total = config.get_u64("iterations").unwrap_or(1) as usize;
                *slot = Some(LoopState::counted(total));
            }
        }
        let Some(state) = slot.as_mut() else {
            return Err(NodeError::ExecutionFailed("no loop state".to_string()));
        };
        let progress = state.progress();
        if progress.done {
            let results = std::mem::take(&mut state.results);
            *slot = None;
            return Ok(ExecutionResult::looping(Value::Array(results), progress));
        }
        Ok(ExecutionResult::looping(state.current_item(), progress))
    }
}

// Helper: registry with every test executor; `echo` shares its call counter.
fn create_test_engine(config: EngineConfig, echo_calls: Arc<AtomicUsize>) -> Engine {
    let mut registry = NodeRegistry::new();
    registry.register(Arc::new(TestTrigger));
    registry.register(Arc::new(Echo { calls: echo_calls }));
    registry.register(Arc::new(Router));
    registry.register(Arc::new(Flaky {
        failures: 2,
        calls: AtomicUsize::new(0),
    }));
    registry.register(Arc::new(Beating));
    registry.register(Arc::new(Failing));
    registry.register(Arc::new(Increment));
    registry.register(Arc::new(Caller));
    registry.register(Arc::new(CountedLoop));
    Engine::with_config(registry, config)
}

fn engine() -> Engine {
    create_test_engine(EngineConfig::default(), Arc::new(AtomicUsize::new(0)))
}

fn chain(nodes: Vec<Node>) -> Graph {
    let mut graph = Graph::new();
    let ids: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();
    for node in nodes {
        graph.add_node(node);
    }
    for pair in ids.windows(2) {
        graph.connect(pair[0].as_str(), 0, pair[1].as_str(), 0);
    }
    graph
}

#[tokio::test]
async fn test_branch_follows_selected_output() {
    let mut graph = Graph::new();
    graph.add_node(Node::new("start", "test.trigger"));
    graph.add_node(Node::new("route", "test.route").with_config("output", 1));
    graph.add_node(Node::new("yes", "test.echo").with_config("tag", "yes"));
    graph.add_node(Node::new("no", "test.echo").with_config("tag", "no"));
    graph.connect("start", 0, "route", 0);
    graph.connect("route", 0, "yes", 0);
    graph.connect("route", 1, "no", 0);

    let report = engine()
        .run(graph, Value::Null, RunOptions::default())
        .await
        .expect("valid graph");

    assert!(report.success);
    assert!(report.visited("no"));
    assert!(!report.visited("yes"), "output-0 must not be followed");
    assert_eq!(report.output, Some(Value::from("no")));
}

#[tokio::test]
async fn test_branch_without_edge_is_a_silent_dead_end() {
    let mut graph = chain(vec![
        Node::new("start", "test.trigger"),
        Node::new("route", "test.route").with_config("output", 2),
    ]);
    graph.add_node(Node::new("after", "test.echo"));
    graph.connect("route", 0, "after", 0);

    let report = engine()
        .run(graph, Value::from("payload"), RunOptions::default())
        .await
        .expect("valid graph");

    assert!(report.success);
    assert_eq!(report.results.len(), 2);
    assert!(!report.visited("after"));
    assert_eq!(report.output, Some(Value::from("payload")));
}

#[tokio::test(start_paused = true)]
async fn test_retry_reports_attempts_after_backoff() {
    let graph = chain(vec![
        Node::new("start", "test.trigger"),
        Node::new("flaky", "test.flaky")
            .with_config("maxRetries", 2)
            .with_config("retryDelay", 100),
    ]);
    let engine = engine();
    let mut events = engine.subscribe_events();

    let started = Instant::now();
    let report = engine
        .run(graph, Value::Null, RunOptions::default())
        .await
        .expect("valid graph");

    assert!(report.success, "third attempt should succeed: {:?}", report.error);
    let record = report.record_for("flaky").expect("flaky ran");
    assert_eq!(record.attempts, 3);
    assert!(started.elapsed() >= Duration::from_millis(300));

    let mut delays = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ExecutionEvent::NodeRetrying { delay_ms, .. } = event {
            delays.push(delay_ms);
        }
    }
    assert_eq!(delays, vec![100, 200]);
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted_fail_the_run() {
    let graph = chain(vec![
        Node::new("start", "test.trigger"),
        Node::new("flaky", "test.flaky")
            .with_config("maxRetries", 1)
            .with_config("retryDelay", 10),
    ]);

    let report = engine()
        .run(graph, Value::Null, RunOptions::default())
        .await
        .expect("valid graph");

    assert!(!report.success);
    match report.failure {
        Some(FlowError::NodeExecution { node_id, attempts, .. }) => {
            assert_eq!(node_id, "flaky");
            assert_eq!(attempts, 2);
        }
        other => panic!("expected node failure, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_silent_node_times_out() {
    let graph = chain(vec![
        Node::new("start", "test.trigger"),
        Node::new("stuck", "test.beat")
            .with_config("thenHang", true)
            .with_config("timeout", 50),
    ]);

    let started = Instant::now();
    let report = engine()
        .run(graph, Value::Null, RunOptions::default())
        .await
        .expect("valid graph");
    let elapsed = started.elapsed();

    assert!(!report.success);
    assert!(report.failure.as_ref().is_some_and(FlowError::is_timeout));
    assert!(elapsed >= Duration::from_millis(50));
    assert!(elapsed < Duration::from_millis(60), "took {:?}", elapsed);
    assert_eq!(report.record_for("stuck").map(|r| r.attempts), Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_keeps_long_node_alive() {
    let graph = chain(vec![
        Node::new("start", "test.trigger"),
        Node::new("worker", "test.beat")
            .with_config("beatMs", 550)
            .with_config("timeout", 50),
    ]);

    let report = engine()
        .run(graph, Value::Null, RunOptions::default())
        .await
        .expect("valid graph");

    assert!(report.success, "heartbeats should extend the deadline: {:?}", report.error);
    assert_eq!(report.output_of("worker"), Some(&Value::from(55)));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_follows_last_heartbeat() {
    let graph = chain(vec![
        Node::new("start", "test.trigger"),
        Node::new("worker", "test.beat")
            .with_config("beatMs", 100)
            .with_config("thenHang", true)
            .with_config("timeout", 50),
    ]);

    let started = Instant::now();
    let report = engine()
        .run(graph, Value::Null, RunOptions::default())
        .await
        .expect("valid graph");
    let elapsed = started.elapsed();

    assert!(report.failure.as_ref().is_some_and(FlowError::is_timeout));
    // last beat at 100ms, so the deadline lands one timeout later
    assert!(elapsed >= Duration::from_millis(150));
    assert!(elapsed <= Duration::from_millis(160), "took {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_timeouts_are_retried_with_backoff() {
    let graph = chain(vec![
        Node::new("start", "test.trigger"),
        Node::new("stuck", "test.beat")
            .with_config("thenHang", true)
            .with_config("timeout", 50)
            .with_config("maxRetries", 2)
            .with_config("retryDelay", 10),
    ]);
    let engine = engine();
    let mut events = engine.subscribe_events();

    let started = Instant::now();
    let report = engine
        .run(graph, Value::Null, RunOptions::default())
        .await
        .expect("valid graph");
    let elapsed = started.elapsed();

    match &report.failure {
        Some(FlowError::Timeout { node_id, attempts, after_ms }) => {
            assert_eq!(node_id, "stuck");
            assert_eq!(*attempts, 3);
            assert_eq!(*after_ms, 50);
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    // three 50ms attempts with 10ms and 20ms of backoff between them
    assert!(elapsed >= Duration::from_millis(180), "took {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(200), "took {:?}", elapsed);
    assert_eq!(report.record_for("stuck").map(|r| r.attempts), Some(3));

    let mut delays = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ExecutionEvent::NodeRetrying { delay_ms, .. } = event {
            delays.push(delay_ms);
        }
    }
    assert_eq!(delays, vec![10, 20]);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_extends_a_retried_attempt() {
    let graph = chain(vec![
        Node::new("start", "test.trigger"),
        Node::new("worker", "test.beat")
            .with_config("failFirst", true)
            .with_config("beatMs", 100)
            .with_config("timeout", 50)
            .with_config("maxRetries", 1)
            .with_config("retryDelay", 10),
    ]);

    let started = Instant::now();
    let report = engine()
        .run(graph, Value::Null, RunOptions::default())
        .await
        .expect("valid graph");

    assert!(report.success, "{:?}", report.error);
    assert!(started.elapsed() >= Duration::from_millis(110));
    let record = report.record_for("worker").expect("worker record");
    assert_eq!(record.attempts, 2);
    assert_eq!(record.output, Some(Value::from(10)));
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_without_retrying() {
    let graph = chain(vec![
        Node::new("start", "test.trigger"),
        Node::new("stuck", "test.beat")
            .with_config("thenHang", true)
            .with_config("maxRetries", 5),
    ]);
    let engine = engine();
    let control = engine.control();

    let (report, _) = tokio::join!(
        engine.run(graph, Value::Null, RunOptions::default()),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            control.stop();
        }
    );
    let report = report.expect("valid graph");

    assert!(!report.success);
    assert!(report.failure.as_ref().is_some_and(FlowError::is_cancelled));
    assert_eq!(report.record_for("stuck").map(|r| r.attempts), Some(1));
}

fn hanging() -> Graph {
    chain(vec![
        Node::new("start", "test.trigger"),
        Node::new("stuck", "test.beat").with_config("thenHang", true),
    ])
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_every_concurrent_run() {
    let engine = create_test_engine(
        EngineConfig::default().with_node_timeout_ms(10_000),
        Arc::new(AtomicUsize::new(0)),
    );

    let started = Instant::now();
    let (first, second, _) = tokio::join!(
        engine.run(hanging(), Value::Null, RunOptions::default()),
        engine.run(hanging(), Value::Null, RunOptions::default()),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            engine.stop();
        }
    );

    for report in [first, second] {
        let report = report.expect("valid graph");
        assert!(report.failure.as_ref().is_some_and(FlowError::is_cancelled), "{:?}", report.error);
    }
    assert!(started.elapsed() < Duration::from_secs(1), "took {:?}", started.elapsed());
}

#[tokio::test(start_paused = true)]
async fn test_own_control_stops_only_its_run() {
    let engine = engine();
    let own = RunControl::new();
    let working = chain(vec![
        Node::new("start", "test.trigger"),
        Node::new("worker", "test.beat").with_config("beatMs", 50),
    ]);

    let (stopped, finished, _) = tokio::join!(
        engine.run_with_control(hanging(), Value::Null, RunOptions::default(), &own),
        engine.run(working, Value::Null, RunOptions::default()),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            own.stop();
        }
    );

    let stopped = stopped.expect("valid graph");
    assert!(stopped.failure.as_ref().is_some_and(FlowError::is_cancelled));
    let finished = finished.expect("valid graph");
    assert!(finished.success, "{:?}", finished.error);
    assert_eq!(finished.output_of("worker"), Some(&Value::from(5)));
}

#[tokio::test(start_paused = true)]
async fn test_pause_holds_next_node_until_resume() {
    let calls = Arc::new(AtomicUsize::new(0));
    let engine = create_test_engine(EngineConfig::default(), calls.clone());
    let control = engine.control();
    let graph = chain(vec![
        Node::new("start", "test.trigger"),
        Node::new("a", "test.echo"),
        Node::new("b", "test.echo"),
    ]);

    engine.pause();
    let (report, _) = tokio::join!(
        engine.run(graph, Value::Null, RunOptions::default()),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert_eq!(calls.load(Ordering::SeqCst), 0, "paused run must not start nodes");
            control.resume();
        }
    );

    assert!(report.expect("valid graph").success);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_debug_mode_runs_one_node_per_step() {
    let calls = Arc::new(AtomicUsize::new(0));
    let engine = create_test_engine(EngineConfig::default(), calls.clone());
    let control = engine.control();
    let graph = chain(vec![
        Node::new("start", "test.trigger"),
        Node::new("a", "test.echo"),
        Node::new("b", "test.echo"),
    ]);

    let (report, _) = tokio::join!(
        engine.run(graph, Value::Null, RunOptions::debug()),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            control.step(); // start
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert_eq!(calls.load(Ordering::SeqCst), 0);
            control.step(); // a
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert_eq!(calls.load(Ordering::SeqCst), 1);
            control.step(); // b
        }
    );

    assert!(report.expect("valid graph").success);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_structural_errors_fail_before_traversal() {
    let engine = engine();

    let no_trigger = chain(vec![Node::new("a", "test.echo")]);
    let err = engine
        .run(no_trigger, Value::Null, RunOptions::default())
        .await
        .expect_err("no trigger");
    assert!(matches!(err, FlowError::Graph(GraphError::NoTriggerNodes)));

    let mut dangling = chain(vec![Node::new("start", "test.trigger")]);
    dangling.connect("start", 0, "ghost", 0);
    let err = engine
        .run(dangling, Value::Null, RunOptions::default())
        .await
        .expect_err("dangling edge");
    assert!(matches!(err, FlowError::Graph(GraphError::DanglingEdge { .. })));

    let unknown = chain(vec![
        Node::new("start", "test.trigger"),
        Node::new("x", "test.nope"),
    ]);
    let err = engine
        .run(unknown, Value::Null, RunOptions::default())
        .await
        .expect_err("unknown type");
    assert!(matches!(err, FlowError::Graph(GraphError::UnknownNodeType { .. })));
}

#[tokio::test]
async fn test_fan_out_reaches_every_sibling() {
    let calls = Arc::new(AtomicUsize::new(0));
    let engine = create_test_engine(EngineConfig::default(), calls.clone());
    let mut graph = Graph::new();
    graph.add_node(Node::new("start", "test.trigger"));
    for id in ["a", "b", "c"] {
        graph.add_node(Node::new(id, "test.echo"));
        graph.connect("start", 0, id, 0);
    }

    let report = engine
        .run(graph, Value::from(7), RunOptions::default())
        .await
        .expect("valid graph");

    assert!(report.success);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    for id in ["a", "b", "c"] {
        assert_eq!(report.output_of(id), Some(&Value::from(7)));
    }
}

#[tokio::test]
async fn test_failure_keeps_partial_results() {
    let graph = chain(vec![
        Node::new("start", "test.trigger"),
        Node::new("a", "test.echo"),
        Node::new("bad", "test.fail"),
        Node::new("never", "test.echo"),
    ]);

    let report = engine()
        .run(graph, Value::Null, RunOptions::default())
        .await
        .expect("valid graph");

    assert!(!report.success);
    assert!(report.record_for("a").is_some_and(|r| r.success));
    let failed = report.record_for("bad").expect("bad recorded");
    assert!(!failed.success);
    assert!(failed.error.as_deref().unwrap_or_default().contains("boom"));
    assert!(!report.visited("never"));
    assert_eq!(report.failure.as_ref().and_then(FlowError::node_id), Some("bad"));
}

#[tokio::test]
async fn test_identical_revisit_is_skipped() {
    let mut graph = chain(vec![
        Node::new("start", "test.trigger"),
        Node::new("a", "test.echo"),
        Node::new("b", "test.echo"),
    ]);
    graph.connect("b", 0, "a", 0);

    let report = engine()
        .run(graph, Value::from("same"), RunOptions::default())
        .await
        .expect("valid graph");

    assert!(report.success);
    assert_eq!(report.records_for("a").len(), 1);
    assert_eq!(report.records_for("b").len(), 1);
}

#[tokio::test]
async fn test_visit_budget_stops_changing_cycle() {
    let engine = create_test_engine(
        EngineConfig::default().with_max_node_visits(20),
        Arc::new(AtomicUsize::new(0)),
    );
    let mut graph = chain(vec![
        Node::new("start", "test.trigger"),
        Node::new("inc", "test.inc"),
    ]);
    graph.connect("inc", 0, "inc", 0);

    let report = engine
        .run(graph, Value::from(0), RunOptions::default())
        .await
        .expect("valid graph");

    assert!(!report.success);
    assert!(matches!(report.failure, Some(FlowError::LoopLimit { limit: 20, .. })));
}

#[tokio::test]
async fn test_path_depth_stops_changing_cycle_at_default_config() {
    let mut graph = chain(vec![
        Node::new("start", "test.trigger"),
        Node::new("a", "test.inc"),
        Node::new("b", "test.inc"),
    ]);
    graph.connect("b", 0, "a", 0);

    let report = engine()
        .run(graph, Value::from(0), RunOptions::default())
        .await
        .expect("valid graph");

    assert!(!report.success);
    match &report.failure {
        Some(FlowError::LoopLimit { node_id, limit }) => {
            assert_eq!(*limit, EngineConfig::default().max_path_depth);
            assert_eq!(node_id, "a");
        }
        other => panic!("expected path depth limit, got {:?}", other),
    }
    let cycled = report.records_for("a").len() + report.records_for("b").len();
    assert_eq!(cycled, 1_000);
}

#[tokio::test]
async fn test_long_chain_runs_within_path_depth() {
    let calls = Arc::new(AtomicUsize::new(0));
    let engine = create_test_engine(EngineConfig::default(), calls.clone());
    let mut nodes = vec![Node::new("start", "test.trigger")];
    nodes.extend((0..900).map(|i| Node::new(format!("n{}", i), "test.echo")));

    let report = engine
        .run(chain(nodes), Value::from("through"), RunOptions::default())
        .await
        .expect("valid graph");

    assert!(report.success, "{:?}", report.error);
    assert_eq!(report.output, Some(Value::from("through")));
    assert_eq!(calls.load(Ordering::SeqCst), 900);
}

#[tokio::test]
async fn test_loop_iteration_guard() {
    let engine = create_test_engine(
        EngineConfig::default().with_max_loop_iterations(5),
        Arc::new(AtomicUsize::new(0)),
    );
    let looped = |iterations: u64| {
        let mut graph = chain(vec![
            Node::new("start", "test.trigger"),
            Node::new("loop", "test.loop").with_config("iterations", iterations),
        ]);
        graph.add_node(Node::new("body", "test.echo"));
        graph.connect("loop", 0, "body", 0);
        graph
    };

    let report = engine
        .run(looped(5), Value::Null, RunOptions::default())
        .await
        .expect("valid graph");
    assert!(report.success, "{:?}", report.error);
    assert_eq!(report.records_for("body").len(), 5);

    let report = engine
        .run(looped(50), Value::Null, RunOptions::default())
        .await
        .expect("valid graph");
    assert!(!report.success);
    match &report.failure {
        Some(FlowError::LoopLimit { node_id, limit }) => {
            assert_eq!(node_id, "loop");
            assert_eq!(*limit, 5);
        }
        other => panic!("expected loop limit, got {:?}", other),
    }
    assert_eq!(report.records_for("body").len(), 5);
}

#[tokio::test]
async fn test_dispatch_runs_single_node() {
    let calls = Arc::new(AtomicUsize::new(0));
    let engine = create_test_engine(EngineConfig::default(), calls.clone());
    let mut graph = chain(vec![
        Node::new("start", "test.trigger"),
        Node::new("call", "test.call").with_config("target", "tool"),
    ]);
    // not reachable by traversal; only dispatched
    graph.add_node(Node::new("tool", "test.echo").with_config("tag", "from tool"));
    graph.add_node(Node::new("downstream", "test.echo"));
    graph.connect("tool", 0, "downstream", 0);

    let report = engine
        .run(graph, Value::Null, RunOptions::default())
        .await
        .expect("valid graph");

    assert!(report.success);
    assert_eq!(report.output_of("call"), Some(&Value::from("from tool")));
    assert!(report.visited("tool"));
    assert!(!report.visited("downstream"), "dispatch must not traverse");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_dispatch_to_missing_node_is_reported() {
    let graph = chain(vec![
        Node::new("start", "test.trigger"),
        Node::new("call", "test.call").with_config("target", "ghost"),
    ]);

    let report = engine()
        .run(graph, Value::Null, RunOptions::default())
        .await
        .expect("valid graph");

    let output = report.output_of("call").and_then(Value::as_str).unwrap_or_default();
    assert!(output.starts_with("unavailable: Tool resolution failed"), "{}", output);
}

#[tokio::test]
async fn test_events_bracket_the_run() {
    let engine = engine();
    let mut events = engine.subscribe_events();
    let graph = chain(vec![Node::new("start", "test.trigger"), Node::new("a", "test.echo")]);

    engine
        .run(graph, Value::Null, RunOptions::default())
        .await
        .expect("valid graph");

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(match event {
            ExecutionEvent::RunStarted { trigger_count, .. } => format!("run:{}", trigger_count),
            ExecutionEvent::NodeStarted { node_id, .. } => format!("start:{}", node_id),
            ExecutionEvent::NodeCompleted { node_id, .. } => format!("done:{}", node_id),
            ExecutionEvent::RunCompleted { success, .. } => format!("end:{}", success),
            _ => continue,
        });
    }
    assert_eq!(
        kinds,
        vec!["run:1", "start:start", "done:start", "start:a", "done:a", "end:true"]
    );
}
