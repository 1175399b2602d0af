use async_trait::async_trait;
use futures::future::{try_join_all, BoxFuture, FutureExt};
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use weavecore::{
    Edge, EventBus, ExecutionContext, ExecutionId, ExecutionResult, FlowError, Graph, GraphError,
    Heartbeat, LoopData, Node, NodeConfig, NodeDispatch, NodeError, NodeKind, Route, RunLogger,
    Value,
};

use crate::control::RunControl;
use crate::index::GraphIndex;
use crate::invoke::NodePolicy;
use crate::merge::{Arrival, MergeMode};
use crate::registry::NodeRegistry;
use crate::resources::{is_tool_edge, resolve_agent_config};
use crate::runtime::{EngineConfig, RunOptions};
use crate::state::{Frames, RunReport, RunState};

/// Tail output of a traversal path. `None` when the path ended without
/// running anything (a skipped revisit, a merge arrival handed to another
/// path).
type PathResult = Result<Option<Value>, FlowError>;

/// Where a path goes after visiting one node.
enum Hop<'a> {
    /// The path ended here with this tail.
    Done(Option<Value>),
    /// Exactly one edge continues the path.
    Next {
        edge: &'a Edge,
        payload: Value,
        frames: Frames,
    },
}

/// Everything one run needs, shared by every path of the traversal.
#[derive(Clone)]
pub(crate) struct RunScope {
    inner: Arc<ScopeInner>,
}

pub(crate) struct ScopeInner {
    pub(crate) execution_id: ExecutionId,
    pub(crate) graph: Arc<Graph>,
    pub(crate) index: GraphIndex,
    pub(crate) registry: Arc<NodeRegistry>,
    pub(crate) config: Arc<EngineConfig>,
    pub(crate) control: RunControl,
    pub(crate) events: Arc<EventBus>,
    pub(crate) abort: CancellationToken,
    pub(crate) options: RunOptions,
    pub(crate) state: RunState,
}

impl Deref for RunScope {
    type Target = ScopeInner;

    fn deref(&self) -> &ScopeInner {
        &self.inner
    }
}

impl RunScope {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        execution_id: ExecutionId,
        graph: Arc<Graph>,
        registry: Arc<NodeRegistry>,
        config: Arc<EngineConfig>,
        control: RunControl,
        events: Arc<EventBus>,
        abort: CancellationToken,
        options: RunOptions,
    ) -> Self {
        let index = GraphIndex::build(&graph);
        Self {
            inner: Arc::new(ScopeInner {
                execution_id,
                graph,
                index,
                registry,
                config,
                control,
                events,
                abort,
                options,
                state: RunState::default(),
            }),
        }
    }

    pub(crate) fn logger_for(&self, node: &Node) -> RunLogger {
        self.events
            .create_logger(self.execution_id, &node.id, node.display_name())
    }

    pub(crate) fn context_for(
        &self,
        node: &Node,
        logger: &RunLogger,
        attempt: u32,
        heartbeat: Heartbeat,
    ) -> ExecutionContext {
        let dispatcher: Arc<dyn NodeDispatch> = Arc::new(self.clone());
        ExecutionContext::new(node, self.graph.clone(), logger.clone(), dispatcher)
            .with_abort(self.abort.clone())
            .with_heartbeat(heartbeat)
            .with_retry_count(attempt)
    }

    /// Agents see their resources folded into the config; everyone else gets
    /// their own `data`.
    fn config_for(&self, node: &Node, kind: NodeKind) -> NodeConfig {
        if kind == NodeKind::Agent {
            resolve_agent_config(&self.graph, &self.index, &self.registry, node)
        } else {
            node.data.clone()
        }
    }

    /// Node-start checkpoint: abort, pause, and the debug step.
    async fn gate(&self, node: &Node) -> Result<(), FlowError> {
        if self.abort.is_cancelled() {
            return Err(FlowError::Cancelled);
        }
        self.control.wait_until_resumed(&self.abort).await?;
        if self.options.debug {
            tracing::debug!("Waiting for step before node {}", node.id);
            self.control.wait_for_step(&self.abort).await?;
        }
        Ok(())
    }

    /// Runs `node_id` with `input` and everything reachable from it.
    ///
    /// A hop along a single edge continues in this loop; only a real fan-out
    /// nests another traversal future, so long chains and edge cycles run in
    /// constant stack until `max_path_depth` stops them.
    pub(crate) fn execute_from_node<'a>(
        &'a self,
        node_id: &'a str,
        input: Value,
        via: Option<&'a Edge>,
        frames: Frames,
    ) -> BoxFuture<'a, PathResult> {
        async move {
            let (mut node_id, mut input, mut via, mut frames) = (node_id, input, via, frames);
            // output handed to `node_id`; the tail when `node_id` runs nothing
            let mut handed_over = None;
            loop {
                match self.visit(node_id, input, via, frames).await? {
                    Hop::Done(tail) => return Ok(tail.or(handed_over)),
                    Hop::Next {
                        edge,
                        payload,
                        frames: next,
                    } => {
                        handed_over = Some(payload.clone());
                        node_id = edge.target.as_str();
                        input = payload;
                        via = Some(edge);
                        frames = next;
                    }
                }
            }
        }
        .boxed()
    }

    /// Runs one node of a path and decides where the path goes next.
    async fn visit<'a>(
        &'a self,
        node_id: &'a str,
        input: Value,
        via: Option<&'a Edge>,
        frames: Frames,
    ) -> Result<Hop<'a>, FlowError> {
        let node = self
            .graph
            .find_node(node_id)
            .ok_or_else(|| GraphError::NodeNotFound(node_id.to_string()))?;

        if frames.depth() > self.config.max_path_depth {
            return Err(FlowError::LoopLimit {
                node_id: node_id.to_string(),
                limit: self.config.max_path_depth,
            });
        }

        // A body path that loops back to its driving loop node ends the
        // iteration; the payload becomes the iteration result.
        if frames.contains(node_id) {
            return Ok(Hop::Done(Some(input)));
        }

        let kind = self.registry.kind_of(&node.node_type);
        if kind == NodeKind::Resource {
            return Ok(Hop::Done(None));
        }

        let input = if kind == NodeKind::Merge {
            match self.arrive_at_merge(node, via, input).await? {
                Some(inputs) => Value::Array(inputs),
                None => return Ok(Hop::Done(None)),
            }
        } else {
            input
        };

        if !self.state.mark_visited(node_id, &input, &frames).await {
            tracing::debug!("Skipping repeated visit of {}", node_id);
            return Ok(Hop::Done(None));
        }
        if self.state.count_visit() > self.config.max_node_visits {
            return Err(FlowError::LoopLimit {
                node_id: node_id.to_string(),
                limit: self.config.max_node_visits,
            });
        }

        if kind == NodeKind::Loop {
            let results = self.run_loop(node, input, &frames).await?;
            let done = self.edges_from(node, NodeKind::Loop, 1);
            return self.proceed(done, results, frames).await;
        }

        self.gate(node).await?;
        let config = self.config_for(node, kind);
        let result = self.invoke(node, kind, &config, input).await?;
        let edges = self.route(node, kind, &result)?;
        self.proceed(edges, result.output, frames).await
    }

    /// Edges a completed node continues on, according to its route.
    fn route(
        &self,
        node: &Node,
        kind: NodeKind,
        result: &ExecutionResult,
    ) -> Result<Vec<&Edge>, FlowError> {
        match &result.route {
            Route::FanOut => Ok(self
                .index
                .outgoing(&self.graph, &node.id)
                .into_iter()
                .filter(|e| self.traversable(kind, e))
                .collect()),
            Route::Output(index) => {
                let edges = self.edges_from(node, kind, *index);
                if edges.is_empty() {
                    tracing::debug!("Node {} took output-{} with no edge", node.id, index);
                }
                Ok(edges)
            }
            Route::Loop(_) => Err(FlowError::NodeExecution {
                node_id: node.id.clone(),
                attempts: 1,
                message: "only loop nodes may return loop data".to_string(),
            }),
        }
    }

    /// A lone edge becomes the next hop of the current path; anything wider
    /// is traversed here.
    async fn proceed<'a>(
        &'a self,
        mut edges: Vec<&'a Edge>,
        payload: Value,
        frames: Frames,
    ) -> Result<Hop<'a>, FlowError> {
        if edges.len() == 1 {
            if let Some(edge) = edges.pop() {
                return Ok(Hop::Next {
                    edge,
                    payload,
                    frames: frames.descend(),
                });
            }
        }
        self.fan_out(edges, payload, frames).await.map(Hop::Done)
    }

    /// Sends `payload` down every edge; siblings interleave on this task.
    async fn fan_out(&self, edges: Vec<&Edge>, payload: Value, frames: Frames) -> PathResult {
        if edges.is_empty() {
            return Ok(Some(payload));
        }
        let next = frames.descend();
        let branches = edges.into_iter().map(|edge| {
            self.execute_from_node(&edge.target, payload.clone(), Some(edge), next.clone())
        });
        let tails = try_join_all(branches).await?;
        Ok(tails.into_iter().flatten().last().or(Some(payload)))
    }

    fn edges_from(&self, node: &Node, kind: NodeKind, output: usize) -> Vec<&Edge> {
        self.index
            .outgoing(&self.graph, &node.id)
            .into_iter()
            .filter(|e| e.output_index() == Some(output) && self.traversable(kind, e))
            .collect()
    }

    /// Resource edges and agent-to-tool edges carry configuration, not data.
    fn traversable(&self, kind: NodeKind, edge: &Edge) -> bool {
        if edge.resource_slot().is_some() {
            return false;
        }
        !(kind == NodeKind::Agent && is_tool_edge(&self.registry, &self.graph, edge))
    }

    /// Drives a loop node: first visit, one body traversal per iteration with
    /// a re-entrant visit after each. Returns the collected results.
    async fn run_loop(&self, node: &Node, input: Value, frames: &Frames) -> Result<Value, FlowError> {
        let entry = self.state.loop_entry(&node.id).await;
        let gate = entry.gate.lock().await;

        let driven = self.drive_iterations(node, input, frames).await;
        if driven.is_err() {
            *entry.state.lock().await = None;
        }
        drop(gate);
        driven
    }

    async fn drive_iterations(&self, node: &Node, input: Value, frames: &Frames) -> Result<Value, FlowError> {
        let mut visit = self.invoke_loop(node, input).await?;
        let mut iterations = 0usize;

        while !visit.1.done {
            iterations += 1;
            if iterations > self.config.max_loop_iterations {
                return Err(FlowError::LoopLimit {
                    node_id: node.id.clone(),
                    limit: self.config.max_loop_iterations,
                });
            }

            let (payload, data) = visit;
            tracing::debug!(
                "Loop {} iteration {}/{}",
                node.id,
                data.current_iteration,
                data.total_iterations
            );
            let body = self.edges_from(node, NodeKind::Loop, 0);
            let tail = self
                .fan_out(body, payload.clone(), frames.enter(&node.id, data.current_iteration))
                .await?
                .unwrap_or(payload);
            visit = self.invoke_loop(node, tail).await?;
        }
        Ok(visit.0)
    }

    async fn invoke_loop(&self, node: &Node, input: Value) -> Result<(Value, LoopData), FlowError> {
        self.gate(node).await?;
        let result = self
            .invoke(node, NodeKind::Loop, &node.data, input)
            .await?;
        match result.route {
            Route::Loop(data) => Ok((result.output, data)),
            _ => Err(FlowError::NodeExecution {
                node_id: node.id.clone(),
                attempts: 1,
                message: "loop node returned no loop data".to_string(),
            }),
        }
    }

    /// Registers one arrival at a merge node. Returns the ordered inputs when
    /// this arrival lets the executor run, `None` when another path takes over.
    async fn arrive_at_merge(
        &self,
        node: &Node,
        via: Option<&Edge>,
        payload: Value,
    ) -> Result<Option<Vec<Value>>, FlowError> {
        let mode = MergeMode::from_config(&node.data);
        let mut inbound: Vec<&Edge> = self
            .index
            .incoming(&self.graph, &node.id)
            .into_iter()
            .filter(|e| e.resource_slot().is_none())
            .collect();
        inbound.sort_by_key(|e| e.input_index().unwrap_or(0));

        let expected = node
            .data
            .get_u64("inputCount")
            .map(|n| n as usize)
            .unwrap_or(inbound.len())
            .max(1);
        let (edge_id, inbound_index) = match via {
            Some(edge) => (
                edge.id.clone(),
                inbound.iter().position(|e| e.id == edge.id).unwrap_or(0),
            ),
            None => (format!("direct-{}", node.id), 0),
        };

        let arrival = self
            .state
            .merges
            .arrive(&node.id, mode, expected, &edge_id, inbound_index, payload)
            .await;
        let rx = match arrival {
            Arrival::Ready(inputs) => return Ok(Some(inputs)),
            Arrival::Discarded => {
                tracing::debug!("Merge {} already fired, dropping arrival on {}", node.id, edge_id);
                return Ok(None);
            }
            Arrival::Pending(rx) => rx,
        };

        let wait = match node.data.get_u64("waitTimeout") {
            Some(ms) => Duration::from_millis(ms),
            None => NodePolicy::resolve(node, NodeKind::Merge, &self.config).timeout,
        };
        let started = Instant::now();
        let completed = tokio::select! {
            biased;
            _ = self.abort.cancelled() => return Err(FlowError::Cancelled),
            res = tokio::time::timeout(wait, async move {
                let mut rx = rx;
                let fired = rx.wait_for(|done| *done).await.is_ok();
                fired
            }) => res,
        };

        match completed {
            Ok(true) => Ok(None),
            Ok(false) => {
                tracing::debug!("Merge {} was abandoned by another path", node.id);
                Ok(None)
            }
            Err(_) => {
                let arrived = self.state.merges.abandon(&node.id).await;
                tracing::warn!(
                    "Merge {} gave up after {}ms with {}/{} inputs",
                    node.id,
                    wait.as_millis(),
                    arrived,
                    expected
                );
                let err = FlowError::Timeout {
                    node_id: node.id.clone(),
                    attempts: 0,
                    after_ms: wait.as_millis() as u64,
                };
                Err(self.fail(node, started, 0, err).await)
            }
        }
    }

    pub(crate) async fn finish(&self, started: Instant, outcome: PathResult) -> RunReport {
        let duration_ms = started.elapsed().as_millis() as u64;
        let (output, failure) = match outcome {
            Ok(output) => (output, None),
            Err(err) => (None, Some(err)),
        };
        RunReport {
            execution_id: self.execution_id,
            success: failure.is_none(),
            output,
            results: self.state.results.records().await,
            error: failure.as_ref().map(ToString::to_string),
            failure,
            node_results: self.state.results.snapshot().await,
            duration_ms,
        }
    }
}

#[async_trait]
impl NodeDispatch for RunScope {
    /// Runs exactly one node under the invocation wrapper. Nothing downstream
    /// of it is traversed.
    async fn dispatch_node(
        &self,
        node_id: &str,
        input: Value,
        caller: &Heartbeat,
    ) -> Result<ExecutionResult, NodeError> {
        let node = self.graph.find_node(node_id).ok_or_else(|| {
            NodeError::ToolResolution(format!("node '{}' is not part of the graph", node_id))
        })?;
        let kind = self.registry.kind_of(&node.node_type);
        let config = self.config_for(node, kind);
        tracing::debug!("Dispatching node {} outside traversal", node_id);
        self.invoke_linked(node, kind, &config, input, Some(caller))
            .await
            .map_err(NodeError::from)
    }
}
