use crate::{
    events::{EventBus, RunLogger},
    ExecutionId, ExecutionResult, Graph, LoopState, Node, NodeError, Value,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Single-node dispatch capability of the engine.
///
/// Executors reach it through [`ExecutionContext::dispatcher`] to invoke
/// other nodes of the same graph, e.g. as tools. Dispatch runs exactly one
/// node under the engine's timeout and retry policy; it never traverses.
/// Heartbeats of the dispatched node are forwarded to `caller`.
#[async_trait]
pub trait NodeDispatch: Send + Sync {
    async fn dispatch_node(
        &self,
        node_id: &str,
        input: Value,
        caller: &Heartbeat,
    ) -> Result<ExecutionResult, NodeError>;
}

/// Liveness signal for long-running executors.
///
/// Each [`beat`](Heartbeat::beat) pushes the invocation deadline out to
/// `last_beat + timeout`.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    last: Arc<watch::Sender<Instant>>,
    parent: Option<Box<Heartbeat>>,
}

impl Heartbeat {
    pub fn new() -> Self {
        let (last, _) = watch::channel(Instant::now());
        Self {
            last: Arc::new(last),
            parent: None,
        }
    }

    /// Heartbeat whose beats also reach `parent`. Creating it counts as a
    /// beat for the parent.
    pub fn linked_to(parent: &Heartbeat) -> Self {
        parent.beat();
        Self {
            parent: Some(Box::new(parent.clone())),
            ..Self::new()
        }
    }

    pub fn beat(&self) {
        self.last.send_replace(Instant::now());
        if let Some(parent) = &self.parent {
            parent.beat();
        }
    }

    pub fn last_beat(&self) -> Instant {
        *self.last.borrow()
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

/// Loop state slot handed to loop executors. The executor creates the state on
/// the first visit and clears it when the loop completes.
pub type LoopSlot = Arc<Mutex<Option<LoopState>>>;

/// Execution context passed to each node invocation
#[derive(Clone)]
pub struct ExecutionContext {
    pub node_id: String,
    pub node_name: String,
    pub node_type: String,

    /// The graph being run; read-only for the whole run.
    pub graph: Arc<Graph>,

    /// Log sink scoped to this node.
    pub logger: RunLogger,

    pub heartbeat: Heartbeat,

    /// Cancelled when the run is stopped.
    pub abort: CancellationToken,

    /// Zero on the first attempt.
    pub retry_count: u32,

    pub dispatcher: Arc<dyn NodeDispatch>,

    /// Present only for loop-kind nodes.
    pub loop_state: Option<LoopSlot>,
}

impl ExecutionContext {
    pub fn new(
        node: &Node,
        graph: Arc<Graph>,
        logger: RunLogger,
        dispatcher: Arc<dyn NodeDispatch>,
    ) -> Self {
        Self {
            node_id: node.id.clone(),
            node_name: node.display_name().to_string(),
            node_type: node.node_type.clone(),
            graph,
            logger,
            heartbeat: Heartbeat::new(),
            abort: CancellationToken::new(),
            retry_count: 0,
            dispatcher,
            loop_state: None,
        }
    }

    /// Context for running an executor outside an engine run. Dispatch
    /// requests fail with a tool-resolution error.
    pub fn detached(node: &Node, events: &EventBus) -> Self {
        let logger = events.create_logger(ExecutionId::nil(), &node.id, node.display_name());
        Self::new(node, Arc::new(Graph::default()), logger, Arc::new(DetachedDispatch))
    }

    pub fn with_abort(mut self, abort: CancellationToken) -> Self {
        self.abort = abort;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: Heartbeat) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_loop_state(mut self, slot: LoopSlot) -> Self {
        self.loop_state = Some(slot);
        self
    }

    /// Signal liveness to the engine's timeout.
    pub fn heartbeat(&self) {
        self.heartbeat.beat();
    }

    pub fn is_cancelled(&self) -> bool {
        self.abort.is_cancelled()
    }

    pub fn ensure_not_cancelled(&self) -> Result<(), NodeError> {
        if self.abort.is_cancelled() {
            Err(NodeError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Runs another node of the graph. Its heartbeats keep this node alive.
    pub async fn dispatch(&self, node_id: &str, input: Value) -> Result<ExecutionResult, NodeError> {
        self.dispatcher
            .dispatch_node(node_id, input, &self.heartbeat)
            .await
    }

    pub fn loop_slot(&self) -> Result<&LoopSlot, NodeError> {
        self.loop_state.as_ref().ok_or_else(|| {
            NodeError::Configuration(format!(
                "node '{}' was invoked without loop state",
                self.node_id
            ))
        })
    }
}

struct DetachedDispatch;

#[async_trait]
impl NodeDispatch for DetachedDispatch {
    async fn dispatch_node(
        &self,
        node_id: &str,
        _input: Value,
        _caller: &Heartbeat,
    ) -> Result<ExecutionResult, NodeError> {
        Err(NodeError::ToolResolution(format!(
            "no engine attached to dispatch node '{}'",
            node_id
        )))
    }
}
