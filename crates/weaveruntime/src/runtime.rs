use crate::{control::RunControl, executor::RunScope, registry::NodeRegistry, state::Frames, RunReport};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::Instant;
use weavecore::{EventBus, ExecutionEvent, FlowError, Graph, GraphError, Value};

/// Main engine for running graphs
pub struct Engine {
    registry: Arc<NodeRegistry>,
    config: Arc<EngineConfig>,
    control: RunControl,
    event_bus: Arc<EventBus>,
}

impl Engine {
    /// Create an engine with default settings
    pub fn new(registry: NodeRegistry) -> Self {
        Self::with_config(registry, EngineConfig::default())
    }

    pub fn with_config(registry: NodeRegistry, config: EngineConfig) -> Self {
        Self::with_registry(Arc::new(registry), config)
    }

    /// Create an engine around a shared registry
    pub fn with_registry(registry: Arc<NodeRegistry>, config: EngineConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        Self {
            registry,
            config: Arc::new(config),
            control: RunControl::new(),
            event_bus,
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Handle for pausing, stepping, or stopping the runs started with
    /// [`run`](Engine::run). Cloneable and usable from any task.
    pub fn control(&self) -> RunControl {
        self.control.clone()
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn pause(&self) {
        self.control.pause();
    }

    pub fn resume(&self) {
        self.control.resume();
    }

    pub fn step(&self) {
        self.control.step();
    }

    /// Cancels every run in flight that uses the engine's shared control.
    pub fn stop(&self) {
        self.control.stop();
    }

    /// Load-time checks without running anything.
    pub fn validate(&self, graph: &Graph) -> Result<(), GraphError> {
        self.registry.validate(graph)?;
        if self.registry.trigger_nodes(graph).is_empty() {
            return Err(GraphError::NoTriggerNodes);
        }
        Ok(())
    }

    /// Run `graph` from every trigger node in declaration order.
    ///
    /// Only structural problems found before traversal are returned as `Err`.
    /// Failures during traversal come back as a report with `success: false`
    /// and every record collected up to that point. A `stop()` issued before
    /// this call does not carry over: each run arms a fresh abort token.
    pub async fn run(
        &self,
        graph: impl Into<Arc<Graph>>,
        input: Value,
        options: RunOptions,
    ) -> Result<RunReport, FlowError> {
        self.run_with_control(graph, input, options, &self.control)
            .await
    }

    /// Like [`run`](Engine::run), but steered by a caller-owned `control`
    /// so this run can be paused, stepped, or stopped on its own.
    pub async fn run_with_control(
        &self,
        graph: impl Into<Arc<Graph>>,
        input: Value,
        options: RunOptions,
        control: &RunControl,
    ) -> Result<RunReport, FlowError> {
        let graph: Arc<Graph> = graph.into();
        self.validate(&graph)?;
        let triggers: Vec<String> = self
            .registry
            .trigger_nodes(&graph)
            .into_iter()
            .map(|n| n.id.clone())
            .collect();

        let execution_id = uuid::Uuid::new_v4();
        let started = Instant::now();
        let abort = control.begin_run();
        let scope = RunScope::new(
            execution_id,
            graph,
            self.registry.clone(),
            self.config.clone(),
            control.clone(),
            self.event_bus.clone(),
            abort,
            options,
        );

        tracing::info!(
            "Starting run {} from {} trigger(s)",
            execution_id,
            triggers.len()
        );
        self.event_bus.emit(ExecutionEvent::RunStarted {
            execution_id,
            trigger_count: triggers.len(),
            timestamp: Utc::now(),
        });

        let mut outcome = Ok(None);
        for trigger in &triggers {
            match scope
                .execute_from_node(trigger, input.clone(), None, Frames::root())
                .await
            {
                Ok(Some(tail)) => outcome = Ok(Some(tail)),
                Ok(None) => {}
                Err(err) => {
                    outcome = Err(err);
                    break;
                }
            }
        }

        let report = scope.finish(started, outcome).await;
        match &report.error {
            Some(error) => tracing::error!("Run {} failed: {}", execution_id, error),
            None => tracing::info!("Run {} completed in {}ms", execution_id, report.duration_ms),
        }
        self.event_bus.emit(ExecutionEvent::RunCompleted {
            execution_id,
            success: report.success,
            duration_ms: report.duration_ms,
            timestamp: Utc::now(),
        });
        Ok(report)
    }
}

/// Per-run switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Wait for [`RunControl::step`] before every node.
    pub debug: bool,
}

impl RunOptions {
    pub fn debug() -> Self {
        Self { debug: true }
    }
}

/// Configuration for the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub node_timeout_ms: u64,
    /// Default for generation and agent nodes.
    pub generation_timeout_ms: u64,
    pub default_max_retries: u32,
    pub default_retry_delay_ms: u64,
    pub max_loop_iterations: usize,
    /// Upper bound on node visits per run, across all paths.
    pub max_node_visits: usize,
    /// Longest chain of nodes a single path may walk. Loop iterations do not
    /// add to it; cycles without a loop node do.
    pub max_path_depth: usize,
    pub event_buffer_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            node_timeout_ms: 60_000,
            generation_timeout_ms: 300_000,
            default_max_retries: 0,
            default_retry_delay_ms: 1_000,
            max_loop_iterations: 10_000,
            max_node_visits: 100_000,
            max_path_depth: 1_000,
            event_buffer_size: 1_000,
        }
    }
}

impl EngineConfig {
    pub fn with_node_timeout_ms(mut self, ms: u64) -> Self {
        self.node_timeout_ms = ms;
        self
    }

    pub fn with_generation_timeout_ms(mut self, ms: u64) -> Self {
        self.generation_timeout_ms = ms;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay_ms: u64) -> Self {
        self.default_max_retries = max_retries;
        self.default_retry_delay_ms = retry_delay_ms;
        self
    }

    pub fn with_max_loop_iterations(mut self, limit: usize) -> Self {
        self.max_loop_iterations = limit;
        self
    }

    pub fn with_max_node_visits(mut self, limit: usize) -> Self {
        self.max_node_visits = limit;
        self
    }

    pub fn with_max_path_depth(mut self, limit: usize) -> Self {
        self.max_path_depth = limit;
        self
    }

    pub fn with_event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = size;
        self
    }
}
