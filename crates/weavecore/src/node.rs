use crate::{ExecutionContext, NodeConfig, NodeError, Value};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Capability object every node type implements.
///
/// Executors are stateless with respect to a run: configuration arrives as
/// `config`, data as `input`, and everything run-scoped through `ctx`.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Unique type tag (e.g., "logic.if", "ai.agent")
    fn node_type(&self) -> &str;

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::default()
    }

    async fn execute(
        &self,
        config: &NodeConfig,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionResult, NodeError>;

    /// Optional: Validate configuration at graph load time
    fn validate_config(&self, _config: &NodeConfig) -> Result<(), NodeError> {
        Ok(())
    }
}

/// How the engine treats a node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Valid traversal root.
    Trigger,
    #[default]
    Action,
    Branch,
    Loop,
    Merge,
    Generation,
    Agent,
    /// Configuration carrier attached through a reserved slot; never traversed.
    Resource,
}

impl NodeKind {
    /// Generation-class nodes get the long default timeout.
    pub fn is_generation_class(self) -> bool {
        matches!(self, NodeKind::Generation | NodeKind::Agent)
    }
}

/// Metadata about a node type
#[derive(Debug, Clone)]
pub struct NodeMetadata {
    pub description: String,
    pub category: String,
    pub kind: NodeKind,
    /// Whether an agent may call this node as a tool.
    pub tool_capable: bool,
}

impl Default for NodeMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            kind: NodeKind::Action,
            tool_capable: false,
        }
    }
}

impl NodeMetadata {
    pub fn new(kind: NodeKind, category: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            category: category.into(),
            kind,
            tool_capable: false,
        }
    }

    pub fn as_tool(mut self) -> Self {
        self.tool_capable = true;
        self
    }
}

/// Where the engine sends a node's output next.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Route {
    /// Every outgoing edge receives the output.
    #[default]
    FanOut,
    /// Only edges leaving `output-{i}`.
    Output(usize),
    /// The node is driving a loop.
    Loop(LoopData),
}

/// Loop progress reported by a loop executor on each visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopData {
    pub current_iteration: usize,
    pub total_iterations: usize,
    /// True once every iteration has reported back; `output` then carries the
    /// collected results.
    pub done: bool,
}

/// Outcome of one executor call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub output: Value,
    #[serde(default)]
    pub route: Route,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn success(output: impl Into<Value>) -> Self {
        Self {
            success: true,
            output: output.into(),
            route: Route::FanOut,
            error: None,
        }
    }

    pub fn branch(output: impl Into<Value>, output_index: usize) -> Self {
        Self {
            route: Route::Output(output_index),
            ..Self::success(output)
        }
    }

    pub fn looping(output: impl Into<Value>, data: LoopData) -> Self {
        Self {
            route: Route::Loop(data),
            ..Self::success(output)
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: Value::Null,
            route: Route::FanOut,
            error: Some(error.into()),
        }
    }

    pub fn output_index(&self) -> Option<usize> {
        match self.route {
            Route::Output(index) => Some(index),
            _ => None,
        }
    }

    pub fn loop_data(&self) -> Option<&LoopData> {
        match &self.route {
            Route::Loop(data) => Some(data),
            _ => None,
        }
    }
}

/// Iteration state owned by one loop node for the lifetime of one loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopState {
    pub current_iteration: usize,
    pub total_iterations: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<Value>>,
    pub results: Vec<Value>,
    pub is_array_loop: bool,
}

impl LoopState {
    pub fn counted(total_iterations: usize) -> Self {
        Self {
            current_iteration: 1,
            total_iterations,
            items: None,
            results: Vec::with_capacity(total_iterations),
            is_array_loop: false,
        }
    }

    pub fn over_items(items: Vec<Value>) -> Self {
        Self {
            current_iteration: 1,
            total_iterations: items.len(),
            results: Vec::with_capacity(items.len()),
            items: Some(items),
            is_array_loop: true,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.current_iteration > self.total_iterations
    }

    /// Item for the current iteration; the iteration number in count mode.
    pub fn current_item(&self) -> Value {
        match &self.items {
            Some(items) => items
                .get(self.current_iteration.saturating_sub(1))
                .cloned()
                .unwrap_or_default(),
            None => Value::from(self.current_iteration),
        }
    }

    /// Records the previous iteration's result and moves to the next one.
    pub fn advance(&mut self, previous_result: Value) {
        self.results.push(previous_result);
        self.current_iteration += 1;
    }

    pub fn progress(&self) -> LoopData {
        LoopData {
            current_iteration: self.current_iteration,
            total_iterations: self.total_iterations,
            done: self.is_finished(),
        }
    }
}
