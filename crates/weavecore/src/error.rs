use thiserror::Error;

/// Run-level failures surfaced by the engine.
#[derive(Error, Debug, Clone)]
pub enum FlowError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Node '{node_id}' failed after {attempts} attempt(s): {message}")]
    NodeExecution {
        node_id: String,
        attempts: u32,
        message: String,
    },

    #[error("Node '{node_id}' timed out after {after_ms}ms ({attempts} attempt(s))")]
    Timeout {
        node_id: String,
        attempts: u32,
        after_ms: u64,
    },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Node '{node_id}' exceeded the limit of {limit} iterations")]
    LoopLimit { node_id: String, limit: usize },
}

impl FlowError {
    pub fn node_id(&self) -> Option<&str> {
        match self {
            FlowError::NodeExecution { node_id, .. }
            | FlowError::Timeout { node_id, .. }
            | FlowError::LoopLimit { node_id, .. } => Some(node_id),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, FlowError::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FlowError::Timeout { .. })
    }
}

/// Errors returned by node executors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Cancelled")]
    Cancelled,

    /// A requested tool could not be resolved to a node. Only raised inside
    /// tool-calling loops, where it becomes an observation.
    #[error("Tool resolution failed: {0}")]
    ToolResolution(String),
}

impl From<FlowError> for NodeError {
    fn from(err: FlowError) -> Self {
        match err {
            FlowError::Cancelled => NodeError::Cancelled,
            FlowError::Timeout { after_ms, .. } => NodeError::Timeout { ms: after_ms },
            other => NodeError::ExecutionFailed(other.to_string()),
        }
    }
}

/// Structural problems detected before traversal starts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Graph has no trigger nodes")]
    NoTriggerNodes,

    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Edge '{edge_id}' references missing node '{node_id}'")]
    DanglingEdge { edge_id: String, node_id: String },

    #[error("Edge '{edge_id}' has invalid handle '{handle}'")]
    InvalidHandle { edge_id: String, handle: String },

    #[error("Unknown node type '{node_type}' on node '{node_id}'")]
    UnknownNodeType { node_id: String, node_type: String },

    #[error("Invalid config on node '{node_id}': {message}")]
    InvalidConfig { node_id: String, message: String },
}
