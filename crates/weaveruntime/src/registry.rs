use std::collections::HashMap;
use std::sync::Arc;

use weavecore::{
    ExecutionContext, ExecutionResult, Graph, GraphError, NodeConfig, NodeExecutor, NodeKind,
    NodeMetadata, Value,
};

/// Registry of available node types
#[derive(Default)]
pub struct NodeRegistry {
    executors: HashMap<String, Arc<dyn NodeExecutor>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Register a node executor under its type tag. A later registration for
    /// the same tag replaces the earlier one.
    pub fn register(&mut self, executor: Arc<dyn NodeExecutor>) {
        let node_type = executor.node_type().to_string();
        tracing::info!("Registering node type: {}", node_type);
        self.executors.insert(node_type, executor);
    }

    pub fn get(&self, node_type: &str) -> Option<&Arc<dyn NodeExecutor>> {
        self.executors.get(node_type)
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.executors.contains_key(node_type)
    }

    /// Get all registered node types, sorted
    pub fn list_node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.executors.keys().cloned().collect();
        types.sort();
        types
    }

    /// Get metadata for a node type
    pub fn get_metadata(&self, node_type: &str) -> Option<NodeMetadata> {
        self.executors.get(node_type).map(|e| e.metadata())
    }

    /// Kind of a registered node type; unknown types count as actions.
    pub fn kind_of(&self, node_type: &str) -> NodeKind {
        self.get_metadata(node_type)
            .map(|m| m.kind)
            .unwrap_or_default()
    }

    /// Load-time validation: structure, known node types, per-type config.
    pub fn validate(&self, graph: &Graph) -> Result<(), GraphError> {
        graph.validate()?;
        for node in &graph.nodes {
            let executor = self.executors.get(&node.node_type).ok_or_else(|| {
                GraphError::UnknownNodeType {
                    node_id: node.id.clone(),
                    node_type: node.node_type.clone(),
                }
            })?;
            executor
                .validate_config(&node.data)
                .map_err(|e| GraphError::InvalidConfig {
                    node_id: node.id.clone(),
                    message: e.to_string(),
                })?;
        }
        Ok(())
    }

    /// Nodes eligible as traversal roots, in declaration order.
    pub fn trigger_nodes<'a>(&self, graph: &'a Graph) -> Vec<&'a weavecore::Node> {
        graph
            .nodes
            .iter()
            .filter(|n| self.kind_of(&n.node_type) == NodeKind::Trigger)
            .collect()
    }

    /// Invoke the executor for `node_type`. Returned and raised failures are
    /// both folded into an unsuccessful [`ExecutionResult`].
    pub async fn dispatch(
        &self,
        node_type: &str,
        config: &NodeConfig,
        input: Value,
        ctx: &ExecutionContext,
    ) -> ExecutionResult {
        let Some(executor) = self.executors.get(node_type) else {
            return ExecutionResult::failure(format!("Unknown node type: {}", node_type));
        };
        match executor.execute(config, input, ctx).await {
            Ok(result) => result,
            Err(e) => ExecutionResult::failure(e.to_string()),
        }
    }
}
