use async_trait::async_trait;
use weavecore::{
    ExecutionContext, ExecutionResult, NodeConfig, NodeError, NodeExecutor, NodeKind, NodeMetadata,
    Value,
};

/// Model settings wired into an agent's `model-slot`.
///
/// Resource nodes are never traversed; the engine copies their `data` into
/// the agent's config. Executing one directly just echoes that config.
pub struct ModelResourceNode;

#[async_trait]
impl NodeExecutor for ModelResourceNode {
    fn node_type(&self) -> &str {
        "resource.model"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(
            NodeKind::Resource,
            "resource",
            "Model and sampling options for an agent",
        )
    }

    async fn execute(
        &self,
        config: &NodeConfig,
        _input: Value,
        _ctx: &ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        Ok(ExecutionResult::success(config.to_value()))
    }

    fn validate_config(&self, config: &NodeConfig) -> Result<(), NodeError> {
        if let Some(temperature) = config.get("temperature") {
            if temperature.as_f64().is_none() {
                return Err(NodeError::InvalidInputType {
                    field: "temperature".to_string(),
                    expected: "number".to_string(),
                    actual: temperature.type_name().to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Conversation memory wired into an agent's `memory-slot`: seed `history`
/// and the `window` of turns kept.
pub struct MemoryResourceNode;

#[async_trait]
impl NodeExecutor for MemoryResourceNode {
    fn node_type(&self) -> &str {
        "resource.memory"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(NodeKind::Resource, "resource", "Conversation memory for an agent")
    }

    async fn execute(
        &self,
        config: &NodeConfig,
        _input: Value,
        _ctx: &ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        Ok(ExecutionResult::success(config.to_value()))
    }

    fn validate_config(&self, config: &NodeConfig) -> Result<(), NodeError> {
        match config.get("history") {
            Some(history) if history.as_array().is_none() => Err(NodeError::InvalidInputType {
                field: "history".to_string(),
                expected: "array".to_string(),
                actual: history.type_name().to_string(),
            }),
            _ => Ok(()),
        }
    }
}
