use async_trait::async_trait;
use weavecore::{
    ExecutionContext, ExecutionResult, NodeConfig, NodeError, NodeExecutor, NodeKind, NodeMetadata,
    Value,
};

/// Simple debug node that logs its input and passes it on
pub struct DebugNode;

#[async_trait]
impl NodeExecutor for DebugNode {
    fn node_type(&self) -> &str {
        "debug.log"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(NodeKind::Action, "debug", "Logs input values for debugging")
    }

    async fn execute(
        &self,
        config: &NodeConfig,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        let message = config.get_str("message").unwrap_or("(no message)");
        ctx.logger.data(format!("DEBUG: {}", message), input.clone());

        // Also log object fields one by one for visibility
        if let Some(fields) = input.as_object() {
            for (key, value) in fields {
                ctx.logger.debug(format!("  {}: {}", key, value.to_text()));
            }
        }

        Ok(ExecutionResult::success(input))
    }
}
