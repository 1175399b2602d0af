use async_trait::async_trait;
use weavecore::{
    ExecutionContext, ExecutionResult, NodeConfig, NodeError, NodeExecutor, NodeKind, NodeMetadata,
    Value,
};

/// Entry point of a run; hands the initial input to its successors.
pub struct ManualTriggerNode;

#[async_trait]
impl NodeExecutor for ManualTriggerNode {
    fn node_type(&self) -> &str {
        "trigger.manual"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(NodeKind::Trigger, "trigger", "Starts a run with the given input")
    }

    async fn execute(
        &self,
        _config: &NodeConfig,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        ctx.logger.info("Run triggered");
        Ok(ExecutionResult::success(input))
    }
}
