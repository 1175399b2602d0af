use async_trait::async_trait;
use tokio::time::{sleep, Duration, Instant};
use weavecore::{
    ExecutionContext, ExecutionResult, NodeConfig, NodeError, NodeExecutor, NodeKind, NodeMetadata,
    Value,
};

/// Longest stretch the delay sleeps between heartbeats.
const BEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Delay execution for a specified duration
pub struct DelayNode;

#[async_trait]
impl NodeExecutor for DelayNode {
    fn node_type(&self) -> &str {
        "time.delay"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(
            NodeKind::Action,
            "time",
            "Delay execution for specified milliseconds",
        )
    }

    async fn execute(
        &self,
        config: &NodeConfig,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        // Default to 1 second if not specified
        let delay = Duration::from_millis(config.get_u64("delay_ms").unwrap_or(1000));
        ctx.logger.info(format!("Delaying for {}ms", delay.as_millis()));

        let until = Instant::now() + delay;
        loop {
            let now = Instant::now();
            if now >= until {
                break;
            }
            let slice = (until - now).min(BEAT_INTERVAL);
            tokio::select! {
                _ = ctx.abort.cancelled() => return Err(NodeError::Cancelled),
                _ = sleep(slice) => ctx.heartbeat(),
            }
        }

        // Pass through the input
        Ok(ExecutionResult::success(input))
    }

    fn validate_config(&self, config: &NodeConfig) -> Result<(), NodeError> {
        match config.get("delay_ms") {
            Some(value) if value.as_u64().is_none() => Err(NodeError::Configuration(
                "delay_ms must be a non-negative integer".to_string(),
            )),
            _ => Ok(()),
        }
    }
}
