//! Generation nodes: single-shot text generation and the tool-calling agent.

mod provider;
mod react;

pub use provider::{render_prompt, ChatTurn, GenerateNode, GenerationOptions, Generator, Role};
pub use react::{
    parse_action, AgentAction, ReactLoop, ReactOutcome, ReactStep, StopReason, ToolSpec,
    DEFAULT_MAX_ITERATIONS,
};

use async_trait::async_trait;
use std::sync::Arc;
use weavecore::{
    ExecutionContext, ExecutionResult, NodeConfig, NodeError, NodeExecutor, NodeKind, NodeMetadata,
    Value,
};

/// Conversation seed and window from an attached `resource.memory` node.
fn memory_from(config: &NodeConfig) -> (Vec<ChatTurn>, Option<usize>) {
    let Some(memory) = config.get("memory") else {
        return (Vec::new(), None);
    };
    let history = memory
        .get("history")
        .and_then(Value::as_array)
        .map(|turns| {
            turns
                .iter()
                .filter_map(|turn| serde_json::from_value(turn.to_json()).ok())
                .collect()
        })
        .unwrap_or_default();
    let window = memory
        .get("window")
        .and_then(Value::as_u64)
        .map(|w| w as usize);
    (history, window)
}

fn max_iterations(config: &NodeConfig) -> Result<usize, NodeError> {
    match config.get("maxIterations") {
        None => Ok(DEFAULT_MAX_ITERATIONS),
        Some(value) => value
            .as_u64()
            .filter(|n| *n >= 1)
            .map(|n| n as usize)
            .ok_or_else(|| {
                NodeError::Configuration("maxIterations must be a positive integer".to_string())
            }),
    }
}

/// Reason-and-act agent. Calls the tools the engine resolved into
/// `config.tools` through [`ExecutionContext::dispatch`] until the model
/// produces an answer.
pub struct AgentNode {
    generator: Arc<dyn Generator>,
}

impl AgentNode {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl NodeExecutor for AgentNode {
    fn node_type(&self) -> &str {
        "ai.agent"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(
            NodeKind::Agent,
            "ai",
            "Answers a task by reasoning and calling connected tools",
        )
    }

    async fn execute(
        &self,
        config: &NodeConfig,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        let template = config.get_str("prompt").or_else(|| config.get_str("task"));
        let task = render_prompt(template, &input);
        let options = GenerationOptions::from_config(config)?;
        let tools = ToolSpec::list(config.get("tools"));
        let (history, window) = memory_from(config);

        ctx.logger.info(format!("Agent starting with {} tool(s)", tools.len()));
        let outcome = ReactLoop::new(self.generator.as_ref(), tools, options)
            .with_max_iterations(max_iterations(config)?)
            .with_window(window)
            .run(&task, history, ctx)
            .await?;

        ctx.logger.success(format!(
            "Agent finished after {} iteration(s)",
            outcome.iterations
        ));
        Ok(ExecutionResult::success(outcome.to_value()))
    }

    fn validate_config(&self, config: &NodeConfig) -> Result<(), NodeError> {
        max_iterations(config)?;
        GenerationOptions::from_config(config).map(|_| ())
    }
}
