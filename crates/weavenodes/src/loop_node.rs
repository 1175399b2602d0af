use async_trait::async_trait;
use weavecore::{
    ExecutionContext, ExecutionResult, LoopState, NodeConfig, NodeError, NodeExecutor, NodeKind,
    NodeMetadata, Value,
};

/// Iterates a fixed number of times (`iterations`) or over an array found at
/// `itemsPath` in the first input.
///
/// The engine calls this node once to start the loop and once more after each
/// body traversal, passing the body's result as `input`. Loop progress lives
/// in the slot the engine attaches to the context.
pub struct LoopNode;

fn iteration_payload(state: &LoopState) -> Value {
    Value::object([
        ("item", state.current_item()),
        ("index", Value::from(state.current_iteration.saturating_sub(1))),
        ("iteration", Value::from(state.current_iteration)),
        ("total", Value::from(state.total_iterations)),
    ])
}

fn start_state(config: &NodeConfig, input: &Value) -> Result<LoopState, NodeError> {
    if let Some(path) = config.get_str("itemsPath") {
        let items = input
            .lookup_path(path)
            .ok_or_else(|| NodeError::MissingInput(format!("items at '{}'", path)))?;
        return match items {
            Value::Array(items) => Ok(LoopState::over_items(items.clone())),
            other => Err(NodeError::InvalidInputType {
                field: path.to_string(),
                expected: "array".to_string(),
                actual: other.type_name().to_string(),
            }),
        };
    }
    let iterations = match config.get("iterations") {
        None => 1,
        Some(value) => value.as_u64().ok_or_else(|| {
            NodeError::Configuration("iterations must be a non-negative integer".to_string())
        })?,
    };
    Ok(LoopState::counted(iterations as usize))
}

#[async_trait]
impl NodeExecutor for LoopNode {
    fn node_type(&self) -> &str {
        "logic.loop"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(
            NodeKind::Loop,
            "logic",
            "Runs output 0 once per iteration, then output 1 with the collected results",
        )
    }

    async fn execute(
        &self,
        config: &NodeConfig,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        let mut slot = ctx.loop_slot()?.lock().await;

        match slot.as_mut() {
            Some(state) => state.advance(input),
            None => {
                let state = start_state(config, &input)?;
                ctx.logger.info(format!(
                    "Starting loop over {} iteration(s)",
                    state.total_iterations
                ));
                *slot = Some(state);
            }
        }
        let Some(state) = slot.as_mut() else {
            return Err(NodeError::ExecutionFailed("loop state vanished".to_string()));
        };

        let progress = state.progress();
        if progress.done {
            let results = std::mem::take(&mut state.results);
            *slot = None;
            ctx.logger
                .success(format!("Loop finished with {} result(s)", results.len()));
            return Ok(ExecutionResult::looping(Value::Array(results), progress));
        }

        Ok(ExecutionResult::looping(iteration_payload(state), progress))
    }

    fn validate_config(&self, config: &NodeConfig) -> Result<(), NodeError> {
        match config.get("iterations") {
            Some(value) if value.as_u64().is_none() => Err(NodeError::Configuration(
                "iterations must be a non-negative integer".to_string(),
            )),
            _ => Ok(()),
        }
    }
}
