use async_trait::async_trait;
use std::collections::BTreeMap;
use weavecore::{
    ExecutionContext, ExecutionResult, NodeConfig, NodeError, NodeExecutor, NodeKind, NodeMetadata,
    Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Aggregate {
    Array,
    Object,
    Concat,
}

fn aggregate_from(config: &NodeConfig) -> Result<Aggregate, NodeError> {
    match config.get_str("aggregate").unwrap_or("array") {
        "array" => Ok(Aggregate::Array),
        "object" => Ok(Aggregate::Object),
        "concat" => Ok(Aggregate::Concat),
        other => Err(NodeError::Configuration(format!(
            "Unknown aggregate mode: {}",
            other
        ))),
    }
}

/// Combines the inputs of a fan-in.
///
/// The engine decides when this runs and hands over the arrivals as an array
/// ordered by inbound edge. In `first` mode the single winning payload is
/// passed through unchanged.
pub struct MergeNode;

#[async_trait]
impl NodeExecutor for MergeNode {
    fn node_type(&self) -> &str {
        "logic.merge"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(NodeKind::Merge, "logic", "Waits for several inputs and combines them")
    }

    async fn execute(
        &self,
        config: &NodeConfig,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        let inputs = match input {
            Value::Array(items) => items,
            other => vec![other],
        };

        if config.get_str("mode") == Some("first") {
            let winner = inputs.into_iter().next().unwrap_or_default();
            return Ok(ExecutionResult::success(winner));
        }

        let output = match aggregate_from(config)? {
            Aggregate::Array => Value::Array(inputs),
            Aggregate::Object => Value::Object(
                inputs
                    .into_iter()
                    .enumerate()
                    .map(|(index, value)| (index.to_string(), value))
                    .collect::<BTreeMap<_, _>>(),
            ),
            Aggregate::Concat => Value::Array(
                inputs
                    .into_iter()
                    .flat_map(|value| match value {
                        Value::Array(items) => items,
                        other => vec![other],
                    })
                    .collect(),
            ),
        };
        ctx.logger.debug("Merged inputs");
        Ok(ExecutionResult::success(output))
    }

    fn validate_config(&self, config: &NodeConfig) -> Result<(), NodeError> {
        aggregate_from(config)?;
        match config.get_str("mode") {
            None | Some("wait") | Some("first") => {}
            Some(other) => {
                return Err(NodeError::Configuration(format!("Unknown merge mode: {}", other)))
            }
        }
        if let Some(count) = config.get("inputCount") {
            if count.as_u64().filter(|n| *n > 0).is_none() {
                return Err(NodeError::Configuration(
                    "inputCount must be a positive integer".to_string(),
                ));
            }
        }
        Ok(())
    }
}
