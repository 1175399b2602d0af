use async_trait::async_trait;
use weavecore::{
    ExecutionContext, ExecutionResult, NodeConfig, NodeError, NodeExecutor, NodeKind, NodeMetadata,
    Value,
};

/// Comparison applied by the `logic.if` node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
    Exists,
    IsEmpty,
    IsNotEmpty,
    IsTrue,
    IsFalse,
}

impl Operator {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "equals" => Operator::Equals,
            "notEquals" => Operator::NotEquals,
            "contains" => Operator::Contains,
            "greaterThan" => Operator::GreaterThan,
            "lessThan" => Operator::LessThan,
            "exists" => Operator::Exists,
            "isEmpty" => Operator::IsEmpty,
            "isNotEmpty" => Operator::IsNotEmpty,
            "isTrue" => Operator::IsTrue,
            "isFalse" => Operator::IsFalse,
            _ => return None,
        })
    }

    /// `actual` is `None` when the condition path did not resolve.
    pub fn evaluate(self, actual: Option<&Value>, expected: &Value) -> bool {
        let value = actual.unwrap_or(&Value::Null);
        match self {
            Operator::Equals => value.loose_eq(expected),
            Operator::NotEquals => !value.loose_eq(expected),
            Operator::Contains => match value {
                Value::Array(items) => items.iter().any(|item| item.loose_eq(expected)),
                other => other.coerce_string().contains(&expected.coerce_string()),
            },
            Operator::GreaterThan => value.to_number() > expected.to_number(),
            Operator::LessThan => value.to_number() < expected.to_number(),
            Operator::Exists => actual.is_some_and(|v| !v.is_null()),
            Operator::IsEmpty => value.is_empty(),
            Operator::IsNotEmpty => !value.is_empty(),
            Operator::IsTrue => value.is_truthy(),
            Operator::IsFalse => !value.is_truthy(),
        }
    }
}

fn operator_from(config: &NodeConfig) -> Result<Operator, NodeError> {
    let name = config.get_str("operator").unwrap_or("equals");
    Operator::parse(name)
        .ok_or_else(|| NodeError::Configuration(format!("Unknown operator: {}", name)))
}

/// Two-way branch: `output-0` when the condition holds, `output-1` otherwise.
pub struct IfNode;

#[async_trait]
impl NodeExecutor for IfNode {
    fn node_type(&self) -> &str {
        "logic.if"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(
            NodeKind::Branch,
            "logic",
            "Routes input to output 0 when the condition holds, output 1 otherwise",
        )
    }

    async fn execute(
        &self,
        config: &NodeConfig,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        let operator = operator_from(config)?;
        let path = config.get_str("condition").unwrap_or_default();
        let expected = config.get("compareValue").cloned().unwrap_or_default();

        let holds = operator.evaluate(input.lookup_path(path), &expected);
        ctx.logger
            .debug(format!("Condition '{}' {:?} -> {}", path, operator, holds));
        Ok(ExecutionResult::branch(input, if holds { 0 } else { 1 }))
    }

    fn validate_config(&self, config: &NodeConfig) -> Result<(), NodeError> {
        operator_from(config).map(|_| ())
    }
}

/// Multi-way branch on a field value.
pub struct SwitchNode;

struct SwitchRoute {
    value: Value,
    output_index: usize,
}

fn routes_from(config: &NodeConfig) -> Result<Vec<SwitchRoute>, NodeError> {
    let Some(routes) = config.get("routes") else {
        return Ok(Vec::new());
    };
    let routes = routes.as_array().ok_or_else(|| NodeError::InvalidInputType {
        field: "routes".to_string(),
        expected: "array".to_string(),
        actual: routes.type_name().to_string(),
    })?;
    routes
        .iter()
        .enumerate()
        .map(|(position, route)| {
            let output_index = route
                .get("outputIndex")
                .and_then(Value::as_u64)
                .ok_or_else(|| {
                    NodeError::Configuration(format!(
                        "Route {} needs a non-negative outputIndex",
                        position
                    ))
                })?;
            Ok(SwitchRoute {
                value: route.get("value").cloned().unwrap_or_default(),
                output_index: output_index as usize,
            })
        })
        .collect()
}

#[async_trait]
impl NodeExecutor for SwitchNode {
    fn node_type(&self) -> &str {
        "logic.switch"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(
            NodeKind::Branch,
            "logic",
            "Routes input to the first output whose value matches a field",
        )
    }

    async fn execute(
        &self,
        config: &NodeConfig,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        let routes = routes_from(config)?;
        let field = config.get_str("field").unwrap_or_default();
        let actual = input
            .lookup_path(field)
            .map(Value::coerce_string)
            .unwrap_or_default();

        let matched = routes
            .iter()
            .find(|route| route.value.coerce_string() == actual)
            .map(|route| route.output_index);
        let output = match matched {
            Some(index) => index,
            None => config
                .get_u64("defaultOutput")
                .map(|n| n as usize)
                .unwrap_or(routes.len()),
        };

        ctx.logger
            .debug(format!("Switch on '{}' = '{}' -> output {}", field, actual, output));
        Ok(ExecutionResult::branch(input, output))
    }

    fn validate_config(&self, config: &NodeConfig) -> Result<(), NodeError> {
        routes_from(config).map(|_| ())
    }
}
