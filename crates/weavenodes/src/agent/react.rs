//! ReAct tool-calling loop.
//!
//! Each iteration asks the generator for one JSON action:
//!
//! ```text
//! {"action": "answer", "answer": ...}               final answer
//! {"action": "tool", "tool": "name", "input": ...}  call a tool
//! {"action": "name", "input": ...}                  shorthand tool call
//! ```
//!
//! Tool results are fed back as observations until the model answers, a tool
//! returns binary data, the output stops parsing, or the iteration budget
//! runs out.

use serde::Serialize;
use weavecore::{ExecutionContext, NodeError, Value};

use super::provider::{ChatTurn, GenerationOptions, Generator};

pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// A node the agent may call, as resolved by the engine into `config.tools`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub node_id: String,
    pub node_type: String,
    pub description: String,
}

impl ToolSpec {
    pub fn from_value(value: &Value) -> Option<Self> {
        let field = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
        let node_id = field("nodeId")?;
        Some(Self {
            name: field("name").unwrap_or_else(|| node_id.clone()),
            node_type: field("nodeType").unwrap_or_default(),
            description: field("description").unwrap_or_default(),
            node_id,
        })
    }

    pub fn list(tools: Option<&Value>) -> Vec<Self> {
        tools
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Self::from_value).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentAction {
    Answer(Value),
    Tool { name: String, input: Value },
}

/// Extracts the action from model output. `None` when the text holds no
/// recognisable action object.
pub fn parse_action(text: &str) -> Option<AgentAction> {
    let body = strip_fence(text);
    let parsed: serde_json::Value = serde_json::from_str(body)
        .ok()
        .or_else(|| {
            let start = body.find('{')?;
            let end = body.rfind('}')?;
            serde_json::from_str(body.get(start..=end)?).ok()
        })?;
    let object = parsed.as_object()?;
    let action = object.get("action")?.as_str()?.trim();
    let input = object.get("input").cloned().map(Value::from).unwrap_or_default();

    match action {
        "answer" => Some(AgentAction::Answer(
            object.get("answer").cloned().map(Value::from).unwrap_or_default(),
        )),
        "tool" => {
            let name = object.get("tool")?.as_str()?.trim();
            if name.is_empty() {
                return None;
            }
            Some(AgentAction::Tool {
                name: name.to_string(),
                input,
            })
        }
        "" => None,
        name => Some(AgentAction::Tool {
            name: name.to_string(),
            input,
        }),
    }
}

/// Contents of the first fenced block, or the trimmed text when unfenced.
fn strip_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };
    let after = &trimmed[start + 3..];
    // drop the info string (```json)
    let after = match after.find('\n') {
        Some(newline) if !after[..newline].contains('{') => &after[newline + 1..],
        _ => after,
    };
    match after.find("```") {
        Some(end) => after[..end].trim(),
        None => after.trim(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    Answer,
    Unparsable,
    BinaryResult,
    MaxIterations,
}

impl StopReason {
    fn as_str(self) -> &'static str {
        match self {
            StopReason::Answer => "answer",
            StopReason::Unparsable => "unparsable",
            StopReason::BinaryResult => "binaryResult",
            StopReason::MaxIterations => "maxIterations",
        }
    }
}

/// One generate/act round, kept for the node output.
#[derive(Debug, Clone, PartialEq)]
pub struct ReactStep {
    pub iteration: usize,
    pub response: String,
    pub tool: Option<String>,
    pub observation: Option<String>,
}

impl ReactStep {
    fn to_value(&self) -> Value {
        let mut fields = vec![
            ("iteration", Value::from(self.iteration)),
            ("response", Value::from(self.response.as_str())),
        ];
        if let Some(tool) = &self.tool {
            fields.push(("tool", Value::from(tool.as_str())));
        }
        if let Some(observation) = &self.observation {
            fields.push(("observation", Value::from(observation.as_str())));
        }
        Value::object(fields)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReactOutcome {
    pub answer: Value,
    pub iterations: usize,
    pub stop_reason: StopReason,
    pub steps: Vec<ReactStep>,
}

impl ReactOutcome {
    pub fn to_value(&self) -> Value {
        Value::object([
            ("answer", self.answer.clone()),
            ("iterations", Value::from(self.iterations)),
            ("stopReason", Value::from(self.stop_reason.as_str())),
            (
                "steps",
                Value::Array(self.steps.iter().map(ReactStep::to_value).collect()),
            ),
        ])
    }
}

pub struct ReactLoop<'a> {
    generator: &'a dyn Generator,
    tools: Vec<ToolSpec>,
    options: GenerationOptions,
    max_iterations: usize,
    window: Option<usize>,
}

impl<'a> ReactLoop<'a> {
    pub fn new(generator: &'a dyn Generator, tools: Vec<ToolSpec>, options: GenerationOptions) -> Self {
        Self {
            generator,
            tools,
            options,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            window: None,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    /// Only the last `window` turns of history are sent to the generator.
    pub fn with_window(mut self, window: Option<usize>) -> Self {
        self.window = window;
        self
    }

    pub fn resolve(&self, name: &str) -> Option<&ToolSpec> {
        let wanted = name.to_lowercase();
        self.tools.iter().find(|tool| tool.name.to_lowercase() == wanted)
    }

    fn prompt(&self, task: &str) -> String {
        let mut prompt = String::from(
            "Respond with exactly one JSON object.\n\
             To call a tool: {\"action\": \"tool\", \"tool\": \"<name>\", \"input\": <arguments>}\n\
             To finish: {\"action\": \"answer\", \"answer\": <final answer>}\n",
        );
        if self.tools.is_empty() {
            prompt.push_str("No tools are available.\n");
        } else {
            prompt.push_str("Tools:\n");
            for tool in &self.tools {
                prompt.push_str(&format!("- {}: {}\n", tool.name, tool.description));
            }
        }
        prompt.push_str("\nTask: ");
        prompt.push_str(task);
        prompt
    }

    fn bounded<'h>(&self, history: &'h [ChatTurn]) -> &'h [ChatTurn] {
        match self.window {
            Some(window) if history.len() > window => &history[history.len() - window..],
            _ => history,
        }
    }

    pub async fn run(
        &self,
        task: &str,
        mut history: Vec<ChatTurn>,
        ctx: &ExecutionContext,
    ) -> Result<ReactOutcome, NodeError> {
        let prompt = self.prompt(task);
        let on_token = |_token: &str| ctx.heartbeat();
        let mut steps = Vec::new();
        let mut last_text = String::new();

        for iteration in 1..=self.max_iterations {
            ctx.ensure_not_cancelled()?;
            let text = self
                .generator
                .generate(&prompt, self.bounded(&history), &self.options, &on_token)
                .await?;
            ctx.heartbeat();

            let finish = |answer: Value, stop_reason: StopReason, steps: Vec<ReactStep>| ReactOutcome {
                answer,
                iterations: iteration,
                stop_reason,
                steps,
            };

            let (name, input) = match parse_action(&text) {
                None => {
                    ctx.logger.warn("Model output is not an action; using it as the answer");
                    steps.push(ReactStep {
                        iteration,
                        response: text.clone(),
                        tool: None,
                        observation: None,
                    });
                    return Ok(finish(Value::from(text), StopReason::Unparsable, steps));
                }
                Some(AgentAction::Answer(answer)) => {
                    steps.push(ReactStep {
                        iteration,
                        response: text,
                        tool: None,
                        observation: None,
                    });
                    return Ok(finish(answer, StopReason::Answer, steps));
                }
                Some(AgentAction::Tool { name, input }) => (name, input),
            };

            history.push(ChatTurn::assistant(text.as_str()));
            let observation = match self.resolve(&name) {
                None => {
                    let available: Vec<&str> = self.tools.iter().map(|t| t.name.as_str()).collect();
                    let available = if available.is_empty() {
                        "none".to_string()
                    } else {
                        available.join(", ")
                    };
                    NodeError::ToolResolution(format!(
                        "'{}' is not available. Available tools: {}",
                        name, available
                    ))
                    .to_string()
                }
                Some(tool) => {
                    ctx.logger.info(format!("Calling tool '{}'", tool.name));
                    let dispatched = ctx.dispatch(&tool.node_id, input).await;
                    ctx.heartbeat();
                    match dispatched {
                        Ok(result) if result.success && result.output.is_binary() => {
                            steps.push(ReactStep {
                                iteration,
                                response: text,
                                tool: Some(tool.name.clone()),
                                observation: None,
                            });
                            return Ok(finish(result.output, StopReason::BinaryResult, steps));
                        }
                        Ok(result) if result.success => result.output.to_text(),
                        Ok(result) => format!(
                            "Tool '{}' failed: {}",
                            tool.name,
                            result.error.unwrap_or_default()
                        ),
                        Err(NodeError::Cancelled) => return Err(NodeError::Cancelled),
                        Err(e) => format!("Tool '{}' failed: {}", tool.name, e),
                    }
                }
            };

            tracing::debug!("Agent {} observation: {}", ctx.node_id, observation);
            history.push(ChatTurn::tool(format!("Observation: {}", observation)));
            steps.push(ReactStep {
                iteration,
                response: text.clone(),
                tool: Some(name),
                observation: Some(observation),
            });
            last_text = text;
        }

        ctx.logger.warn(format!(
            "Stopped after {} iterations without an answer",
            self.max_iterations
        ));
        Ok(ReactOutcome {
            answer: Value::from(last_text),
            iterations: self.max_iterations,
            stop_reason: StopReason::MaxIterations,
            steps,
        })
    }
}
