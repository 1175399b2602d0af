use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use weavecore::{
    ExecutionContext, ExecutionResult, NodeConfig, NodeError, NodeExecutor, NodeKind, NodeMetadata,
    Value,
};

/// Speaker of one conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(Role::Tool, content)
    }
}

/// Sampling options, read from a `resource.model` node or the node itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationOptions {
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    pub system_prompt: Option<String>,
}

impl GenerationOptions {
    /// Options from `config.model` when a model resource is attached,
    /// otherwise from the node's own keys.
    pub fn from_config(config: &NodeConfig) -> Result<Self, NodeError> {
        let source = match config.get("model") {
            Some(model @ Value::Object(_)) => model.clone(),
            Some(Value::String(name)) => Value::object([("model", Value::from(name.as_str()))]),
            _ => config.to_value(),
        };
        serde_json::from_value(source.to_json())
            .map_err(|e| NodeError::Configuration(format!("Invalid model options: {}", e)))
    }
}

/// Text generation provider.
///
/// Implementations call `on_token` for every streamed chunk. Nodes route it
/// to [`ExecutionContext::heartbeat`] so a long generation is not timed out
/// while tokens keep flowing.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        history: &[ChatTurn],
        options: &GenerationOptions,
        on_token: &(dyn for<'t> Fn(&'t str) + Send + Sync),
    ) -> Result<String, NodeError>;
}

/// Fills `{{input}}` in `template` with the input's text form. Without a
/// template the input text itself is the prompt.
pub fn render_prompt(template: Option<&str>, input: &Value) -> String {
    match template {
        Some(template) => template.replace("{{input}}", &input.to_text()),
        None => input.to_text(),
    }
}

/// Single-shot generation.
pub struct GenerateNode {
    generator: Arc<dyn Generator>,
}

impl GenerateNode {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl NodeExecutor for GenerateNode {
    fn node_type(&self) -> &str {
        "ai.generate"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(NodeKind::Generation, "ai", "Generates text from a prompt")
    }

    async fn execute(
        &self,
        config: &NodeConfig,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        let options = GenerationOptions::from_config(config)?;
        let prompt = render_prompt(config.get_str("prompt"), &input);
        ctx.logger.info(format!(
            "Generating with {}",
            options.model.as_deref().unwrap_or("default model")
        ));

        let on_token = |_token: &str| ctx.heartbeat();
        let text = self
            .generator
            .generate(&prompt, &[], &options, &on_token)
            .await?;

        tracing::debug!("Node {} generated {} chars", ctx.node_id, text.len());
        Ok(ExecutionResult::success(text))
    }

    fn validate_config(&self, config: &NodeConfig) -> Result<(), NodeError> {
        GenerationOptions::from_config(config).map(|_| ())
    }
}
