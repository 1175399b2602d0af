//! Standard node library
//!
//! Collection of built-in nodes for common operations

mod agent;
mod debug;
mod logic;
mod loop_node;
mod merge;
mod resource;
mod time;
mod trigger;

pub use agent::{
    parse_action, render_prompt, AgentAction, AgentNode, ChatTurn, GenerateNode,
    GenerationOptions, Generator, ReactLoop, ReactOutcome, ReactStep, Role, StopReason, ToolSpec,
    DEFAULT_MAX_ITERATIONS,
};
pub use debug::DebugNode;
pub use logic::{IfNode, Operator, SwitchNode};
pub use loop_node::LoopNode;
pub use merge::MergeNode;
pub use resource::{MemoryResourceNode, ModelResourceNode};
pub use time::DelayNode;
pub use trigger::ManualTriggerNode;
use weaveruntime::NodeRegistry;

use std::sync::Arc;

/// Register all standard nodes that need no external provider
pub fn register_all(registry: &mut NodeRegistry) {
    registry.register(Arc::new(ManualTriggerNode));
    registry.register(Arc::new(IfNode));
    registry.register(Arc::new(SwitchNode));
    registry.register(Arc::new(LoopNode));
    registry.register(Arc::new(MergeNode));
    registry.register(Arc::new(ModelResourceNode));
    registry.register(Arc::new(MemoryResourceNode));
    registry.register(Arc::new(DebugNode));
    registry.register(Arc::new(DelayNode));
}

/// Register the generation nodes backed by `generator`
pub fn register_generation(registry: &mut NodeRegistry, generator: Arc<dyn Generator>) {
    registry.register(Arc::new(GenerateNode::new(generator.clone())));
    registry.register(Arc::new(AgentNode::new(generator)));
}
