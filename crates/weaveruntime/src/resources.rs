//! Resource resolution for agent nodes.
//!
//! Model and memory configuration arrive through reserved target handles;
//! tools are either wired into the `tool-slot` handle or hang off the agent's
//! outgoing edges. Everything is folded into a copy of the agent's config
//! before dispatch.

use std::collections::HashSet;
use weavecore::{Edge, Graph, Node, NodeConfig, ResourceSlot, Value};

use crate::index::GraphIndex;
use crate::registry::NodeRegistry;

/// True when an agent's outgoing edge points at a node it may call as a tool.
pub(crate) fn is_tool_target(registry: &NodeRegistry, target: &Node) -> bool {
    target.data.get_bool("asTool") == Some(true)
        || registry
            .get_metadata(&target.node_type)
            .map(|m| m.tool_capable)
            .unwrap_or(false)
}

pub(crate) fn is_tool_edge(registry: &NodeRegistry, graph: &Graph, edge: &Edge) -> bool {
    graph
        .find_node(&edge.target)
        .map(|target| is_tool_target(registry, target))
        .unwrap_or(false)
}

pub(crate) fn resolve_agent_config(
    graph: &Graph,
    index: &GraphIndex,
    registry: &NodeRegistry,
    node: &Node,
) -> NodeConfig {
    let mut config = node.data.clone();
    let mut tools: Vec<Value> = config
        .get("tools")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut seen: HashSet<String> = tools
        .iter()
        .filter_map(|t| t.get("nodeId").and_then(Value::as_str).map(str::to_string))
        .collect();

    for edge in index.incoming(graph, &node.id) {
        let (Some(slot), Some(source)) = (edge.resource_slot(), graph.find_node(&edge.source)) else {
            continue;
        };
        match slot {
            ResourceSlot::Model => config.insert("model", source.data.to_value()),
            ResourceSlot::Memory => config.insert("memory", source.data.to_value()),
            ResourceSlot::Tool => {
                if seen.insert(source.id.clone()) {
                    tools.push(tool_descriptor(registry, source));
                }
            }
        }
    }

    for edge in index.outgoing(graph, &node.id) {
        if edge.resource_slot().is_some() {
            continue;
        }
        let Some(target) = graph.find_node(&edge.target) else {
            continue;
        };
        if is_tool_target(registry, target) && seen.insert(target.id.clone()) {
            tools.push(tool_descriptor(registry, target));
        }
    }

    tracing::debug!("Resolved {} tool(s) for agent {}", tools.len(), node.id);
    config.insert("tools", Value::Array(tools));
    config
}

fn tool_descriptor(registry: &NodeRegistry, node: &Node) -> Value {
    let name = node
        .data
        .get_str("toolName")
        .map(str::to_string)
        .or_else(|| node.name.clone())
        .unwrap_or_else(|| node.node_type.clone());
    let description = node
        .data
        .get_str("description")
        .map(str::to_string)
        .or_else(|| registry.get_metadata(&node.node_type).map(|m| m.description))
        .unwrap_or_default();
    Value::object([
        ("name", Value::from(name)),
        ("nodeId", Value::from(node.id.as_str())),
        ("nodeType", Value::from(node.node_type.as_str())),
        ("description", Value::from(description)),
    ])
}
