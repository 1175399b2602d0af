use crate::{GraphError, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

pub type NodeId = String;

/// Complete graph definition: nodes plus the edges wiring their ports.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    /// Connects `output-{output}` of `source` to `input-{input}` of `target`.
    pub fn connect(
        &mut self,
        source: impl Into<String>,
        output: usize,
        target: impl Into<String>,
        input: usize,
    ) -> String {
        self.push_edge(source.into(), output_handle(output), target.into(), input_handle(input))
    }

    /// Wires a resource node into one of the reserved slots of `target`.
    pub fn connect_slot(
        &mut self,
        source: impl Into<String>,
        target: impl Into<String>,
        slot: ResourceSlot,
    ) -> String {
        self.push_edge(
            source.into(),
            output_handle(0),
            target.into(),
            slot.handle().to_string(),
        )
    }

    fn push_edge(
        &mut self,
        source: String,
        source_handle: String,
        target: String,
        target_handle: String,
    ) -> String {
        let id = format!("e{}-{}-{}", self.edges.len(), source, target);
        self.edges.push(Edge {
            id: id.clone(),
            source,
            target,
            source_handle,
            target_handle,
        });
        id
    }

    pub fn find_node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Checks node uniqueness, edge endpoints, and handle syntax.
    pub fn validate(&self) -> Result<(), GraphError> {
        let mut ids = HashSet::new();
        for node in &self.nodes {
            if !ids.insert(node.id.as_str()) {
                return Err(GraphError::DuplicateNode(node.id.clone()));
            }
        }

        for edge in &self.edges {
            for endpoint in [&edge.source, &edge.target] {
                if !ids.contains(endpoint.as_str()) {
                    return Err(GraphError::DanglingEdge {
                        edge_id: edge.id.clone(),
                        node_id: endpoint.clone(),
                    });
                }
            }
            if edge.output_index().is_none() {
                return Err(GraphError::InvalidHandle {
                    edge_id: edge.id.clone(),
                    handle: edge.source_handle.clone(),
                });
            }
            if edge.input_index().is_none() && edge.resource_slot().is_none() {
                return Err(GraphError::InvalidHandle {
                    edge_id: edge.id.clone(),
                    handle: edge.target_handle.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Node definition in a graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub data: NodeConfig,
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            name: None,
            data: NodeConfig::default(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key, value);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Display name for logs: the configured name, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Directed connection from a numbered output port to an input port or a
/// reserved resource slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default = "default_source_handle")]
    pub source_handle: String,
    #[serde(default = "default_target_handle")]
    pub target_handle: String,
}

impl Edge {
    /// Index `N` of an `output-N` source handle.
    pub fn output_index(&self) -> Option<usize> {
        parse_handle(&self.source_handle, "output-")
    }

    /// Index `N` of an `input-N` target handle.
    pub fn input_index(&self) -> Option<usize> {
        parse_handle(&self.target_handle, "input-")
    }

    pub fn resource_slot(&self) -> Option<ResourceSlot> {
        ResourceSlot::from_handle(&self.target_handle)
    }
}

fn default_source_handle() -> String {
    output_handle(0)
}

fn default_target_handle() -> String {
    input_handle(0)
}

pub fn output_handle(index: usize) -> String {
    format!("output-{}", index)
}

pub fn input_handle(index: usize) -> String {
    format!("input-{}", index)
}

fn parse_handle(handle: &str, prefix: &str) -> Option<usize> {
    let digits = handle.strip_prefix(prefix)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Reserved target handles that attach auxiliary resources to agent nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceSlot {
    Model,
    Memory,
    Tool,
}

impl ResourceSlot {
    pub fn handle(self) -> &'static str {
        match self {
            ResourceSlot::Model => "model-slot",
            ResourceSlot::Memory => "memory-slot",
            ResourceSlot::Tool => "tool-slot",
        }
    }

    pub fn from_handle(handle: &str) -> Option<Self> {
        match handle {
            "model-slot" => Some(ResourceSlot::Model),
            "memory-slot" => Some(ResourceSlot::Memory),
            "tool-slot" => Some(ResourceSlot::Tool),
            _ => None,
        }
    }
}

/// Opaque per-node configuration map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeConfig(BTreeMap<String, Value>);

impl NodeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(Value::as_u64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl From<BTreeMap<String, Value>> for NodeConfig {
    fn from(map: BTreeMap<String, Value>) -> Self {
        NodeConfig(map)
    }
}
