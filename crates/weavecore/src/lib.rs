//! Core abstractions for the weave graph engine
//!
//! This crate provides the graph data model, the node executor contract,
//! the per-invocation execution context, and the event bus. It has no
//! runtime logic of its own.

mod context;
mod error;
pub mod events;
mod graph;
mod node;
mod value;

pub use context::{ExecutionContext, Heartbeat, LoopSlot, NodeDispatch};
pub use error::{FlowError, GraphError, NodeError};
pub use events::*;
pub use graph::{
    input_handle, output_handle, Edge, Graph, Node, NodeConfig, NodeId, ResourceSlot,
};
pub use node::{
    ExecutionResult, LoopData, LoopState, NodeExecutor, NodeKind, NodeMetadata, Route,
};
pub use value::Value;

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
