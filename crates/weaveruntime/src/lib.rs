//! Graph execution runtime
//!
//! This crate provides the engine that runs graphs: the node registry, the
//! traversal with its invocation wrapper (timeouts, heartbeats, retries),
//! loop driving, merge barriers, and pause/step/stop controls.

mod control;
mod executor;
mod index;
mod invoke;
mod merge;
mod registry;
mod resources;
mod runtime;
mod state;

pub use control::RunControl;
pub use invoke::NodePolicy;
pub use registry::NodeRegistry;
pub use runtime::{Engine, EngineConfig, RunOptions};
pub use state::{NodeRecord, NodeResultStore, RunReport};
