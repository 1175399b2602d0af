use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use weavecore::{ExecutionId, ExecutionResult, FlowError, LoopSlot, Value};

use crate::merge::MergeBarriers;

/// One executor invocation as reported to the host.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub node_id: String,
    pub node_type: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub attempts: u32,
}

/// Run-scoped results: latest result per node plus every record in
/// completion order.
#[derive(Debug, Default)]
pub struct NodeResultStore {
    latest: RwLock<HashMap<String, ExecutionResult>>,
    records: RwLock<Vec<NodeRecord>>,
}

impl NodeResultStore {
    pub async fn records(&self) -> Vec<NodeRecord> {
        self.records.read().await.clone()
    }

    pub async fn snapshot(&self) -> HashMap<String, ExecutionResult> {
        self.latest.read().await.clone()
    }

    pub(crate) async fn record(&self, result: Option<&ExecutionResult>, record: NodeRecord) {
        if let Some(result) = result {
            self.latest
                .write()
                .await
                .insert(record.node_id.clone(), result.clone());
        }
        self.records.write().await.push(record);
    }
}

/// Final outcome of [`Engine::run`](crate::Engine::run).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub execution_id: ExecutionId,
    pub success: bool,
    /// Tail output of the last trigger's traversal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    pub results: Vec<NodeRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub failure: Option<FlowError>,
    #[serde(skip)]
    pub node_results: HashMap<String, ExecutionResult>,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn records_for(&self, node_id: &str) -> Vec<&NodeRecord> {
        self.results.iter().filter(|r| r.node_id == node_id).collect()
    }

    /// Latest record for a node.
    pub fn record_for(&self, node_id: &str) -> Option<&NodeRecord> {
        self.results.iter().rev().find(|r| r.node_id == node_id)
    }

    pub fn output_of(&self, node_id: &str) -> Option<&Value> {
        self.record_for(node_id).and_then(|r| r.output.as_ref())
    }

    pub fn visited(&self, node_id: &str) -> bool {
        self.results.iter().any(|r| r.node_id == node_id)
    }
}

/// Position of a traversal path: the loop iterations enclosing it (outermost
/// first) and how many nodes deep it is.
#[derive(Debug, Clone, Default)]
pub(crate) struct Frames {
    loops: Vec<(String, usize)>,
    depth: usize,
}

impl Frames {
    pub(crate) fn root() -> Self {
        Self::default()
    }

    pub(crate) fn contains(&self, node_id: &str) -> bool {
        self.loops.iter().any(|(id, _)| id == node_id)
    }

    pub(crate) fn enter(&self, loop_id: &str, iteration: usize) -> Self {
        let mut loops = self.loops.clone();
        loops.push((loop_id.to_string(), iteration));
        Frames {
            loops,
            depth: self.depth,
        }
    }

    pub(crate) fn descend(&self) -> Self {
        Frames {
            loops: self.loops.clone(),
            depth: self.depth + 1,
        }
    }

    pub(crate) fn depth(&self) -> usize {
        self.depth
    }

    /// Depth is left out so a cycle revisiting a node is still recognised.
    fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.loops.hash(&mut hasher);
        hasher.finish()
    }
}

#[derive(Clone, Default)]
pub(crate) struct LoopEntry {
    pub(crate) state: LoopSlot,
    /// Held for a loop's whole lifetime so sibling branches cannot interleave
    /// iterations of the same loop node.
    pub(crate) gate: Arc<Mutex<()>>,
}

/// Mutable state of one run.
#[derive(Default)]
pub(crate) struct RunState {
    pub(crate) results: NodeResultStore,
    pub(crate) merges: MergeBarriers,
    visited: Mutex<HashSet<(String, u64, u64)>>,
    visits: AtomicUsize,
    loops: Mutex<HashMap<String, LoopEntry>>,
}

impl RunState {
    /// Returns false when the same node already ran with the same input in
    /// the same loop iteration.
    pub(crate) async fn mark_visited(&self, node_id: &str, input: &Value, frames: &Frames) -> bool {
        let key = (node_id.to_string(), input.fingerprint(), frames.fingerprint());
        self.visited.lock().await.insert(key)
    }

    /// Counts a node visit and returns the new total.
    pub(crate) fn count_visit(&self) -> usize {
        self.visits.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) async fn loop_entry(&self, node_id: &str) -> LoopEntry {
        self.loops
            .lock()
            .await
            .entry(node_id.to_string())
            .or_default()
            .clone()
    }
}
