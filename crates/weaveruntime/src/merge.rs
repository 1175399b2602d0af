//! Fan-in synchronisation for merge nodes.
//!
//! The merge executor only aggregates; deciding *when* it may run is done
//! here. In `wait` mode every declared inbound edge must deliver before the
//! executor runs exactly once; in `first` mode the first arrival wins and the
//! rest are dropped for the remainder of the run.

use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::{watch, Mutex};
use weavecore::{NodeConfig, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MergeMode {
    Wait,
    First,
}

impl MergeMode {
    pub(crate) fn from_config(config: &NodeConfig) -> Self {
        match config.get_str("mode") {
            Some(mode) if mode.eq_ignore_ascii_case("first") => MergeMode::First,
            _ => MergeMode::Wait,
        }
    }
}

/// What the arriving path should do next.
pub(crate) enum Arrival {
    /// All inputs present: run the executor with these, ordered by inbound index.
    Ready(Vec<Value>),
    /// Wait until another path completes the barrier.
    Pending(watch::Receiver<bool>),
    /// Arrival after a `first`-mode merge already fired.
    Discarded,
}

struct Barrier {
    /// Keyed by edge id; a repeated delivery on the same edge replaces the
    /// buffered payload.
    arrivals: BTreeMap<String, (usize, Value)>,
    complete: watch::Sender<bool>,
}

impl Barrier {
    fn new() -> Self {
        let (complete, _) = watch::channel(false);
        Self {
            arrivals: BTreeMap::new(),
            complete,
        }
    }
}

#[derive(Default)]
struct BarrierTable {
    open: HashMap<String, Barrier>,
    fired_first: HashSet<String>,
}

#[derive(Default)]
pub(crate) struct MergeBarriers {
    table: Mutex<BarrierTable>,
}

impl MergeBarriers {
    pub(crate) async fn arrive(
        &self,
        node_id: &str,
        mode: MergeMode,
        expected: usize,
        edge_id: &str,
        inbound_index: usize,
        payload: Value,
    ) -> Arrival {
        let mut table = self.table.lock().await;

        if mode == MergeMode::First {
            return if table.fired_first.insert(node_id.to_string()) {
                Arrival::Ready(vec![payload])
            } else {
                Arrival::Discarded
            };
        }

        let barrier = table
            .open
            .entry(node_id.to_string())
            .or_insert_with(Barrier::new);
        barrier
            .arrivals
            .insert(edge_id.to_string(), (inbound_index, payload));
        if barrier.arrivals.len() < expected {
            return Arrival::Pending(barrier.complete.subscribe());
        }

        // Complete: reset the barrier so the node can synchronise again
        // (e.g. inside a loop body).
        match table.open.remove(node_id) {
            Some(barrier) => {
                barrier.complete.send_replace(true);
                let mut inputs: Vec<(usize, Value)> = barrier.arrivals.into_values().collect();
                inputs.sort_by_key(|(index, _)| *index);
                Arrival::Ready(inputs.into_iter().map(|(_, v)| v).collect())
            }
            None => Arrival::Discarded,
        }
    }

    /// Drops the open barrier of a node that gave up waiting and returns how
    /// many payloads it held. Other waiters on it are released unfired, and
    /// the next arrival starts a fresh barrier.
    pub(crate) async fn abandon(&self, node_id: &str) -> usize {
        self.table
            .lock()
            .await
            .open
            .remove(node_id)
            .map(|b| b.arrivals.len())
            .unwrap_or(0)
    }
}
