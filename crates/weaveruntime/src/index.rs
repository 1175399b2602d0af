use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;
use weavecore::{Edge, Graph};

/// Adjacency index over a validated graph.
///
/// Cycles are legal (loop-back edges), so unlike a DAG scheduler this never
/// sorts topologically; it only answers "which edges leave/enter this node"
/// in declaration order.
#[derive(Debug)]
pub(crate) struct GraphIndex {
    graph: DiGraph<usize, usize>,
    node_to_index: HashMap<String, NodeIndex>,
}

impl GraphIndex {
    pub(crate) fn build(graph: &Graph) -> Self {
        let mut digraph = DiGraph::with_capacity(graph.nodes.len(), graph.edges.len());
        let mut node_to_index = HashMap::new();

        for (position, node) in graph.nodes.iter().enumerate() {
            let idx = digraph.add_node(position);
            node_to_index.insert(node.id.clone(), idx);
        }

        for (position, edge) in graph.edges.iter().enumerate() {
            if let (Some(from), Some(to)) =
                (node_to_index.get(&edge.source), node_to_index.get(&edge.target))
            {
                digraph.add_edge(*from, *to, position);
            }
        }

        Self {
            graph: digraph,
            node_to_index,
        }
    }

    pub(crate) fn outgoing<'g>(&self, graph: &'g Graph, node_id: &str) -> Vec<&'g Edge> {
        self.edges(graph, node_id, Direction::Outgoing)
    }

    pub(crate) fn incoming<'g>(&self, graph: &'g Graph, node_id: &str) -> Vec<&'g Edge> {
        self.edges(graph, node_id, Direction::Incoming)
    }

    fn edges<'g>(&self, graph: &'g Graph, node_id: &str, direction: Direction) -> Vec<&'g Edge> {
        let Some(idx) = self.node_to_index.get(node_id) else {
            return Vec::new();
        };
        let mut positions: Vec<usize> = self
            .graph
            .edges_directed(*idx, direction)
            .map(|e| *e.weight())
            .collect();
        positions.sort_unstable();
        positions
            .into_iter()
            .filter_map(|p| graph.edges.get(p))
            .collect()
    }
}
