//! 网的有向图视图：库所与迁移都是节点，弧是带权边，与标识无关.
pub mod cycles;
pub mod hubs;
pub mod paths;

pub use cycles::{CycleAnalyzer, CycleOptions, CycleReport};
pub use hubs::{HubAnalyzer, HubOptions, HubReport};
pub use paths::{PathAnalyzer, PathOptions, PathReport};

use petgraph::graph::{DiGraph, NodeIndex};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::analysis::AnalysisError;
use crate::net::{Net, NodeId, Weight};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Place,
    Transition,
}

impl From<NodeId> for NodeKind {
    fn from(node: NodeId) -> Self {
        match node {
            NodeId::Place(_) => NodeKind::Place,
            NodeId::Transition(_) => NodeKind::Transition,
        }
    }
}

/// 库所节点在前（按库所序），迁移节点在后（按迁移序）.
#[derive(Debug, Clone)]
pub struct NetGraph {
    pub graph: DiGraph<NodeId, Weight>,
    keys: Vec<String>,
    names: Vec<String>,
    lookup: FxHashMap<String, NodeIndex>,
}

impl NetGraph {
    pub fn from_net(net: &Net) -> Self {
        let mut graph = DiGraph::with_capacity(
            net.places_len() + net.transitions_len(),
            net.arcs().len(),
        );
        let mut keys = Vec::new();
        let mut names = Vec::new();
        let mut lookup = FxHashMap::default();
        let mut indices = FxHashMap::default();

        let nodes = net
            .places
            .indices()
            .map(NodeId::Place)
            .chain(net.transitions.indices().map(NodeId::Transition));
        for node in nodes {
            let index = graph.add_node(node);
            keys.push(net.node_key(node).to_string());
            names.push(net.node_name(node).to_string());
            lookup.insert(net.node_key(node).to_string(), index);
            indices.insert(node, index);
        }
        for (source, target, weight) in net.arcs() {
            graph.add_edge(indices[&source], indices[&target], weight);
        }
        Self {
            graph,
            keys,
            names,
            lookup,
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn index_of(&self, id: &str) -> Result<NodeIndex, AnalysisError> {
        self.lookup
            .get(id)
            .copied()
            .ok_or_else(|| AnalysisError::UnknownNode(id.to_string()))
    }

    pub fn key(&self, index: NodeIndex) -> &str {
        &self.keys[index.index()]
    }

    pub fn name(&self, index: NodeIndex) -> &str {
        &self.names[index.index()]
    }

    pub fn kind(&self, index: NodeIndex) -> NodeKind {
        self.graph[index].into()
    }

    pub fn keys_of(&self, path: &[NodeIndex]) -> Vec<String> {
        path.iter().map(|index| self.key(*index).to_string()).collect()
    }

    /// Weight of the arc `source -> target`, if any.
    pub fn weight(&self, source: NodeIndex, target: NodeIndex) -> Option<Weight> {
        self.graph
            .find_edge(source, target)
            .map(|edge| self.graph[edge])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SimpleModel;

    #[test]
    fn graph_mirrors_arcs() {
        let model = SimpleModel::new()
            .place("P1", 1)
            .place("P2", 0)
            .transition("T1")
            .arc("P1", "T1", 2)
            .arc("T1", "P2", 1);
        let net = Net::from_model(&model).unwrap();
        let graph = NetGraph::from_net(&net);

        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.graph.edge_count(), 2);
        let p1 = graph.index_of("P1").unwrap();
        let t1 = graph.index_of("T1").unwrap();
        assert_eq!(graph.kind(p1), NodeKind::Place);
        assert_eq!(graph.kind(t1), NodeKind::Transition);
        assert_eq!(graph.weight(p1, t1), Some(2));
        assert_eq!(graph.weight(t1, p1), None);
        assert!(matches!(
            graph.index_of("missing"),
            Err(AnalysisError::UnknownNode(_))
        ));
    }
}
