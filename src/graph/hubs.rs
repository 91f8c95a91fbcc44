//! 枢纽节点：按度数排序的库所/迁移.
use petgraph::Direction;
use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};

use crate::analysis::{
    AnalysisError, AnalysisResult, Analyzer, AnalyzerCore, analyzer_constructors,
};
use crate::graph::{NetGraph, NodeKind};
use crate::net::Weight;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeFilter {
    All,
    Places,
    Transitions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegreeOrder {
    Total,
    In,
    Out,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubOptions {
    pub top_n: usize,
    pub min_degree: u64,
    pub node_type: NodeFilter,
    pub sort_by: DegreeOrder,
    /// Degrees sum arc weights instead of counting arcs.
    pub weighted: bool,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            top_n: 10,
            min_degree: 1,
            node_type: NodeFilter::All,
            sort_by: DegreeOrder::Total,
            weighted: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubEntry {
    pub node: String,
    pub name: String,
    pub kind: NodeKind,
    pub in_degree: u64,
    pub out_degree: u64,
    pub degree: u64,
}

impl HubEntry {
    fn key(&self, order: DegreeOrder) -> u64 {
        match order {
            DegreeOrder::Total => self.degree,
            DegreeOrder::In => self.in_degree,
            DegreeOrder::Out => self.out_degree,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubReport {
    pub hubs: Vec<HubEntry>,
    /// Nodes passing the type and degree filters, before `top_n`.
    pub candidates: usize,
    pub max_degree: u64,
    pub average_degree: f64,
}

impl HubReport {
    pub fn rank_of(&self, id: &str) -> Option<usize> {
        self.hubs.iter().position(|hub| hub.node == id)
    }
}

pub struct HubAnalyzer {
    core: AnalyzerCore,
}

analyzer_constructors!(HubAnalyzer);

impl Analyzer for HubAnalyzer {
    type Options = HubOptions;
    const NAME: &'static str = "hubs";

    fn core(&self) -> &AnalyzerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AnalyzerCore {
        &mut self.core
    }

    fn run(
        &self,
        options: &Self::Options,
        result: &mut AnalysisResult,
    ) -> Result<(), AnalysisError> {
        if options.top_n == 0 {
            return Err(AnalysisError::InvalidOption("top_n must be positive".into()));
        }
        let graph = NetGraph::from_net(self.net());
        let report = rank_hubs(&graph, options);
        result.summary = match report.hubs.first() {
            Some(top) => format!(
                "{} hub(s) of {} candidate(s); top {} with degree {}",
                report.hubs.len(),
                report.candidates,
                top.node,
                top.key(options.sort_by)
            ),
            None => "no node passes the degree filter".to_string(),
        };
        result.set_report(&report)
    }
}

pub fn rank_hubs(graph: &NetGraph, options: &HubOptions) -> HubReport {
    let degree = |node: NodeIndex, direction: Direction| -> u64 {
        graph
            .graph
            .edges_directed(node, direction)
            .map(|edge| if options.weighted { *edge.weight() } else { 1 })
            .sum()
    };

    let mut entries = graph
        .graph
        .node_indices()
        .filter(|node| match options.node_type {
            NodeFilter::All => true,
            NodeFilter::Places => graph.kind(*node) == NodeKind::Place,
            NodeFilter::Transitions => graph.kind(*node) == NodeKind::Transition,
        })
        .map(|node| {
            let in_degree = degree(node, Direction::Incoming);
            let out_degree = degree(node, Direction::Outgoing);
            HubEntry {
                node: graph.key(node).to_string(),
                name: graph.name(node).to_string(),
                kind: graph.kind(node),
                in_degree,
                out_degree,
                degree: in_degree + out_degree,
            }
        })
        .collect::<Vec<_>>();

    let average_degree = if entries.is_empty() {
        0.0
    } else {
        entries.iter().map(|entry| entry.degree as f64).sum::<f64>() / entries.len() as f64
    };
    entries.retain(|entry| entry.key(options.sort_by) >= options.min_degree);
    // 度数相同按 id 排，保证结果稳定
    entries.sort_by(|a, b| {
        b.key(options.sort_by)
            .cmp(&a.key(options.sort_by))
            .then_with(|| a.node.cmp(&b.node))
    });

    let candidates = entries.len();
    let max_degree = entries
        .iter()
        .map(|entry| entry.key(options.sort_by))
        .max()
        .unwrap_or(0);
    entries.truncate(options.top_n);
    log::debug!("{candidates} hub candidates, max degree {max_degree}");

    HubReport {
        hubs: entries,
        candidates,
        max_degree,
        average_degree,
    }
}

/// Total weight on a node's arcs.
pub fn weighted_degree(graph: &NetGraph, id: &str) -> Result<Weight, AnalysisError> {
    let node = graph.index_of(id)?;
    Ok(graph
        .graph
        .edges_directed(node, Direction::Incoming)
        .chain(graph.graph.edges_directed(node, Direction::Outgoing))
        .map(|edge| *edge.weight())
        .sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SimpleModel;
    use crate::net::Net;

    /// hub 被三个迁移消费，并由 feed 以权重 3 补充
    fn star() -> SimpleModel {
        SimpleModel::new()
            .place("hub", 3)
            .place("out", 0)
            .place("lonely", 0)
            .transition("feed")
            .transition("a")
            .transition("b")
            .transition("c")
            .arc("feed", "hub", 3)
            .arc("hub", "a", 1)
            .arc("hub", "b", 1)
            .arc("hub", "c", 1)
            .arc("a", "out", 1)
    }

    fn rank(options: &HubOptions) -> HubReport {
        let result = HubAnalyzer::new(&star()).unwrap().analyze(options);
        assert!(result.success, "{:?}", result.errors);
        result.report().unwrap()
    }

    #[test]
    fn ranks_by_total_degree() {
        let report = rank(&HubOptions::default());
        assert_eq!(report.hubs[0].node, "hub");
        assert_eq!(report.hubs[0].degree, 4);
        assert_eq!(report.hubs[0].in_degree, 1);
        assert_eq!(report.rank_of("lonely"), None);
        assert_eq!(report.candidates, 6);
    }

    #[test]
    fn filters_and_orders() {
        let report = rank(&HubOptions {
            node_type: NodeFilter::Transitions,
            sort_by: DegreeOrder::Out,
            ..Default::default()
        });
        assert!(report.hubs.iter().all(|hub| hub.kind == NodeKind::Transition));
        assert_eq!(report.hubs.len(), 2);
        assert_eq!(report.rank_of("a"), Some(0));
        assert_eq!(report.rank_of("feed"), Some(1));

        let report = rank(&HubOptions {
            top_n: 1,
            weighted: true,
            sort_by: DegreeOrder::In,
            ..Default::default()
        });
        assert_eq!(report.hubs.len(), 1);
        assert_eq!(report.hubs[0].in_degree, 3);
        assert_eq!(report.max_degree, 3);
    }

    #[test]
    fn zero_top_n_is_rejected() {
        let result = HubAnalyzer::new(&star()).unwrap().analyze(&HubOptions {
            top_n: 0,
            ..Default::default()
        });
        assert!(!result.success);
    }

    #[test]
    fn weighted_degree_sums_arcs() {
        let net = Net::from_model(&star()).unwrap();
        let graph = NetGraph::from_net(&net);
        assert_eq!(weighted_degree(&graph, "hub").unwrap(), 6);
        assert!(weighted_degree(&graph, "nope").is_err());
    }
}
