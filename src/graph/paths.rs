//! 路径分析：两点间最短路径与简单路径；不给端点时给出全图的直径与平均路径长度.
use std::collections::hash_map::RandomState;

use petgraph::algo::{self, astar, dijkstra};
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use crate::analysis::{
    AnalysisError, AnalysisResult, Analyzer, AnalyzerCore, analyzer_constructors,
};
use crate::graph::NetGraph;
use crate::net::Weight;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathOptions {
    pub source: Option<String>,
    pub target: Option<String>,
    /// Cost of a path is the sum of arc weights instead of its hop count.
    pub weighted: bool,
    pub max_paths: usize,
    /// Maximum number of arcs on an enumerated simple path.
    pub max_length: Option<usize>,
}

impl PathOptions {
    pub fn between(source: &str, target: &str) -> Self {
        Self {
            source: Some(source.to_string()),
            target: Some(target.to_string()),
            ..Self::default()
        }
    }
}

impl Default for PathOptions {
    fn default() -> Self {
        Self {
            source: None,
            target: None,
            weighted: false,
            max_paths: 100,
            max_length: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathInfo {
    pub nodes: Vec<String>,
    pub names: Vec<String>,
    pub hops: usize,
    pub cost: Weight,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphMetrics {
    /// Longest finite shortest-path distance.
    pub diameter: Weight,
    pub average_path_length: f64,
    /// Ordered pairs `(u, v)`, `u != v`, with `v` reachable from `u`.
    pub reachable_pairs: usize,
    pub total_pairs: usize,
    pub strongly_connected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathReport {
    pub source: Option<String>,
    pub target: Option<String>,
    pub connected: Option<bool>,
    pub shortest: Option<PathInfo>,
    pub simple_paths: Vec<PathInfo>,
    pub path_count: usize,
    pub truncated: bool,
    pub metrics: Option<GraphMetrics>,
}

impl PathReport {
    pub fn paths_through(&self, id: &str) -> Vec<&PathInfo> {
        self.simple_paths
            .iter()
            .filter(|path| path.nodes.iter().any(|node| node == id))
            .collect()
    }
}

pub struct PathAnalyzer {
    core: AnalyzerCore,
}

analyzer_constructors!(PathAnalyzer);

impl Analyzer for PathAnalyzer {
    type Options = PathOptions;
    const NAME: &'static str = "paths";

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
        let graph = NetGraph::from_net(self.net());
        let report = find_paths(&graph, options)?;
        if report.truncated {
            result.warn(format!(
                "simple path enumeration stopped at max_paths = {}",
                options.max_paths
            ));
        }
        result.summary = match (&report.metrics, &report.shortest) {
            (Some(metrics), _) => format!(
                "diameter {}, average path length {:.3}, {}/{} pairs reachable",
                metrics.diameter,
                metrics.average_path_length,
                metrics.reachable_pairs,
                metrics.total_pairs
            ),
            (None, Some(shortest)) => format!(
                "shortest path {} hop(s), cost {}; {} simple path(s)",
                shortest.hops, shortest.cost, report.path_count
            ),
            (None, None) => "no path between the given nodes".to_string(),
        };
        result.set_report(&report)
    }
}

pub fn find_paths(graph: &NetGraph, options: &PathOptions) -> Result<PathReport, AnalysisError> {
    if options.max_length == Some(0) {
        return Err(AnalysisError::InvalidOption(
            "max_length must be at least 1 edge".into(),
        ));
    }
    let (source, target) = match (&options.source, &options.target) {
        (Some(source), Some(target)) => (source, target),
        (None, None) => {
            return Ok(PathReport {
                source: None,
                target: None,
                connected: None,
                shortest: None,
                simple_paths: Vec::new(),
                path_count: 0,
                truncated: false,
                metrics: Some(graph_metrics(graph, options.weighted)),
            });
        }
        _ => {
            return Err(AnalysisError::InvalidOption(
                "source and target must be given together".into(),
            ));
        }
    };
    let from = graph.index_of(source)?;
    let to = graph.index_of(target)?;

    let shortest = astar(
        &graph.graph,
        from,
        |node| node == to,
        |edge| if options.weighted { *edge.weight() } else { 1 },
        |_| 0,
    )
    .map(|(_, nodes)| path_info(graph, &nodes));

    let mut simple_paths = if from == to {
        Vec::new()
    } else {
        let max_intermediate = options.max_length.map(|hops| hops.saturating_sub(1));
        algo::all_simple_paths::<Vec<_>, _, RandomState>(
            &graph.graph,
            from,
            to,
            0,
            max_intermediate,
        )
        .take(options.max_paths.saturating_add(1))
        .map(|nodes| path_info(graph, &nodes))
        .collect::<Vec<_>>()
    };
    let truncated = simple_paths.len() > options.max_paths;
    simple_paths.truncate(options.max_paths);
    simple_paths.sort_by(|a, b| (a.hops, a.cost, &a.nodes).cmp(&(b.hops, b.cost, &b.nodes)));

    Ok(PathReport {
        source: Some(source.clone()),
        target: Some(target.clone()),
        connected: Some(shortest.is_some()),
        shortest,
        path_count: simple_paths.len(),
        simple_paths,
        truncated,
        metrics: None,
    })
}

fn path_info(graph: &NetGraph, nodes: &[NodeIndex]) -> PathInfo {
    let cost = nodes
        .windows(2)
        .map(|pair| graph.weight(pair[0], pair[1]).unwrap_or(0))
        .sum();
    PathInfo {
        nodes: graph.keys_of(nodes),
        names: nodes.iter().map(|node| graph.name(*node).to_string()).collect(),
        hops: nodes.len().saturating_sub(1),
        cost,
    }
}

/// 对每个节点跑一次单源最短路，统计所有可达有序对.
pub fn graph_metrics(graph: &NetGraph, weighted: bool) -> GraphMetrics {
    let count = graph.node_count();
    let mut diameter: Weight = 0;
    let mut total = 0u128;
    let mut reachable_pairs = 0usize;
    for start in graph.graph.node_indices() {
        let distances = dijkstra(&graph.graph, start, None, |edge| {
            if weighted { *edge.weight() } else { 1 }
        });
        for (node, distance) in distances {
            if node == start {
                continue;
            }
            reachable_pairs += 1;
            total += distance as u128;
            diameter = diameter.max(distance);
        }
    }
    let total_pairs = count * count.saturating_sub(1);
    GraphMetrics {
        diameter,
        average_path_length: if reachable_pairs == 0 {
            0.0
        } else {
            total as f64 / reachable_pairs as f64
        },
        reachable_pairs,
        total_pairs,
        strongly_connected: count > 0 && reachable_pairs == total_pairs,
    }
}
