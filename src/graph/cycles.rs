//! 基本环枚举（Johnson 算法）.
//!
//! 每轮在 `≥ s` 的诱导子图上用 Tarjan 求强连通分量，取含最小节点的非平凡分量，
//! 以该节点为起点在分量内做带阻塞集的回溯。给定 `max_length` 时阻塞集不再成立，
//! 退化为有界深度的普通回溯。只有长度不小于 `min_length` 的环计入 `max_cycles`。
use petgraph::algo::tarjan_scc;
use petgraph::graph::NodeIndex;
use petgraph::visit::NodeFiltered;
use serde::{Deserialize, Serialize};

use crate::analysis::{
    AnalysisError, AnalysisResult, Analyzer, AnalyzerCore, analyzer_constructors,
};
use crate::graph::{NetGraph, NodeKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleOptions {
    /// Minimum number of nodes on a reported cycle.
    pub min_length: usize,
    pub max_length: Option<usize>,
    pub max_cycles: usize,
}

impl Default for CycleOptions {
    fn default() -> Self {
        Self {
            min_length: 2,
            max_length: None,
            max_cycles: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleKind {
    /// One place and one transition feeding each other.
    SelfLoop,
    Balanced,
    PlaceHeavy,
    TransitionHeavy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleFlow {
    Conserving,
    Amplifying,
    Attenuating,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cycle {
    pub nodes: Vec<String>,
    pub names: Vec<String>,
    pub length: usize,
    pub places: usize,
    pub transitions: usize,
    pub kind: CycleKind,
    /// Product of transition→place weights over product of place→transition weights.
    pub weight_ratio: f64,
    pub flow: CycleFlow,
}

impl Cycle {
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.iter().any(|node| node == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycles: Vec<Cycle>,
    pub count: usize,
    pub truncated: bool,
    pub is_acyclic: bool,
    pub longest: usize,
    pub self_loops: usize,
    /// Nodes that lie on at least one reported cycle.
    pub nodes_on_cycles: Vec<String>,
}

impl CycleReport {
    pub fn through(&self, id: &str) -> Vec<&Cycle> {
        self.cycles.iter().filter(|cycle| cycle.contains(id)).collect()
    }

    pub fn of_kind(&self, kind: CycleKind) -> Vec<&Cycle> {
        self.cycles.iter().filter(|cycle| cycle.kind == kind).collect()
    }
}

pub struct CycleAnalyzer {
    core: AnalyzerCore,
}

analyzer_constructors!(CycleAnalyzer);

impl Analyzer for CycleAnalyzer {
    type Options = CycleOptions;
    const NAME: &'static str = "cycles";

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
        let report = find_cycles(&graph, options)?;
        if report.truncated {
            result.warn(format!(
                "cycle enumeration stopped at max_cycles = {}",
                options.max_cycles
            ));
        }
        result.summary = if report.is_acyclic {
            "net graph is acyclic".to_string()
        } else {
            format!(
                "{} elementary cycle(s), longest {} node(s), {} self-loop(s)",
                report.count, report.longest, report.self_loops
            )
        };
        result.set_report(&report)
    }
}

struct Johnson<'a> {
    adjacency: &'a [Vec<usize>],
    min_length: usize,
    max_length: Option<usize>,
    limit: usize,
    start: usize,
    /// 当前起点所在强连通分量（只含 `≥ start` 的节点）
    in_component: Vec<bool>,
    blocked: Vec<bool>,
    blocked_by: Vec<Vec<usize>>,
    stack: Vec<usize>,
    found: Vec<Vec<usize>>,
    truncated: bool,
}

impl<'a> Johnson<'a> {
    fn new(
        adjacency: &'a [Vec<usize>],
        min_length: usize,
        max_length: Option<usize>,
        limit: usize,
    ) -> Self {
        let count = adjacency.len();
        Self {
            adjacency,
            min_length,
            max_length,
            limit,
            start: 0,
            in_component: vec![false; count],
            blocked: vec![false; count],
            blocked_by: vec![Vec::new(); count],
            stack: Vec::new(),
            found: Vec::new(),
            truncated: false,
        }
    }

    /// Searches cycles through `start` inside `members`, then resets only those entries.
    fn search(&mut self, start: usize, members: &[usize]) {
        self.start = start;
        for &node in members {
            self.in_component[node] = true;
        }
        self.circuit(start);
        for &node in members {
            self.in_component[node] = false;
            self.blocked[node] = false;
            self.blocked_by[node].clear();
        }
    }

    fn unblock(&mut self, node: usize) {
        let mut pending = vec![node];
        while let Some(current) = pending.pop() {
            self.blocked[current] = false;
            for other in std::mem::take(&mut self.blocked_by[current]) {
                if self.blocked[other] {
                    pending.push(other);
                }
            }
        }
    }

    fn enter(&mut self, node: usize, frames: &mut Vec<Frame>) {
        self.stack.push(node);
        self.blocked[node] = true;
        frames.push(Frame {
            node,
            cursor: 0,
            closed: false,
        });
    }

    /// 显式栈回溯，环再长也不会耗尽调用栈.
    fn circuit(&mut self, start: usize) {
        let adjacency = self.adjacency;
        let mut frames = Vec::new();
        self.enter(start, &mut frames);

        while let Some(top) = frames.len().checked_sub(1) {
            let Frame { node, cursor, .. } = frames[top];
            if cursor < adjacency[node].len() && !self.truncated {
                frames[top].cursor += 1;
                let next = adjacency[node][cursor];
                if !self.in_component[next] {
                    continue;
                }
                let at_limit = self.max_length.is_some_and(|max| self.stack.len() >= max);
                if next == self.start {
                    frames[top].closed = true;
                    // 过短的环不计入上限
                    if self.stack.len() >= self.min_length {
                        if self.found.len() >= self.limit {
                            self.truncated = true;
                        } else {
                            self.found.push(self.stack.clone());
                        }
                    }
                } else if !self.blocked[next] && !at_limit {
                    self.enter(next, &mut frames);
                }
                continue;
            }

            let closed = frames[top].closed;
            frames.pop();
            if self.max_length.is_some() {
                // 有长度上限时阻塞集不成立，只维护“在栈上”
                self.blocked[node] = false;
            } else if closed {
                self.unblock(node);
            } else {
                for &next in &adjacency[node] {
                    if self.in_component[next] && !self.blocked_by[next].contains(&node) {
                        self.blocked_by[next].push(node);
                    }
                }
            }
            self.stack.pop();
            if closed {
                if let Some(parent) = frames.last_mut() {
                    parent.closed = true;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    node: usize,
    /// 下一条待检查的出边
    cursor: usize,
    closed: bool,
}

/// Elementary cycles with at least `min_length` nodes, plus a flag set when more than
/// `limit` of them exist.
///
/// Each round takes the least node `s` of a non-trivial strongly connected component of
/// the subgraph induced by nodes `≥ s`, so nodes outside every cycle are never searched.
pub fn elementary_cycles(
    graph: &NetGraph,
    min_length: usize,
    max_length: Option<usize>,
    limit: usize,
) -> (Vec<Vec<NodeIndex>>, bool) {
    let count = graph.node_count();
    let adjacency = graph
        .graph
        .node_indices()
        .map(|node| {
            let mut targets = graph
                .graph
                .neighbors(node)
                .map(|next| next.index())
                .collect::<Vec<_>>();
            targets.sort_unstable();
            targets.dedup();
            targets
        })
        .collect::<Vec<_>>();

    let mut search = Johnson::new(&adjacency, min_length, max_length, limit);
    let mut start = 0;
    while start < count && !search.truncated {
        let remaining = NodeFiltered::from_fn(&graph.graph, move |node: NodeIndex| {
            node.index() >= start
        });
        let component = tarjan_scc(&remaining)
            .into_iter()
            .map(|scc| scc.into_iter().map(|node| node.index()).collect::<Vec<_>>())
            .filter(|scc| scc.len() > 1 || scc.iter().any(|node| adjacency[*node].contains(node)))
            .filter_map(|scc| Some((*scc.iter().min()?, scc)))
            .min_by_key(|(least, _)| *least);
        let Some((least, members)) = component else {
            break;
        };
        search.search(least, &members);
        start = least + 1;
    }

    let cycles = search
        .found
        .into_iter()
        .map(|cycle| cycle.into_iter().map(NodeIndex::new).collect())
        .collect();
    (cycles, search.truncated)
}

pub fn find_cycles(graph: &NetGraph, options: &CycleOptions) -> Result<CycleReport, AnalysisError> {
    if options.max_length.is_some_and(|max| max < options.min_length.max(1)) {
        return Err(AnalysisError::InvalidOption(format!(
            "max_length {:?} is below min_length {}",
            options.max_length, options.min_length
        )));
    }
    let (raw, truncated) = elementary_cycles(
        graph,
        options.min_length,
        options.max_length,
        options.max_cycles,
    );

    let cycles = raw
        .into_iter()
        .map(|cycle| describe(graph, &cycle))
        .collect::<Vec<_>>();

    let mut nodes_on_cycles = Vec::new();
    for index in graph.graph.node_indices() {
        let key = graph.key(index);
        if cycles.iter().any(|cycle| cycle.contains(key)) {
            nodes_on_cycles.push(key.to_string());
        }
    }
    log::debug!("{} elementary cycles (truncated = {truncated})", cycles.len());

    Ok(CycleReport {
        count: cycles.len(),
        truncated,
        is_acyclic: cycles.is_empty() && !truncated,
        longest: cycles.iter().map(|cycle| cycle.length).max().unwrap_or(0),
        self_loops: cycles
            .iter()
            .filter(|cycle| cycle.kind == CycleKind::SelfLoop)
            .count(),
        nodes_on_cycles,
        cycles,
    })
}

fn describe(graph: &NetGraph, cycle: &[NodeIndex]) -> Cycle {
    let places = cycle
        .iter()
        .filter(|node| graph.kind(**node) == NodeKind::Place)
        .count();
    let transitions = cycle.len() - places;
    let kind = if places == 1 && transitions == 1 {
        CycleKind::SelfLoop
    } else if places == transitions {
        CycleKind::Balanced
    } else if places > transitions {
        CycleKind::PlaceHeavy
    } else {
        CycleKind::TransitionHeavy
    };

    let mut produced = 1.0f64;
    let mut consumed = 1.0f64;
    for (idx, source) in cycle.iter().enumerate() {
        let target = cycle[(idx + 1) % cycle.len()];
        let weight = graph.weight(*source, target).unwrap_or(1) as f64;
        match graph.kind(*source) {
            NodeKind::Transition => produced *= weight,
            NodeKind::Place => consumed *= weight,
        }
    }
    let weight_ratio = produced / consumed;
    let flow = if (weight_ratio - 1.0).abs() < 1e-12 {
        CycleFlow::Conserving
    } else if weight_ratio > 1.0 {
        CycleFlow::Amplifying
    } else {
        CycleFlow::Attenuating
    };

    Cycle {
        nodes: graph.keys_of(cycle),
        names: cycle.iter().map(|node| graph.name(*node).to_string()).collect(),
        length: cycle.len(),
        places,
        transitions,
        kind,
        weight_ratio,
        flow,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SimpleModel;
    use crate::net::Net;

    fn analyze(model: &SimpleModel, options: &CycleOptions) -> (AnalysisResult, CycleReport) {
        let result = CycleAnalyzer::new(model).unwrap().analyze(options);
        assert!(result.success, "{:?}", result.errors);
        let report = result.report().unwrap();
        (result, report)
    }

    /// a -> t1 -> b -> t2 -> a，外加 a <-> t3 自环
    fn two_cycles() -> SimpleModel {
        SimpleModel::new()
            .place("a", 1)
            .place("b", 0)
            .transition("t1")
            .transition("t2")
            .transition("t3")
            .arc("a", "t1", 1)
            .arc("t1", "b", 2)
            .arc("b", "t2", 1)
            .arc("t2", "a", 1)
            .arc("a", "t3", 1)
            .arc("t3", "a", 1)
    }

    #[test]
    fn finds_and_classifies_elementary_cycles() {
        let (_, report) = analyze(&two_cycles(), &CycleOptions::default());

        assert_eq!(report.count, 2);
        assert_eq!(report.self_loops, 1);
        assert_eq!(report.longest, 4);
        let big = report.of_kind(CycleKind::Balanced);
        assert_eq!(big.len(), 1);
        assert_eq!(big[0].flow, CycleFlow::Amplifying);
        assert!((big[0].weight_ratio - 2.0).abs() < 1e-12);
        assert_eq!(report.through("t3").len(), 1);
        assert_eq!(report.through("a").len(), 2);
        assert!(report.through("nowhere").is_empty());
    }

    #[test]
    fn length_filters_apply() {
        let (_, report) = analyze(
            &two_cycles(),
            &CycleOptions {
                min_length: 3,
                ..Default::default()
            },
        );
        assert_eq!(report.count, 1);

        let (_, report) = analyze(
            &two_cycles(),
            &CycleOptions {
                max_length: Some(2),
                ..Default::default()
            },
        );
        assert_eq!(report.count, 1);
        assert_eq!(report.cycles[0].kind, CycleKind::SelfLoop);
    }

    #[test]
    fn truncation_warns() {
        let (result, report) = analyze(
            &two_cycles(),
            &CycleOptions {
                max_cycles: 1,
                ..Default::default()
            },
        );
        assert!(report.truncated);
        assert_eq!(report.count, 1);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn short_cycles_do_not_use_up_max_cycles() {
        // 先找到的是自环，但 min_length 只要长环
        let (result, report) = analyze(
            &two_cycles(),
            &CycleOptions {
                min_length: 3,
                max_cycles: 1,
                ..Default::default()
            },
        );
        assert_eq!(report.count, 1);
        assert_eq!(report.cycles[0].length, 4);
        assert!(!report.truncated);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn exactly_max_cycles_is_not_truncated() {
        let (result, report) = analyze(
            &two_cycles(),
            &CycleOptions {
                max_cycles: 2,
                ..Default::default()
            },
        );
        assert_eq!(report.count, 2);
        assert!(!report.truncated);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn long_ring_with_acyclic_tail() {
        // 1000 节点的环，后接 1000 节点的链：链上的节点不应作为起点展开
        let size = 500;
        let mut model = SimpleModel::new();
        for idx in 0..size {
            model = model
                .place(&format!("p{idx}"), u64::from(idx == 0))
                .transition(&format!("t{idx}"));
        }
        for idx in 0..size {
            model = model
                .arc(&format!("p{idx}"), &format!("t{idx}"), 1)
                .arc(&format!("t{idx}"), &format!("p{}", (idx + 1) % size), 1);
        }
        let mut previous = format!("t{}", size - 1);
        for idx in 0..size {
            let place = format!("q{idx}");
            let transition = format!("u{idx}");
            model = model
                .place(&place, 0)
                .transition(&transition)
                .arc(&previous, &place, 1)
                .arc(&place, &transition, 1);
            previous = transition;
        }
        let graph = NetGraph::from_net(&Net::from_model(&model).unwrap());
        let (cycles, truncated) = elementary_cycles(&graph, 2, None, 10);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].len(), 2 * size);
        assert!(!truncated);
    }

    #[test]
    fn chain_is_acyclic() {
        let (_, report) = analyze(
            &SimpleModel::new()
                .place("P1", 1)
                .place("P2", 0)
                .transition("T1")
                .arc("P1", "T1", 1)
                .arc("T1", "P2", 1),
            &CycleOptions::default(),
        );
        assert!(report.is_acyclic);
        assert!(report.nodes_on_cycles.is_empty());
    }
}
