//! 有界可达图构建.
//!
//! 从初始标识出发做广度优先搜索，每个状态尝试发生全部迁移，按标识精确去重。
//! token 足够但因容量或溢出无法发生的迁移记为失败；没有任何成功发生的状态即死锁。
//! 状态数达到 `max_states` 或深度达到 `max_depth` 即停止，并在报告中显式标记
//! `exploration_complete = false`。标识只在本地副本上变化，网本身不被修改。
use std::collections::VecDeque;
use std::collections::hash_map::Entry;

use indexmap::IndexMap;
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableGraph;
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::analysis::{
    AnalysisError, AnalysisResult, Analyzer, AnalyzerCore, analyzer_constructors,
};
use crate::net::{FireError, Idx, Marking, Net, PlaceId, TransitionId, Weight};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExplorationLimits {
    pub max_states: usize,
    /// `None` leaves depth unbounded; `max_states` still applies.
    pub max_depth: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct StateNode {
    pub marking: Marking,
    pub depth: usize,
    /// BFS tree edge used to reach this state first.
    pub parent: Option<(NodeIndex, TransitionId)>,
    pub enabled: Vec<TransitionId>,
}

/// 发生失败的记录（容量或溢出）.
#[derive(Debug, Clone)]
pub struct TransitionFailure {
    pub source: NodeIndex,
    pub transition: TransitionId,
    pub reason: String,
}

#[derive(Debug)]
pub struct StateGraph {
    pub graph: StableGraph<StateNode, TransitionId>,
    pub initial: NodeIndex,
    pub markings: FxHashMap<Marking, NodeIndex>,
    pub deadlocks: Vec<NodeIndex>,
    pub state_limit_hit: bool,
    pub depth_limit_hit: bool,
    pub failures: Vec<TransitionFailure>,
}

impl StateGraph {
    pub fn explore(net: &Net, limits: ExplorationLimits) -> Self {
        let mut graph = StableGraph::new();
        let mut markings: FxHashMap<Marking, NodeIndex> = FxHashMap::default();
        let mut queue = VecDeque::new();
        let mut deadlocks = Vec::new();
        let mut failures = Vec::new();
        let mut state_limit_hit = false;
        let mut depth_limit_hit = false;

        let initial_marking = net.initial_marking();
        let initial = graph.add_node(StateNode {
            marking: initial_marking.clone(),
            depth: 0,
            parent: None,
            enabled: Vec::new(),
        });
        markings.insert(initial_marking, initial);
        queue.push_back(initial);

        while let Some(state) = queue.pop_front() {
            let current = graph[state].marking.clone();
            let depth = graph[state].depth;
            let mut successors = Vec::new();
            for transition in net.transitions.indices() {
                match net.fire_transition(&current, transition) {
                    Ok(next) => successors.push((transition, next)),
                    Err(FireError::NotEnabled(_)) => {}
                    Err(err) => failures.push(TransitionFailure {
                        source: state,
                        transition,
                        reason: err.to_string(),
                    }),
                }
            }
            graph[state].enabled = successors.iter().map(|(transition, _)| *transition).collect();

            if successors.is_empty() {
                deadlocks.push(state);
                continue;
            }
            if limits.max_depth.is_some_and(|limit| depth >= limit) {
                depth_limit_hit = true;
                continue;
            }

            for (transition, next) in successors {
                let target = match markings.entry(next) {
                    Entry::Occupied(entry) => *entry.get(),
                    Entry::Vacant(entry) => {
                        if graph.node_count() >= limits.max_states {
                            state_limit_hit = true;
                            continue;
                        }
                        let index = graph.add_node(StateNode {
                            marking: entry.key().clone(),
                            depth: depth + 1,
                            parent: Some((state, transition)),
                            enabled: Vec::new(),
                        });
                        entry.insert(index);
                        queue.push_back(index);
                        index
                    }
                };
                graph.add_edge(state, target, transition);
            }
        }

        log::debug!(
            "state graph: {} states, {} edges, {} deadlocks",
            graph.node_count(),
            graph.edge_count(),
            deadlocks.len()
        );

        Self {
            graph,
            initial,
            markings,
            deadlocks,
            state_limit_hit,
            depth_limit_hit,
            failures,
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.state_limit_hit && !self.depth_limit_hit
    }

    pub fn state_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn node(&self, index: NodeIndex) -> &StateNode {
        &self.graph[index]
    }

    /// 沿 BFS 树回溯得到最短发生序列.
    pub fn witness(&self, target: NodeIndex) -> Vec<TransitionId> {
        let mut sequence = Vec::new();
        let mut current = target;
        while let Some((parent, transition)) = self.graph[current].parent {
            sequence.push(transition);
            current = parent;
        }
        sequence.reverse();
        sequence
    }

    /// Breadth-first order, so the first hit has a shortest witness.
    pub fn find<F>(&self, mut predicate: F) -> Option<NodeIndex>
    where
        F: FnMut(&Marking) -> bool,
    {
        self.graph
            .node_indices()
            .find(|index| predicate(&self.graph[*index].marking))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReachabilityOptions {
    pub max_states: usize,
    pub max_depth: Option<usize>,
    pub build_graph: bool,
    /// Partial marking by place id; places left out are unconstrained.
    pub target: Option<IndexMap<String, Weight>>,
}

impl Default for ReachabilityOptions {
    fn default() -> Self {
        Self {
            max_states: 1000,
            max_depth: Some(100),
            build_graph: false,
            target: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    StateLimit,
    DepthLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Reachable,
    Unreachable,
    /// Not found, but exploration was cut short.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetQuery {
    pub target: IndexMap<String, Weight>,
    pub status: TargetStatus,
    pub witness: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadMarking {
    pub state: usize,
    pub marking: IndexMap<String, Weight>,
    pub depth: usize,
    pub witness: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: usize,
    pub target: usize,
    pub transition: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReachabilityGraphDump {
    pub nodes: Vec<IndexMap<String, Weight>>,
    pub edges: Vec<GraphEdge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedFiring {
    pub state: usize,
    pub transition: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReachabilityReport {
    pub state_count: usize,
    pub edge_count: usize,
    pub exploration_complete: bool,
    pub stopped_by: Vec<StopReason>,
    pub depth_reached: usize,
    /// Every distinct marking visited, initial marking first.
    pub markings: Vec<IndexMap<String, Weight>>,
    pub max_tokens: IndexMap<String, Weight>,
    pub deadlocks: Vec<DeadMarking>,
    pub failed_firings: Vec<FailedFiring>,
    pub target: Option<TargetQuery>,
    pub graph: Option<ReachabilityGraphDump>,
}

impl ReachabilityReport {
    pub fn has_deadlock(&self) -> bool {
        !self.deadlocks.is_empty()
    }

    pub fn contains(&self, marking: &IndexMap<String, Weight>) -> bool {
        self.markings.iter().any(|visited| visited == marking)
    }
}

pub struct ReachabilityAnalyzer {
    core: AnalyzerCore,
}

analyzer_constructors!(ReachabilityAnalyzer);

impl Analyzer for ReachabilityAnalyzer {
    type Options = ReachabilityOptions;
    const NAME: &'static str = "reachability";

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
        let report = explore_reachability(self.net(), options)?;
        if !report.exploration_complete {
            result.warn(format!(
                "exploration incomplete after {} states (stopped by {:?})",
                report.state_count, report.stopped_by
            ));
        }
        if !report.failed_firings.is_empty() {
            result.warn(format!(
                "{} firing(s) blocked by capacity or overflow",
                report.failed_firings.len()
            ));
        }
        let mut summary = format!(
            "{} reachable marking(s), {} deadlock state(s)",
            report.state_count,
            report.deadlocks.len()
        );
        if !report.exploration_complete {
            summary.push_str(" (partial)");
        }
        if let Some(query) = &report.target {
            summary.push_str(&format!("; target {:?}", query.status));
        }
        result.summary = summary;
        result.set_report(&report)
    }
}

/// Explores the state space within the option bounds and builds the report.
pub fn explore_reachability(
    net: &Net,
    options: &ReachabilityOptions,
) -> Result<ReachabilityReport, AnalysisError> {
    if options.max_states == 0 {
        return Err(AnalysisError::InvalidOption(
            "max_states must be at least 1".into(),
        ));
    }
    let target = options
        .target
        .as_ref()
        .map(|target| resolve_target(net, target))
        .transpose()?;

    let states = StateGraph::explore(
        net,
        ExplorationLimits {
            max_states: options.max_states,
            max_depth: options.max_depth,
        },
    );

    let mut stopped_by = Vec::new();
    if states.state_limit_hit {
        stopped_by.push(StopReason::StateLimit);
    }
    if states.depth_limit_hit {
        stopped_by.push(StopReason::DepthLimit);
    }

    let order = states.graph.node_indices().collect::<Vec<_>>();
    let position = order
        .iter()
        .enumerate()
        .map(|(pos, index)| (*index, pos))
        .collect::<FxHashMap<_, _>>();

    let mut max_tokens = net
        .places
        .iter()
        .map(|place| (place.id.clone(), 0))
        .collect::<IndexMap<String, Weight>>();
    for index in &order {
        for (place, tokens) in states.node(*index).marking.iter() {
            let entry = &mut max_tokens[place.index()];
            *entry = (*entry).max(*tokens);
        }
    }

    let sequence_ids = |sequence: Vec<TransitionId>| {
        sequence
            .into_iter()
            .map(|transition| net.transitions[transition].id.clone())
            .collect::<Vec<_>>()
    };

    let deadlocks = states
        .deadlocks
        .iter()
        .map(|index| DeadMarking {
            state: position[index],
            marking: net.marking_by_id(&states.node(*index).marking),
            depth: states.node(*index).depth,
            witness: sequence_ids(states.witness(*index)),
        })
        .collect();

    let failed_firings = states
        .failures
        .iter()
        .map(|failure| FailedFiring {
            state: position[&failure.source],
            transition: net.transitions[failure.transition].id.clone(),
            reason: failure.reason.clone(),
        })
        .collect();

    let target = target.map(|(constraints, query)| {
        let hit = states.find(|marking| {
            constraints
                .iter()
                .all(|(place, tokens)| marking.tokens(*place) == *tokens)
        });
        let status = match hit {
            Some(_) => TargetStatus::Reachable,
            None if states.is_complete() => TargetStatus::Unreachable,
            None => TargetStatus::Unknown,
        };
        TargetQuery {
            target: query,
            status,
            witness: hit.map(|index| sequence_ids(states.witness(index))),
        }
    });

    let graph = options.build_graph.then(|| ReachabilityGraphDump {
        nodes: order
            .iter()
            .map(|index| net.marking_by_id(&states.node(*index).marking))
            .collect(),
        edges: states
            .graph
            .edge_references()
            .map(|edge| GraphEdge {
                source: position[&edge.source()],
                target: position[&edge.target()],
                transition: net.transitions[*edge.weight()].id.clone(),
            })
            .collect(),
    });

    Ok(ReachabilityReport {
        state_count: states.state_count(),
        edge_count: states.graph.edge_count(),
        exploration_complete: states.is_complete(),
        stopped_by,
        depth_reached: order
            .iter()
            .map(|index| states.node(*index).depth)
            .max()
            .unwrap_or(0),
        markings: order
            .iter()
            .map(|index| net.marking_by_id(&states.node(*index).marking))
            .collect(),
        max_tokens,
        deadlocks,
        failed_firings,
        target,
        graph,
    })
}

type ResolvedTarget = (Vec<(PlaceId, Weight)>, IndexMap<String, Weight>);

fn resolve_target(
    net: &Net,
    target: &IndexMap<String, Weight>,
) -> Result<ResolvedTarget, AnalysisError> {
    let constraints = target
        .iter()
        .map(|(id, tokens)| {
            net.place_id(id)
                .map(|place| (place, *tokens))
                .ok_or_else(|| AnalysisError::UnknownNode(id.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((constraints, target.clone()))
}
