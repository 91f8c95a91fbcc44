//! Petri网有界性分析
//!
//! 依次尝试三种方法：
//! 1. P-不变量：存在覆盖全部库所的正不变量时网是守恒的，因而有界；
//! 2. 覆盖树（Karp–Miller，ω 表示无界分量），受 `state_limit` 约束；
//! 3. 标识启发式：以当前最大标识为界，超过 `max_bound` 视为无界。
use std::collections::VecDeque;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::analysis::invariants::{InvariantOptions, compute_invariants, place_bound};
use crate::analysis::{
    AnalysisError, AnalysisResult, Analyzer, AnalyzerCore, analyzer_constructors,
};
use crate::net::{Idx, Net, PlaceId, TransitionId, Weight};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundednessOptions {
    pub max_bound: Weight,
    pub use_invariants: bool,
    pub coverability: bool,
    pub state_limit: usize,
}

impl Default for BoundednessOptions {
    fn default() -> Self {
        Self {
            max_bound: 100,
            use_invariants: true,
            coverability: true,
            state_limit: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundednessStatus {
    Bounded,
    Unbounded,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundMethod {
    PInvariant,
    CoverabilityTree,
    MarkingHeuristic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceBound {
    pub place: String,
    pub name: String,
    pub tokens: Weight,
    /// `None` when no finite bound is known.
    pub bound: Option<Weight>,
    pub capacity: Option<Weight>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityViolation {
    pub place: String,
    pub tokens: Weight,
    pub capacity: Weight,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundednessReport {
    pub status: BoundednessStatus,
    pub is_bounded: Option<bool>,
    pub method: BoundMethod,
    pub bound_level: Option<Weight>,
    pub is_conservative: bool,
    pub place_bounds: Vec<PlaceBound>,
    pub unbounded_places: Vec<String>,
    pub witness: Option<Vec<String>>,
    pub coverability_nodes: Option<usize>,
    pub max_bound: Weight,
    pub overflow_risk: bool,
    pub overflow_places: Vec<String>,
    pub capacity_violations: Vec<CapacityViolation>,
    /// Why the P-invariant step was skipped, if it failed.
    pub invariant_error: Option<String>,
}

impl BoundednessReport {
    pub fn bound_of(&self, place: &str) -> Option<Weight> {
        self.place_bounds
            .iter()
            .find(|entry| entry.place == place)
            .and_then(|entry| entry.bound)
    }
}

pub struct BoundednessAnalyzer {
    core: AnalyzerCore,
}

analyzer_constructors!(BoundednessAnalyzer);

impl Analyzer for BoundednessAnalyzer {
    type Options = BoundednessOptions;
    const NAME: &'static str = "boundedness";

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
        let report = check_boundedness(self.net(), options)?;
        if let Some(error) = &report.invariant_error {
            result.warn(format!("P-invariant bound skipped: {error}"));
        }
        for violation in &report.capacity_violations {
            result.warn(format!(
                "place {} holds {} tokens, above its capacity {}",
                violation.place, violation.tokens, violation.capacity
            ));
        }
        if report.overflow_risk {
            result.warn(format!(
                "overflow risk: {} place(s) above 80% of max_bound {}",
                report.overflow_places.len(),
                report.max_bound
            ));
        }
        result.summary = match report.status {
            BoundednessStatus::Bounded => format!(
                "bounded ({:?}), bound level {}",
                report.method,
                report.bound_level.unwrap_or_default()
            ),
            BoundednessStatus::Unbounded => format!(
                "unbounded ({:?}): {}",
                report.method,
                report.unbounded_places.join(", ")
            ),
            BoundednessStatus::Unknown => "boundedness could not be decided".to_string(),
        };
        result.set_report(&report)
    }
}

/// ω 标识：`None` 表示该分量可任意大.
type OmegaMarking = Vec<Option<Weight>>;

#[derive(Debug, Clone)]
struct CoverTreeNode {
    marking: OmegaMarking,
    parent: Option<usize>,
    transition_from_parent: Option<TransitionId>,
}

#[derive(Debug)]
enum Coverability {
    Bounded { bounds: Vec<Weight>, nodes: usize },
    Unbounded {
        places: Vec<PlaceId>,
        witness: Vec<TransitionId>,
        nodes: usize,
    },
    LimitReached { nodes: usize },
}

struct CoverTree<'a> {
    net: &'a Net,
    nodes: Vec<CoverTreeNode>,
}

impl<'a> CoverTree<'a> {
    fn new(net: &'a Net) -> Self {
        let root = CoverTreeNode {
            marking: net.places.iter().map(|place| Some(place.tokens)).collect(),
            parent: None,
            transition_from_parent: None,
        };
        Self {
            net,
            nodes: vec![root],
        }
    }

    /// ω 分量满足任意输入弧.
    fn fire(&self, marking: &[Option<Weight>], transition: TransitionId) -> Option<OmegaMarking> {
        let mut next = marking.to_vec();
        for (place, weight) in self.net.input_places(transition) {
            match next[place.index()] {
                None => {}
                Some(tokens) if tokens >= weight => next[place.index()] = Some(tokens - weight),
                Some(_) => return None,
            }
        }
        for (place, weight) in self.net.output_places(transition) {
            if let Some(tokens) = next[place.index()] {
                let after = tokens.checked_add(weight);
                match (after, self.net.places[place].capacity) {
                    (Some(after), Some(capacity)) if after > capacity => return None,
                    (Some(after), _) => next[place.index()] = Some(after),
                    (None, _) => next[place.index()] = None,
                }
            }
        }
        Some(next)
    }

    /// 若某祖先标识被严格覆盖，则把严格增长的分量置为 ω（容量库所除外）.
    fn accelerate(&self, parent: usize, mut marking: OmegaMarking) -> OmegaMarking {
        let mut current = Some(parent);
        while let Some(index) = current {
            let ancestor = &self.nodes[index].marking;
            if covers(&marking, ancestor) && marking != *ancestor {
                for (idx, (old, new)) in ancestor.iter().zip(marking.clone().iter()).enumerate() {
                    if let (Some(old), Some(new)) = (old, new) {
                        let limited = self.net.places[PlaceId::from_usize(idx)].capacity.is_some();
                        if old < new && !limited {
                            marking[idx] = None;
                        }
                    }
                }
            }
            current = self.nodes[index].parent;
        }
        marking
    }

    fn witness(&self, mut index: usize) -> Vec<TransitionId> {
        let mut sequence = Vec::new();
        while let Some(parent) = self.nodes[index].parent {
            if let Some(transition) = self.nodes[index].transition_from_parent {
                sequence.push(transition);
            }
            index = parent;
        }
        sequence.reverse();
        sequence
    }

    fn build(mut self, state_limit: usize) -> Coverability {
        let mut queue = VecDeque::from([0usize]);
        let mut processed: FxHashSet<OmegaMarking> = FxHashSet::default();
        let mut first_omega: Option<usize> = None;

        while let Some(index) = queue.pop_front() {
            let marking = self.nodes[index].marking.clone();
            if first_omega.is_none() && marking.iter().any(Option::is_none) {
                first_omega = Some(index);
            }
            // 重复标识不再展开
            if !processed.insert(marking.clone()) {
                continue;
            }

            for transition in self.net.transitions.indices() {
                let Some(next) = self.fire(&marking, transition) else {
                    continue;
                };
                let next = self.accelerate(index, next);
                if self.nodes.len() >= state_limit {
                    log::debug!("coverability tree hit the state limit of {state_limit}");
                    return self.finish(first_omega, true);
                }
                self.nodes.push(CoverTreeNode {
                    marking: next,
                    parent: Some(index),
                    transition_from_parent: Some(transition),
                });
                queue.push_back(self.nodes.len() - 1);
            }
        }
        self.finish(first_omega, false)
    }

    fn finish(&self, first_omega: Option<usize>, truncated: bool) -> Coverability {
        let nodes = self.nodes.len();
        let first_omega = first_omega.or_else(|| {
            self.nodes
                .iter()
                .position(|node| node.marking.iter().any(Option::is_none))
        });
        if let Some(index) = first_omega {
            let places = (0..self.net.places_len())
                .filter(|idx| self.nodes.iter().any(|node| node.marking[*idx].is_none()))
                .map(PlaceId::from_usize)
                .collect();
            return Coverability::Unbounded {
                places,
                witness: self.witness(index),
                nodes,
            };
        }
        if truncated {
            return Coverability::LimitReached { nodes };
        }
        let bounds = (0..self.net.places_len())
            .map(|idx| {
                self.nodes
                    .iter()
                    .filter_map(|node| node.marking[idx])
                    .max()
                    .unwrap_or(0)
            })
            .collect();
        Coverability::Bounded { bounds, nodes }
    }
}

/// 检查 `m1` 是否覆盖 `m2`（逐分量 ≥，ω 覆盖一切）.
fn covers(m1: &[Option<Weight>], m2: &[Option<Weight>]) -> bool {
    m1.iter().zip(m2.iter()).all(|(a, b)| match (a, b) {
        (None, _) => true,
        (Some(a), Some(b)) => a >= b,
        (Some(_), None) => false,
    })
}

/// Runs the invariant, coverability and heuristic checks in that order.
pub fn check_boundedness(
    net: &Net,
    options: &BoundednessOptions,
) -> Result<BoundednessReport, AnalysisError> {
    if options.max_bound == 0 {
        return Err(AnalysisError::InvalidOption(
            "max_bound must be positive".into(),
        ));
    }
    let marking = net.initial_marking();
    let tokens = marking.as_slice();
    let places = net.places_len();

    let mut bounds: Vec<Option<Weight>> = vec![None; places];
    let mut is_conservative = false;
    let mut invariant_error = None;
    if options.use_invariants {
        match compute_invariants(net, &InvariantOptions::place()) {
            Ok(invariants) => {
                // 非负不变量之和仍是不变量，并集覆盖全部库所即守恒
                is_conservative = invariants.fully_covered;
                for invariant in &invariants.invariants {
                    for place in net.places.indices() {
                        if let Some(bound) = place_bound(invariant, place, tokens) {
                            let slot = &mut bounds[place.index()];
                            *slot = Some(slot.map_or(bound, |current| current.min(bound)));
                        }
                    }
                }
            }
            Err(err) => {
                log::warn!("P-invariant step failed, continuing with coverability: {err}");
                invariant_error = Some(err.to_string());
            }
        }
    }

    let mut status = BoundednessStatus::Unknown;
    let mut method = BoundMethod::MarkingHeuristic;
    let mut unbounded_places = Vec::new();
    let mut witness = None;
    let mut coverability_nodes = None;

    if is_conservative {
        status = BoundednessStatus::Bounded;
        method = BoundMethod::PInvariant;
    } else if options.coverability {
        match CoverTree::new(net).build(options.state_limit.max(1)) {
            Coverability::Bounded {
                bounds: tree_bounds,
                nodes,
            } => {
                status = BoundednessStatus::Bounded;
                method = BoundMethod::CoverabilityTree;
                coverability_nodes = Some(nodes);
                for (slot, bound) in bounds.iter_mut().zip(tree_bounds) {
                    *slot = Some(slot.map_or(bound, |current| current.min(bound)));
                }
            }
            Coverability::Unbounded {
                places: omega,
                witness: sequence,
                nodes,
            } => {
                status = BoundednessStatus::Unbounded;
                method = BoundMethod::CoverabilityTree;
                coverability_nodes = Some(nodes);
                unbounded_places = omega
                    .into_iter()
                    .map(|place| net.places[place].id.clone())
                    .collect();
                witness = Some(
                    sequence
                        .into_iter()
                        .map(|transition| net.transitions[transition].id.clone())
                        .collect(),
                );
            }
            Coverability::LimitReached { nodes } => {
                log::debug!("coverability inconclusive after {nodes} nodes");
                coverability_nodes = Some(nodes);
            }
        }
    }

    let observed_max = marking.max_tokens();
    if status == BoundednessStatus::Unknown {
        unbounded_places = net
            .places
            .iter()
            .filter(|place| place.tokens > options.max_bound)
            .map(|place| place.id.clone())
            .collect();
        if !unbounded_places.is_empty() {
            status = BoundednessStatus::Unbounded;
        }
    }

    let bound_level = match (status, method) {
        (BoundednessStatus::Unbounded, BoundMethod::CoverabilityTree) => None,
        (_, BoundMethod::MarkingHeuristic) => Some(observed_max),
        _ => bounds.iter().copied().collect::<Option<Vec<_>>>().and_then(|all| all.into_iter().max()),
    };

    let overflow_threshold = options.max_bound as f64 * 0.8;
    let overflow_places = net
        .places
        .iter()
        .filter(|place| place.tokens as f64 > overflow_threshold)
        .map(|place| place.id.clone())
        .collect::<Vec<_>>();

    let capacity_violations = net
        .places
        .iter()
        .filter_map(|place| {
            place.capacity.and_then(|capacity| {
                (place.tokens > capacity).then(|| CapacityViolation {
                    place: place.id.clone(),
                    tokens: place.tokens,
                    capacity,
                })
            })
        })
        .collect();

    let place_bounds = net
        .places
        .iter_enumerated()
        .map(|(id, place)| PlaceBound {
            place: place.id.clone(),
            name: place.name.clone(),
            tokens: place.tokens,
            bound: if unbounded_places.contains(&place.id) {
                None
            } else {
                bounds[id.index()]
            },
            capacity: place.capacity,
        })
        .collect();

    Ok(BoundednessReport {
        is_bounded: match status {
            BoundednessStatus::Bounded => Some(true),
            BoundednessStatus::Unbounded => Some(false),
            BoundednessStatus::Unknown => None,
        },
        status,
        method,
        bound_level,
        is_conservative,
        place_bounds,
        unbounded_places,
        witness,
        coverability_nodes,
        max_bound: options.max_bound,
        overflow_risk: !overflow_places.is_empty(),
        overflow_places,
        capacity_violations,
        invariant_error,
    })
}
