//! 迁移活性分级（保守的结构近似）.
//!
//! * L0：永远无法发生（孤立，或某输入库所结构上永远攒不够弧权所需的 token）；
//! * L1：可能发生，但某输入库所没有可发生的生产者，token 用完即止；
//! * L2：所有输入库所都可被补充，但不在任何 T-不变量的支撑集中；
//! * L3：所有输入库所都可被补充且属于某个 T-不变量，或是源迁移。
//!
//! 这里从不给出 L4：那需要完整的行为验证，结构证据不足以支撑。
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::analysis::invariants::{InvariantOptions, compute_invariants};
use crate::analysis::{
    AnalysisError, AnalysisResult, Analyzer, AnalyzerCore, analyzer_constructors,
};
use crate::net::{Idx, Net, PlaceId, TransitionId, Weight};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessOptions {
    /// Requires T-invariant membership for L3.
    pub use_t_invariants: bool,
    pub max_invariants: usize,
}

impl Default for LivenessOptions {
    fn default() -> Self {
        Self {
            use_t_invariants: true,
            max_invariants: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LivenessLevel {
    L0,
    L1,
    L2,
    L3,
    L4,
}

impl LivenessLevel {
    pub fn label(self) -> &'static str {
        match self {
            LivenessLevel::L0 => "L0",
            LivenessLevel::L1 => "L1",
            LivenessLevel::L2 => "L2",
            LivenessLevel::L3 => "L3",
            LivenessLevel::L4 => "L4",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionLiveness {
    pub transition: String,
    pub name: String,
    pub level: LivenessLevel,
    pub enabled_now: bool,
    /// Some firing sequence may enable it (level ≥ L1).
    pub live_capable: bool,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivenessReport {
    pub transitions: Vec<TransitionLiveness>,
    pub level_counts: IndexMap<String, usize>,
    pub dead_transitions: Vec<String>,
    /// Lowest level over all transitions.
    pub net_level: LivenessLevel,
    /// Every transition is at least L1.
    pub quasi_live: bool,
    /// Every transition is at least L3.
    pub structurally_live: bool,
    pub conservative: bool,
}

impl LivenessReport {
    pub fn at_least(&self, level: LivenessLevel) -> Vec<&TransitionLiveness> {
        self.transitions
            .iter()
            .filter(|entry| entry.level >= level)
            .collect()
    }

    pub fn level_of(&self, transition: &str) -> Option<LivenessLevel> {
        self.transitions
            .iter()
            .find(|entry| entry.transition == transition)
            .map(|entry| entry.level)
    }
}

pub struct LivenessAnalyzer {
    core: AnalyzerCore,
}

analyzer_constructors!(LivenessAnalyzer);

impl Analyzer for LivenessAnalyzer {
    type Options = LivenessOptions;
    const NAME: &'static str = "liveness";

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
        let report = classify_liveness(self.net(), options)?;
        if !report.dead_transitions.is_empty() {
            result.warn(format!(
                "{} dead transition(s): {}",
                report.dead_transitions.len(),
                report.dead_transitions.join(", ")
            ));
        }
        result.summary = format!(
            "net level {} ({}); {} of {} transition(s) live-capable",
            report.net_level.label(),
            if report.structurally_live {
                "structurally live"
            } else if report.quasi_live {
                "quasi-live"
            } else {
                "has dead transitions"
            },
            report.transitions.iter().filter(|t| t.live_capable).count(),
            report.transitions.len()
        );
        result.set_report(&report)
    }
}

/// 结构不动点：迁移的每条输入弧 `(p, w)` 都能被供给时才可发生，供给来自初始 token
/// 或其他可发生的生产者（迁移自身产出的 token 不算）.
struct Supply<'a> {
    net: &'a Net,
    fireable: Vec<bool>,
}

impl<'a> Supply<'a> {
    fn compute(net: &'a Net) -> Self {
        let mut supply = Self {
            net,
            fireable: vec![false; net.transitions_len()],
        };
        let mut changed = true;
        while changed {
            changed = false;
            for transition in net.transitions.indices() {
                if supply.fireable[transition.index()] {
                    continue;
                }
                let inputs = net.input_places(transition);
                if inputs.is_empty() && net.output_places(transition).is_empty() {
                    continue;
                }
                if inputs
                    .iter()
                    .all(|(place, weight)| supply.can_supply(*place, *weight, transition))
                {
                    supply.fireable[transition.index()] = true;
                    changed = true;
                }
            }
        }
        supply
    }

    fn is_fireable(&self, transition: TransitionId) -> bool {
        self.fireable[transition.index()]
    }

    fn other_producers(
        &self,
        place: PlaceId,
        transition: TransitionId,
    ) -> impl Iterator<Item = TransitionId> + '_ {
        self.net
            .place_preset(place)
            .into_iter()
            .filter(move |producer| *producer != transition && self.is_fireable(*producer))
    }

    /// 每个输入库所都有别的可发生生产者，因而可以反复发生.
    fn repeatable(&self, transition: TransitionId) -> bool {
        self.net
            .input_places(transition)
            .iter()
            .all(|(place, _)| self.other_producers(*place, transition).next().is_some())
    }

    /// `place` 能否为 `consumer` 攒够 `weight` 个 token.
    fn can_supply(&self, place: PlaceId, weight: Weight, consumer: TransitionId) -> bool {
        let tokens = self.net.places[place].tokens;
        if tokens >= weight {
            return true;
        }
        self.other_producers(place, consumer).any(|producer| {
            tokens.saturating_add(*self.net.post.get(place, producer)) >= weight
                || self.repeatable(producer)
        })
    }

    /// Consumed tokens flow back: another fireable producer exists, or the transition
    /// returns at least what it takes.
    fn replenishable(&self, place: PlaceId, transition: TransitionId) -> bool {
        self.other_producers(place, transition).next().is_some()
            || self.net.post.get(place, transition) >= self.net.pre.get(place, transition)
    }
}

/// Classifies every transition; never reports L4.
pub fn classify_liveness(
    net: &Net,
    options: &LivenessOptions,
) -> Result<LivenessReport, AnalysisError> {
    let supply = Supply::compute(net);
    let in_t_invariant = if options.use_t_invariants {
        let report = compute_invariants(
            net,
            &InvariantOptions {
                max_invariants: options.max_invariants,
                ..InvariantOptions::transition()
            },
        )?;
        net.transitions
            .iter()
            .map(|t| report.covered.contains(&t.id))
            .collect::<Vec<_>>()
    } else {
        vec![true; net.transitions_len()]
    };

    let marking = net.initial_marking();
    let transitions = net
        .transitions
        .iter_enumerated()
        .map(|(id, transition)| {
            let (level, reason) = classify_one(net, id, &supply, &in_t_invariant);
            TransitionLiveness {
                transition: transition.id.clone(),
                name: transition.name.clone(),
                level,
                enabled_now: net.is_transition_enabled(id, &marking),
                live_capable: level >= LivenessLevel::L1,
                reason,
            }
        })
        .collect::<Vec<_>>();

    let mut level_counts = [
        LivenessLevel::L0,
        LivenessLevel::L1,
        LivenessLevel::L2,
        LivenessLevel::L3,
        LivenessLevel::L4,
    ]
    .iter()
    .map(|level| (level.label().to_string(), 0))
    .collect::<IndexMap<String, usize>>();
    for entry in &transitions {
        if let Some(count) = level_counts.get_mut(entry.level.label()) {
            *count += 1;
        }
    }

    let net_level = transitions
        .iter()
        .map(|entry| entry.level)
        .min()
        .unwrap_or(LivenessLevel::L0);

    Ok(LivenessReport {
        dead_transitions: transitions
            .iter()
            .filter(|entry| entry.level == LivenessLevel::L0)
            .map(|entry| entry.transition.clone())
            .collect(),
        quasi_live: net_level >= LivenessLevel::L1,
        structurally_live: net_level >= LivenessLevel::L3,
        conservative: true,
        net_level,
        level_counts,
        transitions,
    })
}

fn classify_one(
    net: &Net,
    transition: TransitionId,
    supply: &Supply<'_>,
    in_t_invariant: &[bool],
) -> (LivenessLevel, String) {
    let inputs = net.input_places(transition);
    let outputs = net.output_places(transition);
    let place_id = |place: PlaceId| net.places[place].id.clone();

    if inputs.is_empty() && outputs.is_empty() {
        return (LivenessLevel::L0, "isolated transition".into());
    }
    if inputs.is_empty() {
        return (
            LivenessLevel::L3,
            "source transition, always enabled".into(),
        );
    }
    if !supply.is_fireable(transition) {
        let blocked = inputs
            .iter()
            .filter(|(place, weight)| !supply.can_supply(*place, *weight, transition))
            .map(|(place, _)| place_id(*place))
            .collect::<Vec<_>>();
        return (
            LivenessLevel::L0,
            format!(
                "input place(s) {} can never hold enough tokens",
                blocked.join(", ")
            ),
        );
    }
    let exhaustible = inputs
        .iter()
        .filter(|(place, _)| !supply.replenishable(*place, transition))
        .map(|(place, _)| place_id(*place))
        .collect::<Vec<_>>();
    if !exhaustible.is_empty() {
        return (
            LivenessLevel::L1,
            format!(
                "fires only while tokens in {} last; no producer can refill them",
                exhaustible.join(", ")
            ),
        );
    }
    if !in_t_invariant[transition.index()] {
        return (
            LivenessLevel::L2,
            "inputs can be refilled but no reproducible firing cycle contains it".into(),
        );
    }
    (
        LivenessLevel::L3,
        "inputs can be refilled and it lies on a reproducible firing cycle".into(),
    )
}
