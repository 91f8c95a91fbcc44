//! 公平性分析：冲突库所、饥饿风险与优先级违例.
//!
//! 一个库所有多于一个消费迁移即构成冲突。饥饿风险同时随冲突规模与 token 短缺程度增长：
//!
//! ```text
//! risk = 0.5 · (n - 1) / n + 0.5 · (1 - min(1, tokens / demand))
//! ```
//!
//! 其中 `n` 为消费者数，`demand` 为所有消费弧的权重和。
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::analysis::{
    AnalysisError, AnalysisResult, Analyzer, AnalyzerCore, analyzer_constructors,
};
use crate::net::{Idx, Net, TransitionId, Weight};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FairnessOptions {
    /// Risk at or above this is high.
    pub high_risk: f64,
    /// Risk at or above this is medium.
    pub medium_risk: f64,
    pub check_priorities: bool,
}

impl Default for FairnessOptions {
    fn default() -> Self {
        Self {
            high_risk: 0.7,
            medium_risk: 0.4,
            check_priorities: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FairnessLevel {
    Strong,
    Weak,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictSet {
    pub place: String,
    pub name: String,
    pub transitions: Vec<String>,
    pub tokens: Weight,
    pub demand: Weight,
    pub risk: f64,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityViolation {
    pub place: String,
    /// Priority per conflicting transition; `None` when unset.
    pub priorities: IndexMap<String, Option<i64>>,
    pub favored: Vec<String>,
    pub disadvantaged: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FairnessReport {
    pub level: FairnessLevel,
    pub conflicts: Vec<ConflictSet>,
    pub conflict_count: usize,
    pub high_risk_count: usize,
    pub priority_violations: Vec<PriorityViolation>,
    pub starving_transitions: Vec<String>,
}

impl FairnessReport {
    pub fn conflicts_involving(&self, transition: &str) -> Vec<&ConflictSet> {
        self.conflicts
            .iter()
            .filter(|conflict| conflict.transitions.iter().any(|t| t == transition))
            .collect()
    }
}

pub struct FairnessAnalyzer {
    core: AnalyzerCore,
}

analyzer_constructors!(FairnessAnalyzer);

impl Analyzer for FairnessAnalyzer {
    type Options = FairnessOptions;
    const NAME: &'static str = "fairness";

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
        let report = assess_fairness(self.net(), options)?;
        for violation in &report.priority_violations {
            result.warn(format!(
                "priority violation at {}: {} favored over {}",
                violation.place,
                violation.favored.join(", "),
                violation.disadvantaged.join(", ")
            ));
        }
        result.summary = format!(
            "fairness {:?}: {} conflict(s), {} high-risk, {} starving transition(s)",
            report.level,
            report.conflict_count,
            report.high_risk_count,
            report.starving_transitions.len()
        );
        result.set_report(&report)
    }
}

pub fn starvation_risk(consumers: usize, tokens: Weight, demand: Weight) -> f64 {
    if consumers == 0 {
        return 0.0;
    }
    let size = (consumers - 1) as f64 / consumers as f64;
    let supplied = if demand == 0 {
        1.0
    } else {
        (tokens as f64 / demand as f64).min(1.0)
    };
    0.5 * size + 0.5 * (1.0 - supplied)
}

pub fn assess_fairness(
    net: &Net,
    options: &FairnessOptions,
) -> Result<FairnessReport, AnalysisError> {
    if !(0.0..=1.0).contains(&options.medium_risk)
        || !(0.0..=1.0).contains(&options.high_risk)
        || options.medium_risk > options.high_risk
    {
        return Err(AnalysisError::InvalidOption(format!(
            "risk thresholds must satisfy 0 <= medium ({}) <= high ({}) <= 1",
            options.medium_risk, options.high_risk
        )));
    }

    let mut conflicts = Vec::new();
    let mut priority_violations = Vec::new();
    let mut starving: Vec<TransitionId> = Vec::new();

    for (place_id, place) in net.places.iter_enumerated() {
        let consumers = net.place_postset(place_id);
        if consumers.len() < 2 {
            continue;
        }
        let demand = consumers
            .iter()
            .map(|transition| *net.pre.get(place_id, *transition))
            .sum::<Weight>();
        let risk = starvation_risk(consumers.len(), place.tokens, demand);
        let risk_level = if risk >= options.high_risk {
            RiskLevel::High
        } else if risk >= options.medium_risk {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };
        log::debug!(
            "conflict at {}: {} consumers, risk {:.2}",
            place.id,
            consumers.len(),
            risk
        );

        let priorities = consumers
            .iter()
            .map(|transition| net.transitions[*transition].priority)
            .collect::<Vec<_>>();
        let differing = priorities.iter().any(|priority| *priority != priorities[0]);
        let favored_priority = priorities.iter().flatten().max().copied();
        let disadvantaged = consumers
            .iter()
            .zip(priorities.iter())
            .filter(|(_, priority)| **priority != favored_priority)
            .map(|(transition, _)| *transition)
            .collect::<Vec<_>>();

        if options.check_priorities && differing {
            priority_violations.push(PriorityViolation {
                place: place.id.clone(),
                priorities: consumers
                    .iter()
                    .zip(priorities.iter())
                    .map(|(transition, priority)| {
                        (net.transitions[*transition].id.clone(), *priority)
                    })
                    .collect(),
                favored: consumers
                    .iter()
                    .filter(|transition| !disadvantaged.contains(transition))
                    .map(|transition| net.transitions[*transition].id.clone())
                    .collect(),
                disadvantaged: transition_ids(net, &disadvantaged),
            });
            starving.extend(disadvantaged.iter().copied());
        }
        if risk_level == RiskLevel::High {
            if options.check_priorities && differing {
                starving.extend(disadvantaged.iter().copied());
            } else {
                starving.extend(consumers.iter().copied());
            }
        }

        conflicts.push(ConflictSet {
            place: place.id.clone(),
            name: place.name.clone(),
            transitions: transition_ids(net, &consumers),
            tokens: place.tokens,
            demand,
            risk,
            risk_level,
        });
    }

    starving.sort_by_key(|transition| transition.index());
    starving.dedup();

    let high_risk_count = conflicts
        .iter()
        .filter(|conflict| conflict.risk_level == RiskLevel::High)
        .count();
    let level = if conflicts.is_empty() {
        FairnessLevel::Strong
    } else if high_risk_count > 0 {
        FairnessLevel::None
    } else {
        FairnessLevel::Weak
    };

    Ok(FairnessReport {
        level,
        conflict_count: conflicts.len(),
        high_risk_count,
        conflicts,
        priority_violations,
        starving_transitions: transition_ids(net, &starving),
    })
}

fn transition_ids(net: &Net, transitions: &[TransitionId]) -> Vec<String> {
    transitions
        .iter()
        .map(|transition| net.transitions[*transition].id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SimpleModel;

    fn assess(model: &SimpleModel) -> (AnalysisResult, FairnessReport) {
        let result = FairnessAnalyzer::new(model)
            .unwrap()
            .analyze(&FairnessOptions::default());
        assert!(result.success, "{:?}", result.errors);
        let report = result.report().unwrap();
        (result, report)
    }

    fn choice(tokens: u64) -> SimpleModel {
        SimpleModel::new()
            .place("shared", tokens)
            .transition("left")
            .transition("right")
            .arc("shared", "left", 1)
            .arc("shared", "right", 1)
    }

    #[test]
    fn net_without_conflicts_is_strongly_fair() {
        let (_, report) = assess(
            &SimpleModel::new()
                .place("P1", 1)
                .transition("T1")
                .arc("P1", "T1", 1),
        );
        assert_eq!(report.level, FairnessLevel::Strong);
        assert!(report.conflicts.is_empty());
    }

    #[test]
    fn well_supplied_conflict_is_weak() {
        let (_, report) = assess(&choice(2));
        assert_eq!(report.level, FairnessLevel::Weak);
        assert_eq!(report.conflicts[0].demand, 2);
        assert_eq!(report.conflicts[0].risk_level, RiskLevel::Low);
        assert!(report.starving_transitions.is_empty());
    }

    #[test]
    fn empty_conflict_place_starves_everyone() {
        let (_, report) = assess(&choice(0));
        assert_eq!(report.level, FairnessLevel::None);
        assert!((report.conflicts[0].risk - 0.75).abs() < 1e-9);
        assert_eq!(
            report.starving_transitions,
            vec!["left".to_string(), "right".to_string()]
        );
        assert_eq!(report.conflicts_involving("left").len(), 1);
    }

    #[test]
    fn differing_priorities_are_violations() {
        let model = SimpleModel::new()
            .place("shared", 2)
            .prioritized_transition("hi", 5)
            .prioritized_transition("lo", 1)
            .arc("shared", "hi", 1)
            .arc("shared", "lo", 1);
        let (result, report) = assess(&model);
        assert_eq!(result.warnings.len(), 1);
        let violation = &report.priority_violations[0];
        assert_eq!(violation.favored, vec!["hi".to_string()]);
        assert_eq!(violation.disadvantaged, vec!["lo".to_string()]);
        assert_eq!(report.starving_transitions, vec!["lo".to_string()]);
    }

    #[test]
    fn risk_grows_with_conflict_size_and_scarcity() {
        assert!(starvation_risk(2, 0, 2) > starvation_risk(2, 1, 2));
        assert!(starvation_risk(5, 1, 5) > starvation_risk(2, 1, 2));
        assert_eq!(starvation_risk(0, 0, 0), 0.0);
    }
}
