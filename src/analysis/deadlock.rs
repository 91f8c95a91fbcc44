//! 死锁分析.
//!
//! 结构性死锁：存在空虹吸，任何发生序列都无法挽回；
//! 行为性死锁：当前标识下所有迁移均不可发生。
//! 可选地在有界可达图上搜索可达的死标识并给出发生序列。
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::analysis::reachability::{ExplorationLimits, StateGraph};
use crate::analysis::siphons::{
    DEFAULT_SIZE_GUARD, PlaceSetSearch, SiphonTrapOptions, compute_siphons_traps,
};
use crate::analysis::{
    AnalysisError, AnalysisResult, Analyzer, AnalyzerCore, analyzer_constructors,
};
use crate::net::{FireError, Net, PlaceId, TransitionId, Weight};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadlockOptions {
    pub check_siphons: bool,
    pub siphon_size_guard: usize,
    /// Bounded search for reachable dead markings; `None` skips it.
    pub explore_states: Option<usize>,
    pub explore_depth: Option<usize>,
}

impl Default for DeadlockOptions {
    fn default() -> Self {
        Self {
            check_siphons: true,
            siphon_size_guard: DEFAULT_SIZE_GUARD,
            explore_states: None,
            explore_depth: Some(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingTokens {
    pub place: String,
    pub needed: Weight,
    pub available: Weight,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisabledTransition {
    pub transition: String,
    pub name: String,
    pub missing: Vec<MissingTokens>,
    /// Inputs suffice but an output place would exceed its capacity or overflow.
    pub output_blocked: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReachableDeadlock {
    pub marking: IndexMap<String, Weight>,
    pub witness: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectivityIssues {
    pub isolated_places: Vec<String>,
    pub isolated_transitions: Vec<String>,
    pub unmarkable_places: Vec<String>,
    pub source_transitions: Vec<String>,
    pub sink_transitions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadlockReport {
    pub has_deadlock: bool,
    pub structural_deadlock: bool,
    pub behavioral_deadlock: bool,
    pub severity: Severity,
    pub empty_siphons: Vec<Vec<String>>,
    /// `false` when the size guard refused the siphon search.
    pub siphons_checked: bool,
    pub enabled_transitions: Vec<String>,
    pub disabled_transitions: Vec<DisabledTransition>,
    pub disabled_ratio: f64,
    /// `None` when not explored or when the bounded search found nothing
    /// without completing.
    pub deadlock_reachable: Option<bool>,
    pub reachable_deadlock: Option<ReachableDeadlock>,
    pub connectivity: ConnectivityIssues,
    pub suggestions: Vec<String>,
}

impl DeadlockReport {
    pub fn disabled(&self, transition: &str) -> Option<&DisabledTransition> {
        self.disabled_transitions
            .iter()
            .find(|entry| entry.transition == transition)
    }
}

pub struct DeadlockAnalyzer {
    core: AnalyzerCore,
}

analyzer_constructors!(DeadlockAnalyzer);

impl Analyzer for DeadlockAnalyzer {
    type Options = DeadlockOptions;
    const NAME: &'static str = "deadlock";

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
        let net = self.net();

        let mut empty_siphons = Vec::new();
        let mut siphons_checked = false;
        if options.check_siphons {
            let siphon_options = SiphonTrapOptions {
                kind: PlaceSetSearch::Siphons,
                size_guard: options.siphon_size_guard,
                ..Default::default()
            };
            match compute_siphons_traps(net, &siphon_options) {
                Ok(report) => {
                    siphons_checked = true;
                    if report.truncated {
                        result.warn(
                            "siphon enumeration truncated; structural check may be incomplete",
                        );
                    }
                    empty_siphons = report
                        .siphons
                        .into_iter()
                        .filter(|siphon| siphon.is_empty_now())
                        .map(|siphon| siphon.places)
                        .collect();
                }
                Err(err @ AnalysisError::SizeLimit { .. }) => {
                    result.warn(format!("structural deadlock check skipped: {err}"));
                }
                Err(err) => return Err(err),
            }
        }

        let marking = net.initial_marking();
        let mut enabled_transitions = Vec::new();
        let mut disabled_transitions = Vec::new();
        for (id, transition) in net.transitions.iter_enumerated() {
            if net.is_transition_enabled(id, &marking) {
                enabled_transitions.push(transition.id.clone());
            } else {
                disabled_transitions.push(DisabledTransition {
                    transition: transition.id.clone(),
                    name: transition.name.clone(),
                    missing: missing_tokens(net, id),
                    output_blocked: net.fire_transition(&marking, id).err().and_then(|err| {
                        (!matches!(err, FireError::NotEnabled(_))).then(|| err.to_string())
                    }),
                });
            }
        }
        let disabled_ratio = disabled_transitions.len() as f64 / net.transitions_len() as f64;
        let structural_deadlock = !empty_siphons.is_empty();
        let behavioral_deadlock = enabled_transitions.is_empty();

        let (deadlock_reachable, reachable_deadlock) = match options.explore_states {
            Some(max_states) if max_states > 0 => {
                let states = StateGraph::explore(
                    net,
                    ExplorationLimits {
                        max_states,
                        max_depth: options.explore_depth,
                    },
                );
                match states.deadlocks.first() {
                    Some(&dead) => (
                        Some(true),
                        Some(ReachableDeadlock {
                            marking: net.marking_by_id(&states.node(dead).marking),
                            witness: transition_ids(net, &states.witness(dead)),
                        }),
                    ),
                    None if states.is_complete() => (Some(false), None),
                    None => {
                        result.warn(format!(
                            "no dead marking among {} explored states; search incomplete",
                            states.state_count()
                        ));
                        (None, None)
                    }
                }
            }
            Some(_) => {
                return Err(AnalysisError::InvalidOption(
                    "explore_states must be at least 1".into(),
                ));
            }
            None => (None, None),
        };

        let severity = classify(
            structural_deadlock,
            disabled_ratio,
            deadlock_reachable == Some(true),
        );

        let diagnostics = net.diagnose_connectivity();
        let place_ids = |places: &[PlaceId]| {
            places
                .iter()
                .map(|place| net.places[*place].id.clone())
                .collect::<Vec<_>>()
        };
        let connectivity = ConnectivityIssues {
            isolated_places: place_ids(&diagnostics.isolated_places),
            isolated_transitions: transition_ids(net, &diagnostics.isolated_transitions),
            unmarkable_places: place_ids(&diagnostics.unmarkable_places),
            source_transitions: transition_ids(net, &diagnostics.source_transitions),
            sink_transitions: transition_ids(net, &diagnostics.sink_transitions),
        };

        let mut report = DeadlockReport {
            has_deadlock: structural_deadlock || behavioral_deadlock,
            structural_deadlock,
            behavioral_deadlock,
            severity,
            empty_siphons,
            siphons_checked,
            enabled_transitions,
            disabled_transitions,
            disabled_ratio,
            deadlock_reachable,
            reachable_deadlock,
            connectivity,
            suggestions: Vec::new(),
        };
        report.suggestions = suggestions(&report);

        result.summary = match (structural_deadlock, behavioral_deadlock) {
            (true, true) => "structural and behavioral deadlock".to_string(),
            (true, false) => format!(
                "structural deadlock: {} empty siphon(s)",
                report.empty_siphons.len()
            ),
            (false, true) => "behavioral deadlock: no transition is enabled".to_string(),
            (false, false) => format!(
                "no deadlock; {} of {} transition(s) disabled",
                report.disabled_transitions.len(),
                net.transitions_len()
            ),
        };
        result.set_report(&report)
    }
}

/// 结构性死锁恒为 critical；行为性按不可发生迁移的比例分级.
fn classify(structural: bool, disabled_ratio: f64, reachable: bool) -> Severity {
    let severity = if structural {
        Severity::Critical
    } else if disabled_ratio >= 1.0 {
        Severity::High
    } else if disabled_ratio >= 0.5 {
        Severity::Medium
    } else if disabled_ratio > 0.0 {
        Severity::Low
    } else {
        Severity::None
    };
    if reachable {
        severity.max(Severity::Medium)
    } else {
        severity
    }
}

fn missing_tokens(net: &Net, transition: TransitionId) -> Vec<MissingTokens> {
    net.input_places(transition)
        .into_iter()
        .filter_map(|(place, needed)| {
            let available = net.places[place].tokens;
            (available < needed).then(|| MissingTokens {
                place: net.places[place].id.clone(),
                needed,
                available,
            })
        })
        .collect()
}

fn transition_ids(net: &Net, transitions: &[TransitionId]) -> Vec<String> {
    transitions
        .iter()
        .map(|transition| net.transitions[*transition].id.clone())
        .collect()
}

fn suggestions(report: &DeadlockReport) -> Vec<String> {
    let mut suggestions = Vec::new();
    for siphon in &report.empty_siphons {
        suggestions.push(format!(
            "redesign: siphon {{{}}} is empty and can never be refilled; add a producing transition or mark it initially",
            siphon.join(", ")
        ));
    }
    if report.behavioral_deadlock {
        for entry in &report.disabled_transitions {
            for missing in &entry.missing {
                suggestions.push(format!(
                    "add tokens: {} needs {} token(s) in {} (has {})",
                    entry.transition, missing.needed, missing.place, missing.available
                ));
            }
            if let Some(blocked) = &entry.output_blocked {
                suggestions.push(format!(
                    "raise capacity or drain outputs: {} is blocked ({blocked})",
                    entry.transition
                ));
            }
        }
    }
    if let Some(dead) = &report.reachable_deadlock {
        suggestions.push(format!(
            "firing sequence [{}] reaches a dead marking; guard it or add a recovery transition",
            dead.witness.join(", ")
        ));
    }
    for place in &report.connectivity.isolated_places {
        suggestions.push(format!("connect or remove isolated place {place}"));
    }
    for transition in &report.connectivity.isolated_transitions {
        suggestions.push(format!("connect or remove isolated transition {transition}"));
    }
    suggestions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SimpleModel;
    use crate::net::Idx;

    fn analyze(model: &SimpleModel, options: &DeadlockOptions) -> DeadlockReport {
        let analyzer = DeadlockAnalyzer::new(model).unwrap();
        let result = analyzer.analyze(options);
        assert!(result.success, "{:?}", result.errors);
        result.report().unwrap()
    }

    #[test]
    fn enabled_producer_consumer_has_no_deadlock() {
        let model = SimpleModel::new()
            .place("P1", 1)
            .place("P2", 0)
            .transition("T1")
            .arc("P1", "T1", 1)
            .arc("T1", "P2", 1);
        let report = analyze(&model, &DeadlockOptions::default());

        assert!(!report.has_deadlock);
        assert_eq!(report.severity, Severity::None);
        assert_eq!(report.enabled_transitions, vec!["T1".to_string()]);
        assert!(report.siphons_checked);
    }

    #[test]
    fn empty_input_place_is_structural_and_behavioral() {
        let model = SimpleModel::new()
            .place("P1", 0)
            .transition("T1")
            .arc("P1", "T1", 1);
        let report = analyze(&model, &DeadlockOptions::default());

        assert!(report.behavioral_deadlock);
        assert!(report.structural_deadlock);
        assert_eq!(report.severity, Severity::Critical);
        let disabled = report.disabled("T1").unwrap();
        assert_eq!(
            disabled.missing,
            vec![MissingTokens {
                place: "P1".into(),
                needed: 1,
                available: 0
            }]
        );
        assert!(report.suggestions.iter().any(|s| s.starts_with("redesign")));
        assert!(report.suggestions.iter().any(|s| s.starts_with("add tokens")));
    }

    #[test]
    fn severity_scales_with_disabled_fraction() {
        assert_eq!(classify(false, 1.0, false), Severity::High);
        assert_eq!(classify(false, 0.5, false), Severity::Medium);
        assert_eq!(classify(false, 0.25, false), Severity::Low);
        assert_eq!(classify(false, 0.0, true), Severity::Medium);
        assert_eq!(classify(true, 0.0, false), Severity::Critical);
    }

    #[test]
    fn exploration_finds_reachable_dead_marking() {
        let model = SimpleModel::new()
            .place("P1", 1)
            .place("P2", 0)
            .transition("T1")
            .arc("P1", "T1", 1)
            .arc("T1", "P2", 1);
        let report = analyze(
            &model,
            &DeadlockOptions {
                explore_states: Some(100),
                ..Default::default()
            },
        );
        assert_eq!(report.deadlock_reachable, Some(true));
        let dead = report.reachable_deadlock.unwrap();
        assert_eq!(dead.witness, vec!["T1".to_string()]);
        assert_eq!(dead.marking["P2"], 1);
        assert!(!report.has_deadlock);
        assert_eq!(report.severity, Severity::Medium);
    }

    #[test]
    fn full_output_place_blocks_transition() {
        let model = SimpleModel::new()
            .place("P1", 1)
            .place("P2", 1)
            .transition("T1")
            .arc("P1", "T1", 1)
            .arc("T1", "P2", 1);
        let mut net = Net::from_model(&model).unwrap();
        net.places[PlaceId::from_usize(1)].capacity = Some(1);
        let result = DeadlockAnalyzer::from_net(net).analyze(&DeadlockOptions::default());
        assert!(result.success, "{:?}", result.errors);
        let report: DeadlockReport = result.report().unwrap();

        assert!(report.behavioral_deadlock);
        let disabled = report.disabled("T1").unwrap();
        assert!(disabled.missing.is_empty());
        assert!(disabled.output_blocked.is_some());
        assert!(report.suggestions.iter().any(|s| s.starts_with("raise capacity")));
    }

    #[test]
    fn size_guard_downgrades_to_warning() {
        let mut model = SimpleModel::new().transition("T").place("hub", 1).arc("hub", "T", 1);
        for idx in 0..25 {
            model = model.place(&format!("P{idx}"), 1).arc("T", &format!("P{idx}"), 1);
        }
        let analyzer = DeadlockAnalyzer::new(&model).unwrap();
        let result = analyzer.analyze(&DeadlockOptions::default());

        assert!(result.success);
        assert_eq!(result.warnings.len(), 1);
        let report: DeadlockReport = result.report().unwrap();
        assert!(!report.siphons_checked);
        assert!(!report.structural_deadlock);
    }
}
