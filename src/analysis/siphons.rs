//! 极小虹吸 (siphon) 与陷阱 (trap) 枚举.
//!
//! * 虹吸 `S`：`•S ⊆ S•`，一旦清空便永远无法重新获得 token；
//! * 陷阱 `Q`：`Q• ⊆ •Q`，一旦被标记便永远不会清空。
//!
//! 搜索按子集大小递增穷举（`O(2ⁿ)`），已找到集合的超集直接跳过，因此结果天然极小。
//! 库所数超过 `size_guard` 时在开始之前直接拒绝，不做任何部分计算。
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::analysis::{
    AnalysisError, AnalysisResult, Analyzer, AnalyzerCore, analyzer_constructors,
};
use crate::net::{Idx, Net, PlaceId, TransitionId};

/// Place subsets are bit masks, so no guard can exceed this.
pub const HARD_SIZE_LIMIT: usize = 64;
pub const DEFAULT_SIZE_GUARD: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceSetSearch {
    Siphons,
    Traps,
    #[default]
    Both,
}

impl PlaceSetSearch {
    fn siphons(self) -> bool {
        matches!(self, PlaceSetSearch::Siphons | PlaceSetSearch::Both)
    }

    fn traps(self) -> bool {
        matches!(self, PlaceSetSearch::Traps | PlaceSetSearch::Both)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Criticality {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiphonTrapOptions {
    pub kind: PlaceSetSearch,
    pub min_size: usize,
    /// `None` searches up to the full place count.
    pub max_size: Option<usize>,
    /// Per kind; `None` keeps every minimal set.
    pub max_results: Option<usize>,
    pub check_marking: bool,
    pub size_guard: usize,
}

impl Default for SiphonTrapOptions {
    fn default() -> Self {
        Self {
            kind: PlaceSetSearch::Both,
            min_size: 1,
            max_size: None,
            max_results: Some(1000),
            check_marking: true,
            size_guard: DEFAULT_SIZE_GUARD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceSet {
    pub places: Vec<String>,
    pub names: Vec<String>,
    pub size: usize,
    pub preset: Vec<String>,
    pub postset: Vec<String>,
    /// `None` when marking was not checked.
    pub tokens: Option<u64>,
    pub marked: Option<bool>,
    /// Siphons only: whether the largest trap inside it is marked.
    pub contains_marked_trap: Option<bool>,
    pub criticality: Criticality,
}

impl PlaceSet {
    pub fn contains(&self, id: &str) -> bool {
        self.places.iter().any(|place| place == id)
    }

    pub fn is_empty_now(&self) -> bool {
        self.marked == Some(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiphonTrapReport {
    pub siphons: Vec<PlaceSet>,
    pub traps: Vec<PlaceSet>,
    pub siphon_count: usize,
    pub trap_count: usize,
    pub empty_siphon_count: usize,
    pub marked_trap_count: usize,
    pub truncated: bool,
    pub largest_size_searched: usize,
}

impl SiphonTrapReport {
    pub fn siphons_containing(&self, id: &str) -> Vec<&PlaceSet> {
        self.siphons.iter().filter(|set| set.contains(id)).collect()
    }

    pub fn traps_containing(&self, id: &str) -> Vec<&PlaceSet> {
        self.traps.iter().filter(|set| set.contains(id)).collect()
    }

    pub fn empty_siphons(&self) -> Vec<&PlaceSet> {
        self.siphons.iter().filter(|set| set.is_empty_now()).collect()
    }

    pub fn has_empty_siphon(&self) -> bool {
        self.empty_siphon_count > 0
    }
}

pub struct SiphonTrapAnalyzer {
    core: AnalyzerCore,
}

analyzer_constructors!(SiphonTrapAnalyzer);

impl Analyzer for SiphonTrapAnalyzer {
    type Options = SiphonTrapOptions;
    const NAME: &'static str = "siphons_traps";

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
        let report = compute_siphons_traps(self.net(), options)?;
        if report.truncated {
            result.warn(format!(
                "place-set enumeration stopped after {} results per kind",
                options.max_results.unwrap_or_default()
            ));
        }
        let mut summary = Vec::new();
        if options.kind.siphons() {
            summary.push(format!(
                "{} minimal siphon(s), {} currently empty",
                report.siphon_count, report.empty_siphon_count
            ));
        }
        if options.kind.traps() {
            summary.push(format!(
                "{} minimal trap(s), {} currently marked",
                report.trap_count, report.marked_trap_count
            ));
        }
        result.summary = summary.join("; ");
        result.set_report(&report)
    }
}

/// 变迁集合位图
#[derive(Clone, PartialEq, Eq)]
struct TransitionBits(Vec<u64>);

impl TransitionBits {
    fn empty(transitions: usize) -> Self {
        Self(vec![0; transitions.div_ceil(64).max(1)])
    }

    fn from_ids(transitions: usize, ids: &[TransitionId]) -> Self {
        let mut bits = Self::empty(transitions);
        for id in ids {
            bits.0[id.index() / 64] |= 1 << (id.index() % 64);
        }
        bits
    }

    fn clear(&mut self) {
        self.0.iter_mut().for_each(|word| *word = 0);
    }

    fn union_with(&mut self, other: &Self) {
        for (word, other) in self.0.iter_mut().zip(other.0.iter()) {
            *word |= *other;
        }
    }

    fn is_subset_of(&self, other: &Self) -> bool {
        self.0
            .iter()
            .zip(other.0.iter())
            .all(|(word, other)| word & !other == 0)
    }
}

struct PlaceSetSearcher<'a> {
    net: &'a Net,
    presets: Vec<TransitionBits>,
    postsets: Vec<TransitionBits>,
}

impl<'a> PlaceSetSearcher<'a> {
    fn new(net: &'a Net) -> Self {
        let transitions = net.transitions_len();
        let presets = net
            .places
            .indices()
            .map(|place| TransitionBits::from_ids(transitions, &net.place_preset(place)))
            .collect();
        let postsets = net
            .places
            .indices()
            .map(|place| TransitionBits::from_ids(transitions, &net.place_postset(place)))
            .collect();
        Self {
            net,
            presets,
            postsets,
        }
    }

    fn union_into(&self, sets: &[TransitionBits], mask: u64, out: &mut TransitionBits) {
        out.clear();
        for idx in members(mask) {
            out.union_with(&sets[idx]);
        }
    }

    /// 在集合 `mask` 内求最大陷阱：反复删去存在 `t ∈ p•` 且 `t ∉ •Q` 的库所.
    fn max_trap_within(&self, mask: u64) -> u64 {
        let mut current = mask;
        let mut preset = TransitionBits::empty(self.net.transitions_len());
        loop {
            self.union_into(&self.presets, current, &mut preset);
            let violators = members(current)
                .filter(|idx| !self.postsets[*idx].is_subset_of(&preset))
                .fold(0u64, |acc, idx| acc | (1 << idx));
            if violators == 0 {
                return current;
            }
            current &= !violators;
        }
    }
}

fn members(mask: u64) -> impl Iterator<Item = usize> {
    (0..HARD_SIZE_LIMIT).filter(move |idx| mask & (1u64 << idx) != 0)
}

/// Enumerates minimal siphons and/or traps. Fails fast above the size guard.
pub fn compute_siphons_traps(
    net: &Net,
    options: &SiphonTrapOptions,
) -> Result<SiphonTrapReport, AnalysisError> {
    let limit = options.size_guard.min(HARD_SIZE_LIMIT);
    let places = net.places_len();
    if places > limit {
        log::warn!("refusing siphon/trap search: {places} places exceeds guard {limit}");
        return Err(AnalysisError::SizeLimit { places, limit });
    }
    if options.max_results == Some(0) {
        return Err(AnalysisError::InvalidOption(
            "max_results must be at least 1".into(),
        ));
    }

    let searcher = PlaceSetSearcher::new(net);
    let transitions = net.transitions_len();
    let min_size = options.min_size.max(1);
    let max_size = options.max_size.unwrap_or(places).min(places);

    let mut siphon_masks: Vec<u64> = Vec::new();
    let mut trap_masks: Vec<u64> = Vec::new();
    let mut want_siphons = options.kind.siphons();
    let mut want_traps = options.kind.traps();
    let mut truncated = false;
    let mut largest = 0;
    let cap = options.max_results.unwrap_or(usize::MAX);

    let mut preset = TransitionBits::empty(transitions);
    let mut postset = TransitionBits::empty(transitions);

    'sizes: for size in min_size..=max_size {
        largest = size;
        for combo in (0..places).combinations(size) {
            if !want_siphons && !want_traps {
                break 'sizes;
            }
            let mask = combo.iter().fold(0u64, |acc, idx| acc | (1 << idx));
            let siphon_candidate =
                want_siphons && !siphon_masks.iter().any(|found| found & mask == *found);
            let trap_candidate =
                want_traps && !trap_masks.iter().any(|found| found & mask == *found);
            if !siphon_candidate && !trap_candidate {
                continue;
            }

            searcher.union_into(&searcher.presets, mask, &mut preset);
            searcher.union_into(&searcher.postsets, mask, &mut postset);

            // 达到上限后再找到一个才算截断
            if siphon_candidate && preset.is_subset_of(&postset) {
                if siphon_masks.len() < cap {
                    siphon_masks.push(mask);
                } else {
                    want_siphons = false;
                    truncated = true;
                }
            }
            if trap_candidate && postset.is_subset_of(&preset) {
                if trap_masks.len() < cap {
                    trap_masks.push(mask);
                } else {
                    want_traps = false;
                    truncated = true;
                }
            }
        }
        log::debug!(
            "place sets of size {size}: {} siphons, {} traps so far",
            siphon_masks.len(),
            trap_masks.len()
        );
    }

    let marking = net.initial_marking();
    let tokens_of = |mask: u64| members(mask).map(|idx| marking.as_slice()[idx]).sum::<u64>();

    let describe = |mask: u64| -> (Vec<String>, Vec<String>, Vec<String>, Vec<String>) {
        let mut places = Vec::new();
        let mut names = Vec::new();
        for idx in members(mask) {
            let place = &net.places[PlaceId::from_usize(idx)];
            places.push(place.id.clone());
            names.push(place.name.clone());
        }
        let mut pre = TransitionBits::empty(transitions);
        let mut post = TransitionBits::empty(transitions);
        searcher.union_into(&searcher.presets, mask, &mut pre);
        searcher.union_into(&searcher.postsets, mask, &mut post);
        (places, names, transition_ids(net, &pre), transition_ids(net, &post))
    };

    let siphons = siphon_masks
        .iter()
        .map(|&mask| {
            let (places, names, preset, postset) = describe(mask);
            let size = places.len();
            let (tokens, marked, contains_marked_trap) = if options.check_marking {
                let tokens = tokens_of(mask);
                let trap = searcher.max_trap_within(mask);
                let trap_marked = trap != 0 && tokens_of(trap) > 0;
                (Some(tokens), Some(tokens > 0), Some(trap_marked))
            } else {
                (None, None, None)
            };
            PlaceSet {
                criticality: siphon_criticality(size, tokens, contains_marked_trap),
                places,
                names,
                size,
                preset,
                postset,
                tokens,
                marked,
                contains_marked_trap,
            }
        })
        .collect::<Vec<_>>();

    let traps = trap_masks
        .iter()
        .map(|&mask| {
            let (places, names, preset, postset) = describe(mask);
            let size = places.len();
            let tokens = options.check_marking.then(|| tokens_of(mask));
            PlaceSet {
                criticality: trap_criticality(size, tokens),
                places,
                names,
                size,
                preset,
                postset,
                tokens,
                marked: tokens.map(|t| t > 0),
                contains_marked_trap: None,
            }
        })
        .collect::<Vec<_>>();

    Ok(SiphonTrapReport {
        siphon_count: siphons.len(),
        trap_count: traps.len(),
        empty_siphon_count: siphons.iter().filter(|s| s.is_empty_now()).count(),
        marked_trap_count: traps.iter().filter(|t| t.marked == Some(true)).count(),
        siphons,
        traps,
        truncated,
        largest_size_searched: largest,
    })
}

fn transition_ids(net: &Net, bits: &TransitionBits) -> Vec<String> {
    net.transitions
        .iter_enumerated()
        .filter(|(id, _)| bits.0[id.index() / 64] & (1 << (id.index() % 64)) != 0)
        .map(|(_, transition)| transition.id.clone())
        .collect()
}

/// 空虹吸必然导致其后集迁移永久死亡.
fn siphon_criticality(
    size: usize,
    tokens: Option<u64>,
    contains_marked_trap: Option<bool>,
) -> Criticality {
    match (tokens, contains_marked_trap) {
        (Some(0), _) => Criticality::Critical,
        (Some(_), Some(true)) => Criticality::Low,
        (Some(1), _) => Criticality::High,
        (Some(t), _) if t <= size as u64 => Criticality::Medium,
        (Some(_), _) => Criticality::Low,
        (None, _) if size == 1 => Criticality::High,
        (None, _) => Criticality::Medium,
    }
}

/// 被标记的陷阱永远无法清空，规模与 token 数越大，积压风险越高.
fn trap_criticality(size: usize, tokens: Option<u64>) -> Criticality {
    match tokens {
        None | Some(0) => Criticality::Low,
        Some(t) if t >= 10 || size >= 5 => Criticality::High,
        Some(t) if t >= 3 || size >= 3 => Criticality::Medium,
        Some(_) => Criticality::Low,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SimpleModel;

    fn analyze(model: &SimpleModel, options: &SiphonTrapOptions) -> (AnalysisResult, SiphonTrapReport) {
        let analyzer = SiphonTrapAnalyzer::new(model).unwrap();
        let result = analyzer.analyze(options);
        assert!(result.success, "{:?}", result.errors);
        let report = result.report().unwrap();
        (result, report)
    }

    #[test]
    fn unmarked_source_place_is_critical_empty_siphon() {
        let model = SimpleModel::new()
            .place("P1", 0)
            .transition("T1")
            .arc("P1", "T1", 1);
        let (_, report) = analyze(&model, &SiphonTrapOptions::default());

        assert_eq!(report.siphon_count, 1);
        let siphon = &report.siphons[0];
        assert_eq!(siphon.places, vec!["P1".to_string()]);
        assert_eq!(siphon.marked, Some(false));
        assert_eq!(siphon.criticality, Criticality::Critical);
        assert!(report.has_empty_siphon());
        assert_eq!(report.empty_siphons().len(), 1);
    }

    #[test]
    fn cycle_is_both_siphon_and_trap() {
        let model = SimpleModel::new()
            .place("a", 1)
            .place("b", 0)
            .transition("t1")
            .transition("t2")
            .arc("a", "t1", 1)
            .arc("t1", "b", 1)
            .arc("b", "t2", 1)
            .arc("t2", "a", 1);
        let (_, report) = analyze(&model, &SiphonTrapOptions::default());

        assert_eq!(report.siphon_count, 1);
        assert_eq!(report.trap_count, 1);
        assert_eq!(report.siphons[0].places, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(report.siphons[0].contains_marked_trap, Some(true));
        assert_eq!(report.siphons[0].criticality, Criticality::Low);
        assert_eq!(report.traps[0].marked, Some(true));
        assert_eq!(report.traps[0].preset, vec!["t1".to_string(), "t2".to_string()]);
    }

    #[test]
    fn results_are_minimal_and_satisfy_closure() {
        // 互斥网
        let model = SimpleModel::new()
            .place("idle1", 1)
            .place("crit1", 0)
            .place("idle2", 1)
            .place("crit2", 0)
            .place("lock", 1)
            .transition("enter1")
            .transition("leave1")
            .transition("enter2")
            .transition("leave2")
            .arc("idle1", "enter1", 1)
            .arc("lock", "enter1", 1)
            .arc("enter1", "crit1", 1)
            .arc("crit1", "leave1", 1)
            .arc("leave1", "idle1", 1)
            .arc("leave1", "lock", 1)
            .arc("idle2", "enter2", 1)
            .arc("lock", "enter2", 1)
            .arc("enter2", "crit2", 1)
            .arc("crit2", "leave2", 1)
            .arc("leave2", "idle2", 1)
            .arc("leave2", "lock", 1);
        let (_, report) = analyze(&model, &SiphonTrapOptions::default());

        let sets = report
            .siphons
            .iter()
            .map(|s| s.places.clone())
            .collect::<Vec<_>>();
        assert!(sets.contains(&vec!["idle1".to_string(), "crit1".to_string()]));
        assert!(sets.contains(&vec!["idle2".to_string(), "crit2".to_string()]));
        assert!(sets.contains(&vec![
            "crit1".to_string(),
            "crit2".to_string(),
            "lock".to_string()
        ]));
        for a in &report.siphons {
            for b in &report.siphons {
                if a != b {
                    assert!(!b.places.iter().all(|p| a.places.contains(p)));
                }
            }
        }
        assert_eq!(report.siphons_containing("lock").len(), 1);
        assert_eq!(report.empty_siphon_count, 0);
    }

    #[test]
    fn size_guard_rejects_before_searching() {
        let mut model = SimpleModel::new().transition("T");
        for idx in 0..21 {
            model = model.place(&format!("P{idx}"), 0);
        }
        let analyzer = SiphonTrapAnalyzer::new(&model).unwrap();
        let result = analyzer.analyze(&SiphonTrapOptions::default());

        assert!(!result.success);
        assert!(result.errors[0].contains("size guard"));
        assert!(result.data.is_empty());

        let relaxed = analyzer.analyze(&SiphonTrapOptions {
            size_guard: 21,
            max_size: Some(1),
            ..Default::default()
        });
        assert!(relaxed.success);
    }

    #[test]
    fn max_results_truncates_with_warning() {
        let model = SimpleModel::new()
            .place("A", 0)
            .place("B", 0)
            .place("C", 0)
            .transition("T")
            .arc("A", "T", 1)
            .arc("B", "T", 1)
            .arc("C", "T", 1);
        let (result, report) = analyze(
            &model,
            &SiphonTrapOptions {
                kind: PlaceSetSearch::Siphons,
                max_results: Some(2),
                ..Default::default()
            },
        );
        assert_eq!(report.siphon_count, 2);
        assert!(report.truncated);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(report.trap_count, 0);
    }

    #[test]
    fn result_count_equal_to_max_results_is_not_truncated() {
        let model = SimpleModel::new()
            .place("A", 0)
            .place("B", 0)
            .transition("T")
            .arc("A", "T", 1)
            .arc("B", "T", 1);
        let (result, report) = analyze(
            &model,
            &SiphonTrapOptions {
                kind: PlaceSetSearch::Siphons,
                max_results: Some(2),
                ..Default::default()
            },
        );
        assert_eq!(report.siphon_count, 2);
        assert!(!report.truncated);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn marked_traps_escalate_with_tokens() {
        assert_eq!(trap_criticality(1, Some(0)), Criticality::Low);
        assert_eq!(trap_criticality(1, Some(1)), Criticality::Low);
        assert_eq!(trap_criticality(1, Some(4)), Criticality::Medium);
        assert_eq!(trap_criticality(2, Some(12)), Criticality::High);
        assert_eq!(siphon_criticality(2, Some(0), Some(false)), Criticality::Critical);
        assert_eq!(siphon_criticality(3, Some(1), Some(false)), Criticality::High);
    }
}
