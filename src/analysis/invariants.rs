//! P-/T-不变量分析.
//!
//! P-不变量 `y ≥ 0, Cᵗ·y = 0` 表示守恒律（加权 token 和恒定），
//! T-不变量 `x ≥ 0, C·x = 0` 表示可复现的发生循环。
//! 候选来自两处，合并后统一在整数域复核：
//! 1. 零空间基（[`nullspace`](crate::analysis::nullspace)）在 `[-k, k]` 内的整数组合，
//!    正负两个方向都检查；
//! 2. Farkas 消元（Martínez–Silva）：逐个约束消去残差，只保留支撑集极小的行。
//!    行数不超过 `FARKAS_ROW_BUDGET` 时结果就是全部极小支撑半流，超出则只用第 1 类候选并给出警告。
use indexmap::IndexMap;
use itertools::Itertools;
use num::integer::gcd;
use serde::{Deserialize, Serialize};

use crate::analysis::nullspace::{
    exact_null_space_basis, in_null_space, integerize, normalize, null_space_basis,
};
use crate::analysis::{
    AnalysisError, AnalysisResult, Analyzer, AnalyzerCore, analyzer_constructors,
};
use crate::net::{Idx, Net, PlaceId};

/// Up to this basis dimension every coefficient tuple is tried.
const EXHAUSTIVE_DIMENSION: usize = 6;
/// Upper bound on coefficient tuples tried exhaustively.
const COMBINATION_BUDGET: usize = 50_000;
/// Upper bound on intermediate rows kept by the Farkas elimination.
const FARKAS_ROW_BUDGET: usize = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvariantKind {
    #[default]
    Place,
    Transition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InvariantOptions {
    pub kind: InvariantKind,
    /// 最少非零分量数 (≥ 1)
    pub min_support: usize,
    pub max_invariants: usize,
    /// 是否按 GCD 归约组合结果
    pub normalize: bool,
    /// 只保留支撑集极小的不变量
    pub minimal_support: bool,
    /// 基向量组合搜索的系数范围 `[-k, k]`
    pub max_coefficient: i64,
}

impl Default for InvariantOptions {
    fn default() -> Self {
        Self {
            kind: InvariantKind::Place,
            min_support: 1,
            max_invariants: 100,
            normalize: true,
            minimal_support: true,
            max_coefficient: 2,
        }
    }
}

impl InvariantOptions {
    pub fn place() -> Self {
        Self::default()
    }

    pub fn transition() -> Self {
        Self {
            kind: InvariantKind::Transition,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invariant {
    /// 支撑集元素的外部标识
    pub elements: Vec<String>,
    pub names: Vec<String>,
    pub weights: IndexMap<String, u64>,
    /// 完整向量，按网中库所（或迁移）顺序
    pub vector: Vec<u64>,
    pub support: usize,
    pub expression: String,
    /// P-不变量在当前标识下守恒的加权和
    pub conserved_value: Option<u64>,
}

impl Invariant {
    pub fn contains(&self, id: &str) -> bool {
        self.weights.contains_key(id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidenceSnapshot {
    pub places: Vec<String>,
    pub transitions: Vec<String>,
    pub values: Vec<Vec<i64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvariantReport {
    pub kind: InvariantKind,
    pub invariants: Vec<Invariant>,
    pub count: usize,
    pub null_space_dimension: usize,
    pub coverage: f64,
    pub covered: Vec<String>,
    pub uncovered: Vec<String>,
    /// P: 网是守恒的; T: 网是一致的（存在覆盖全部迁移的正不变量）
    pub fully_covered: bool,
    pub truncated: bool,
    /// The floating-point basis failed exact verification and was recomputed over the rationals.
    pub exact_fallback: bool,
    /// The Farkas elimination finished, so every minimal-support invariant was found.
    pub search_complete: bool,
    pub incidence: IncidenceSnapshot,
}

impl InvariantReport {
    pub fn containing(&self, id: &str) -> Vec<&Invariant> {
        self.invariants
            .iter()
            .filter(|invariant| invariant.contains(id))
            .collect()
    }
}

pub struct InvariantAnalyzer {
    core: AnalyzerCore,
}

analyzer_constructors!(InvariantAnalyzer);

impl Analyzer for InvariantAnalyzer {
    type Options = InvariantOptions;
    const NAME: &'static str = "invariants";

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
        let report = compute_invariants(self.net(), options)?;
        let label = match report.kind {
            InvariantKind::Place => "P",
            InvariantKind::Transition => "T",
        };

        if report.truncated {
            result.warn(format!(
                "{label}-invariant list truncated to {} entries",
                options.max_invariants
            ));
        }
        if !report.search_complete {
            result.warn(format!(
                "{label}-invariant elimination stopped at {FARKAS_ROW_BUDGET} rows or 64-bit range, list may be incomplete"
            ));
        }
        if report.coverage < 0.5 {
            result.warn(format!(
                "low {label}-invariant coverage: {:.0}% of elements appear in an invariant",
                report.coverage * 100.0
            ));
        }

        result.summary = format!(
            "{} {label}-invariant(s), coverage {:.0}%{}",
            report.count,
            report.coverage * 100.0,
            match (report.kind, report.fully_covered) {
                (InvariantKind::Place, true) => ", net is conservative",
                (InvariantKind::Transition, true) => ", net is consistent",
                _ => "",
            }
        );
        result.set_report(&report)
    }
}

/// Computes P- or T-invariants of `net`. Shared with the behavioral analyzers.
pub fn compute_invariants(
    net: &Net,
    options: &InvariantOptions,
) -> Result<InvariantReport, AnalysisError> {
    if options.min_support == 0 {
        return Err(AnalysisError::InvalidOption(
            "min_support must be at least 1".into(),
        ));
    }
    if options.max_invariants == 0 {
        return Err(AnalysisError::InvalidOption(
            "max_invariants must be at least 1".into(),
        ));
    }
    if options.max_coefficient < 1 {
        return Err(AnalysisError::InvalidOption(
            "max_coefficient must be at least 1".into(),
        ));
    }

    let c = net.c_matrix();
    // P: Cᵗ·y = 0 (|T| 行, |P| 列); T: C·x = 0 (|P| 行, |T| 列)
    let (system, width) = match options.kind {
        InvariantKind::Place => (c.to_dense_transposed(), net.places_len()),
        InvariantKind::Transition => (c.to_dense(), net.transitions_len()),
    };

    let real_basis = null_space_basis(&system, width);
    let dimension = real_basis.len();
    let float_basis = real_basis
        .iter()
        .map(|vector| integerize(vector).filter(|candidate| in_null_space(&system, candidate)))
        .collect::<Option<Vec<_>>>();
    let exact_fallback = float_basis.is_none();
    let basis = match float_basis {
        Some(basis) => basis,
        None => {
            log::debug!("floating-point basis failed exact verification, recomputing over the rationals");
            exact_null_space_basis(&system, width).ok_or_else(|| {
                AnalysisError::Numerical(format!(
                    "null-space basis of dimension {dimension} has entries beyond 64-bit range"
                ))
            })?
        }
    };

    let mut candidates = combine(&basis, options.max_coefficient, options.normalize);
    let search_complete = match farkas_semiflows(&system, width, FARKAS_ROW_BUDGET) {
        Some(semiflows) => {
            candidates.extend(semiflows);
            true
        }
        None => {
            log::debug!("Farkas elimination exceeded {FARKAS_ROW_BUDGET} rows");
            false
        }
    };
    candidates.retain(|vector| is_nonnegative(vector) && in_null_space(&system, vector));
    candidates.sort_by(|a, b| {
        support_of(a)
            .cmp(&support_of(b))
            .then_with(|| a.iter().sum::<i64>().cmp(&b.iter().sum::<i64>()))
            .then_with(|| b.cmp(a))
    });
    candidates.dedup();
    if options.minimal_support {
        candidates = keep_minimal_supports(candidates);
    }
    candidates.retain(|vector| support_of(vector) >= options.min_support);

    let truncated = candidates.len() > options.max_invariants;
    if truncated {
        candidates.truncate(options.max_invariants);
    }

    let marking = net.initial_marking();
    let keys: Vec<(String, String)> = match options.kind {
        InvariantKind::Place => net
            .places
            .iter()
            .map(|p| (p.id.clone(), p.name.clone()))
            .collect(),
        InvariantKind::Transition => net
            .transitions
            .iter()
            .map(|t| (t.id.clone(), t.name.clone()))
            .collect(),
    };

    let mut covered_flags = vec![false; width];
    let invariants = candidates
        .into_iter()
        .map(|vector| {
            let vector = vector.into_iter().map(|v| v as u64).collect::<Vec<_>>();
            let mut weights = IndexMap::new();
            let mut elements = Vec::new();
            let mut names = Vec::new();
            let mut terms = Vec::new();
            for (idx, weight) in vector.iter().enumerate() {
                if *weight == 0 {
                    continue;
                }
                covered_flags[idx] = true;
                let (id, name) = &keys[idx];
                weights.insert(id.clone(), *weight);
                elements.push(id.clone());
                names.push(name.clone());
                terms.push(if *weight == 1 {
                    name.clone()
                } else {
                    format!("{weight}*{name}")
                });
            }
            let conserved_value = match options.kind {
                InvariantKind::Place => Some(weighted_sum(&vector, marking.as_slice())),
                InvariantKind::Transition => None,
            };
            Invariant {
                support: elements.len(),
                elements,
                names,
                weights,
                expression: terms.join(" + "),
                conserved_value,
                vector,
            }
        })
        .collect::<Vec<_>>();

    let (covered, uncovered): (Vec<_>, Vec<_>) = keys
        .iter()
        .zip(covered_flags.iter())
        .partition(|(_, flag)| **flag);
    let covered = covered.into_iter().map(|((id, _), _)| id.clone()).collect::<Vec<_>>();
    let uncovered = uncovered
        .into_iter()
        .map(|((id, _), _)| id.clone())
        .collect::<Vec<_>>();
    let coverage = if width == 0 {
        0.0
    } else {
        covered.len() as f64 / width as f64
    };

    log::debug!(
        "{:?} invariants: dimension {}, {} reported, coverage {:.2}",
        options.kind,
        dimension,
        invariants.len(),
        coverage
    );

    Ok(InvariantReport {
        kind: options.kind,
        count: invariants.len(),
        invariants,
        null_space_dimension: dimension,
        coverage,
        fully_covered: width > 0 && uncovered.is_empty(),
        covered,
        uncovered,
        truncated,
        exact_fallback,
        search_complete,
        incidence: IncidenceSnapshot {
            places: net.places.iter().map(|p| p.id.clone()).collect(),
            transitions: net.transitions.iter().map(|t| t.id.clone()).collect(),
            values: c.to_dense(),
        },
    })
}

/// `Σ y[p]·M[p]`, saturating.
pub fn weighted_sum(vector: &[u64], marking: &[u64]) -> u64 {
    let total: u128 = vector
        .iter()
        .zip(marking.iter())
        .map(|(w, m)| *w as u128 * *m as u128)
        .sum();
    u64::try_from(total).unwrap_or(u64::MAX)
}

/// Maximum tokens a place can ever hold under a P-invariant `y` with `y[p] > 0`.
pub fn place_bound(invariant: &Invariant, place: PlaceId, marking: &[u64]) -> Option<u64> {
    let weight = *invariant.vector.get(place.index())?;
    if weight == 0 {
        return None;
    }
    Some(weighted_sum(&invariant.vector, marking) / weight)
}

fn support_of(vector: &[i64]) -> usize {
    vector.iter().filter(|v| **v != 0).count()
}

fn is_nonnegative(vector: &[i64]) -> bool {
    vector.iter().all(|v| *v >= 0) && vector.iter().any(|v| *v > 0)
}

fn linear_combination(basis: &[Vec<i64>], coefficients: &[i64]) -> Option<Vec<i64>> {
    let width = basis.first().map(Vec::len).unwrap_or(0);
    let mut out = Vec::with_capacity(width);
    for idx in 0..width {
        let value: i128 = basis
            .iter()
            .zip(coefficients.iter())
            .map(|(vector, coeff)| vector[idx] as i128 * *coeff as i128)
            .sum();
        out.push(i64::try_from(value).ok()?);
    }
    Some(out)
}

/// Non-negative integer combinations of the basis with coefficients in `[-k, k]`.
fn combine(basis: &[Vec<i64>], max_coefficient: i64, normalize_result: bool) -> Vec<Vec<i64>> {
    let dimension = basis.len();
    if dimension == 0 {
        return Vec::new();
    }
    let range = (2 * max_coefficient + 1) as usize;
    let exhaustive = dimension <= EXHAUSTIVE_DIMENSION
        && range
            .checked_pow(dimension as u32)
            .is_some_and(|n| n <= COMBINATION_BUDGET);

    let mut found = Vec::new();
    let mut accept = |vector: Vec<i64>| {
        let vector = if is_nonnegative(&vector) {
            vector
        } else {
            match vector.iter().map(|v| v.checked_neg()).collect::<Option<Vec<_>>>() {
                Some(negated) if is_nonnegative(&negated) => negated,
                _ => return,
            }
        };
        found.push(if normalize_result {
            normalize(vector)
        } else {
            vector
        });
    };

    if exhaustive {
        for coefficients in (0..dimension)
            .map(|_| -max_coefficient..=max_coefficient)
            .multi_cartesian_product()
        {
            // 取反的组合由 accept 检查，只需首个非零系数为正的一半
            match coefficients.iter().find(|c| **c != 0) {
                Some(first) if *first > 0 => {}
                _ => continue,
            }
            if let Some(vector) = linear_combination(basis, &coefficients) {
                accept(vector);
            }
        }
    } else {
        log::debug!("basis dimension {dimension}: restricting combination search to pairs");
        for vector in basis {
            accept(vector.clone());
        }
        for (i, j) in (0..dimension).tuple_combinations() {
            for a in 1..=max_coefficient {
                for b in (-max_coefficient..=max_coefficient).filter(|b| *b != 0) {
                    let mut coefficients = vec![0i64; dimension];
                    coefficients[i] = a;
                    coefficients[j] = b;
                    if let Some(vector) = linear_combination(basis, &coefficients) {
                        accept(vector);
                    }
                }
            }
        }
    }
    found
}

/// Semiflows `y ≥ 0, A·y = 0` by Farkas elimination over `[Aᵗ | I]`.
///
/// Each constraint is cancelled by combining every positive-residual row with every
/// negative-residual row. Rows whose support strictly contains another row's support
/// are pruned, so the final rows are exactly the minimal-support semiflows.
/// `None` once the row count exceeds `budget`.
fn farkas_semiflows(system: &[Vec<i64>], width: usize, budget: usize) -> Option<Vec<Vec<i64>>> {
    struct Row {
        residual: Vec<i128>,
        weights: Vec<i128>,
    }

    let mut rows = (0..width)
        .map(|unknown| {
            let mut weights = vec![0i128; width];
            weights[unknown] = 1;
            Row {
                residual: system
                    .iter()
                    .map(|constraint| constraint.get(unknown).copied().unwrap_or(0) as i128)
                    .collect(),
                weights,
            }
        })
        .collect::<Vec<_>>();

    for constraint in 0..system.len() {
        let (zero, nonzero): (Vec<Row>, Vec<Row>) = rows
            .into_iter()
            .partition(|row| row.residual[constraint] == 0);
        let (positive, negative): (Vec<Row>, Vec<Row>) = nonzero
            .into_iter()
            .partition(|row| row.residual[constraint] > 0);

        let mut next = zero;
        for (pos, neg) in positive.iter().cartesian_product(negative.iter()) {
            let a = -neg.residual[constraint];
            let b = pos.residual[constraint];
            let mix = |x: &[i128], y: &[i128]| {
                x.iter()
                    .zip(y.iter())
                    .map(|(x, y)| a.checked_mul(*x)?.checked_add(b.checked_mul(*y)?))
                    .collect::<Option<Vec<_>>>()
            };
            let (Some(residual), Some(weights)) = (
                mix(pos.residual.as_slice(), neg.residual.as_slice()),
                mix(pos.weights.as_slice(), neg.weights.as_slice()),
            ) else {
                log::debug!("Farkas row overflowed at constraint {constraint}");
                return None;
            };
            let divisor = weights
                .iter()
                .chain(residual.iter())
                .fold(0i128, |acc, value| gcd(acc, value.abs()));
            let divisor = divisor.max(1);
            next.push(Row {
                residual: residual.into_iter().map(|v| v / divisor).collect(),
                weights: weights.into_iter().map(|v| v / divisor).collect(),
            });
            if next.len() > budget {
                return None;
            }
        }

        next.sort_by(|x, y| x.weights.cmp(&y.weights));
        next.dedup_by(|x, y| x.weights == y.weights && x.residual == y.residual);
        let supports = next
            .iter()
            .map(|row| row.weights.iter().map(|w| *w != 0).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        let strictly_contains = |outer: &[bool], inner: &[bool]| {
            outer != inner && inner.iter().zip(outer.iter()).all(|(i, o)| !*i || *o)
        };
        rows = next
            .into_iter()
            .enumerate()
            .filter(|(idx, _)| {
                !supports
                    .iter()
                    .any(|other| strictly_contains(&supports[*idx], other))
            })
            .map(|(_, row)| row)
            .collect();
    }

    rows.into_iter()
        .map(|row| {
            row.weights
                .into_iter()
                .map(|value| i64::try_from(value).ok())
                .collect::<Option<Vec<_>>>()
        })
        .collect()
}

/// Drops every candidate whose support contains another kept candidate's support.
fn keep_minimal_supports(sorted: Vec<Vec<i64>>) -> Vec<Vec<i64>> {
    let mut kept: Vec<Vec<i64>> = Vec::new();
    for candidate in sorted {
        let dominated = kept.iter().any(|existing| {
            existing
                .iter()
                .zip(candidate.iter())
                .all(|(e, c)| *e == 0 || *c != 0)
        });
        if !dominated {
            kept.push(candidate);
        }
    }
    kept
}
