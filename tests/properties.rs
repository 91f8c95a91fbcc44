//! 随机网上的结构性质：不变量确实在零空间中且不遗漏极小支撑，虹吸/陷阱满足定义且极小.
use num::integer::gcd;
use pn_topology::{
    Analyzer, InvariantAnalyzer, InvariantOptions, InvariantReport, SimpleModel,
    SiphonTrapAnalyzer, SiphonTrapOptions, SiphonTrapReport,
};
use pn_topology::InvariantKind;
use proptest::prelude::*;

#[derive(Debug, Clone)]
struct RandomNet {
    tokens: Vec<u64>,
    /// pre[p][t]: place -> transition weight, 0 for no arc.
    pre: Vec<Vec<i64>>,
    post: Vec<Vec<i64>>,
}

impl RandomNet {
    fn places(&self) -> usize {
        self.tokens.len()
    }

    fn transitions(&self) -> usize {
        self.pre[0].len()
    }

    fn model(&self) -> SimpleModel {
        let mut model = SimpleModel::new();
        for (p, tokens) in self.tokens.iter().enumerate() {
            model = model.place(&format!("p{p}"), *tokens);
        }
        for t in 0..self.transitions() {
            model = model.transition(&format!("t{t}"));
        }
        for p in 0..self.places() {
            for t in 0..self.transitions() {
                if self.pre[p][t] > 0 {
                    model = model.arc(&format!("p{p}"), &format!("t{t}"), self.pre[p][t]);
                }
                if self.post[p][t] > 0 {
                    model = model.arc(&format!("t{t}"), &format!("p{p}"), self.post[p][t]);
                }
            }
        }
        model
    }

    fn effect(&self, p: usize, t: usize) -> i64 {
        self.post[p][t] - self.pre[p][t]
    }
}

fn random_net() -> impl Strategy<Value = RandomNet> {
    (1usize..=6, 1usize..=5).prop_flat_map(|(places, transitions)| {
        let matrix = || {
            prop::collection::vec(
                prop::collection::vec(prop_oneof![3 => Just(0i64), 2 => 1i64..=2], transitions),
                places,
            )
        };
        (prop::collection::vec(0u64..=2, places), matrix(), matrix())
            .prop_map(|(tokens, pre, post)| RandomNet { tokens, pre, post })
    })
}

/// Every non-zero semiflow with entries in `0..=3`, found by exhaustive enumeration.
fn small_semiflows(net: &RandomNet, kind: InvariantKind) -> Vec<Vec<u64>> {
    let (width, constraints) = match kind {
        InvariantKind::Place => (net.places(), net.transitions()),
        InvariantKind::Transition => (net.transitions(), net.places()),
    };
    let annihilates = |vector: &[u64]| {
        (0..constraints).all(|c| {
            (0..width)
                .map(|i| {
                    let effect = match kind {
                        InvariantKind::Place => net.effect(i, c),
                        InvariantKind::Transition => net.effect(c, i),
                    };
                    vector[i] as i64 * effect
                })
                .sum::<i64>()
                == 0
        })
    };
    (0..4u64.pow(width as u32))
        .map(|code| (0..width).map(|i| code / 4u64.pow(i as u32) % 4).collect::<Vec<_>>())
        .filter(|vector| vector.iter().any(|v| *v > 0) && annihilates(vector))
        .collect()
}

fn support(vector: &[u64]) -> Vec<usize> {
    (0..vector.len()).filter(|i| vector[*i] > 0).collect()
}

fn index(id: &str) -> usize {
    id[1..].parse().unwrap()
}

fn normalized(vector: &[u64]) -> bool {
    vector.iter().fold(0u64, |acc, value| gcd(acc, *value)) == 1
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn p_invariants_annihilate_incidence(net in random_net()) {
        let result = InvariantAnalyzer::new(&net.model())
            .unwrap()
            .analyze(&InvariantOptions::place());
        prop_assert!(result.success, "{:?}", result.errors);
        let report: InvariantReport = result.report().unwrap();

        for invariant in &report.invariants {
            prop_assert_eq!(invariant.vector.len(), net.places());
            prop_assert!(normalized(&invariant.vector));
            for t in 0..net.transitions() {
                let sum: i64 = (0..net.places())
                    .map(|p| invariant.vector[p] as i64 * net.effect(p, t))
                    .sum();
                prop_assert_eq!(sum, 0);
            }
        }
    }

    #[test]
    fn t_invariants_annihilate_incidence(net in random_net()) {
        let result = InvariantAnalyzer::new(&net.model())
            .unwrap()
            .analyze(&InvariantOptions::transition());
        prop_assert!(result.success, "{:?}", result.errors);
        let report: InvariantReport = result.report().unwrap();

        for invariant in &report.invariants {
            prop_assert_eq!(invariant.vector.len(), net.transitions());
            prop_assert!(normalized(&invariant.vector));
            for p in 0..net.places() {
                let sum: i64 = (0..net.transitions())
                    .map(|t| invariant.vector[t] as i64 * net.effect(p, t))
                    .sum();
                prop_assert_eq!(sum, 0);
            }
        }
    }

    #[test]
    fn reported_invariants_have_exactly_the_minimal_supports(net in random_net()) {
        for kind in [InvariantKind::Place, InvariantKind::Transition] {
            let result = InvariantAnalyzer::new(&net.model())
                .unwrap()
                .analyze(&InvariantOptions { kind, ..InvariantOptions::default() });
            prop_assert!(result.success, "{:?}", result.errors);
            let report: InvariantReport = result.report().unwrap();
            prop_assert!(report.search_complete);
            let reported = report
                .invariants
                .iter()
                .map(|invariant| support(&invariant.vector))
                .collect::<Vec<_>>();

            for semiflow in small_semiflows(&net, kind) {
                let own = support(&semiflow);
                // 任一半流的支撑集都包含某个已报告的极小支撑
                prop_assert!(
                    reported.iter().any(|found| found.iter().all(|i| own.contains(i))),
                    "{:?}: {:?} not covered by {:?}", kind, semiflow, reported
                );
                // 已报告的支撑集不能严格包含另一个半流的支撑集
                for found in &reported {
                    let strict_superset = found.len() > own.len()
                        && own.iter().all(|i| found.contains(i));
                    prop_assert!(!strict_superset, "{:?}: {:?} is not minimal", kind, found);
                }
            }
        }
    }

    #[test]
    fn siphons_and_traps_are_minimal_and_well_formed(net in random_net()) {
        let result = SiphonTrapAnalyzer::new(&net.model())
            .unwrap()
            .analyze(&SiphonTrapOptions::default());
        prop_assert!(result.success, "{:?}", result.errors);
        let report: SiphonTrapReport = result.report().unwrap();

        let producers = |places: &[String]| {
            (0..net.transitions())
                .filter(|t| places.iter().any(|p| net.post[index(p)][*t] > 0))
                .collect::<Vec<_>>()
        };
        let consumers = |places: &[String]| {
            (0..net.transitions())
                .filter(|t| places.iter().any(|p| net.pre[index(p)][*t] > 0))
                .collect::<Vec<_>>()
        };

        for siphon in &report.siphons {
            let (pre, post) = (producers(&siphon.places), consumers(&siphon.places));
            prop_assert!(pre.iter().all(|t| post.contains(t)), "{:?}", siphon.places);
        }
        for trap in &report.traps {
            let (pre, post) = (producers(&trap.places), consumers(&trap.places));
            prop_assert!(post.iter().all(|t| pre.contains(t)), "{:?}", trap.places);
        }

        for sets in [&report.siphons, &report.traps] {
            for a in sets.iter() {
                for b in sets.iter() {
                    let strict_superset = a.size > b.size
                        && b.places.iter().all(|place| a.contains(place));
                    prop_assert!(!strict_superset, "{:?} contains {:?}", a.places, b.places);
                }
            }
        }
    }
}
