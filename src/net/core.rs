//! 运行时语义：可发生集、发生规则、前后集与连通性诊断.
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::net::ids::{NodeId, PlaceId, TransitionId};
use crate::net::incidence::Incidence;
use crate::net::index_vec::{Idx, IndexVec};
use crate::net::structure::{Marking, Place, Transition, Weight};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FireError {
    #[error("transition {0:?} is out of bounds")]
    OutOfBounds(TransitionId),
    #[error("transition {0:?} is not enabled under the supplied marking")]
    NotEnabled(TransitionId),
    #[error("capacity exceeded at place {place:?}: {after} > {capacity}")]
    Capacity {
        place: PlaceId,
        after: Weight,
        capacity: Weight,
    },
    #[error("token count overflow at place {0:?}")]
    Overflow(PlaceId),
}

/// Petri 网连通性诊断报告
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticReport {
    /// 孤立库所（无任何连接的弧）
    pub isolated_places: Vec<PlaceId>,
    /// 孤立迁移（无任何连接的弧）
    pub isolated_transitions: Vec<TransitionId>,
    /// 无输入弧且初始标识为 0 的库所，永远不会被标记
    pub unmarkable_places: Vec<PlaceId>,
    /// 无前置库所的迁移（源迁移）
    pub source_transitions: Vec<TransitionId>,
    /// 无后置库所的迁移（汇迁移）
    pub sink_transitions: Vec<TransitionId>,
}

impl DiagnosticReport {
    pub fn has_issues(&self) -> bool {
        !self.isolated_places.is_empty()
            || !self.isolated_transitions.is_empty()
            || !self.unmarkable_places.is_empty()
    }
}

/// In-memory snapshot of a validated place/transition net.
///
/// Built either through [`Net::from_model`](crate::model) or directly with the
/// `add_*` methods. Analyzers only ever read it.
#[derive(Clone)]
pub struct Net {
    pub places: IndexVec<PlaceId, Place>,
    pub transitions: IndexVec<TransitionId, Transition>,
    pub pre: Incidence<u64>,
    pub post: Incidence<u64>,
    place_lookup: FxHashMap<String, PlaceId>,
    transition_lookup: FxHashMap<String, TransitionId>,
}

impl std::fmt::Debug for Net {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Net")
            .field("places", &self.places)
            .field("transitions", &self.transitions)
            .field("pre", &self.pre)
            .field("post", &self.post)
            .finish()
    }
}

impl Net {
    pub fn empty() -> Self {
        Self {
            places: IndexVec::new(),
            transitions: IndexVec::new(),
            pre: Incidence::new(0, 0, 0u64),
            post: Incidence::new(0, 0, 0u64),
            place_lookup: FxHashMap::default(),
            transition_lookup: FxHashMap::default(),
        }
    }

    pub fn add_place(&mut self, place: Place) -> PlaceId {
        debug_assert!(
            !self.place_lookup.contains_key(&place.id),
            "duplicate place id {}",
            place.id
        );
        let key = place.id.clone();
        let place_id = self.places.push(place);
        self.pre.push_place_with_default(0);
        self.post.push_place_with_default(0);
        self.place_lookup.insert(key, place_id);
        place_id
    }

    pub fn add_transition(&mut self, transition: Transition) -> TransitionId {
        debug_assert!(
            !self.transition_lookup.contains_key(&transition.id),
            "duplicate transition id {}",
            transition.id
        );
        let key = transition.id.clone();
        let transition_id = self.transitions.push(transition);
        self.pre.push_transition_with_default(0);
        self.post.push_transition_with_default(0);
        self.transition_lookup.insert(key, transition_id);
        transition_id
    }

    /// 输入弧: place -> transition，重复添加时权重累加
    pub fn add_input_arc(&mut self, place: PlaceId, transition: TransitionId, weight: Weight) {
        if weight == 0 {
            return;
        }
        *self.pre.get_mut(place, transition) += weight;
    }

    /// 输出弧: transition -> place，重复添加时权重累加
    pub fn add_output_arc(&mut self, place: PlaceId, transition: TransitionId, weight: Weight) {
        if weight == 0 {
            return;
        }
        *self.post.get_mut(place, transition) += weight;
    }

    pub fn places_len(&self) -> usize {
        self.places.len()
    }

    pub fn transitions_len(&self) -> usize {
        self.transitions.len()
    }

    pub fn place_id(&self, id: &str) -> Option<PlaceId> {
        self.place_lookup.get(id).copied()
    }

    pub fn transition_id(&self, id: &str) -> Option<TransitionId> {
        self.transition_lookup.get(id).copied()
    }

    /// Resolves an external id to either a place or a transition.
    pub fn node_id(&self, id: &str) -> Option<NodeId> {
        self.place_id(id)
            .map(NodeId::Place)
            .or_else(|| self.transition_id(id).map(NodeId::Transition))
    }

    pub fn node_key(&self, node: NodeId) -> &str {
        match node {
            NodeId::Place(place) => &self.places[place].id,
            NodeId::Transition(transition) => &self.transitions[transition].id,
        }
    }

    pub fn node_name(&self, node: NodeId) -> &str {
        match node {
            NodeId::Place(place) => &self.places[place].name,
            NodeId::Transition(transition) => &self.transitions[transition].name,
        }
    }

    pub fn initial_marking(&self) -> Marking {
        Marking(IndexVec::from(
            self.places.iter().map(|p| p.tokens).collect::<Vec<_>>(),
        ))
    }

    pub fn c_matrix(&self) -> Incidence<i64> {
        self.post.difference(&self.pre)
    }

    /// 所有弧，按 (输入弧, 输出弧)、库所序、迁移序排列.
    pub fn arcs(&self) -> Vec<(NodeId, NodeId, Weight)> {
        let mut arcs = Vec::new();
        for (place, row) in self.pre.rows().iter_enumerated() {
            for (idx, weight) in row.iter().enumerate() {
                if *weight > 0 {
                    arcs.push((
                        NodeId::Place(place),
                        NodeId::Transition(TransitionId::from_usize(idx)),
                        *weight,
                    ));
                }
            }
        }
        for (place, row) in self.post.rows().iter_enumerated() {
            for (idx, weight) in row.iter().enumerate() {
                if *weight > 0 {
                    arcs.push((
                        NodeId::Transition(TransitionId::from_usize(idx)),
                        NodeId::Place(place),
                        *weight,
                    ));
                }
            }
        }
        arcs
    }

    /// •p：向库所 `p` 产生 token 的迁移.
    pub fn place_preset(&self, place: PlaceId) -> Vec<TransitionId> {
        nonzero_columns(self.post.row(place))
    }

    /// p•：从库所 `p` 消耗 token 的迁移.
    pub fn place_postset(&self, place: PlaceId) -> Vec<TransitionId> {
        nonzero_columns(self.pre.row(place))
    }

    /// •t：迁移的输入库所及弧权.
    pub fn input_places(&self, transition: TransitionId) -> Vec<(PlaceId, Weight)> {
        self.pre
            .column(transition)
            .filter(|(_, weight)| **weight > 0)
            .map(|(place, weight)| (place, *weight))
            .collect()
    }

    /// t•：迁移的输出库所及弧权.
    pub fn output_places(&self, transition: TransitionId) -> Vec<(PlaceId, Weight)> {
        self.post
            .column(transition)
            .filter(|(_, weight)| **weight > 0)
            .map(|(place, weight)| (place, *weight))
            .collect()
    }

    /// 可发生：输入 token 足够，且发生后输出库所不超过容量、不溢出.
    pub fn is_transition_enabled(&self, transition: TransitionId, marking: &Marking) -> bool {
        if transition.index() >= self.transitions_len() {
            return false;
        }
        self.has_input_tokens(transition, marking)
            && self.output_violation(transition, marking).is_none()
    }

    pub fn enabled_transitions(&self, marking: &Marking) -> Vec<TransitionId> {
        self.transitions
            .indices()
            .filter(|transition| self.is_transition_enabled(*transition, marking))
            .collect()
    }

    /// 先判断 token 是否足够（`NotEnabled`），再判断输出是否越界（`Overflow`/`Capacity`）.
    pub fn fire_transition(
        &self,
        marking: &Marking,
        transition: TransitionId,
    ) -> Result<Marking, FireError> {
        if transition.index() >= self.transitions_len() {
            return Err(FireError::OutOfBounds(transition));
        }
        if !self.has_input_tokens(transition, marking) {
            return Err(FireError::NotEnabled(transition));
        }
        if let Some(err) = self.output_violation(transition, marking) {
            return Err(err);
        }

        let mut next = marking.clone();
        for (place, weight) in self.input_places(transition) {
            *next.tokens_mut(place) -= weight;
        }
        for (place, weight) in self.output_places(transition) {
            *next.tokens_mut(place) += weight;
        }
        Ok(next)
    }

    fn has_input_tokens(&self, transition: TransitionId, marking: &Marking) -> bool {
        self.pre
            .column(transition)
            .all(|(place, weight)| marking.tokens(place) >= *weight)
    }

    /// 调用前须已确认输入 token 足够.
    fn output_violation(&self, transition: TransitionId, marking: &Marking) -> Option<FireError> {
        for (place, weight) in self.output_places(transition) {
            let remaining = marking.tokens(place) - *self.pre.get(place, transition);
            let Some(after) = remaining.checked_add(weight) else {
                return Some(FireError::Overflow(place));
            };
            if let Some(capacity) = self.places[place].capacity {
                if after > capacity {
                    return Some(FireError::Capacity {
                        place,
                        after,
                        capacity,
                    });
                }
            }
        }
        None
    }

    /// 以外部标识为键导出标识，保持库所顺序.
    pub fn marking_by_id(&self, marking: &Marking) -> IndexMap<String, Weight> {
        marking
            .iter()
            .map(|(place, tokens)| (self.places[place].id.clone(), *tokens))
            .collect()
    }

    /// 诊断信息：检测孤立节点、源/汇迁移与永远无法被标记的库所
    pub fn diagnose_connectivity(&self) -> DiagnosticReport {
        let mut report = DiagnosticReport::default();

        for (place_id, place) in self.places.iter_enumerated() {
            let has_input = self.post.row(place_id).iter().any(|w| *w > 0);
            let has_output = self.pre.row(place_id).iter().any(|w| *w > 0);

            if !has_input && !has_output {
                report.isolated_places.push(place_id);
            } else if !has_input && place.tokens == 0 {
                report.unmarkable_places.push(place_id);
            }
        }

        for transition in self.transitions.indices() {
            let has_preset = self.pre.column(transition).any(|(_, w)| *w > 0);
            let has_postset = self.post.column(transition).any(|(_, w)| *w > 0);
            match (has_preset, has_postset) {
                (false, false) => report.isolated_transitions.push(transition),
                (false, true) => report.source_transitions.push(transition),
                (true, false) => report.sink_transitions.push(transition),
                (true, true) => {}
            }
        }

        if report.has_issues() {
            log::debug!(
                "connectivity: {} isolated places, {} isolated transitions, {} unmarkable places",
                report.isolated_places.len(),
                report.isolated_transitions.len(),
                report.unmarkable_places.len()
            );
        }
        report
    }
}

impl Default for Net {
    fn default() -> Self {
        Self::empty()
    }
}

fn nonzero_columns(row: &[u64]) -> Vec<TransitionId> {
    row.iter()
        .enumerate()
        .filter(|(_, weight)| **weight > 0)
        .map(|(idx, _)| TransitionId::from_usize(idx))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn producer_consumer() -> (Net, PlaceId, PlaceId, TransitionId) {
        let mut net = Net::empty();
        let p0 = net.add_place(Place::new("p0", 1));
        let p1 = net.add_place(Place::new("p1", 0).with_capacity(1));
        let t0 = net.add_transition(Transition::new("t0"));
        net.add_input_arc(p0, t0, 1);
        net.add_output_arc(p1, t0, 1);
        (net, p0, p1, t0)
    }

    #[test]
    fn add_place_and_transition_updates_incidence() {
        let (net, p0, p1, t0) = producer_consumer();

        assert_eq!(net.places_len(), 2);
        assert_eq!(net.transitions_len(), 1);
        assert_eq!(*net.pre.get(p0, t0), 1);
        assert_eq!(*net.post.get(p1, t0), 1);
        assert_eq!(net.place_id("p1"), Some(p1));
        assert_eq!(net.node_id("t0"), Some(NodeId::Transition(t0)));
        assert_eq!(net.node_id("missing"), None);
    }

    #[test]
    fn firing_moves_tokens() {
        let (net, p0, p1, t0) = producer_consumer();
        let marking = net.initial_marking();
        assert_eq!(net.enabled_transitions(&marking), vec![t0]);

        let next = net.fire_transition(&marking, t0).unwrap();
        assert_eq!(next.tokens(p0), 0);
        assert_eq!(next.tokens(p1), 1);
        assert!(net.enabled_transitions(&next).is_empty());
        assert_eq!(
            net.fire_transition(&next, t0),
            Err(FireError::NotEnabled(t0))
        );
    }

    #[test]
    fn capacity_is_enforced() {
        let (mut net, p0, p1, t0) = producer_consumer();
        net.places[p0].tokens = 2;
        let first = net.fire_transition(&net.initial_marking(), t0).unwrap();
        assert!(!net.is_transition_enabled(t0, &first));
        assert!(net.enabled_transitions(&first).is_empty());
        assert_eq!(
            net.fire_transition(&first, t0),
            Err(FireError::Capacity {
                place: p1,
                after: 2,
                capacity: 1
            })
        );
    }

    #[test]
    fn missing_tokens_reported_before_capacity() {
        let (mut net, p0, p1, t0) = producer_consumer();
        net.places[p1].tokens = 1;
        net.places[p0].tokens = 0;
        assert_eq!(
            net.fire_transition(&net.initial_marking(), t0),
            Err(FireError::NotEnabled(t0))
        );
    }

    #[test]
    fn self_loop_on_full_place_stays_enabled() {
        let mut net = Net::empty();
        let p = net.add_place(Place::new("p", 1).with_capacity(1));
        let t = net.add_transition(Transition::new("t"));
        net.add_input_arc(p, t, 1);
        net.add_output_arc(p, t, 1);
        let marking = net.initial_marking();
        assert!(net.is_transition_enabled(t, &marking));
        assert_eq!(net.fire_transition(&marking, t), Ok(marking));
    }

    #[test]
    fn presets_and_postsets() {
        let (net, p0, p1, t0) = producer_consumer();
        assert!(net.place_preset(p0).is_empty());
        assert_eq!(net.place_postset(p0), vec![t0]);
        assert_eq!(net.place_preset(p1), vec![t0]);
        assert_eq!(net.input_places(t0), vec![(p0, 1)]);
        assert_eq!(net.output_places(t0), vec![(p1, 1)]);
        assert_eq!(net.arcs().len(), 2);
    }

    #[test]
    fn diagnostics_flag_isolated_and_unmarkable() {
        let mut net = Net::empty();
        let lonely = net.add_place(Place::new("lonely", 0));
        let starved = net.add_place(Place::new("starved", 0));
        let t = net.add_transition(Transition::new("t"));
        let idle = net.add_transition(Transition::new("idle"));
        net.add_input_arc(starved, t, 1);

        let report = net.diagnose_connectivity();
        assert_eq!(report.isolated_places, vec![lonely]);
        assert_eq!(report.unmarkable_places, vec![starved]);
        assert_eq!(report.isolated_transitions, vec![idle]);
        assert_eq!(report.sink_transitions, vec![t]);
        assert!(report.has_issues());
    }
}
