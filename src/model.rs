//! 模型适配层：外部模型只需提供库所、迁移与带权弧三张只读列表.
//!
//! [`Net::from_model`] 是唯一的校验入口，所有分析器在构造时经由它获得网快照。
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::net::{NodeId, Net, Place, Transition};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceRecord {
    pub id: String,
    pub name: String,
    pub marking: u64,
    #[serde(default)]
    pub capacity: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub rate: Option<f64>,
    #[serde(default)]
    pub priority: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArcRecord {
    pub source_id: String,
    pub target_id: String,
    /// Signed so that malformed models can be represented and rejected.
    pub weight: i64,
}

/// Read-only view of a Petri net supplied by the host application.
pub trait ModelAdapter {
    fn places(&self) -> Vec<PlaceRecord>;
    fn transitions(&self) -> Vec<TransitionRecord>;
    fn arcs(&self) -> Vec<ArcRecord>;
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvalidModelError {
    #[error("model exposes no places")]
    NoPlaces,
    #[error("model exposes no transitions")]
    NoTransitions,
    #[error("id '{0}' is used by more than one node")]
    DuplicateId(String),
    #[error("arc {source_id} -> {target_id} references an unknown node")]
    UnknownEndpoint { source_id: String, target_id: String },
    #[error("arc {source_id} -> {target_id} must connect a place and a transition")]
    SameKindEndpoints { source_id: String, target_id: String },
    #[error("arc {source_id} -> {target_id} has non-positive weight {weight}")]
    NonPositiveWeight {
        source_id: String,
        target_id: String,
        weight: i64,
    },
}

impl Net {
    /// 校验模型并构造网快照. 平行弧的权重累加.
    pub fn from_model<M>(model: &M) -> Result<Net, InvalidModelError>
    where
        M: ModelAdapter + ?Sized,
    {
        let places = model.places();
        let transitions = model.transitions();
        if places.is_empty() {
            return Err(InvalidModelError::NoPlaces);
        }
        if transitions.is_empty() {
            return Err(InvalidModelError::NoTransitions);
        }

        let mut seen = FxHashSet::default();
        let mut net = Net::empty();
        for record in places {
            if !seen.insert(record.id.clone()) {
                return Err(InvalidModelError::DuplicateId(record.id));
            }
            let mut place = Place::new(record.id, record.marking).with_name(record.name);
            place.capacity = record.capacity;
            net.add_place(place);
        }
        for record in transitions {
            if !seen.insert(record.id.clone()) {
                return Err(InvalidModelError::DuplicateId(record.id));
            }
            let mut transition = Transition::new(record.id).with_name(record.name);
            transition.rate = record.rate;
            transition.priority = record.priority;
            net.add_transition(transition);
        }

        for arc in model.arcs() {
            let (Some(source), Some(target)) =
                (net.node_id(&arc.source_id), net.node_id(&arc.target_id))
            else {
                return Err(InvalidModelError::UnknownEndpoint {
                    source_id: arc.source_id,
                    target_id: arc.target_id,
                });
            };
            if arc.weight <= 0 {
                return Err(InvalidModelError::NonPositiveWeight {
                    source_id: arc.source_id,
                    target_id: arc.target_id,
                    weight: arc.weight,
                });
            }
            let weight = arc.weight as u64;
            match (source, target) {
                (NodeId::Place(place), NodeId::Transition(transition)) => {
                    net.add_input_arc(place, transition, weight)
                }
                (NodeId::Transition(transition), NodeId::Place(place)) => {
                    net.add_output_arc(place, transition, weight)
                }
                _ => {
                    return Err(InvalidModelError::SameKindEndpoints {
                        source_id: arc.source_id,
                        target_id: arc.target_id,
                    });
                }
            }
        }

        if net.arcs().is_empty() {
            log::warn!(
                "model with {} places and {} transitions has no arcs",
                net.places_len(),
                net.transitions_len()
            );
        }
        Ok(net)
    }
}

impl ModelAdapter for Net {
    fn places(&self) -> Vec<PlaceRecord> {
        self.places
            .iter()
            .map(|place| PlaceRecord {
                id: place.id.clone(),
                name: place.name.clone(),
                marking: place.tokens,
                capacity: place.capacity,
            })
            .collect()
    }

    fn transitions(&self) -> Vec<TransitionRecord> {
        self.transitions
            .iter()
            .map(|transition| TransitionRecord {
                id: transition.id.clone(),
                name: transition.name.clone(),
                rate: transition.rate,
                priority: transition.priority,
            })
            .collect()
    }

    fn arcs(&self) -> Vec<ArcRecord> {
        Net::arcs(self)
            .into_iter()
            .map(|(source, target, weight)| ArcRecord {
                source_id: self.node_key(source).to_string(),
                target_id: self.node_key(target).to_string(),
                weight: weight as i64,
            })
            .collect()
    }
}

/// Record-backed adapter for hosts that already hold plain lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimpleModel {
    pub places: Vec<PlaceRecord>,
    pub transitions: Vec<TransitionRecord>,
    pub arcs: Vec<ArcRecord>,
}

impl SimpleModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn place(mut self, id: &str, marking: u64) -> Self {
        self.places.push(PlaceRecord {
            id: id.to_string(),
            name: id.to_string(),
            marking,
            capacity: None,
        });
        self
    }

    pub fn transition(mut self, id: &str) -> Self {
        self.transitions.push(TransitionRecord {
            id: id.to_string(),
            name: id.to_string(),
            rate: None,
            priority: None,
        });
        self
    }

    pub fn prioritized_transition(mut self, id: &str, priority: i64) -> Self {
        self.transitions.push(TransitionRecord {
            id: id.to_string(),
            name: id.to_string(),
            rate: None,
            priority: Some(priority),
        });
        self
    }

    pub fn arc(mut self, source: &str, target: &str, weight: i64) -> Self {
        self.arcs.push(ArcRecord {
            source_id: source.to_string(),
            target_id: target.to_string(),
            weight,
        });
        self
    }
}

impl ModelAdapter for SimpleModel {
    fn places(&self) -> Vec<PlaceRecord> {
        self.places.clone()
    }

    fn transitions(&self) -> Vec<TransitionRecord> {
        self.transitions.clone()
    }

    fn arcs(&self) -> Vec<ArcRecord> {
        self.arcs.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_net_and_merges_parallel_arcs() {
        let model = SimpleModel::new()
            .place("P1", 2)
            .place("P2", 0)
            .transition("T1")
            .arc("P1", "T1", 1)
            .arc("P1", "T1", 1)
            .arc("T1", "P2", 3);
        let net = Net::from_model(&model).unwrap();

        let p1 = net.place_id("P1").unwrap();
        let p2 = net.place_id("P2").unwrap();
        let t1 = net.transition_id("T1").unwrap();
        assert_eq!(*net.pre.get(p1, t1), 2);
        assert_eq!(*net.post.get(p2, t1), 3);
        assert_eq!(net.places[p1].tokens, 2);
    }

    #[test]
    fn rejects_structural_violations() {
        assert_eq!(
            Net::from_model(&SimpleModel::new().transition("T1")).unwrap_err(),
            InvalidModelError::NoPlaces
        );
        assert_eq!(
            Net::from_model(&SimpleModel::new().place("P1", 0)).unwrap_err(),
            InvalidModelError::NoTransitions
        );

        let duplicate = SimpleModel::new().place("X", 0).transition("X");
        assert_eq!(
            Net::from_model(&duplicate).unwrap_err(),
            InvalidModelError::DuplicateId("X".into())
        );

        let place_to_place = SimpleModel::new()
            .place("P1", 0)
            .place("P2", 0)
            .transition("T1")
            .arc("P1", "P2", 1);
        assert!(matches!(
            Net::from_model(&place_to_place),
            Err(InvalidModelError::SameKindEndpoints { .. })
        ));

        let zero_weight = SimpleModel::new()
            .place("P1", 0)
            .transition("T1")
            .arc("P1", "T1", 0);
        assert!(matches!(
            Net::from_model(&zero_weight),
            Err(InvalidModelError::NonPositiveWeight { weight: 0, .. })
        ));

        let dangling = SimpleModel::new()
            .place("P1", 0)
            .transition("T1")
            .arc("P1", "T9", 1);
        assert!(matches!(
            Net::from_model(&dangling),
            Err(InvalidModelError::UnknownEndpoint { .. })
        ));
    }

    #[test]
    fn net_round_trips_through_its_own_adapter() {
        let model = SimpleModel::new()
            .place("P1", 1)
            .transition("T1")
            .arc("P1", "T1", 2)
            .arc("T1", "P1", 1);
        let net = Net::from_model(&model).unwrap();
        let again = Net::from_model(&net).unwrap();

        assert_eq!(ModelAdapter::arcs(&net), ModelAdapter::arcs(&again));
        assert_eq!(ModelAdapter::places(&net), model.places);
    }
}
