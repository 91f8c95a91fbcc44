//! P/T 网静态结构元素：库所、迁移与标识.
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::net::ids::PlaceId;
use crate::net::index_vec::IndexVec;

pub type Weight = u64;

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Debug)]
pub struct Place {
    /// 外部模型中的标识，在网内唯一.
    pub id: String,
    pub name: String,
    pub tokens: Weight,
    pub capacity: Option<Weight>,
}

impl Place {
    pub fn new(id: impl Into<String>, tokens: Weight) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            tokens,
            capacity: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_capacity(mut self, capacity: Weight) -> Self {
        self.capacity = Some(capacity);
        self
    }
}

#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct Transition {
    pub id: String,
    pub name: String,
    /// Firing rate supplied by the model; carried, never computed here.
    pub rate: Option<f64>,
    pub priority: Option<i64>,
}

impl Transition {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            rate: None,
            priority: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = Some(rate);
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Transition").field(&self.id).finish()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Marking(pub IndexVec<PlaceId, Weight>);

impl Marking {
    pub fn new(initial: IndexVec<PlaceId, Weight>) -> Self {
        Self(initial)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PlaceId, &Weight)> {
        self.0.iter_enumerated()
    }

    pub fn tokens(&self, place: PlaceId) -> Weight {
        self.0[place]
    }

    pub fn tokens_mut(&mut self, place: PlaceId) -> &mut Weight {
        &mut self.0[place]
    }

    pub fn total(&self) -> Weight {
        self.0.iter().sum()
    }

    pub fn max_tokens(&self) -> Weight {
        self.0.iter().copied().max().unwrap_or(0)
    }

    pub fn as_slice(&self) -> &[Weight] {
        self.0.as_slice()
    }
}

impl Hash for Marking {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for value in self.0.iter() {
            value.hash(state);
        }
    }
}

impl fmt::Debug for Marking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (place, tokens) in self.iter() {
            map.entry(&place, tokens);
        }
        map.finish()
    }
}

/// 分量序：`m1 <= m2` 当且仅当每个库所上 `m1[p] <= m2[p]`.
impl PartialOrd for Marking {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.len() != other.len() {
            return None;
        }
        let mut less = false;
        let mut greater = false;
        for (left, right) in self.0.iter().zip(other.0.iter()) {
            match left.cmp(right) {
                Ordering::Less => less = true,
                Ordering::Greater => greater = true,
                Ordering::Equal => {}
            }
        }
        match (less, greater) {
            (true, true) => None,
            (true, false) => Some(Ordering::Less),
            (false, true) => Some(Ordering::Greater),
            (false, false) => Some(Ordering::Equal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marking(values: &[Weight]) -> Marking {
        Marking::new(IndexVec::from(values.to_vec()))
    }

    #[test]
    fn componentwise_order() {
        assert!(marking(&[1, 0]) < marking(&[1, 2]));
        assert!(marking(&[2, 2]) > marking(&[1, 2]));
        assert_eq!(marking(&[1, 0]).partial_cmp(&marking(&[0, 1])), None);
        assert_eq!(
            marking(&[3, 1]).partial_cmp(&marking(&[3, 1])),
            Some(Ordering::Equal)
        );
    }

    #[test]
    fn builders_default_name_to_id() {
        let place = Place::new("P1", 2).with_capacity(4);
        assert_eq!(place.name, "P1");
        assert_eq!(place.capacity, Some(4));

        let transition = Transition::new("T1").with_name("fire").with_priority(3);
        assert_eq!(transition.id, "T1");
        assert_eq!(transition.name, "fire");
        assert_eq!(transition.priority, Some(3));
    }
}
