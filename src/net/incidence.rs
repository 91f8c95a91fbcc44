//! 输入 (Pre)、输出 (Post) 以及效应矩阵 `C = Post - Pre` 的稠密行存储.
use std::fmt;

use smallvec::SmallVec;

use crate::net::ids::{PlaceId, TransitionId};
use crate::net::index_vec::{Idx, IndexVec};

type SmallRow<T> = SmallVec<[T; 4]>;

/// Place-major matrix: one row per place, one column per transition.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Incidence<T> {
    rows: IndexVec<PlaceId, SmallRow<T>>,
    cols: usize,
}

impl<T> Incidence<T>
where
    T: Clone,
{
    pub fn new(places: usize, transitions: usize, default: T) -> Self {
        let mut rows = IndexVec::new();
        for _ in 0..places {
            rows.push(SmallRow::from_elem(default.clone(), transitions));
        }
        Self {
            rows,
            cols: transitions,
        }
    }

    pub fn push_place_with_default(&mut self, default: T) -> PlaceId {
        let mut row = SmallRow::new();
        row.resize(self.cols, default);
        self.rows.push(row)
    }

    pub fn push_transition_with_default(&mut self, default: T) -> TransitionId {
        let next = self.cols;
        for row in self.rows.iter_mut() {
            row.push(default.clone());
        }
        self.cols += 1;
        TransitionId::from_usize(next)
    }

    pub fn places(&self) -> usize {
        self.rows.len()
    }

    pub fn transitions(&self) -> usize {
        self.cols
    }

    pub fn get(&self, place: PlaceId, transition: TransitionId) -> &T {
        &self.rows[place][transition.index()]
    }

    pub fn get_mut(&mut self, place: PlaceId, transition: TransitionId) -> &mut T {
        &mut self.rows[place][transition.index()]
    }

    pub fn row(&self, place: PlaceId) -> &[T] {
        &self.rows[place]
    }

    pub fn rows(&self) -> &IndexVec<PlaceId, SmallRow<T>> {
        &self.rows
    }

    /// Column `t` in place order.
    pub fn column(&self, transition: TransitionId) -> impl Iterator<Item = (PlaceId, &T)> {
        self.rows
            .iter_enumerated()
            .map(move |(place, row)| (place, &row[transition.index()]))
    }
}

impl<T> fmt::Debug for Incidence<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Incidence")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .finish()
    }
}

impl Incidence<u64> {
    pub fn difference(&self, other: &Self) -> Incidence<i64> {
        assert_eq!(self.places(), other.places());
        assert_eq!(self.transitions(), other.transitions());
        let mut rows = IndexVec::new();
        for (left, right) in self.rows.iter().zip(other.rows.iter()) {
            rows.push(
                left.iter()
                    .zip(right.iter())
                    .map(|(l, r)| *l as i64 - *r as i64)
                    .collect::<SmallRow<_>>(),
            );
        }
        Incidence {
            rows,
            cols: self.cols,
        }
    }
}

impl Incidence<i64> {
    /// 行主序导出为普通二维向量 (`|P| x |T|`).
    pub fn to_dense(&self) -> Vec<Vec<i64>> {
        self.rows.iter().map(|row| row.to_vec()).collect()
    }

    /// 转置导出 (`|T| x |P|`)，用于 P-不变量求解 `Cᵗ·y = 0`.
    pub fn to_dense_transposed(&self) -> Vec<Vec<i64>> {
        let mut out = vec![vec![0i64; self.places()]; self.cols];
        for (place, row) in self.rows.iter_enumerated() {
            for (t, value) in row.iter().enumerate() {
                out[t][place.index()] = *value;
            }
        }
        out
    }
}
