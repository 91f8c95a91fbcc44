//! # Petri 网核心定义（Place/Transition Net）
//!
//! 设库所集合 `P` 与迁移集合 `T`。输入/输出映射 `Pre, Post ∈ ℕ^{|P|×|T|}`，
//! 效应矩阵 `C = Post - Pre`。对任意标识 `M ∈ ℕ^{|P|}`：
//!
//! * 迁移 `t` **可发生** 当且仅当 `∀p ∈ P: M[p] ≥ Pre[p, t]`；
//! * 发生后 `M' = M + C[:, t]`，若库所声明了容量则 `M'[p]` 不得超过容量。
//!
//! ## 示例
//!
//! ```rust
//! use pn_topology::net::*;
//!
//! let mut net = Net::empty();
//! let p0 = net.add_place(Place::new("p0", 1));
//! let p1 = net.add_place(Place::new("p1", 0));
//! let t0 = net.add_transition(Transition::new("t0"));
//!
//! net.add_input_arc(p0, t0, 1);
//! net.add_output_arc(p1, t0, 1);
//!
//! let marking = net.initial_marking();
//! assert_eq!(net.enabled_transitions(&marking), vec![t0]);
//! let next = net.fire_transition(&marking, t0).unwrap();
//! assert_eq!(next.tokens(p0), 0);
//! assert_eq!(next.tokens(p1), 1);
//! ```

pub mod core;
pub mod ids;
pub mod incidence;
pub mod index_vec;
pub mod structure;

pub use self::core::{DiagnosticReport, FireError, Net};
pub use ids::{NodeId, PlaceId, TransitionId};
pub use incidence::Incidence;
pub use index_vec::{Idx, IndexVec};
pub use structure::{Marking, Place, Transition, Weight};
