//! Petri 网拓扑分析引擎.
//!
//! 宿主程序通过 [`model::ModelAdapter`] 提供库所、迁移与带权弧，各分析器在构造时校验并
//! 拍下网快照，[`analysis::Analyzer::analyze`] 返回统一的 [`AnalysisResult`]。
//!
//! ```
//! use pn_topology::{Analyzer, InvariantAnalyzer, InvariantOptions, InvariantReport, SimpleModel};
//!
//! let model = SimpleModel::new()
//!     .place("P1", 1)
//!     .transition("T1")
//!     .arc("P1", "T1", 1)
//!     .arc("T1", "P1", 1);
//! let result = InvariantAnalyzer::new(&model)?.analyze(&InvariantOptions::place());
//! let report: InvariantReport = result.report()?;
//! assert_eq!(report.count, 1);
//! # Ok::<(), pn_topology::AnalysisError>(())
//! ```
pub mod analysis;
pub mod config;
pub mod graph;
pub mod model;
pub mod net;

pub use analysis::{
    AnalysisError, AnalysisResult, Analyzer, BoundednessAnalyzer, BoundednessOptions,
    BoundednessReport, DeadlockAnalyzer, DeadlockOptions, DeadlockReport, FairnessAnalyzer,
    FairnessOptions, FairnessReport, InvariantAnalyzer, InvariantKind, InvariantOptions,
    InvariantReport, LivenessAnalyzer, LivenessLevel, LivenessOptions, LivenessReport,
    ReachabilityAnalyzer, ReachabilityOptions, ReachabilityReport, SiphonTrapAnalyzer,
    SiphonTrapOptions, SiphonTrapReport,
};
pub use config::EngineConfig;
pub use graph::{
    CycleAnalyzer, CycleOptions, CycleReport, HubAnalyzer, HubOptions, HubReport, PathAnalyzer,
    PathOptions, PathReport,
};
pub use model::{
    ArcRecord, InvalidModelError, ModelAdapter, PlaceRecord, SimpleModel, TransitionRecord,
};
pub use net::Net;
