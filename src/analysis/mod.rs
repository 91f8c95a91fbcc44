//! 分析框架与各分析器.
//!
//! 每个分析器持有一份经过校验的 [`Net`] 快照与自身的结果缓存；
//! [`Analyzer::analyze`] 是唯一的外层边界，所有错误与 panic 都在此转换为
//! `success = false` 的 [`AnalysisResult`]，不会传播到调用方。
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::model::ModelAdapter;
use crate::net::Net;

pub mod boundedness;
pub mod deadlock;
pub mod error;
pub mod fairness;
pub mod invariants;
pub mod liveness;
pub mod nullspace;
pub mod reachability;
pub mod result;
pub mod siphons;

pub use boundedness::{BoundednessAnalyzer, BoundednessOptions, BoundednessReport};
pub use deadlock::{DeadlockAnalyzer, DeadlockOptions, DeadlockReport};
pub use error::AnalysisError;
pub use fairness::{FairnessAnalyzer, FairnessOptions, FairnessReport};
pub use invariants::{InvariantAnalyzer, InvariantKind, InvariantOptions, InvariantReport};
pub use liveness::{LivenessAnalyzer, LivenessLevel, LivenessOptions, LivenessReport};
pub use reachability::{ReachabilityAnalyzer, ReachabilityOptions, ReachabilityReport};
pub use result::AnalysisResult;
pub use siphons::{SiphonTrapAnalyzer, SiphonTrapOptions, SiphonTrapReport};

/// 网快照 + 按选项缓存的结果. 缓存只由持有者显式失效.
#[derive(Debug, Clone)]
pub struct AnalyzerCore {
    net: Net,
    cache: FxHashMap<String, AnalysisResult>,
    dirty: bool,
}

impl AnalyzerCore {
    pub fn new<M>(model: &M) -> Result<Self, AnalysisError>
    where
        M: ModelAdapter + ?Sized,
    {
        Ok(Self::from_net(Net::from_model(model)?))
    }

    pub fn from_net(net: Net) -> Self {
        Self {
            net,
            cache: FxHashMap::default(),
            dirty: false,
        }
    }

    pub fn net(&self) -> &Net {
        &self.net
    }

    pub fn cached_results(&self) -> usize {
        self.cache.len()
    }
}

/// Common contract of every analyzer.
pub trait Analyzer {
    type Options: Serialize + Default + Clone + fmt::Debug;

    const NAME: &'static str;

    fn core(&self) -> &AnalyzerCore;

    fn core_mut(&mut self) -> &mut AnalyzerCore;

    /// Analyzer body. Fills `data`, `summary` and `warnings`; any `Err` marks the
    /// whole result as failed.
    fn run(&self, options: &Self::Options, result: &mut AnalysisResult)
    -> Result<(), AnalysisError>;

    fn net(&self) -> &Net {
        self.core().net()
    }

    fn analyze(&self, options: &Self::Options) -> AnalysisResult {
        let started = Instant::now();
        let mut result = AnalysisResult::new();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run(options, &mut result)));

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                log::warn!("{} analysis failed: {}", Self::NAME, err);
                result.fail(&err);
                result.summary = format!("{} analysis failed: {}", Self::NAME, err);
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                log::error!("{} analysis aborted: {}", Self::NAME, message);
                result.data.clear();
                result.fail(&AnalysisError::Panicked(message));
                result.summary = format!("{} analysis aborted", Self::NAME);
            }
        }

        let net = self.net();
        result.set_metadata("analyzer", &Self::NAME);
        result.set_metadata("analysis_time", &started.elapsed().as_secs_f64());
        result.set_metadata("options", options);
        result.set_metadata("places", &net.places_len());
        result.set_metadata("transitions", &net.transitions_len());
        log::info!(
            "{} analysis finished in {:?} (success = {})",
            Self::NAME,
            started.elapsed(),
            result.success
        );
        result
    }

    /// Like [`analyze`](Self::analyze) but memoized per option set until the
    /// owner calls [`invalidate`](Self::invalidate) or [`clear_cache`](Self::clear_cache).
    fn analyze_cached(&mut self, options: &Self::Options) -> AnalysisResult {
        let key = serde_json::to_string(options).unwrap_or_else(|_| format!("{options:?}"));
        if self.core().dirty {
            self.clear_cache();
        }
        if let Some(hit) = self.core().cache.get(&key) {
            log::debug!("{} cache hit", Self::NAME);
            let mut hit = hit.clone();
            hit.set_metadata("cache_hit", &true);
            return hit;
        }
        let result = self.analyze(options);
        self.core_mut().cache.insert(key, result.clone());
        result
    }

    /// Marks cached results stale; they are dropped on the next cached call.
    fn invalidate(&mut self) {
        self.core_mut().dirty = true;
    }

    fn is_dirty(&self) -> bool {
        self.core().dirty
    }

    fn clear_cache(&mut self) {
        let core = self.core_mut();
        core.cache.clear();
        core.dirty = false;
    }

    /// Replaces the net snapshot after the owner changed the underlying model.
    fn reload<M>(&mut self, model: &M) -> Result<(), AnalysisError>
    where
        M: ModelAdapter + ?Sized,
        Self: Sized,
    {
        let net = Net::from_model(model)?;
        self.core_mut().net = net;
        self.clear_cache();
        Ok(())
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Generates `new` (validating the model) and `from_net` for an analyzer type.
macro_rules! analyzer_constructors {
    ($name:ident) => {
        impl $name {
            pub fn new<M>(model: &M) -> Result<Self, $crate::analysis::AnalysisError>
            where
                M: $crate::model::ModelAdapter + ?Sized,
            {
                Ok(Self {
                    core: $crate::analysis::AnalyzerCore::new(model)?,
                })
            }

            pub fn from_net(net: $crate::net::Net) -> Self {
                Self {
                    core: $crate::analysis::AnalyzerCore::from_net(net),
                }
            }
        }
    };
}

pub(crate) use analyzer_constructors;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SimpleModel;

    #[derive(Debug, Clone, Default, Serialize)]
    struct ProbeOptions {
        explode: bool,
        fail: bool,
    }

    struct Probe {
        core: AnalyzerCore,
    }

    analyzer_constructors!(Probe);

    impl Analyzer for Probe {
        type Options = ProbeOptions;
        const NAME: &'static str = "probe";

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
            if options.explode {
                panic!("boom");
            }
            if options.fail {
                return Err(AnalysisError::BoundExceeded("too big".into()));
            }
            result.insert("places", &self.net().places_len())?;
            result.summary = "ok".into();
            Ok(())
        }
    }

    fn model() -> SimpleModel {
        SimpleModel::new()
            .place("P1", 1)
            .transition("T1")
            .arc("P1", "T1", 1)
    }

    #[test]
    fn constructor_rejects_invalid_model() {
        let err = Probe::new(&SimpleModel::new().transition("T1")).err().unwrap();
        assert!(matches!(err, AnalysisError::InvalidModel(_)));
    }

    #[test]
    fn boundary_converts_errors_and_panics() {
        let probe = Probe::new(&model()).unwrap();

        let ok = probe.analyze(&ProbeOptions::default());
        assert!(ok.success);
        assert!(ok.analysis_time().is_some());
        assert_eq!(ok.metadata["analyzer"], "probe");

        let failed = probe.analyze(&ProbeOptions {
            fail: true,
            ..Default::default()
        });
        assert!(!failed.success);
        assert_eq!(failed.errors.len(), 1);

        let aborted = probe.analyze(&ProbeOptions {
            explode: true,
            ..Default::default()
        });
        assert!(!aborted.success);
        assert!(aborted.errors[0].contains("boom"));
        assert!(aborted.data.is_empty());
    }

    #[test]
    fn cache_is_only_flushed_by_owner() {
        let mut probe = Probe::new(&model()).unwrap();
        let options = ProbeOptions::default();

        probe.analyze_cached(&options);
        assert_eq!(probe.core().cached_results(), 1);
        let hit = probe.analyze_cached(&options);
        assert_eq!(hit.metadata["cache_hit"], true);

        probe.invalidate();
        assert!(probe.is_dirty());
        let fresh = probe.analyze_cached(&options);
        assert!(!fresh.metadata.contains_key("cache_hit"));
        assert!(!probe.is_dirty());

        let bigger = model().place("P2", 0);
        probe.reload(&bigger).unwrap();
        assert_eq!(probe.core().cached_results(), 0);
        assert_eq!(probe.net().places_len(), 2);
    }
}
