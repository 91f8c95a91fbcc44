use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::analysis::{
    BoundednessOptions, DeadlockOptions, FairnessOptions, InvariantOptions, LivenessOptions,
    ReachabilityOptions, SiphonTrapOptions,
};
use crate::graph::{CycleOptions, HubOptions, PathOptions};

/// Default options for every analyzer, one TOML table per analyzer.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub invariants: InvariantOptions,
    #[serde(default)]
    pub siphons: SiphonTrapOptions,
    #[serde(default)]
    pub deadlock: DeadlockOptions,
    #[serde(default)]
    pub boundedness: BoundednessOptions,
    #[serde(default)]
    pub liveness: LivenessOptions,
    #[serde(default)]
    pub fairness: FairnessOptions,
    #[serde(default)]
    pub reachability: ReachabilityOptions,
    #[serde(default)]
    pub cycles: CycleOptions,
    #[serde(default)]
    pub paths: PathOptions,
    #[serde(default)]
    pub hubs: HubOptions,
}

impl EngineConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::debug!("config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        Ok(config)
    }
}
