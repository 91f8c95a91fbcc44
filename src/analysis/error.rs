use thiserror::Error;

use crate::model::InvalidModelError;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("invalid model: {0}")]
    InvalidModel(#[from] InvalidModelError),
    #[error("analysis bound exceeded: {0}")]
    BoundExceeded(String),
    #[error("numerical failure in invariant solver: {0}")]
    Numerical(String),
    #[error(
        "net has {places} places, above the size guard of {limit}; exhaustive place-set search refused"
    )]
    SizeLimit { places: usize, limit: usize },
    #[error("unknown node '{0}'")]
    UnknownNode(String),
    #[error("invalid option: {0}")]
    InvalidOption(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("analysis aborted unexpectedly: {0}")]
    Panicked(String),
}
