use thiserror::Error;

use super::cache::CacheError;
use super::config::ConfigError;
use super::dispatch::DispatchError;
use super::search::frontier::FrontierError;
use crate::core::forcefield::scoring::EvalError;
use crate::core::models::ids::PositionId;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Position {position} has no candidate rotamers")]
    NoCandidates { position: PositionId },

    #[error("Energy evaluation failed: {0}")]
    Evaluation(#[from] EvalError),

    #[error("Energy cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Search frontier error: {0}")]
    Frontier(#[from] FrontierError),

    #[error("Task dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Task {task} failed after {attempts} attempts: {reason}")]
    TaskFailed {
        task: String,
        attempts: usize,
        reason: String,
    },

    #[error("Energy matrix is missing {missing} entries required by the search")]
    IncompleteMatrix { missing: usize },

    #[error("Search mode {mode} is not handled by the {workflow} workflow")]
    UnsupportedMode {
        mode: String,
        workflow: &'static str,
    },

    #[error("Internal logic error: {0}")]
    Internal(String),
}
