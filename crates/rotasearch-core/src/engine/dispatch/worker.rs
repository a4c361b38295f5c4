use super::task::{Task, TaskKind, TaskOutput};
use crate::core::forcefield::scoring::EvalError;
use crate::engine::evaluation::Evaluator;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    Cpu,
    Accelerated,
    Remote,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum WorkerError {
    #[error("Worker unreachable: {0}")]
    Unreachable(String),
    #[error("Worker crashed: {0}")]
    Crashed(String),
    #[error("Evaluation rejected: {0}")]
    Evaluation(#[from] EvalError),
    #[error("Remote evaluation rejected: {0}")]
    Remote(String),
    #[error("No worker supports this task")]
    Unsupported,
}

impl WorkerError {
    /// Whether another attempt, possibly on another worker, may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Crashed(_))
    }
}

/// Something that can execute tasks.
pub trait Worker: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> WorkerKind;

    fn supports(&self, _task: &Task) -> bool {
        true
    }

    /// Preference for running `task` here; the dispatcher picks the highest.
    fn affinity(&self, task: &Task) -> u8 {
        match (self.kind(), task.kind()) {
            (WorkerKind::Accelerated, TaskKind::Term) => 3,
            (WorkerKind::Cpu, _) => 2,
            (WorkerKind::Accelerated, TaskKind::Conformation) | (WorkerKind::Remote, _) => 1,
        }
    }

    fn execute(&self, task: &Task) -> Result<TaskOutput, WorkerError>;
}

/// Worker evaluating in the current process.
#[derive(Debug, Clone)]
pub struct LocalWorker {
    name: String,
    evaluator: Evaluator,
}

impl LocalWorker {
    pub fn new(name: impl Into<String>, evaluator: Evaluator) -> Self {
        Self {
            name: name.into(),
            evaluator,
        }
    }
}

impl Worker for LocalWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> WorkerKind {
        if self.evaluator.backend().is_accelerated() {
            WorkerKind::Accelerated
        } else {
            WorkerKind::Cpu
        }
    }

    fn execute(&self, task: &Task) -> Result<TaskOutput, WorkerError> {
        Ok(self.evaluator.evaluate(task)?)
    }
}
