//! # Dispatch Module
//!
//! Spreads independent evaluation tasks over a pool of heterogeneous workers.
//!
//! ## Overview
//!
//! The energy matrix builder and the minimized-conformation workflows hand the
//! [`Dispatcher`] a batch of [`task::Task`]s and receive one [`TaskOutcome`] per task,
//! in input order. Internally the dispatcher is a message-passing queue: every worker
//! runs on its own thread fed by a command channel, and completions flow back on a
//! shared channel. Workers never share mutable state with each other.
//!
//! ## Workers
//!
//! - [`worker::LocalWorker`] - evaluates on the current machine, on the CPU or on an
//!   accelerated kernel with automatic CPU fallback.
//! - [`remote::RemoteWorker`] - ships serialized task envelopes over a
//!   [`remote::Transport`] to another process and decodes the result envelope.
//!
//! Tasks go to the idle worker with the best affinity for the task type. A task whose
//! worker failed transiently (unreachable, crashed) is requeued on a worker that has
//! not failed it yet, up to the retry limit; after that it is reported as a hard
//! failure and the caller decides whether to degrade or abort. Results are
//! idempotent, so a late duplicate completion is simply ignored.

pub mod dispatcher;
pub mod remote;
pub mod task;
pub mod worker;

pub use dispatcher::{Dispatcher, TaskFailure, TaskOutcome};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("No workers are registered with the dispatcher")]
    NoWorkers,
    #[error("All worker threads exited before the batch completed")]
    WorkersLost,
}
